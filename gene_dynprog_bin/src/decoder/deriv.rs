use crate::decoder::content_cache::ContentFeatureCache;
use crate::decoder::lattice::{LatticeModel, PathStep};
use crate::decoder::segment_loss::{LossCursor, SegmentLossCache};
use crate::model::{Error, PenaltyFunction, Result};
use log::debug;
use ndarray::{s, Array2, ArrayView2, ArrayView3};

/// Slack added to the segment length when sizing the per-step loss window.
const LOSS_LOOKBACK_SLACK: i64 = 10;

/// Per-step score and loss contributions of a fixed path, and the derivatives of the
/// start, end and transition weights. Penalty function derivatives accumulate in the
/// functions themselves.
#[derive(Clone, Debug)]
pub struct PathDerivatives
{
    pub scores: Vec<f64>,
    pub losses: Vec<f64>,
    pub initial_deriv: Vec<f64>,
    pub end_deriv: Vec<f64>,
    /// Indexed `[from, to]`.
    pub transition_deriv: Array2<f64>,
}

impl PathDerivatives
{
    fn new(num_states: usize, path_len: usize) -> PathDerivatives
    {
        PathDerivatives {
            scores: vec![0.0; path_len],
            losses: vec![0.0; path_len],
            initial_deriv: vec![0.0; num_states],
            end_deriv: vec![0.0; num_states],
            transition_deriv: Array2::zeros((num_states, num_states)),
        }
    }

    pub fn total_score(&self) -> f64 { self.scores.iter().sum() }

    pub fn total_loss(&self) -> f64 { self.losses.iter().sum() }
}

/// Walks one known path forward, re-scoring each segment the way the decoder does and
/// recording which parameters it touched.
pub struct DerivativeAccumulator<'a>
{
    model: LatticeModel<'a>,
    plifs: &'a mut [Box<dyn PenaltyFunction>],
    observations: ArrayView3<'a, f64>,
    signal_ids: ArrayView2<'a, Option<usize>>,
}

impl<'a> DerivativeAccumulator<'a>
{
    pub fn new(model: LatticeModel<'a>, plifs: &'a mut [Box<dyn PenaltyFunction>], observations: ArrayView3<'a, f64>, signal_ids: ArrayView2<'a, Option<usize>>) -> DerivativeAccumulator<'a>
    {
        DerivativeAccumulator { model, plifs, observations, signal_ids }
    }

    fn validate_path(&self, path: &[PathStep]) -> Result<()>
    {
        let num_states = self.model.get_num_states();
        let seq_len = self.model.get_seq_len();

        if path.is_empty()
            { return Err("Derivative pass requires a non-empty path".into()); }

        for step in path.iter()
            {
            if step.state >= num_states
                { return Err(Error::StateOutOfRange("derivative path", step.state, num_states)); }
            if step.position >= seq_len
                { return Err(Error::InvalidValue(format!("Path position {} beyond sequence length {}", step.position, seq_len))); }
            }

        for pair in path.windows(2)
            {
            if pair[1].position <= pair[0].position
                { return Err(Error::InvalidValue(format!("Path positions must increase: {} then {}", pair[0].position, pair[1].position))); }
            if !self.model.transitions.is_allowed(pair[0].state, pair[1].state)
                { return Err(Error::InvalidValue(format!("Path uses missing transition {} -> {}", pair[0].state, pair[1].state))); }
            }

        Ok(())
    }

    /// Emission at `(state, t)` with derivatives for every signal penalty involved.
    fn emission_with_derivative(&mut self, state: usize, t: usize, zero_features: &[f64]) -> f64
    {
        let raw = self.observations.slice(s![state, t, ..]);
        let ids = self.signal_ids.row(state);

        if ids.is_empty() || ids[0].is_none()
            {
            let value = raw.get(0).copied().unwrap_or(0.0);
            return if value.is_nan() { f64::NEG_INFINITY } else { value };
            }

        let mut score = 0.0;
        for (k, id) in ids.iter().enumerate()
            {
            let id = match id { Some(id) => *id, None => break };
            let value = raw[k];
            if !value.is_finite()
                { return if value.is_nan() { f64::NEG_INFINITY } else { value }; }

            score += self.plifs[id].lookup_penalty(value, zero_features);
            self.plifs[id].penalty_add_derivative(value, zero_features);
            }
        score
    }

    /// The sum of `scores` and `losses` equals the score the decoder assigns to `path`.
    pub fn accumulate(&mut self, path: &[PathStep]) -> Result<PathDerivatives>
    {
        self.validate_path(path)?;

        for plif in self.plifs.iter_mut()
            { plif.penalty_clear_derivative(); }

        let model = self.model;
        let num_states = model.get_num_states();
        let seq_len = model.get_seq_len();
        let pos = model.positions;
        let path_len = path.len();
        let zero_features = vec![0.0; model.content.get_num_features()];

        let mut out = PathDerivatives::new(num_states, path_len);

        let first = path[0];
        let last = path[path_len - 1];

        out.initial_deriv[first.state] += 1.0;
        out.scores[0] += model.initial[first.state];
        out.scores[0] += self.emission_with_derivative(first.state, first.position, &zero_features);

        out.end_deriv[last.state] += 1.0;
        out.scores[path_len - 1] += model.end[last.state];

        let mut content = ContentFeatureCache::new(model.content);
        let mut loss_cache = model.segment_loss.map(|loss_model| SegmentLossCache::new(loss_model, seq_len, 0));

        for i in 0..path_len - 1
            {
            let from = path[i];
            let to = path[i + 1];
            let length = pos[to.position] - pos[from.position];

            if let Some(cache) = loss_cache.as_mut()
                {
                cache.init(seq_len, length + LOSS_LOOKBACK_SLACK);
                cache.find_segment_loss_till_pos(pos, to.position);
                let mut cursor = LossCursor::new(to.position);
                let segment_id = model.transitions.segment_id(from.state, to.state);
                out.losses[i] = cache.extend_segment_loss(segment_id, from.position, &mut cursor);
                }

            out.transition_deriv[[from.state, to.state]] += 1.0;
            out.scores[i] += model.transitions.weight(from.state, to.state);

            if let Some(id) = model.plif_ids[[to.state, from.state]]
                {
                let features: Vec<f64> = if self.plifs[id].uses_svm_values()
                    {
                    let origin = model.orf_constraint(from.state, to.state).map_or(0, |c| c.frame_origin(pos[to.position]));
                    content.reset(pos[to.position], origin);
                    content.extend(pos[from.position]).to_vec()
                    }
                else
                    { zero_features.clone() };

                out.scores[i] += self.plifs[id].lookup_penalty(length as f64, &features);
                self.plifs[id].penalty_add_derivative(length as f64, &features);
                }

            out.scores[i] += model.segment_sum(to.state, from.position, to.position);
            out.scores[i] += self.emission_with_derivative(to.state, to.position, &zero_features);
            }

        debug!("Derivative pass over {} steps: score {}, loss {}", path_len, out.total_score(), out.total_loss());

        Ok(out)
    }
}
