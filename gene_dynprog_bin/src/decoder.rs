pub mod config;
pub mod content_cache;
pub mod deriv;
pub mod lattice;
pub mod nbest;
pub mod orf;
pub mod segment_loss;

pub use config::{DecodeConfig, DEFAULT_MAX_LOOK_BACK, INFEASIBLE_EMISSION, MAX_NBEST};
pub use deriv::{DerivativeAccumulator, PathDerivatives};
pub use lattice::{DecodedPath, LatticeDecoder, LatticeModel, PathStep};
pub use orf::OrfPhases;
pub use segment_loss::SegmentLossModel;

use crate::decoder::content_cache::ContentSource;
use crate::model::{ContentModel, Error, GeneString, PenaltyFunction, Result, TilingTrack, Transition, TransitionTable};
use log::{debug, info};
use ndarray::{Array2, Array3, ArrayView2};
use std::fmt;

/// Configuration stages of a decode session, in the order they must be completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DecodeStep {
    Uninitialized,
    SequenceSet,
    PositionsSet,
    OrfInfoSet,
    SegmentWeightsSet,
    PlifListSet,
    PlifMatrixSet,
    PlifSignalMatrixSet,
    GenestrSet,
    DictWeightsSet,
    Solved,
    ScoresRead,
    StatesRead,
}

impl DecodeStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeStep::Uninitialized => "uninitialized",
            DecodeStep::SequenceSet => "set_observations",
            DecodeStep::PositionsSet => "set_positions",
            DecodeStep::OrfInfoSet => "set_orf_info",
            DecodeStep::SegmentWeightsSet => "set_segment_sum_weights",
            DecodeStep::PlifListSet => "set_plif_list",
            DecodeStep::PlifMatrixSet => "set_plif_id_matrix",
            DecodeStep::PlifSignalMatrixSet => "set_plif_state_signal_matrix",
            DecodeStep::GenestrSet => "set_genestr",
            DecodeStep::DictWeightsSet => "set_dict_weights",
            DecodeStep::Solved => "decode",
            DecodeStep::ScoresRead => "get_scores",
            DecodeStep::StatesRead => "get_state_path",
        }
    }

    fn is_decodable(&self) -> bool {
        *self >= DecodeStep::DictWeightsSet
    }
}

impl fmt::Display for DecodeStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Semi-Markov gene structure decoder.
///
/// Model parameters (states, start/end scores, transitions, content model, tiling tracks) are
/// set first. Each sequence then goes through the stage setters in `DecodeStep` order before
/// `decode`, after which scores and paths can be read back.
pub struct DynProg {
    num_states: usize,
    initial: Vec<f64>,
    end: Vec<f64>,
    transitions: TransitionTable,
    content_model: Option<ContentModel>,
    tracks: Vec<TilingTrack>,

    step: DecodeStep,
    observations: Array3<f64>,
    positions: Vec<i64>,
    orf_info: Vec<OrfPhases>,
    segment_sum_weights: Option<Array2<f64>>,
    plifs: Vec<Box<dyn PenaltyFunction>>,
    plif_ids: Array2<Option<usize>>,
    signal_plif_ids: Array2<Option<usize>>,
    genestr: GeneString,
    word_strings: Vec<Vec<u16>>,
    loss_tensor: Option<Array3<f64>>,
    segment_loss: Option<SegmentLossModel>,
    reference: Option<(Vec<usize>, Vec<f64>)>,

    config: DecodeConfig,
    scores: Vec<f64>,
    paths: Vec<DecodedPath>,
}

impl DynProg {
    pub fn new(num_states: usize) -> DynProg {
        DynProg {
            num_states,
            initial: vec![0.0; num_states],
            end: vec![0.0; num_states],
            transitions: TransitionTable::empty(num_states),
            content_model: None,
            tracks: Vec::new(),
            step: DecodeStep::Uninitialized,
            observations: Array3::zeros((num_states, 0, 1)),
            positions: Vec::new(),
            orf_info: vec![OrfPhases::none(); num_states],
            segment_sum_weights: None,
            plifs: Vec::new(),
            plif_ids: Array2::from_elem((num_states, num_states), None),
            signal_plif_ids: Array2::from_elem((num_states, 1), None),
            genestr: GeneString::default(),
            word_strings: Vec::new(),
            loss_tensor: None,
            segment_loss: None,
            reference: None,
            config: DecodeConfig::default(),
            scores: Vec::new(),
            paths: Vec::new(),
        }
    }

    /// Discards all model and sequence configuration.
    pub fn set_num_states(&mut self, num_states: usize) {
        *self = DynProg::new(num_states);
    }

    pub fn get_num_states(&self) -> usize { self.num_states }

    pub fn get_step(&self) -> DecodeStep { self.step }

    fn require(&self, call: &'static str, allowed: &[DecodeStep]) -> Result<()> {
        if allowed.contains(&self.step) {
            return Ok(());
        }
        let required = allowed.first().map_or("uninitialized", |s| s.as_str());
        Err(Error::OutOfOrder(call, required))
    }

    fn require_before_plifs(&self, call: &'static str) -> Result<()> {
        if self.step >= DecodeStep::PlifListSet {
            return Err(Error::InvalidValue(format!("{} must be called before set_plif_list", call)));
        }
        Ok(())
    }

    pub fn set_p_vector(&mut self, initial: Vec<f64>) -> Result<()> {
        if initial.len() != self.num_states {
            return Err(Error::MismatchedDimensions("start scores", initial.len(), self.num_states));
        }
        self.initial = initial;
        Ok(())
    }

    pub fn set_q_vector(&mut self, end: Vec<f64>) -> Result<()> {
        if end.len() != self.num_states {
            return Err(Error::MismatchedDimensions("end scores", end.len(), self.num_states));
        }
        self.end = end;
        Ok(())
    }

    pub fn set_a_trans(&mut self, transitions: &[Transition]) -> Result<()> {
        self.transitions = TransitionTable::new(self.num_states, transitions)?;
        Ok(())
    }

    /// Rows of `from, to, weight[, segment_id]`.
    pub fn set_a_trans_matrix(&mut self, a_trans: ArrayView2<f64>) -> Result<()> {
        self.transitions = TransitionTable::from_trans_matrix(self.num_states, a_trans)?;
        Ok(())
    }

    pub fn get_transitions(&self) -> &TransitionTable { &self.transitions }

    pub fn set_content_model(&mut self, model: ContentModel) -> Result<()> {
        self.require_before_plifs("set_content_model")?;
        self.content_model = Some(model);
        Ok(())
    }

    /// Adds one content feature channel after the SVM channels.
    pub fn init_tiling_data(&mut self, track: TilingTrack) -> Result<()> {
        self.require_before_plifs("init_tiling_data")?;
        self.tracks.push(track);
        Ok(())
    }

    pub fn get_num_features(&self) -> usize {
        self.content_model.as_ref().map_or(0, |m| m.get_num_svms()) + self.tracks.len()
    }

    /// Raw observations `[state, position, signal channel]`. Starts a new sequence.
    pub fn set_observations(&mut self, observations: Array3<f64>) -> Result<()> {
        let (states, _, signals) = observations.dim();
        if states != self.num_states {
            return Err(Error::MismatchedDimensions("observation states", states, self.num_states));
        }
        if signals == 0 {
            return Err("Observations need at least one signal channel".into());
        }

        self.observations = observations;
        self.positions.clear();
        self.segment_sum_weights = None;
        self.orf_info = vec![OrfPhases::none(); self.num_states];
        self.reference = None;
        self.segment_loss = None;
        self.scores.clear();
        self.paths.clear();
        self.step = DecodeStep::SequenceSet;
        Ok(())
    }

    /// Single-channel observations `[state, position]`.
    pub fn set_observations_2d(&mut self, observations: Array2<f64>) -> Result<()> {
        let (states, seq_len) = observations.dim();
        let observations = observations
            .into_shape((states, seq_len, 1))
            .map_err(|e| Error::InvalidValue(e.to_string()))?;
        self.set_observations(observations)
    }

    pub fn get_seq_len(&self) -> usize { self.observations.dim().1 }

    pub fn set_positions(&mut self, positions: Vec<i64>) -> Result<()> {
        self.require("set_positions", &[DecodeStep::SequenceSet])?;

        let seq_len = self.get_seq_len();
        if positions.len() != seq_len {
            return Err(Error::MismatchedDimensions("positions", positions.len(), seq_len));
        }
        if positions.windows(2).any(|w| w[1] <= w[0]) {
            return Err("Positions must be strictly increasing".into());
        }
        if positions.first().map_or(false, |&p| p < 0) {
            return Err("Positions must be non-negative".into());
        }

        self.positions = positions;
        self.step = DecodeStep::PositionsSet;
        Ok(())
    }

    /// `N x 2` table of `(from phase, to phase)`, `-1` for none.
    pub fn set_orf_info(&mut self, orf_info: ArrayView2<i32>) -> Result<()> {
        self.require("set_orf_info", &[DecodeStep::PositionsSet])?;

        if orf_info.nrows() != self.num_states {
            return Err(Error::MismatchedDimensions("orf info rows", orf_info.nrows(), self.num_states));
        }
        if orf_info.ncols() != 2 {
            return Err(Error::MismatchedDimensions("orf info columns", orf_info.ncols(), 2));
        }

        let phase = |v: i32| -> Result<Option<u8>> {
            match v {
                -1 => Ok(None),
                0..=2 => Ok(Some(v as u8)),
                _ => Err(Error::InvalidValue(format!("ORF phase {} outside -1..=2", v))),
            }
        };

        let phases = orf_info
            .rows()
            .into_iter()
            .map(|row| -> Result<OrfPhases> { Ok(OrfPhases::new(phase(row[0])?, phase(row[1])?)) })
            .collect::<Result<Vec<OrfPhases>>>()?;

        check_orf_consistency(&self.transitions, &phases)?;

        self.orf_info = phases;
        self.step = DecodeStep::OrfInfoSet;
        Ok(())
    }

    /// `N x seq_len` weights, summed over each segment into the state. Disables frame checks.
    pub fn set_segment_sum_weights(&mut self, weights: Array2<f64>) -> Result<()> {
        self.require("set_segment_sum_weights", &[DecodeStep::PositionsSet])?;

        let (states, seq_len) = weights.dim();
        if states != self.num_states {
            return Err(Error::MismatchedDimensions("segment weight states", states, self.num_states));
        }
        if seq_len != self.get_seq_len() {
            return Err(Error::MismatchedDimensions("segment weight positions", seq_len, self.get_seq_len()));
        }

        self.orf_info = vec![OrfPhases::none(); self.num_states];
        self.segment_sum_weights = Some(weights);
        self.step = DecodeStep::SegmentWeightsSet;
        Ok(())
    }

    pub fn set_plif_list(&mut self, plifs: Vec<Box<dyn PenaltyFunction>>) -> Result<()> {
        self.require("set_plif_list", &[DecodeStep::OrfInfoSet, DecodeStep::SegmentWeightsSet])?;

        let num_features = self.get_num_features();
        for (id, plif) in plifs.iter().enumerate() {
            if let Some(&channel) = plif.get_used_svms().iter().find(|&&c| c >= num_features) {
                return Err(Error::InvalidValue(format!(
                    "Penalty {} reads feature channel {}, only {} configured",
                    id, channel, num_features
                )));
            }
        }

        self.plifs = plifs;
        self.step = DecodeStep::PlifListSet;
        Ok(())
    }

    /// `N x N` penalty ids indexed `[to, from]`.
    pub fn set_plif_id_matrix(&mut self, plif_ids: Array2<Option<usize>>) -> Result<()> {
        self.require("set_plif_id_matrix", &[DecodeStep::PlifListSet])?;

        let (rows, cols) = plif_ids.dim();
        if rows != self.num_states || cols != self.num_states {
            return Err(Error::MismatchedDimensions("penalty id matrix", rows.max(cols), self.num_states));
        }
        self.check_plif_ids(plif_ids.iter())?;

        self.plif_ids = plif_ids;
        self.step = DecodeStep::PlifMatrixSet;
        Ok(())
    }

    /// `N x signals` penalty ids for the observation channels.
    pub fn set_plif_state_signal_matrix(&mut self, signal_ids: Array2<Option<usize>>) -> Result<()> {
        self.require("set_plif_state_signal_matrix", &[DecodeStep::PlifMatrixSet])?;

        let (rows, cols) = signal_ids.dim();
        if rows != self.num_states {
            return Err(Error::MismatchedDimensions("signal penalty rows", rows, self.num_states));
        }
        let signals = self.observations.dim().2;
        if cols != signals {
            return Err(Error::MismatchedDimensions("signal penalty columns", cols, signals));
        }
        self.check_plif_ids(signal_ids.iter())?;

        self.signal_plif_ids = signal_ids;
        self.step = DecodeStep::PlifSignalMatrixSet;
        Ok(())
    }

    fn check_plif_ids<'b>(&self, ids: impl Iterator<Item = &'b Option<usize>>) -> Result<()> {
        for id in ids.flatten() {
            if *id >= self.plifs.len() {
                return Err(Error::InvalidValue(format!("Penalty id {} beyond list of {}", id, self.plifs.len())));
            }
        }
        Ok(())
    }

    pub fn set_genestr(&mut self, genestr: &[u8]) -> Result<()> {
        self.require("set_genestr", &[DecodeStep::PlifSignalMatrixSet])?;

        let genestr = GeneString::new(genestr);
        if let Some(&last) = self.positions.last() {
            if !genestr.is_empty() && last as usize > genestr.len() {
                return Err(Error::InvalidValue(format!(
                    "Position {} beyond gene string of length {}",
                    last,
                    genestr.len()
                )));
            }
        }

        self.word_strings = match &self.content_model {
            Some(model) => model
                .get_word_degrees()
                .iter()
                .map(|&degree| genestr.create_word_string(degree))
                .collect::<Result<Vec<Vec<u16>>>>()?,
            None => Vec::new(),
        };

        self.genestr = genestr;
        self.step = DecodeStep::GenestrSet;
        Ok(())
    }

    /// `[total words, svms]`, or `(0, 0)` without a content model.
    pub fn set_dict_weights(&mut self, dict_weights: Array2<f64>) -> Result<()> {
        self.require("set_dict_weights", &[DecodeStep::GenestrSet])?;

        match self.content_model.as_mut() {
            Some(model) => model.set_dict_weights(dict_weights)?,
            None => {
                if !dict_weights.is_empty() {
                    return Err(Error::MismatchedDimensions("dictionary weights without content model", dict_weights.len(), 0));
                }
            }
        }

        self.step = DecodeStep::DictWeightsSet;
        Ok(())
    }

    /// `(max segment id + 1)^2 x 2` cost tensor.
    pub fn set_segment_loss(&mut self, loss: Array3<f64>) -> Result<()> {
        if !self.step.is_decodable() {
            return Err(Error::OutOfOrder("set_segment_loss", DecodeStep::DictWeightsSet.as_str()));
        }

        let expected = self.transitions.get_max_segment_id() + 1;
        let (refs, _, _) = loss.dim();
        if refs != expected {
            return Err(Error::MismatchedDimensions("segment loss ids", refs, expected));
        }

        self.loss_tensor = Some(loss);
        self.rebuild_segment_loss()
    }

    pub fn set_segment_ids_mask(&mut self, segment_ids: Vec<usize>, segment_mask: Vec<f64>) -> Result<()> {
        if !self.step.is_decodable() {
            return Err(Error::OutOfOrder("set_segment_ids_mask", DecodeStep::DictWeightsSet.as_str()));
        }
        let seq_len = self.get_seq_len();
        if segment_ids.len() != seq_len {
            return Err(Error::MismatchedDimensions("segment ids", segment_ids.len(), seq_len));
        }

        self.reference = Some((segment_ids, segment_mask));
        self.rebuild_segment_loss()
    }

    fn rebuild_segment_loss(&mut self) -> Result<()> {
        self.segment_loss = match (&self.loss_tensor, &self.reference) {
            (Some(loss), Some((ids, mask))) => Some(SegmentLossModel::new(loss.clone(), ids.clone(), mask.clone())?),
            _ => None,
        };
        Ok(())
    }

    /// The transition list may change after the loss tensor was set.
    fn check_segment_loss_ids(&self) -> Result<()> {
        if let Some(loss) = &self.segment_loss {
            let expected = self.transitions.get_max_segment_id() + 1;
            if loss.get_num_ids() != expected {
                return Err(Error::MismatchedDimensions("segment loss ids", loss.get_num_ids(), expected));
            }
        }
        Ok(())
    }

    /// Global look-back: the largest finite domain of any transition penalty, at least
    /// `DEFAULT_MAX_LOOK_BACK`, capped by the gene string length.
    pub fn compute_max_look_back(&self) -> i64 {
        let mut max_look_back = DEFAULT_MAX_LOOK_BACK;
        for id in self.plif_ids.iter().flatten() {
            let max_value = self.plifs[*id].get_max_value();
            if max_value.is_finite() && max_value.ceil() as i64 > max_look_back {
                debug!("Penalty {} raises look-back to {}", id, max_value.ceil());
                max_look_back = max_value.ceil() as i64;
            }
        }

        if !self.genestr.is_empty() {
            max_look_back = max_look_back.min(self.genestr.len() as i64);
        }
        max_look_back
    }

    fn lattice_parts(&mut self) -> (LatticeModel<'_>, &mut [Box<dyn PenaltyFunction>]) {
        let max_look_back = self.compute_max_look_back();

        let model = LatticeModel {
            initial: &self.initial,
            end: &self.end,
            positions: &self.positions,
            transitions: &self.transitions,
            plif_ids: self.plif_ids.view(),
            orf_info: &self.orf_info,
            segment_sum_weights: self.segment_sum_weights.as_ref().map(|w| w.view()),
            content: ContentSource::new(self.content_model.as_ref(), &self.word_strings, &self.tracks),
            stop_codons: self.genestr.get_stop_codons(),
            segment_loss: self.segment_loss.as_ref(),
            max_look_back,
        };

        (model, self.plifs.as_mut_slice())
    }

    /// Emission scores `[state, position index]` after the state signal penalties.
    pub fn evaluate_emissions(&self) -> Array2<f64> {
        lattice::evaluate_emissions(self.observations.view(), self.signal_plif_ids.view(), &self.plifs, self.get_num_features())
    }

    pub fn decode(&mut self, nbest: usize) -> Result<()> {
        self.decode_with(DecodeConfig::new(nbest))
    }

    pub fn decode_with(&mut self, config: DecodeConfig) -> Result<()> {
        if !self.step.is_decodable() {
            return Err(Error::OutOfOrder("decode", DecodeStep::DictWeightsSet.as_str()));
        }
        config.validate()?;

        if config.with_loss && self.segment_loss.is_none() {
            return Err(Error::OutOfOrder("decode with loss", "set_segment_loss and set_segment_ids_mask"));
        }
        if config.with_loss {
            self.check_segment_loss_ids()?;
        }
        if config.use_orf && self.genestr.is_empty() {
            return Err("Stop codon checks need a gene string".into());
        }
        if self.segment_sum_weights.is_none() {
            check_orf_consistency(&self.transitions, &self.orf_info)?;
        }

        let uses_svm = self.plif_ids.iter().flatten().any(|&id| self.plifs[id].uses_svm_values());
        let emissions = self.evaluate_emissions();

        let (model, plifs) = self.lattice_parts();
        info!(
            "Decoding {} states over {} positions: look-back {}, content features {}, {}",
            model.get_num_states(),
            model.get_seq_len(),
            model.max_look_back,
            uses_svm,
            config
        );

        let plifs: &[Box<dyn PenaltyFunction>] = plifs;
        let solution = LatticeDecoder::new(model, plifs, emissions.view(), config).solve()?;

        self.scores = solution.scores;
        self.paths = solution.paths;
        self.config = config;
        self.step = DecodeStep::Solved;
        Ok(())
    }

    /// Scores of the ranked paths, best first. `-inf` where no such path exists.
    pub fn get_scores(&mut self) -> Result<Vec<f64>> {
        self.require("get_scores", &[DecodeStep::Solved, DecodeStep::ScoresRead, DecodeStep::StatesRead])?;
        self.step = self.step.max(DecodeStep::ScoresRead);
        Ok(self.scores.clone())
    }

    pub fn get_state_path(&mut self, rank: usize) -> Result<DecodedPath> {
        self.require("get_state_path", &[DecodeStep::ScoresRead, DecodeStep::StatesRead])?;
        let path = self
            .paths
            .get(rank)
            .cloned()
            .ok_or_else(|| Error::InvalidValue(format!("Rank {} beyond nbest {}", rank, self.paths.len())))?;
        self.step = DecodeStep::StatesRead;
        Ok(path)
    }

    /// `nbest x seq_len` matrix of the path states, `-1` after the end of each path.
    pub fn get_states(&mut self) -> Result<Array2<i64>> {
        self.padded_paths("get_states", |step| step.state as i64)
    }

    /// `nbest x seq_len` matrix of the path position indices, `-1` after the end of each path.
    pub fn get_positions(&mut self) -> Result<Array2<i64>> {
        self.padded_paths("get_positions", |step| step.position as i64)
    }

    fn padded_paths(&mut self, call: &'static str, value: impl Fn(&PathStep) -> i64) -> Result<Array2<i64>> {
        self.require(call, &[DecodeStep::ScoresRead, DecodeStep::StatesRead])?;

        let mut out = Array2::from_elem((self.paths.len(), self.get_seq_len()), -1i64);
        for (k, path) in self.paths.iter().enumerate() {
            for (i, step) in path.get_steps().iter().enumerate() {
                out[[k, i]] = value(step);
            }
        }

        self.step = DecodeStep::StatesRead;
        Ok(out)
    }

    /// Sequence coordinates of the steps of `path`.
    pub fn get_coordinates(&self, path: &DecodedPath) -> Vec<i64> {
        path.get_steps().iter().map(|step| self.positions[step.position]).collect()
    }

    /// Re-scores `path` and accumulates derivatives. Penalty derivatives are cleared first and
    /// can be read through `get_plif`.
    pub fn accumulate_derivatives(&mut self, path: &[PathStep]) -> Result<PathDerivatives> {
        if !self.step.is_decodable() {
            return Err(Error::OutOfOrder("accumulate_derivatives", DecodeStep::DictWeightsSet.as_str()));
        }
        self.check_segment_loss_ids()?;

        let observations = self.observations.clone();
        let signal_ids = self.signal_plif_ids.clone();
        let (model, plifs) = self.lattice_parts();

        DerivativeAccumulator::new(model, plifs, observations.view(), signal_ids.view()).accumulate(path)
    }

    pub fn get_plif(&self, id: usize) -> Option<&dyn PenaltyFunction> {
        self.plifs.get(id).map(|p| p.as_ref())
    }

    pub fn get_num_plifs(&self) -> usize { self.plifs.len() }

    pub fn get_genestr(&self) -> &GeneString { &self.genestr }

    pub fn get_config(&self) -> DecodeConfig { self.config }
}

fn check_orf_consistency(transitions: &TransitionTable, phases: &[OrfPhases]) -> Result<()> {
    for trans in transitions.iter() {
        let from_declared = phases[trans.from].from.is_some();
        let to_declared = phases[trans.to].to.is_some();
        if from_declared != to_declared {
            return Err(Error::InconsistentOrf(trans.from, trans.to));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Plif, PlifArray};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    const NEG_INF: f64 = f64::NEG_INFINITY;

    fn configure(dp: &mut DynProg, observations: Array3<f64>, positions: Vec<i64>, orf_info: Array2<i32>,
                 plifs: Vec<Box<dyn PenaltyFunction>>, plif_ids: Array2<Option<usize>>, genestr: &[u8])
    {
        let num_states = dp.get_num_states();
        dp.set_observations(observations).unwrap();
        dp.set_positions(positions).unwrap();
        dp.set_orf_info(orf_info.view()).unwrap();
        dp.set_plif_list(plifs).unwrap();
        dp.set_plif_id_matrix(plif_ids).unwrap();
        dp.set_plif_state_signal_matrix(Array2::from_elem((num_states, 1), None)).unwrap();
        dp.set_genestr(genestr).unwrap();
        dp.set_dict_weights(Array2::zeros((0, 0))).unwrap();
    }

    /// 0 -> 1 -> 2 over positions 0, 10, 25, 40 with a length penalty on the 0 -> 1 segment.
    fn three_state(length_penalty: f64) -> DynProg
    {
        let mut dp = DynProg::new(3);
        dp.set_p_vector(vec![0.0, NEG_INF, NEG_INF]).unwrap();
        dp.set_q_vector(vec![NEG_INF, NEG_INF, 0.0]).unwrap();
        dp.set_a_trans(&[Transition::new(0, 1, 0.5), Transition::new(1, 2, 0.3).with_segment_id(1)]).unwrap();

        let mut plif_ids = Array2::from_elem((3, 3), None);
        plif_ids[[1, 0]] = Some(0);
        let plifs: Vec<Box<dyn PenaltyFunction>> =
            vec![Box::new(Plif::new(vec![0.0, 100.0], vec![0.0, length_penalty]).unwrap())];

        configure(&mut dp, Array3::zeros((3, 4, 1)), vec![0, 10, 25, 40], Array2::from_elem((3, 2), -1), plifs, plif_ids, b"");
        dp
    }

    #[test]
    fn test_decode_ranks_paths() {
        let mut dp = three_state(1.0);
        dp.decode(3).unwrap();

        let scores = dp.get_scores().unwrap();
        assert_abs_diff_eq!(scores[0], 1.05, epsilon = 1e-12);
        assert_abs_diff_eq!(scores[1], 0.9, epsilon = 1e-12);
        assert_eq!(scores[2], NEG_INF);

        assert_eq!(dp.get_state_path(0).unwrap().get_positions(), vec![0, 2, 3]);
        assert_eq!(dp.get_state_path(1).unwrap().get_positions(), vec![0, 1, 3]);
        assert!(dp.get_state_path(2).unwrap().is_empty());
        assert!(dp.get_state_path(3).is_err());

        let states = dp.get_states().unwrap();
        let positions = dp.get_positions().unwrap();
        assert_eq!(states.row(0).to_vec(), vec![0, 1, 2, -1]);
        assert_eq!(positions.row(1).to_vec(), vec![0, 1, 3, -1]);
        assert!(states.row(2).iter().all(|&s| s == -1));
        assert_eq!(dp.get_step(), DecodeStep::StatesRead);
    }

    #[test]
    fn test_decode_is_repeatable() {
        let mut dp = three_state(1.0);
        dp.decode(2).unwrap();
        let first = dp.get_scores().unwrap();
        dp.decode(2).unwrap();
        assert_eq!(dp.get_scores().unwrap(), first);

        let mut single = three_state(1.0);
        single.decode(1).unwrap();
        assert_eq!(single.get_scores().unwrap()[0], first[0]);
        assert_eq!(single.get_state_path(0).unwrap(), dp.get_state_path(0).unwrap());
    }

    #[test]
    fn test_derivatives_match_decoded_score() {
        let mut dp = three_state(1.0);
        dp.decode(1).unwrap();
        let best = dp.get_scores().unwrap()[0];
        let path = dp.get_state_path(0).unwrap();

        let derivs = dp.accumulate_derivatives(path.get_steps()).unwrap();
        assert_abs_diff_eq!(derivs.total_score() + derivs.total_loss(), best, epsilon = 1e-12);
        assert_abs_diff_eq!(derivs.scores[0], 0.75, epsilon = 1e-12);
        assert_eq!(derivs.initial_deriv, vec![1.0, 0.0, 0.0]);
        assert_eq!(derivs.end_deriv, vec![0.0, 0.0, 1.0]);
        assert_eq!(derivs.transition_deriv[[0, 1]], 1.0);
        assert_eq!(derivs.transition_deriv[[1, 2]], 1.0);
        assert_eq!(derivs.transition_deriv.sum(), 2.0);

        let plif_derivs = dp.get_plif(0).unwrap().get_derivatives();
        assert_abs_diff_eq!(plif_derivs[0], 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(plif_derivs[1], 0.25, epsilon = 1e-12);

        // Perturbing the upper knot moves the best score by its derivative.
        let h = 1e-3;
        let mut perturbed = three_state(1.0 + h);
        perturbed.decode(1).unwrap();
        let moved = perturbed.get_scores().unwrap()[0];
        assert_abs_diff_eq!((moved - best) / h, plif_derivs[1], epsilon = 1e-6);
    }

    const TOY_LENGTH_PENALTIES: [f64; 4] = [0.5, -0.2, 0.4, -1.0];
    const TOY_SIGNAL_PENALTIES: [f64; 3] = [0.3, -0.1, 0.2];

    /// 0 -> 1 -> 1 .. over five positions, a length function on both transitions into 1 and a
    /// signal function on the emissions of state 1.
    fn two_state_toy(length_penalties: &[f64], signal_penalties: &[f64]) -> DynProg
    {
        let mut dp = DynProg::new(2);
        dp.set_p_vector(vec![0.0, NEG_INF]).unwrap();
        dp.set_q_vector(vec![NEG_INF, 0.0]).unwrap();
        dp.set_a_trans(&[Transition::new(0, 1, 0.1), Transition::new(1, 1, -0.2)]).unwrap();

        let mut observations = Array3::zeros((2, 5, 1));
        for (t, &v) in [0.4, -0.7, 0.25, 1.3, -0.35].iter().enumerate() {
            observations[[1, t, 0]] = v;
        }
        dp.set_observations(observations).unwrap();
        dp.set_positions(vec![0, 2, 5, 9, 14]).unwrap();
        dp.set_orf_info(Array2::from_elem((2, 2), -1).view()).unwrap();

        let plifs: Vec<Box<dyn PenaltyFunction>> = vec![
            Box::new(Plif::new(vec![0.0, 3.0, 7.0, 12.0], length_penalties.to_vec()).unwrap()),
            Box::new(Plif::new(vec![-1.0, 0.0, 1.0], signal_penalties.to_vec()).unwrap().with_range(-2.0, 2.0).unwrap()),
        ];
        dp.set_plif_list(plifs).unwrap();

        let mut plif_ids = Array2::from_elem((2, 2), None);
        plif_ids[[1, 0]] = Some(0);
        plif_ids[[1, 1]] = Some(0);
        dp.set_plif_id_matrix(plif_ids).unwrap();
        dp.set_plif_state_signal_matrix(array![[None], [Some(1)]]).unwrap();
        dp.set_genestr(b"").unwrap();
        dp.set_dict_weights(Array2::zeros((0, 0))).unwrap();
        dp
    }

    fn toy_best_score(length_penalties: &[f64], signal_penalties: &[f64]) -> f64
    {
        let mut dp = two_state_toy(length_penalties, signal_penalties);
        dp.decode(1).unwrap();
        dp.get_scores().unwrap()[0]
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let mut dp = two_state_toy(&TOY_LENGTH_PENALTIES, &TOY_SIGNAL_PENALTIES);
        dp.decode(1).unwrap();
        let best = dp.get_scores().unwrap()[0];
        assert!(best.is_finite());
        let path = dp.get_state_path(0).unwrap();

        let derivs = dp.accumulate_derivatives(path.get_steps()).unwrap();
        assert_abs_diff_eq!(derivs.total_score(), best, epsilon = 1e-12);
        let length_derivs = dp.get_plif(0).unwrap().get_derivatives();
        let signal_derivs = dp.get_plif(1).unwrap().get_derivatives();
        assert_eq!(length_derivs.len(), TOY_LENGTH_PENALTIES.len());
        assert_eq!(signal_derivs.len(), TOY_SIGNAL_PENALTIES.len());

        // one emission per step, one length lookup per segment
        assert_abs_diff_eq!(signal_derivs.iter().sum::<f64>(), (path.len() - 1) as f64, epsilon = 1e-12);
        assert_abs_diff_eq!(length_derivs.iter().sum::<f64>(), (path.len() - 1) as f64, epsilon = 1e-12);

        let h = 1e-6;
        for k in 0..TOY_LENGTH_PENALTIES.len() {
            let mut moved = TOY_LENGTH_PENALTIES;
            moved[k] += h;
            let fd = (toy_best_score(&moved, &TOY_SIGNAL_PENALTIES) - best) / h;
            assert_abs_diff_eq!(fd, length_derivs[k], epsilon = 1e-6);
        }
        for k in 0..TOY_SIGNAL_PENALTIES.len() {
            let mut moved = TOY_SIGNAL_PENALTIES;
            moved[k] += h;
            let fd = (toy_best_score(&TOY_LENGTH_PENALTIES, &moved) - best) / h;
            assert_abs_diff_eq!(fd, signal_derivs[k], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_derivative_path_validation() {
        let mut dp = three_state(1.0);
        let skip = [PathStep { state: 0, position: 0 }, PathStep { state: 2, position: 3 }];
        assert!(dp.accumulate_derivatives(&skip).is_err());

        let backwards = [PathStep { state: 0, position: 2 }, PathStep { state: 1, position: 1 }];
        assert!(dp.accumulate_derivatives(&backwards).is_err());

        assert!(dp.accumulate_derivatives(&[]).is_err());
    }

    #[test]
    fn test_loss_augmented_decode() {
        let mut dp = three_state(1.0);
        assert!(matches!(dp.decode_with(DecodeConfig::new(1).with_loss(true)), Err(Error::OutOfOrder(..))));

        let mut loss = Array3::zeros((2, 2, 2));
        loss[[0, 1, 0]] = 1.0;
        loss[[1, 0, 0]] = 1.0;
        loss[[0, 1, 1]] = 0.01;
        loss[[1, 0, 1]] = 0.01;
        dp.set_segment_loss(loss).unwrap();
        dp.set_segment_ids_mask(vec![0, 0, 1, 1], vec![1.0; 4]).unwrap();

        dp.decode_with(DecodeConfig::new(2).with_loss(true).with_cache_verification(true)).unwrap();
        let scores = dp.get_scores().unwrap();

        // The early start overlaps one reference segment of id 0 over 15 bases.
        assert_abs_diff_eq!(scores[0], 0.9 + 1.15, epsilon = 1e-9);
        assert_abs_diff_eq!(scores[1], 1.05, epsilon = 1e-9);

        let path = dp.get_state_path(0).unwrap();
        assert_eq!(path.get_positions(), vec![0, 1, 3]);

        let derivs = dp.accumulate_derivatives(path.get_steps()).unwrap();
        assert_abs_diff_eq!(derivs.total_loss(), 1.15, epsilon = 1e-9);
        assert_abs_diff_eq!(derivs.total_score() + derivs.total_loss(), scores[0], epsilon = 1e-9);
    }

    #[test]
    fn test_loss_ids_follow_transition_changes() {
        let mut dp = three_state(1.0);
        let mut loss = Array3::zeros((2, 2, 2));
        loss[[0, 1, 0]] = 1.0;
        dp.set_segment_loss(loss).unwrap();
        dp.set_segment_ids_mask(vec![0, 0, 1, 1], vec![1.0; 4]).unwrap();

        dp.set_a_trans(&[Transition::new(0, 1, 0.5), Transition::new(1, 2, 0.3).with_segment_id(3)]).unwrap();

        let result = dp.decode_with(DecodeConfig::new(1).with_loss(true));
        assert!(matches!(result, Err(Error::MismatchedDimensions("segment loss ids", 2, 4))));
        let path = [PathStep { state: 0, position: 0 }, PathStep { state: 1, position: 1 }, PathStep { state: 2, position: 3 }];
        assert!(matches!(dp.accumulate_derivatives(&path), Err(Error::MismatchedDimensions(..))));

        // Decoding without loss never reads the tensor.
        dp.decode(1).unwrap();

        let mut wider = Array3::zeros((4, 4, 2));
        wider[[0, 3, 0]] = 1.0;
        dp.set_segment_loss(wider).unwrap();
        dp.decode_with(DecodeConfig::new(1).with_loss(true)).unwrap();
        assert!(dp.accumulate_derivatives(&path).is_ok());
    }

    #[test]
    fn test_loss_model_dimensions() {
        let mut dp = three_state(1.0);
        assert!(dp.set_segment_loss(Array3::zeros((3, 3, 2))).is_err());
        assert!(dp.set_segment_ids_mask(vec![0, 1], vec![1.0, 1.0]).is_err());
    }

    fn orf_model() -> DynProg
    {
        let mut dp = DynProg::new(3);
        dp.set_p_vector(vec![0.0, NEG_INF, NEG_INF]).unwrap();
        dp.set_q_vector(vec![NEG_INF, NEG_INF, 0.0]).unwrap();
        dp.set_a_trans(&[Transition::new(0, 1, 0.0), Transition::new(1, 2, 0.0)]).unwrap();

        let mut observations = Array3::zeros((3, 4, 1));
        observations[[1, 1, 0]] = 1.0;

        configure(&mut dp, observations, vec![0, 3, 9, 15], array![[-1, -1], [0, -1], [-1, 0]], Vec::new(),
                  Array2::from_elem((3, 3), None), b"ATGAAATAAGGGCCCT");
        dp
    }

    #[test]
    fn test_stop_codons_block_segments() {
        let mut dp = orf_model();
        dp.decode(1).unwrap();
        dp.get_scores().unwrap();
        assert_eq!(dp.get_state_path(0).unwrap().get_positions(), vec![0, 1, 3]);

        // Starting at 3 reads through the TAA at 6.
        dp.decode_with(DecodeConfig::new(1).with_orf(true)).unwrap();
        assert_eq!(dp.get_scores().unwrap()[0], 0.0);
        assert_eq!(dp.get_state_path(0).unwrap().get_positions(), vec![0, 2, 3]);
    }

    #[test]
    fn test_stop_codons_need_gene_string() {
        let mut dp = three_state(1.0);
        assert!(dp.decode_with(DecodeConfig::new(1).with_orf(true)).is_err());
    }

    #[test]
    fn test_inconsistent_orf_rejected() {
        let mut dp = DynProg::new(2);
        dp.set_a_trans(&[Transition::new(0, 1, 0.0)]).unwrap();
        dp.set_observations(Array3::zeros((2, 2, 1))).unwrap();
        dp.set_positions(vec![0, 6]).unwrap();

        let result = dp.set_orf_info(array![[-1, -1], [-1, 0]].view());
        assert!(matches!(result, Err(Error::InconsistentOrf(0, 1))));
        assert_eq!(dp.get_step(), DecodeStep::PositionsSet);

        assert!(dp.set_orf_info(array![[0, -1], [-1, 3]].view()).is_err());
        assert!(dp.set_orf_info(array![[0, -1], [-1, 0]].view()).is_ok());
    }

    #[test]
    fn test_stage_order_enforced() {
        let mut dp = DynProg::new(2);
        assert!(matches!(dp.set_positions(vec![0, 1]), Err(Error::OutOfOrder("set_positions", _))));
        assert!(matches!(dp.decode(1), Err(Error::OutOfOrder("decode", _))));
        assert!(dp.get_scores().is_err());

        dp.set_observations_2d(Array2::zeros((2, 3))).unwrap();
        assert!(dp.set_plif_list(Vec::new()).is_err());
        assert!(dp.set_positions(vec![0, 5, 5]).is_err());
        assert!(dp.set_positions(vec![0, 5]).is_err());
        dp.set_positions(vec![0, 5, 9]).unwrap();
        assert!(dp.set_genestr(b"ACGT").is_err());

        let mut solved = three_state(1.0);
        assert!(solved.set_content_model(ContentModel::new(&[3], 1).unwrap()).is_err());
        solved.decode(1).unwrap();
        assert!(matches!(solved.get_state_path(0), Err(Error::OutOfOrder("get_state_path", _))));
    }

    #[test]
    fn test_configuration_errors() {
        let mut dp = DynProg::new(2);
        assert!(dp.set_p_vector(vec![0.0]).is_err());
        assert!(dp.set_observations(Array3::zeros((3, 4, 1))).is_err());
        assert!(dp.set_observations(Array3::zeros((2, 4, 0))).is_err());

        let mut solved = three_state(1.0);
        assert!(matches!(solved.decode(MAX_NBEST + 1), Err(Error::UnsupportedNBest(..))));
        assert!(matches!(solved.decode(0), Err(Error::UnsupportedNBest(0, _))));
    }

    #[test]
    fn test_plif_channels_checked() {
        let mut dp = DynProg::new(2);
        dp.set_observations(Array3::zeros((2, 2, 1))).unwrap();
        dp.set_positions(vec![0, 4]).unwrap();
        dp.set_orf_info(Array2::from_elem((2, 2), -1).view()).unwrap();

        let plifs: Vec<Box<dyn PenaltyFunction>> =
            vec![Box::new(Plif::new(vec![0.0, 1.0], vec![0.0, 1.0]).unwrap().with_svm_channel(0))];
        assert!(dp.set_plif_list(plifs).is_err());

        let plifs: Vec<Box<dyn PenaltyFunction>> = vec![Box::new(Plif::new(vec![0.0, 1.0], vec![0.0, 1.0]).unwrap())];
        dp.set_plif_list(plifs).unwrap();

        let mut ids = Array2::from_elem((2, 2), None);
        ids[[1, 0]] = Some(1);
        assert!(dp.set_plif_id_matrix(ids).is_err());
    }

    #[test]
    fn test_max_look_back() {
        let mut dp = DynProg::new(2);
        dp.set_a_trans(&[Transition::new(0, 1, 0.0)]).unwrap();
        dp.set_observations(Array3::zeros((2, 2, 1))).unwrap();
        dp.set_positions(vec![0, 4]).unwrap();
        dp.set_orf_info(Array2::from_elem((2, 2), -1).view()).unwrap();

        let plifs: Vec<Box<dyn PenaltyFunction>> = vec![Box::new(Plif::new(vec![0.0, 25_000.5], vec![0.0, 1.0]).unwrap())];
        dp.set_plif_list(plifs).unwrap();
        assert_eq!(dp.compute_max_look_back(), DEFAULT_MAX_LOOK_BACK);

        let mut ids = Array2::from_elem((2, 2), None);
        ids[[1, 0]] = Some(0);
        dp.set_plif_id_matrix(ids).unwrap();
        assert_eq!(dp.compute_max_look_back(), 25_001);

        dp.set_plif_state_signal_matrix(Array2::from_elem((2, 1), None)).unwrap();
        dp.set_genestr(b"ACGTACGT").unwrap();
        assert_eq!(dp.compute_max_look_back(), 8);
    }

    #[test]
    fn test_content_features_rank_all_paths() {
        let mut dp = DynProg::new(2);
        dp.set_p_vector(vec![0.0, NEG_INF]).unwrap();
        dp.set_q_vector(vec![NEG_INF, 0.0]).unwrap();
        dp.set_a_trans(&[Transition::new(0, 1, 0.0), Transition::new(1, 1, 0.0)]).unwrap();
        dp.set_content_model(ContentModel::new(&[2], 1).unwrap()).unwrap();
        dp.init_tiling_data(TilingTrack::new(vec![1, 3, 6], vec![1.0, -4.0, 2.0]).unwrap()).unwrap();
        assert_eq!(dp.get_num_features(), 2);

        dp.set_observations(Array3::zeros((2, 4, 1))).unwrap();
        dp.set_positions(vec![0, 2, 5, 8]).unwrap();
        dp.set_orf_info(Array2::from_elem((2, 2), -1).view()).unwrap();

        let segment_plif = PlifArray::from(vec![
            Plif::new(vec![0.0, 10.0], vec![0.0, -0.5]).unwrap(),
            Plif::new(vec![-1.0, 1.0], vec![-1.0, 1.0]).unwrap().with_svm_channel(0),
            Plif::new(vec![-10.0, 10.0], vec![-5.0, 5.0]).unwrap().with_svm_channel(1),
        ]);
        let plifs: Vec<Box<dyn PenaltyFunction>> = vec![Box::new(segment_plif)];
        dp.set_plif_list(plifs).unwrap();

        let mut plif_ids = Array2::from_elem((2, 2), None);
        plif_ids[[1, 0]] = Some(0);
        plif_ids[[1, 1]] = Some(0);
        dp.set_plif_id_matrix(plif_ids).unwrap();
        dp.set_plif_state_signal_matrix(Array2::from_elem((2, 1), None)).unwrap();
        dp.set_genestr(b"ACGTACGT").unwrap();
        assert!(dp.set_dict_weights(Array2::zeros((0, 0))).is_err());

        // AC and GT score, the other words do not.
        let mut weights = Array2::zeros((16, 1));
        weights[[1, 0]] = 0.8;
        weights[[11, 0]] = -0.3;
        dp.set_dict_weights(weights).unwrap();

        // Segment ends at position indices 1 and 2 are optional: four paths in total.
        let mut expected: Vec<f64> = [vec![0, 3], vec![0, 1, 3], vec![0, 2, 3], vec![0, 1, 2, 3]]
            .iter()
            .map(|ends| {
                let steps: Vec<PathStep> = ends
                    .iter()
                    .enumerate()
                    .map(|(i, &position)| PathStep { state: if i == 0 { 0 } else { 1 }, position })
                    .collect();
                dp.accumulate_derivatives(&steps).unwrap().total_score()
            })
            .collect();
        expected.sort_by(|a, b| b.partial_cmp(a).unwrap());

        dp.decode_with(DecodeConfig::new(4).with_cache_verification(true)).unwrap();
        let scores = dp.get_scores().unwrap();
        for (score, exp) in scores.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*score, *exp, epsilon = 1e-9);
        }

        dp.decode_with(DecodeConfig::new(4).with_parallel(true)).unwrap();
        assert_eq!(dp.get_scores().unwrap(), scores);
    }

    #[test]
    fn test_framed_words_follow_reading_frame() {
        let mut dp = DynProg::new(3);
        dp.set_p_vector(vec![0.0, NEG_INF, NEG_INF]).unwrap();
        dp.set_q_vector(vec![NEG_INF, NEG_INF, 0.0]).unwrap();
        dp.set_a_trans(&[Transition::new(0, 1, 0.0), Transition::new(1, 2, 0.0)]).unwrap();
        let model = ContentModel::new(&[1], 1).unwrap().with_sign_words(vec![false]).unwrap();
        dp.set_content_model(model.with_mod_words(vec![(3, 0)]).unwrap()).unwrap();

        dp.set_observations(Array3::zeros((3, 10, 1))).unwrap();
        dp.set_positions((0..10).collect()).unwrap();
        dp.set_orf_info(array![[-1, -1], [0, -1], [-1, 0]].view()).unwrap();

        let coding_plif = PlifArray::from(vec![
            Plif::new(vec![0.0, 100.0], vec![0.0, 0.0]).unwrap(),
            Plif::new(vec![-10.0, 10.0], vec![-10.0, 10.0]).unwrap().with_svm_channel(0),
        ]);
        let plifs: Vec<Box<dyn PenaltyFunction>> = vec![Box::new(coding_plif)];
        dp.set_plif_list(plifs).unwrap();

        let mut plif_ids = Array2::from_elem((3, 3), None);
        plif_ids[[2, 1]] = Some(0);
        dp.set_plif_id_matrix(plif_ids).unwrap();
        dp.set_plif_state_signal_matrix(Array2::from_elem((3, 1), None)).unwrap();
        //              0123456789
        dp.set_genestr(b"ATGCTTAGGTTT").unwrap();

        // A, C, G, T
        dp.set_dict_weights(array![[1.0], [-2.0], [0.0], [0.5]]).unwrap();

        // Coding segments end at 9 and start at 3 or 6. Only codon starts count: C A, or A alone.
        dp.decode_with(DecodeConfig::new(3).with_cache_verification(true)).unwrap();
        let scores = dp.get_scores().unwrap();
        assert_abs_diff_eq!(scores[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(scores[1], -0.5, epsilon = 1e-12);
        assert_eq!(scores[2], NEG_INF);
        assert_eq!(dp.get_state_path(0).unwrap().get_positions(), vec![0, 6, 9]);
        assert_eq!(dp.get_state_path(1).unwrap().get_positions(), vec![0, 3, 9]);

        for rank in 0..2 {
            let path = dp.get_state_path(rank).unwrap();
            let derivs = dp.accumulate_derivatives(path.get_steps()).unwrap();
            assert_abs_diff_eq!(derivs.total_score(), scores[rank], epsilon = 1e-12);
        }
    }

    fn random_model(seed: u64) -> DynProg
    {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let num_states = 4;
        let seq_len = 40;

        let mut dp = DynProg::new(num_states);
        let mut transitions = Vec::new();
        for from in 0..num_states
            {
            for to in 0..num_states
                {
                if from != to
                    { transitions.push(Transition::new(from, to, rng.gen_range(-1.0..1.0))); }
                }
            }
        dp.set_a_trans(&transitions).unwrap();
        dp.set_p_vector((0..num_states).map(|_| rng.gen_range(-1.0..0.0)).collect()).unwrap();
        dp.set_q_vector((0..num_states).map(|_| rng.gen_range(-1.0..0.0)).collect()).unwrap();

        let observations = Array3::from_shape_fn((num_states, seq_len, 1), |_| rng.gen_range(-2.0..2.0));
        let mut positions = vec![0i64];
        for _ in 1..seq_len
            {
            let last = positions[positions.len() - 1];
            positions.push(last + rng.gen_range(1..6));
            }

        let plifs: Vec<Box<dyn PenaltyFunction>> = vec![
            Box::new(Plif::new(vec![0.0, 20.0, 60.0], vec![0.5, 0.0, -2.0]).unwrap()),
            Box::new(Plif::new(vec![1.0, 30.0], vec![-1.0, 1.0]).unwrap().with_range(1.0, 30.0).unwrap()),
        ];
        let mut plif_ids = Array2::from_elem((num_states, num_states), None);
        plif_ids[[1, 0]] = Some(0);
        plif_ids[[2, 1]] = Some(1);
        plif_ids[[0, 3]] = Some(0);

        configure(&mut dp, observations, positions, Array2::from_elem((num_states, 2), -1), plifs, plif_ids, b"");
        dp
    }

    #[test]
    fn test_parallel_matches_sequential() {
        for seed in 0..4
            {
            let mut sequential = random_model(seed);
            let mut parallel = random_model(seed);

            sequential.decode_with(DecodeConfig::new(4)).unwrap();
            parallel.decode_with(DecodeConfig::new(4).with_parallel(true)).unwrap();

            let scores = sequential.get_scores().unwrap();
            assert_eq!(scores, parallel.get_scores().unwrap());
            assert!(scores.windows(2).all(|w| w[0] >= w[1]));

            for k in 0..4
                {
                let path = sequential.get_state_path(k).unwrap();
                assert_eq!(path, parallel.get_state_path(k).unwrap());

                // Every decoded path follows allowed transitions and re-scores to its rank's score.
                for pair in path.get_steps().windows(2)
                    { assert!(sequential.get_transitions().is_allowed(pair[0].state, pair[1].state)); }
                let derivs = sequential.accumulate_derivatives(path.get_steps()).unwrap();
                assert_abs_diff_eq!(derivs.total_score(), scores[k], epsilon = 1e-9);
                }
            }
    }
}
