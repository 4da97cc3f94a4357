use crate::decoder::config::{DecodeConfig, INFEASIBLE_EMISSION};
use crate::decoder::content_cache::{ContentFeatureCache, ContentSource};
use crate::decoder::nbest::{Candidate, NBestList};
use crate::decoder::orf::{OrfConstraint, OrfPhases};
use crate::decoder::segment_loss::{LossCursor, SegmentLossCache, SegmentLossModel};
use crate::model::{PenaltyFunction, Result, TransitionTable};
use log::{debug, warn};
use ndarray::{s, Array2, Array3, ArrayView1, ArrayView2, ArrayView3};
use rayon::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathStep
{
    pub state: usize,
    pub position: usize,
}

/// One decoded path as `(state, position index)` steps in sequence order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedPath
{
    steps: Vec<PathStep>,
}

impl DecodedPath
{
    pub fn new(steps: Vec<PathStep>) -> DecodedPath { DecodedPath { steps } }

    pub fn empty() -> DecodedPath { DecodedPath { steps: Vec::new() } }

    /// Parallel state/position arrays ending at the first `-1`.
    pub fn from_sentinel_arrays(states: &[i64], positions: &[i64]) -> DecodedPath
    {
        let mut steps = Vec::new();
        for (&state, &position) in states.iter().zip(positions.iter())
            {
            if state < 0 || position < 0
                { break; }
            steps.push(PathStep { state: state as usize, position: position as usize });
            }
        DecodedPath { steps }
    }

    pub fn get_steps(&self) -> &[PathStep] { &self.steps }

    pub fn len(&self) -> usize { self.steps.len() }

    pub fn is_empty(&self) -> bool { self.steps.is_empty() }

    pub fn get_states(&self) -> Vec<usize> { self.steps.iter().map(|s| s.state).collect() }

    pub fn get_positions(&self) -> Vec<usize> { self.steps.iter().map(|s| s.position).collect() }

    /// State and position arrays terminated by `(-1, -1)`.
    pub fn to_sentinel_arrays(&self) -> (Vec<i64>, Vec<i64>)
    {
        let mut states: Vec<i64> = self.steps.iter().map(|s| s.state as i64).collect();
        let mut positions: Vec<i64> = self.steps.iter().map(|s| s.position as i64).collect();
        states.push(-1);
        positions.push(-1);
        (states, positions)
    }
}

pub struct LatticeSolution
{
    pub scores: Vec<f64>,
    pub paths: Vec<DecodedPath>,
}

/// Read-only model data shared by the decoder and the derivative pass.
#[derive(Clone, Copy)]
pub struct LatticeModel<'a>
{
    pub initial: &'a [f64],
    pub end: &'a [f64],
    pub positions: &'a [i64],
    pub transitions: &'a TransitionTable,
    /// Transition penalty ids, indexed `[to, from]`.
    pub plif_ids: ArrayView2<'a, Option<usize>>,
    pub orf_info: &'a [OrfPhases],
    /// Per state and position index, summed over each segment into that state.
    pub segment_sum_weights: Option<ArrayView2<'a, f64>>,
    pub content: ContentSource<'a>,
    pub stop_codons: &'a [bool],
    pub segment_loss: Option<&'a SegmentLossModel>,
    pub max_look_back: i64,
}

impl<'a> LatticeModel<'a>
{
    pub fn get_num_states(&self) -> usize { self.transitions.get_num_states() }

    pub fn get_seq_len(&self) -> usize { self.positions.len() }

    pub fn orf_constraint(&self, from: usize, to: usize) -> Option<OrfConstraint>
    {
        match (self.orf_info.get(from), self.orf_info.get(to)) {
            (Some(source), Some(target)) => OrfConstraint::between(source, target),
            _ => None,
        }
    }

    /// Look-back of a transition: the penalty's domain, never beyond the global bound.
    pub fn look_back(&self, penalty: Option<&dyn PenaltyFunction>) -> i64
    {
        match penalty {
            Some(pen) => {
                let max_value = pen.get_max_value();
                if max_value.is_finite() { (max_value.ceil() as i64).min(self.max_look_back) } else { self.max_look_back }
            }
            None => self.max_look_back,
        }
    }

    /// Sum of the segment weights of `state` over position indices `[from, to)`.
    pub fn segment_sum(&self, state: usize, from: usize, to: usize) -> f64
    {
        match &self.segment_sum_weights {
            Some(weights) => (from..to).map(|u| weights[[state, u]]).sum(),
            None => 0.0,
        }
    }
}

/// Emission of one state at one position from its raw signal channels.
///
/// Without a penalty on channel 0 the raw channel 0 value is used as is. Otherwise the
/// penalties of consecutive channels are summed until the first channel without one. A
/// non-finite raw value is returned unchanged.
pub fn state_signal_score(raw: ArrayView1<f64>, signal_ids: ArrayView1<Option<usize>>, plifs: &[Box<dyn PenaltyFunction>], zero_features: &[f64]) -> f64
{
    if signal_ids.is_empty() || signal_ids[0].is_none()
        { return raw.get(0).copied().unwrap_or(0.0); }

    let mut score = 0.0;
    for (k, id) in signal_ids.iter().enumerate()
        {
        let id = match id { Some(id) => *id, None => break };
        let value = raw[k];
        if !value.is_finite()
            { return value; }
        score += plifs[id].lookup_penalty(value, zero_features);
        }
    score
}

struct DpTables
{
    delta: Array3<f64>,
    psi: Array3<usize>,
    ktable: Array3<usize>,
    ptable: Array3<usize>,
}

impl DpTables
{
    fn new(seq_len: usize, num_states: usize, nbest: usize) -> DpTables
    {
        let shape = (seq_len, num_states, nbest);
        DpTables {
            delta: Array3::from_elem(shape, f64::NEG_INFINITY),
            psi: Array3::zeros(shape),
            ktable: Array3::zeros(shape),
            ptable: Array3::zeros(shape),
        }
    }
}

struct CellScratch<'a>
{
    content: ContentFeatureCache<'a>,
    list: NBestList,
    zero_features: Vec<f64>,
}

/// N-best semi-Markov Viterbi over `(position index, state)`.
///
/// Candidates for a cell are enumerated by predecessor (transition table order), then by
/// decreasing start position, then by predecessor rank; on equal scores the earlier one is kept.
pub struct LatticeDecoder<'a>
{
    model: LatticeModel<'a>,
    plifs: &'a [Box<dyn PenaltyFunction>],
    emissions: ArrayView2<'a, f64>,
    config: DecodeConfig,
}

impl<'a> LatticeDecoder<'a>
{
    pub fn new(model: LatticeModel<'a>, plifs: &'a [Box<dyn PenaltyFunction>], emissions: ArrayView2<'a, f64>, config: DecodeConfig) -> LatticeDecoder<'a>
    {
        LatticeDecoder { model, plifs, emissions, config }
    }

    fn new_scratch(&self) -> CellScratch<'a>
    {
        CellScratch {
            content: ContentFeatureCache::new(self.model.content).with_verification(self.config.verify_caches),
            list: NBestList::new(self.config.nbest),
            zero_features: vec![0.0; self.model.content.get_num_features()],
        }
    }

    fn penalty(&self, to: usize, from: usize) -> Option<&'a dyn PenaltyFunction>
    {
        let plifs: &'a [Box<dyn PenaltyFunction>] = self.plifs;
        self.model.plif_ids[[to, from]].map(|id| plifs[id].as_ref())
    }

    /// Emission of `state` at `t`, with infeasible and NaN entries as `-inf`.
    #[inline]
    fn emission(&self, state: usize, t: usize) -> f64
    {
        let emission = self.emissions[[state, t]];
        if emission <= INFEASIBLE_EMISSION || emission.is_nan() { f64::NEG_INFINITY } else { emission }
    }

    pub fn solve(&self) -> Result<LatticeSolution>
    {
        self.config.validate()?;

        let nbest = self.config.nbest;
        let num_states = self.model.get_num_states();
        let seq_len = self.model.get_seq_len();

        if seq_len == 0 || num_states == 0
            {
            warn!("Empty lattice ({} states, {} positions)", num_states, seq_len);
            return Ok(LatticeSolution { scores: vec![f64::NEG_INFINITY; nbest], paths: vec![DecodedPath::empty(); nbest] });
            }

        let cells = seq_len * num_states * nbest;
        debug!("DP tables: {} cells, {} bytes", cells, cells * (std::mem::size_of::<f64>() + 3 * std::mem::size_of::<usize>()));

        let mut tables = DpTables::new(seq_len, num_states, nbest);

        for i in 0..num_states
            { tables.delta[[0, i, 0]] = self.model.initial[i] + self.emission(i, 0); }

        let mut loss_cache = match (self.config.with_loss, self.model.segment_loss) {
            (true, Some(loss_model)) => Some(SegmentLossCache::new(loss_model, seq_len, self.model.max_look_back)
                .with_verification(self.config.verify_caches)),
            _ => None,
        };

        let mut scratch = self.new_scratch();
        let progress_step = (seq_len / 10).max(1);

        for t in 1..seq_len
            {
            if seq_len > 5000 && t % progress_step == 0
                { debug!("Decoding position {} of {}", t, seq_len); }

            if let Some(cache) = loss_cache.as_mut()
                { cache.find_segment_loss_till_pos(self.model.positions, t); }
            let loss = loss_cache.as_ref();

            let ranked: Vec<Vec<Candidate>> = if self.config.parallel
                {
                let delta = &tables.delta;
                (0..num_states)
                    .into_par_iter()
                    .map_init(|| self.new_scratch(), |worker, j| self.evaluate_cell(t, j, delta, loss, worker))
                    .collect()
                }
            else
                {
                (0..num_states)
                    .map(|j| self.evaluate_cell(t, j, &tables.delta, loss, &mut scratch))
                    .collect()
                };

            for (j, candidates) in ranked.iter().enumerate()
                { self.write_cell(&mut tables, t, j, candidates); }
            }

        Ok(self.terminate(&tables))
    }

    fn write_cell(&self, tables: &mut DpTables, t: usize, j: usize, candidates: &[Candidate])
    {
        let emission = self.emission(j, t);

        if emission == f64::NEG_INFINITY
            {
            for k in 0..self.config.nbest
                {
                tables.delta[[t, j, k]] = f64::NEG_INFINITY;
                tables.psi[[t, j, k]] = 0;
                tables.ktable[[t, j, k]] = 0;
                tables.ptable[[t, j, k]] = 0;
                }
            return;
            }

        for k in 0..self.config.nbest
            {
            match candidates.get(k) {
                Some(c) => {
                    tables.delta[[t, j, k]] = c.score + emission;
                    tables.psi[[t, j, k]] = c.state;
                    tables.ktable[[t, j, k]] = c.rank;
                    tables.ptable[[t, j, k]] = c.position;
                }
                None => {
                    tables.delta[[t, j, k]] = f64::NEG_INFINITY;
                    tables.psi[[t, j, k]] = 0;
                    tables.ktable[[t, j, k]] = 0;
                    tables.ptable[[t, j, k]] = 0;
                }
            }
            }
    }

    fn evaluate_cell(&self, t: usize, j: usize, delta: &Array3<f64>, loss: Option<&SegmentLossCache>, scratch: &mut CellScratch<'a>) -> Vec<Candidate>
    {
        if self.emission(j, t) == f64::NEG_INFINITY
            { return Vec::new(); }

        let pos = self.model.positions;
        let use_orf = self.config.use_orf;
        let nbest = self.config.nbest;

        scratch.list.clear();

        for edge in self.model.transitions.predecessors(j).iter()
            {
            let ii = edge.from;
            let penalty = self.penalty(j, ii);
            let look_back = self.model.look_back(penalty);
            let needs_svm = penalty.map_or(false, |p| p.uses_svm_values());

            let orf = self.model.orf_constraint(ii, j);
            let mut orf_cursor = orf.map(|c| c.cursor(pos[t]));

            if needs_svm
                { scratch.content.reset(pos[t], orf.map_or(0, |c| c.frame_origin(pos[t]))); }

            let mut loss_cursor = LossCursor::new(t);
            let mut segment_sum = 0.0;

            let mut ts = t;
            while ts > 0
                {
                ts -= 1;
                let length = pos[t] - pos[ts];
                if length > look_back
                    { break; }

                if let Some(weights) = &self.model.segment_sum_weights
                    { segment_sum += weights[[j, ts]]; }

                let ok = match (&orf, orf_cursor.as_mut()) {
                    (Some(constraint), Some(cursor)) =>
                        constraint.length_matches(length) && (!use_orf || cursor.extend(self.model.stop_codons, pos[ts])),
                    _ => true,
                };
                if !ok
                    { continue; }

                let segment_loss = match loss {
                    Some(cache) => cache.extend_segment_loss(edge.segment_id, ts, &mut loss_cursor),
                    None => 0.0,
                };

                let pen_val = match penalty {
                    Some(pen) => {
                        let features: &[f64] = if needs_svm { scratch.content.extend(pos[ts]) } else { &scratch.zero_features };
                        pen.lookup_penalty(length as f64, features)
                    }
                    None => 0.0,
                };

                let value = edge.weight + pen_val + segment_loss + segment_sum;
                if value == f64::NEG_INFINITY || value.is_nan()
                    { continue; }

                for diff in 0..nbest
                    {
                    let prev = delta[[ts, ii, diff]];
                    if prev == f64::NEG_INFINITY
                        { continue; }
                    scratch.list.consider(Candidate { score: value + prev, state: ii, rank: diff, position: ts });
                    }
                }
            }

        scratch.list.get_entries().to_vec()
    }

    fn terminate(&self, tables: &DpTables) -> LatticeSolution
    {
        let nbest = self.config.nbest;
        let num_states = self.model.get_num_states();
        let last = self.model.get_seq_len() - 1;

        let mut list = NBestList::new(nbest);
        for diff in 0..nbest
            {
            for i in 0..num_states
                {
                let score = tables.delta[[last, i, diff]] + self.model.end[i];
                list.consider(Candidate { score, state: i, rank: diff, position: last });
                }
            }

        if list.is_empty()
            { warn!("No path reaches the end of the sequence"); }

        let mut scores = Vec::with_capacity(nbest);
        let mut paths = Vec::with_capacity(nbest);
        for k in 0..nbest
            {
            match list.get(k) {
                Some(c) => {
                    scores.push(c.score);
                    paths.push(self.backtrack(tables, c));
                }
                None => {
                    scores.push(f64::NEG_INFINITY);
                    paths.push(DecodedPath::empty());
                }
            }
            }

        LatticeSolution { scores, paths }
    }

    fn backtrack(&self, tables: &DpTables, terminal: &Candidate) -> DecodedPath
    {
        let mut state = terminal.state;
        let mut rank = terminal.rank;
        let mut position = terminal.position;

        let mut steps = vec![PathStep { state, position }];

        while position > 0
            {
            let idx = [position, state, rank];
            state = tables.psi[idx];
            rank = tables.ktable[idx];
            position = tables.ptable[idx];
            steps.push(PathStep { state, position });
            }

        steps.reverse();
        DecodedPath::new(steps)
    }
}

/// Emissions `[state, position index]` for all states and positions.
pub fn evaluate_emissions(observations: ArrayView3<f64>, signal_ids: ArrayView2<Option<usize>>, plifs: &[Box<dyn PenaltyFunction>], num_features: usize) -> Array2<f64>
{
    let (num_states, seq_len, _) = observations.dim();
    let zero_features = vec![0.0; num_features];
    let mut nan_count = 0usize;

    let emissions = Array2::from_shape_fn((num_states, seq_len), |(i, t)| {
        let raw = observations.slice(s![i, t, ..]);
        let score = state_signal_score(raw, signal_ids.row(i), plifs, &zero_features);
        if score.is_nan()
            {
            nan_count += 1;
            f64::NEG_INFINITY
            }
        else
            { score }
    });

    if nan_count > 0
        { warn!("{} NaN emission scores treated as infeasible", nan_count); }

    emissions
}
