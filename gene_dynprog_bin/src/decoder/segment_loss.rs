use crate::model::{Error, Result};
use ndarray::{Array2, Array3};

/// Mask values below this count as a wobble position.
const WOBBLE_MASK_EPSILON: f64 = 1e-7;

const VERIFY_TOLERANCE: f64 = 1e-9;

/// Reference segmentation and the `[reference id, candidate id, {existence, duration}]` cost tensor.
#[derive(Clone, Debug)]
pub struct SegmentLossModel
{
    loss: Array3<f64>,
    segment_ids: Vec<usize>,
    segment_mask: Vec<f64>,
}

impl SegmentLossModel
{
    pub fn new(loss: Array3<f64>, segment_ids: Vec<usize>, segment_mask: Vec<f64>) -> Result<SegmentLossModel>
    {
        let (refs, cands, kinds) = loss.dim();
        if refs != cands
            { return Err(Error::MismatchedDimensions("segment loss candidate ids", cands, refs)); }
        if kinds != 2
            { return Err(Error::MismatchedDimensions("segment loss cost kinds", kinds, 2)); }
        if segment_ids.len() != segment_mask.len()
            { return Err(Error::MismatchedDimensions("segment mask", segment_mask.len(), segment_ids.len())); }

        if let Some(&bad) = segment_ids.iter().find(|&&id| id >= refs)
            { return Err(Error::InvalidValue(format!("Segment id {} exceeds max id {}", bad, refs as i64 - 1))); }

        Ok(SegmentLossModel { loss, segment_ids, segment_mask })
    }

    pub fn get_num_ids(&self) -> usize { self.loss.dim().0 }

    pub fn get_seq_len(&self) -> usize { self.segment_ids.len() }

    pub fn get_segment_ids(&self) -> &[usize] { &self.segment_ids }

    pub fn get_segment_mask(&self) -> &[f64] { &self.segment_mask }

    #[inline]
    pub fn existence_cost(&self, reference: usize, candidate: usize) -> f64 { self.loss[[reference, candidate, 0]] }

    #[inline]
    pub fn duration_cost(&self, reference: usize, candidate: usize) -> f64 { self.loss[[reference, candidate, 1]] }
}

/// Position and value of the last loss query for one candidate segment.
#[derive(Clone, Copy, Debug)]
pub struct LossCursor
{
    pub last_pos: usize,
    pub last_value: f64,
}

impl LossCursor
{
    pub fn new(t_end: usize) -> LossCursor
    {
        LossCursor { last_pos: t_end, last_value: 0.0 }
    }
}

/// Weighted counts and lengths of the reference segments overlapping `[ts, t_end)`, for every `ts`
/// inside the look-back window of the current `t_end`.
pub struct SegmentLossCache<'a>
{
    model: &'a SegmentLossModel,
    max_lookback: i64,
    segments_changed: Vec<bool>,
    num_segment_id: Array2<f64>,
    length_segment_id: Array2<f64>,
    t_end: usize,
    first_filled: usize,
    verify: bool,
}

impl<'a> SegmentLossCache<'a>
{
    pub fn new(model: &'a SegmentLossModel, seq_len: usize, max_lookback: i64) -> SegmentLossCache<'a>
    {
        let num_ids = model.get_num_ids();
        SegmentLossCache {
            model,
            max_lookback,
            segments_changed: vec![false; seq_len],
            num_segment_id: Array2::zeros((seq_len, num_ids)),
            length_segment_id: Array2::zeros((seq_len, num_ids)),
            t_end: 0,
            first_filled: 0,
            verify: false,
        }
    }

    /// Compare every extension against `full_loss`.
    pub fn with_verification(mut self, verify: bool) -> SegmentLossCache<'a>
    {
        self.verify = verify;
        self
    }

    /// Rows are rewritten by `find_segment_loss_till_pos` before they are read, so only a
    /// change of sequence length reallocates.
    pub fn init(&mut self, seq_len: usize, max_lookback: i64)
    {
        let num_ids = self.model.get_num_ids();
        if self.segments_changed.len() != seq_len
            {
            self.segments_changed = vec![false; seq_len];
            self.num_segment_id = Array2::zeros((seq_len, num_ids));
            self.length_segment_id = Array2::zeros((seq_len, num_ids));
            }

        self.max_lookback = max_lookback;
        self.t_end = 0;
        self.first_filled = 0;
    }

    pub fn get_t_end(&self) -> usize { self.t_end }

    pub fn get_first_filled(&self) -> usize { self.first_filled }

    pub fn is_changed(&self, ts: usize) -> bool { self.segments_changed[ts] }

    /// Fill rows `ts < t_end` within the look-back window. Row `t_end` is all zero.
    ///
    /// Scanning backwards, an id change opens a new reference segment (one existence count,
    /// weighted by the mask) unless it falls on a wobble position, of which at most one is
    /// tolerated between genuine boundaries.
    pub fn find_segment_loss_till_pos(&mut self, pos: &[i64], t_end: usize)
    {
        let num_ids = self.model.get_num_ids();
        let segment_ids = self.model.get_segment_ids();
        let segment_mask = self.model.get_segment_mask();

        for i in 0..num_ids
            {
            self.num_segment_id[[t_end, i]] = 0.0;
            self.length_segment_id[[t_end, i]] = 0.0;
            }
        self.segments_changed[t_end] = false;

        let mut wobble_switch = 0;
        let mut last_segment_id: Option<usize> = None;
        let mut first_filled = t_end;

        let mut ts = t_end;
        while ts > 0 && pos[t_end] - pos[ts - 1] <= self.max_lookback
            {
            ts -= 1;
            first_filled = ts;

            let cur_segment_id = segment_ids[ts];
            let mask = segment_mask[ts];
            let wobble_pos = mask.abs() < WOBBLE_MASK_EPSILON && wobble_switch == 0;
            let step = (pos[ts + 1] - pos[ts]) as f64;

            for i in 0..num_ids
                {
                self.num_segment_id[[ts, i]] = self.num_segment_id[[ts + 1, i]];
                self.length_segment_id[[ts, i]] = self.length_segment_id[[ts + 1, i]];
                }
            self.segments_changed[ts] = false;

            if last_segment_id != Some(cur_segment_id)
                {
                if wobble_pos
                    { wobble_switch += 1; }
                else
                    {
                    self.segments_changed[ts] = true;
                    self.num_segment_id[[ts, cur_segment_id]] += mask;
                    self.length_segment_id[[ts, cur_segment_id]] += step * mask;
                    wobble_switch = 0;
                    }
                last_segment_id = Some(cur_segment_id);
                }
            else if !wobble_pos
                { self.length_segment_id[[ts, cur_segment_id]] += step; }
            }

        self.t_end = t_end;
        self.first_filled = first_filled;
    }

    /// Full weighted loss of candidate `candidate` over `[target, t_end)`.
    pub fn full_loss(&self, target: usize, candidate: usize) -> f64
    {
        (0..self.model.get_num_ids())
            .map(|i| {
                let num = self.num_segment_id[[target, i]];
                let len = self.length_segment_id[[target, i]];
                let mut loss = 0.0;
                if num != 0.0 { loss += num * self.model.existence_cost(i, candidate); }
                if len != 0.0 { loss += len * self.model.duration_cost(i, candidate); }
                loss
            })
            .sum()
    }

    /// Loss of candidate `candidate` over `[target, t_end)`, continuing from `cursor`.
    ///
    /// Targets must decrease along one cursor. Between boundaries only the length of the
    /// reference segment under each position grows, so those steps are added directly;
    /// crossing a boundary falls back to `full_loss`.
    pub fn extend_segment_loss(&self, candidate: usize, target: usize, cursor: &mut LossCursor) -> f64
    {
        if target == cursor.last_pos
            { return cursor.last_value; }

        debug_assert!(target >= self.first_filled, "segment loss query {} below window start {}", target, self.first_filled);
        debug_assert!(target < cursor.last_pos, "segment loss cursor moved forward: {} > {}", target, cursor.last_pos);

        let mut value = cursor.last_value;
        let mut changed = target > cursor.last_pos;

        if !changed
            {
            let segment_ids = self.model.get_segment_ids();
            let mut u = cursor.last_pos;
            while u > target
                {
                u -= 1;
                if self.segments_changed[u]
                    {
                    changed = true;
                    break;
                    }

                let id = segment_ids[u];
                let grown = self.length_segment_id[[u, id]] - self.length_segment_id[[u + 1, id]];
                if grown != 0.0
                    { value += grown * self.model.duration_cost(id, candidate); }
                }
            }

        if changed
            { value = self.full_loss(target, candidate); }

        if self.verify
            {
            let expected = self.full_loss(target, candidate);
            assert!((value - expected).abs() <= VERIFY_TOLERANCE * (1.0 + expected.abs()),
                    "segment loss mismatch at {} (t_end {}): {} vs {}", target, self.t_end, value, expected);
            }

        cursor.last_pos = target;
        cursor.last_value = value;
        value
    }
}
