/// Reading-frame phases declared by a state: `from` applies when the state starts a segment,
/// `to` when it ends one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct OrfPhases
{
    pub from: Option<u8>,
    pub to: Option<u8>,
}

impl OrfPhases
{
    pub fn none() -> OrfPhases { OrfPhases { from: None, to: None } }

    pub fn new(from: Option<u8>, to: Option<u8>) -> OrfPhases { OrfPhases { from, to } }
}

/// Frame constraint for one `from -> to` segment type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrfConstraint
{
    orf_from: i64,
    orf_to: i64,
    target: i64,
}

impl OrfConstraint
{
    /// `None` when neither side declares a phase. Callers reject one-sided declarations up front.
    pub fn between(source: &OrfPhases, target: &OrfPhases) -> Option<OrfConstraint>
    {
        match (source.from, target.to) {
            (Some(from), Some(to)) => {
                let orf_from = from as i64;
                let orf_to = to as i64;
                Some(OrfConstraint { orf_from, orf_to, target: (orf_to - orf_from).rem_euclid(3) })
            }
            _ => None,
        }
    }

    pub fn get_target(&self) -> i64 { self.target }

    pub fn get_orf_from(&self) -> i64 { self.orf_from }

    /// A codon boundary of the reading frame of any matching segment ending at `to`: the segment
    /// start less its `from` phase, up to a multiple of three.
    pub fn frame_origin(&self, to: i64) -> i64
    {
        to - self.target - self.orf_from
    }

    #[inline]
    pub fn length_matches(&self, length: i64) -> bool
    {
        length >= 0 && length % 3 == self.target
    }

    pub fn cursor(&self, to: i64) -> OrfCursor
    {
        OrfCursor { orf_to: self.orf_to, to: to.max(0), last_pos: to.max(0) }
    }
}

/// In-frame stop codon scan for a fixed segment end, extended backwards as the segment start
/// moves left. Each codon is examined at most once across successive calls.
#[derive(Clone, Copy, Debug)]
pub struct OrfCursor
{
    orf_to: i64,
    to: i64,
    last_pos: i64,
}

impl OrfCursor
{
    /// True if no in-frame stop codon starts in `[start, to - orf_to - 3]`.
    /// `start` must not increase between calls.
    pub fn extend(&mut self, stop_codons: &[bool], start: i64) -> bool
    {
        let start = start.max(0);
        let frame_end = self.to - self.orf_to - 3;

        let mut pos = if self.last_pos == self.to { frame_end } else { self.last_pos };
        if pos < 0
            { return true; }

        while pos >= start
            {
            if stop_codons.get(pos as usize).copied().unwrap_or(false)
                { return false; }
            pos -= 3;
            }

        self.last_pos = (pos + 3).min(frame_end);
        true
    }
}

/// Brute-force counterpart of `OrfCursor::extend`.
pub fn has_in_frame_stop(stop_codons: &[bool], orf_to: i64, start: i64, to: i64) -> bool
{
    let start = start.max(0);
    let mut pos = to - orf_to - 3;
    while pos >= start
        {
        if stop_codons.get(pos as usize).copied().unwrap_or(false)
            { return true; }
        pos -= 3;
        }
    false
}
