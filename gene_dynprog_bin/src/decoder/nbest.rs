/// A scored predecessor: `state` at position index `position`, reached through its `rank`-th best entry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate
{
    pub score: f64,
    pub state: usize,
    pub rank: usize,
    pub position: usize,
}

/// Bounded best-first list. Higher scores come first and equal scores keep insertion order,
/// so the candidate offered earlier wins a tie. Non-finite scores are never admitted.
#[derive(Clone, Debug)]
pub struct NBestList
{
    capacity: usize,
    entries: Vec<Candidate>,
}

impl NBestList
{
    pub fn new(capacity: usize) -> NBestList
    {
        NBestList { capacity, entries: Vec::with_capacity(capacity + 1) }
    }

    pub fn clear(&mut self) { self.entries.clear(); }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn get_entries(&self) -> &[Candidate] { &self.entries }

    pub fn get(&self, rank: usize) -> Option<&Candidate> { self.entries.get(rank) }

    /// Returns true if the candidate was kept.
    pub fn consider(&mut self, candidate: Candidate) -> bool
    {
        if !candidate.score.is_finite() || self.capacity == 0
            { return false; }

        if self.entries.len() == self.capacity
            {
            if let Some(worst) = self.entries.last()
                {
                if candidate.score <= worst.score
                    { return false; }
                }
            }

        let idx = self.entries.iter().position(|e| e.score < candidate.score).unwrap_or(self.entries.len());

        self.entries.insert(idx, candidate);
        self.entries.truncate(self.capacity);
        true
    }
}
