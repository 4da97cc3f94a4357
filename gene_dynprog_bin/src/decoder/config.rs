use crate::model::{Error, Result};
use std::fmt;

/// Default look-back in sequence coordinates, raised by penalty functions that need more.
pub const DEFAULT_MAX_LOOK_BACK: i64 = 20_000;

/// Largest supported number of ranked paths.
pub const MAX_NBEST: usize = 16;

/// Emission scores at or below this make the state unreachable at that position.
pub const INFEASIBLE_EMISSION: f64 = -1e20;

/// Per-decode options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeConfig {
    pub nbest: usize,
    pub use_orf: bool,
    pub with_loss: bool,
    pub parallel: bool,
    pub verify_caches: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        DecodeConfig { nbest: 1, use_orf: false, with_loss: false, parallel: false, verify_caches: false }
    }
}

impl DecodeConfig {
    pub fn new(nbest: usize) -> DecodeConfig {
        DecodeConfig { nbest, ..DecodeConfig::default() }
    }

    /// Also reject segments containing an in-frame stop codon.
    pub fn with_orf(mut self, use_orf: bool) -> DecodeConfig {
        self.use_orf = use_orf;
        self
    }

    /// Add the segment loss against the reference segmentation to every segment score.
    pub fn with_loss(mut self, with_loss: bool) -> DecodeConfig {
        self.with_loss = with_loss;
        self
    }

    /// Evaluate target states of one position on the rayon pool.
    pub fn with_parallel(mut self, parallel: bool) -> DecodeConfig {
        self.parallel = parallel;
        self
    }

    /// Check the incremental caches against from-scratch recomputation. Slow.
    pub fn with_cache_verification(mut self, verify: bool) -> DecodeConfig {
        self.verify_caches = verify;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.nbest == 0 || self.nbest > MAX_NBEST {
            return Err(Error::UnsupportedNBest(self.nbest, MAX_NBEST));
        }
        Ok(())
    }
}

impl fmt::Display for DecodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "nbest {}, orf {}, loss {}, parallel {}, verify {} (max nbest {}, default look-back {})",
            self.nbest, self.use_orf, self.with_loss, self.parallel, self.verify_caches, MAX_NBEST, DEFAULT_MAX_LOOK_BACK
        )
    }
}
