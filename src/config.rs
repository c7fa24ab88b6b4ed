//! [`PipelineConfig`]: the construction-time knobs shared by `create` and
//! `transform`.

use crate::error::FiberError;

/// Configuration accepted by [`crate::create::create`] and
/// [`crate::transform::transform`].
///
/// `prefetch` is both the internal queue's capacity and the initial demand
/// requested from upstream; it must be positive.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    prefetch: usize,
}

impl PipelineConfig {
    /// Builds a config with the given prefetch. Returns
    /// [`FiberError::InvalidPrefetch`] if `prefetch == 0`.
    pub fn new(prefetch: usize) -> Result<Self, FiberError> {
        if prefetch == 0 {
            return Err(FiberError::InvalidPrefetch);
        }
        Ok(Self { prefetch })
    }

    pub fn prefetch(&self) -> usize {
        self.prefetch
    }

    /// The refill watermark: once buffered items drop to this level, the
    /// consumer re-requests enough from upstream to top back up to
    /// `prefetch` (the 75% rule: `limit = prefetch - prefetch/4`).
    pub(crate) fn refill_limit(&self) -> usize {
        self.prefetch - self.prefetch / 4
    }
}

impl Default for PipelineConfig {
    /// Defaults to a prefetch of 256, matching reactive-streams' own common
    /// default request size.
    fn default() -> Self {
        Self { prefetch: 256 }
    }
}
