//! Tunable thresholds and defaults for operators that need more than a
//! single parameter.
//!
//! None of these are read from environment or files — this crate has no
//! configuration-loading of its own (it is a library, not a host process);
//! these are just the `Options`-with-`Default` structs operators take so a
//! host can tune them without threading bare numbers through every call
//! site, exposed as plain struct fields rather than magic constants.

use std::time::Duration;

/// Tuning for [`crate::operators::size_limiter::SizeLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimiterOptions {
    /// Maximum number of items retained; the oldest (by insertion order) is
    /// evicted first once this is exceeded.
    pub limit: usize,
}

impl SizeLimiterOptions {
    pub fn new(limit: usize) -> Self {
        SizeLimiterOptions { limit }
    }
}

/// Tuning for [`crate::operators::expire_after::ExpireAfter`].
#[derive(Debug, Clone, Copy)]
pub struct ExpireAfterOptions {
    /// How long an item may sit unrefreshed before it expires.
    pub lifetime: Duration,
    /// How often the polling mode re-scans for expired items. Ignored by the
    /// per-item-timer mode.
    pub poll_interval: Duration,
}

impl Default for ExpireAfterOptions {
    fn default() -> Self {
        ExpireAfterOptions { lifetime: Duration::from_secs(60), poll_interval: Duration::from_secs(1) }
    }
}

impl ExpireAfterOptions {
    pub fn new(lifetime: Duration) -> Self {
        ExpireAfterOptions { lifetime, ..Default::default() }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Tuning for [`crate::operators::sort::Sort`]: whether to recompute the
/// whole order from scratch on every touched batch, or to reposition just
/// the touched keys against the already-ordered remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOptimisation {
    /// Always resort the whole collection from scratch.
    Reset,
    /// Reposition only the touched keys via binary search against the
    /// remainder, falling back to a full reset once more than
    /// `reset_threshold` keys are touched in one pass (beyond that point a
    /// full resort is cheaper than many individual repositions).
    Inline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOptions {
    pub optimisation: SortOptimisation,
    pub reset_threshold: usize,
}

impl Default for SortOptions {
    fn default() -> Self {
        SortOptions { optimisation: SortOptimisation::Reset, reset_threshold: 0 }
    }
}

impl SortOptions {
    /// Reposition touched keys inline as long as no more than
    /// `reset_threshold` are touched in a single batch; above that, fall
    /// back to a full reset for that batch.
    pub fn inline(reset_threshold: usize) -> Self {
        SortOptions { optimisation: SortOptimisation::Inline, reset_threshold }
    }
}

/// Default page size for [`crate::operators::page::Page`] when a caller
/// doesn't specify one up front.
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// Tuning for the binding adaptors: above `rebuild_threshold`
/// touched items in one change set, the adaptor clears and rebuilds the
/// bound `OrderedBuffer` wholesale rather than applying moves/inserts one at
/// a time, trading fidelity of per-item animation for avoiding O(n²) move
/// churn on the bound UI collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingOptions {
    pub rebuild_threshold: usize,
}

impl Default for BindingOptions {
    fn default() -> Self {
        BindingOptions { rebuild_threshold: 50 }
    }
}

impl BindingOptions {
    pub fn new(rebuild_threshold: usize) -> Self {
        BindingOptions { rebuild_threshold }
    }
}
