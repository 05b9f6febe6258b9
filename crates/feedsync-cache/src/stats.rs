#![forbid(unsafe_code)]

//! Counters describing how often requests were answered from cache.

/// Statistics about cache performance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests fully answered from cached validity.
    pub hits: u64,
    /// Requests that needed at least one fetch.
    pub misses: u64,
    /// Requests answered with partial data because a fetch was in flight.
    pub coalesced: u64,
    /// Individual fetch calls handed to a collaborator.
    pub fetches_issued: u64,
    /// Fetch calls that came back with an error.
    pub fetch_failures: u64,
}

impl CacheStats {
    /// Hit rate as a fraction (0.0 to 1.0); 0 when nothing was requested.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
