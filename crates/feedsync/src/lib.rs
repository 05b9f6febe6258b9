#![forbid(unsafe_code)]

//! feedsync public facade crate.
//!
//! Re-exports the types most applications need from the internal crates,
//! plus a prelude. The threaded runtime sits behind the default `runtime`
//! feature; without it the crate is purely sans-IO.

// --- Core re-exports -------------------------------------------------------

pub use feedsync_core::item::{AggregateBucket, Message, StatSummary, TimeInterval, TimeUnit, ToxicityScore};
pub use feedsync_core::span::{TimeRange, Timestamp};
pub use feedsync_core::{
    FetchError, GroupKey, PageSource, PushTransport, SpanSource, StreamKey, SyncError, TimedItem,
    TransportError,
};

// --- Cache re-exports ------------------------------------------------------

pub use feedsync_cache::{
    CacheStats, PageDirection, PageFetch, PagedCache, PushOutcome, RangeCache, StreamReconciler,
    StreamSubscription,
};

// --- Viewport re-exports ---------------------------------------------------

pub use feedsync_viewport::{LayoutMode, Layouts, Measurement, ScrollEdges, ScrollSample, Viewport};

// --- Runtime re-exports ----------------------------------------------------

#[cfg(feature = "runtime")]
pub use feedsync_runtime::{FeedCmd, FeedConfig, FeedMsg, FeedRuntime, Orchestrator, PushSink, SpanLoader};

/// Standard result type for feedsync APIs.
pub type Result<T> = std::result::Result<T, SyncError>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        GroupKey, LayoutMode, Measurement, Message, Result, ScrollSample, StreamKey, SyncError,
        TimeRange, TimedItem,
    };

    #[cfg(feature = "runtime")]
    pub use crate::{FeedConfig, FeedRuntime, Orchestrator};

    pub use crate::{cache, core, viewport};
    #[cfg(feature = "runtime")]
    pub use crate::runtime;
}

pub use feedsync_cache as cache;
pub use feedsync_core as core;
#[cfg(feature = "runtime")]
pub use feedsync_runtime as runtime;
pub use feedsync_viewport as viewport;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_covers_a_sans_io_round() {
        let mut cache: crate::PagedCache<Message> = crate::PagedCache::new();
        let key = StreamKey::new("g", "c");
        let fetch = cache.begin_older(&key, 10).unwrap().unwrap();
        let outcome = cache.complete(&fetch, Ok(vec![Message::new("a", 5)])).unwrap();
        assert!(outcome.reached_end);
        assert!(cache.reached_beginning(&key));
        assert_eq!(TimeRange::new(0, 10).map(|r| r.duration_ms()), Some(10));
    }
}
