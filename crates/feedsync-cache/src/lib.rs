#![forbid(unsafe_code)]

//! Caches for time-ordered items.
//!
//! - [`RangeCache`]: request a time span, fetch only what is missing.
//! - [`PagedCache`]: the cursor-paginated variant.
//! - [`StreamReconciler`]: a page cache kept consistent with a live push
//!   channel.
//!
//! All three are sans-IO: they hand out fetch descriptions and take results
//! back, so the caller decides which thread the collaborators run on.

pub mod entry;
pub mod paged;
pub mod range_cache;
pub mod stats;
pub mod stream;

pub use entry::{CacheEntry, MergeSummary};
pub use paged::{PageDirection, PageFetch, PageOutcome, PagedCache};
pub use range_cache::{GapFetch, GapProgress, RangeCache, SpanRequest};
pub use stats::CacheStats;
pub use stream::{PushOutcome, StreamReconciler, StreamSubscription, SubscriptionState};
