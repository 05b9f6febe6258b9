#![forbid(unsafe_code)]

//! Core: interval algebra, timed items, keys, errors and collaborator
//! contracts shared by the feedsync crates.

pub mod animation;
pub mod error;
pub mod item;
pub mod key;
pub mod source;
pub mod span;

pub use error::{FetchError, SyncError, TransportError};
pub use item::{AggregateBucket, Message, StatSummary, TimeInterval, TimeUnit, TimedItem, ToxicityScore};
pub use key::{GroupKey, StreamKey};
pub use source::{PageSource, PushTransport, SpanSource};
pub use span::{TimeRange, Timestamp};
