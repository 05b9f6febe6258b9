#![forbid(unsafe_code)]

//! Contracts for the external collaborators the core consumes.
//!
//! Implementations are blocking; the runtime crate decides which thread
//! they run on. Push delivery goes the other way: the transport calls back
//! into the reconciler (or the runtime's push sink) per arriving item.

use crate::error::{FetchError, TransportError};
use crate::item::TimedItem;
use crate::key::StreamKey;
use crate::span::TimeRange;

/// Span-bounded fetch: every item anchored inside `span`.
pub trait SpanSource<T: TimedItem> {
    fn fetch_items_in_span(&self, key: &StreamKey, span: TimeRange) -> Result<Vec<T>, FetchError>;
}

/// Cursor pagination.
pub trait PageSource<T: TimedItem> {
    /// Up to `limit` items older than `before`, newest first. With no
    /// cursor, the newest page.
    fn fetch_older_items(
        &self,
        key: &StreamKey,
        before: Option<&T::Id>,
        limit: usize,
    ) -> Result<Vec<T>, FetchError>;

    /// Up to `limit` items newer than `after`, oldest first.
    fn fetch_newer_items(
        &self,
        key: &StreamKey,
        after: Option<&T::Id>,
        limit: usize,
    ) -> Result<Vec<T>, FetchError>;
}

/// Live push channel control.
pub trait PushTransport {
    fn subscribe(&mut self, key: &StreamKey) -> Result<(), TransportError>;
    fn unsubscribe(&mut self, key: &StreamKey) -> Result<(), TransportError>;
}

impl<T: TimedItem, S: SpanSource<T> + ?Sized> SpanSource<T> for &S {
    fn fetch_items_in_span(&self, key: &StreamKey, span: TimeRange) -> Result<Vec<T>, FetchError> {
        (**self).fetch_items_in_span(key, span)
    }
}

impl<P: PushTransport + ?Sized> PushTransport for Box<P> {
    fn subscribe(&mut self, key: &StreamKey) -> Result<(), TransportError> {
        (**self).subscribe(key)
    }

    fn unsubscribe(&mut self, key: &StreamKey) -> Result<(), TransportError> {
        (**self).unsubscribe(key)
    }
}
