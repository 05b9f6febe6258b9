#![forbid(unsafe_code)]

//! Deterministic collaborators for tests.
//!
//! [`ScriptedPages`] serves cursor pages and spans from an in-memory list
//! that tests can grow ([`ScriptedPages::publish`]) or make fail
//! ([`ScriptedPages::fail_next`]). [`RecordingTransport`] logs every
//! subscribe/unsubscribe through a shared handle that stays readable after
//! the transport moved into a reconciler.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use feedsync_core::error::{FetchError, TransportError};
use feedsync_core::item::TimedItem;
use feedsync_core::key::StreamKey;
use feedsync_core::source::{PageSource, PushTransport, SpanSource};
use feedsync_core::span::TimeRange;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One call made against a [`ScriptedPages`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCall {
    Older { limit: usize, cursored: bool },
    Newer { limit: usize, cursored: bool },
    Span(TimeRange),
}

/// In-memory server: items kept ascending by anchor, shared by every key.
#[derive(Debug)]
pub struct ScriptedPages<T: TimedItem> {
    items: Mutex<Vec<T>>,
    failures: Mutex<VecDeque<FetchError>>,
    calls: Mutex<Vec<PageCall>>,
}

impl<T: TimedItem> ScriptedPages<T> {
    #[must_use]
    pub fn new(mut items: Vec<T>) -> Self {
        items.sort_by_key(TimedItem::anchor);
        Self {
            items: Mutex::new(items),
            failures: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make a new item exist server-side.
    pub fn publish(&self, item: T) {
        let mut items = lock(&self.items);
        let at = items.partition_point(|existing| existing.anchor() <= item.anchor());
        items.insert(at, item);
    }

    /// Fail the next call with `error`. Queued failures apply in order.
    pub fn fail_next(&self, error: FetchError) {
        lock(&self.failures).push_back(error);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<PageCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: PageCall) -> Result<(), FetchError> {
        lock(&self.calls).push(call);
        match lock(&self.failures).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn position(items: &[T], id: &T::Id) -> Result<usize, FetchError> {
        items
            .iter()
            .position(|item| &item.id() == id)
            .ok_or_else(|| FetchError::permanent(format!("unknown cursor {id:?}")))
    }
}

impl<T: TimedItem> PageSource<T> for ScriptedPages<T> {
    fn fetch_older_items(
        &self,
        _key: &StreamKey,
        before: Option<&T::Id>,
        limit: usize,
    ) -> Result<Vec<T>, FetchError> {
        self.record(PageCall::Older {
            limit,
            cursored: before.is_some(),
        })?;
        let items = lock(&self.items);
        let end = match before {
            Some(id) => Self::position(&items, id)?,
            None => items.len(),
        };
        let start = end.saturating_sub(limit);
        Ok(items[start..end].iter().rev().cloned().collect())
    }

    fn fetch_newer_items(
        &self,
        _key: &StreamKey,
        after: Option<&T::Id>,
        limit: usize,
    ) -> Result<Vec<T>, FetchError> {
        self.record(PageCall::Newer {
            limit,
            cursored: after.is_some(),
        })?;
        let items = lock(&self.items);
        let start = match after {
            Some(id) => Self::position(&items, id)? + 1,
            None => 0,
        };
        Ok(items[start..].iter().take(limit).cloned().collect())
    }
}

impl<T: TimedItem> SpanSource<T> for ScriptedPages<T> {
    fn fetch_items_in_span(&self, _key: &StreamKey, span: TimeRange) -> Result<Vec<T>, FetchError> {
        self.record(PageCall::Span(span))?;
        Ok(lock(&self.items)
            .iter()
            .filter(|item| span.contains(item.anchor()))
            .cloned()
            .collect())
    }
}

/// A subscribe or unsubscribe seen by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Subscribe(StreamKey),
    Unsubscribe(StreamKey),
}

/// Shared view of a [`RecordingTransport`]'s log.
#[derive(Debug, Clone, Default)]
pub struct TransportLog {
    calls: Arc<Mutex<Vec<TransportCall>>>,
    reject: Arc<Mutex<bool>>,
}

impl TransportLog {
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.calls).clone()
    }

    /// Make every following subscribe fail.
    pub fn reject_subscribes(&self, reject: bool) {
        *lock(&self.reject) = reject;
    }
}

/// Push transport that accepts (or rejects) everything and logs it.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    log: TransportLog,
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn log(&self) -> TransportLog {
        self.log.clone()
    }
}

impl PushTransport for RecordingTransport {
    fn subscribe(&mut self, key: &StreamKey) -> Result<(), TransportError> {
        lock(&self.log.calls).push(TransportCall::Subscribe(key.clone()));
        if *lock(&self.log.reject) {
            return Err(TransportError::new("subscription refused"));
        }
        Ok(())
    }

    fn unsubscribe(&mut self, key: &StreamKey) -> Result<(), TransportError> {
        lock(&self.log.calls).push(TransportCall::Unsubscribe(key.clone()));
        Ok(())
    }
}
