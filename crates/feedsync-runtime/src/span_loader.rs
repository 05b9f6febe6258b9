#![forbid(unsafe_code)]

//! Background driver for [`RangeCache`].
//!
//! `request` answers from cache when it can; otherwise it starts the gap
//! loop on a worker thread and the finished span shows up from `pump` as a
//! [`SpanEvent`]. Requests made while a fetch for the same key is running
//! wait for it and are answered when it completes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use feedsync_cache::{GapFetch, GapProgress, RangeCache, SpanRequest};
use feedsync_core::error::{FetchError, SyncError};
use feedsync_core::item::TimedItem;
use feedsync_core::key::StreamKey;
use feedsync_core::source::SpanSource;
use feedsync_core::span::TimeRange;

use crate::task::TaskPool;

type GapResult<T> = (GapFetch, Result<Vec<T>, FetchError>);

/// Outcome of a span request that could not be served immediately.
#[derive(Debug, Clone, PartialEq)]
pub enum SpanEvent<T> {
    /// Every gap arrived; `items` is the full requested `span`.
    Loaded {
        key: StreamKey,
        span: TimeRange,
        items: Vec<T>,
    },
    /// The fetch for the key failed. Requests that were waiting on it are
    /// dropped too; request again to retry.
    Failed(SyncError),
}

pub struct SpanLoader<T, S>
where
    T: TimedItem + Send + 'static,
    S: SpanSource<T> + Send + Sync + 'static,
{
    cache: RangeCache<T>,
    source: Arc<S>,
    pool: TaskPool<GapResult<T>>,
    receiver: mpsc::Receiver<GapResult<T>>,
    /// Span whose gap loop is running, per key.
    active: HashMap<StreamKey, TimeRange>,
    /// Spans requested while `active` was running.
    waiting: HashMap<StreamKey, Vec<TimeRange>>,
}

impl<T, S> std::fmt::Debug for SpanLoader<T, S>
where
    T: TimedItem + Send + 'static,
    S: SpanSource<T> + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanLoader")
            .field("stats", &self.cache.stats())
            .field("active", &self.active)
            .field("waiting", &self.waiting)
            .finish_non_exhaustive()
    }
}

impl<T, S> SpanLoader<T, S>
where
    T: TimedItem + Send + 'static,
    S: SpanSource<T> + Send + Sync + 'static,
{
    pub fn new(source: Arc<S>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            cache: RangeCache::new(),
            source,
            pool: TaskPool::new(sender),
            receiver,
            active: HashMap::new(),
            waiting: HashMap::new(),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &RangeCache<T> {
        &self.cache
    }

    /// Items of `span` if it is already valid. Otherwise `None`, and a
    /// [`SpanEvent`] for `span` follows once its gaps were fetched. When a
    /// fetch for `key` is already running, `span` waits for it and is
    /// served (or fetched) after it completes.
    pub fn request(&mut self, key: &StreamKey, span: TimeRange) -> Option<Vec<T>> {
        match self.cache.request(key, span) {
            SpanRequest::Served(items) => Some(items),
            SpanRequest::Coalesced(_) => {
                self.waiting.entry(key.clone()).or_default().push(span);
                None
            }
            SpanRequest::Fetch(fetch) => {
                self.active.insert(key.clone(), span);
                self.spawn_gap(fetch);
                None
            }
        }
    }

    /// Spans waiting on the running fetch for `key`.
    #[must_use]
    pub fn waiting(&self, key: &StreamKey) -> &[TimeRange] {
        self.waiting.get(key).map_or(&[], Vec::as_slice)
    }

    /// Abandon the fetch running for `key`; see [`RangeCache::reset_pending`].
    /// Waiting spans ride on the next fetch for `key`.
    pub fn reset_pending(&mut self, key: &StreamKey) -> bool {
        self.active.remove(key);
        self.cache.reset_pending(key)
    }

    pub fn annotate(&mut self, key: &StreamKey, id: &T::Id, f: impl FnOnce(&mut T)) -> bool {
        self.cache.annotate(key, id, f)
    }

    /// Apply finished gap fetches, continuing gap loops as needed.
    pub fn pump(&mut self) -> Vec<SpanEvent<T>> {
        let mut events = Vec::new();
        while let Ok((fetch, result)) = self.receiver.try_recv() {
            self.apply(&fetch, result, &mut events);
        }
        self.pool.reap();
        events
    }

    /// Wait up to `timeout` for one gap result, then drain the rest.
    pub fn pump_blocking(&mut self, timeout: Duration) -> Vec<SpanEvent<T>> {
        let mut events = Vec::new();
        if let Ok((fetch, result)) = self.receiver.recv_timeout(timeout) {
            self.apply(&fetch, result, &mut events);
            events.extend(self.pump());
        }
        events
    }

    fn apply(
        &mut self,
        fetch: &GapFetch,
        result: Result<Vec<T>, FetchError>,
        events: &mut Vec<SpanEvent<T>>,
    ) {
        let key = &fetch.key;
        match self.cache.complete_gap(fetch, result) {
            GapProgress::Next(next) => self.spawn_gap(next),
            GapProgress::Complete(items) => {
                if let Some(span) = self.active.remove(key) {
                    events.push(SpanEvent::Loaded {
                        key: key.clone(),
                        span,
                        items,
                    });
                }
                self.release_waiting(key, events);
            }
            GapProgress::Failed(err) => {
                self.active.remove(key);
                if let Some(dropped) = self.waiting.remove(key) {
                    tracing::debug!(stream = %key, dropped = dropped.len(), "waiting span requests dropped");
                }
                events.push(SpanEvent::Failed(err));
            }
            GapProgress::Stale => {}
        }
    }

    /// Re-request spans that waited on the fetch that just finished. The
    /// first one still missing gaps starts the next fetch; the rest wait
    /// again.
    fn release_waiting(&mut self, key: &StreamKey, events: &mut Vec<SpanEvent<T>>) {
        let Some(spans) = self.waiting.remove(key) else {
            return;
        };
        for span in spans {
            if let Some(items) = self.request(key, span) {
                events.push(SpanEvent::Loaded {
                    key: key.clone(),
                    span,
                    items,
                });
            }
        }
    }

    fn spawn_gap(&mut self, fetch: GapFetch) {
        crate::debug_trace!("gap fetch spawned: stream={} gap={}", fetch.key, fetch.gap);
        let source = Arc::clone(&self.source);
        self.pool.spawn("gap", move || {
            let result = source.fetch_items_in_span(&fetch.key, fetch.gap);
            (fetch, result)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{PageCall, ScriptedPages};
    use feedsync_core::item::Message;

    const WAIT: Duration = Duration::from_secs(5);

    fn key() -> StreamKey {
        StreamKey::new("g", "c")
    }

    fn span(start: i64, end: i64) -> TimeRange {
        TimeRange::new(start, end).unwrap()
    }

    fn loader() -> (SpanLoader<Message, ScriptedPages<Message>>, Arc<ScriptedPages<Message>>) {
        let source = Arc::new(ScriptedPages::new(
            (0..10).map(|i| Message::new(format!("m{i}"), i * 10)).collect(),
        ));
        (SpanLoader::new(Arc::clone(&source)), source)
    }

    fn wait_for_event(loader: &mut SpanLoader<Message, ScriptedPages<Message>>) -> SpanEvent<Message> {
        loop {
            let mut events = loader.pump_blocking(WAIT);
            assert!(events.len() <= 1, "one request, at most one event");
            if let Some(event) = events.pop() {
                return event;
            }
        }
    }

    #[test]
    fn miss_then_hit() {
        let (mut loader, source) = loader();
        assert_eq!(loader.request(&key(), span(0, 50)), None);
        match wait_for_event(&mut loader) {
            SpanEvent::Loaded { key: k, span: s, items } => {
                assert_eq!(s, span(0, 50));
                assert_eq!(k, key());
                assert_eq!(items.len(), 5);
            }
            other => panic!("unexpected {other:?}"),
        }
        let served = loader.request(&key(), span(10, 30)).unwrap();
        assert_eq!(served.len(), 2);
        assert_eq!(source.calls(), [PageCall::Span(span(0, 50))]);
    }

    #[test]
    fn only_gaps_are_fetched() {
        let (mut loader, source) = loader();
        loader.request(&key(), span(20, 40));
        wait_for_event(&mut loader);

        loader.request(&key(), span(0, 60));
        match wait_for_event(&mut loader) {
            SpanEvent::Loaded { items, .. } => assert_eq!(items.len(), 6),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            source.calls(),
            [
                PageCall::Span(span(20, 40)),
                PageCall::Span(span(0, 20)),
                PageCall::Span(span(40, 60)),
            ]
        );
    }

    #[test]
    fn failure_is_reported_and_retry_works() {
        let (mut loader, source) = loader();
        source.fail_next(FetchError::transient("timeout"));
        loader.request(&key(), span(0, 30));
        assert!(matches!(wait_for_event(&mut loader), SpanEvent::Failed(SyncError::FetchFailed { .. })));
        assert!(loader.cache().valid_ranges(&key()).is_empty());

        loader.request(&key(), span(0, 30));
        assert!(matches!(wait_for_event(&mut loader), SpanEvent::Loaded { .. }));
    }

    #[test]
    fn requests_during_a_fetch_are_answered_after_it() {
        let (mut loader, source) = loader();
        assert_eq!(loader.request(&key(), span(0, 50)), None);
        assert_eq!(loader.request(&key(), span(20, 40)), None);
        assert_eq!(loader.request(&key(), span(40, 80)), None);
        assert_eq!(loader.waiting(&key()), [span(20, 40), span(40, 80)]);

        let mut loaded = Vec::new();
        while loaded.len() < 3 {
            for event in loader.pump_blocking(WAIT) {
                match event {
                    SpanEvent::Loaded { span, items, .. } => loaded.push((span, items.len())),
                    other => panic!("unexpected {other:?}"),
                }
            }
        }
        assert_eq!(loaded, [(span(0, 50), 5), (span(20, 40), 2), (span(40, 80), 4)]);
        assert!(loader.waiting(&key()).is_empty());
        // only the part of the last span not already known was fetched
        assert_eq!(source.calls(), [PageCall::Span(span(0, 50)), PageCall::Span(span(50, 80))]);
    }

    #[test]
    fn failure_drops_waiting_requests() {
        let (mut loader, source) = loader();
        source.fail_next(FetchError::transient("timeout"));
        loader.request(&key(), span(0, 30));
        loader.request(&key(), span(10, 20));
        assert!(matches!(wait_for_event(&mut loader), SpanEvent::Failed(_)));
        assert!(loader.waiting(&key()).is_empty());
    }
}
