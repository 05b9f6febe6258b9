#![forbid(unsafe_code)]

//! Live-edge reconciliation between cursor pages and a push channel.
//!
//! [`StreamReconciler`] owns a [`PagedCache`] and the push transport. Pushed
//! items either merge straight into the head of the cache (subscribed and
//! auto-fetching) or mark the stream stale, which tells the orchestrator a
//! newer page is owed before the head can be trusted again.
//!
//! # State machine
//!
//! ```text
//! Unsubscribed --subscribe--> Subscribing --ok--> Subscribed
//!      ^                          |                   |
//!      +--------rejected----------+                   |
//!      +-----------------unsubscribe / hidden---------+
//! ```
//!
//! Every read-then-write of `is_up_to_date` / `is_auto_fetching` happens
//! inside one `&mut self` call, so a push and an orchestrator decision can
//! never interleave halfway.

use std::collections::HashMap;

use feedsync_core::error::{FetchError, SyncError};
use feedsync_core::item::TimedItem;
use feedsync_core::key::StreamKey;
use feedsync_core::source::PushTransport;
use feedsync_core::span::TimeRange;

use crate::paged::{PageDirection, PageFetch, PageOutcome, PagedCache};

/// Push channel state for one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubscriptionState {
    #[default]
    Unsubscribed,
    Subscribing,
    Subscribed,
}

/// Snapshot of a key's live-edge flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSubscription {
    pub state: SubscriptionState,
    /// The cached newest item is the newest item server-side.
    pub is_up_to_date: bool,
    /// Pushes merge directly instead of marking the stream stale.
    pub is_auto_fetching: bool,
    drifted: bool,
}

impl StreamSubscription {
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.state == SubscriptionState::Subscribed
    }

    /// Streaming means pushes are landing in the cache.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.is_subscribed() && self.is_auto_fetching
    }
}

/// What happened to a pushed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Merged at the head; validity now includes its instant.
    Merged,
    /// Not merged; the stream is no longer up to date.
    MarkedStale,
}

/// Page cache plus push channel for a set of stream keys.
pub struct StreamReconciler<T: TimedItem, P: PushTransport> {
    cache: PagedCache<T>,
    subs: HashMap<StreamKey, StreamSubscription>,
    transport: P,
}

impl<T: TimedItem, P: PushTransport> std::fmt::Debug for StreamReconciler<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReconciler")
            .field("subs", &self.subs)
            .field("stats", &self.cache.stats())
            .finish_non_exhaustive()
    }
}

impl<T: TimedItem, P: PushTransport> StreamReconciler<T, P> {
    #[must_use]
    pub fn new(transport: P) -> Self {
        Self {
            cache: PagedCache::new(),
            subs: HashMap::new(),
            transport,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &PagedCache<T> {
        &self.cache
    }

    #[must_use]
    pub fn transport(&self) -> &P {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut P {
        &mut self.transport
    }

    /// Current flags for `key`; unknown keys report the defaults.
    #[must_use]
    pub fn subscription(&self, key: &StreamKey) -> StreamSubscription {
        self.subs.get(key).copied().unwrap_or_default()
    }

    /// Subscribe to pushes for `key`. A no-op when already subscribed.
    pub fn subscribe(&mut self, key: &StreamKey) -> Result<(), SyncError> {
        let sub = self.subs.entry(key.clone()).or_default();
        if sub.state != SubscriptionState::Unsubscribed {
            tracing::trace!(stream = %key, state = ?sub.state, "subscribe ignored");
            return Ok(());
        }
        sub.state = SubscriptionState::Subscribing;

        match self.transport.subscribe(key) {
            Ok(()) => {
                sub.state = SubscriptionState::Subscribed;
                sub.is_auto_fetching = sub.is_up_to_date;
                tracing::debug!(stream = %key, auto_fetching = sub.is_auto_fetching, "subscribed");
                Ok(())
            }
            Err(err) => {
                sub.state = SubscriptionState::Unsubscribed;
                tracing::warn!(stream = %key, reason = %err, "subscribe rejected");
                Err(SyncError::SubscriptionRejected {
                    key: key.clone(),
                    reason: err.reason,
                })
            }
        }
    }

    /// Stop pushes for `key`. A no-op when not subscribed.
    ///
    /// Pushes are no longer seen afterwards, so the head stops being
    /// trusted: `is_up_to_date` is cleared along with auto-fetching.
    pub fn unsubscribe(&mut self, key: &StreamKey) -> Result<(), SyncError> {
        let sub = self.subs.entry(key.clone()).or_default();
        if sub.state != SubscriptionState::Subscribed {
            return Ok(());
        }
        match self.transport.unsubscribe(key) {
            Ok(()) => {
                sub.state = SubscriptionState::Unsubscribed;
                sub.is_auto_fetching = false;
                sub.is_up_to_date = false;
                tracing::debug!(stream = %key, "unsubscribed");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(stream = %key, reason = %err, "unsubscribe rejected");
                Err(SyncError::SubscriptionRejected {
                    key: key.clone(),
                    reason: err.reason,
                })
            }
        }
    }

    pub fn set_auto_fetching(&mut self, key: &StreamKey, on: bool) {
        self.subs.entry(key.clone()).or_default().is_auto_fetching = on;
    }

    /// Handle an item delivered by the push channel.
    pub fn on_push(&mut self, key: &StreamKey, item: T) -> PushOutcome {
        let sub = self.subs.entry(key.clone()).or_default();
        if !sub.is_streaming() {
            sub.is_up_to_date = false;
            sub.drifted = true;
            tracing::trace!(stream = %key, "push while not streaming; head is stale");
            return PushOutcome::MarkedStale;
        }

        let up_to_date = sub.is_up_to_date;
        let entry = self.cache.entry_mut(key);
        let anchor = item.anchor();
        let covered = match entry.newest().map(TimedItem::anchor) {
            // nothing between the old head and this push was missed
            Some(head) if up_to_date && head <= anchor => {
                TimeRange::new(head, anchor.saturating_add(1)).unwrap_or(TimeRange::instant(anchor))
            }
            _ => TimeRange::instant(anchor),
        };
        entry.merge(vec![item]);
        entry.extend_valid(&[covered]);
        PushOutcome::Merged
    }

    /// Begin an older page. See [`PagedCache::begin_older`].
    pub fn begin_older(
        &mut self,
        key: &StreamKey,
        limit: usize,
    ) -> Result<Option<PageFetch<T>>, SyncError> {
        self.cache.begin_older(key, limit)
    }

    /// Begin a catch-up page towards the live edge.
    ///
    /// Pushes seen before this point will be covered by the page, so the
    /// drift marker is cleared here.
    pub fn begin_newer(
        &mut self,
        key: &StreamKey,
        limit: usize,
    ) -> Result<Option<PageFetch<T>>, SyncError> {
        let fetch = self.cache.begin_newer(key, limit)?;
        if fetch.is_some() {
            self.subs.entry(key.clone()).or_default().drifted = false;
        }
        Ok(fetch)
    }

    /// Apply a page and update the live-edge flags.
    ///
    /// The first page (older, no cursor) is the newest page, so it makes
    /// the stream up to date unless a push slipped past it. A short newer
    /// page reached the live edge: the stream becomes up to date and
    /// subscribes. A rejected auto-subscribe is returned as an error; the
    /// page itself stays applied.
    pub fn complete(
        &mut self,
        fetch: &PageFetch<T>,
        result: Result<Vec<T>, FetchError>,
    ) -> Result<PageOutcome, SyncError> {
        let outcome = self.cache.complete(fetch, result)?;
        if outcome.stale {
            return Ok(outcome);
        }

        let key = &fetch.key;
        let sub = self.subs.entry(key.clone()).or_default();
        match fetch.direction {
            PageDirection::Older if fetch.cursor.is_none() => {
                if !sub.drifted {
                    sub.is_up_to_date = true;
                    if sub.is_subscribed() {
                        sub.is_auto_fetching = true;
                    }
                }
            }
            PageDirection::Older => {}
            PageDirection::Newer => {
                if outcome.reached_end && !sub.drifted {
                    sub.is_up_to_date = true;
                    tracing::debug!(stream = %key, "caught up with live edge");
                    if sub.is_subscribed() {
                        sub.is_auto_fetching = true;
                    } else {
                        self.subscribe(key)?;
                    }
                }
            }
        }
        Ok(outcome)
    }

    pub fn reset_pending(&mut self, key: &StreamKey) -> bool {
        self.cache.reset_pending(key)
    }

    pub fn clear_error(&mut self, key: &StreamKey) {
        self.cache.clear_error(key);
    }

    pub fn annotate(&mut self, key: &StreamKey, id: &T::Id, f: impl FnOnce(&mut T)) -> bool {
        self.cache.annotate(key, id, f)
    }
}
