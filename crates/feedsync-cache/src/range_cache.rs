#![forbid(unsafe_code)]

//! Span-keyed cache: serve a requested time span from what is known, and
//! fetch only the gaps.
//!
//! The cache is sans-IO. [`RangeCache::request`] either answers from memory
//! or hands back a [`GapFetch`] describing the one fetch the caller must
//! perform next; [`RangeCache::complete_gap`] feeds the result back in.
//! Gaps of one request are fetched one at a time, smallest start first.
//! [`RangeCache::request_with`] drives that loop against a blocking
//! [`SpanSource`].
//!
//! # Invariants
//!
//! - At most one fetch is in flight per key (`pending`).
//! - Validity is extended only after every gap of a request succeeded, and
//!   only by the gaps that were *requested*, never by a span recomputed at
//!   completion time.

use std::collections::{HashMap, VecDeque};

use feedsync_core::error::{FetchError, SyncError};
use feedsync_core::item::TimedItem;
use feedsync_core::key::StreamKey;
use feedsync_core::source::SpanSource;
use feedsync_core::span::{TimeRange, Timestamp};

use crate::entry::CacheEntry;
use crate::stats::CacheStats;

/// One fetch the caller must perform: every item anchored in `gap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapFetch {
    pub key: StreamKey,
    pub gap: TimeRange,
    ticket: u64,
}

/// Answer to [`RangeCache::request`].
#[derive(Debug, Clone, PartialEq)]
pub enum SpanRequest<T> {
    /// The whole span is valid; these are its items.
    Served(Vec<T>),
    /// A fetch is already in flight for the key; this is what is cached so
    /// far for the span. Re-request after completion.
    Coalesced(Vec<T>),
    /// Gaps must be fetched; start with this one.
    Fetch(GapFetch),
}

/// Answer to [`RangeCache::complete_gap`].
#[derive(Debug, Clone, PartialEq)]
pub enum GapProgress<T> {
    /// More gaps remain; fetch this one next.
    Next(GapFetch),
    /// All gaps succeeded; the span is now valid and these are its items.
    Complete(Vec<T>),
    /// The gap failed; validity was left unchanged.
    Failed(SyncError),
    /// The result did not belong to the fetch currently in flight. Items
    /// were merged, validity was not touched.
    Stale,
}

#[derive(Debug, Clone)]
struct InFlight {
    ticket: u64,
    span: TimeRange,
    current: TimeRange,
    remaining: VecDeque<TimeRange>,
    covered: Vec<TimeRange>,
}

#[derive(Debug, Clone)]
struct SpanEntry<T: TimedItem> {
    entry: CacheEntry<T>,
    in_flight: Option<InFlight>,
}

impl<T: TimedItem> Default for SpanEntry<T> {
    fn default() -> Self {
        Self {
            entry: CacheEntry::new(),
            in_flight: None,
        }
    }
}

/// Per-key store of known spans and their items.
#[derive(Debug, Clone)]
pub struct RangeCache<T: TimedItem> {
    entries: HashMap<StreamKey, SpanEntry<T>>,
    next_ticket: u64,
    stats: CacheStats,
}

impl<T: TimedItem> Default for RangeCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimedItem> RangeCache<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_ticket: 1,
            stats: CacheStats::default(),
        }
    }

    /// Ask for every item anchored in `span`.
    pub fn request(&mut self, key: &StreamKey, span: TimeRange) -> SpanRequest<T> {
        let slot = self.entries.entry(key.clone()).or_default();

        if slot.entry.is_pending() {
            self.stats.coalesced += 1;
            tracing::trace!(stream = %key, %span, "span request coalesced with in-flight fetch");
            return SpanRequest::Coalesced(slot.entry.items_in(span));
        }

        let gaps = slot.entry.gaps(span);
        let Some((first, rest)) = gaps.split_first() else {
            self.stats.hits += 1;
            return SpanRequest::Served(slot.entry.items_in(span));
        };

        self.stats.misses += 1;
        self.stats.fetches_issued += 1;
        let ticket = self.next_ticket;
        self.next_ticket += 1;

        slot.entry.set_pending(true);
        slot.in_flight = Some(InFlight {
            ticket,
            span,
            current: *first,
            remaining: rest.iter().copied().collect(),
            covered: Vec::with_capacity(gaps.len()),
        });
        tracing::debug!(stream = %key, %span, gaps = gaps.len(), first = %first, "span fetch issued");

        SpanRequest::Fetch(GapFetch {
            key: key.clone(),
            gap: *first,
            ticket,
        })
    }

    /// Feed back the result of a [`GapFetch`].
    pub fn complete_gap(
        &mut self,
        fetch: &GapFetch,
        result: Result<Vec<T>, FetchError>,
    ) -> GapProgress<T> {
        let slot = self.entries.entry(fetch.key.clone()).or_default();

        let current = matches!(
            &slot.in_flight,
            Some(flight) if flight.ticket == fetch.ticket && flight.current == fetch.gap
        );
        if !current {
            if let Ok(items) = result {
                slot.entry.merge(items);
            }
            tracing::debug!(stream = %fetch.key, gap = %fetch.gap, "stale gap result merged without validity");
            return GapProgress::Stale;
        }

        let items = match result {
            Ok(items) => items,
            Err(source) => {
                self.stats.fetch_failures += 1;
                slot.in_flight = None;
                slot.entry.set_pending(false);
                slot.entry.record_error(Some(source.clone()));
                tracing::warn!(stream = %fetch.key, gap = %fetch.gap, error = %source, "gap fetch failed");
                return GapProgress::Failed(SyncError::FetchFailed {
                    key: fetch.key.clone(),
                    source,
                });
            }
        };

        slot.entry.merge(items);
        let Some(flight) = slot.in_flight.as_mut() else {
            return GapProgress::Stale;
        };
        flight.covered.push(fetch.gap);

        if let Some(next) = flight.remaining.pop_front() {
            flight.current = next;
            self.stats.fetches_issued += 1;
            return GapProgress::Next(GapFetch {
                key: fetch.key.clone(),
                gap: next,
                ticket: fetch.ticket,
            });
        }

        let span = flight.span;
        let covered = std::mem::take(&mut flight.covered);
        slot.in_flight = None;
        slot.entry.set_pending(false);
        slot.entry.record_error(None);
        slot.entry.extend_valid(&covered);
        tracing::debug!(stream = %fetch.key, %span, "span now valid");
        GapProgress::Complete(slot.entry.items_in(span))
    }

    /// Run the whole gap loop for `span` against a blocking source.
    pub fn request_with<S>(
        &mut self,
        key: &StreamKey,
        span: TimeRange,
        source: &S,
    ) -> Result<Vec<T>, SyncError>
    where
        S: SpanSource<T> + ?Sized,
    {
        let mut fetch = match self.request(key, span) {
            SpanRequest::Served(items) | SpanRequest::Coalesced(items) => return Ok(items),
            SpanRequest::Fetch(fetch) => fetch,
        };
        loop {
            let result = source.fetch_items_in_span(&fetch.key, fetch.gap);
            match self.complete_gap(&fetch, result) {
                GapProgress::Next(next) => fetch = next,
                GapProgress::Complete(items) => return Ok(items),
                GapProgress::Failed(err) => return Err(err),
                GapProgress::Stale => return Ok(self.items_in(key, span)),
            }
        }
    }

    /// Forget an in-flight fetch so the next request can retry. A late
    /// result for it is merged but does not extend validity.
    pub fn reset_pending(&mut self, key: &StreamKey) -> bool {
        let Some(slot) = self.entries.get_mut(key) else {
            return false;
        };
        let was_pending = slot.entry.is_pending();
        slot.in_flight = None;
        slot.entry.set_pending(false);
        if was_pending {
            tracing::debug!(stream = %key, "pending span fetch reset");
        }
        was_pending
    }

    /// Update one cached item in place.
    pub fn annotate(&mut self, key: &StreamKey, id: &T::Id, f: impl FnOnce(&mut T)) -> bool {
        self.entries
            .get_mut(key)
            .is_some_and(|slot| slot.entry.annotate(id, f))
    }

    #[must_use]
    pub fn entry(&self, key: &StreamKey) -> Option<&CacheEntry<T>> {
        self.entries.get(key).map(|slot| &slot.entry)
    }

    /// All items for `key`, newest first.
    #[must_use]
    pub fn items(&self, key: &StreamKey) -> &[T] {
        self.entry(key).map_or(&[], CacheEntry::items)
    }

    #[must_use]
    pub fn items_in(&self, key: &StreamKey, span: TimeRange) -> Vec<T> {
        self.entry(key).map_or_else(Vec::new, |e| e.items_in(span))
    }

    /// Cached items whose own span overlaps `[start, end)`, `end = None`
    /// meaning open-ended.
    #[must_use]
    pub fn items_overlapping(
        &self,
        key: &StreamKey,
        start: Timestamp,
        end: Option<Timestamp>,
    ) -> Vec<T> {
        self.entry(key)
            .map_or_else(Vec::new, |e| e.items_overlapping(start, end))
    }

    #[must_use]
    pub fn valid_ranges(&self, key: &StreamKey) -> &[TimeRange] {
        self.entry(key).map_or(&[], CacheEntry::valid_ranges)
    }

    #[must_use]
    pub fn is_pending(&self, key: &StreamKey) -> bool {
        self.entry(key).is_some_and(CacheEntry::is_pending)
    }

    #[must_use]
    pub fn last_error(&self, key: &StreamKey) -> Option<&FetchError> {
        self.entry(key).and_then(CacheEntry::last_error)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
