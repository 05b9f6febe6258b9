#![forbid(unsafe_code)]

//! Cursor-paginated variant of the range cache.
//!
//! Instead of diffing a requested span against validity, each page fetch
//! derives its gap from the cursor: the oldest cached item for an older
//! page, the newest for a newer page. The loop invariant is the same as
//! the span cache: one fetch in flight per key, and boundaries are only
//! marked once a page comes back short.
//!
//! Validity written by a page is conservative. A full older page proves
//! nothing about items sharing the oldest returned timestamp, so its lower
//! bound sits one millisecond above it; a short page proves everything
//! down to the beginning of time.

use std::collections::HashMap;

use feedsync_core::error::{FetchError, SyncError};
use feedsync_core::item::TimedItem;
use feedsync_core::key::StreamKey;
use feedsync_core::span::{TimeRange, Timestamp};

use crate::entry::CacheEntry;
use crate::stats::CacheStats;

/// Which way a page walks from its cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageDirection {
    Older,
    Newer,
}

/// One page fetch the caller must perform.
///
/// The cursor is captured when the fetch begins, so completion records
/// validity for the page that was asked for even if the cache moved on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFetch<T: TimedItem> {
    pub key: StreamKey,
    pub direction: PageDirection,
    pub cursor: Option<T::Id>,
    pub limit: usize,
    cursor_anchor: Option<Timestamp>,
    ticket: u64,
}

impl<T: TimedItem> PageFetch<T> {
    /// Anchor time of the cursor item, if there was one.
    #[must_use]
    pub fn cursor_anchor(&self) -> Option<Timestamp> {
        self.cursor_anchor
    }
}

/// Result of applying a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOutcome {
    pub direction: PageDirection,
    /// Items the collaborator returned.
    pub received: usize,
    /// The page came back short: the beginning of history (older) or the
    /// live edge (newer) was reached.
    pub reached_end: bool,
    /// The page did not belong to the fetch in flight; items were merged,
    /// nothing else changed.
    pub stale: bool,
}

#[derive(Debug, Clone)]
struct PagedEntry<T: TimedItem> {
    entry: CacheEntry<T>,
    reached_beginning: bool,
    in_flight: Option<u64>,
}

impl<T: TimedItem> Default for PagedEntry<T> {
    fn default() -> Self {
        Self {
            entry: CacheEntry::new(),
            reached_beginning: false,
            in_flight: None,
        }
    }
}

/// Per-key page cache.
#[derive(Debug, Clone)]
pub struct PagedCache<T: TimedItem> {
    entries: HashMap<StreamKey, PagedEntry<T>>,
    next_ticket: u64,
    stats: CacheStats,
}

impl<T: TimedItem> Default for PagedCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimedItem> PagedCache<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_ticket: 1,
            stats: CacheStats::default(),
        }
    }

    /// Start fetching the page older than the oldest cached item.
    ///
    /// `Ok(None)` once the beginning of history is known.
    pub fn begin_older(
        &mut self,
        key: &StreamKey,
        limit: usize,
    ) -> Result<Option<PageFetch<T>>, SyncError> {
        let slot = self.entries.entry(key.clone()).or_default();
        if slot.entry.is_pending() {
            self.stats.coalesced += 1;
            return Err(SyncError::AlreadyPending { key: key.clone() });
        }
        if slot.reached_beginning {
            self.stats.hits += 1;
            return Ok(None);
        }
        let (cursor, cursor_anchor) = match slot.entry.oldest() {
            Some(item) => (Some(item.id()), Some(item.anchor())),
            None => (None, None),
        };
        Ok(Some(self.issue(key, PageDirection::Older, cursor, cursor_anchor, limit)))
    }

    /// Start fetching the page newer than the newest cached item.
    ///
    /// `Ok(None)` when nothing is cached yet: the first page is always an
    /// older page without a cursor.
    pub fn begin_newer(
        &mut self,
        key: &StreamKey,
        limit: usize,
    ) -> Result<Option<PageFetch<T>>, SyncError> {
        let slot = self.entries.entry(key.clone()).or_default();
        if slot.entry.is_pending() {
            self.stats.coalesced += 1;
            return Err(SyncError::AlreadyPending { key: key.clone() });
        }
        let Some(newest) = slot.entry.newest() else {
            return Ok(None);
        };
        let (cursor, anchor) = (newest.id(), newest.anchor());
        Ok(Some(self.issue(key, PageDirection::Newer, Some(cursor), Some(anchor), limit)))
    }

    fn issue(
        &mut self,
        key: &StreamKey,
        direction: PageDirection,
        cursor: Option<T::Id>,
        cursor_anchor: Option<Timestamp>,
        limit: usize,
    ) -> PageFetch<T> {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.stats.misses += 1;
        self.stats.fetches_issued += 1;

        let slot = self.entries.entry(key.clone()).or_default();
        slot.entry.set_pending(true);
        slot.in_flight = Some(ticket);
        tracing::debug!(stream = %key, ?direction, ?cursor_anchor, limit, "page fetch issued");

        PageFetch {
            key: key.clone(),
            direction,
            cursor,
            limit,
            cursor_anchor,
            ticket,
        }
    }

    /// Apply the result of a [`PageFetch`].
    pub fn complete(
        &mut self,
        fetch: &PageFetch<T>,
        result: Result<Vec<T>, FetchError>,
    ) -> Result<PageOutcome, SyncError> {
        let slot = self.entries.entry(fetch.key.clone()).or_default();

        if slot.in_flight != Some(fetch.ticket) {
            let received = match result {
                Ok(items) => {
                    let received = items.len();
                    slot.entry.merge(items);
                    received
                }
                Err(_) => 0,
            };
            tracing::debug!(stream = %fetch.key, direction = ?fetch.direction, "stale page merged without validity");
            return Ok(PageOutcome {
                direction: fetch.direction,
                received,
                reached_end: false,
                stale: true,
            });
        }

        slot.in_flight = None;
        slot.entry.set_pending(false);

        let items = match result {
            Ok(items) => items,
            Err(source) => {
                self.stats.fetch_failures += 1;
                slot.entry.record_error(Some(source.clone()));
                tracing::warn!(stream = %fetch.key, direction = ?fetch.direction, error = %source, "page fetch failed");
                return Err(SyncError::FetchFailed {
                    key: fetch.key.clone(),
                    source,
                });
            }
        };

        let received = items.len();
        let reached_end = received < fetch.limit;
        let covered = page_coverage(fetch, &items, reached_end);

        slot.entry.record_error(None);
        slot.entry.merge(items);
        if let Some(range) = covered {
            slot.entry.extend_valid(&[range]);
        }
        if fetch.direction == PageDirection::Older && reached_end {
            slot.reached_beginning = true;
            tracing::debug!(stream = %fetch.key, "reached beginning of history");
        }

        Ok(PageOutcome {
            direction: fetch.direction,
            received,
            reached_end,
            stale: false,
        })
    }

    /// Forget the in-flight page so the next begin can retry.
    pub fn reset_pending(&mut self, key: &StreamKey) -> bool {
        let Some(slot) = self.entries.get_mut(key) else {
            return false;
        };
        let was_pending = slot.entry.is_pending();
        slot.in_flight = None;
        slot.entry.set_pending(false);
        if was_pending {
            tracing::debug!(stream = %key, "pending page fetch reset");
        }
        was_pending
    }

    /// Drop the recorded fetch error for `key`.
    pub fn clear_error(&mut self, key: &StreamKey) {
        if let Some(slot) = self.entries.get_mut(key) {
            slot.entry.record_error(None);
        }
    }

    pub fn annotate(&mut self, key: &StreamKey, id: &T::Id, f: impl FnOnce(&mut T)) -> bool {
        self.entries
            .get_mut(key)
            .is_some_and(|slot| slot.entry.annotate(id, f))
    }

    /// Mutable entry for push merging; created on first access.
    pub(crate) fn entry_mut(&mut self, key: &StreamKey) -> &mut CacheEntry<T> {
        &mut self.entries.entry(key.clone()).or_default().entry
    }

    #[must_use]
    pub fn entry(&self, key: &StreamKey) -> Option<&CacheEntry<T>> {
        self.entries.get(key).map(|slot| &slot.entry)
    }

    #[must_use]
    pub fn items(&self, key: &StreamKey) -> &[T] {
        self.entry(key).map_or(&[], CacheEntry::items)
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
    pub fn reached_beginning(&self, key: &StreamKey) -> bool {
        self.entries.get(key).is_some_and(|slot| slot.reached_beginning)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

/// The span a page proves complete, if any.
fn page_coverage<T: TimedItem>(
    fetch: &PageFetch<T>,
    items: &[T],
    reached_end: bool,
) -> Option<TimeRange> {
    let newest = items.iter().map(TimedItem::anchor).max();
    let oldest = items.iter().map(TimedItem::anchor).min();

    match fetch.direction {
        PageDirection::Older => {
            let upper = match (fetch.cursor_anchor, newest) {
                (Some(cursor), _) => cursor.saturating_add(1),
                (None, Some(newest)) => newest.saturating_add(1),
                // empty feed: nothing to anchor validity to
                (None, None) => return None,
            };
            let lower = if reached_end {
                Timestamp::MIN
            } else {
                oldest?.saturating_add(1)
            };
            TimeRange::new(lower, upper)
        }
        PageDirection::Newer => {
            let lower = fetch.cursor_anchor?;
            let upper = match (newest, reached_end) {
                (Some(newest), true) => newest.saturating_add(1),
                (Some(newest), false) => newest,
                (None, _) => lower.saturating_add(1),
            };
            TimeRange::new(lower, upper)
        }
    }
}
