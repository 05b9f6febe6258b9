#![forbid(unsafe_code)]

//! Per-key cache entry: the merged item list and the spans it is known to
//! cover.
//!
//! # Invariants
//!
//! - `items` is sorted descending by anchor and holds each identity once.
//! - For every sub-range inside `valid_ranges`, every item anchored there
//!   is present in `items`. Validity only grows through
//!   [`CacheEntry::extend_valid`], which callers invoke after a fetch for
//!   exactly that span succeeded.

use std::collections::HashMap;

use feedsync_core::error::FetchError;
use feedsync_core::item::TimedItem;
use feedsync_core::span::{self, TimeRange, Timestamp};

/// What a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    pub replaced: usize,
}

impl MergeSummary {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.inserted + self.replaced > 0
    }
}

/// Cached items plus validity for one stream key.
#[derive(Debug, Clone)]
pub struct CacheEntry<T: TimedItem> {
    items: Vec<T>,
    valid_ranges: Vec<TimeRange>,
    pending: bool,
    last_error: Option<FetchError>,
}

impl<T: TimedItem> Default for CacheEntry<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            valid_ranges: Vec::new(),
            pending: false,
            last_error: None,
        }
    }
}

impl<T: TimedItem> CacheEntry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Items, newest first.
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    #[must_use]
    pub fn valid_ranges(&self) -> &[TimeRange] {
        &self.valid_ranges
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&FetchError> {
        self.last_error.as_ref()
    }

    #[must_use]
    pub fn newest(&self) -> Option<&T> {
        self.items.first()
    }

    #[must_use]
    pub fn oldest(&self) -> Option<&T> {
        self.items.last()
    }

    pub(crate) fn set_pending(&mut self, pending: bool) {
        self.pending = pending;
    }

    pub(crate) fn record_error(&mut self, error: Option<FetchError>) {
        self.last_error = error;
    }

    /// Insert-or-overwrite by identity, then restore descending order.
    ///
    /// Merging is idempotent and independent of arrival order, so a late
    /// result can always be applied.
    pub fn merge(&mut self, incoming: Vec<T>) -> MergeSummary {
        if incoming.is_empty() {
            return MergeSummary::default();
        }
        let mut index: HashMap<T::Id, usize> = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id(), i))
            .collect();

        let mut summary = MergeSummary::default();
        for item in incoming {
            let id = item.id();
            match index.get(&id).copied() {
                Some(pos) => {
                    self.items[pos] = item;
                    summary.replaced += 1;
                }
                None => {
                    index.insert(id, self.items.len());
                    self.items.push(item);
                    summary.inserted += 1;
                }
            }
        }
        // stable: equal anchors keep their relative order
        self.items.sort_by(|a, b| b.anchor().cmp(&a.anchor()));
        summary
    }

    /// Union `covered` into the validity set.
    pub fn extend_valid(&mut self, covered: &[TimeRange]) {
        if covered.is_empty() {
            return;
        }
        self.valid_ranges = span::union(&self.valid_ranges, covered);
    }

    /// Portion of `span` not yet known.
    #[must_use]
    pub fn gaps(&self, span: TimeRange) -> Vec<TimeRange> {
        span::difference(&[span], &self.valid_ranges)
    }

    /// Items anchored inside `span`, newest first.
    #[must_use]
    pub fn items_in(&self, span: TimeRange) -> Vec<T> {
        self.items
            .iter()
            .filter(|item| span.contains(item.anchor()))
            .cloned()
            .collect()
    }

    /// Items whose own span overlaps `[start, end)`; `end = None` means the
    /// query is open towards the future.
    #[must_use]
    pub fn items_overlapping(&self, start: Timestamp, end: Option<Timestamp>) -> Vec<T> {
        let query = match end {
            Some(end) => match TimeRange::new(start, end) {
                Some(range) => range,
                None => return Vec::new(),
            },
            None => match TimeRange::new(start, Timestamp::MAX) {
                Some(range) => range,
                None => return Vec::new(),
            },
        };
        self.items
            .iter()
            .filter(|item| item.span().overlaps(&query))
            .cloned()
            .collect()
    }

    /// Apply `f` to the item with identity `id`. Validity is untouched.
    pub fn annotate(&mut self, id: &T::Id, f: impl FnOnce(&mut T)) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| &item.id() == id) else {
            return false;
        };
        let before = item.anchor();
        f(item);
        if item.anchor() != before {
            self.items.sort_by(|a, b| b.anchor().cmp(&a.anchor()));
        }
        true
    }
}
