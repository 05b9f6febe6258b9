#![forbid(unsafe_code)]

//! Per-group orchestration: scroll position decides what to fetch and
//! whether to stream.
//!
//! The [`Orchestrator`] follows an update loop: every operation takes one
//! event (mount, scroll, measurement, completed page, pushed item) and
//! returns the commands the driver must run. Fetches themselves never run
//! here; [`FeedCmd::Fetch`] hands a page description to the driver, and the
//! driver feeds the result back as [`FeedMsg::PageLoaded`].
//!
//! # Edge policy
//!
//! - Near the oldest cached item, not pending and not at the beginning:
//!   fetch an older page.
//! - Near the live edge: fetch a newer page if the head is stale, or
//!   subscribe if it is fresh but not subscribed.
//! - Anywhere else while subscribed: unsubscribe, unless another visible
//!   group on the same stream sits at the live edge.
//! - Hidden: stop streaming regardless of scroll position.

use std::collections::BTreeMap;
use std::time::Duration;

use feedsync_cache::{PageDirection, PageFetch, PushOutcome, StreamReconciler, StreamSubscription};
use feedsync_core::error::{FetchError, SyncError};
use feedsync_core::item::TimedItem;
use feedsync_core::key::{GroupKey, StreamKey};
use feedsync_core::source::PushTransport;
use feedsync_viewport::{
    LayoutMode, Layouts, Measurement, ScrollEdges, ScrollSample, TransitionStart, Viewport,
};

use crate::config::FeedConfig;
use crate::group::FeedGroup;

/// Work the driver must carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedCmd<T: TimedItem> {
    /// Run this page fetch and send back [`FeedMsg::PageLoaded`].
    Fetch(PageFetch<T>),
    /// Surface an error to the caller; no action needed to keep state
    /// consistent.
    Report(SyncError),
}

/// Events arriving from collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMsg<T: TimedItem> {
    PageLoaded {
        fetch: PageFetch<T>,
        result: Result<Vec<T>, FetchError>,
    },
    Push {
        key: StreamKey,
        item: T,
    },
}

/// Groups, their streams, and the decisions tying them together.
pub struct Orchestrator<T: TimedItem, P: PushTransport> {
    config: FeedConfig,
    reconciler: StreamReconciler<T, P>,
    groups: BTreeMap<GroupKey, FeedGroup<T::Id>>,
}

impl<T: TimedItem, P: PushTransport> std::fmt::Debug for Orchestrator<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("reconciler", &self.reconciler)
            .field("groups", &self.groups.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: TimedItem, P: PushTransport> Orchestrator<T, P> {
    #[must_use]
    pub fn new(config: FeedConfig, transport: P) -> Self {
        Self {
            config,
            reconciler: StreamReconciler::new(transport),
            groups: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    #[must_use]
    pub fn reconciler(&self) -> &StreamReconciler<T, P> {
        &self.reconciler
    }

    pub fn transport_mut(&mut self) -> &mut P {
        self.reconciler.transport_mut()
    }

    #[must_use]
    pub fn group(&self, group: &GroupKey) -> Option<&FeedGroup<T::Id>> {
        self.groups.get(group)
    }

    /// Cached items of the group's stream, newest first.
    #[must_use]
    pub fn items(&self, group: &GroupKey) -> &[T] {
        self.groups
            .get(group)
            .map_or(&[], |g| self.reconciler.cache().items(g.stream()))
    }

    #[must_use]
    pub fn subscription(&self, group: &GroupKey) -> Option<StreamSubscription> {
        self.groups
            .get(group)
            .map(|g| self.reconciler.subscription(g.stream()))
    }

    /// Ids currently inside the group's window.
    #[must_use]
    pub fn visible_items(&self, group: &GroupKey) -> Vec<T::Id> {
        let Some(g) = self.groups.get(group) else {
            return Vec::new();
        };
        let ids = self.ids(g.stream());
        g.layouts().visible_items(&ids, g.viewport())
    }

    /// Layout position of `id` (interpolated during a transition).
    #[must_use]
    pub fn position_of(&self, group: &GroupKey, id: &T::Id) -> Option<f64> {
        let g = self.groups.get(group)?;
        let index = self
            .reconciler
            .cache()
            .items(g.stream())
            .iter()
            .position(|item| &item.id() == id)?;
        g.layouts().position_of(id, index)
    }

    /// Mount a group over `stream`.
    ///
    /// With nothing cached and nothing pending this issues the first page
    /// and starts streaming.
    pub fn mount(
        &mut self,
        group: GroupKey,
        stream: StreamKey,
        height: f64,
        mode_name: &str,
        mode: LayoutMode<T::Id>,
    ) -> Vec<FeedCmd<T>> {
        let viewport = Viewport::new(height).with_headroom(self.config.upper_bound_headroom);
        let layouts = Layouts::new(group.clone(), mode_name, mode)
            .with_transition_duration(self.config.transition_duration);
        self.groups
            .insert(group.clone(), FeedGroup::new(stream.clone(), viewport, layouts));
        tracing::debug!(group = %group, stream = %stream, "group mounted");

        let mut cmds = Vec::new();
        let cache = self.reconciler.cache();
        if cache.items(&stream).is_empty() && !cache.is_pending(&stream) {
            self.fetch(PageDirection::Older, &stream, &mut cmds);
            self.subscribe(&stream, &mut cmds);
        }
        self.sync_group(&group);
        self.evaluate(&group, &mut cmds);
        cmds
    }

    /// Register another layout mode for a group.
    pub fn add_layout_mode(&mut self, group: &GroupKey, name: &str, mode: LayoutMode<T::Id>) -> bool {
        let Some(g) = self.groups.get_mut(group) else {
            return false;
        };
        g.layouts.insert_mode(name, mode);
        true
    }

    pub fn on_scroll(&mut self, group: &GroupKey, sample: ScrollSample) -> Vec<FeedCmd<T>> {
        let mut cmds = Vec::new();
        let Some(g) = self.groups.get_mut(group) else {
            return cmds;
        };
        g.viewport.on_scroll(sample);
        self.evaluate(group, &mut cmds);
        cmds
    }

    pub fn set_height(&mut self, group: &GroupKey, height: f64) -> Vec<FeedCmd<T>> {
        let mut cmds = Vec::new();
        if let Some(g) = self.groups.get_mut(group) {
            g.viewport.set_height(height);
            self.evaluate(group, &mut cmds);
        }
        cmds
    }

    /// Show or hide a group. Hiding stops streaming for its stream unless
    /// another visible group still shows it.
    pub fn set_visible(&mut self, group: &GroupKey, visible: bool) -> Vec<FeedCmd<T>> {
        let mut cmds = Vec::new();
        let Some(g) = self.groups.get_mut(group) else {
            return cmds;
        };
        g.visible = visible;
        let stream = g.stream().clone();

        if visible {
            self.evaluate(group, &mut cmds);
        } else if self.config.hide_unsubscribes && !self.shown_elsewhere(&stream, group) {
            tracing::debug!(group = %group, stream = %stream, "group hidden; stopping stream");
            self.unsubscribe(&stream, &mut cmds);
        }
        cmds
    }

    /// Record a renderer measurement for `id` under `mode`.
    pub fn measure(
        &mut self,
        group: &GroupKey,
        mode: &str,
        id: T::Id,
        measurement: Measurement,
    ) -> Vec<FeedCmd<T>> {
        let mut cmds = Vec::new();
        let Some(g) = self.groups.get_mut(group) else {
            return cmds;
        };
        if g.layouts.measure(mode, id, measurement) {
            self.sync_group(group);
            self.evaluate(group, &mut cmds);
        }
        cmds
    }

    /// Switch the group's active layout mode around `pivot` (or the item
    /// nearest the window's middle).
    pub fn switch_layout(
        &mut self,
        group: &GroupKey,
        to: &str,
        pivot: Option<&T::Id>,
    ) -> Result<Option<TransitionStart<T::Id>>, SyncError> {
        let Some(g) = self.groups.get(group) else {
            return Err(SyncError::TransitionNotReady {
                group: group.clone(),
                pivot: None,
            });
        };
        let ids = self.ids(g.stream());
        let Some(g) = self.groups.get_mut(group) else {
            return Ok(None);
        };
        g.layouts.begin_transition(to, &ids, pivot, &mut g.viewport)
    }

    /// Advance running transitions. Returns the groups whose transition
    /// ended on this tick.
    pub fn tick(&mut self, dt: Duration) -> Vec<GroupKey> {
        self.groups
            .iter_mut()
            .filter_map(|(key, g)| g.layouts.tick(dt).then(|| key.clone()))
            .collect()
    }

    /// Clear a stuck or failed fetch for the group's stream and issue
    /// whatever the group is owed.
    pub fn retry(&mut self, group: &GroupKey) -> Vec<FeedCmd<T>> {
        let mut cmds = Vec::new();
        let Some(stream) = self.groups.get(group).map(|g| g.stream().clone()) else {
            return cmds;
        };
        if self.reconciler.reset_pending(&stream) {
            tracing::debug!(group = %group, stream = %stream, "pending fetch abandoned by retry");
        }
        self.reconciler.clear_error(&stream);
        if self.reconciler.cache().items(&stream).is_empty() {
            self.subscribe(&stream, &mut cmds);
        }
        self.evaluate(group, &mut cmds);
        cmds
    }

    /// Update a cached item in place (e.g. attach a score).
    pub fn annotate(&mut self, group: &GroupKey, id: &T::Id, f: impl FnOnce(&mut T)) -> bool {
        let Some(stream) = self.groups.get(group).map(|g| g.stream().clone()) else {
            return false;
        };
        self.reconciler.annotate(&stream, id, f)
    }

    /// Apply one collaborator event.
    pub fn update(&mut self, msg: FeedMsg<T>) -> Vec<FeedCmd<T>> {
        let mut cmds = Vec::new();
        match msg {
            FeedMsg::PageLoaded { fetch, result } => {
                let stream = fetch.key.clone();
                match self.reconciler.complete(&fetch, result) {
                    Ok(outcome) => {
                        tracing::trace!(
                            stream = %stream,
                            direction = ?outcome.direction,
                            received = outcome.received,
                            reached_end = outcome.reached_end,
                            stale = outcome.stale,
                            "page applied"
                        );
                        self.after_change(&stream, &mut cmds);
                    }
                    // no re-evaluation: the next scroll or a retry fetches again
                    Err(err @ SyncError::FetchFailed { .. }) => cmds.push(FeedCmd::Report(err)),
                    Err(err) => {
                        cmds.push(FeedCmd::Report(err));
                        self.after_change(&stream, &mut cmds);
                    }
                }
            }
            FeedMsg::Push { key, item } => {
                let outcome = self.reconciler.on_push(&key, item);
                if outcome == PushOutcome::MarkedStale {
                    tracing::trace!(stream = %key, "push marked stream stale");
                }
                self.after_change(&key, &mut cmds);
            }
        }
        cmds
    }

    fn ids(&self, stream: &StreamKey) -> Vec<T::Id> {
        self.reconciler
            .cache()
            .items(stream)
            .iter()
            .map(TimedItem::id)
            .collect()
    }

    fn after_change(&mut self, stream: &StreamKey, cmds: &mut Vec<FeedCmd<T>>) {
        let keys: Vec<GroupKey> = self
            .groups
            .iter()
            .filter(|(_, g)| g.stream() == stream)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.sync_group(&key);
            self.evaluate(&key, cmds);
        }
    }

    /// Invalidate layouts on a new head and freeze the scroll bound once
    /// the beginning is known and placed.
    fn sync_group(&mut self, group: &GroupKey) {
        let Some(g) = self.groups.get_mut(group) else {
            return;
        };
        let cache = self.reconciler.cache();
        let items = cache.items(g.stream());
        let head = items.first().map(TimedItem::id);
        if g.sync_head(head.as_ref()) {
            tracing::trace!(group = %group, "newest item changed; layouts invalidated");
        }

        if g.viewport.max_scroll_offset().is_none() && cache.reached_beginning(g.stream()) {
            let oldest = items
                .len()
                .checked_sub(1)
                .and_then(|index| g.layouts.position_of(&items[index].id(), index));
            if let Some(position) = oldest {
                g.viewport.freeze_upper_bound(position);
            }
        }
    }

    fn edges(&self, g: &FeedGroup<T::Id>) -> ScrollEdges {
        let items = self.reconciler.cache().items(g.stream());
        let oldest = items
            .len()
            .checked_sub(1)
            .and_then(|index| g.layouts().position_of(&items[index].id(), index));
        g.viewport()
            .edges(oldest, !items.is_empty(), self.config.edge_margin)
    }

    /// Whether a visible group other than `except` shows `stream` at its
    /// live edge.
    fn shown_elsewhere(&self, stream: &StreamKey, except: &GroupKey) -> bool {
        self.groups.iter().any(|(key, g)| {
            key != except
                && g.is_visible()
                && g.stream() == stream
                && self.edges(g).contains(ScrollEdges::NEWEST)
        })
    }

    fn evaluate(&mut self, group: &GroupKey, cmds: &mut Vec<FeedCmd<T>>) {
        let Some(g) = self.groups.get(group) else {
            return;
        };
        if !g.is_visible() {
            return;
        }
        let stream = g.stream().clone();
        let edges = self.edges(g);
        let sub = self.reconciler.subscription(&stream);
        let at_beginning = self.reconciler.cache().reached_beginning(&stream);

        if edges.contains(ScrollEdges::OLDEST) && !at_beginning {
            self.fetch(PageDirection::Older, &stream, cmds);
        }
        if edges.contains(ScrollEdges::NEWEST) {
            if !sub.is_up_to_date {
                self.fetch(PageDirection::Newer, &stream, cmds);
            } else if !sub.is_subscribed() {
                self.subscribe(&stream, cmds);
            }
        } else if sub.is_subscribed() && !self.shown_elsewhere(&stream, group) {
            tracing::debug!(group = %group, stream = %stream, "live edge off screen; stopping stream");
            self.unsubscribe(&stream, cmds);
        }
    }

    fn fetch(&mut self, direction: PageDirection, stream: &StreamKey, cmds: &mut Vec<FeedCmd<T>>) {
        let limit = self.config.page_size;
        let begun = match direction {
            PageDirection::Older => self.reconciler.begin_older(stream, limit),
            PageDirection::Newer => self.reconciler.begin_newer(stream, limit),
        };
        match begun {
            Ok(Some(fetch)) => cmds.push(FeedCmd::Fetch(fetch)),
            Ok(None) => {}
            Err(SyncError::AlreadyPending { .. }) => {
                tracing::trace!(stream = %stream, ?direction, "fetch coalesced with pending one");
            }
            Err(err) => cmds.push(FeedCmd::Report(err)),
        }
    }

    fn subscribe(&mut self, stream: &StreamKey, cmds: &mut Vec<FeedCmd<T>>) {
        if let Err(err) = self.reconciler.subscribe(stream) {
            cmds.push(FeedCmd::Report(err));
        }
    }

    fn unsubscribe(&mut self, stream: &StreamKey, cmds: &mut Vec<FeedCmd<T>>) {
        if let Err(err) = self.reconciler.unsubscribe(stream) {
            cmds.push(FeedCmd::Report(err));
        }
    }
}
