#![forbid(unsafe_code)]

//! Layout modes: how an item maps to a position on the scroll axis.
//!
//! A group can hold several named modes (a message list and a timeline,
//! say), exactly one of them active. Explicit modes only know positions for
//! items the renderer has measured; linear modes know every position from
//! the item's index in the newest-first list.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use feedsync_core::animation::lerp;
use feedsync_core::key::GroupKey;

use crate::transition::Transition;
use crate::viewport::Viewport;

/// Position reported by the renderer once an item is laid out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub offset: f64,
    pub offset_top: f64,
    pub offset_bottom: f64,
}

impl Measurement {
    /// A measurement whose extent collapses onto `offset`.
    #[must_use]
    pub fn at(offset: f64) -> Self {
        Self {
            offset,
            offset_top: offset,
            offset_bottom: offset,
        }
    }
}

/// One way of placing items.
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutMode<K: Eq + Hash> {
    /// Positions recorded per item as they are measured.
    Explicit(HashMap<K, Measurement>),
    /// `position = slope * index + intercept`, index 0 being the newest.
    Linear { slope: f64, intercept: f64 },
}

impl<K: Eq + Hash> LayoutMode<K> {
    #[must_use]
    pub fn explicit() -> Self {
        Self::Explicit(HashMap::new())
    }

    #[must_use]
    pub fn linear(slope: f64, intercept: f64) -> Self {
        Self::Linear { slope, intercept }
    }

    /// Position of the item `id` at `index`, if known under this mode.
    #[must_use]
    pub fn offset_of(&self, id: &K, index: usize) -> Option<f64> {
        match self {
            Self::Explicit(offsets) => offsets.get(id).map(|m| m.offset),
            Self::Linear { slope, intercept } => Some(slope * index as f64 + intercept),
        }
    }

    /// Top and bottom edge of the item. Linear items are points.
    #[must_use]
    pub fn extent_of(&self, id: &K, index: usize) -> Option<(f64, f64)> {
        match self {
            Self::Explicit(offsets) => offsets.get(id).map(|m| (m.offset_top, m.offset_bottom)),
            Self::Linear { .. } => self.offset_of(id, index).map(|p| (p, p)),
        }
    }

    fn clear_measurements(&mut self) {
        if let Self::Explicit(offsets) = self {
            offsets.clear();
        }
    }
}

/// Named layout modes of one group, plus any running transition.
#[derive(Debug, Clone)]
pub struct Layouts<K: Clone + Eq + Hash> {
    pub(crate) group: GroupKey,
    pub(crate) modes: HashMap<String, LayoutMode<K>>,
    pub(crate) active: String,
    pub(crate) version: u64,
    pub(crate) transition: Option<Transition<K>>,
    pub(crate) transition_duration: Duration,
}

impl<K: Clone + Eq + Hash + std::fmt::Debug> Layouts<K> {
    /// A group with one active mode.
    #[must_use]
    pub fn new(group: GroupKey, name: impl Into<String>, mode: LayoutMode<K>) -> Self {
        let name = name.into();
        let mut modes = HashMap::new();
        modes.insert(name.clone(), mode);
        Self {
            group,
            modes,
            active: name,
            version: 0,
            transition: None,
            transition_duration: Duration::from_millis(300),
        }
    }

    #[must_use]
    pub fn with_transition_duration(mut self, duration: Duration) -> Self {
        self.transition_duration = duration;
        self
    }

    #[must_use]
    pub fn group(&self) -> &GroupKey {
        &self.group
    }

    /// Add or replace a mode. Replacing the active mode bumps the version.
    pub fn insert_mode(&mut self, name: impl Into<String>, mode: LayoutMode<K>) {
        let name = name.into();
        if name == self.active {
            self.version += 1;
        }
        self.modes.insert(name, mode);
    }

    #[must_use]
    pub fn mode(&self, name: &str) -> Option<&LayoutMode<K>> {
        self.modes.get(name)
    }

    #[must_use]
    pub fn active_name(&self) -> &str {
        &self.active
    }

    #[must_use]
    pub fn active_mode(&self) -> Option<&LayoutMode<K>> {
        self.modes.get(&self.active)
    }

    /// Change counter, bumped whenever any position may have moved.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Record a renderer measurement under the explicit mode `mode`.
    ///
    /// Returns `false` when there is no such explicit mode.
    pub fn measure(&mut self, mode: &str, id: K, measurement: Measurement) -> bool {
        let Some(LayoutMode::Explicit(offsets)) = self.modes.get_mut(mode) else {
            return false;
        };
        if offsets.insert(id, measurement) != Some(measurement) {
            self.version += 1;
        }
        true
    }

    /// Forget every explicit measurement. Called when the item set changes
    /// identity, e.g. a new newest item arrived.
    pub fn invalidate(&mut self) {
        for mode in self.modes.values_mut() {
            mode.clear_measurements();
        }
        self.version += 1;
        tracing::trace!(group = %self.group, version = self.version, "layout invalidated");
    }

    /// Position of `id` under the active mode, interpolated while a
    /// transition runs.
    ///
    /// During a transition an item moves from its old position plus the
    /// transition offset towards its new position. An item the old mode
    /// never placed snaps straight to the new one.
    #[must_use]
    pub fn position_of(&self, id: &K, index: usize) -> Option<f64> {
        let target = self.active_mode()?.offset_of(id, index)?;
        let Some(transition) = &self.transition else {
            return Some(target);
        };
        let from = self
            .modes
            .get(&transition.from)
            .and_then(|mode| mode.offset_of(id, index));
        match from {
            Some(from) => Some(lerp(from + transition.delta, target, transition.tween.progress())),
            None => Some(target),
        }
    }

    /// Ids (newest first) whose extent intersects the visible window.
    #[must_use]
    pub fn visible_items(&self, ids: &[K], viewport: &Viewport) -> Vec<K> {
        let Some(mode) = self.active_mode() else {
            return Vec::new();
        };
        ids.iter()
            .enumerate()
            .filter(|(index, id)| {
                let Some(position) = self.position_of(id, *index) else {
                    return false;
                };
                let (top, bottom) = mode
                    .extent_of(id, *index)
                    .map_or((position, position), |(top, bottom)| {
                        let shift = position - mode.offset_of(id, *index).unwrap_or(position);
                        (top + shift, bottom + shift)
                    });
                let lo = top.min(bottom) + viewport.offset();
                let hi = top.max(bottom) + viewport.offset();
                hi >= -viewport.height() && lo <= 0.0
            })
            .map(|(_, id)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layouts() -> Layouts<String> {
        let mut layouts = Layouts::new(GroupKey::from("feed"), "list", LayoutMode::explicit());
        layouts.insert_mode("timeline", LayoutMode::linear(-21.0, -10.0));
        layouts
    }

    #[test]
    fn linear_offsets_follow_index() {
        let mode: LayoutMode<String> = LayoutMode::linear(-21.0, -10.0);
        assert_eq!(mode.offset_of(&"x".into(), 5), Some(-115.0));
        assert_eq!(mode.extent_of(&"x".into(), 0), Some((-10.0, -10.0)));
    }

    #[test]
    fn explicit_offsets_need_measurement() {
        let mut layouts = layouts();
        assert_eq!(layouts.position_of(&"m1".into(), 0), None);
        assert!(layouts.measure("list", "m1".into(), Measurement::at(-40.0)));
        assert_eq!(layouts.position_of(&"m1".into(), 0), Some(-40.0));
        assert!(!layouts.measure("timeline", "m1".into(), Measurement::at(-1.0)));
        assert!(!layouts.measure("missing", "m1".into(), Measurement::at(-1.0)));
    }

    #[test]
    fn version_bumps_on_change_only() {
        let mut layouts = layouts();
        let v0 = layouts.version();
        layouts.measure("list", "m1".into(), Measurement::at(-40.0));
        let v1 = layouts.version();
        assert!(v1 > v0);
        layouts.measure("list", "m1".into(), Measurement::at(-40.0));
        assert_eq!(layouts.version(), v1);
        layouts.invalidate();
        assert!(layouts.version() > v1);
        assert_eq!(layouts.position_of(&"m1".into(), 0), None);
    }

    #[test]
    fn visible_items_respect_extent() {
        let mut layouts = layouts();
        layouts.measure(
            "list",
            "tall".into(),
            Measurement {
                offset: -150.0,
                offset_top: -250.0,
                offset_bottom: -90.0,
            },
        );
        layouts.measure("list", "far".into(), Measurement::at(-400.0));
        let ids = vec!["tall".to_string(), "far".to_string(), "unmeasured".to_string()];
        let vp = Viewport::new(100.0);
        assert_eq!(layouts.visible_items(&ids, &vp), ["tall"]);
    }
}
