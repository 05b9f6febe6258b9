#![forbid(unsafe_code)]

//! Switching a group's active layout mode around a pivot item.
//!
//! # Protocol
//!
//! 1. Pick the pivot: the caller's, or the item nearest the middle of the
//!    window under the current mode.
//! 2. Both the current and the target mode must place the pivot, otherwise
//!    the switch is refused with [`SyncError::TransitionNotReady`] and
//!    nothing changes.
//! 3. `target(pivot) - current(pivot)` is applied to the viewport offset.
//!    The viewport clamps it, so the change the offset actually took is
//!    kept as the transition offset; the target becomes active.
//! 4. [`Layouts::position_of`] interpolates while the tween runs;
//!    [`Layouts::tick`] ends the transition when it completes.

use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use feedsync_core::animation::Tween;
use feedsync_core::error::SyncError;

use crate::layout::Layouts;
use crate::viewport::Viewport;

/// Snapshot kept while a transition runs.
#[derive(Debug, Clone)]
pub(crate) struct Transition<K> {
    pub(crate) from: String,
    pub(crate) delta: f64,
    pub(crate) tween: Tween,
    pub(crate) pivot: K,
}

/// A transition that was started.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionStart<K> {
    pub pivot: K,
    /// Offset change after clamping. Zero when the viewport could not move,
    /// e.g. at the live edge.
    pub delta: f64,
}

impl<K: Clone + Eq + Hash + Debug> Layouts<K> {
    /// Switch the active mode to `to`, keeping `pivot` (or the item nearest
    /// the window's middle) in place.
    ///
    /// `ids` is the group's item list, newest first. Returns `Ok(None)`
    /// when `to` is already active.
    pub fn begin_transition(
        &mut self,
        to: &str,
        ids: &[K],
        pivot: Option<&K>,
        viewport: &mut Viewport,
    ) -> Result<Option<TransitionStart<K>>, SyncError> {
        if to == self.active {
            return Ok(None);
        }
        let Some(target) = self.modes.get(to) else {
            return Err(self.not_ready(None, "unknown target mode"));
        };
        let Some(current) = self.active_mode() else {
            return Err(self.not_ready(None, "no active mode"));
        };

        let pivot = match pivot {
            Some(id) => ids.iter().position(|candidate| candidate == id).map(|i| (i, id.clone())),
            None => {
                let middle = -viewport.height() / 2.0;
                ids.iter()
                    .enumerate()
                    .filter_map(|(i, id)| {
                        let pos = current.offset_of(id, i)?;
                        Some((i, id, (pos + viewport.offset() - middle).abs()))
                    })
                    .min_by(|a, b| a.2.total_cmp(&b.2))
                    .map(|(i, id, _)| (i, id.clone()))
            }
        };
        let Some((index, pivot)) = pivot else {
            return Err(self.not_ready(None, "no pivot item"));
        };

        let (Some(from_pos), Some(to_pos)) =
            (current.offset_of(&pivot, index), target.offset_of(&pivot, index))
        else {
            return Err(self.not_ready(Some(&pivot), "pivot unmeasured"));
        };

        let before = viewport.offset();
        viewport.shift(to_pos - from_pos);
        let delta = viewport.offset() - before;

        let from = std::mem::replace(&mut self.active, to.to_owned());
        tracing::debug!(
            group = %self.group,
            from = %from,
            to,
            ?pivot,
            delta,
            "layout transition started"
        );
        self.transition = Some(Transition {
            from,
            delta,
            tween: Tween::new(self.transition_duration),
            pivot: pivot.clone(),
        });
        self.version += 1;

        Ok(Some(TransitionStart { pivot, delta }))
    }

    fn not_ready(&self, pivot: Option<&K>, why: &str) -> SyncError {
        tracing::warn!(group = %self.group, ?pivot, why, "layout transition not ready");
        SyncError::TransitionNotReady {
            group: self.group.clone(),
            pivot: pivot.map(|id| format!("{id:?}")),
        }
    }

    /// Advance a running transition. Returns `true` on the tick that ends
    /// it.
    pub fn tick(&mut self, dt: Duration) -> bool {
        let Some(transition) = self.transition.as_mut() else {
            return false;
        };
        transition.tween.advance(dt);
        self.version += 1;
        if transition.tween.is_done() {
            self.transition = None;
            tracing::debug!(group = %self.group, "layout transition finished");
            return true;
        }
        false
    }

    #[must_use]
    pub fn is_transitioning(&self) -> bool {
        self.transition.is_some()
    }

    /// Offset applied when the running transition started.
    #[must_use]
    pub fn transition_offset(&self) -> Option<f64> {
        self.transition.as_ref().map(|t| t.delta)
    }

    /// Mode that was active before the running transition.
    #[must_use]
    pub fn prev_mode(&self) -> Option<&str> {
        self.transition.as_ref().map(|t| t.from.as_str())
    }

    #[must_use]
    pub fn transition_pivot(&self) -> Option<&K> {
        self.transition.as_ref().map(|t| &t.pivot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{LayoutMode, Measurement};
    use feedsync_core::key::GroupKey;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("m{i}")).collect()
    }

    fn timeline_to_list() -> Layouts<String> {
        let mut layouts = Layouts::new(GroupKey::from("feed"), "timeline", LayoutMode::linear(-21.0, -10.0));
        layouts.insert_mode("list", LayoutMode::explicit());
        layouts
    }

    #[test]
    fn pivot_delta_shifts_viewport() {
        let mut layouts = timeline_to_list();
        layouts.measure("list", "m5".into(), Measurement::at(-130.0));
        let mut vp = Viewport::new(400.0);
        vp.shift(200.0);

        let start = layouts
            .begin_transition("list", &ids(10), Some(&"m5".to_string()), &mut vp)
            .unwrap()
            .unwrap();
        assert_eq!(start.delta, -15.0);
        assert_eq!(vp.offset(), 185.0);
        assert_eq!(layouts.transition_offset(), Some(-15.0));
        assert_eq!(layouts.prev_mode(), Some("timeline"));
        assert_eq!(layouts.active_name(), "list");
    }

    #[test]
    fn unmeasured_pivot_is_not_ready_and_changes_nothing() {
        let mut layouts = timeline_to_list();
        let mut vp = Viewport::new(400.0);
        vp.shift(200.0);
        let version = layouts.version();

        let err = layouts
            .begin_transition("list", &ids(10), Some(&"m5".to_string()), &mut vp)
            .unwrap_err();
        assert!(matches!(err, SyncError::TransitionNotReady { pivot: Some(_), .. }));
        assert_eq!(vp.offset(), 200.0);
        assert_eq!(layouts.active_name(), "timeline");
        assert!(!layouts.is_transitioning());
        assert_eq!(layouts.version(), version);
    }

    #[test]
    fn default_pivot_is_nearest_window_middle() {
        let mut layouts = timeline_to_list();
        for (i, id) in ids(20).into_iter().enumerate() {
            layouts.measure("list", id, Measurement::at(-30.0 * i as f64));
        }
        // middle of a 200px window is -100; m4 sits at -21*4-10 = -94
        let mut vp = Viewport::new(200.0);
        let start = layouts.begin_transition("list", &ids(20), None, &mut vp).unwrap().unwrap();
        assert_eq!(start.pivot, "m4");
        // the -26 shift is clamped away at the live edge
        assert_eq!(start.delta, 0.0);
        assert_eq!(vp.offset(), 0.0);
    }

    #[test]
    fn clamped_shift_interpolates_from_old_position() {
        let mut layouts = timeline_to_list().with_transition_duration(Duration::from_millis(100));
        layouts.measure("list", "m5".into(), Measurement::at(-150.0));
        let mut vp = Viewport::new(400.0);
        vp.shift(10.0);

        // m5 moves -115 -> -150; only -10 of the -35 fits above zero
        let m5 = "m5".to_string();
        let start = layouts.begin_transition("list", &ids(10), Some(&m5), &mut vp).unwrap().unwrap();
        assert_eq!(start.delta, -10.0);
        assert_eq!(vp.offset(), 0.0);
        assert_eq!(layouts.transition_offset(), Some(-10.0));

        // interpolation starts from the old position plus the applied shift
        assert_eq!(layouts.position_of(&m5, 5), Some(-125.0));
        assert!(layouts.tick(Duration::from_millis(100)));
        assert_eq!(layouts.position_of(&m5, 5), Some(-150.0));
    }

    #[test]
    fn interpolation_runs_then_clears() {
        let mut layouts = timeline_to_list().with_transition_duration(Duration::from_millis(100));
        for (i, id) in ids(10).into_iter().enumerate() {
            layouts.measure("list", id, Measurement::at(-20.0 * i as f64 - 20.0));
        }
        let mut vp = Viewport::new(400.0);
        vp.shift(100.0);
        let start = layouts
            .begin_transition("list", &ids(10), Some(&"m5".to_string()), &mut vp)
            .unwrap()
            .unwrap();

        let m2 = "m2".to_string();
        let from = -21.0 * 2.0 - 10.0 + start.delta;
        let to = -60.0;
        assert_eq!(layouts.position_of(&m2, 2), Some(from));

        assert!(!layouts.tick(Duration::from_millis(50)));
        let mid = layouts.position_of(&m2, 2).unwrap();
        assert!(mid < from.max(to) && mid > from.min(to));

        assert!(layouts.tick(Duration::from_millis(60)));
        assert!(!layouts.is_transitioning());
        assert_eq!(layouts.position_of(&m2, 2), Some(to));
    }

    #[test]
    fn item_unknown_to_old_mode_snaps() {
        let mut layouts = Layouts::new(GroupKey::from("feed"), "a", LayoutMode::<String>::explicit());
        layouts.insert_mode("b", LayoutMode::explicit());
        layouts.measure("a", "p".into(), Measurement::at(-50.0));
        layouts.measure("b", "p".into(), Measurement::at(-60.0));
        layouts.measure("b", "new".into(), Measurement::at(-10.0));
        let mut vp = Viewport::new(400.0);
        let ids = vec!["new".to_string(), "p".to_string()];
        layouts.begin_transition("b", &ids, None, &mut vp).unwrap();
        assert!(layouts.is_transitioning());
        assert_eq!(layouts.position_of(&"new".to_string(), 0), Some(-10.0));
    }

    #[test]
    fn switching_to_active_mode_is_noop() {
        let mut layouts = timeline_to_list();
        let mut vp = Viewport::new(400.0);
        assert_eq!(layouts.begin_transition("timeline", &ids(3), None, &mut vp), Ok(None));
    }
}
