#![forbid(unsafe_code)]

//! View state of one group: which stream it shows, where it is scrolled and
//! how its items are laid out.

use std::fmt::Debug;
use std::hash::Hash;

use feedsync_core::key::StreamKey;
use feedsync_viewport::{Layouts, Viewport};

/// A mounted view over one stream.
#[derive(Debug, Clone)]
pub struct FeedGroup<Id: Clone + Eq + Hash> {
    stream: StreamKey,
    pub(crate) viewport: Viewport,
    pub(crate) layouts: Layouts<Id>,
    pub(crate) visible: bool,
    /// Newest item id seen by this group's layouts; a change invalidates
    /// explicit measurements.
    pub(crate) head: Option<Id>,
}

impl<Id: Clone + Eq + Hash + Debug> FeedGroup<Id> {
    pub(crate) fn new(stream: StreamKey, viewport: Viewport, layouts: Layouts<Id>) -> Self {
        Self {
            stream,
            viewport,
            layouts,
            visible: true,
            head: None,
        }
    }

    #[must_use]
    pub fn stream(&self) -> &StreamKey {
        &self.stream
    }

    #[must_use]
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    #[must_use]
    pub fn layouts(&self) -> &Layouts<Id> {
        &self.layouts
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Invalidate layouts if the newest id moved. Returns whether it did.
    pub(crate) fn sync_head(&mut self, newest: Option<&Id>) -> bool {
        if self.head.as_ref() == newest {
            return false;
        }
        self.head = newest.cloned();
        self.layouts.invalidate();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedsync_core::key::GroupKey;
    use feedsync_viewport::{LayoutMode, Measurement};

    #[test]
    fn head_change_invalidates_measurements() {
        let layouts = Layouts::new(GroupKey::from("feed"), "list", LayoutMode::explicit());
        let mut group: FeedGroup<String> = FeedGroup::new(StreamKey::new("g", "c"), Viewport::new(100.0), layouts);
        group.layouts.measure("list", "a".into(), Measurement::at(-10.0));

        assert!(group.sync_head(Some(&"a".to_string())));
        assert_eq!(group.layouts().position_of(&"a".to_string(), 0), None);

        group.layouts.measure("list", "a".into(), Measurement::at(-10.0));
        assert!(!group.sync_head(Some(&"a".to_string())));
        assert_eq!(group.layouts().position_of(&"a".to_string(), 0), Some(-10.0));
    }
}
