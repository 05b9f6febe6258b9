#![forbid(unsafe_code)]

//! Tuning knobs for feed orchestration.
//!
//! # Environment
//!
//! [`FeedConfig::from_env`] overlays these on the defaults:
//!
//! | variable | field |
//! |---|---|
//! | `FEEDSYNC_PAGE_SIZE` | `page_size` |
//! | `FEEDSYNC_EDGE_MARGIN` | `edge_margin` |
//! | `FEEDSYNC_TRANSITION_MS` | `transition_duration` |
//!
//! Values that do not parse are ignored with a warning.

use std::env;
use std::time::Duration;

use feedsync_viewport::DEFAULT_HEADROOM;

/// Orchestration settings shared by every group.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FeedConfig {
    /// Items requested per page.
    pub page_size: usize,
    /// How close (in window heights) an edge must be before it counts as
    /// near.
    pub edge_margin: f64,
    /// Length of a layout transition.
    pub transition_duration: Duration,
    /// Gap (in window heights) kept between the frozen scroll bound and the
    /// offset clamp.
    pub upper_bound_headroom: f64,
    /// Stop streaming when a group is hidden, wherever it is scrolled.
    pub hide_unsubscribes: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            edge_margin: 1.0,
            transition_duration: Duration::from_millis(300),
            upper_bound_headroom: DEFAULT_HEADROOM,
            hide_unsubscribes: true,
        }
    }
}

impl FeedConfig {
    /// Defaults overlaid with `FEEDSYNC_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns per variable name.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(size) = parse_var::<usize>(&lookup, "FEEDSYNC_PAGE_SIZE") {
            if size == 0 {
                tracing::warn!(var = "FEEDSYNC_PAGE_SIZE", "page size must be positive; ignored");
            } else {
                config.page_size = size;
            }
        }
        if let Some(margin) = parse_var::<f64>(&lookup, "FEEDSYNC_EDGE_MARGIN") {
            if margin.is_finite() && margin >= 0.0 {
                config.edge_margin = margin;
            } else {
                tracing::warn!(var = "FEEDSYNC_EDGE_MARGIN", margin, "edge margin out of range; ignored");
            }
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "FEEDSYNC_TRANSITION_MS") {
            config.transition_duration = Duration::from_millis(ms);
        }
        config
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub fn with_edge_margin(mut self, margin: f64) -> Self {
        self.edge_margin = margin;
        self
    }

    #[must_use]
    pub fn with_transition_duration(mut self, duration: Duration) -> Self {
        self.transition_duration = duration;
        self
    }

    #[must_use]
    pub fn with_upper_bound_headroom(mut self, headroom: f64) -> Self {
        self.upper_bound_headroom = headroom;
        self
    }

    #[must_use]
    pub fn with_hide_unsubscribes(mut self, on: bool) -> Self {
        self.hide_unsubscribes = on;
        self
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "unparsable config value; using default");
            None
        }
    }
}
