#![forbid(unsafe_code)]

//! Scroll offset model and layout modes for feed rendering.
//!
//! [`Viewport`] tracks the virtual scroll offset and the upper bound
//! discovered once history's beginning is known. [`Layouts`] maps items to
//! positions under named modes and carries pivot-anchored transitions
//! between them.

pub mod layout;
pub mod transition;
pub mod viewport;

pub use layout::{LayoutMode, Layouts, Measurement};
pub use transition::TransitionStart;
pub use viewport::{DEFAULT_HEADROOM, ScrollEdges, ScrollSample, Viewport};
