#![forbid(unsafe_code)]

//! feedsync runtime
//!
//! Ties the caches and the viewport model together per mounted group.
//!
//! # Key Components
//!
//! - [`Orchestrator`] - Elm-style state machine: events in, fetch commands out
//! - [`FeedRuntime`] - Threaded driver executing an orchestrator's commands
//! - [`PushSink`] - Cross-thread entry point for pushed items
//! - [`SpanLoader`] - Threaded driver for span-bounded range caches
//! - [`FeedConfig`] - Tunables, optionally read from the environment
//!
//! # How it fits in the system
//! `feedsync-core` defines items, spans and collaborator traits,
//! `feedsync-cache` decides what to fetch and `feedsync-viewport` decides
//! where items are drawn. This crate decides *when*: scrolling near an
//! edge, hiding a group or a new push each lead here.

pub mod config;
pub mod debug_trace;
pub mod group;
pub mod orchestrator;
pub mod runtime;
pub mod span_loader;
mod task;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use config::FeedConfig;
pub use group::FeedGroup;
pub use orchestrator::{FeedCmd, FeedMsg, Orchestrator};
pub use runtime::{FeedRuntime, PushSink};
pub use span_loader::{SpanEvent, SpanLoader};
