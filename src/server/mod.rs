//! Live-mode plumbing around the engine
//!
//! ```text
//! ┌───────────────┐   text   ┌──────────┐         ┌────────────┐   SSE   ┌───────────┐
//! │ SourceWatcher │────────>│  Driver  │── ... ─>│ Aggregator │───────>│ EventServer│
//! └───────────────┘          └──────────┘         └────────────┘         └───────────┘
//! ```
//!
//! # Modules
//!
//! - `watcher` - Source file watching
//! - `sse` - HTTP server-sent-events observer transport

pub mod sse;
pub mod watcher;

pub use sse::EventServer;
pub use watcher::{read_source, SourceWatcher, WatcherConfig, WatcherHandle};
