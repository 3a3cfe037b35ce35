//! Layer synchronization
//!
//! Implements:
//! - Keyed diffing of snapshots against live layer state
//! - Atomic incremental patches and full recreation with state carry-over
//! - Per-layer debouncing with a single update in flight
//! - Generation tracking and stale snapshot rejection

mod diff;
mod engine;
mod message;
mod preserve;
mod scheduler;
mod tracker;

pub use diff::*;
pub use engine::*;
pub use message::*;
pub use preserve::*;
pub use scheduler::*;
pub use tracker::*;
