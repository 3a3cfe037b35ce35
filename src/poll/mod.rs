//! Background polling
//!
//! One task per layer: fetch on an interval, hand the snapshot to the
//! engine's scheduler, and react to refresh/reset commands from the UI.

mod poller;

pub use poller::*;
