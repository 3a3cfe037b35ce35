//! Remote snapshot fetching
//!
//! Implements:
//! - Authentication and fetch against a [`SnapshotSource`](crate::core::SnapshotSource)
//! - Exponential retry backoff with a permanent-failure state
//! - Rate-limit cooldown without network I/O
//! - Last-known-good cache with an optional validity window

mod backoff;
mod cache;
mod client;

pub use backoff::*;
pub use cache::*;
pub use client::*;
