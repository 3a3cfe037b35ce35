//! Last-known-good snapshot cache.

use std::time::Duration;

use tokio::time::Instant;

use crate::core::Snapshot;

/// The most recent successful snapshot of a source.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Snapshot as fetched.
    pub snapshot: Snapshot,
    /// When it was fetched.
    pub fetched_at: Instant,
}

/// Single-entry cache owned by one fetch client.
///
/// Writes replace the entry wholesale; readers never see a partial entry.
#[derive(Debug, Clone)]
pub struct FetchCache {
    entry: Option<CacheEntry>,
    ttl: Duration,
}

impl FetchCache {
    /// Create an empty cache. A zero `ttl` never reports the entry fresh.
    pub fn new(ttl: Duration) -> Self {
        Self { entry: None, ttl }
    }

    /// Replace the entry.
    pub fn store(&mut self, snapshot: Snapshot) {
        self.entry = Some(CacheEntry {
            snapshot,
            fetched_at: Instant::now(),
        });
    }

    /// Drop the entry.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    /// Current entry, if any.
    pub fn entry(&self) -> Option<&CacheEntry> {
        self.entry.as_ref()
    }

    /// Whether an entry exists and is younger than the validity window.
    pub fn is_fresh(&self) -> bool {
        match &self.entry {
            Some(entry) if !self.ttl.is_zero() => entry.fetched_at.elapsed() < self.ttl,
            _ => false,
        }
    }

    /// The fresh entry, labelled as cached.
    pub fn fresh(&self) -> Option<Snapshot> {
        if !self.is_fresh() {
            return None;
        }
        self.entry
            .as_ref()
            .map(|e| e.snapshot.served_from_cache(false))
    }

    /// The entry regardless of age, labelled as stale.
    pub fn stale(&self) -> Option<Snapshot> {
        self.entry
            .as_ref()
            .map(|e| e.snapshot.served_from_cache(true))
    }
}
