//! Layer generation tracker
//!
//! Tracks how many times a layer has been successfully synchronized and
//! which snapshot it last converged to. Each live layer owns one tracker.

/// Generation and ordering bookkeeping for one layer.
///
/// - `generation`: bumped on every synchronization that changed the layer
/// - `last_sequence`: sequence of the newest snapshot the layer converged to
#[derive(Debug, Clone, Default)]
pub struct GenerationTracker {
    generation: u64,
    last_sequence: u64,
}

impl GenerationTracker {
    /// Create a tracker at generation 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Sequence of the newest snapshot the layer converged to (0 = none).
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Whether a snapshot with `sequence` was produced before the one already applied.
    pub fn is_stale(&self, sequence: u64) -> bool {
        sequence < self.last_sequence
    }

    /// Record a synchronization that changed the layer.
    ///
    /// Returns the new generation.
    pub fn bump(&mut self, sequence: u64) -> u64 {
        self.generation += 1;
        self.record_converged(sequence);
        self.generation
    }

    /// Record that the layer already matches the snapshot `sequence`.
    pub fn record_converged(&mut self, sequence: u64) {
        self.last_sequence = self.last_sequence.max(sequence);
    }
}
