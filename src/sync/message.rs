//! Synchronization outcomes and layer notifications.

use crate::core::{LayerId, SyncError};

use super::diff::DiffCounts;

/// Lifecycle phase of a layer in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerPhase {
    /// Registered but never rendered.
    Uninitialized,
    /// Rendered and idle.
    Live,
    /// A synchronization is running.
    Synchronizing,
}

/// How a layer is kept up to date, fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerMode {
    /// Patched in place with add/update/delete batches.
    Incremental,
    /// Torn down and rebuilt from the full snapshot.
    RecreateOnly,
}

/// Why a snapshot was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreserveReason {
    /// Empty snapshot on a layer that disallows empty updates.
    EmptySnapshot,
    /// Degraded fallback snapshot; never authoritative.
    DegradedSnapshot,
    /// Snapshot produced before the one already applied.
    StaleSnapshot,
}

/// Result of one `synchronize` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A batch was applied in place.
    Patched {
        /// Mutation counts.
        counts: DiffCounts,
        /// Generation after the patch.
        generation: u64,
    },
    /// The layer instance was rebuilt.
    Recreated {
        /// Features in the new instance.
        features: usize,
        /// Generation after the rebuild.
        generation: u64,
    },
    /// The layer already matched the snapshot.
    NoOp,
    /// The snapshot was deliberately ignored; the layer is unchanged.
    Preserved(PreserveReason),
    /// Applying failed; the layer is unchanged and retried on the next poll.
    Failed(SyncError),
    /// The layer was torn down before the result could be committed.
    Discarded,
}

impl SyncOutcome {
    /// Whether the layer changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Patched { .. } | Self::Recreated { .. })
    }
}

/// Notifications for UI status indicators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerEvent {
    /// An incremental batch was applied.
    Synchronized {
        /// Layer.
        layer_id: LayerId,
        /// Mutation counts.
        counts: DiffCounts,
        /// Generation after the batch.
        generation: u64,
    },
    /// The layer instance was rebuilt.
    Recreated {
        /// Layer.
        layer_id: LayerId,
        /// Features in the new instance.
        features: usize,
        /// Mutation counts against the previous live features.
        counts: DiffCounts,
        /// Generation after the rebuild.
        generation: u64,
    },
    /// Visibility changed.
    VisibilityChanged {
        /// Layer.
        layer_id: LayerId,
        /// New visibility.
        visible: bool,
    },
    /// Filter expression changed.
    FilterChanged {
        /// Layer.
        layer_id: LayerId,
        /// New filter.
        filter: Option<String>,
    },
    /// A snapshot was ignored.
    Preserved {
        /// Layer.
        layer_id: LayerId,
        /// Why.
        reason: PreserveReason,
    },
    /// A synchronization failed; stale data remains displayed.
    SyncFailed {
        /// Layer.
        layer_id: LayerId,
        /// Failure.
        error: SyncError,
    },
}

/// Point-in-time view of a layer for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerStatus {
    /// Layer.
    pub layer_id: LayerId,
    /// Phase.
    pub phase: LayerPhase,
    /// Mode.
    pub mode: LayerMode,
    /// Number of live features.
    pub features: usize,
    /// Generation.
    pub generation: u64,
    /// Visibility.
    pub visible: bool,
    /// Filter expression.
    pub filter: Option<String>,
    /// Draw-order rank.
    pub draw_order: usize,
}
