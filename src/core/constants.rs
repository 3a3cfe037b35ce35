//! Default timings and limits for layer synchronization.
//!
//! Per-layer and per-source configuration may override every value here.

use std::time::Duration;

// =============================================================================
// SCHEDULING
// =============================================================================

/// Debounce window within which repeated updates for a layer coalesce.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Interval between background refreshes of a layer.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest poll interval accepted by configuration validation.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// FETCHING
// =============================================================================

/// Cooldown after an upstream rate-limit response.
///
/// Upstream windows are typically 60 seconds; the extra 10 gives margin.
pub const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(70);

/// First retry delay; doubles on every subsequent attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Ceiling for a single retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Attempts per fetch before a source is marked permanently failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// =============================================================================
// LAYERS
// =============================================================================

/// Capacity of the layer event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of a poller's command channel.
pub const COMMAND_CHANNEL_CAPACITY: usize = 16;
