//! Error types for layer synchronization.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by a remote data source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Credentials were rejected or the token expired.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network failure or upstream 5xx.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Upstream signalled a rate limit.
    #[error("rate limited")]
    RateLimited {
        /// Upstream hint for how long to back off, if any.
        retry_after: Option<Duration>,
    },

    /// Response could not be turned into features.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether this failure should put the source into cooldown.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Errors reported by the rendering collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The target layer does not exist on the map.
    #[error("layer not found: {0}")]
    LayerNotFound(String),

    /// The edit batch was rejected.
    #[error("edit batch rejected: {0}")]
    Rejected(String),

    /// The layer does not expose the requested primitive.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

/// Errors raised while synchronizing one layer.
///
/// These never escape `synchronize`; they are logged and reported through
/// [`SyncOutcome::Failed`](crate::sync::SyncOutcome::Failed).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The renderer rejected an operation.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// The layer was never registered.
    #[error("unknown layer: {0}")]
    UnknownLayer(String),
}

/// Invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Salted identities change every snapshot, so diffing cannot work.
    #[error("layer {0}: salted identity requires supportsIncrementalPatch = false")]
    SaltedIncremental(String),

    /// Poll interval is below the accepted minimum.
    #[error("layer {layer}: poll interval {interval:?} is below {min:?}")]
    PollIntervalTooShort {
        /// Layer id.
        layer: String,
        /// Configured interval.
        interval: Duration,
        /// Accepted minimum.
        min: Duration,
    },

    /// A field holds an unusable value.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The same layer id appears twice.
    #[error("duplicate layer id: {0}")]
    DuplicateLayer(String),

    /// JSON could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level errors.
#[derive(Debug, Error)]
pub enum LayerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// A layer id is already registered.
    #[error("layer already registered: {0}")]
    AlreadyRegistered(String),

    /// Render error outside a synchronization (registration, teardown).
    #[error("render error: {0}")]
    Render(#[from] RenderError),
}

/// Errors from a layer poller handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// The poller task has exited.
    #[error("poller for layer {0} has stopped")]
    Stopped(String),
}
