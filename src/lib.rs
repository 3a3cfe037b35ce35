//! # livelayer
//!
//! Live layer synchronization for map applications that display
//! periodically refreshed feature datasets (subscribers, outages, fiber
//! drops) on top of a basemap.
//!
//! Instead of clearing and redrawing a layer every poll, the engine keys
//! every feature by a stable identity, computes the minimal add/update/delete
//! set against what is on the map, and applies it as one atomic batch. When
//! a layer cannot be patched in place it is rebuilt with its visibility,
//! filter and draw order carried over.
//!
//! - **Flicker-free**: unchanged features are never touched
//! - **Resilient**: fetch failures and rate limits fall back to the last
//!   good snapshot; an outage never blanks a layer
//! - **Ordered**: per-layer debouncing with one update in flight
//!
//! ## Feature Flags
//!
//! - `fetch` (default): Rate-limited fetch client with a last-known-good cache
//! - `poll` (default): Background per-layer polling tasks
//! - `testing`: Recording renderer and scripted source for downstream tests
//!
//! ## Modules
//!
//! - [`core`]: Data model, collaborator traits, constants, and errors
//! - [`config`]: Layer and fetch configuration, JSON loading
//! - [`sync`]: Diffing, scheduling, state preservation, and the engine
//! - [`fetch`]: Fetch client (requires `fetch` feature)
//! - [`poll`]: Poll loop (requires `poll` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use livelayer::prelude::*;
//!
//! let configs = load_layer_configs(
//!     r#"[
//!         { "layerId": "subscribers", "identityField": "accountNumber" },
//!         { "layerId": "outages", "identityField": "outageId", "allowsEmptyUpdates": true },
//!         { "layerId": "drops", "identityFallback": "salted" }
//!     ]"#,
//! )?;
//!
//! assert!(configs[0].supports_incremental_patch);
//! assert!(configs[1].allows_empty_updates);
//! assert!(!configs[2].supports_incremental_patch);
//! # Ok::<(), ConfigError>(())
//! ```
//!
//! Each configuration is registered with a [`LayerSyncEngine`] wrapping the
//! application's [`LayerRenderer`]; snapshots then flow in through
//! [`LayerSyncEngine::submit`], usually from a poller spawned per layer.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod config;
pub mod sync;

// Fetch client (feature-gated)
#[cfg(feature = "fetch")]
#[cfg_attr(docsrs, doc(cfg(feature = "fetch")))]
pub mod fetch;

// Poll loop (feature-gated)
#[cfg(feature = "poll")]
#[cfg_attr(docsrs, doc(cfg(feature = "poll")))]
pub mod poll;

// Test doubles
#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::config::{
        FetchConfig, FetchConfigBuilder, LayerConfig, LayerConfigBuilder, load_layer_configs,
    };

    pub use crate::sync::{
        DiffCounts, LayerEvent, LayerMode, LayerPhase, LayerStatus, LayerSyncEngine,
        PreserveReason, SyncOutcome,
    };

    #[cfg(feature = "fetch")]
    pub use crate::fetch::{FetchClient, FetchState};

    #[cfg(feature = "poll")]
    pub use crate::poll::{LayerPoller, PollerHandle};
}

// Re-export commonly used items at crate root
pub use crate::core::{
    Feature, FeatureId, LayerError, LayerId, LayerRenderer, RawFeature, Snapshot, SnapshotSource,
};
pub use crate::sync::{LayerSyncEngine, SyncOutcome};

#[cfg(feature = "fetch")]
pub use crate::fetch::FetchClient;

#[cfg(feature = "poll")]
pub use crate::poll::{LayerPoller, PollerHandle};
