//! Layer synchronization engine
//!
//! Owns the live state of every layer and turns new snapshots into renderer
//! mutations. Each layer is either patched in place with a single atomic
//! edit batch, or torn down and rebuilt with its visibility, filter and draw
//! order carried over.
//!
//! Nothing here returns an error to the polling path: failures are logged,
//! reported as [`SyncOutcome::Failed`] and [`LayerEvent::SyncFailed`], and
//! the previous live state stays authoritative until a later call succeeds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::LayerConfig;
use crate::core::{
    DEFAULT_DEBOUNCE, EVENT_CHANNEL_CAPACITY, GeometryKind, GeometryProfile, LayerError,
    LayerId, LayerProperties, LayerRenderer, RenderError, Snapshot, SyncError,
};

use super::diff::{KeyedFeatures, diff, key_snapshot};
use super::message::{LayerEvent, LayerMode, LayerPhase, LayerStatus, PreserveReason, SyncOutcome};
use super::preserve::{LayerStatePreserver, LayerStateSnapshot};
use super::scheduler::{ApplyFn, ApplyFuture, UpdateScheduler};
use super::tracker::GenerationTracker;

/// Live state of one layer.
struct LiveLayer {
    config: LayerConfig,
    mode: LayerMode,
    phase: LayerPhase,
    features: Arc<KeyedFeatures>,
    properties: LayerProperties,
    /// Geometry kind of the rendered instance; sticky across empty snapshots.
    geometry: Option<GeometryKind>,
    tracker: GenerationTracker,
    /// The previous instance was torn down but its replacement failed.
    instance_missing: bool,
    /// Registration epoch; a torn-down layer never matches again.
    epoch: u64,
    /// Held for the whole of a synchronization.
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl LiveLayer {
    fn new(config: LayerConfig, mode: LayerMode, epoch: u64) -> Self {
        Self {
            properties: config.initial.clone(),
            config,
            mode,
            phase: LayerPhase::Uninitialized,
            features: Arc::new(KeyedFeatures::new()),
            geometry: None,
            tracker: GenerationTracker::new(),
            instance_missing: false,
            epoch,
            gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn is_rendered(&self) -> bool {
        self.phase != LayerPhase::Uninitialized && !self.instance_missing
    }

    fn accepts_patch(&self, profile: GeometryProfile) -> bool {
        if self.mode != LayerMode::Incremental || !self.is_rendered() {
            return false;
        }
        match profile {
            GeometryProfile::Empty => true,
            GeometryProfile::Uniform(kind) => self.geometry.is_none_or(|g| g == kind),
            GeometryProfile::Mixed => false,
        }
    }

    fn status(&self, layer_id: &LayerId) -> LayerStatus {
        LayerStatus {
            layer_id: layer_id.clone(),
            phase: self.phase,
            mode: self.mode,
            features: self.features.len(),
            generation: self.tracker.generation(),
            visible: self.properties.visible,
            filter: self.properties.filter.clone(),
            draw_order: self.properties.draw_order,
        }
    }
}

/// What a synchronization will do, decided under the layer lock.
enum Plan {
    Patch,
    Recreate { rendered: bool },
}

/// Layer state a synchronization started from.
struct Baseline {
    epoch: u64,
    phase: LayerPhase,
    live: Arc<KeyedFeatures>,
    properties: LayerProperties,
}

/// Synchronization engine, generic over the map renderer.
///
/// Create with [`LayerSyncEngine::new`]; the engine is always held in an
/// `Arc` so scheduled updates can reach it.
pub struct LayerSyncEngine<R: LayerRenderer> {
    renderer: Arc<R>,
    layers: Mutex<HashMap<LayerId, LiveLayer>>,
    scheduler: UpdateScheduler,
    events: broadcast::Sender<LayerEvent>,
    next_epoch: AtomicU64,
    this: Weak<Self>,
}

impl<R: LayerRenderer> LayerSyncEngine<R> {
    /// Create an engine driving `renderer`.
    pub fn new(renderer: Arc<R>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new_cyclic(|this| Self {
            renderer,
            layers: Mutex::new(HashMap::new()),
            scheduler: UpdateScheduler::new(DEFAULT_DEBOUNCE),
            events,
            next_epoch: AtomicU64::new(1),
            this: this.clone(),
        })
    }

    /// Subscribe to layer notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LayerEvent> {
        self.events.subscribe()
    }

    /// Register a layer that has not been rendered yet.
    ///
    /// The incremental/recreate decision is made here, once.
    pub fn register_layer(&self, config: LayerConfig) -> Result<LayerMode, LayerError> {
        config.validate()?;
        let layer_id = config.layer_id.clone();
        let mode = self.resolve_mode(&config);
        let debounce = config.debounce;

        {
            let mut layers = self.layers.lock();
            if layers.contains_key(&layer_id) {
                return Err(LayerError::AlreadyRegistered(layer_id.to_string()));
            }
            let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
            layers.insert(layer_id.clone(), LiveLayer::new(config, mode, epoch));
        }

        self.scheduler.set_debounce(&layer_id, debounce);
        info!(layer = %layer_id, ?mode, "registered layer");
        Ok(mode)
    }

    /// Register a layer that is already on the map, seeding its live state
    /// from the renderer's visible-feature query.
    ///
    /// Returns the number of features seeded.
    pub async fn reattach_layer(&self, config: LayerConfig) -> Result<usize, LayerError> {
        config.validate()?;
        let layer_id = config.layer_id.clone();
        if self.layers.lock().contains_key(&layer_id) {
            return Err(LayerError::AlreadyRegistered(layer_id.to_string()));
        }

        let features = self.renderer.query_features(&layer_id).await?;
        let properties = match self.renderer.layer_properties(&layer_id) {
            Ok(properties) => properties,
            Err(e) => {
                warn!(layer = %layer_id, error = %e, "reattached layer has unreadable properties");
                config.initial.clone()
            }
        };

        let seeded = Snapshot::new(features);
        let geometry = match seeded.geometry_profile() {
            GeometryProfile::Uniform(kind) => Some(kind),
            GeometryProfile::Empty | GeometryProfile::Mixed => None,
        };
        let mode = self.resolve_mode(&config);
        let debounce = config.debounce;

        {
            let mut layers = self.layers.lock();
            if layers.contains_key(&layer_id) {
                return Err(LayerError::AlreadyRegistered(layer_id.to_string()));
            }
            let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
            let mut layer = LiveLayer::new(config, mode, epoch);
            layer.phase = LayerPhase::Live;
            layer.features = Arc::new(key_snapshot(&seeded));
            layer.properties = properties;
            layer.geometry = geometry;
            layers.insert(layer_id.clone(), layer);
        }

        self.scheduler.set_debounce(&layer_id, debounce);
        info!(layer = %layer_id, features = seeded.len(), ?mode, "reattached layer");
        Ok(seeded.len())
    }

    /// Remove a layer: cancel pending work, wait for an in-flight
    /// synchronization to finish (its result is discarded), and tear down
    /// the rendered instance.
    ///
    /// Returns `false` if the layer was not registered.
    pub async fn teardown_layer(&self, layer_id: &LayerId) -> Result<bool, LayerError> {
        self.scheduler.cancel(layer_id);

        let Some(layer) = self.layers.lock().remove(layer_id) else {
            return Ok(false);
        };
        let _gate = layer.gate.lock().await;

        match self.renderer.remove_layer(layer_id).await {
            Ok(()) => {}
            Err(RenderError::LayerNotFound(_)) => {
                debug!(layer = %layer_id, "no rendered instance to remove");
            }
            Err(e) => return Err(e.into()),
        }
        info!(layer = %layer_id, "tore down layer");
        Ok(true)
    }

    /// Drop any update waiting in the scheduler for `layer_id`.
    ///
    /// The layer stays registered and keeps its debounce window.
    pub fn cancel_pending(&self, layer_id: &LayerId) -> bool {
        let cancelled = self.scheduler.cancel(layer_id);
        if let Some(debounce) = self.layers.lock().get(layer_id).map(|l| l.config.debounce) {
            self.scheduler.set_debounce(layer_id, debounce);
        }
        cancelled
    }

    /// Queue `snapshot` for `layer_id` through the update scheduler.
    ///
    /// Requests within the layer's debounce window coalesce to the latest.
    pub fn submit(&self, layer_id: LayerId, snapshot: Snapshot) {
        let engine = self.this.clone();
        let apply: ApplyFn = Arc::new(move |layer_id: LayerId, snapshot: Snapshot| -> ApplyFuture {
            let engine = engine.clone();
            Box::pin(async move {
                if let Some(engine) = engine.upgrade() {
                    engine.synchronize(&layer_id, snapshot).await;
                }
            })
        });
        self.scheduler.schedule(layer_id, snapshot, apply);
    }

    /// Bring `layer_id` in line with `snapshot`.
    pub async fn synchronize(&self, layer_id: &LayerId, snapshot: Snapshot) -> SyncOutcome {
        let Some((gate, epoch)) = self
            .layers
            .lock()
            .get(layer_id)
            .map(|l| (Arc::clone(&l.gate), l.epoch))
        else {
            debug!(layer = %layer_id, "synchronize for unregistered layer");
            return SyncOutcome::Discarded;
        };
        let _gate = gate.lock().await;

        let (plan, base) = {
            let mut layers = self.layers.lock();
            let Some(layer) = layers.get_mut(layer_id).filter(|l| l.epoch == epoch) else {
                return SyncOutcome::Discarded;
            };

            if let Some(reason) = preserve_reason(layer, &snapshot) {
                drop(layers);
                debug!(layer = %layer_id, ?reason, "preserving current layer state");
                self.emit(LayerEvent::Preserved {
                    layer_id: layer_id.clone(),
                    reason,
                });
                return SyncOutcome::Preserved(reason);
            }

            let plan = if layer.accepts_patch(snapshot.geometry_profile()) {
                Plan::Patch
            } else {
                Plan::Recreate {
                    rendered: layer.is_rendered(),
                }
            };
            let base = Baseline {
                epoch,
                phase: layer.phase,
                live: Arc::clone(&layer.features),
                properties: layer.properties.clone(),
            };
            layer.phase = LayerPhase::Synchronizing;
            (plan, base)
        };

        let result = match plan {
            Plan::Patch => self.patch(layer_id, &base, &snapshot).await,
            Plan::Recreate { rendered } => {
                self.recreate(layer_id, &base, rendered, &snapshot).await
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(error) => self.fail(layer_id, &base, error),
        }
    }

    /// Incremental path: one atomic batch, then commit.
    async fn patch(
        &self,
        layer_id: &LayerId,
        base: &Baseline,
        snapshot: &Snapshot,
    ) -> Result<SyncOutcome, SyncError> {
        let delta = diff(&base.live, snapshot);
        if delta.is_empty() {
            return Ok(self.converged(layer_id, base, snapshot));
        }

        let counts = delta.counts();
        let batch = delta.into_batch();
        self.renderer.apply_edits(layer_id, &batch).await?;

        let features = Arc::new(key_snapshot(snapshot));
        let committed = self.commit(layer_id, base, base.properties.clone(), |layer| {
            layer.features = features;
            if let GeometryProfile::Uniform(kind) = snapshot.geometry_profile() {
                layer.geometry = Some(kind);
            }
            layer.tracker.bump(snapshot.sequence())
        });
        let Some(generation) = committed else {
            return Ok(SyncOutcome::Discarded);
        };

        debug!(
            layer = %layer_id,
            added = counts.added,
            updated = counts.updated,
            deleted = counts.deleted,
            generation,
            "patched layer"
        );
        self.emit(LayerEvent::Synchronized {
            layer_id: layer_id.clone(),
            counts,
            generation,
        });
        Ok(SyncOutcome::Patched { counts, generation })
    }

    /// Full recreation: capture, tear down, build, restore, commit.
    ///
    /// A rendered layer that already matches the snapshot is left alone.
    async fn recreate(
        &self,
        layer_id: &LayerId,
        base: &Baseline,
        rendered: bool,
        snapshot: &Snapshot,
    ) -> Result<SyncOutcome, SyncError> {
        let delta = diff(&base.live, snapshot);
        if rendered && delta.is_empty() {
            return Ok(self.converged(layer_id, base, snapshot));
        }
        let counts = delta.counts();

        let preserver = LayerStatePreserver::new(&*self.renderer);
        let state = if rendered {
            preserver.capture_state(layer_id, &base.properties)
        } else {
            LayerStateSnapshot::initial(base.properties.clone())
        };

        if rendered {
            match self.renderer.remove_layer(layer_id).await {
                Ok(()) => {}
                Err(RenderError::LayerNotFound(_)) => {
                    debug!(layer = %layer_id, "instance already gone before recreation");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Err(e) = self
            .renderer
            .create_layer(layer_id, snapshot.features(), state.properties.draw_order)
            .await
        {
            if rendered {
                self.mark_missing(layer_id, base.epoch);
            }
            return Err(e.into());
        }

        let effective = preserver.restore_state(layer_id, &state);
        let features = Arc::new(key_snapshot(snapshot));
        let geometry = match snapshot.geometry_profile() {
            GeometryProfile::Uniform(kind) => Some(kind),
            GeometryProfile::Empty | GeometryProfile::Mixed => None,
        };
        let count = features.len();

        let committed = self.commit(layer_id, base, effective, |layer| {
            layer.features = features;
            layer.geometry = geometry;
            layer.instance_missing = false;
            layer.tracker.bump(snapshot.sequence())
        });
        let Some(generation) = committed else {
            return Ok(SyncOutcome::Discarded);
        };

        info!(layer = %layer_id, features = count, generation, "recreated layer");
        self.emit(LayerEvent::Recreated {
            layer_id: layer_id.clone(),
            features: count,
            counts,
            generation,
        });
        Ok(SyncOutcome::Recreated {
            features: count,
            generation,
        })
    }

    /// The layer already shows `snapshot`.
    fn converged(&self, layer_id: &LayerId, base: &Baseline, snapshot: &Snapshot) -> SyncOutcome {
        let committed = self.commit(layer_id, base, base.properties.clone(), |layer| {
            layer.tracker.record_converged(snapshot.sequence());
        });
        match committed {
            Some(()) => SyncOutcome::NoOp,
            None => SyncOutcome::Discarded,
        }
    }

    /// Run `update` on the layer if it is still the registration that
    /// started the synchronization, settle its properties and mark it live.
    ///
    /// `effective` is what the rendered instance shows after the
    /// synchronization.
    fn commit<T>(
        &self,
        layer_id: &LayerId,
        base: &Baseline,
        effective: LayerProperties,
        update: impl FnOnce(&mut LiveLayer) -> T,
    ) -> Option<T> {
        let mut layers = self.layers.lock();
        let Some(layer) = layers.get_mut(layer_id).filter(|l| l.epoch == base.epoch) else {
            debug!(layer = %layer_id, "layer torn down during synchronization, discarding result");
            return None;
        };
        let value = update(layer);
        settle_properties(&*self.renderer, layer_id, layer, &base.properties, effective);
        layer.phase = LayerPhase::Live;
        Some(value)
    }

    fn mark_missing(&self, layer_id: &LayerId, epoch: u64) {
        let mut layers = self.layers.lock();
        if let Some(layer) = layers.get_mut(layer_id).filter(|l| l.epoch == epoch) {
            layer.instance_missing = true;
        }
    }

    fn fail(&self, layer_id: &LayerId, base: &Baseline, error: SyncError) -> SyncOutcome {
        let still_registered = {
            let mut layers = self.layers.lock();
            match layers.get_mut(layer_id).filter(|l| l.epoch == base.epoch) {
                Some(layer) => {
                    layer.phase = base.phase;
                    if matches!(error, SyncError::Render(RenderError::LayerNotFound(_))) {
                        layer.instance_missing = true;
                    }
                    if layer.is_rendered() {
                        let unchanged = base.properties.clone();
                        settle_properties(
                            &*self.renderer,
                            layer_id,
                            layer,
                            &base.properties,
                            unchanged,
                        );
                    }
                    true
                }
                None => false,
            }
        };
        if !still_registered {
            return SyncOutcome::Discarded;
        }

        warn!(layer = %layer_id, error = %error, "synchronization failed, keeping previous state");
        self.emit(LayerEvent::SyncFailed {
            layer_id: layer_id.clone(),
            error: error.clone(),
        });
        SyncOutcome::Failed(error)
    }

    /// Show or hide a layer.
    pub fn set_visibility(&self, layer_id: &LayerId, visible: bool) -> Result<(), LayerError> {
        self.update_properties(
            layer_id,
            |renderer| renderer.set_visibility(layer_id, visible),
            |p| p.visible = visible,
        )?;

        self.emit(LayerEvent::VisibilityChanged {
            layer_id: layer_id.clone(),
            visible,
        });
        Ok(())
    }

    /// Set or clear a layer's filter expression.
    pub fn set_filter(&self, layer_id: &LayerId, filter: Option<String>) -> Result<(), LayerError> {
        let recorded = filter.clone();
        self.update_properties(
            layer_id,
            |renderer| renderer.set_filter(layer_id, filter.as_deref()),
            |p| p.filter = recorded,
        )?;

        self.emit(LayerEvent::FilterChanged {
            layer_id: layer_id.clone(),
            filter,
        });
        Ok(())
    }

    fn update_properties(
        &self,
        layer_id: &LayerId,
        apply: impl FnOnce(&R) -> Result<(), RenderError>,
        record: impl FnOnce(&mut LayerProperties),
    ) -> Result<(), LayerError> {
        let mut layers = self.layers.lock();
        let layer = layers
            .get_mut(layer_id)
            .ok_or_else(|| SyncError::UnknownLayer(layer_id.to_string()))?;
        // Unrendered layers pick the value up at creation, a running
        // synchronization when it commits.
        if layer.is_rendered() && layer.phase != LayerPhase::Synchronizing {
            apply(&*self.renderer)?;
        }
        record(&mut layer.properties);
        Ok(())
    }

    /// Status of one layer.
    pub fn layer_status(&self, layer_id: &LayerId) -> Option<LayerStatus> {
        self.layers.lock().get(layer_id).map(|l| l.status(layer_id))
    }

    /// Status of every layer, ordered by draw order.
    pub fn statuses(&self) -> Vec<LayerStatus> {
        let mut statuses: Vec<_> = self
            .layers
            .lock()
            .iter()
            .map(|(id, l)| l.status(id))
            .collect();
        statuses.sort_by(|a, b| (a.draw_order, &a.layer_id).cmp(&(b.draw_order, &b.layer_id)));
        statuses
    }

    /// Copy of the live features of a layer.
    pub fn live_features(&self, layer_id: &LayerId) -> Option<Arc<KeyedFeatures>> {
        self.layers
            .lock()
            .get(layer_id)
            .map(|l| Arc::clone(&l.features))
    }

    /// Whether an update for the layer is waiting in the scheduler.
    pub fn has_pending_update(&self, layer_id: &LayerId) -> bool {
        self.scheduler.is_pending(layer_id)
    }

    fn resolve_mode(&self, config: &LayerConfig) -> LayerMode {
        if config.supports_incremental_patch && self.renderer.supports_edits(&config.layer_id) {
            LayerMode::Incremental
        } else {
            LayerMode::RecreateOnly
        }
    }

    fn emit(&self, event: LayerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Reconcile properties toggled while a synchronization was running.
///
/// `planned` is the record the synchronization started from and `effective`
/// what the instance shows now. A field the user changed in the meantime is
/// pushed to the renderer; everything else follows the instance.
fn settle_properties<R: LayerRenderer + ?Sized>(
    renderer: &R,
    layer_id: &LayerId,
    layer: &mut LiveLayer,
    planned: &LayerProperties,
    effective: LayerProperties,
) {
    let wanted = std::mem::replace(&mut layer.properties, effective);
    let settled = &mut layer.properties;

    if wanted.visible != planned.visible && wanted.visible != settled.visible {
        match renderer.set_visibility(layer_id, wanted.visible) {
            Ok(()) => settled.visible = wanted.visible,
            Err(e) => warn!(layer = %layer_id, error = %e, "could not apply pending visibility"),
        }
    }
    if wanted.filter != planned.filter && wanted.filter != settled.filter {
        match renderer.set_filter(layer_id, wanted.filter.as_deref()) {
            Ok(()) => settled.filter = wanted.filter,
            Err(e) => warn!(layer = %layer_id, error = %e, "could not apply pending filter"),
        }
    }
}

/// Guards that keep a snapshot from being applied at all.
fn preserve_reason(layer: &LiveLayer, snapshot: &Snapshot) -> Option<PreserveReason> {
    if snapshot.is_degraded() {
        return Some(PreserveReason::DegradedSnapshot);
    }
    if layer.tracker.is_stale(snapshot.sequence()) {
        return Some(PreserveReason::StaleSnapshot);
    }
    if snapshot.is_empty() && !layer.config.allows_empty_updates {
        return Some(PreserveReason::EmptySnapshot);
    }
    None
}
