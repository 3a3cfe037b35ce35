//! Test doubles for the collaborator traits.
//!
//! [`RecordingRenderer`] is an in-memory map widget that records every call
//! and can be told to fail; [`ScriptedSource`] replays queued responses.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use crate::core::{
    Attributes, EditBatch, Feature, FeatureId, FetchError, Geometry, LayerId, LayerProperties,
    LayerRenderer, Position, RawFeature, RenderError, SnapshotSource,
};

/// A call received by [`RecordingRenderer`].
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    /// `apply_edits`.
    ApplyEdits {
        /// Layer.
        layer: LayerId,
        /// Batch.
        batch: EditBatch,
    },
    /// `create_layer`.
    Create {
        /// Layer.
        layer: LayerId,
        /// Feature count.
        features: usize,
        /// Draw order.
        draw_order: usize,
    },
    /// `remove_layer`.
    Remove {
        /// Layer.
        layer: LayerId,
    },
}

#[derive(Debug, Default)]
struct RenderedLayer {
    features: BTreeMap<FeatureId, Feature>,
    properties: LayerProperties,
}

#[derive(Debug)]
struct RendererState {
    layers: HashMap<LayerId, RenderedLayer>,
    calls: Vec<RenderCall>,
    edits_supported: bool,
    fail_applies: bool,
    fail_creates: bool,
    fail_property_reads: bool,
    fail_property_writes: bool,
    apply_delay: Duration,
}

/// In-memory renderer.
///
/// Batches are validated before any mutation so a rejected batch leaves the
/// layer untouched, like the real widget.
#[derive(Debug)]
pub struct RecordingRenderer {
    state: Mutex<RendererState>,
}

impl Default for RecordingRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingRenderer {
    /// Renderer supporting edits, with no layers.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RendererState {
                layers: HashMap::new(),
                calls: Vec::new(),
                edits_supported: true,
                fail_applies: false,
                fail_creates: false,
                fail_property_reads: false,
                fail_property_writes: false,
                apply_delay: Duration::ZERO,
            }),
        }
    }

    /// Renderer whose layers lack the edit-apply primitive.
    pub fn without_edits() -> Self {
        let renderer = Self::new();
        renderer.state.lock().edits_supported = false;
        renderer
    }

    /// Pretend a layer is already on the map.
    pub fn seed_layer(&self, layer: &LayerId, features: Vec<Feature>, properties: LayerProperties) {
        let features = features.into_iter().map(|f| (f.id().clone(), f)).collect();
        self.state.lock().layers.insert(
            layer.clone(),
            RenderedLayer {
                features,
                properties,
            },
        );
    }

    /// Reject every edit batch.
    pub fn fail_applies(&self, fail: bool) {
        self.state.lock().fail_applies = fail;
    }

    /// Reject every layer creation.
    pub fn fail_creates(&self, fail: bool) {
        self.state.lock().fail_creates = fail;
    }

    /// Fail property reads.
    pub fn fail_property_reads(&self, fail: bool) {
        self.state.lock().fail_property_reads = fail;
    }

    /// Fail property writes.
    pub fn fail_property_writes(&self, fail: bool) {
        self.state.lock().fail_property_writes = fail;
    }

    /// Make batch operations take this long.
    pub fn set_apply_delay(&self, delay: Duration) {
        self.state.lock().apply_delay = delay;
    }

    /// Every recorded call, oldest first.
    pub fn calls(&self) -> Vec<RenderCall> {
        self.state.lock().calls.clone()
    }

    /// Number of edit batches received for a layer.
    pub fn apply_count(&self, layer: &LayerId) -> usize {
        self.count(|call| matches!(call, RenderCall::ApplyEdits { layer: l, .. } if l == layer))
    }

    /// Number of creations of a layer.
    pub fn create_count(&self, layer: &LayerId) -> usize {
        self.count(|call| matches!(call, RenderCall::Create { layer: l, .. } if l == layer))
    }

    /// Rendered features of a layer, sorted by identity.
    pub fn features(&self, layer: &LayerId) -> Option<Vec<Feature>> {
        self.state
            .lock()
            .layers
            .get(layer)
            .map(|l| l.features.values().cloned().collect())
    }

    /// Whether a layer instance exists.
    pub fn has_layer(&self, layer: &LayerId) -> bool {
        self.state.lock().layers.contains_key(layer)
    }

    fn count(&self, pred: impl Fn(&RenderCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    async fn delay(&self) {
        let delay = self.state.lock().apply_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl LayerRenderer for RecordingRenderer {
    fn supports_edits(&self, _layer: &LayerId) -> bool {
        self.state.lock().edits_supported
    }

    async fn apply_edits(&self, layer: &LayerId, batch: &EditBatch) -> Result<(), RenderError> {
        self.delay().await;

        let mut state = self.state.lock();
        state.calls.push(RenderCall::ApplyEdits {
            layer: layer.clone(),
            batch: batch.clone(),
        });
        if !state.edits_supported {
            return Err(RenderError::Unsupported("apply_edits"));
        }
        if state.fail_applies {
            return Err(RenderError::Rejected("scripted failure".into()));
        }

        let rendered = state
            .layers
            .get_mut(layer)
            .ok_or_else(|| RenderError::LayerNotFound(layer.to_string()))?;

        if let Some(f) = batch.add.iter().find(|f| rendered.features.contains_key(f.id())) {
            return Err(RenderError::Rejected(format!("add of existing feature {}", f.id())));
        }
        if let Some(f) = batch.update.iter().find(|f| !rendered.features.contains_key(f.id())) {
            return Err(RenderError::Rejected(format!("update of unknown feature {}", f.id())));
        }
        if let Some(id) = batch.delete.iter().find(|id| !rendered.features.contains_key(*id)) {
            return Err(RenderError::Rejected(format!("delete of unknown feature {id}")));
        }

        for id in &batch.delete {
            rendered.features.remove(id);
        }
        for f in batch.add.iter().chain(&batch.update) {
            rendered.features.insert(f.id().clone(), f.clone());
        }
        Ok(())
    }

    async fn create_layer(
        &self,
        layer: &LayerId,
        features: &[Feature],
        draw_order: usize,
    ) -> Result<(), RenderError> {
        self.delay().await;

        let mut state = self.state.lock();
        state.calls.push(RenderCall::Create {
            layer: layer.clone(),
            features: features.len(),
            draw_order,
        });
        if state.fail_creates {
            return Err(RenderError::Rejected("scripted failure".into()));
        }
        if state.layers.contains_key(layer) {
            return Err(RenderError::Rejected(format!("layer {layer} already exists")));
        }

        let features = features.iter().map(|f| (f.id().clone(), f.clone())).collect();
        state.layers.insert(
            layer.clone(),
            RenderedLayer {
                features,
                properties: LayerProperties {
                    draw_order,
                    ..LayerProperties::default()
                },
            },
        );
        Ok(())
    }

    async fn remove_layer(&self, layer: &LayerId) -> Result<(), RenderError> {
        let mut state = self.state.lock();
        state.calls.push(RenderCall::Remove {
            layer: layer.clone(),
        });
        state
            .layers
            .remove(layer)
            .map(|_| ())
            .ok_or_else(|| RenderError::LayerNotFound(layer.to_string()))
    }

    async fn query_features(&self, layer: &LayerId) -> Result<Vec<Feature>, RenderError> {
        self.features(layer)
            .ok_or_else(|| RenderError::LayerNotFound(layer.to_string()))
    }

    fn layer_properties(&self, layer: &LayerId) -> Result<LayerProperties, RenderError> {
        let state = self.state.lock();
        if state.fail_property_reads {
            return Err(RenderError::Rejected("scripted failure".into()));
        }
        state
            .layers
            .get(layer)
            .map(|l| l.properties.clone())
            .ok_or_else(|| RenderError::LayerNotFound(layer.to_string()))
    }

    fn set_visibility(&self, layer: &LayerId, visible: bool) -> Result<(), RenderError> {
        self.write_properties(layer, |p| p.visible = visible)
    }

    fn set_filter(&self, layer: &LayerId, filter: Option<&str>) -> Result<(), RenderError> {
        self.write_properties(layer, |p| p.filter = filter.map(str::to_owned))
    }

    fn set_draw_order(&self, layer: &LayerId, draw_order: usize) -> Result<(), RenderError> {
        self.write_properties(layer, |p| p.draw_order = draw_order)
    }
}

impl RecordingRenderer {
    fn write_properties(
        &self,
        layer: &LayerId,
        write: impl FnOnce(&mut LayerProperties),
    ) -> Result<(), RenderError> {
        let mut state = self.state.lock();
        if state.fail_property_writes {
            return Err(RenderError::Rejected("scripted failure".into()));
        }
        let rendered = state
            .layers
            .get_mut(layer)
            .ok_or_else(|| RenderError::LayerNotFound(layer.to_string()))?;
        write(&mut rendered.properties);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    auth: VecDeque<Result<(), FetchError>>,
    fetch: VecDeque<Result<Vec<RawFeature>, FetchError>>,
    fallback: Option<Vec<RawFeature>>,
    auth_calls: usize,
    fetch_calls: usize,
}

/// Source replaying queued responses.
///
/// Authentication succeeds unless a failure is queued. When the fetch queue
/// is empty the fallback response is returned, or a transient error if none
/// was set.
#[derive(Debug)]
pub struct ScriptedSource {
    name: String,
    state: Mutex<ScriptState>,
}

impl ScriptedSource {
    /// Create an empty script.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ScriptState::default()),
        }
    }

    /// Queue an authentication result.
    pub fn push_auth(&self, result: Result<(), FetchError>) {
        self.state.lock().auth.push_back(result);
    }

    /// Queue a fetch result.
    pub fn push_fetch(&self, result: Result<Vec<RawFeature>, FetchError>) {
        self.state.lock().fetch.push_back(result);
    }

    /// Response used once the queue is empty.
    pub fn respond_with(&self, features: Vec<RawFeature>) {
        self.state.lock().fallback = Some(features);
    }

    /// Number of `authenticate` calls.
    pub fn auth_calls(&self) -> usize {
        self.state.lock().auth_calls
    }

    /// Number of `fetch` calls.
    pub fn fetch_calls(&self) -> usize {
        self.state.lock().fetch_calls
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self) -> Result<(), FetchError> {
        let mut state = self.state.lock();
        state.auth_calls += 1;
        state.auth.pop_front().unwrap_or(Ok(()))
    }

    async fn fetch(&self) -> Result<Vec<RawFeature>, FetchError> {
        let mut state = self.state.lock();
        state.fetch_calls += 1;
        match state.fetch.pop_front() {
            Some(result) => result,
            None => state
                .fallback
                .clone()
                .ok_or_else(|| FetchError::Transient("no scripted response".into())),
        }
    }
}

/// Point feature with `id` and `status` attributes.
pub fn raw_point(id: &str, position: Position, status: &str) -> RawFeature {
    let mut attributes = Attributes::new();
    attributes.insert("id".into(), json!(id));
    attributes.insert("status".into(), json!(status));
    RawFeature::new(Geometry::Point(position), attributes)
}

/// Identified point feature with `id` and `status` attributes.
pub fn point(id: &str, position: Position, status: &str) -> Feature {
    let raw = raw_point(id, position, status);
    Feature::new(FeatureId::new(id), raw.geometry, raw.attributes)
}

/// Identified single-ring polygon feature with `id` and `status` attributes.
pub fn polygon(id: &str, ring: Vec<Position>, status: &str) -> Feature {
    let mut attributes = Attributes::new();
    attributes.insert("id".into(), json!(id));
    attributes.insert("status".into(), json!(status));
    Feature::new(FeatureId::new(id), Geometry::Polygon(vec![ring]), attributes)
}
