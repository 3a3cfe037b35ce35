//! Collaborator interfaces.
//!
//! The engine never talks to a map widget or an HTTP client directly; it
//! drives them through these traits.

use async_trait::async_trait;

use super::error::{FetchError, RenderError};
use super::feature::{Feature, FeatureId, LayerId, RawFeature};

/// A remote dataset producing normalized features.
///
/// Implementations map vendor fields to attributes; identity assignment and
/// retry policy live in the fetch client.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    /// Human-readable source name for logs.
    fn name(&self) -> &str;

    /// Obtain or refresh credentials.
    async fn authenticate(&self) -> Result<(), FetchError>;

    /// Fetch the complete current dataset.
    async fn fetch(&self) -> Result<Vec<RawFeature>, FetchError>;
}

/// One atomic set of mutations against a rendered layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditBatch {
    /// Features to insert.
    pub add: Vec<Feature>,
    /// Features to replace in place (matched by identity).
    pub update: Vec<Feature>,
    /// Identities to remove.
    pub delete: Vec<FeatureId>,
}

impl EditBatch {
    /// Whether the batch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    /// Total number of mutations.
    pub fn len(&self) -> usize {
        self.add.len() + self.update.len() + self.delete.len()
    }
}

/// User-facing state of a rendered layer that must survive recreation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerProperties {
    /// Visibility flag.
    pub visible: bool,
    /// Active filter expression, e.g. `status='active'`.
    pub filter: Option<String>,
    /// Position in the draw order (0 = bottom).
    pub draw_order: usize,
}

impl Default for LayerProperties {
    fn default() -> Self {
        Self {
            visible: true,
            filter: None,
            draw_order: 0,
        }
    }
}

/// The map widget, as seen by the engine.
///
/// Batch operations are the only suspension points; property access is
/// synchronous so capture/restore cannot interleave with other work.
#[async_trait]
pub trait LayerRenderer: Send + Sync + 'static {
    /// Whether the rendered layer exposes the edit-apply primitive.
    fn supports_edits(&self, layer: &LayerId) -> bool;

    /// Apply a batch atomically: all mutations or none.
    async fn apply_edits(&self, layer: &LayerId, batch: &EditBatch) -> Result<(), RenderError>;

    /// Create a layer instance from a full feature collection at `draw_order`.
    async fn create_layer(
        &self,
        layer: &LayerId,
        features: &[Feature],
        draw_order: usize,
    ) -> Result<(), RenderError>;

    /// Tear down a layer instance.
    async fn remove_layer(&self, layer: &LayerId) -> Result<(), RenderError>;

    /// Features currently rendered in the layer.
    async fn query_features(&self, layer: &LayerId) -> Result<Vec<Feature>, RenderError>;

    /// Current user-facing properties of the instance.
    fn layer_properties(&self, layer: &LayerId) -> Result<LayerProperties, RenderError>;

    /// Show or hide the layer.
    fn set_visibility(&self, layer: &LayerId, visible: bool) -> Result<(), RenderError>;

    /// Set or clear the filter expression.
    fn set_filter(&self, layer: &LayerId, filter: Option<&str>) -> Result<(), RenderError>;

    /// Move the layer to a draw-order rank.
    fn set_draw_order(&self, layer: &LayerId, draw_order: usize) -> Result<(), RenderError>;
}
