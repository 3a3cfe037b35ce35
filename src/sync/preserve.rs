//! Layer state preserver
//!
//! Carries visibility, filter and draw order across a full layer
//! recreation so that a rebuild looks like an in-place update.

use tracing::warn;

use crate::core::{LayerId, LayerProperties, LayerRenderer};

/// Where captured properties came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    /// Read from the rendered instance.
    Renderer,
    /// The instance could not be queried; the engine's record was used.
    Recorded,
    /// The layer was never rendered; configured initial properties.
    Initial,
}

/// Properties captured before a layer instance is torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerStateSnapshot {
    /// Captured properties.
    pub properties: LayerProperties,
    /// Origin of the capture.
    pub source: CaptureSource,
}

impl LayerStateSnapshot {
    /// State for a layer being created for the first time.
    pub fn initial(properties: LayerProperties) -> Self {
        Self {
            properties,
            source: CaptureSource::Initial,
        }
    }
}

/// Capture/restore around a full recreation.
///
/// Neither operation suspends, so nothing can change the instance between
/// reading and applying its properties.
pub struct LayerStatePreserver<'a, R: ?Sized> {
    renderer: &'a R,
}

impl<'a, R: LayerRenderer + ?Sized> LayerStatePreserver<'a, R> {
    /// Create a preserver over `renderer`.
    pub fn new(renderer: &'a R) -> Self {
        Self { renderer }
    }

    /// Read the properties of the current instance of `layer_id`.
    ///
    /// Falls back to `recorded` if the instance cannot be queried.
    pub fn capture_state(
        &self,
        layer_id: &LayerId,
        recorded: &LayerProperties,
    ) -> LayerStateSnapshot {
        match self.renderer.layer_properties(layer_id) {
            Ok(properties) => LayerStateSnapshot {
                properties,
                source: CaptureSource::Renderer,
            },
            Err(e) => {
                warn!(layer = %layer_id, error = %e, "capture failed, using recorded layer state");
                LayerStateSnapshot {
                    properties: recorded.clone(),
                    source: CaptureSource::Recorded,
                }
            }
        }
    }

    /// Apply captured visibility and filter to a freshly created instance.
    ///
    /// The instance is expected to already sit at the captured draw order.
    /// A property that cannot be applied stays at the instance default
    /// (visible, unfiltered). Returns the properties actually in effect.
    pub fn restore_state(&self, layer_id: &LayerId, state: &LayerStateSnapshot) -> LayerProperties {
        let wanted = &state.properties;
        let mut effective = LayerProperties {
            draw_order: wanted.draw_order,
            ..LayerProperties::default()
        };

        if !wanted.visible {
            match self.renderer.set_visibility(layer_id, false) {
                Ok(()) => effective.visible = false,
                Err(e) => warn!(layer = %layer_id, error = %e, "could not restore visibility"),
            }
        }

        if let Some(filter) = wanted.filter.as_deref() {
            match self.renderer.set_filter(layer_id, Some(filter)) {
                Ok(()) => effective.filter = Some(filter.to_owned()),
                Err(e) => warn!(layer = %layer_id, error = %e, "could not restore filter"),
            }
        }

        effective
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingRenderer;

    fn hidden_filtered() -> LayerProperties {
        LayerProperties {
            visible: false,
            filter: Some("status='active'".into()),
            draw_order: 4,
        }
    }

    #[test]
    fn test_capture_from_renderer() {
        let renderer = RecordingRenderer::new();
        let layer = LayerId::new("subscribers");
        renderer.seed_layer(&layer, Vec::new(), hidden_filtered());

        let preserver = LayerStatePreserver::new(&renderer);
        let state = preserver.capture_state(&layer, &LayerProperties::default());

        assert_eq!(state.source, CaptureSource::Renderer);
        assert_eq!(state.properties, hidden_filtered());
    }

    #[test]
    fn test_capture_falls_back_to_record() {
        let renderer = RecordingRenderer::new();
        let layer = LayerId::new("missing");

        let preserver = LayerStatePreserver::new(&renderer);
        let state = preserver.capture_state(&layer, &hidden_filtered());

        assert_eq!(state.source, CaptureSource::Recorded);
        assert_eq!(state.properties, hidden_filtered());
    }

    #[test]
    fn test_restore_applies_visibility_and_filter() {
        let renderer = RecordingRenderer::new();
        let layer = LayerId::new("subscribers");
        let placed = LayerProperties {
            draw_order: 4,
            ..Default::default()
        };
        renderer.seed_layer(&layer, Vec::new(), placed);

        let preserver = LayerStatePreserver::new(&renderer);
        let state = LayerStateSnapshot {
            properties: hidden_filtered(),
            source: CaptureSource::Renderer,
        };
        let effective = preserver.restore_state(&layer, &state);

        assert_eq!(effective, hidden_filtered());
        assert_eq!(renderer.layer_properties(&layer).unwrap(), hidden_filtered());
    }

    #[test]
    fn test_restore_failure_falls_back_to_defaults() {
        let renderer = RecordingRenderer::new();
        let layer = LayerId::new("subscribers");
        renderer.seed_layer(&layer, Vec::new(), LayerProperties::default());
        renderer.fail_property_writes(true);

        let preserver = LayerStatePreserver::new(&renderer);
        let state = LayerStateSnapshot::initial(hidden_filtered());
        let effective = preserver.restore_state(&layer, &state);

        assert!(effective.visible);
        assert_eq!(effective.filter, None);
        assert_eq!(effective.draw_order, 4);
    }
}
