//! Per-layer configuration.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{
    ConfigError, DEFAULT_DEBOUNCE, DEFAULT_POLL_INTERVAL, IdentityPolicy, LayerId,
    LayerProperties, MIN_POLL_INTERVAL,
};

/// Configuration of one logical layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerConfig {
    /// Layer identifier.
    pub layer_id: LayerId,

    /// How feature identities are derived.
    pub identity: IdentityPolicy,

    /// Whether an empty snapshot may clear the layer.
    ///
    /// Outage layers legitimately go empty; subscriber layers never do.
    pub allows_empty_updates: bool,

    /// Whether the layer may be patched in place instead of recreated.
    pub supports_incremental_patch: bool,

    /// Coalescing window for repeated updates.
    pub debounce: Duration,

    /// Background refresh interval.
    pub poll_interval: Duration,

    /// Properties of the layer when it is first created.
    pub initial: LayerProperties,
}

impl LayerConfig {
    /// Start building a configuration for `layer_id`.
    pub fn builder(layer_id: impl Into<LayerId>) -> LayerConfigBuilder {
        LayerConfigBuilder::new(layer_id.into())
    }

    /// Check invariants that cannot be expressed in the type.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layer_id.as_str().trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "layerId",
                reason: "must not be empty".into(),
            });
        }
        if let IdentityPolicy::Field(field) = &self.identity
            && field.trim().is_empty()
        {
            return Err(ConfigError::InvalidValue {
                field: "identityField",
                reason: "must not be empty".into(),
            });
        }
        if !self.identity.is_stable() && self.supports_incremental_patch {
            return Err(ConfigError::SaltedIncremental(self.layer_id.to_string()));
        }
        if self.poll_interval < MIN_POLL_INTERVAL {
            return Err(ConfigError::PollIntervalTooShort {
                layer: self.layer_id.to_string(),
                interval: self.poll_interval,
                min: MIN_POLL_INTERVAL,
            });
        }
        Ok(())
    }

    /// Parse and validate a single layer configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawLayerConfig = serde_json::from_str(json)?;
        Self::try_from(raw)
    }
}

/// Parse and validate a JSON array of layer configurations.
pub fn load_layer_configs(json: &str) -> Result<Vec<LayerConfig>, ConfigError> {
    let raw: Vec<RawLayerConfig> = serde_json::from_str(json)?;
    let mut seen = HashSet::new();
    let mut configs = Vec::with_capacity(raw.len());
    for entry in raw {
        let config = LayerConfig::try_from(entry)?;
        if !seen.insert(config.layer_id.clone()) {
            return Err(ConfigError::DuplicateLayer(config.layer_id.to_string()));
        }
        configs.push(config);
    }
    Ok(configs)
}

/// Builder for [`LayerConfig`].
#[derive(Debug)]
pub struct LayerConfigBuilder {
    config: LayerConfig,
    incremental_set: bool,
}

impl LayerConfigBuilder {
    /// Create a builder with defaults: salted identity, no empty updates.
    pub fn new(layer_id: LayerId) -> Self {
        Self {
            config: LayerConfig {
                layer_id,
                identity: IdentityPolicy::Salted,
                allows_empty_updates: false,
                supports_incremental_patch: false,
                debounce: DEFAULT_DEBOUNCE,
                poll_interval: DEFAULT_POLL_INTERVAL,
                initial: LayerProperties::default(),
            },
            incremental_set: false,
        }
    }

    /// Derive identities from a natural key attribute.
    pub fn identity_field(mut self, field: impl Into<String>) -> Self {
        self.config.identity = IdentityPolicy::Field(field.into());
        self
    }

    /// Use salted fallback identities.
    pub fn salted_identity(mut self) -> Self {
        self.config.identity = IdentityPolicy::Salted;
        self
    }

    /// Allow empty snapshots to clear the layer.
    pub fn allows_empty_updates(mut self, allow: bool) -> Self {
        self.config.allows_empty_updates = allow;
        self
    }

    /// Override the incremental patch capability.
    ///
    /// Defaults to `true` for natural-key identities, `false` for salted.
    pub fn supports_incremental_patch(mut self, supported: bool) -> Self {
        self.config.supports_incremental_patch = supported;
        self.incremental_set = true;
        self
    }

    /// Set the debounce window.
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.config.debounce = debounce;
        self
    }

    /// Set the poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the draw-order rank used at first creation.
    pub fn draw_order(mut self, rank: usize) -> Self {
        self.config.initial.draw_order = rank;
        self
    }

    /// Set the initial visibility.
    pub fn visible(mut self, visible: bool) -> Self {
        self.config.initial.visible = visible;
        self
    }

    /// Set the initial filter expression.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.config.initial.filter = Some(filter.into());
        self
    }

    /// Validate and build the configuration.
    pub fn build(mut self) -> Result<LayerConfig, ConfigError> {
        if !self.incremental_set {
            self.config.supports_incremental_patch = self.config.identity.is_stable();
        }
        self.config.validate()?;
        Ok(self.config)
    }
}

/// The JSON surface of a layer configuration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawLayerConfig {
    layer_id: String,
    identity_field: Option<String>,
    identity_fallback: Option<String>,
    #[serde(default)]
    allows_empty_updates: bool,
    supports_incremental_patch: Option<bool>,
    debounce_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    draw_order: usize,
    #[serde(default = "default_visible")]
    visible: bool,
    filter: Option<String>,
}

fn default_visible() -> bool {
    true
}

impl TryFrom<RawLayerConfig> for LayerConfig {
    type Error = ConfigError;

    fn try_from(raw: RawLayerConfig) -> Result<Self, Self::Error> {
        let mut builder = LayerConfig::builder(raw.layer_id)
            .allows_empty_updates(raw.allows_empty_updates)
            .draw_order(raw.draw_order)
            .visible(raw.visible);

        builder = match (raw.identity_field, raw.identity_fallback.as_deref()) {
            (Some(field), None) => builder.identity_field(field),
            (None, Some("salted")) => builder.salted_identity(),
            (None, Some(other)) => {
                return Err(ConfigError::InvalidValue {
                    field: "identityFallback",
                    reason: format!("unknown fallback {other:?}, expected \"salted\""),
                });
            }
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidValue {
                    field: "identityField",
                    reason: "identityField and identityFallback are mutually exclusive".into(),
                });
            }
            (None, None) => {
                return Err(ConfigError::InvalidValue {
                    field: "identityField",
                    reason: "one of identityField or identityFallback is required".into(),
                });
            }
        };

        if let Some(supported) = raw.supports_incremental_patch {
            builder = builder.supports_incremental_patch(supported);
        }
        if let Some(ms) = raw.debounce_ms {
            builder = builder.debounce(Duration::from_millis(ms));
        }
        if let Some(ms) = raw.poll_interval_ms {
            builder = builder.poll_interval(Duration::from_millis(ms));
        }
        if let Some(filter) = raw.filter {
            builder = builder.filter(filter);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = LayerConfig::builder("subscribers")
            .identity_field("accountNumber")
            .build()
            .unwrap();

        assert_eq!(config.layer_id.as_str(), "subscribers");
        assert!(config.supports_incremental_patch);
        assert!(!config.allows_empty_updates);
        assert_eq!(config.debounce, DEFAULT_DEBOUNCE);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.initial, LayerProperties::default());
    }

    #[test]
    fn test_salted_defaults_to_recreate_only() {
        let config = LayerConfig::builder("drops").build().unwrap();
        assert_eq!(config.identity, IdentityPolicy::Salted);
        assert!(!config.supports_incremental_patch);
    }

    #[test]
    fn test_salted_incremental_rejected() {
        let result = LayerConfig::builder("drops")
            .salted_identity()
            .supports_incremental_patch(true)
            .build();
        assert!(matches!(result, Err(ConfigError::SaltedIncremental(_))));
    }

    #[test]
    fn test_poll_interval_too_short() {
        let result = LayerConfig::builder("vehicles")
            .identity_field("deviceId")
            .poll_interval(Duration::from_millis(10))
            .build();
        assert!(matches!(result, Err(ConfigError::PollIntervalTooShort { .. })));
    }

    #[test]
    fn test_from_json() {
        let config = LayerConfig::from_json(
            r#"{
                "layerId": "outages",
                "identityField": "outageId",
                "allowsEmptyUpdates": true,
                "debounceMs": 250,
                "pollIntervalMs": 120000,
                "drawOrder": 3,
                "visible": false,
                "filter": "status='active'"
            }"#,
        )
        .unwrap();

        assert_eq!(config.layer_id.as_str(), "outages");
        assert_eq!(config.identity, IdentityPolicy::Field("outageId".into()));
        assert!(config.allows_empty_updates);
        assert!(config.supports_incremental_patch);
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.poll_interval, Duration::from_secs(120));
        assert_eq!(config.initial.draw_order, 3);
        assert!(!config.initial.visible);
        assert_eq!(config.initial.filter.as_deref(), Some("status='active'"));
    }

    #[test]
    fn test_from_json_identity_errors() {
        let missing = LayerConfig::from_json(r#"{"layerId": "a"}"#);
        assert!(matches!(
            missing,
            Err(ConfigError::InvalidValue { field: "identityField", .. })
        ));

        let both = LayerConfig::from_json(
            r#"{"layerId": "a", "identityField": "id", "identityFallback": "salted"}"#,
        );
        assert!(matches!(both, Err(ConfigError::InvalidValue { .. })));

        let unknown = LayerConfig::from_json(r#"{"layerId": "a", "identityFallback": "uuid"}"#);
        assert!(matches!(
            unknown,
            Err(ConfigError::InvalidValue { field: "identityFallback", .. })
        ));
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        let result =
            LayerConfig::from_json(r#"{"layerId": "a", "identityField": "id", "color": 1}"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_layer_configs() {
        let configs = load_layer_configs(
            r#"[
                {"layerId": "subscribers", "identityField": "accountNumber"},
                {"layerId": "fiber", "identityFallback": "salted"}
            ]"#,
        )
        .unwrap();

        assert_eq!(configs.len(), 2);
        assert!(configs[0].supports_incremental_patch);
        assert!(!configs[1].supports_incremental_patch);
    }

    #[test]
    fn test_load_layer_configs_duplicate() {
        let result = load_layer_configs(
            r#"[
                {"layerId": "subscribers", "identityField": "a"},
                {"layerId": "subscribers", "identityField": "b"}
            ]"#,
        );
        assert!(matches!(result, Err(ConfigError::DuplicateLayer(_))));
    }
}
