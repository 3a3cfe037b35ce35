//! Feature model: identities, geometry and attributes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A coordinate pair (x/longitude, y/latitude).
pub type Position = [f64; 2];

/// Flat attribute map as produced by upstream field mapping.
pub type Attributes = BTreeMap<String, Value>;

/// Identifier of a logical map layer (e.g. "subscribers", "outages").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(Arc<str>);

impl LayerId {
    /// Create a layer id.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LayerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for LayerId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// Stable identity of a feature across snapshots.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(Arc<str>);

impl FeatureId {
    /// Create an identity from a natural key.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Fallback identity: layer name plus a random salt.
    ///
    /// Never stable across snapshots; layers relying on it always recreate.
    pub fn salted(layer: &LayerId) -> Self {
        Self(Arc::from(format!("{layer}#{:016x}", rand::random::<u64>())))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeatureId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// How features of a layer get their identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityPolicy {
    /// Use the named attribute (account number, device id, ...).
    Field(String),
    /// No natural key; every feature gets a salted identity.
    Salted,
}

impl IdentityPolicy {
    /// Natural key of a feature, if the policy has one and the attribute is usable.
    ///
    /// Strings are used verbatim (empty strings are rejected); numbers use
    /// their canonical decimal form so `42` and `"42"` identify the same entity.
    pub fn natural_key(&self, attributes: &Attributes) -> Option<FeatureId> {
        let Self::Field(field) = self else {
            return None;
        };
        match attributes.get(field)? {
            Value::String(s) if !s.trim().is_empty() => Some(FeatureId::new(s.trim())),
            Value::Number(n) => Some(FeatureId::new(n.to_string())),
            _ => None,
        }
    }

    /// Whether identities produced by this policy survive across snapshots.
    pub fn is_stable(&self) -> bool {
        matches!(self, Self::Field(_))
    }
}

/// Geometry kinds a layer can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    /// Single point marker.
    Point,
    /// Polygon area.
    Polygon,
}

/// Feature geometry, GeoJSON-shaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    /// A point.
    Point(Position),
    /// A polygon: outer ring followed by holes.
    Polygon(Vec<Vec<Position>>),
}

impl Geometry {
    /// Kind of this geometry.
    pub fn kind(&self) -> GeometryKind {
        match self {
            Self::Point(_) => GeometryKind::Point,
            Self::Polygon(_) => GeometryKind::Polygon,
        }
    }
}

/// A feature as delivered by a data source, before identity assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFeature {
    /// Geometry.
    pub geometry: Geometry,
    /// Attributes (`properties` in GeoJSON).
    #[serde(default, alias = "properties")]
    pub attributes: Attributes,
}

impl RawFeature {
    /// Create a raw feature.
    pub fn new(geometry: Geometry, attributes: Attributes) -> Self {
        Self {
            geometry,
            attributes,
        }
    }
}

/// A feature with its stable identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    id: FeatureId,
    geometry: Geometry,
    attributes: Attributes,
}

impl Feature {
    /// Create a feature.
    pub fn new(id: FeatureId, geometry: Geometry, attributes: Attributes) -> Self {
        Self {
            id,
            geometry,
            attributes,
        }
    }

    /// Convenience constructor for a point feature.
    pub fn point(id: impl AsRef<str>, position: Position, attributes: Attributes) -> Self {
        Self::new(FeatureId::new(id), Geometry::Point(position), attributes)
    }

    /// Identity.
    pub fn id(&self) -> &FeatureId {
        &self.id
    }

    /// Geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Attributes.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Single attribute lookup.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Whether geometry and attributes match `other`, ignoring identity.
    ///
    /// Coarse on purpose: a NaN coordinate or any attribute change counts
    /// as different, which only ever yields extra updates.
    pub fn same_content(&self, other: &Feature) -> bool {
        self.geometry == other.geometry && self.attributes == other.attributes
    }
}
