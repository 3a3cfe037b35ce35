//! Immutable dataset snapshots.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::debug;

use super::feature::{Feature, FeatureId, GeometryKind, IdentityPolicy, LayerId, RawFeature};

/// Production order of snapshots within this process.
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_sequence() -> u64 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    /// Fresh result of a successful fetch.
    Live,
    /// Last-known-good snapshot served from the fetch cache.
    Cached {
        /// Whether the entry is older than its validity window.
        stale: bool,
    },
    /// Explicit empty fallback: no fetch succeeded and nothing was cached.
    Degraded,
}

/// Geometry composition of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryProfile {
    /// No features.
    Empty,
    /// Every feature has this kind.
    Uniform(GeometryKind),
    /// Points and polygons together.
    Mixed,
}

/// Complete state of one dataset at one point in time.
///
/// Cloning is cheap and shares the feature storage; a snapshot is never
/// mutated after construction.
#[derive(Debug, Clone)]
pub struct Snapshot {
    features: Arc<[Feature]>,
    sequence: u64,
    produced_at: Instant,
    origin: SnapshotOrigin,
}

impl Snapshot {
    /// Create a live snapshot from identified features.
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            features: features.into(),
            sequence: next_sequence(),
            produced_at: Instant::now(),
            origin: SnapshotOrigin::Live,
        }
    }

    /// Assign identities to raw features and build a live snapshot.
    ///
    /// Features without a usable natural key get a salted identity.
    pub fn from_raw(layer: &LayerId, policy: &IdentityPolicy, raw: Vec<RawFeature>) -> Self {
        let mut fallbacks = 0usize;
        let features: Vec<Feature> = raw
            .into_iter()
            .map(|f| {
                let id = policy.natural_key(&f.attributes).unwrap_or_else(|| {
                    fallbacks += 1;
                    FeatureId::salted(layer)
                });
                Feature::new(id, f.geometry, f.attributes)
            })
            .collect();

        if fallbacks > 0 && policy.is_stable() {
            debug!(%layer, fallbacks, "features without natural key got salted identities");
        }

        Self::new(features)
    }

    /// Explicitly empty fallback snapshot.
    pub fn degraded() -> Self {
        Self {
            features: Arc::from(Vec::new()),
            sequence: next_sequence(),
            produced_at: Instant::now(),
            origin: SnapshotOrigin::Degraded,
        }
    }

    /// Same features and sequence, re-labelled as served from cache.
    pub(crate) fn served_from_cache(&self, stale: bool) -> Self {
        Self {
            origin: SnapshotOrigin::Cached { stale },
            ..self.clone()
        }
    }

    /// Features in upstream order.
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Number of features.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the snapshot has no features.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Production sequence number; higher means newer.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// When the snapshot was produced.
    pub fn produced_at(&self) -> Instant {
        self.produced_at
    }

    /// Origin of the snapshot.
    pub fn origin(&self) -> SnapshotOrigin {
        self.origin
    }

    /// Whether this is the explicit empty fallback.
    pub fn is_degraded(&self) -> bool {
        self.origin == SnapshotOrigin::Degraded
    }

    /// Geometry composition.
    pub fn geometry_profile(&self) -> GeometryProfile {
        let mut kinds = self.features.iter().map(|f| f.geometry().kind());
        let Some(first) = kinds.next() else {
            return GeometryProfile::Empty;
        };
        if kinds.all(|k| k == first) {
            GeometryProfile::Uniform(first)
        } else {
            GeometryProfile::Mixed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Attributes, Geometry};
    use serde_json::json;

    fn raw(attrs: serde_json::Value, geometry: Geometry) -> RawFeature {
        let attributes: Attributes = serde_json::from_value(attrs).unwrap();
        RawFeature::new(geometry, attributes)
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Snapshot::new(Vec::new());
        let b = Snapshot::new(Vec::new());
        let c = Snapshot::degraded();
        assert!(a.sequence() < b.sequence());
        assert!(b.sequence() < c.sequence());
    }

    #[test]
    fn test_from_raw_assigns_identities() {
        let layer = LayerId::new("subscribers");
        let policy = IdentityPolicy::Field("account".into());
        let snapshot = Snapshot::from_raw(
            &layer,
            &policy,
            vec![
                raw(json!({"account": "100"}), Geometry::Point([1.0, 2.0])),
                raw(json!({"name": "no key"}), Geometry::Point([3.0, 4.0])),
            ],
        );

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.features()[0].id().as_str(), "100");
        assert!(snapshot.features()[1].id().as_str().starts_with("subscribers#"));
        assert_eq!(snapshot.origin(), SnapshotOrigin::Live);
    }

    #[test]
    fn test_served_from_cache_keeps_sequence() {
        let snapshot = Snapshot::new(vec![Feature::point("a", [0.0, 0.0], Attributes::new())]);
        let cached = snapshot.served_from_cache(true);

        assert_eq!(cached.sequence(), snapshot.sequence());
        assert_eq!(cached.len(), 1);
        assert_eq!(cached.origin(), SnapshotOrigin::Cached { stale: true });
    }

    #[test]
    fn test_geometry_profile() {
        assert_eq!(Snapshot::degraded().geometry_profile(), GeometryProfile::Empty);

        let points = Snapshot::new(vec![
            Feature::point("a", [0.0, 0.0], Attributes::new()),
            Feature::point("b", [1.0, 1.0], Attributes::new()),
        ]);
        assert_eq!(
            points.geometry_profile(),
            GeometryProfile::Uniform(GeometryKind::Point)
        );

        let ring = vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]];
        let mixed = Snapshot::new(vec![
            Feature::point("a", [0.0, 0.0], Attributes::new()),
            Feature::new("b".into(), Geometry::Polygon(ring), Attributes::new()),
        ]);
        assert_eq!(mixed.geometry_profile(), GeometryProfile::Mixed);
    }
}
