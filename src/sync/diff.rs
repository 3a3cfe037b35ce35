//! Feature diff engine
//!
//! Computes the add/update/delete delta between the features a layer
//! currently renders and a new snapshot, keyed by stable identity.

use std::collections::HashMap;

use crate::core::{EditBatch, Feature, FeatureId, Snapshot};

/// Live features keyed by identity.
pub type KeyedFeatures = HashMap<FeatureId, Feature>;

/// Key a snapshot by identity. A duplicated identity keeps its last occurrence.
pub fn key_snapshot(snapshot: &Snapshot) -> KeyedFeatures {
    snapshot
        .features()
        .iter()
        .map(|f| (f.id().clone(), f.clone()))
        .collect()
}

/// Mutation counts of a diff, as reported to the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffCounts {
    /// Features added.
    pub added: usize,
    /// Features updated in place.
    pub updated: usize,
    /// Features deleted.
    pub deleted: usize,
}

impl DiffCounts {
    /// Total number of mutations.
    pub fn total(&self) -> usize {
        self.added + self.updated + self.deleted
    }
}

/// The delta between live features and a new snapshot.
///
/// The three sets are disjoint: every snapshot identity is in `to_add`,
/// in `to_update`, or unchanged; every removed identity is in `to_delete`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffResult {
    /// Identities new in the snapshot (snapshot order).
    pub to_add: Vec<Feature>,
    /// Identities in both whose content differs (snapshot order).
    pub to_update: Vec<Feature>,
    /// Identities gone from the snapshot (sorted).
    pub to_delete: Vec<FeatureId>,
}

impl DiffResult {
    /// Whether there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Mutation counts.
    pub fn counts(&self) -> DiffCounts {
        DiffCounts {
            added: self.to_add.len(),
            updated: self.to_update.len(),
            deleted: self.to_delete.len(),
        }
    }

    /// Convert into a single renderer batch.
    pub fn into_batch(self) -> EditBatch {
        EditBatch {
            add: self.to_add,
            update: self.to_update,
            delete: self.to_delete,
        }
    }
}

/// Diff `live` against `new`.
///
/// Pure and deterministic. Runs in O(live + new).
pub fn diff(live: &KeyedFeatures, new: &Snapshot) -> DiffResult {
    let features = new.features();

    // Last occurrence of each identity wins, mirroring `key_snapshot`.
    let mut last_index: HashMap<&FeatureId, usize> = HashMap::with_capacity(features.len());
    for (i, feature) in features.iter().enumerate() {
        last_index.insert(feature.id(), i);
    }

    let mut result = DiffResult::default();

    for (i, feature) in features.iter().enumerate() {
        if last_index.get(feature.id()) != Some(&i) {
            continue;
        }
        match live.get(feature.id()) {
            None => result.to_add.push(feature.clone()),
            Some(current) if !current.same_content(feature) => {
                result.to_update.push(feature.clone())
            }
            Some(_) => {}
        }
    }

    result.to_delete = live
        .keys()
        .filter(|id| !last_index.contains_key(id))
        .cloned()
        .collect();
    result.to_delete.sort();

    result
}
