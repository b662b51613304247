//! # Dependency Index
//!
//! Reverse maps used to fan out requeues:
//!
//! - ReferenceMap: referenced object -> add-ons referencing it
//! - ClusterMap: cluster -> add-ons currently matching it
//!
//! Forward maps (add-on -> references / clusters) are kept alongside so an
//! update only touches the symmetric difference. Every entry of a reverse map
//! holds at least one add-on; empty sets are removed in the same critical
//! section that emptied them.
//!
//! All state lives behind one `parking_lot::RwLock`. Mutations take the write
//! lock for their whole edit, lookups take the read lock and return owned
//! snapshots.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use crate::controller::keys::{AddOnKey, ClusterKey, ReferenceKey};
use crate::controller::selector::Selector;

#[derive(Debug, Default)]
struct IndexState {
    references: HashMap<ReferenceKey, HashSet<AddOnKey>>,
    clusters: HashMap<ClusterKey, HashSet<AddOnKey>>,
    add_on_references: HashMap<AddOnKey, HashSet<ReferenceKey>>,
    add_on_clusters: HashMap<AddOnKey, HashSet<ClusterKey>>,
    selectors: HashMap<AddOnKey, Selector>,
}

/// What changed for one add-on during `update_maps`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDelta {
    pub added_clusters: BTreeSet<ClusterKey>,
    pub removed_clusters: BTreeSet<ClusterKey>,
    pub added_references: BTreeSet<ReferenceKey>,
    pub removed_references: BTreeSet<ReferenceKey>,
}

/// Snapshot of one add-on's entries, used to rebuild the index
#[derive(Debug, Clone, Default)]
pub struct IndexEntry {
    pub key: AddOnKey,
    pub references: BTreeSet<ReferenceKey>,
    pub clusters: BTreeSet<ClusterKey>,
    pub selector: Option<Selector>,
}

#[derive(Debug, Default)]
pub struct DependencyIndex {
    state: RwLock<IndexState>,
}

fn link<K, V>(map: &mut HashMap<K, HashSet<V>>, key: K, value: V)
where
    K: Eq + Hash,
    V: Eq + Hash,
{
    map.entry(key).or_default().insert(value);
}

/// Remove `value` from the set at `key`, dropping the set once empty
fn unlink<K, V>(map: &mut HashMap<K, HashSet<V>>, key: &K, value: &V)
where
    K: Eq + Hash,
    V: Eq + Hash,
{
    if let Some(set) = map.get_mut(key) {
        set.remove(value);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

impl DependencyIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current references and matching clusters of an add-on
    ///
    /// Only the symmetric difference against the previous call is applied.
    /// Reverse entries whose set becomes empty are removed. The whole edit
    /// happens under the write lock so readers never observe a half update.
    pub fn update_maps(
        &self,
        key: &AddOnKey,
        references: &BTreeSet<ReferenceKey>,
        clusters: &BTreeSet<ClusterKey>,
    ) -> IndexDelta {
        let mut state = self.state.write();
        let state = &mut *state;
        let mut delta = IndexDelta::default();

        let previous_refs = state.add_on_references.remove(key).unwrap_or_default();
        for reference in previous_refs.iter().filter(|r| !references.contains(*r)) {
            unlink(&mut state.references, reference, key);
            delta.removed_references.insert(reference.clone());
        }
        for reference in references.iter().filter(|r| !previous_refs.contains(*r)) {
            link(&mut state.references, reference.clone(), key.clone());
            delta.added_references.insert(reference.clone());
        }

        let previous_clusters = state.add_on_clusters.remove(key).unwrap_or_default();
        for cluster in previous_clusters.iter().filter(|c| !clusters.contains(*c)) {
            unlink(&mut state.clusters, cluster, key);
            delta.removed_clusters.insert(cluster.clone());
        }
        for cluster in clusters.iter().filter(|c| !previous_clusters.contains(*c)) {
            link(&mut state.clusters, cluster.clone(), key.clone());
            delta.added_clusters.insert(cluster.clone());
        }

        if !references.is_empty() {
            state
                .add_on_references
                .insert(key.clone(), references.iter().cloned().collect());
        }
        if !clusters.is_empty() {
            state
                .add_on_clusters
                .insert(key.clone(), clusters.iter().cloned().collect());
        }
        delta
    }

    /// Remember the parsed selector so cluster label changes can be mapped
    /// to add-ons that do not target the cluster yet
    pub fn record_selector(&self, key: &AddOnKey, selector: Option<Selector>) {
        let mut state = self.state.write();
        match selector {
            Some(selector) => {
                state.selectors.insert(key.clone(), selector);
            }
            None => {
                state.selectors.remove(key);
            }
        }
    }

    /// Add-ons currently referencing `reference`
    #[must_use]
    pub fn get_reference_map_for_entry(&self, reference: &ReferenceKey) -> BTreeSet<AddOnKey> {
        self.state
            .read()
            .references
            .get(reference)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Add-ons currently matching `cluster`
    #[must_use]
    pub fn get_cluster_map_for_entry(&self, cluster: &ClusterKey) -> BTreeSet<AddOnKey> {
        self.state
            .read()
            .clusters
            .get(cluster)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Add-ons whose recorded selector matches `labels`
    #[must_use]
    pub fn add_ons_selecting(&self, labels: &BTreeMap<String, String>) -> BTreeSet<AddOnKey> {
        self.state
            .read()
            .selectors
            .iter()
            .filter(|(_, selector)| selector.matches_labels(labels))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Remove every trace of an add-on. Returns the clusters it was tracking.
    pub fn clean_maps(&self, key: &AddOnKey) -> BTreeSet<ClusterKey> {
        let mut state = self.state.write();
        let state = &mut *state;

        if let Some(references) = state.add_on_references.remove(key) {
            for reference in &references {
                unlink(&mut state.references, reference, key);
            }
        }
        let clusters = state.add_on_clusters.remove(key).unwrap_or_default();
        for cluster in &clusters {
            unlink(&mut state.clusters, cluster, key);
        }
        state.selectors.remove(key);
        clusters.into_iter().collect()
    }

    /// `true` if `cluster` is not part of the add-on's current matching set
    #[must_use]
    pub fn is_cluster_entry_removed(&self, key: &AddOnKey, cluster: &ClusterKey) -> bool {
        self.state
            .read()
            .add_on_clusters
            .get(key)
            .map_or(true, |clusters| !clusters.contains(cluster))
    }

    #[must_use]
    pub fn tracked_clusters(&self, key: &AddOnKey) -> BTreeSet<ClusterKey> {
        self.state
            .read()
            .add_on_clusters
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn tracked_references(&self, key: &AddOnKey) -> BTreeSet<ReferenceKey> {
        self.state
            .read()
            .add_on_references
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check that forward and reverse maps agree for `key`
    #[must_use]
    pub fn verify_consistency(&self, key: &AddOnKey) -> bool {
        let state = self.state.read();

        let forward_refs = state.add_on_references.get(key);
        let forward_clusters = state.add_on_clusters.get(key);

        let refs_ok = forward_refs.map_or(true, |refs| {
            refs.iter()
                .all(|r| state.references.get(r).is_some_and(|s| s.contains(key)))
        });
        let clusters_ok = forward_clusters.map_or(true, |clusters| {
            clusters
                .iter()
                .all(|c| state.clusters.get(c).is_some_and(|s| s.contains(key)))
        });
        let no_strays = state
            .references
            .iter()
            .filter(|(_, set)| set.contains(key))
            .all(|(r, _)| forward_refs.is_some_and(|refs| refs.contains(r)))
            && state
                .clusters
                .iter()
                .filter(|(_, set)| set.contains(key))
                .all(|(c, _)| forward_clusters.is_some_and(|clusters| clusters.contains(c)));
        let no_empty = state.references.values().all(|s| !s.is_empty())
            && state.clusters.values().all(|s| !s.is_empty());

        refs_ok && clusters_ok && no_strays && no_empty
    }

    /// Rebuild the entries of one add-on from scratch
    ///
    /// Scans every reverse entry so stray links left by an inconsistent state
    /// are removed too.
    pub fn resync_entry(
        &self,
        key: &AddOnKey,
        references: &BTreeSet<ReferenceKey>,
        clusters: &BTreeSet<ClusterKey>,
    ) {
        let mut state = self.state.write();
        let state = &mut *state;

        state.references.retain(|_, set| {
            set.remove(key);
            !set.is_empty()
        });
        state.clusters.retain(|_, set| {
            set.remove(key);
            !set.is_empty()
        });
        state.add_on_references.remove(key);
        state.add_on_clusters.remove(key);

        for reference in references {
            link(&mut state.references, reference.clone(), key.clone());
        }
        for cluster in clusters {
            link(&mut state.clusters, cluster.clone(), key.clone());
        }
        if !references.is_empty() {
            state
                .add_on_references
                .insert(key.clone(), references.iter().cloned().collect());
        }
        if !clusters.is_empty() {
            state
                .add_on_clusters
                .insert(key.clone(), clusters.iter().cloned().collect());
        }
    }

    /// Replace the whole index with the given entries (full resync)
    pub fn rebuild(&self, entries: impl IntoIterator<Item = IndexEntry>) {
        let mut fresh = IndexState::default();
        for entry in entries {
            for reference in &entry.references {
                link(&mut fresh.references, reference.clone(), entry.key.clone());
            }
            for cluster in &entry.clusters {
                link(&mut fresh.clusters, cluster.clone(), entry.key.clone());
            }
            if !entry.references.is_empty() {
                fresh
                    .add_on_references
                    .insert(entry.key.clone(), entry.references.into_iter().collect());
            }
            if !entry.clusters.is_empty() {
                fresh
                    .add_on_clusters
                    .insert(entry.key.clone(), entry.clusters.into_iter().collect());
            }
            if let Some(selector) = entry.selector {
                fresh.selectors.insert(entry.key, selector);
            }
        }
        *self.state.write() = fresh;
    }

    /// Every cluster targeted by at least one add-on
    #[must_use]
    pub fn all_clusters(&self) -> BTreeSet<ClusterKey> {
        self.state.read().clusters.keys().cloned().collect()
    }

    #[must_use]
    pub fn reference_entries(&self) -> usize {
        self.state.read().references.len()
    }

    #[must_use]
    pub fn cluster_entries(&self) -> usize {
        self.state.read().clusters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterType, ReferencedKind};

    fn add_on(name: &str) -> AddOnKey {
        AddOnKey::cluster_scoped(name)
    }

    fn cluster(name: &str) -> ClusterKey {
        ClusterKey::new(ClusterType::Capi, "default", name)
    }

    fn config_map(name: &str) -> ReferenceKey {
        ReferenceKey::new(ReferencedKind::ConfigMap, "default", name)
    }

    #[test]
    fn test_update_maps_links_both_directions() {
        let index = DependencyIndex::new();
        let a = add_on("a");
        let delta = index.update_maps(
            &a,
            &BTreeSet::from([config_map("cm1")]),
            &BTreeSet::from([cluster("c1")]),
        );

        assert_eq!(delta.added_clusters, BTreeSet::from([cluster("c1")]));
        assert_eq!(index.get_cluster_map_for_entry(&cluster("c1")), BTreeSet::from([a.clone()]));
        assert_eq!(index.get_reference_map_for_entry(&config_map("cm1")), BTreeSet::from([a.clone()]));
        assert!(index.verify_consistency(&a));
    }

    #[test]
    fn test_update_maps_applies_symmetric_difference_and_prunes() {
        let index = DependencyIndex::new();
        let a = add_on("a");
        index.update_maps(&a, &BTreeSet::from([config_map("cm1")]), &BTreeSet::from([cluster("c1")]));

        let delta = index.update_maps(
            &a,
            &BTreeSet::from([config_map("cm2")]),
            &BTreeSet::from([cluster("c2")]),
        );

        assert_eq!(delta.removed_clusters, BTreeSet::from([cluster("c1")]));
        assert_eq!(delta.removed_references, BTreeSet::from([config_map("cm1")]));
        assert!(index.get_cluster_map_for_entry(&cluster("c1")).is_empty());
        assert!(index.is_cluster_entry_removed(&a, &cluster("c1")));
        assert!(!index.is_cluster_entry_removed(&a, &cluster("c2")));
        assert_eq!(index.cluster_entries(), 1);
        assert_eq!(index.reference_entries(), 1);
    }

    #[test]
    fn test_shared_entries_survive_partial_removal() {
        let index = DependencyIndex::new();
        let (a, b) = (add_on("a"), add_on("b"));
        let refs = BTreeSet::from([config_map("cm1")]);
        let clusters = BTreeSet::from([cluster("c1")]);
        index.update_maps(&a, &refs, &clusters);
        index.update_maps(&b, &refs, &clusters);

        index.clean_maps(&a);

        assert_eq!(index.get_cluster_map_for_entry(&cluster("c1")), BTreeSet::from([b.clone()]));
        assert_eq!(index.get_reference_map_for_entry(&config_map("cm1")), BTreeSet::from([b]));
    }

    #[test]
    fn test_clean_maps_leaves_no_empty_entries() {
        let index = DependencyIndex::new();
        let a = add_on("a");
        index.update_maps(
            &a,
            &BTreeSet::from([config_map("cm1"), ReferenceKey::event_source("es")]),
            &BTreeSet::from([cluster("c1"), cluster("c2")]),
        );

        let tracked = index.clean_maps(&a);

        assert_eq!(tracked.len(), 2);
        assert_eq!(index.cluster_entries(), 0);
        assert_eq!(index.reference_entries(), 0);
        assert!(index.tracked_clusters(&a).is_empty());
    }

    #[test]
    fn test_resync_removes_stray_links() {
        let index = DependencyIndex::new();
        let a = add_on("a");
        index.update_maps(&a, &BTreeSet::new(), &BTreeSet::from([cluster("c1")]));
        // simulate corruption: reverse link without forward entry
        index.state.write().clusters.entry(cluster("c9")).or_default().insert(a.clone());
        assert!(!index.verify_consistency(&a));

        index.resync_entry(&a, &BTreeSet::new(), &BTreeSet::from([cluster("c1")]));

        assert!(index.verify_consistency(&a));
        assert!(index.get_cluster_map_for_entry(&cluster("c9")).is_empty());
    }

    #[test]
    fn test_rebuild_replaces_state() {
        let index = DependencyIndex::new();
        index.update_maps(&add_on("old"), &BTreeSet::new(), &BTreeSet::from([cluster("c1")]));

        index.rebuild(vec![IndexEntry {
            key: add_on("a"),
            references: BTreeSet::from([config_map("cm1")]),
            clusters: BTreeSet::from([cluster("c2")]),
            selector: Selector::parse("env=prod").ok(),
        }]);

        assert!(index.get_cluster_map_for_entry(&cluster("c1")).is_empty());
        assert_eq!(index.get_cluster_map_for_entry(&cluster("c2")).len(), 1);
        let labels = BTreeMap::from([("env".to_string(), "prod".to_string())]);
        assert_eq!(index.add_ons_selecting(&labels), BTreeSet::from([add_on("a")]));
    }
}
