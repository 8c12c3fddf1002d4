//! Reverse-adjacency index over cached dependency lists
//!
//! The graph is a derived index: it is rebuilt from each entry's forward
//! dependencies on load and then maintained incrementally. It is never loaded
//! from a persisted copy.

use schemasnap_core::{SchemaObjectCacheEntry, SchemaObjectRef};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// Dependency -> set of objects that depend on it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    dependents: HashMap<SchemaObjectRef, HashSet<SchemaObjectRef>>,
}

impl DependencyGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the reverse index from forward dependency lists
    pub fn rebuild<'a>(entries: impl IntoIterator<Item = &'a SchemaObjectCacheEntry>) -> Self {
        let mut graph = Self::new();
        for entry in entries {
            let dependent = entry.object_ref();
            for dependency in &entry.dependencies {
                graph.add_edge(dependency, &dependent);
            }
        }
        graph
    }

    /// Record that `dependent` references `dependency`
    pub fn add_edge(&mut self, dependency: &SchemaObjectRef, dependent: &SchemaObjectRef) -> bool {
        self.dependents
            .entry(dependency.clone())
            .or_default()
            .insert(dependent.clone())
    }

    /// Drop one edge; empty buckets are removed
    pub fn remove_edge(&mut self, dependency: &SchemaObjectRef, dependent: &SchemaObjectRef) -> bool {
        let Some(bucket) = self.dependents.get_mut(dependency) else {
            return false;
        };

        let removed = bucket.remove(dependent);
        if bucket.is_empty() {
            self.dependents.remove(dependency);
        }
        removed
    }

    /// Replace `dependent`'s edges, touching only the symmetric difference
    ///
    /// Returns `(added, removed)` edge counts.
    pub fn replace_edges(
        &mut self,
        dependent: &SchemaObjectRef,
        previous: &[SchemaObjectRef],
        next: &[SchemaObjectRef],
    ) -> (usize, usize) {
        let previous: HashSet<&SchemaObjectRef> = previous.iter().collect();
        let next: HashSet<&SchemaObjectRef> = next.iter().collect();

        let mut added = 0;
        for dependency in next.difference(&previous) {
            if self.add_edge(dependency, dependent) {
                added += 1;
            }
        }

        let mut removed = 0;
        for dependency in previous.difference(&next) {
            if self.remove_edge(dependency, dependent) {
                removed += 1;
            }
        }

        (added, removed)
    }

    /// Remove and return the whole dependents bucket of `dependency`
    pub fn take_dependents(&mut self, dependency: &SchemaObjectRef) -> HashSet<SchemaObjectRef> {
        self.dependents.remove(dependency).unwrap_or_default()
    }

    /// Direct dependents of an object, sorted
    pub fn dependents(&self, dependency: &SchemaObjectRef) -> Vec<SchemaObjectRef> {
        let mut dependents: Vec<SchemaObjectRef> = self
            .dependents
            .get(dependency)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default();
        dependents.sort();
        dependents
    }

    /// All transitive dependents in breadth-first order
    ///
    /// Every reachable node appears exactly once, cycles included. The start
    /// node itself appears only if it is reachable through a cycle.
    pub fn downstream(&self, start: &SchemaObjectRef) -> Vec<SchemaObjectRef> {
        let mut visited: HashSet<SchemaObjectRef> = HashSet::new();
        let mut queue: VecDeque<SchemaObjectRef> = VecDeque::new();
        let mut result = Vec::new();

        // Start with direct dependents
        queue.extend(self.dependents(start));

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }

            for next in self.dependents(&current) {
                if !visited.contains(&next) {
                    queue.push_back(next);
                }
            }

            result.push(current);
        }

        result
    }

    /// Number of dependency buckets
    pub fn node_count(&self) -> usize {
        self.dependents.len()
    }

    /// Total number of edges
    pub fn edge_count(&self) -> usize {
        self.dependents.values().map(HashSet::len).sum()
    }

    /// Ordered copy of the whole index
    pub fn to_sorted_map(&self) -> BTreeMap<SchemaObjectRef, BTreeSet<SchemaObjectRef>> {
        self.dependents
            .iter()
            .map(|(dependency, bucket)| (dependency.clone(), bucket.iter().cloned().collect()))
            .collect()
    }
}
