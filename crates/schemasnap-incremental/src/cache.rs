//! Persisted object cache with dependency tracking
//!
//! The cache maps every ever-observed schema object to its last known
//! modification time, content fingerprint and dependency list. It owns the
//! reverse dependency graph used for invalidation cascades.
//!
//! All in-memory state sits behind one mutex. The guard is never held across
//! an `.await`: flushing copies the state out first and writes afterwards.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let cache = ObjectCache::load(objects_path, graph_path, sink).await;
//!
//! cache.set_dependencies(&get_user, &[users_table.clone()]);
//! cache.update_last_modified(&get_user, modified);
//!
//! // dbo.Users changed: everything reading it must be recomputed
//! let invalidated = cache.invalidate_dependents(&users_table);
//!
//! cache.flush(&cancel).await?;
//! ```

use crate::error::CacheError;
use crate::graph::DependencyGraph;
use crate::persist::{self, FlushOutcome, FORMAT_VERSION};
use chrono::{DateTime, Utc};
use schemasnap_core::{
    EventSink, ObjectIndexEntry, SchemaObjectCacheEntry, SchemaObjectRef, SnapshotConfig,
    SnapshotEvent, UNKNOWN_TIMESTAMP,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// On-disk layout of `schema-objects.json`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaObjectsFile {
    version: u32,
    last_updated_utc: DateTime<Utc>,
    entries: Vec<SchemaObjectCacheEntry>,
}

/// One node of the `dependency-graph.json` debug export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    #[serde(flatten)]
    pub object: SchemaObjectRef,
    pub dependencies: Vec<SchemaObjectRef>,
    pub dependents: Vec<SchemaObjectRef>,
}

/// On-disk layout of `dependency-graph.json`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyGraphFile {
    pub version: u32,
    pub last_updated_utc: DateTime<Utc>,
    pub nodes: Vec<GraphNode>,
}

/// Result of writing an analysis into the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    /// Whether the object had a cache entry before
    pub existed: bool,

    /// Whether a previously stored fingerprint differs from the new one
    pub content_changed: bool,

    /// Edges added to the reverse index
    pub edges_added: usize,

    /// Edges removed from the reverse index
    pub edges_removed: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<SchemaObjectRef, SchemaObjectCacheEntry>,
    graph: DependencyGraph,
    dirty: bool,
}

impl CacheState {
    fn from_entries(entries: Vec<SchemaObjectCacheEntry>) -> Self {
        let mut map: HashMap<SchemaObjectRef, SchemaObjectCacheEntry> = HashMap::new();
        for mut entry in entries {
            entry.dependencies = normalize_dependencies(&entry.object_ref(), &entry.dependencies);
            map.insert(entry.object_ref(), entry);
        }

        let graph = DependencyGraph::rebuild(map.values());
        Self {
            entries: map,
            graph,
            dirty: false,
        }
    }

    fn entry_mut(&mut self, object: &SchemaObjectRef) -> &mut SchemaObjectCacheEntry {
        self.entries
            .entry(object.clone())
            .or_insert_with(|| SchemaObjectCacheEntry::new(object, UNKNOWN_TIMESTAMP))
    }

    fn replace_dependencies(
        &mut self,
        dependent: &SchemaObjectRef,
        dependencies: &[SchemaObjectRef],
    ) -> (usize, usize) {
        let next = normalize_dependencies(dependent, dependencies);
        let entry = self.entry_mut(dependent);
        entry
            .dependency_versions
            .retain(|version| next.contains(&version.object_ref()));
        let previous = std::mem::replace(&mut entry.dependencies, next.clone());
        self.graph.replace_edges(dependent, &previous, &next)
    }

    fn sorted_entries(&self) -> Vec<SchemaObjectCacheEntry> {
        let mut entries: Vec<SchemaObjectCacheEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.object_ref().cmp(&b.object_ref()));
        entries
    }

    fn graph_nodes(&self) -> Vec<GraphNode> {
        let reverse = self.graph.to_sorted_map();

        let mut objects: BTreeSet<SchemaObjectRef> = self.entries.keys().cloned().collect();
        objects.extend(reverse.keys().cloned());

        objects
            .into_iter()
            .map(|object| {
                let dependencies = self
                    .entries
                    .get(&object)
                    .map(|e| e.dependencies.clone())
                    .unwrap_or_default();
                let dependents = reverse
                    .get(&object)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default();
                GraphNode {
                    object,
                    dependencies,
                    dependents,
                }
            })
            .collect()
    }
}

/// Deduplicate case-insensitively, keep first-seen order, drop self references
fn normalize_dependencies(
    dependent: &SchemaObjectRef,
    dependencies: &[SchemaObjectRef],
) -> Vec<SchemaObjectRef> {
    let mut seen = HashSet::new();
    dependencies
        .iter()
        .filter(|d| *d != dependent && seen.insert((*d).clone()))
        .cloned()
        .collect()
}

/// Persisted per-object cache and dependency graph
pub struct ObjectCache {
    state: Mutex<CacheState>,
    objects_path: PathBuf,
    graph_path: PathBuf,

    /// Serializes flushes without blocking in-memory access
    flush_guard: tokio::sync::Mutex<()>,

    sink: Arc<dyn EventSink>,
}

impl ObjectCache {
    /// Create an empty cache persisted at the given paths
    pub fn new(
        objects_path: impl Into<PathBuf>,
        graph_path: impl Into<PathBuf>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            objects_path: objects_path.into(),
            graph_path: graph_path.into(),
            flush_guard: tokio::sync::Mutex::new(()),
            sink,
        }
    }

    /// Load persisted entries and rebuild the reverse graph from them
    ///
    /// Missing state yields an empty cache. Unreadable, corrupt or
    /// version-mismatched state is discarded (cold start) and the cache is
    /// marked dirty so the next flush replaces the bad file.
    pub async fn load(
        objects_path: impl Into<PathBuf>,
        graph_path: impl Into<PathBuf>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let cache = Self::new(objects_path, graph_path, sink);

        let loaded = match persist::read_json::<SchemaObjectsFile>(&cache.objects_path).await {
            Ok(Some(file)) if file.version == FORMAT_VERSION => Ok(Some(file.entries)),
            Ok(Some(file)) => Err(format!("unsupported version {}", file.version)),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };

        match loaded {
            Ok(Some(entries)) => {
                let state = CacheState::from_entries(entries);
                tracing::debug!(
                    entries = state.entries.len(),
                    edges = state.graph.edge_count(),
                    "loaded object cache"
                );
                *cache.lock() = state;
            }
            Ok(None) => {
                tracing::debug!(path = %cache.objects_path.display(), "no object cache on disk");
            }
            Err(error) => {
                cache.lock().dirty = true;
                cache.sink.emit(SnapshotEvent::CacheRecovered {
                    file: cache.objects_path.display().to_string(),
                    error,
                });
            }
        }

        cache
    }

    /// Load the cache from the locations named by a config
    pub async fn from_config(config: &SnapshotConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::load(config.schema_objects_path(), config.graph_path(), sink).await
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Path of the persisted entries
    pub fn objects_path(&self) -> &Path {
        &self.objects_path
    }

    /// Last modification time, or `None` if the object was never cached
    pub fn get_last_modified(&self, object: &SchemaObjectRef) -> Option<DateTime<Utc>> {
        self.lock().entries.get(object).map(|e| e.last_modified_utc)
    }

    /// Snapshot of one entry
    pub fn get_entry(&self, object: &SchemaObjectRef) -> Option<SchemaObjectCacheEntry> {
        self.lock().entries.get(object).cloned()
    }

    /// Snapshot of every entry, ordered by object
    pub fn entries(&self) -> Vec<SchemaObjectCacheEntry> {
        self.lock().sorted_entries()
    }

    /// Number of cached objects
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no objects
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether there are unflushed mutations
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Upsert the modification time of an object
    pub fn update_last_modified(&self, object: &SchemaObjectRef, last_modified: DateTime<Utc>) {
        let mut state = self.lock();
        state.entry_mut(object).last_modified_utc = last_modified;
        state.dirty = true;
    }

    /// Upsert the content fingerprint; returns whether a previous value changed
    pub fn set_content_hash(&self, object: &SchemaObjectRef, content_hash: Option<String>) -> bool {
        let mut state = self.lock();
        let entry = state.entry_mut(object);
        let changed = matches!((&entry.content_hash, &content_hash), (Some(old), Some(new)) if old != new);
        entry.content_hash = content_hash;
        state.dirty = true;
        changed
    }

    /// Replace the full dependency set of `dependent`
    ///
    /// Only the reverse buckets of added and removed edges are touched.
    /// Returns `(added, removed)` edge counts.
    pub fn set_dependencies(
        &self,
        dependent: &SchemaObjectRef,
        dependencies: &[SchemaObjectRef],
    ) -> (usize, usize) {
        let mut state = self.lock();
        let counts = state.replace_dependencies(dependent, dependencies);
        state.dirty = true;
        counts
    }

    /// Write a fresh analysis result in one critical section
    pub fn record(
        &self,
        object: &SchemaObjectRef,
        last_modified: DateTime<Utc>,
        dependencies: &[SchemaObjectRef],
        content_hash: Option<String>,
    ) -> RecordOutcome {
        let mut state = self.lock();
        let existed = state.entries.contains_key(object);
        let (edges_added, edges_removed) = state.replace_dependencies(object, dependencies);

        let entry = state.entry_mut(object);
        let content_changed = matches!(
            (&entry.content_hash, &content_hash),
            (Some(old), Some(new)) if old != new
        );
        entry.last_modified_utc = last_modified;
        entry.cached_utc = Utc::now();
        entry.content_hash = content_hash;
        state.dirty = true;

        RecordOutcome {
            existed,
            content_changed,
            edges_added,
            edges_removed,
        }
    }

    /// Store the catalog times the dependencies of `object` had when it was analyzed
    ///
    /// Versions for objects outside the current dependency list are dropped.
    pub fn set_dependency_versions(&self, object: &SchemaObjectRef, versions: Vec<ObjectIndexEntry>) {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(object) else {
            return;
        };
        entry.dependency_versions = versions
            .into_iter()
            .filter(|version| entry.dependencies.contains(&version.object_ref()))
            .collect();
        state.dirty = true;
    }

    /// Reset every transitive dependent of `changed` to the unknown sentinel
    ///
    /// Breadth-first over the reverse graph with a visited set, so cycles are
    /// safe and each node is reset once. Entries are never deleted. Returns
    /// the invalidated objects in visit order.
    pub fn invalidate_dependents(&self, changed: &SchemaObjectRef) -> Vec<SchemaObjectRef> {
        let invalidated = {
            let mut state = self.lock();
            let reached = state.graph.downstream(changed);
            for object in &reached {
                if let Some(entry) = state.entries.get_mut(object) {
                    entry.last_modified_utc = UNKNOWN_TIMESTAMP;
                }
            }
            if !reached.is_empty() {
                state.dirty = true;
            }
            reached
        };

        if !invalidated.is_empty() {
            self.sink.emit(SnapshotEvent::InvalidationCascade {
                origin: changed.clone(),
                invalidated: invalidated.clone(),
            });
        }

        invalidated
    }

    /// Objects that would be invalidated by a change to `object` (dry run)
    pub fn downstream_of(&self, object: &SchemaObjectRef) -> Vec<SchemaObjectRef> {
        self.lock().graph.downstream(object)
    }

    /// Direct dependents of an object
    pub fn dependents_of(&self, object: &SchemaObjectRef) -> Vec<SchemaObjectRef> {
        self.lock().graph.dependents(object)
    }

    /// Ordered copy of the reverse-adjacency index
    pub fn reverse_adjacency(&self) -> BTreeMap<SchemaObjectRef, BTreeSet<SchemaObjectRef>> {
        self.lock().graph.to_sorted_map()
    }

    /// Debug listing of every node with its edges in both directions
    pub fn graph_nodes(&self) -> Vec<GraphNode> {
        self.lock().graph_nodes()
    }

    /// Drop an object that no longer exists in the catalog
    ///
    /// Prunes it from the reverse buckets of everything it depended on and
    /// strips it from the dependency list of everything that depended on it.
    /// Returns whether any state changed.
    pub fn remove(&self, object: &SchemaObjectRef) -> bool {
        let stripped_from = {
            let mut state = self.lock();

            let removed = state.entries.remove(object);
            if let Some(entry) = &removed {
                for dependency in &entry.dependencies {
                    state.graph.remove_edge(dependency, object);
                }
            }

            let dependents = state.graph.take_dependents(object);
            for dependent in &dependents {
                if let Some(entry) = state.entries.get_mut(dependent) {
                    entry.dependencies.retain(|d| d != object);
                    entry
                        .dependency_versions
                        .retain(|version| version.object_ref() != *object);
                }
            }

            if removed.is_none() && dependents.is_empty() {
                return false;
            }

            state.dirty = true;
            dependents.len()
        };

        self.sink.emit(SnapshotEvent::ObjectRemoved {
            object: object.clone(),
            stripped_from,
        });
        true
    }

    /// Persist entries and the derived dependency listing
    ///
    /// Skipped when nothing changed since the last flush. On failure the
    /// cache is re-marked dirty so a later flush retries; on cancellation the
    /// on-disk files are left exactly as they were.
    pub async fn flush(&self, cancel: &CancellationToken) -> Result<FlushOutcome, CacheError> {
        let _flushing = self.flush_guard.lock().await;

        let (objects_file, graph_file) = {
            let mut state = self.lock();
            if !state.dirty {
                return Ok(FlushOutcome::Skipped);
            }
            state.dirty = false;

            let now = Utc::now();
            (
                SchemaObjectsFile {
                    version: FORMAT_VERSION,
                    last_updated_utc: now,
                    entries: state.sorted_entries(),
                },
                DependencyGraphFile {
                    version: FORMAT_VERSION,
                    last_updated_utc: now,
                    nodes: state.graph_nodes(),
                },
            )
        };

        let result = async {
            persist::write_json_atomic(&self.objects_path, &objects_file, cancel).await?;
            persist::write_json_atomic(&self.graph_path, &graph_file, cancel).await
        }
        .await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    entries = objects_file.entries.len(),
                    path = %self.objects_path.display(),
                    "flushed object cache"
                );
                Ok(FlushOutcome::Written)
            }
            Err(error) => {
                self.lock().dirty = true;
                if !matches!(error, CacheError::Cancelled) {
                    self.sink.emit(SnapshotEvent::FlushFailed {
                        file: self.objects_path.display().to_string(),
                        error: error.to_string(),
                    });
                }
                Err(error)
            }
        }
    }

    /// Wipe in-memory and on-disk state for a forced cold run
    pub async fn clear_all(&self, cancel: &CancellationToken) -> Result<(), CacheError> {
        let _flushing = self.flush_guard.lock().await;
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        *self.lock() = CacheState::default();

        persist::remove_file(&self.objects_path).await?;
        persist::remove_file(&self.graph_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use schemasnap_core::{ObjectType, RecordingSink, TracingSink};

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, hour, 0, 0).unwrap()
    }

    fn table(name: &str) -> SchemaObjectRef {
        SchemaObjectRef::new(ObjectType::Table, "dbo", name)
    }

    fn view(name: &str) -> SchemaObjectRef {
        SchemaObjectRef::new(ObjectType::View, "dbo", name)
    }

    fn proc(name: &str) -> SchemaObjectRef {
        SchemaObjectRef::new(ObjectType::Procedure, "dbo", name)
    }

    fn memory_cache() -> ObjectCache {
        ObjectCache::new(
            "unused/schema-objects.json",
            "unused/dependency-graph.json",
            Arc::new(TracingSink),
        )
    }

    fn temp_cache(dir: &Path, sink: Arc<dyn EventSink>) -> ObjectCache {
        ObjectCache::new(
            dir.join("cache/schema-objects.json"),
            dir.join("cache/dependency-graph.json"),
            sink,
        )
    }

    #[test]
    fn test_get_last_modified_unknown_object() {
        let cache = memory_cache();
        assert_eq!(cache.get_last_modified(&table("Users")), None);
        assert!(!cache.is_dirty());
    }

    #[test]
    fn test_update_last_modified_upserts() {
        let cache = memory_cache();
        cache.update_last_modified(&table("Users"), ts(1));
        cache.update_last_modified(&table("USERS"), ts(2));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_last_modified(&table("users")), Some(ts(2)));
        assert!(cache.is_dirty());
    }

    #[test]
    fn test_set_dependencies_replaces_edges() {
        let cache = memory_cache();
        let a = proc("A");

        cache.set_dependencies(&a, &[table("B"), table("C")]);
        let counts = cache.set_dependencies(&a, &[table("C"), table("D")]);

        assert_eq!(counts, (1, 1));
        assert!(cache.dependents_of(&table("B")).is_empty());
        assert_eq!(cache.dependents_of(&table("C")), vec![a.clone()]);
        assert_eq!(cache.dependents_of(&table("D")), vec![a.clone()]);

        // Lazily created with the sentinel
        assert_eq!(cache.get_last_modified(&a), Some(UNKNOWN_TIMESTAMP));
    }

    #[test]
    fn test_set_dependencies_dedupes_and_drops_self_edges() {
        let cache = memory_cache();
        let v = view("V");

        cache.set_dependencies(&v, &[table("Users"), table("USERS"), v.clone()]);

        let entry = cache.get_entry(&v).unwrap();
        assert_eq!(entry.dependencies, vec![table("Users")]);
        assert!(cache.dependents_of(&v).is_empty());
    }

    #[test]
    fn test_invalidate_dependents_resets_to_sentinel() {
        let sink = Arc::new(RecordingSink::new());
        let cache = ObjectCache::new("a.json", "b.json", sink.clone());
        let users = table("Users");
        let get_user = proc("GetUser");

        cache.record(&get_user, ts(1), &[users.clone()], None);
        cache.update_last_modified(&users, ts(1));

        let invalidated = cache.invalidate_dependents(&users);

        assert_eq!(invalidated, vec![get_user.clone()]);
        assert_eq!(cache.get_last_modified(&get_user), Some(UNKNOWN_TIMESTAMP));
        assert_eq!(cache.get_last_modified(&users), Some(ts(1)));
        assert_eq!(cache.len(), 2);
        assert_eq!(sink.count(schemasnap_core::EventCode::InvalidationCascade), 1);
    }

    #[test]
    fn test_invalidate_dependents_handles_cycles() {
        let cache = memory_cache();
        let (a, b) = (view("A"), view("B"));

        cache.record(&a, ts(1), &[b.clone()], None);
        cache.record(&b, ts(1), &[a.clone()], None);

        let invalidated = cache.invalidate_dependents(&a);
        assert_eq!(invalidated.len(), 2);
        assert!(invalidated.contains(&a));
        assert!(invalidated.contains(&b));
    }

    #[test]
    fn test_invalidate_without_dependents_is_clean() {
        let cache = memory_cache();
        assert!(cache.invalidate_dependents(&table("Orphan")).is_empty());
        assert!(!cache.is_dirty());
    }

    #[test]
    fn test_remove_prunes_both_directions() {
        let cache = memory_cache();
        let users = table("Users");
        let active = view("ActiveUsers");
        let get_user = proc("GetUser");

        cache.record(&users, ts(1), &[], None);
        cache.record(&active, ts(1), &[users.clone()], None);
        cache.record(&get_user, ts(1), &[active.clone(), users.clone()], None);

        assert!(cache.remove(&active));

        assert!(cache.get_entry(&active).is_none());
        assert_eq!(cache.dependents_of(&users), vec![get_user.clone()]);
        assert!(cache.dependents_of(&active).is_empty());
        assert_eq!(cache.get_entry(&get_user).unwrap().dependencies, vec![users.clone()]);

        assert!(!cache.remove(&active));
    }

    #[test]
    fn test_remove_uncached_dependency_strips_dependents() {
        let cache = memory_cache();
        let get_user = proc("GetUser");
        cache.record(&get_user, ts(1), &[table("Users")], None);

        assert!(cache.remove(&table("Users")));
        assert!(cache.get_entry(&get_user).unwrap().dependencies.is_empty());
        assert!(cache.reverse_adjacency().is_empty());
    }

    #[test]
    fn test_record_reports_content_changes() {
        let cache = memory_cache();
        let v = view("V");

        let first = cache.record(&v, ts(1), &[], Some("aaa".to_string()));
        assert!(!first.existed);
        assert!(!first.content_changed);

        let same = cache.record(&v, ts(2), &[], Some("aaa".to_string()));
        assert!(same.existed);
        assert!(!same.content_changed);

        let changed = cache.record(&v, ts(3), &[], Some("bbb".to_string()));
        assert!(changed.content_changed);
        assert!(cache.set_content_hash(&v, Some("ccc".to_string())));
    }

    #[test]
    fn test_dependency_versions_follow_the_dependency_list() {
        let cache = memory_cache();
        let get_user = proc("GetUser");
        let (users, orders) = (table("Users"), table("Orders"));

        cache.record(&get_user, ts(1), &[users.clone(), orders.clone()], None);
        cache.set_dependency_versions(
            &get_user,
            vec![
                ObjectIndexEntry::new(&users, ts(1)),
                ObjectIndexEntry::new(&orders, ts(2)),
                ObjectIndexEntry::new(&table("Unrelated"), ts(3)),
            ],
        );

        let entry = cache.get_entry(&get_user).unwrap();
        assert_eq!(entry.dependency_versions.len(), 2);
        assert_eq!(entry.dependency_version(&orders), Some(ts(2)));

        cache.set_dependencies(&get_user, &[users.clone()]);
        assert_eq!(cache.get_entry(&get_user).unwrap().dependency_version(&orders), None);

        cache.remove(&users);
        assert!(cache.get_entry(&get_user).unwrap().dependency_versions.is_empty());
    }

    #[tokio::test]
    async fn test_flush_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = temp_cache(dir.path(), Arc::new(TracingSink));
        let cancel = CancellationToken::new();

        cache.record(&proc("GetUser"), ts(1), &[table("Users")], None);

        assert_eq!(cache.flush(&cancel).await.unwrap(), FlushOutcome::Written);
        assert_eq!(cache.flush(&cancel).await.unwrap(), FlushOutcome::Skipped);
        assert!(dir.path().join("cache/schema-objects.json").exists());
        assert!(dir.path().join("cache/dependency-graph.json").exists());
    }

    #[tokio::test]
    async fn test_flush_and_reload_rebuilds_identical_graph() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let cache = temp_cache(dir.path(), Arc::new(TracingSink));

        cache.record(&view("ActiveUsers"), ts(1), &[table("Users")], Some("h1".to_string()));
        cache.record(&proc("GetUser"), ts(2), &[view("ActiveUsers"), table("Users")], None);
        cache.record(&proc("GetOrders"), ts(3), &[table("Orders"), table("Users")], None);
        cache.flush(&cancel).await.unwrap();

        let reloaded = ObjectCache::load(
            dir.path().join("cache/schema-objects.json"),
            dir.path().join("cache/dependency-graph.json"),
            Arc::new(TracingSink),
        )
        .await;

        assert_eq!(reloaded.reverse_adjacency(), cache.reverse_adjacency());
        assert_eq!(reloaded.entries(), cache.entries());
        assert!(!reloaded.is_dirty());
    }

    #[tokio::test]
    async fn test_load_ignores_graph_file() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let cache = temp_cache(dir.path(), Arc::new(TracingSink));
        cache.record(&proc("GetUser"), ts(1), &[table("Users")], None);
        cache.flush(&cancel).await.unwrap();

        // A tampered debug export must not affect the rebuilt graph
        tokio::fs::write(dir.path().join("cache/dependency-graph.json"), b"garbage")
            .await
            .unwrap();

        let reloaded = temp_cache_loaded(dir.path()).await;
        assert_eq!(reloaded.dependents_of(&table("Users")), vec![proc("GetUser")]);
    }

    async fn temp_cache_loaded(dir: &Path) -> ObjectCache {
        ObjectCache::load(
            dir.join("cache/schema-objects.json"),
            dir.join("cache/dependency-graph.json"),
            Arc::new(TracingSink),
        )
        .await
    }

    #[tokio::test]
    async fn test_corrupt_state_recovers_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("cache")).await.unwrap();
        tokio::fs::write(dir.path().join("cache/schema-objects.json"), b"{ not json")
            .await
            .unwrap();

        let sink = Arc::new(RecordingSink::new());
        let cache = ObjectCache::load(
            dir.path().join("cache/schema-objects.json"),
            dir.path().join("cache/dependency-graph.json"),
            sink.clone(),
        )
        .await;

        assert!(cache.is_empty());
        assert!(cache.is_dirty());
        assert_eq!(sink.count(schemasnap_core::EventCode::CacheRecovered), 1);
    }

    #[tokio::test]
    async fn test_failed_flush_stays_dirty() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the cache directory should be
        let blocker = dir.path().join("cache");
        tokio::fs::write(&blocker, b"not a directory").await.unwrap();

        let sink = Arc::new(RecordingSink::new());
        let cache = temp_cache(dir.path(), sink.clone());
        cache.update_last_modified(&table("Users"), ts(1));

        assert!(cache.flush(&CancellationToken::new()).await.is_err());
        assert!(cache.is_dirty());
        assert_eq!(sink.count(schemasnap_core::EventCode::FlushFailed), 1);
    }

    #[tokio::test]
    async fn test_cancelled_flush_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = temp_cache(dir.path(), Arc::new(TracingSink));
        cache.update_last_modified(&table("Users"), ts(1));
        cache.flush(&CancellationToken::new()).await.unwrap();

        let before = tokio::fs::read(dir.path().join("cache/schema-objects.json")).await.unwrap();

        cache.update_last_modified(&table("Orders"), ts(2));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(cache.flush(&cancel).await, Err(CacheError::Cancelled)));

        let after = tokio::fs::read(dir.path().join("cache/schema-objects.json")).await.unwrap();
        assert_eq!(before, after);
        assert!(cache.is_dirty());
    }

    #[tokio::test]
    async fn test_clear_all_wipes_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let cache = temp_cache(dir.path(), Arc::new(TracingSink));
        cache.record(&proc("GetUser"), ts(1), &[table("Users")], None);
        cache.flush(&cancel).await.unwrap();

        cache.clear_all(&cancel).await.unwrap();

        assert!(cache.is_empty());
        assert!(cache.reverse_adjacency().is_empty());
        assert!(!dir.path().join("cache/schema-objects.json").exists());
        assert!(!dir.path().join("cache/dependency-graph.json").exists());
    }

    #[test]
    fn test_graph_nodes_list_both_directions() {
        let cache = memory_cache();
        cache.record(&proc("GetUser"), ts(1), &[table("Users")], None);

        let nodes = cache.graph_nodes();
        assert_eq!(nodes.len(), 2);

        let users = nodes.iter().find(|n| n.object == table("Users")).unwrap();
        assert!(users.dependencies.is_empty());
        assert_eq!(users.dependents, vec![proc("GetUser")]);

        let json = serde_json::to_value(&nodes[0]).unwrap();
        assert!(json.get("type").is_some());
        assert!(json.get("dependents").is_some());
    }
}
