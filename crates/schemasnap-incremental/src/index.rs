//! Per-type modification ledger used for delta detection
//!
//! The index is persisted separately from the object cache so change
//! detection keeps working when dependency data is missing or corrupt.

use crate::error::CacheError;
use crate::persist::{self, FlushOutcome, FORMAT_VERSION};
use chrono::{DateTime, Utc};
use schemasnap_core::{
    is_unknown, EventSink, ObjectIndexEntry, ObjectType, SchemaObjectRef, SnapshotConfig,
    SnapshotEvent,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Case-folded (schema, name)
type NameKey = (String, String);

/// On-disk layout of `object-index.json`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectIndexFile {
    version: u32,
    last_updated_utc: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reference_timestamp_utc: Option<DateTime<Utc>>,
    entries: Vec<ObjectIndexEntry>,
}

/// Difference between a bucket before and after a full-scan replacement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDiff {
    /// New objects and objects whose timestamp differs from the prior entry
    pub changed: Vec<SchemaObjectRef>,

    /// Objects present before and absent now
    pub removed: Vec<SchemaObjectRef>,
}

#[derive(Debug, Default)]
struct IndexState {
    buckets: HashMap<ObjectType, BTreeMap<NameKey, ObjectIndexEntry>>,
    reference: Option<DateTime<Utc>>,
    dirty: bool,
}

impl IndexState {
    fn from_file(file: ObjectIndexFile) -> Self {
        let mut state = Self {
            reference: file.reference_timestamp_utc,
            ..Self::default()
        };
        for entry in file.entries {
            let key = entry.object_ref().name_key();
            state
                .buckets
                .entry(entry.object_type)
                .or_default()
                .insert(key, entry);
        }
        state
    }

    fn all_entries(&self) -> Vec<ObjectIndexEntry> {
        let mut types: Vec<&ObjectType> = self.buckets.keys().collect();
        types.sort();
        types
            .into_iter()
            .flat_map(|t| self.buckets[t].values().cloned())
            .collect()
    }
}

fn in_scope(schema: &str, scope: Option<&[String]>) -> bool {
    match scope {
        Some(schemas) if !schemas.is_empty() => {
            schemas.iter().any(|s| s.eq_ignore_ascii_case(schema))
        }
        _ => true,
    }
}

fn diff_bucket(
    bucket: Option<&BTreeMap<NameKey, ObjectIndexEntry>>,
    object_type: ObjectType,
    entries: &[ObjectIndexEntry],
    scope: Option<&[String]>,
) -> IndexDiff {
    let mut diff = IndexDiff::default();
    let mut live = HashSet::new();

    for entry in entries.iter().filter(|e| e.object_type == object_type) {
        let object = entry.object_ref();
        let key = object.name_key();
        let unchanged = bucket
            .and_then(|bucket| bucket.get(&key))
            .is_some_and(|prior| {
                prior.last_modified_utc == entry.last_modified_utc
                    && prior.content_hash == entry.content_hash
            });
        if !unchanged {
            diff.changed.push(object);
        }
        live.insert(key);
    }

    if let Some(bucket) = bucket {
        diff.removed = bucket
            .iter()
            .filter(|(key, entry)| in_scope(&entry.schema, scope) && !live.contains(*key))
            .map(|(_, entry)| entry.object_ref())
            .collect();
    }

    diff
}

/// Persisted object index with the reference timestamp watermark
pub struct ObjectIndex {
    state: Mutex<IndexState>,
    path: PathBuf,
    flush_guard: tokio::sync::Mutex<()>,
    sink: Arc<dyn EventSink>,
}

impl ObjectIndex {
    /// Create an empty index persisted at `path`
    pub fn new(path: impl Into<PathBuf>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            state: Mutex::new(IndexState::default()),
            path: path.into(),
            flush_guard: tokio::sync::Mutex::new(()),
            sink,
        }
    }

    /// Load the persisted index; corrupt or unreadable state yields an empty index
    pub async fn load(path: impl Into<PathBuf>, sink: Arc<dyn EventSink>) -> Self {
        let index = Self::new(path, sink);

        match persist::read_json::<ObjectIndexFile>(&index.path).await {
            Ok(Some(file)) if file.version == FORMAT_VERSION => {
                let state = IndexState::from_file(file);
                tracing::debug!(types = state.buckets.len(), "loaded object index");
                *index.lock() = state;
            }
            Ok(Some(file)) => index.recover(format!("unsupported version {}", file.version)),
            Ok(None) => {
                tracing::debug!(path = %index.path.display(), "no object index on disk");
            }
            Err(error) => index.recover(error),
        }

        index
    }

    /// Load the index from the location named by a config
    pub async fn from_config(config: &SnapshotConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::load(config.index_path(), sink).await
    }

    fn recover(&self, error: String) {
        self.lock().dirty = true;
        self.sink.emit(SnapshotEvent::CacheRecovered {
            file: self.path.display().to_string(),
            error,
        });
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Path of the persisted index
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a prior index exists for the type
    pub fn has_entries(&self, object_type: ObjectType) -> bool {
        self.lock()
            .buckets
            .get(&object_type)
            .is_some_and(|bucket| !bucket.is_empty())
    }

    /// Number of indexed objects of one type
    pub fn entry_count(&self, object_type: ObjectType) -> usize {
        self.lock().buckets.get(&object_type).map_or(0, BTreeMap::len)
    }

    /// Entries of one type, ordered by (schema, name)
    pub fn entries(&self, object_type: ObjectType) -> Vec<ObjectIndexEntry> {
        self.lock()
            .buckets
            .get(&object_type)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every entry, ordered by type then name
    pub fn all_entries(&self) -> Vec<ObjectIndexEntry> {
        self.lock().all_entries()
    }

    /// Entry for one object
    pub fn get(&self, object: &SchemaObjectRef) -> Option<ObjectIndexEntry> {
        self.lock()
            .buckets
            .get(&object.object_type)
            .and_then(|bucket| bucket.get(&object.name_key()))
            .cloned()
    }

    /// Difference a full-scan replacement would produce, without applying it
    pub fn diff_entries(
        &self,
        object_type: ObjectType,
        entries: &[ObjectIndexEntry],
        scope: Option<&[String]>,
    ) -> IndexDiff {
        let state = self.lock();
        diff_bucket(state.buckets.get(&object_type), object_type, entries, scope)
    }

    /// Overwrite a type's bucket with the result of a full scan
    ///
    /// With a schema scope only the in-scope part of the bucket is replaced;
    /// entries of other schemas are kept as they are.
    pub fn replace_entries(
        &self,
        object_type: ObjectType,
        entries: Vec<ObjectIndexEntry>,
        scope: Option<&[String]>,
    ) -> IndexDiff {
        let mut state = self.lock();
        let diff = diff_bucket(state.buckets.get(&object_type), object_type, &entries, scope);

        let bucket = state.buckets.entry(object_type).or_default();
        bucket.retain(|_, entry| !in_scope(&entry.schema, scope));
        for entry in entries.into_iter().filter(|e| e.object_type == object_type) {
            bucket.insert(entry.object_ref().name_key(), entry);
        }

        if bucket.is_empty() {
            state.buckets.remove(&object_type);
        }
        state.dirty = true;

        diff
    }

    /// Merge rows from a delta scan into a type's bucket
    pub fn upsert_entries(&self, object_type: ObjectType, entries: Vec<ObjectIndexEntry>) {
        if entries.is_empty() {
            return;
        }

        let mut state = self.lock();
        let bucket = state.buckets.entry(object_type).or_default();
        for entry in entries.into_iter().filter(|e| e.object_type == object_type) {
            bucket.insert(entry.object_ref().name_key(), entry);
        }
        state.dirty = true;
    }

    /// Most recent catalog modification observed so far
    pub fn reference_timestamp(&self) -> Option<DateTime<Utc>> {
        self.lock().reference
    }

    /// Max-merge a newly observed modification time into the watermark
    ///
    /// Returns whether the watermark advanced. The unknown sentinel is ignored.
    pub fn update_reference_timestamp(&self, observed: DateTime<Utc>) -> bool {
        if is_unknown(&observed) {
            return false;
        }

        let mut state = self.lock();
        match state.reference {
            Some(current) if current >= observed => false,
            _ => {
                state.reference = Some(observed);
                state.dirty = true;
                true
            }
        }
    }

    /// Whether there are unflushed mutations
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Persist the index; skipped when nothing changed
    pub async fn flush(&self, cancel: &CancellationToken) -> Result<FlushOutcome, CacheError> {
        let _flushing = self.flush_guard.lock().await;

        let file = {
            let mut state = self.lock();
            if !state.dirty {
                return Ok(FlushOutcome::Skipped);
            }
            state.dirty = false;
            ObjectIndexFile {
                version: FORMAT_VERSION,
                last_updated_utc: Utc::now(),
                reference_timestamp_utc: state.reference,
                entries: state.all_entries(),
            }
        };

        match persist::write_json_atomic(&self.path, &file, cancel).await {
            Ok(()) => {
                tracing::debug!(
                    entries = file.entries.len(),
                    path = %self.path.display(),
                    "flushed object index"
                );
                Ok(FlushOutcome::Written)
            }
            Err(error) => {
                self.lock().dirty = true;
                if !matches!(error, CacheError::Cancelled) {
                    self.sink.emit(SnapshotEvent::FlushFailed {
                        file: self.path.display().to_string(),
                        error: error.to_string(),
                    });
                }
                Err(error)
            }
        }
    }

    /// Wipe in-memory and on-disk state
    pub async fn clear_all(&self, cancel: &CancellationToken) -> Result<(), CacheError> {
        let _flushing = self.flush_guard.lock().await;
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        *self.lock() = IndexState::default();
        persist::remove_file(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use schemasnap_core::{EventCode, RecordingSink, TracingSink, UNKNOWN_TIMESTAMP};

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, hour, 0, 0).unwrap()
    }

    fn proc_entry(schema: &str, name: &str, hour: u32) -> ObjectIndexEntry {
        ObjectIndexEntry::new(
            &SchemaObjectRef::new(ObjectType::Procedure, schema, name),
            ts(hour),
        )
    }

    fn index() -> ObjectIndex {
        ObjectIndex::new("unused/object-index.json", Arc::new(TracingSink))
    }

    #[test]
    fn replace_entries_diffs_keys() {
        let index = index();
        index.replace_entries(
            ObjectType::Procedure,
            vec![proc_entry("dbo", "A", 1), proc_entry("dbo", "B", 1)],
            None,
        );

        let diff = index.replace_entries(
            ObjectType::Procedure,
            vec![proc_entry("dbo", "B", 2), proc_entry("dbo", "C", 1)],
            None,
        );

        let names = |refs: &[SchemaObjectRef]| -> Vec<String> {
            refs.iter().map(SchemaObjectRef::qualified_name).collect()
        };
        assert_eq!(names(&diff.changed), vec!["dbo.B", "dbo.C"]);
        assert_eq!(names(&diff.removed), vec!["dbo.A"]);
        assert_eq!(index.entry_count(ObjectType::Procedure), 2);
    }

    #[test]
    fn replace_with_nothing_removes_all() {
        let index = index();
        let prior: Vec<_> = (0..50).map(|i| proc_entry("dbo", &format!("P{i}"), 1)).collect();
        index.replace_entries(ObjectType::Procedure, prior, None);

        let diff = index.replace_entries(ObjectType::Procedure, Vec::new(), None);

        assert_eq!(diff.removed.len(), 50);
        assert!(!index.has_entries(ObjectType::Procedure));
    }

    #[test]
    fn scoped_replace_keeps_other_schemas() {
        let index = index();
        index.replace_entries(
            ObjectType::Procedure,
            vec![proc_entry("dbo", "A", 1), proc_entry("audit", "Log", 1)],
            None,
        );

        let scope = vec!["DBO".to_string()];
        let diff = index.replace_entries(ObjectType::Procedure, Vec::new(), Some(scope.as_slice()));

        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].qualified_name(), "dbo.A");
        assert!(index
            .get(&SchemaObjectRef::new(ObjectType::Procedure, "audit", "log"))
            .is_some());
    }

    #[test]
    fn diff_entries_does_not_mutate() {
        let index = index();
        index.replace_entries(ObjectType::Procedure, vec![proc_entry("dbo", "A", 1)], None);

        let diff = index.diff_entries(ObjectType::Procedure, &[proc_entry("dbo", "B", 1)], None);

        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.removed.len(), 1);
        assert!(index
            .get(&SchemaObjectRef::new(ObjectType::Procedure, "dbo", "A"))
            .is_some());
        assert_eq!(index.entry_count(ObjectType::Procedure), 1);
    }

    #[test]
    fn upsert_merges_without_removing() {
        let index = index();
        index.replace_entries(ObjectType::Procedure, vec![proc_entry("dbo", "A", 1)], None);
        index.upsert_entries(ObjectType::Procedure, vec![proc_entry("dbo", "B", 2)]);
        index.upsert_entries(ObjectType::Procedure, vec![proc_entry("DBO", "a", 3)]);

        assert_eq!(index.entry_count(ObjectType::Procedure), 2);
        let a = index
            .get(&SchemaObjectRef::new(ObjectType::Procedure, "dbo", "A"))
            .unwrap();
        assert_eq!(a.last_modified_utc, ts(3));
    }

    #[test]
    fn reference_timestamp_is_monotonic() {
        let index = index();
        assert!(index.update_reference_timestamp(ts(5)));
        assert!(!index.update_reference_timestamp(ts(3)));
        assert!(!index.update_reference_timestamp(UNKNOWN_TIMESTAMP));
        assert_eq!(index.reference_timestamp(), Some(ts(5)));
    }

    #[tokio::test]
    async fn flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache/object-index.json");
        let cancel = CancellationToken::new();

        let index = ObjectIndex::new(&path, Arc::new(TracingSink));
        index.replace_entries(ObjectType::Procedure, vec![proc_entry("dbo", "A", 1)], None);
        index.update_reference_timestamp(ts(1));

        assert_eq!(index.flush(&cancel).await.unwrap(), FlushOutcome::Written);
        assert_eq!(index.flush(&cancel).await.unwrap(), FlushOutcome::Skipped);

        let reloaded = ObjectIndex::load(&path, Arc::new(TracingSink)).await;
        assert_eq!(reloaded.all_entries(), index.all_entries());
        assert_eq!(reloaded.reference_timestamp(), Some(ts(1)));
        assert!(!reloaded.is_dirty());
    }

    #[tokio::test]
    async fn version_mismatch_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object-index.json");
        tokio::fs::write(
            &path,
            br#"{"version": 99, "lastUpdatedUtc": "2024-01-01T00:00:00Z", "entries": []}"#,
        )
        .await
        .unwrap();

        let sink = Arc::new(RecordingSink::new());
        let index = ObjectIndex::load(&path, sink.clone()).await;

        assert!(index.all_entries().is_empty());
        assert_eq!(sink.count(EventCode::CacheRecovered), 1);
    }

    #[tokio::test]
    async fn clear_all_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object-index.json");
        let cancel = CancellationToken::new();

        let index = ObjectIndex::new(&path, Arc::new(TracingSink));
        index.upsert_entries(ObjectType::Procedure, vec![proc_entry("dbo", "A", 1)]);
        index.flush(&cancel).await.unwrap();

        index.clear_all(&cancel).await.unwrap();
        assert!(!path.exists());
        assert_eq!(index.reference_timestamp(), None);
    }
}
