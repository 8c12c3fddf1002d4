//! Change detection against the live catalog
//!
//! Chooses between a full scan (cold start, removal detection) and a narrow
//! delta scan per object type, and keeps the object index in step with what
//! the catalog reported.

use crate::error::SnapshotError;
use crate::index::ObjectIndex;
use chrono::{DateTime, Utc};
use schemasnap_catalog::{CatalogAdapter, CatalogQuery, CatalogRow};
use schemasnap_core::{EventSink, ObjectIndexEntry, ObjectType, SchemaObjectRef, SnapshotEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How the rows of an [`ObjectChanges`] were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    /// Unconstrained listing
    Full,

    /// Objects modified after the reference timestamp
    Delta,

    /// Full listing retried after an empty delta
    FallbackFull,
}

impl ScanKind {
    /// Whether the scan listed every object of the type
    pub fn is_full(&self) -> bool {
        !matches!(self, Self::Delta)
    }
}

/// Changes of one object type since the previous run
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectChanges {
    pub object_type: ObjectType,

    /// Rows for objects that are new or changed
    pub modified: Vec<CatalogRow>,

    /// Objects that disappeared from the catalog (full scans only)
    pub removed: Vec<SchemaObjectRef>,

    pub scan: ScanKind,
}

impl ObjectChanges {
    /// Whether nothing changed
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.removed.is_empty()
    }

    /// References of the modified objects
    pub fn modified_refs(&self) -> impl Iterator<Item = &SchemaObjectRef> {
        self.modified.iter().map(|row| &row.object)
    }
}

/// Scan result that has not been folded into the index yet
struct StagedScan {
    changes: ObjectChanges,
    entries: Vec<ObjectIndexEntry>,
    latest: Option<DateTime<Utc>>,
}

/// Runs catalog scans and maintains the object index
pub struct ChangeDetector {
    adapter: Arc<dyn CatalogAdapter>,
    index: Arc<ObjectIndex>,
    sink: Arc<dyn EventSink>,
}

impl ChangeDetector {
    /// Create a detector that keeps `index` in step with `adapter`
    pub fn new(
        adapter: Arc<dyn CatalogAdapter>,
        index: Arc<ObjectIndex>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            adapter,
            index,
            sink,
        }
    }

    /// The index this detector maintains
    pub fn index(&self) -> &Arc<ObjectIndex> {
        &self.index
    }

    /// Determine what changed for one object type
    ///
    /// A full scan runs when `since` is unset, the index holds nothing for the
    /// type, or the type cannot be delta-scanned. An empty delta is retried
    /// once as a full scan when `allow_full_scan_fallback` is set and a prior
    /// index exists. Catalog failures are returned as errors and leave the
    /// index untouched.
    pub async fn get_object_changes(
        &self,
        object_type: ObjectType,
        since: Option<DateTime<Utc>>,
        schema_filter: Option<&[String]>,
        allow_full_scan_fallback: bool,
        cancel: &CancellationToken,
    ) -> Result<ObjectChanges, SnapshotError> {
        let staged = self
            .scan(object_type, since, schema_filter, allow_full_scan_fallback, cancel)
            .await?;
        Ok(self.commit(staged, schema_filter))
    }

    /// Run [`get_object_changes`](Self::get_object_changes) for several types in order
    ///
    /// The index is only updated once every type was scanned, so a failure
    /// on a later type leaves the delta baseline of the earlier ones as it was.
    pub async fn get_all_changes(
        &self,
        object_types: &[ObjectType],
        since: Option<DateTime<Utc>>,
        schema_filter: Option<&[String]>,
        allow_full_scan_fallback: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<ObjectChanges>, SnapshotError> {
        let mut staged = Vec::with_capacity(object_types.len());
        for object_type in object_types {
            staged.push(
                self.scan(*object_type, since, schema_filter, allow_full_scan_fallback, cancel)
                    .await?,
            );
        }

        Ok(staged
            .into_iter()
            .map(|scan| self.commit(scan, schema_filter))
            .collect())
    }

    async fn scan(
        &self,
        object_type: ObjectType,
        since: Option<DateTime<Utc>>,
        schema_filter: Option<&[String]>,
        allow_full_scan_fallback: bool,
        cancel: &CancellationToken,
    ) -> Result<StagedScan, SnapshotError> {
        let has_prior = self.index.has_entries(object_type);

        let since = match since {
            Some(since) if has_prior && object_type.supports_delta() => since,
            _ => {
                return self
                    .full_scan(object_type, schema_filter, ScanKind::Full, cancel)
                    .await
            }
        };

        let query = scoped(CatalogQuery::delta(object_type, since), schema_filter);
        let rows = self.fetch(&query, cancel).await?;

        if rows.is_empty() && allow_full_scan_fallback {
            self.sink.emit(SnapshotEvent::FullScanFallback {
                object_type,
                prior_entries: self.index.entry_count(object_type),
            });
            return self
                .full_scan(object_type, schema_filter, ScanKind::FallbackFull, cancel)
                .await;
        }

        tracing::info!(
            object_type = %object_type,
            modified = rows.len(),
            since = %since,
            "delta scan"
        );

        Ok(StagedScan {
            entries: index_entries(&rows),
            latest: latest(&rows),
            changes: ObjectChanges {
                object_type,
                modified: rows,
                removed: Vec::new(),
                scan: ScanKind::Delta,
            },
        })
    }

    async fn full_scan(
        &self,
        object_type: ObjectType,
        schema_filter: Option<&[String]>,
        scan: ScanKind,
        cancel: &CancellationToken,
    ) -> Result<StagedScan, SnapshotError> {
        let query = scoped(CatalogQuery::full(object_type), schema_filter);
        let rows = self.fetch(&query, cancel).await?;

        let entries = index_entries(&rows);
        let diff = self.index.diff_entries(object_type, &entries, schema_filter);

        let changed: HashSet<&SchemaObjectRef> = diff.changed.iter().collect();
        let modified: Vec<CatalogRow> = rows
            .iter()
            .filter(|row| changed.contains(&row.object))
            .cloned()
            .collect();

        tracing::info!(
            object_type = %object_type,
            live = rows.len(),
            modified = modified.len(),
            removed = diff.removed.len(),
            "full scan"
        );

        Ok(StagedScan {
            entries,
            latest: latest(&rows),
            changes: ObjectChanges {
                object_type,
                modified,
                removed: diff.removed,
                scan,
            },
        })
    }

    fn commit(&self, staged: StagedScan, schema_filter: Option<&[String]>) -> ObjectChanges {
        let StagedScan {
            changes,
            entries,
            latest,
        } = staged;

        if changes.scan.is_full() {
            self.index
                .replace_entries(changes.object_type, entries, schema_filter);
        } else {
            self.index.upsert_entries(changes.object_type, entries);
        }

        if let Some(latest) = latest {
            self.index.update_reference_timestamp(latest);
        }

        changes
    }

    async fn fetch(
        &self,
        query: &CatalogQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<CatalogRow>, SnapshotError> {
        tracing::debug!(
            adapter = self.adapter.name(),
            object_type = %query.object_type,
            full = query.is_full(),
            "querying catalog"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SnapshotError::Cancelled),
            result = self.adapter.fetch_objects(query) => result.map_err(|source| SnapshotError::Catalog {
                object_type: query.object_type,
                source,
            }),
        }
    }
}

fn latest(rows: &[CatalogRow]) -> Option<DateTime<Utc>> {
    rows.iter().map(CatalogRow::last_modified).max()
}

fn scoped(query: CatalogQuery, schema_filter: Option<&[String]>) -> CatalogQuery {
    match schema_filter {
        Some(schemas) => query.with_schemas(schemas),
        None => query,
    }
}

fn index_entries(rows: &[CatalogRow]) -> Vec<ObjectIndexEntry> {
    rows.iter()
        .map(|row| {
            ObjectIndexEntry::new(&row.object, row.last_modified())
                .with_content_hash(row.fingerprint())
        })
        .collect()
}
