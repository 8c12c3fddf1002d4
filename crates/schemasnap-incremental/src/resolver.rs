//! Batched live-timestamp lookups for dependency references
//!
//! Hundreds of procedures tend to reference the same handful of tables, so
//! the resolver fetches one full catalog snapshot per object kind and serves
//! point lookups from it for the rest of the run.

use crate::error::SnapshotError;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use schemasnap_catalog::{CatalogAdapter, CatalogQuery};
use schemasnap_core::{EventSink, ObjectType, SchemaObjectRef, SnapshotEvent};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Live modification times of every object of one kind
type KindSnapshot = Arc<HashMap<SchemaObjectRef, DateTime<Utc>>>;

/// `None` once a fetch for the kind has failed this run
type SnapshotCell = Arc<OnceCell<Option<KindSnapshot>>>;

/// Lookup counters since the last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub snapshots_fetched: usize,
    pub snapshots_failed: usize,
    pub hits: usize,
    pub misses: usize,
}

/// Per-run memoizing resolver of live modification times
pub struct DependencyResolver {
    adapter: Arc<dyn CatalogAdapter>,
    sink: Arc<dyn EventSink>,
    snapshots: Mutex<HashMap<ObjectType, SnapshotCell>>,
    fetched: AtomicUsize,
    failed: AtomicUsize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl DependencyResolver {
    /// Create a resolver with no snapshots fetched yet
    pub fn new(adapter: Arc<dyn CatalogAdapter>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            adapter,
            sink,
            snapshots: Mutex::new(HashMap::new()),
            fetched: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    fn cell(&self, object_type: ObjectType) -> SnapshotCell {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(object_type)
            .or_default()
            .clone()
    }

    /// Snapshot of one kind, fetched at most once per run
    ///
    /// Concurrent callers wait on the same fetch. A failed fetch is logged and
    /// remembered as `None`; only cancellation is returned as an error.
    async fn snapshot(
        &self,
        object_type: ObjectType,
        cancel: &CancellationToken,
    ) -> Result<Option<KindSnapshot>, SnapshotError> {
        let cell = self.cell(object_type);

        let snapshot = cell
            .get_or_try_init(|| async {
                let query = CatalogQuery::full(object_type);
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SnapshotError::Cancelled),
                    result = self.adapter.fetch_objects(&query) => result,
                };

                match result {
                    Ok(rows) => {
                        self.fetched.fetch_add(1, Ordering::Relaxed);
                        let snapshot: HashMap<SchemaObjectRef, DateTime<Utc>> = rows
                            .into_iter()
                            .map(|row| {
                                let modified = row.last_modified();
                                (row.object, modified)
                            })
                            .collect();
                        tracing::debug!(
                            object_type = %object_type,
                            objects = snapshot.len(),
                            "fetched dependency snapshot"
                        );
                        Ok(Some(Arc::new(snapshot)))
                    }
                    Err(error) => {
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            object_type = %object_type,
                            error = %error,
                            "dependency snapshot failed, treating kind as unknown"
                        );
                        Ok(None)
                    }
                }
            })
            .await?;

        Ok(snapshot.clone())
    }

    /// Fetch one snapshot per distinct kind present in `refs`, concurrently
    pub async fn prewarm(
        &self,
        refs: &[SchemaObjectRef],
        cancel: &CancellationToken,
    ) -> Result<(), SnapshotError> {
        let kinds: BTreeSet<ObjectType> = refs.iter().map(|r| r.object_type).collect();
        try_join_all(kinds.into_iter().map(|kind| self.snapshot(kind, cancel))).await?;
        Ok(())
    }

    /// Live modification time of one object, or `None` if it cannot be resolved
    pub async fn resolve(
        &self,
        object: &SchemaObjectRef,
        cancel: &CancellationToken,
    ) -> Result<Option<DateTime<Utc>>, SnapshotError> {
        let resolved = self
            .snapshot(object.object_type, cancel)
            .await?
            .and_then(|snapshot| snapshot.get(object).copied());

        if resolved.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.sink.emit(SnapshotEvent::DependencyUnresolved {
                dependency: object.clone(),
            });
        }

        Ok(resolved)
    }

    /// Resolve a batch after prewarming every kind it touches
    pub async fn resolve_batch(
        &self,
        refs: &[SchemaObjectRef],
        cancel: &CancellationToken,
    ) -> Result<Vec<(SchemaObjectRef, Option<DateTime<Utc>>)>, SnapshotError> {
        self.prewarm(refs, cancel).await?;

        let mut resolved = Vec::with_capacity(refs.len());
        for object in refs {
            let modified = self.resolve(object, cancel).await?;
            resolved.push((object.clone(), modified));
        }
        Ok(resolved)
    }

    /// Drop every memoized snapshot so the next lookup sees the live catalog
    pub fn reset(&self) {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.fetched.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Counters accumulated since the last reset
    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            snapshots_fetched: self.fetched.load(Ordering::Relaxed),
            snapshots_failed: self.failed.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
