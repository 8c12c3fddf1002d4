//! Consult/update protocol used by the analysis pipeline
//!
//! A [`SnapshotSession`] wires the object cache, object index, change
//! detector and dependency resolver for one project root. The pipeline asks
//! [`consult`](SnapshotSession::consult) before analyzing an object and
//! reports the fresh result through
//! [`record_analysis`](SnapshotSession::record_analysis).
//!
//! ## Usage
//!
//! ```rust,ignore
//! let session = SnapshotSession::open(config, adapter, Arc::new(TracingSink)).await;
//! session.detect_changes(&cancel).await?;
//!
//! for object in objects {
//!     match session.consult(&object, &cancel).await? {
//!         Consultation::Reusable(entry) => reuse(entry),
//!         Consultation::Stale(_) => {
//!             let (deps, hash) = analyze(&object);
//!             session.record_analysis(&object, &deps, hash, &cancel).await?;
//!         }
//!     }
//! }
//!
//! session.flush(&cancel).await?;
//! ```

use crate::cache::{ObjectCache, RecordOutcome};
use crate::detector::{ChangeDetector, ObjectChanges};
use crate::error::{CacheError, SnapshotError};
use crate::index::ObjectIndex;
use crate::persist::FlushOutcome;
use crate::resolver::DependencyResolver;
use schemasnap_catalog::CatalogAdapter;
use schemasnap_core::{
    EventSink, ObjectIndexEntry, SchemaObjectCacheEntry, SchemaObjectRef, SnapshotConfig,
    SnapshotEvent, UNKNOWN_TIMESTAMP,
};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Why a cached entry cannot be reused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// The run bypasses the cache
    ForceReload,

    /// No entry exists for the object
    NotCached,

    /// An upstream change reset the entry
    Invalidated,

    /// The object no longer resolves in the catalog
    SourceMissing,

    /// The catalog reports a different modification time
    Modified,

    /// A dependency could not be resolved
    DependencyUnknown(SchemaObjectRef),

    /// A dependency changed after the entry was written
    DependencyChanged(SchemaObjectRef),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForceReload => write!(f, "force reload"),
            Self::NotCached => write!(f, "not cached"),
            Self::Invalidated => write!(f, "invalidated by upstream change"),
            Self::SourceMissing => write!(f, "object missing from catalog"),
            Self::Modified => write!(f, "object modified"),
            Self::DependencyUnknown(dep) => write!(f, "dependency unresolved: {dep}"),
            Self::DependencyChanged(dep) => write!(f, "dependency changed: {dep}"),
        }
    }
}

/// Answer to a reuse-or-recompute question
#[derive(Debug, Clone, PartialEq)]
pub enum Consultation {
    Reusable(SchemaObjectCacheEntry),
    Stale(StaleReason),
}

impl Consultation {
    /// Whether the cached entry can be used as is
    pub fn is_reusable(&self) -> bool {
        matches!(self, Self::Reusable(_))
    }
}

/// Result of recording an analysis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub outcome: RecordOutcome,

    /// Dependents reset because the content fingerprint changed
    pub invalidated: Vec<SchemaObjectRef>,
}

/// Snapshot cache state for one project root
pub struct SnapshotSession {
    config: SnapshotConfig,
    cache: Arc<ObjectCache>,
    index: Arc<ObjectIndex>,
    detector: ChangeDetector,
    resolver: DependencyResolver,
    sink: Arc<dyn EventSink>,
}

impl SnapshotSession {
    /// Load persisted state for the project described by `config`
    pub async fn open(
        config: SnapshotConfig,
        adapter: Arc<dyn CatalogAdapter>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (cache, index) = tokio::join!(
            ObjectCache::from_config(&config, sink.clone()),
            ObjectIndex::from_config(&config, sink.clone()),
        );
        let cache = Arc::new(cache);
        let index = Arc::new(index);

        tracing::info!(
            root = %config.project_root.display(),
            cached = cache.len(),
            force_reload = config.force_reload,
            "opened snapshot session"
        );

        Self {
            detector: ChangeDetector::new(adapter.clone(), index.clone(), sink.clone()),
            resolver: DependencyResolver::new(adapter, sink.clone()),
            config,
            cache,
            index,
            sink,
        }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    pub fn index(&self) -> &Arc<ObjectIndex> {
        &self.index
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    /// Cached entry, unless the run bypasses the cache
    pub fn try_get_cached_entry(&self, object: &SchemaObjectRef) -> Option<SchemaObjectCacheEntry> {
        if self.config.force_reload {
            return None;
        }
        self.cache.get_entry(object)
    }

    /// Decide whether the cached result for `object` can be reused
    ///
    /// Reusable only when the entry exists, was not invalidated, matches the
    /// live modification time, and every dependency still carries the catalog
    /// time it had when the entry was analyzed. Both sides of every
    /// comparison come from the catalog, never from the local clock.
    pub async fn consult(
        &self,
        object: &SchemaObjectRef,
        cancel: &CancellationToken,
    ) -> Result<Consultation, SnapshotError> {
        let verdict = self.evaluate(object, cancel).await?;

        match &verdict {
            Consultation::Reusable(_) => self.sink.emit(SnapshotEvent::CacheHit {
                object: object.clone(),
            }),
            Consultation::Stale(reason) => self.sink.emit(SnapshotEvent::CacheMiss {
                object: object.clone(),
                reason: reason.to_string(),
            }),
        }

        Ok(verdict)
    }

    async fn evaluate(
        &self,
        object: &SchemaObjectRef,
        cancel: &CancellationToken,
    ) -> Result<Consultation, SnapshotError> {
        if self.config.force_reload {
            return Ok(Consultation::Stale(StaleReason::ForceReload));
        }

        let Some(entry) = self.cache.get_entry(object) else {
            return Ok(Consultation::Stale(StaleReason::NotCached));
        };

        if entry.is_invalidated() {
            return Ok(Consultation::Stale(StaleReason::Invalidated));
        }

        let mut lookups = Vec::with_capacity(entry.dependencies.len() + 1);
        lookups.push(object.clone());
        lookups.extend(entry.dependencies.iter().cloned());
        self.resolver.prewarm(&lookups, cancel).await?;

        match self.resolver.resolve(object, cancel).await? {
            None => return Ok(Consultation::Stale(StaleReason::SourceMissing)),
            Some(live) if live != entry.last_modified_utc => {
                return Ok(Consultation::Stale(StaleReason::Modified))
            }
            Some(_) => {}
        }

        for dependency in &entry.dependencies {
            match self.resolver.resolve(dependency, cancel).await? {
                None => {
                    return Ok(Consultation::Stale(StaleReason::DependencyUnknown(
                        dependency.clone(),
                    )))
                }
                Some(live) if entry.dependency_version(dependency) != Some(live) => {
                    return Ok(Consultation::Stale(StaleReason::DependencyChanged(
                        dependency.clone(),
                    )))
                }
                Some(_) => {}
            }
        }

        Ok(Consultation::Reusable(entry))
    }

    /// Store a fresh analysis of `object`
    ///
    /// Writes the live modification time, the dependency edges with the
    /// catalog time of each dependency, and the fingerprint. When the
    /// fingerprint differs from a previously stored one, every dependent is
    /// invalidated.
    pub async fn record_analysis(
        &self,
        object: &SchemaObjectRef,
        dependencies: &[SchemaObjectRef],
        content_hash: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Recorded, SnapshotError> {
        let mut lookups = Vec::with_capacity(dependencies.len() + 1);
        lookups.push(object.clone());
        lookups.extend(dependencies.iter().cloned());
        let mut resolved = self.resolver.resolve_batch(&lookups, cancel).await?.into_iter();

        let live = resolved
            .next()
            .and_then(|(_, modified)| modified)
            .unwrap_or(UNKNOWN_TIMESTAMP);
        let versions: Vec<ObjectIndexEntry> = resolved
            .filter_map(|(dependency, modified)| {
                modified.map(|modified| ObjectIndexEntry::new(&dependency, modified))
            })
            .collect();

        let outcome = self.cache.record(object, live, dependencies, content_hash);
        self.cache.set_dependency_versions(object, versions);
        let invalidated = if outcome.content_changed {
            self.cache.invalidate_dependents(object)
        } else {
            Vec::new()
        };

        tracing::debug!(
            object = %object,
            dependencies = dependencies.len(),
            invalidated = invalidated.len(),
            "recorded analysis"
        );

        Ok(Recorded {
            outcome,
            invalidated,
        })
    }

    /// Fold detected catalog changes into the cache
    ///
    /// Dependents of every modified object are invalidated and removed
    /// objects are dropped. Returns every invalidated object.
    pub fn apply_changes(&self, changes: &ObjectChanges) -> Vec<SchemaObjectRef> {
        let mut invalidated = Vec::new();
        for object in changes.modified_refs() {
            invalidated.extend(self.cache.invalidate_dependents(object));
        }
        for object in &changes.removed {
            self.cache.remove(object);
        }
        invalidated
    }

    /// Scan every tracked type and apply what changed
    ///
    /// A catalog failure on any type leaves both the index and the cache as
    /// they were before the call.
    pub async fn detect_changes(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ObjectChanges>, SnapshotError> {
        let since = self.index.reference_timestamp();
        let all = self
            .detector
            .get_all_changes(
                &self.config.tracked_types(),
                since,
                self.config.schema_filter(),
                self.config.allow_full_scan_fallback,
                cancel,
            )
            .await?;

        let mut touched = false;
        for changes in &all {
            if !changes.is_empty() {
                touched = true;
                self.apply_changes(changes);
            }
        }

        // Snapshots taken before the scan may predate what it just observed
        if touched {
            self.resolver.reset();
        }

        Ok(all)
    }

    /// Persist cache and index
    ///
    /// The cache is written first. The index, which holds the delta baseline,
    /// is only written once the cache is safely on disk; otherwise it stays
    /// dirty so the next run sees the same changes again. Write failures are
    /// logged and reported as [`FlushOutcome::Failed`]. Only cancellation is
    /// an error.
    pub async fn flush(&self, cancel: &CancellationToken) -> Result<FlushOutcome, SnapshotError> {
        let cache = settle(self.cache.flush(cancel).await)?;
        if cache == FlushOutcome::Failed {
            tracing::warn!("object cache not persisted, holding back the object index");
            return Ok(FlushOutcome::Failed);
        }

        let index = settle(self.index.flush(cancel).await)?;
        Ok(cache.merge(index))
    }

    /// Wipe persisted and in-memory state for a forced cold run
    pub async fn clear_all(&self, cancel: &CancellationToken) -> Result<(), SnapshotError> {
        self.index.clear_all(cancel).await?;
        self.cache.clear_all(cancel).await?;
        self.resolver.reset();
        Ok(())
    }
}

fn settle(result: Result<FlushOutcome, CacheError>) -> Result<FlushOutcome, SnapshotError> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(CacheError::Cancelled) => Err(SnapshotError::Cancelled),
        Err(_) => Ok(FlushOutcome::Failed),
    }
}
