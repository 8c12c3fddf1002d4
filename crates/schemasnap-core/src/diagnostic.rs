//! Diagnostic events emitted by the snapshot engine
//!
//! IMPORTANT: Event codes are versioned and stable.
//! NEVER rename or remove codes - downstream log queries depend on them.
//! Add new codes with new names only.

use crate::object::{ObjectType, SchemaObjectRef};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Event code registry (v1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCode {
    // Protocol
    /// A cached entry was reused
    CacheHit,

    /// A cached entry could not be reused
    CacheMiss,

    // Graph maintenance
    /// An invalidation cascade reset one or more dependents
    InvalidationCascade,

    /// An object disappeared from the catalog and was dropped from the cache
    ObjectRemoved,

    // Change detection
    /// An empty delta scan was retried as a full scan
    FullScanFallback,

    /// A dependency could not be resolved against the live catalog
    DependencyUnresolved,

    // Persistence
    /// Persisted state was unreadable and replaced by an empty state
    CacheRecovered,

    /// Writing persisted state failed; it will be retried on the next flush
    FlushFailed,
}

impl EventCode {
    /// Get the event code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheHit => "CACHE_HIT",
            Self::CacheMiss => "CACHE_MISS",
            Self::InvalidationCascade => "INVALIDATION_CASCADE",
            Self::ObjectRemoved => "OBJECT_REMOVED",
            Self::FullScanFallback => "FULL_SCAN_FALLBACK",
            Self::DependencyUnresolved => "DEPENDENCY_UNRESOLVED",
            Self::CacheRecovered => "CACHE_RECOVERED",
            Self::FlushFailed => "FLUSH_FAILED",
        }
    }
}

impl std::fmt::Display for EventCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured diagnostic event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotEvent {
    CacheHit {
        object: SchemaObjectRef,
    },
    CacheMiss {
        object: SchemaObjectRef,
        reason: String,
    },
    InvalidationCascade {
        origin: SchemaObjectRef,
        invalidated: Vec<SchemaObjectRef>,
    },
    ObjectRemoved {
        object: SchemaObjectRef,
        stripped_from: usize,
    },
    FullScanFallback {
        object_type: ObjectType,
        prior_entries: usize,
    },
    DependencyUnresolved {
        dependency: SchemaObjectRef,
    },
    CacheRecovered {
        file: String,
        error: String,
    },
    FlushFailed {
        file: String,
        error: String,
    },
}

impl SnapshotEvent {
    /// Stable code of this event
    pub fn code(&self) -> EventCode {
        match self {
            Self::CacheHit { .. } => EventCode::CacheHit,
            Self::CacheMiss { .. } => EventCode::CacheMiss,
            Self::InvalidationCascade { .. } => EventCode::InvalidationCascade,
            Self::ObjectRemoved { .. } => EventCode::ObjectRemoved,
            Self::FullScanFallback { .. } => EventCode::FullScanFallback,
            Self::DependencyUnresolved { .. } => EventCode::DependencyUnresolved,
            Self::CacheRecovered { .. } => EventCode::CacheRecovered,
            Self::FlushFailed { .. } => EventCode::FlushFailed,
        }
    }
}

/// Receiver of diagnostic events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SnapshotEvent);
}

/// Forwards events to `tracing` as structured fields
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: SnapshotEvent) {
        let code = event.code().as_str();
        match &event {
            SnapshotEvent::CacheHit { object } => {
                tracing::debug!(code, object = %object, "cache hit");
            }
            SnapshotEvent::CacheMiss { object, reason } => {
                tracing::debug!(code, object = %object, reason = %reason, "cache miss");
            }
            SnapshotEvent::InvalidationCascade { origin, invalidated } => {
                tracing::info!(
                    code,
                    origin = %origin,
                    count = invalidated.len(),
                    "invalidated dependents"
                );
            }
            SnapshotEvent::ObjectRemoved { object, stripped_from } => {
                tracing::info!(code, object = %object, stripped_from, "object removed");
            }
            SnapshotEvent::FullScanFallback { object_type, prior_entries } => {
                tracing::warn!(
                    code,
                    object_type = %object_type,
                    prior_entries,
                    "empty delta scan, retrying as full scan"
                );
            }
            SnapshotEvent::DependencyUnresolved { dependency } => {
                tracing::warn!(code, dependency = %dependency, "dependency unresolved");
            }
            SnapshotEvent::CacheRecovered { file, error } => {
                tracing::warn!(code, file = %file, error = %error, "discarded unreadable state");
            }
            SnapshotEvent::FlushFailed { file, error } => {
                tracing::warn!(code, file = %file, error = %error, "flush failed");
            }
        }
    }
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SnapshotEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far, in emission order
    pub fn events(&self) -> Vec<SnapshotEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of recorded events with the given code
    pub fn count(&self, code: EventCode) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| e.code() == code).count())
            .unwrap_or(0)
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: SnapshotEvent) {
        TracingSink.emit(event.clone());
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
