//! schemasnap core
//!
//! Core domain model shared by the catalog adapters and the incremental
//! snapshot engine. Event codes and persisted field names are part of the
//! public API - never rename them.

pub mod object;
pub mod diagnostic;
pub mod config;

pub use object::{
    content_hash, is_unknown, ObjectIndexEntry, ObjectType, ParseObjectError, SchemaObjectCacheEntry,
    SchemaObjectRef, UNKNOWN_TIMESTAMP,
};
pub use diagnostic::{EventCode, EventSink, RecordingSink, SnapshotEvent, TracingSink};
pub use config::{ConfigError, SnapshotConfig};
