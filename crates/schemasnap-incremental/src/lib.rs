//! Incremental schema snapshot engine
//!
//! This crate decides, run after run, which schema objects must be
//! re-analyzed and which cached results can be reused. It keeps two persisted
//! ledgers under the project's cache directory:
//!
//! - **Object index**: last catalog modification time per object, used to
//!   choose between full and delta catalog scans
//! - **Object cache**: per-object analysis state with forward dependency
//!   lists, from which a reverse-adjacency graph is rebuilt on every load
//!
//! A change to any object resets every transitive dependent to an unknown
//! timestamp, so stale derived output is never served.
//!
//! ## Architecture
//!
//! - [`ObjectCache`] + [`DependencyGraph`]: entries, edges, invalidation
//! - [`ObjectIndex`]: delta ledger and reference timestamp
//! - [`ChangeDetector`]: full/delta catalog scans
//! - [`DependencyResolver`]: batched live-timestamp lookups
//! - [`SnapshotSession`]: the consult/update protocol
//!
//! ## Usage
//!
//! ```rust,ignore
//! use schemasnap_incremental::{Consultation, SnapshotSession};
//!
//! let session = SnapshotSession::open(config, adapter, sink).await;
//! session.detect_changes(&cancel).await?;
//!
//! if let Consultation::Stale(reason) = session.consult(&object, &cancel).await? {
//!     tracing::info!(%reason, "re-analyzing");
//!     session.record_analysis(&object, &deps, Some(hash), &cancel).await?;
//! }
//!
//! session.flush(&cancel).await?;
//! ```

pub mod cache;
pub mod detector;
pub mod error;
pub mod graph;
pub mod index;
mod persist;
pub mod resolver;
pub mod session;

pub use cache::{DependencyGraphFile, GraphNode, ObjectCache, RecordOutcome};
pub use detector::{ChangeDetector, ObjectChanges, ScanKind};
pub use error::{CacheError, SnapshotError};
pub use graph::DependencyGraph;
pub use index::{IndexDiff, ObjectIndex};
pub use persist::{FlushOutcome, FORMAT_VERSION};
pub use resolver::{DependencyResolver, ResolverStats};
pub use session::{Consultation, Recorded, SnapshotSession, StaleReason};
