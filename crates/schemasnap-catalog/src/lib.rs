//! Catalog adapters for schema object introspection
//!
//! This crate defines how the snapshot engine talks to a live database
//! catalog: the [`CatalogAdapter`] trait, the per-type query shapes used for
//! full and delta scans, and an in-memory [`MockCatalog`] for tests.
//!
//! The concrete database driver is supplied by the embedding application; it
//! only has to execute [`CatalogQuery::to_sql`] with [`CatalogQuery::params`]
//! and map the result set to [`CatalogRow`]s.
//!
//! ## Example
//!
//! ```rust,ignore
//! use schemasnap_catalog::{CatalogAdapter, CatalogQuery};
//! use schemasnap_core::ObjectType;
//!
//! let query = CatalogQuery::delta(ObjectType::Procedure, since).with_schemas(&["dbo".into()]);
//! let rows = adapter.fetch_objects(&query).await?;
//! ```

pub mod adapter;
pub mod query;
pub mod mock;

pub use adapter::{CatalogAdapter, CatalogRow, FetchError};
pub use query::{CatalogQuery, QueryParam, ScanMode};
pub use mock::{MockCatalog, MockCatalogBuilder};
