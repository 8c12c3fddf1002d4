//! Mock catalog adapter for testing
//!
//! This adapter answers catalog queries from an in-memory object list without
//! connecting to any database. It's useful for:
//! - Unit testing change detection and invalidation logic
//! - Simulating objects being created, altered and dropped between runs
//! - Simulating catalog failures and latency
//!
//! ## Usage
//!
//! ```rust,ignore
//! use schemasnap_catalog::{CatalogAdapter, CatalogQuery, MockCatalog};
//! use schemasnap_core::{ObjectType, SchemaObjectRef};
//!
//! let catalog = MockCatalog::new();
//! catalog.upsert_object(SchemaObjectRef::new(ObjectType::Table, "dbo", "Users"), modified).await;
//!
//! let rows = catalog.fetch_objects(&CatalogQuery::full(ObjectType::Table)).await?;
//! ```

use crate::adapter::{CatalogAdapter, CatalogRow, FetchError};
use crate::query::CatalogQuery;
use chrono::{DateTime, Utc};
use schemasnap_core::{ObjectType, SchemaObjectRef};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Mock catalog adapter for testing
///
/// Objects are stored by reference and filtered with [`CatalogQuery::matches`].
/// Every executed query is recorded so tests can assert on round-trips.
pub struct MockCatalog {
    /// Live objects, ordered for deterministic results
    objects: Arc<RwLock<BTreeMap<SchemaObjectRef, CatalogRow>>>,

    /// Errors to return for specific object types
    errors: Arc<RwLock<HashMap<ObjectType, FetchError>>>,

    /// Every query executed, in order
    query_log: Arc<RwLock<Vec<CatalogQuery>>>,

    /// Simulate connection failure
    fail_connection: bool,

    /// Simulate query latency (milliseconds)
    latency_ms: u64,
}

impl MockCatalog {
    /// Create a new mock catalog with no objects
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            errors: Arc::new(RwLock::new(HashMap::new())),
            query_log: Arc::new(RwLock::new(Vec::new())),
            fail_connection: false,
            latency_ms: 0,
        }
    }

    /// Add or replace a row
    pub async fn add_row(&self, row: CatalogRow) {
        self.objects.write().await.insert(row.object.clone(), row);
    }

    /// Add or alter an object with the given modification time
    pub async fn upsert_object(&self, object: SchemaObjectRef, modified_utc: DateTime<Utc>) {
        self.add_row(CatalogRow::new(object, modified_utc)).await;
    }

    /// Drop an object from the catalog
    pub async fn drop_object(&self, object: &SchemaObjectRef) -> bool {
        self.objects.write().await.remove(object).is_some()
    }

    /// Configure an error to be returned for every query on an object type
    pub async fn fail_type(&self, object_type: ObjectType, error: FetchError) {
        self.errors.write().await.insert(object_type, error);
    }

    /// Clear all configured errors
    pub async fn clear_errors(&self) {
        self.errors.write().await.clear();
    }

    /// Configure to fail all connection tests
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure simulated latency for all operations
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Number of live objects
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Queries executed so far
    pub async fn queries(&self) -> Vec<CatalogQuery> {
        self.query_log.read().await.clone()
    }

    /// Number of queries executed so far
    pub async fn query_count(&self) -> usize {
        self.query_log.read().await.len()
    }

    /// Forget the recorded queries
    pub async fn clear_query_log(&self) {
        self.query_log.write().await.clear();
    }

    /// Simulate latency if configured
    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }
}

impl Default for MockCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockCatalog {
    fn clone(&self) -> Self {
        Self {
            objects: Arc::clone(&self.objects),
            errors: Arc::clone(&self.errors),
            query_log: Arc::clone(&self.query_log),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
        }
    }
}

#[async_trait::async_trait]
impl CatalogAdapter for MockCatalog {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn fetch_objects(&self, query: &CatalogQuery) -> Result<Vec<CatalogRow>, FetchError> {
        self.simulate_latency().await;
        self.query_log.write().await.push(query.clone());

        // Check for configured errors first
        if let Some(error) = self.errors.read().await.get(&query.object_type) {
            return Err(error.clone());
        }

        let objects = self.objects.read().await;
        Ok(objects
            .values()
            .filter(|row| query.matches(row))
            .cloned()
            .collect())
    }

    async fn test_connection(&self) -> Result<(), FetchError> {
        self.simulate_latency().await;

        if self.fail_connection {
            Err(FetchError::NetworkError(
                "Simulated connection failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Builder for creating MockCatalog with predefined objects
///
/// # Example
///
/// ```rust,ignore
/// let catalog = MockCatalogBuilder::new()
///     .with_object(ObjectType::Table, "dbo", "Users", t0)
///     .with_definition(ObjectType::Procedure, "dbo", "GetUser", t0, "CREATE PROCEDURE ...")
///     .build();
/// ```
pub struct MockCatalogBuilder {
    rows: Vec<CatalogRow>,
    errors: HashMap<ObjectType, FetchError>,
    fail_connection: bool,
    latency_ms: u64,
}

impl MockCatalogBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            errors: HashMap::new(),
            fail_connection: false,
            latency_ms: 0,
        }
    }

    /// Add an object with a modification time
    pub fn with_object(
        mut self,
        object_type: ObjectType,
        schema: &str,
        name: &str,
        modified_utc: DateTime<Utc>,
    ) -> Self {
        let object = SchemaObjectRef::new(object_type, schema, name);
        self.rows.push(CatalogRow::new(object, modified_utc));
        self
    }

    /// Add an object with a definition body
    pub fn with_definition(
        mut self,
        object_type: ObjectType,
        schema: &str,
        name: &str,
        modified_utc: DateTime<Utc>,
        definition: &str,
    ) -> Self {
        let object = SchemaObjectRef::new(object_type, schema, name);
        self.rows
            .push(CatalogRow::new(object, modified_utc).with_definition(definition));
        self
    }

    /// Add a fully specified row
    pub fn with_row(mut self, row: CatalogRow) -> Self {
        self.rows.push(row);
        self
    }

    /// Fail every query on an object type
    pub fn with_error(mut self, object_type: ObjectType, error: FetchError) -> Self {
        self.errors.insert(object_type, error);
        self
    }

    /// Configure connection failure
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure latency
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Build the MockCatalog
    pub fn build(self) -> MockCatalog {
        let objects = self
            .rows
            .into_iter()
            .map(|row| (row.object.clone(), row))
            .collect();

        MockCatalog {
            objects: Arc::new(RwLock::new(objects)),
            errors: Arc::new(RwLock::new(self.errors)),
            query_log: Arc::new(RwLock::new(Vec::new())),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
        }
    }
}

impl Default for MockCatalogBuilder {
    fn default() -> Self {
        Self::new()
    }
}
