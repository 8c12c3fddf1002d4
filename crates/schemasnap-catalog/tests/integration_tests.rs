//! Integration tests for catalog adapters
//!
//! These tests exercise the query shapes against the in-memory mock catalog.
//!
//! ```bash
//! cargo test -p schemasnap-catalog --test integration_tests
//! ```

mod fixtures;

use chrono::Duration;
use schemasnap_catalog::{CatalogAdapter, CatalogQuery, FetchError, MockCatalog, ScanMode};
use schemasnap_core::{ObjectType, SchemaObjectRef, UNKNOWN_TIMESTAMP};

// =============================================================================
// Full scans
// =============================================================================

#[tokio::test]
async fn test_full_scan_lists_every_type() {
    let catalog = fixtures::sales_catalog();

    for object_type in ObjectType::ALL {
        let rows = catalog.fetch_objects(&CatalogQuery::full(object_type)).await.unwrap();
        assert!(!rows.is_empty(), "expected at least one {object_type}");
        assert!(rows.iter().all(|r| r.object.object_type == object_type));
    }
}

#[tokio::test]
async fn test_full_scan_with_schema_filter() {
    let catalog = fixtures::sales_catalog();

    let query = CatalogQuery::full(ObjectType::Table).with_schemas(&["AUDIT".to_string()]);
    let rows = catalog.fetch_objects(&query).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].object, SchemaObjectRef::new(ObjectType::Table, "audit", "Events"));
}

#[tokio::test]
async fn test_module_rows_carry_definitions() {
    let catalog = fixtures::sales_catalog();

    let rows = catalog.fetch_objects(&CatalogQuery::full(ObjectType::Procedure)).await.unwrap();
    assert!(rows[0].definition.as_deref().unwrap().starts_with("CREATE PROCEDURE"));

    let rows = catalog.fetch_objects(&CatalogQuery::full(ObjectType::Table)).await.unwrap();
    assert!(rows.iter().all(|r| r.definition.is_none()));
}

// =============================================================================
// Delta scans
// =============================================================================

#[tokio::test]
async fn test_delta_scan_sees_only_altered_objects() {
    let catalog = fixtures::sales_catalog();
    let t0 = fixtures::baseline();
    let t1 = t0 + Duration::hours(2);

    catalog
        .upsert_object(SchemaObjectRef::new(ObjectType::Table, "dbo", "Users"), t1)
        .await;

    let rows = catalog
        .fetch_objects(&CatalogQuery::delta(ObjectType::Table, t0))
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].object.name, "Users");
    assert_eq!(rows[0].last_modified(), t1);
}

#[tokio::test]
async fn test_delta_scan_cannot_see_drops() {
    let catalog = fixtures::sales_catalog();
    let t0 = fixtures::baseline();

    catalog
        .drop_object(&SchemaObjectRef::new(ObjectType::Table, "dbo", "Orders"))
        .await;

    let delta = catalog
        .fetch_objects(&CatalogQuery::delta(ObjectType::Table, t0))
        .await
        .unwrap();
    assert!(delta.is_empty());

    let full = catalog.fetch_objects(&CatalogQuery::full(ObjectType::Table)).await.unwrap();
    assert_eq!(full.len(), 2);
}

#[tokio::test]
async fn test_table_type_delta_uses_create_date() {
    let catalog = fixtures::sales_catalog();
    let t0 = fixtures::baseline();

    let before = catalog
        .fetch_objects(&CatalogQuery::delta(ObjectType::UserDefinedTableType, t0 - Duration::days(1)))
        .await
        .unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].last_modified(), t0);

    let after = catalog
        .fetch_objects(&CatalogQuery::delta(ObjectType::UserDefinedTableType, t0))
        .await
        .unwrap();
    assert!(after.is_empty());
}

#[tokio::test]
async fn test_scalar_types_always_full_scan() {
    let catalog = fixtures::sales_catalog();
    let query = CatalogQuery::delta(ObjectType::UserDefinedDataType, fixtures::baseline());
    assert_eq!(query.mode, ScanMode::Full);

    let rows = catalog.fetch_objects(&query).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].last_modified(), UNKNOWN_TIMESTAMP);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_query_failure_is_an_error_not_an_empty_result() {
    let catalog = fixtures::sales_catalog();
    catalog
        .fail_type(ObjectType::Procedure, FetchError::NetworkError("connection reset".to_string()))
        .await;

    let result = catalog.fetch_objects(&CatalogQuery::full(ObjectType::Procedure)).await;
    assert!(matches!(result, Err(FetchError::NetworkError(_))));
}

#[tokio::test]
async fn test_latency_simulation() {
    let catalog = MockCatalog::new().with_latency(50);

    let start = std::time::Instant::now();
    let _ = catalog.fetch_objects(&CatalogQuery::full(ObjectType::View)).await;

    assert!(start.elapsed().as_millis() >= 50);
}
