//! Test fixtures for catalog adapter integration tests
//!
//! A small sales database with one object of every tracked type, the way a
//! typical line-of-business schema looks.

use chrono::{DateTime, TimeZone, Utc};
use schemasnap_catalog::{CatalogRow, MockCatalog, MockCatalogBuilder};
use schemasnap_core::{ObjectType, SchemaObjectRef};

/// Baseline modification time for every fixture object
pub fn baseline() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap()
}

/// A catalog with one object of each type plus an out-of-scope audit schema
pub fn sales_catalog() -> MockCatalog {
    let t0 = baseline();

    MockCatalogBuilder::new()
        .with_row(
            CatalogRow::new(SchemaObjectRef::new(ObjectType::UserDefinedDataType, "dbo", "Email"), t0)
                .without_modified()
                .with_definition("nvarchar(256,0,0) NOT NULL"),
        )
        .with_row(
            CatalogRow::new(SchemaObjectRef::new(ObjectType::UserDefinedTableType, "dbo", "IdList"), t0)
                .without_modified()
                .with_created(t0),
        )
        .with_object(ObjectType::Table, "dbo", "Users", t0)
        .with_object(ObjectType::Table, "dbo", "Orders", t0)
        .with_object(ObjectType::Table, "audit", "Events", t0)
        .with_definition(
            ObjectType::View,
            "dbo",
            "ActiveUsers",
            t0,
            "CREATE VIEW dbo.ActiveUsers AS SELECT * FROM dbo.Users WHERE IsActive = 1",
        )
        .with_definition(
            ObjectType::ScalarFunction,
            "dbo",
            "OrderTotal",
            t0,
            "CREATE FUNCTION dbo.OrderTotal(@id int) RETURNS money AS BEGIN RETURN 0 END",
        )
        .with_definition(
            ObjectType::TableValuedFunction,
            "dbo",
            "OrdersForUser",
            t0,
            "CREATE FUNCTION dbo.OrdersForUser(@id int) RETURNS TABLE AS RETURN SELECT * FROM dbo.Orders",
        )
        .with_definition(
            ObjectType::Procedure,
            "dbo",
            "GetUser",
            t0,
            "CREATE PROCEDURE dbo.GetUser @id int AS SELECT * FROM dbo.ActiveUsers WHERE Id = @id",
        )
        .build()
}
