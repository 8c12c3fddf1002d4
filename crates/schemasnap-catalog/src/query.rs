//! Catalog query shapes per object type
//!
//! Each object type is listed from the `sys.*` catalog views. The shape
//! differs per type:
//! - procedures, functions and views join `sys.sql_modules` for the body
//! - tables omit the body
//! - table types and scalar user-defined types coalesce `modify_date` with
//!   `create_date`, which the catalog does not reliably populate for them
//! - scalar user-defined types have no usable modification column at all;
//!   they are always full-scanned and their type signature is returned as the
//!   definition so a change can still be fingerprinted
//!
//! Reference: https://learn.microsoft.com/sql/relational-databases/system-catalog-views/sys-objects-transact-sql

use chrono::{DateTime, Utc};
use schemasnap_core::ObjectType;

use crate::adapter::CatalogRow;

/// Whether a query lists every object or only those changed since a watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Unconstrained listing (cold start, removal detection)
    Full,

    /// Objects whose modification time is strictly after `since`
    Delta { since: DateTime<Utc> },
}

/// A bound query parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryParam {
    Timestamp(DateTime<Utc>),
    Text(String),
}

/// One catalog listing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    /// Object type to list
    pub object_type: ObjectType,

    /// Full or delta listing
    pub mode: ScanMode,

    /// Schema allow-list; empty means all schemas
    pub schemas: Vec<String>,
}

impl CatalogQuery {
    /// Full scan over every object of a type
    pub fn full(object_type: ObjectType) -> Self {
        Self {
            object_type,
            mode: ScanMode::Full,
            schemas: Vec::new(),
        }
    }

    /// Delta scan over objects modified after `since`
    ///
    /// Types without a usable modification column silently degrade to a
    /// full scan.
    pub fn delta(object_type: ObjectType, since: DateTime<Utc>) -> Self {
        let mode = if object_type.supports_delta() {
            ScanMode::Delta { since }
        } else {
            ScanMode::Full
        };

        Self {
            object_type,
            mode,
            schemas: Vec::new(),
        }
    }

    /// Restrict the query to a schema allow-list
    pub fn with_schemas(mut self, schemas: &[String]) -> Self {
        self.schemas = schemas.to_vec();
        self
    }

    /// Whether this is a full scan
    pub fn is_full(&self) -> bool {
        matches!(self.mode, ScanMode::Full)
    }

    /// Whether a schema name passes the allow-list (case-insensitive)
    pub fn schema_in_scope(&self, schema: &str) -> bool {
        self.schemas.is_empty()
            || self.schemas.iter().any(|s| s.eq_ignore_ascii_case(schema))
    }

    /// Evaluate the query predicate against a row
    ///
    /// Adapters that hold objects in memory use this instead of the SQL text.
    pub fn matches(&self, row: &CatalogRow) -> bool {
        if row.object.object_type != self.object_type || !self.schema_in_scope(&row.object.schema) {
            return false;
        }

        match self.mode {
            ScanMode::Full => true,
            ScanMode::Delta { since } => row.last_modified() > since,
        }
    }

    /// Expression yielding the effective modification time
    fn modified_expr(&self) -> &'static str {
        match self.object_type {
            ObjectType::UserDefinedTableType => "COALESCE(o.modify_date, o.create_date)",
            ObjectType::UserDefinedDataType => "CAST(NULL AS datetime2)",
            _ => "o.modify_date",
        }
    }

    /// SELECT + FROM clause for this object type
    fn base_select(&self) -> String {
        let modified = self.modified_expr();
        match self.object_type {
            ObjectType::Procedure
            | ObjectType::ScalarFunction
            | ObjectType::TableValuedFunction
            | ObjectType::View => format!(
                "SELECT s.name AS schema_name, o.name AS object_name, {modified} AS modify_date, \
                 o.create_date, m.definition\n\
                 FROM sys.objects AS o\n\
                 INNER JOIN sys.schemas AS s ON s.schema_id = o.schema_id\n\
                 LEFT JOIN sys.sql_modules AS m ON m.object_id = o.object_id\n\
                 WHERE o.type IN ({types}) AND o.is_ms_shipped = 0",
                types = Self::type_codes(self.object_type),
            ),
            ObjectType::Table => format!(
                "SELECT s.name AS schema_name, o.name AS object_name, {modified} AS modify_date, \
                 o.create_date, CAST(NULL AS nvarchar(max)) AS definition\n\
                 FROM sys.objects AS o\n\
                 INNER JOIN sys.schemas AS s ON s.schema_id = o.schema_id\n\
                 WHERE o.type IN ({types}) AND o.is_ms_shipped = 0",
                types = Self::type_codes(self.object_type),
            ),
            ObjectType::UserDefinedTableType => format!(
                "SELECT s.name AS schema_name, tt.name AS object_name, {modified} AS modify_date, \
                 o.create_date, CAST(NULL AS nvarchar(max)) AS definition\n\
                 FROM sys.table_types AS tt\n\
                 INNER JOIN sys.schemas AS s ON s.schema_id = tt.schema_id\n\
                 INNER JOIN sys.objects AS o ON o.object_id = tt.type_table_object_id\n\
                 WHERE tt.is_user_defined = 1"
            ),
            ObjectType::UserDefinedDataType => format!(
                "SELECT s.name AS schema_name, t.name AS object_name, {modified} AS modify_date, \
                 CAST(NULL AS datetime2) AS create_date, \
                 CONCAT(TYPE_NAME(t.system_type_id), '(', t.max_length, ',', t.precision, ',', t.scale, ')', \
                 IIF(t.is_nullable = 1, ' NULL', ' NOT NULL')) AS definition\n\
                 FROM sys.types AS t\n\
                 INNER JOIN sys.schemas AS s ON s.schema_id = t.schema_id\n\
                 WHERE t.is_user_defined = 1 AND t.is_table_type = 0"
            ),
        }
    }

    /// `sys.objects.type` codes for module-backed object types
    fn type_codes(object_type: ObjectType) -> &'static str {
        match object_type {
            ObjectType::Procedure => "'P', 'PC'",
            ObjectType::ScalarFunction => "'FN', 'FS'",
            ObjectType::TableValuedFunction => "'IF', 'TF', 'FT'",
            ObjectType::View => "'V'",
            ObjectType::Table => "'U'",
            ObjectType::UserDefinedTableType | ObjectType::UserDefinedDataType => "'TT'",
        }
    }

    /// Render the query as T-SQL with named parameters
    ///
    /// Parameter values are returned by [`CatalogQuery::params`] in the same
    /// order as they appear in the text.
    pub fn to_sql(&self) -> String {
        let mut sql = self.base_select();

        if let ScanMode::Delta { .. } = self.mode {
            sql.push_str(&format!("\n  AND {} > @since", self.modified_expr()));
        }

        if !self.schemas.is_empty() {
            let placeholders: Vec<String> = (0..self.schemas.len())
                .map(|i| format!("@schema{}", i))
                .collect();
            sql.push_str(&format!("\n  AND s.name IN ({})", placeholders.join(", ")));
        }

        sql.push_str("\nORDER BY s.name, object_name");
        sql
    }

    /// Bound parameters for [`CatalogQuery::to_sql`]
    pub fn params(&self) -> Vec<(String, QueryParam)> {
        let mut params = Vec::new();

        if let ScanMode::Delta { since } = self.mode {
            params.push(("@since".to_string(), QueryParam::Timestamp(since)));
        }

        for (i, schema) in self.schemas.iter().enumerate() {
            params.push((format!("@schema{}", i), QueryParam::Text(schema.clone())));
        }

        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use schemasnap_core::SchemaObjectRef;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn module_types_join_definition() {
        for object_type in [
            ObjectType::Procedure,
            ObjectType::ScalarFunction,
            ObjectType::TableValuedFunction,
            ObjectType::View,
        ] {
            let sql = CatalogQuery::full(object_type).to_sql();
            assert!(sql.contains("sys.sql_modules"), "{object_type} should join the body");
        }
    }

    #[test]
    fn tables_omit_definition() {
        let sql = CatalogQuery::full(ObjectType::Table).to_sql();
        assert!(!sql.contains("sys.sql_modules"));
        assert!(sql.contains("o.type IN ('U')"));
    }

    #[test]
    fn table_types_coalesce_create_date() {
        let sql = CatalogQuery::delta(ObjectType::UserDefinedTableType, ts(1)).to_sql();
        assert!(sql.contains("AND COALESCE(o.modify_date, o.create_date) > @since"));
    }

    #[test]
    fn scalar_types_are_pinned_to_full_scan() {
        let query = CatalogQuery::delta(ObjectType::UserDefinedDataType, ts(1));
        assert!(query.is_full());
        assert!(!query.to_sql().contains("@since"));
        assert!(query.params().is_empty());
    }

    #[test]
    fn delta_query_binds_since_and_schemas() {
        let query = CatalogQuery::delta(ObjectType::Procedure, ts(3))
            .with_schemas(&["dbo".to_string(), "sales".to_string()]);

        let sql = query.to_sql();
        assert!(sql.contains("AND o.modify_date > @since"));
        assert!(sql.contains("AND s.name IN (@schema0, @schema1)"));

        let params = query.params();
        assert_eq!(params.len(), 3);
        assert_eq!(params[0], ("@since".to_string(), QueryParam::Timestamp(ts(3))));
        assert_eq!(params[2], ("@schema1".to_string(), QueryParam::Text("sales".to_string())));
    }

    #[test]
    fn predicate_matches_rows() {
        let users = CatalogRow::new(SchemaObjectRef::new(ObjectType::Table, "DBO", "Users"), ts(5));
        let audit = CatalogRow::new(SchemaObjectRef::new(ObjectType::Table, "audit", "Log"), ts(1));

        let delta = CatalogQuery::delta(ObjectType::Table, ts(2));
        assert!(delta.matches(&users));
        assert!(!delta.matches(&audit));

        let scoped = CatalogQuery::full(ObjectType::Table).with_schemas(&["dbo".to_string()]);
        assert!(scoped.matches(&users));
        assert!(!scoped.matches(&audit));

        let views = CatalogQuery::full(ObjectType::View);
        assert!(!views.matches(&users));
    }

    #[test]
    fn delta_is_strictly_after_since() {
        let row = CatalogRow::new(SchemaObjectRef::new(ObjectType::View, "dbo", "V"), ts(2));
        assert!(!CatalogQuery::delta(ObjectType::View, ts(2)).matches(&row));
    }
}
