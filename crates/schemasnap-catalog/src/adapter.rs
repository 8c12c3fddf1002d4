//! Catalog adapter trait for listing schema objects

use chrono::{DateTime, Utc};
use schemasnap_core::{content_hash, is_unknown, SchemaObjectRef, UNKNOWN_TIMESTAMP};

use crate::query::CatalogQuery;

/// One object row returned by a catalog query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    /// The object this row describes
    pub object: SchemaObjectRef,

    /// `modify_date` as reported by the catalog
    pub modified_utc: Option<DateTime<Utc>>,

    /// `create_date` as reported by the catalog
    pub created_utc: Option<DateTime<Utc>>,

    /// Definition body (procedures, functions, views only)
    pub definition: Option<String>,
}

impl CatalogRow {
    /// Create a row with a modification time only
    pub fn new(object: SchemaObjectRef, modified_utc: DateTime<Utc>) -> Self {
        Self {
            object,
            modified_utc: Some(modified_utc),
            created_utc: None,
            definition: None,
        }
    }

    /// Set the creation time
    pub fn with_created(mut self, created_utc: DateTime<Utc>) -> Self {
        self.created_utc = Some(created_utc);
        self
    }

    /// Clear the modification time (catalog left it unpopulated)
    pub fn without_modified(mut self) -> Self {
        self.modified_utc = None;
        self
    }

    /// Set the definition body
    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    /// Effective last-modified time: `COALESCE(modify_date, create_date)`
    ///
    /// Falls back to the unknown sentinel when the catalog reports neither.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.modified_utc
            .or(self.created_utc)
            .unwrap_or(UNKNOWN_TIMESTAMP)
    }

    /// Fingerprint of the definition for rows without any catalog date
    ///
    /// Scalar user-defined types report neither `modify_date` nor
    /// `create_date`; their type signature is the only way to tell a change.
    pub fn fingerprint(&self) -> Option<String> {
        if !is_unknown(&self.last_modified()) {
            return None;
        }
        self.definition.as_deref().map(content_hash)
    }
}

/// Errors that can occur when querying the catalog
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Query failed: {0}")]
    QueryError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Trait for catalog adapters that can list schema objects
///
/// Implementations translate a [`CatalogQuery`] into a round-trip against the
/// live catalog. A failure must be reported as an error, never as an empty
/// result: an empty result is taken to mean "nothing exists / nothing changed".
#[async_trait::async_trait]
pub trait CatalogAdapter: Send + Sync {
    /// Get the adapter name (e.g., "SqlServer", "Mock")
    fn name(&self) -> &'static str;

    /// Run one catalog query and return the matching object rows
    async fn fetch_objects(&self, query: &CatalogQuery) -> Result<Vec<CatalogRow>, FetchError>;

    /// Test the connection to the catalog
    async fn test_connection(&self) -> Result<(), FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use schemasnap_core::ObjectType;

    #[test]
    fn last_modified_coalesces_create_date() {
        let object = SchemaObjectRef::new(ObjectType::UserDefinedTableType, "dbo", "IdList");
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let modified = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();

        let row = CatalogRow::new(object.clone(), modified).with_created(created);
        assert_eq!(row.last_modified(), modified);

        let row = row.without_modified();
        assert_eq!(row.last_modified(), created);

        let row = CatalogRow::new(object, modified).without_modified();
        assert_eq!(row.last_modified(), UNKNOWN_TIMESTAMP);
    }

    #[test]
    fn fingerprint_only_for_undated_rows() {
        let email = SchemaObjectRef::new(ObjectType::UserDefinedDataType, "dbo", "Email");
        let stamp = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();

        let dated = CatalogRow::new(email.clone(), stamp).with_definition("nvarchar(256,0,0) NULL");
        assert_eq!(dated.fingerprint(), None);

        let undated = dated.clone().without_modified();
        assert_eq!(undated.fingerprint(), Some(content_hash("nvarchar(256,0,0) NULL")));

        let widened = undated.clone().with_definition("nvarchar(512,0,0) NULL");
        assert_ne!(widened.fingerprint(), undated.fingerprint());
    }
}
