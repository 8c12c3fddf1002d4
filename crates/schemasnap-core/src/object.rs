//! Schema object identity and cache entry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Category of a tracked catalog object
///
/// Serialized by its PascalCase name. The declaration order is the order in
/// which a full run walks the catalog (leaves first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    /// Scalar user-defined data type (alias type)
    UserDefinedDataType,

    /// User-defined table type
    UserDefinedTableType,

    /// Base table
    Table,

    /// View
    View,

    /// Scalar function
    ScalarFunction,

    /// Inline or multi-statement table-valued function
    TableValuedFunction,

    /// Stored procedure
    Procedure,
}

impl ObjectType {
    /// Every tracked object type, in scan order
    pub const ALL: [ObjectType; 7] = [
        ObjectType::UserDefinedDataType,
        ObjectType::UserDefinedTableType,
        ObjectType::Table,
        ObjectType::View,
        ObjectType::ScalarFunction,
        ObjectType::TableValuedFunction,
        ObjectType::Procedure,
    ];

    /// Stable name used in persisted files and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Procedure => "Procedure",
            Self::ScalarFunction => "ScalarFunction",
            Self::TableValuedFunction => "TableValuedFunction",
            Self::View => "View",
            Self::Table => "Table",
            Self::UserDefinedTableType => "UserDefinedTableType",
            Self::UserDefinedDataType => "UserDefinedDataType",
        }
    }

    /// Whether the catalog stores a definition body for this type
    pub fn has_definition(&self) -> bool {
        matches!(
            self,
            Self::Procedure | Self::ScalarFunction | Self::TableValuedFunction | Self::View
        )
    }

    /// Whether a `modify_date > @since` predicate can be trusted for this type
    ///
    /// Scalar user-defined types have no reliable modification column and are
    /// always full-scanned.
    pub fn supports_delta(&self) -> bool {
        !matches!(self, Self::UserDefinedDataType)
    }

    /// Whether the modification time must be coalesced with the creation time
    pub fn coalesces_create_date(&self) -> bool {
        matches!(self, Self::UserDefinedTableType | Self::UserDefinedDataType)
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ObjectType {
    type Err = ParseObjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let object_type = match lowered.as_str() {
            "procedure" | "proc" | "p" => Self::Procedure,
            "scalarfunction" | "scalar-function" | "fn" => Self::ScalarFunction,
            "tablevaluedfunction" | "table-valued-function" | "tvf" => Self::TableValuedFunction,
            "view" | "v" => Self::View,
            "table" | "u" => Self::Table,
            "userdefinedtabletype" | "table-type" | "tt" => Self::UserDefinedTableType,
            "userdefineddatatype" | "data-type" | "udt" => Self::UserDefinedDataType,
            _ => return Err(ParseObjectError::UnknownType(s.to_string())),
        };
        Ok(object_type)
    }
}

/// Errors produced when parsing object references from text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseObjectError {
    #[error("Unknown object type: {0}")]
    UnknownType(String),

    #[error("Expected <schema>.<name>, got: {0}")]
    InvalidName(String),
}

/// Identifies one schema object within a project (the fingerprint triple)
///
/// Equality, ordering and hashing ignore the case of schema and name, matching
/// the catalog's default collation. The original spelling is preserved for
/// display and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaObjectRef {
    /// Object category
    #[serde(rename = "type")]
    pub object_type: ObjectType,

    /// Owning schema
    pub schema: String,

    /// Object name
    pub name: String,
}

impl SchemaObjectRef {
    /// Create a new object reference
    pub fn new(object_type: ObjectType, schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            object_type,
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse a `schema.name` pair (brackets and quotes are stripped)
    pub fn parse(object_type: ObjectType, qualified: &str) -> Result<Self, ParseObjectError> {
        let unquote = |part: &str| {
            part.trim()
                .trim_start_matches(['[', '"'])
                .trim_end_matches([']', '"'])
                .to_string()
        };

        match qualified.split_once('.') {
            Some((schema, name)) if !schema.trim().is_empty() && !name.trim().is_empty() => {
                Ok(Self::new(object_type, unquote(schema), unquote(name)))
            }
            _ => Err(ParseObjectError::InvalidName(qualified.to_string())),
        }
    }

    /// Schema-qualified name, e.g. `dbo.GetUser`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Case-folded `(schema, name)` key used by per-type buckets
    pub fn name_key(&self) -> (String, String) {
        (self.schema.to_lowercase(), self.name.to_lowercase())
    }

    fn sort_key(&self) -> (ObjectType, String, String) {
        let (schema, name) = self.name_key();
        (self.object_type, schema, name)
    }
}

impl PartialEq for SchemaObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.object_type == other.object_type
            && self.schema.to_lowercase() == other.schema.to_lowercase()
            && self.name.to_lowercase() == other.name.to_lowercase()
    }
}

impl Eq for SchemaObjectRef {}

impl Hash for SchemaObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sort_key().hash(state);
    }
}

impl PartialOrd for SchemaObjectRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SchemaObjectRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl std::fmt::Display for SchemaObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}.{}", self.object_type, self.schema, self.name)
    }
}

/// Sentinel timestamp meaning "freshness unknown, recompute"
///
/// Invalidation resets an entry's `last_modified_utc` to this value instead of
/// deleting the entry.
pub const UNKNOWN_TIMESTAMP: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// Whether a timestamp is the unknown sentinel
pub fn is_unknown(timestamp: &DateTime<Utc>) -> bool {
    *timestamp == UNKNOWN_TIMESTAMP
}

/// Default content fingerprint: lowercase hex SHA-256 of the definition body
pub fn content_hash(definition: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(definition.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cached state of one ever-observed schema object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaObjectCacheEntry {
    /// Object category
    #[serde(rename = "type")]
    pub object_type: ObjectType,

    /// Owning schema
    pub schema: String,

    /// Object name
    pub name: String,

    /// Last catalog modification time seen for this object, or the sentinel
    pub last_modified_utc: DateTime<Utc>,

    /// When the entry was last written by an analysis
    pub cached_utc: DateTime<Utc>,

    /// Objects this one references (forward edges)
    #[serde(default)]
    pub dependencies: Vec<SchemaObjectRef>,

    /// Fingerprint of the analyzed content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// Catalog modification times of the dependencies at analysis time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependency_versions: Vec<ObjectIndexEntry>,
}

impl SchemaObjectCacheEntry {
    /// Create an entry with no dependencies and no fingerprint
    pub fn new(object: &SchemaObjectRef, last_modified_utc: DateTime<Utc>) -> Self {
        Self {
            object_type: object.object_type,
            schema: object.schema.clone(),
            name: object.name.clone(),
            last_modified_utc,
            cached_utc: Utc::now(),
            dependencies: Vec::new(),
            content_hash: None,
            dependency_versions: Vec::new(),
        }
    }

    /// Reference to the object this entry describes
    pub fn object_ref(&self) -> SchemaObjectRef {
        SchemaObjectRef::new(self.object_type, self.schema.clone(), self.name.clone())
    }

    /// Whether the entry was invalidated and must be recomputed
    pub fn is_invalidated(&self) -> bool {
        is_unknown(&self.last_modified_utc)
    }

    /// Catalog time a dependency had when this entry was analyzed
    pub fn dependency_version(&self, dependency: &SchemaObjectRef) -> Option<DateTime<Utc>> {
        self.dependency_versions
            .iter()
            .find(|version| version.object_ref() == *dependency)
            .map(|version| version.last_modified_utc)
    }
}

/// Row of the lightweight delta ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectIndexEntry {
    /// Object category
    #[serde(rename = "type")]
    pub object_type: ObjectType,

    /// Owning schema
    pub schema: String,

    /// Object name
    pub name: String,

    /// Last modification time reported by the catalog
    pub last_modified_utc: DateTime<Utc>,

    /// Definition fingerprint, kept only for objects the catalog reports no dates for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl ObjectIndexEntry {
    /// Create an index entry for an object
    pub fn new(object: &SchemaObjectRef, last_modified_utc: DateTime<Utc>) -> Self {
        Self {
            object_type: object.object_type,
            schema: object.schema.clone(),
            name: object.name.clone(),
            last_modified_utc,
            content_hash: None,
        }
    }

    /// Attach a definition fingerprint
    pub fn with_content_hash(mut self, content_hash: Option<String>) -> Self {
        self.content_hash = content_hash;
        self
    }

    /// Reference to the object this entry describes
    pub fn object_ref(&self) -> SchemaObjectRef {
        SchemaObjectRef::new(self.object_type, self.schema.clone(), self.name.clone())
    }
}
