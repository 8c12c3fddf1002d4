//! Configuration schema (schemasnap.toml)

use crate::object::ObjectType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the persisted cache file inside the cache directory
pub const SCHEMA_OBJECTS_FILE: &str = "schema-objects.json";

/// Name of the debug dependency export inside the cache directory
pub const DEPENDENCY_GRAPH_FILE: &str = "dependency-graph.json";

/// Name of the delta ledger inside the cache directory
pub const OBJECT_INDEX_FILE: &str = "object-index.json";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Cache directory, relative to the project root
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Bypass cache consultation for this run without deleting on-disk state
    #[serde(default)]
    pub force_reload: bool,

    /// Retry an empty delta scan once as a full scan
    #[serde(default)]
    pub allow_full_scan_fallback: bool,

    /// Schema allow-list applied to catalog scans; empty means all schemas
    #[serde(default)]
    pub schemas: Vec<String>,

    /// Object types to track
    #[serde(default = "default_object_types")]
    pub object_types: Vec<ObjectType>,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: PathBuf,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_object_types() -> Vec<ObjectType> {
    ObjectType::ALL.to_vec()
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            force_reload: false,
            allow_full_scan_fallback: false,
            schemas: Vec::new(),
            object_types: default_object_types(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl SnapshotConfig {
    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config = Self::from_toml(&contents)?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let mut config: SnapshotConfig = toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.project_root = std::env::current_dir().unwrap_or_default();
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Use a different project root
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    /// Set the force-reload switch
    pub fn with_force_reload(mut self, force_reload: bool) -> Self {
        self.force_reload = force_reload;
        self
    }

    /// Set whether empty delta scans fall back to a full scan
    pub fn with_full_scan_fallback(mut self, allow: bool) -> Self {
        self.allow_full_scan_fallback = allow;
        self
    }

    /// Restrict scans to the given schemas
    pub fn with_schemas(mut self, schemas: Vec<String>) -> Self {
        self.schemas = schemas;
        self
    }

    /// Absolute cache directory
    pub fn cache_path(&self) -> PathBuf {
        self.project_root.join(&self.cache_dir)
    }

    /// Path of the persisted object cache
    pub fn schema_objects_path(&self) -> PathBuf {
        self.cache_path().join(SCHEMA_OBJECTS_FILE)
    }

    /// Path of the dependency graph export
    pub fn graph_path(&self) -> PathBuf {
        self.cache_path().join(DEPENDENCY_GRAPH_FILE)
    }

    /// Path of the object index
    pub fn index_path(&self) -> PathBuf {
        self.cache_path().join(OBJECT_INDEX_FILE)
    }

    /// Schema allow-list, or `None` when every schema is in scope
    pub fn schema_filter(&self) -> Option<&[String]> {
        if self.schemas.is_empty() {
            None
        } else {
            Some(&self.schemas)
        }
    }

    /// Tracked object types in scan order, without duplicates
    pub fn tracked_types(&self) -> Vec<ObjectType> {
        let mut types = self.object_types.clone();
        types.sort();
        types.dedup();
        types
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
