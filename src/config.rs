//! Compiler configuration
//!
//! Defaults match the descriptors written for the collection runtime:
//! records carry their identity in `_id`, composite keys are joined with
//! `-`, and the root node is named `main`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::schema::{SchemaError, SchemaResult};

/// Configuration shared by every compilation of one compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompilerConfig {
    /// Attribute identifying a record across stores.
    pub identity_key: String,
    /// Separator of composite primary keys.
    pub key_separator: String,
    /// Base name of the root node.
    pub root_name: String,
    /// Emit a `STORE_COMPILED` event per compilation.
    pub log_compilation: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            identity_key: "_id".to_string(),
            key_separator: "-".to_string(),
            root_name: "main".to_string(),
            log_compilation: false,
        }
    }
}

impl CompilerConfig {
    pub fn with_identity_key(mut self, identity_key: impl Into<String>) -> Self {
        self.identity_key = identity_key.into();
        self
    }

    pub fn with_key_separator(mut self, separator: impl Into<String>) -> Self {
        self.key_separator = separator.into();
        self
    }

    pub fn with_root_name(mut self, root_name: impl Into<String>) -> Self {
        self.root_name = root_name.into();
        self
    }

    pub fn with_log_compilation(mut self, enabled: bool) -> Self {
        self.log_compilation = enabled;
        self
    }

    /// Parses a JSON configuration. Missing keys keep their defaults.
    pub fn from_json_str(content: &str) -> SchemaResult<Self> {
        let config: CompilerConfig = serde_json::from_str(content)
            .map_err(|e| SchemaError::load_failed("<config>", format!("Invalid JSON: {}", e)))?;
        config.check("<config>")?;
        Ok(config)
    }

    /// Loads a JSON configuration file.
    pub fn load(path: &Path) -> SchemaResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SchemaError::load_failed(path.display().to_string(), format!("Failed to read file: {}", e))
        })?;
        let config: CompilerConfig = serde_json::from_str(&content).map_err(|e| {
            SchemaError::load_failed(path.display().to_string(), format!("Invalid JSON: {}", e))
        })?;
        config.check(&path.display().to_string())?;
        Ok(config)
    }

    fn check(&self, origin: &str) -> SchemaResult<()> {
        if self.identity_key.is_empty() {
            return Err(SchemaError::load_failed(origin, "identityKey must not be empty"));
        }
        if self.key_separator.is_empty() {
            return Err(SchemaError::load_failed(origin, "keySeparator must not be empty"));
        }
        if self.root_name.is_empty() {
            return Err(SchemaError::load_failed(origin, "rootName must not be empty"));
        }
        Ok(())
    }
}
