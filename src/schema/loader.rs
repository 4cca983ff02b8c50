//! Descriptor loader
//!
//! Reads every `<dir>/*.json` descriptor file (the file stem is the store
//! name) in file-name order and registers it. What happens to a file that
//! fails is decided by the [`LoadPolicy`].

use std::fs;
use std::path::{Path, PathBuf};

use super::descriptor::Descriptor;
use super::errors::{SchemaError, SchemaResult};
use crate::compiler::StoreRegistry;
use crate::observability::Severity;

/// What to do with a descriptor that fails to load or compile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPolicy {
    /// The first failure fails the whole load
    #[default]
    Abort,
    /// Failures are logged and the file is skipped
    Skip,
}

/// Outcome of one load
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Registered stores, in load order
    pub loaded: Vec<String>,
    pub skipped: Vec<SchemaError>,
}

pub struct SchemaLoader {
    descriptor_dir: PathBuf,
    policy: LoadPolicy,
}

impl SchemaLoader {
    pub fn new(descriptor_dir: impl Into<PathBuf>) -> Self {
        Self {
            descriptor_dir: descriptor_dir.into(),
            policy: LoadPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: LoadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn descriptor_dir(&self) -> &Path {
        &self.descriptor_dir
    }

    /// Loads every descriptor file into `registry`.
    ///
    /// # Errors
    ///
    /// `LoadFailed` when the directory cannot be read. Under
    /// [`LoadPolicy::Abort`], the first file that fails to parse or compile.
    pub fn load_into(&self, registry: &mut StoreRegistry) -> SchemaResult<LoadReport> {
        let mut report = LoadReport::default();
        for path in self.descriptor_files()? {
            let store = match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(store) => store.to_string(),
                None => continue,
            };
            let outcome = read_descriptor(&path).and_then(|descriptor| registry.register(&store, &descriptor));
            match outcome {
                Ok(_) => report.loaded.push(store),
                Err(err) => match self.policy {
                    LoadPolicy::Abort => return Err(err),
                    LoadPolicy::Skip => {
                        let path = path.display().to_string();
                        let reason = err.to_string();
                        registry.compiler().logger().event(
                            Severity::Warn,
                            "STORE_SKIPPED",
                            &[("store", &store), ("path", &path), ("code", err.code().code()), ("reason", &reason)],
                        );
                        report.skipped.push(err);
                    }
                },
            }
        }
        Ok(report)
    }

    /// JSON files of the descriptor directory, sorted by name
    fn descriptor_files(&self) -> SchemaResult<Vec<PathBuf>> {
        let dir = self.descriptor_dir.display().to_string();
        let entries = fs::read_dir(&self.descriptor_dir)
            .map_err(|e| SchemaError::load_failed(&dir, format!("Failed to read descriptor directory: {}", e)))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| SchemaError::load_failed(&dir, format!("Failed to read directory entry: {}", e)))?
                .path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn read_descriptor(path: &Path) -> SchemaResult<Descriptor> {
    let location = path.display().to_string();
    let content = fs::read_to_string(path)
        .map_err(|e| SchemaError::load_failed(&location, format!("Failed to read file: {}", e)))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| SchemaError::load_failed(&location, format!("Invalid JSON: {}", e)))?;
    Descriptor::from_json(&value)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::compiler::Compiler;
    use crate::observability::MemoryLogger;
    use crate::schema::SchemaErrorCode;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) {
        fs::write(dir.path().join(name), content).unwrap();
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(&dir, "menu.json", r#"{ "id": ["int", "<<idMenu>>"], "label": ["string"] }"#);
        write(&dir, "broken.json", r#"{ "rows": ["array", { "a": ["int"] }] }"#);
        write(&dir, "notes.txt", "ignored");
        dir
    }

    #[test]
    fn test_abort_on_first_failure() {
        let dir = fixture();
        let mut registry = StoreRegistry::default();
        let err = SchemaLoader::new(dir.path()).load_into(&mut registry).unwrap_err();

        assert_eq!(err.code(), SchemaErrorCode::Configuration);
        // broken.json sorts before menu.json
        assert_eq!(registry.store_count(), 0);
    }

    #[test]
    fn test_skip_logs_and_continues() {
        let dir = fixture();
        write(&dir, "zeta.json", "{ not json");
        let logger = Arc::new(MemoryLogger::new());
        let mut registry = StoreRegistry::new(Compiler::default().with_logger(logger.clone()));

        let report = SchemaLoader::new(dir.path())
            .with_policy(LoadPolicy::Skip)
            .load_into(&mut registry)
            .unwrap();

        assert_eq!(report.loaded, vec!["menu"]);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[1].code(), SchemaErrorCode::LoadFailed);
        assert!(registry.exists("menu"));
        let skipped: Vec<_> = logger.entries().into_iter().filter(|e| e.event == "STORE_SKIPPED").collect();
        assert_eq!(skipped.len(), 2);
        assert!(skipped[0].labels.contains(&"store=broken".to_string()));
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let loader = SchemaLoader::new(dir.path().join("absent")).with_policy(LoadPolicy::Skip);
        let err = loader.load_into(&mut StoreRegistry::default()).unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::LoadFailed);
    }
}
