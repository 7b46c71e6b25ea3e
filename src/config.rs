//! Project-level configuration for the index engine.
//!
//! Everything the engine writes lives under a project-local cache directory
//! (`.code-graph/` by default). The database inside it is a disposable cache:
//! deleting the directory is always safe and only costs a full re-index.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name of the project-local cache directory.
pub const CACHE_DIR: &str = ".code-graph";

/// Database file name inside the cache directory.
pub const DB_FILENAME: &str = "index.db";

/// Lock file name inside the cache directory.
pub const LOCK_FILENAME: &str = "owner.lock";

/// Source file extensions indexed by default.
pub const DEFAULT_EXTENSIONS: &[&str] = &["rs", "ts", "tsx", "js", "jsx", "py"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Absolute path to the project root. All stored paths are relative to it.
    pub project_root: PathBuf,

    /// Directory to scan, relative to the project root.
    pub source_dir: String,

    /// Glob patterns (matched against project-relative paths) to exclude.
    pub exclude: Vec<String>,

    /// File extensions considered source files.
    pub extensions: Vec<String>,
}

impl IndexConfig {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            source_dir: ".".to_string(),
            exclude: vec![
                format!("{CACHE_DIR}/**"),
                ".git/**".to_string(),
                "target/**".to_string(),
                "node_modules/**".to_string(),
            ],
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.project_root.join(CACHE_DIR)
    }

    pub fn db_path(&self) -> PathBuf {
        self.cache_dir().join(DB_FILENAME)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.cache_dir().join(LOCK_FILENAME)
    }

    pub fn source_root(&self) -> PathBuf {
        if self.source_dir == "." {
            self.project_root.clone()
        } else {
            self.project_root.join(&self.source_dir)
        }
    }

    pub fn is_source_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|e| e == ext))
            .unwrap_or(false)
    }
}
