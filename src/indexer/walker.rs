//! Deterministic source file scanner.
//!
//! Walks the configured source root (gitignore- and hidden-aware), filters by
//! extension and exclude globs, and normalizes results to forward-slash
//! project-relative paths sorted for determinism.

use std::path::Path;

use ignore::WalkBuilder;

use crate::config::IndexConfig;
use crate::error::{IndexerError, Result};

pub struct FileWalker<'a> {
    config: &'a IndexConfig,
    excludes: Vec<glob::Pattern>,
}

impl<'a> FileWalker<'a> {
    pub fn new(config: &'a IndexConfig) -> Result<Self> {
        let excludes = config
            .exclude
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| IndexerError::Config(format!("bad exclude pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { config, excludes })
    }

    /// Returns the sorted set of project-relative source paths.
    pub fn scan(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();

        let walker = WalkBuilder::new(self.config.source_root())
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .ignore(true)
            .build();

        for entry in walker.flatten() {
            let path = entry.path();
            if !path.is_file() || !self.config.is_source_extension(path) {
                continue;
            }
            let Some(rel) = to_project_relative(&self.config.project_root, path) else {
                continue;
            };
            if self.is_excluded(&rel) {
                continue;
            }
            files.push(rel);
        }

        files.sort();
        files.dedup();
        Ok(files)
    }

    fn is_excluded(&self, rel_path: &str) -> bool {
        self.excludes.iter().any(|p| p.matches(rel_path))
    }
}

/// Normalizes an absolute path to a forward-slash path relative to `root`.
pub fn to_project_relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut out = String::new();
    for component in rel.components() {
        let part = component.as_os_str().to_str()?;
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(part);
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}
