//! Index diff engine: computes what changed on disk and re-derives entities
//! and relations for exactly those files.
//!
//! Atomicity policy: a full rebuild wipes the graph and must never be
//! observed half-done, so the whole pass runs in one top-level transaction.
//! An incremental pass instead gives each changed file its own top-level
//! transaction, so one bad file cannot discard committed progress on others.

pub mod extract;
pub mod moves;
pub mod walker;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::config::IndexConfig;
use crate::error::Result;
use crate::store::models::{
    content_hash, key_file_path, now_secs, CodeEntity, EntityKind, FileState,
};
use crate::store::GraphStore;
use extract::{Extractor, RawRelation};
use walker::FileWalker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOutcome {
    pub indexed_code_files: usize,
    pub removed_files: usize,
}

pub struct IndexEngine<'a> {
    store: &'a GraphStore,
    config: &'a IndexConfig,
    extractor: &'a dyn Extractor,
}

impl<'a> IndexEngine<'a> {
    pub fn new(store: &'a GraphStore, config: &'a IndexConfig, extractor: &'a dyn Extractor) -> Self {
        Self {
            store,
            config,
            extractor,
        }
    }

    pub fn index_project(&self, mode: IndexMode) -> Result<IndexOutcome> {
        let scanned = FileWalker::new(self.config)?.scan()?;
        match mode {
            IndexMode::Full => self.full_pass(&scanned),
            IndexMode::Incremental => self.incremental_pass(&scanned),
        }
    }

    /// Clears the graph and re-derives everything, all inside one top-level
    /// transaction. Any failure rolls the whole rebuild back, leaving the
    /// previous state intact.
    fn full_pass(&self, scanned: &[String]) -> Result<IndexOutcome> {
        tracing::info!(files = scanned.len(), "starting full index pass");
        self.store.with_transaction(|store| {
            store.clear_graph()?;
            for path in scanned {
                store.with_transaction(|store| self.index_file(store, path))?;
            }
            Ok(IndexOutcome {
                indexed_code_files: scanned.len(),
                removed_files: 0,
            })
        })
    }

    fn incremental_pass(&self, scanned: &[String]) -> Result<IndexOutcome> {
        let tracked: HashMap<String, FileState> = self
            .store
            .all_file_states()?
            .into_iter()
            .map(|state| (state.path.clone(), state))
            .collect();
        let scanned_set: HashSet<&str> = scanned.iter().map(String::as_str).collect();

        // A scan scoped to a subdirectory says nothing about files outside
        // it; only tracked paths inside the scanned subtree can be removed.
        let scope = self.scan_scope();
        let mut removed: Vec<String> = tracked
            .keys()
            .filter(|path| !scanned_set.contains(path.as_str()))
            .filter(|path| match &scope {
                Some(prefix) => path.starts_with(prefix.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        removed.sort();

        let mut changed = Vec::new();
        let mut added = Vec::new();
        for path in scanned {
            let abs = self.config.project_root.join(path);
            let bytes = match fs::read(&abs) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(file = %path, error = %err, "unreadable file skipped");
                    continue;
                }
            };
            let hash = content_hash(&bytes);
            let mtime = mtime_marker(&abs);
            match tracked.get(path) {
                Some(state) if state.content_hash == hash && state.mtime == mtime => {}
                Some(_) => changed.push(path.clone()),
                None => {
                    changed.push(path.clone());
                    added.push(path.clone());
                }
            }
        }

        tracing::info!(
            changed = changed.len(),
            removed = removed.len(),
            "starting incremental index pass"
        );

        // One top-level transaction per file: a failure here is transient,
        // the file's state row stays untouched and it retries next pass.
        let mut indexed = 0;
        for path in &changed {
            match self.store.with_transaction(|store| self.index_file(store, path)) {
                Ok(()) => indexed += 1,
                Err(err) => {
                    tracing::warn!(file = %path, error = %err, "failed to index file; will retry next pass");
                }
            }
        }

        if !removed.is_empty() {
            if !added.is_empty() {
                let moved = moves::retarget_and_remove(self.store, &removed, &added)?;
                if !moved.is_empty() {
                    tracing::info!(moved = moved.len(), "entities recognized as moved");
                }
            } else {
                self.store.with_transaction(|store| {
                    for path in &removed {
                        store.with_transaction(|store| store.remove_file_rows(path))?;
                    }
                    Ok(())
                })?;
            }
        }

        Ok(IndexOutcome {
            indexed_code_files: indexed,
            removed_files: removed.len(),
        })
    }

    /// Re-derives one file inside the caller's transaction: module entity,
    /// declared symbols, endpoint stubs, wholesale relation replacement, and
    /// finally the file-state row.
    fn index_file(&self, store: &GraphStore, rel_path: &str) -> Result<()> {
        let abs = self.config.project_root.join(rel_path);
        let bytes = fs::read(&abs)?;
        let hash = content_hash(&bytes);
        let source = String::from_utf8_lossy(&bytes);
        let extraction = self.extractor.extract(rel_path, &source)?;
        let now = now_secs();

        store.upsert_entity(&CodeEntity::module(rel_path, &hash, now))?;
        for symbol in &extraction.symbols {
            store.upsert_entity(&CodeEntity::symbol(
                rel_path,
                &symbol.name,
                symbol.kind,
                symbol.signature.as_deref(),
                &hash,
                now,
            ))?;
        }

        let mut kept: Vec<&RawRelation> = Vec::new();
        for relation in &extraction.relations {
            if self.resolvable_endpoint(&relation.src) && self.resolvable_endpoint(&relation.dst) {
                kept.push(relation);
            } else {
                tracing::debug!(
                    src = %relation.src,
                    dst = %relation.dst,
                    "dropped relation with unresolvable endpoint"
                );
            }
        }
        for relation in &kept {
            self.ensure_endpoint_entity(store, &relation.src, now)?;
            self.ensure_endpoint_entity(store, &relation.dst, now)?;
        }

        store.delete_relations_from_file(rel_path)?;
        for relation in &kept {
            store.insert_relation(
                relation.rel_type,
                &relation.src,
                &relation.dst,
                relation.meta.as_ref(),
            )?;
        }

        store.upsert_file_state(&FileState {
            path: rel_path.to_string(),
            content_hash: hash,
            mtime: mtime_marker(&abs),
            last_indexed_at: now,
        })?;
        Ok(())
    }

    /// Project-relative prefix of the scanned subtree, or None when the
    /// whole project is scanned.
    fn scan_scope(&self) -> Option<String> {
        let dir = self.config.source_dir.trim_matches('/');
        if dir.is_empty() || dir == "." {
            None
        } else {
            Some(format!("{dir}/"))
        }
    }

    /// A relation endpoint must normalize to a path inside the project and
    /// that file must exist on disk.
    fn resolvable_endpoint(&self, entity_key: &str) -> bool {
        let Some(path) = key_file_path(entity_key) else {
            return false;
        };
        if path.starts_with('/') || path.contains('\\') {
            return false;
        }
        if path
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return false;
        }
        self.config.project_root.join(path).is_file()
    }

    /// Makes sure a relation endpoint has an entity row, without clobbering
    /// a fully extracted one.
    fn ensure_endpoint_entity(&self, store: &GraphStore, entity_key: &str, now: i64) -> Result<()> {
        let Some(path) = key_file_path(entity_key) else {
            return Ok(());
        };
        let stub = if let Some(rest) = entity_key.strip_prefix("symbol:") {
            let name = rest.split_once('#').map(|(_, name)| name).unwrap_or("");
            CodeEntity::symbol(path, name, EntityKind::Symbol, None, "", now)
        } else {
            CodeEntity::module(path, "", now)
        };
        store.insert_entity_if_absent(&stub)?;
        Ok(())
    }
}

/// Opaque comparable modification marker (mtime in nanoseconds since epoch).
fn mtime_marker(path: &Path) -> String {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|mtime| mtime.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos().to_string())
        .unwrap_or_else(|| "0".to_string())
}
