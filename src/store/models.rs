//! Row types stored in the graph database.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

/// Per-file memory of the last successful index pass. The sole source of
/// truth for "has this file changed since then."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    /// Project-relative, forward-slash normalized path. Unique.
    pub path: String,
    pub content_hash: String,
    /// Opaque comparable modification marker (mtime in nanoseconds).
    pub mtime: String,
    pub last_indexed_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Module,
    Function,
    Class,
    Variable,
    /// A symbol whose precise kind is unknown (e.g. a relation endpoint seen
    /// before its own file was extracted).
    Symbol,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Module => "module",
            EntityKind::Function => "function",
            EntityKind::Class => "class",
            EntityKind::Variable => "variable",
            EntityKind::Symbol => "symbol",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "module" => EntityKind::Module,
            "function" => EntityKind::Function,
            "class" => EntityKind::Class,
            "variable" => EntityKind::Variable,
            _ => EntityKind::Symbol,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Imports,
    Calls,
    Extends,
    Implements,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Imports => "imports",
            RelationType::Calls => "calls",
            RelationType::Extends => "extends",
            RelationType::Implements => "implements",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "imports" => Some(RelationType::Imports),
            "calls" => Some(RelationType::Calls),
            "extends" => Some(RelationType::Extends),
            "implements" => Some(RelationType::Implements),
            _ => None,
        }
    }
}

/// A module or symbol row. Exactly one row per entity key; writes are always
/// upserts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEntity {
    pub entity_key: String,
    pub file_path: String,
    /// None for module entities.
    pub symbol_name: Option<String>,
    pub kind: EntityKind,
    /// Structural descriptor, e.g. parameter count plus async flag.
    pub signature: Option<String>,
    pub fingerprint: String,
    /// Hash of the owning file at last write.
    pub content_hash: String,
    pub updated_at: i64,
}

impl CodeEntity {
    pub fn module(rel_path: &str, content_hash: &str, updated_at: i64) -> Self {
        Self {
            entity_key: module_key(rel_path),
            file_path: rel_path.to_string(),
            symbol_name: None,
            kind: EntityKind::Module,
            signature: None,
            fingerprint: fingerprint(None, EntityKind::Module, None),
            content_hash: content_hash.to_string(),
            updated_at,
        }
    }

    pub fn symbol(
        rel_path: &str,
        name: &str,
        kind: EntityKind,
        signature: Option<&str>,
        content_hash: &str,
        updated_at: i64,
    ) -> Self {
        Self {
            entity_key: symbol_key(rel_path, name),
            file_path: rel_path.to_string(),
            symbol_name: Some(name.to_string()),
            kind,
            signature: signature.map(|s| s.to_string()),
            fingerprint: fingerprint(Some(name), kind, signature),
            content_hash: content_hash.to_string(),
            updated_at,
        }
    }
}

/// A typed edge between two entities. Belongs to the file owning its source
/// entity and is replaced wholesale whenever that file is re-indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRelation {
    pub id: i64,
    pub rel_type: RelationType,
    pub src_entity_key: String,
    pub dst_entity_key: String,
    pub meta: Option<serde_json::Value>,
}

/// One ranked full-text search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub entity_key: String,
    pub symbol_name: Option<String>,
    pub file_path: String,
    pub kind: EntityKind,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub entities: usize,
    pub relations: usize,
    pub files: usize,
}

pub fn module_key(rel_path: &str) -> String {
    format!("module:{rel_path}")
}

pub fn symbol_key(rel_path: &str, name: &str) -> String {
    format!("symbol:{rel_path}#{name}")
}

/// Extracts the owning file path from an entity key, or None if the key is
/// not in a recognized form.
pub fn key_file_path(entity_key: &str) -> Option<&str> {
    if let Some(rest) = entity_key.strip_prefix("module:") {
        return if rest.is_empty() { None } else { Some(rest) };
    }
    if let Some(rest) = entity_key.strip_prefix("symbol:") {
        let (path, name) = rest.split_once('#')?;
        return if path.is_empty() || name.is_empty() {
            None
        } else {
            Some(path)
        };
    }
    None
}

/// Hash of name, kind and signature. Deliberately excludes the file path and
/// content hash so a symbol relocated to another file keeps its fingerprint.
pub fn fingerprint(symbol_name: Option<&str>, kind: EntityKind, signature: Option<&str>) -> String {
    let input = format!(
        "{}\u{1f}{}\u{1f}{}",
        symbol_name.unwrap_or(""),
        kind.as_str(),
        signature.unwrap_or("")
    );
    format!("{:016x}", xxh3_64(input.as_bytes()))
}

/// Content hash of raw file bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:016x}", xxh3_64(bytes))
}

pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_keys_round_trip_to_file_paths() {
        assert_eq!(key_file_path("module:src/lib.rs"), Some("src/lib.rs"));
        assert_eq!(key_file_path("symbol:src/lib.rs#run"), Some("src/lib.rs"));
        assert_eq!(key_file_path("module:"), None);
        assert_eq!(key_file_path("symbol:src/lib.rs"), None);
        assert_eq!(key_file_path("symbol:#run"), None);
        assert_eq!(key_file_path("garbage"), None);
    }

    #[test]
    fn fingerprint_ignores_file_location() {
        let a = CodeEntity::symbol("src/a.rs", "run", EntityKind::Function, Some("params=2"), "h1", 1);
        let b = CodeEntity::symbol("src/b.rs", "run", EntityKind::Function, Some("params=2"), "h2", 2);
        assert_ne!(a.entity_key, b.entity_key);
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn fingerprint_varies_with_name_kind_signature() {
        let base = fingerprint(Some("run"), EntityKind::Function, Some("params=2"));
        assert_ne!(base, fingerprint(Some("walk"), EntityKind::Function, Some("params=2")));
        assert_ne!(base, fingerprint(Some("run"), EntityKind::Class, Some("params=2")));
        assert_ne!(base, fingerprint(Some("run"), EntityKind::Function, Some("params=3")));
    }

    #[test]
    fn module_fingerprints_are_identical_across_files() {
        let a = CodeEntity::module("src/a.rs", "h1", 1);
        let b = CodeEntity::module("src/b.rs", "h2", 2);
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn content_hash_is_stable_and_sensitive() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }

    #[test]
    fn kind_strings_round_trip() {
        for kind in [
            EntityKind::Module,
            EntityKind::Function,
            EntityKind::Class,
            EntityKind::Variable,
            EntityKind::Symbol,
        ] {
            assert_eq!(EntityKind::parse(kind.as_str()), kind);
        }
        assert_eq!(EntityKind::parse("unknown"), EntityKind::Symbol);
    }
}
