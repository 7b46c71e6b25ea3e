//! SQLite-backed graph store.
//!
//! The database is a disposable cache, never a system of record: any doubt
//! about schema compatibility is resolved by deleting the file and rebuilding
//! from source on the next index pass. WAL mode plus a busy timeout lets
//! reader processes queue behind brief writer transactions instead of
//! failing.

pub mod models;
pub mod transaction;

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use crate::error::{IndexerError, Result};
use models::{
    CodeEntity, CodeRelation, EntityKind, FileState, RelationType, SearchHit, StoreStats,
};
use transaction::TransactionManager;

/// Compiled-in schema version. A stored value that differs triggers a
/// destructive rebuild on open.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS file_states (
    path TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    mtime TEXT NOT NULL,
    last_indexed_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS code_entities (
    entity_key TEXT PRIMARY KEY,
    file_path TEXT NOT NULL,
    symbol_name TEXT,
    kind TEXT NOT NULL,
    signature TEXT,
    fingerprint TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entities_file ON code_entities(file_path);
CREATE INDEX IF NOT EXISTS idx_entities_fingerprint ON code_entities(fingerprint);

CREATE TABLE IF NOT EXISTS code_relations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rel_type TEXT NOT NULL,
    src_entity_key TEXT NOT NULL,
    dst_entity_key TEXT NOT NULL,
    meta TEXT
);

CREATE INDEX IF NOT EXISTS idx_relations_src ON code_relations(src_entity_key);
CREATE INDEX IF NOT EXISTS idx_relations_dst ON code_relations(dst_entity_key);

CREATE VIRTUAL TABLE IF NOT EXISTS entity_fts USING fts5(
    entity_key,
    symbol_name,
    content='code_entities',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS entities_ai AFTER INSERT ON code_entities BEGIN
    INSERT INTO entity_fts(rowid, entity_key, symbol_name)
    VALUES (new.rowid, new.entity_key, new.symbol_name);
END;

CREATE TRIGGER IF NOT EXISTS entities_ad AFTER DELETE ON code_entities BEGIN
    INSERT INTO entity_fts(entity_fts, rowid, entity_key, symbol_name)
    VALUES ('delete', old.rowid, old.entity_key, old.symbol_name);
END;

CREATE TRIGGER IF NOT EXISTS entities_au AFTER UPDATE ON code_entities BEGIN
    INSERT INTO entity_fts(entity_fts, rowid, entity_key, symbol_name)
    VALUES ('delete', old.rowid, old.entity_key, old.symbol_name);
    INSERT INTO entity_fts(rowid, entity_key, symbol_name)
    VALUES (new.rowid, new.entity_key, new.symbol_name);
END;
"#;

pub struct GraphStore {
    conn: Connection,
    txn: TransactionManager,
}

impl GraphStore {
    /// Opens (or creates) the store at `db_path`, enforcing the schema
    /// version contract. An incompatible or foreign file is deleted and
    /// rebuilt; schema creation gets exactly one delete-and-retry cycle
    /// before the failure propagates.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut conn = Self::open_raw(&db_path)?;

        let incompatible = match Self::stored_version(&conn)? {
            Some(version) if version != SCHEMA_VERSION => {
                tracing::warn!(
                    stored = version,
                    current = SCHEMA_VERSION,
                    "schema version mismatch; rebuilding index database"
                );
                true
            }
            Some(_) => false,
            // No version row but pre-existing user tables: a foreign or
            // stale file we cannot trust.
            None => Self::user_table_count(&conn)? > 0,
        };

        if incompatible {
            drop(conn);
            Self::delete_store_files(&db_path)?;
            conn = Self::open_raw(&db_path)?;
        }

        if let Err(err) = conn.execute_batch(SCHEMA) {
            tracing::warn!(error = %err, "schema creation failed; rebuilding index database");
            drop(conn);
            Self::delete_store_files(&db_path)?;
            conn = Self::open_raw(&db_path)?;
            conn.execute_batch(SCHEMA)?;
        }

        conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
            [SCHEMA_VERSION.to_string()],
        )?;

        Ok(Self {
            conn,
            txn: TransactionManager::new(),
        })
    }

    /// Read-only handle for reader processes. Never repairs; fails if no
    /// index has been built yet.
    pub fn open_readonly(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if !db_path.exists() {
            return Err(IndexerError::Config(format!(
                "no index database at {}; run `code-graph index` first",
                db_path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        Ok(Self {
            conn,
            txn: TransactionManager::new(),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
            [SCHEMA_VERSION.to_string()],
        )?;
        Ok(Self {
            conn,
            txn: TransactionManager::new(),
        })
    }

    fn open_raw(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;
        Ok(conn)
    }

    fn stored_version(conn: &Connection) -> Result<Option<u32>> {
        let has_meta: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
            [],
            |row| row.get(0),
        )?;
        if has_meta == 0 {
            return Ok(None);
        }
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        // An unparseable version row is treated like an absent one; the
        // user-table check in open() will then force a rebuild.
        Ok(value.and_then(|v| v.parse().ok()))
    }

    fn user_table_count(conn: &Connection) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Deletes the database file and its WAL sidecars.
    fn delete_store_files(db_path: &PathBuf) -> Result<()> {
        let sidecar = |suffix: &str| {
            let mut name = db_path.as_os_str().to_os_string();
            name.push(suffix);
            PathBuf::from(name)
        };
        for path in [db_path.clone(), sidecar("-wal"), sidecar("-shm")] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Runs `f` atomically; nestable (see [`TransactionManager`]).
    pub fn with_transaction<T>(&self, f: impl FnOnce(&GraphStore) -> Result<T>) -> Result<T> {
        self.txn.with(&self.conn, || f(self))
    }

    // -- file states -------------------------------------------------------

    pub fn upsert_file_state(&self, state: &FileState) -> Result<()> {
        self.conn.execute(
            "INSERT INTO file_states (path, content_hash, mtime, last_indexed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                 content_hash = excluded.content_hash,
                 mtime = excluded.mtime,
                 last_indexed_at = excluded.last_indexed_at",
            params![state.path, state.content_hash, state.mtime, state.last_indexed_at],
        )?;
        Ok(())
    }

    pub fn file_state(&self, path: &str) -> Result<Option<FileState>> {
        let state = self
            .conn
            .query_row(
                "SELECT path, content_hash, mtime, last_indexed_at FROM file_states WHERE path = ?1",
                [path],
                |row| {
                    Ok(FileState {
                        path: row.get(0)?,
                        content_hash: row.get(1)?,
                        mtime: row.get(2)?,
                        last_indexed_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    pub fn all_file_states(&self) -> Result<Vec<FileState>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, content_hash, mtime, last_indexed_at FROM file_states")?;
        let states = stmt
            .query_map([], |row| {
                Ok(FileState {
                    path: row.get(0)?,
                    content_hash: row.get(1)?,
                    mtime: row.get(2)?,
                    last_indexed_at: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }

    pub fn delete_file_state(&self, path: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM file_states WHERE path = ?1", [path])?;
        Ok(())
    }

    // -- entities ----------------------------------------------------------

    pub fn upsert_entity(&self, entity: &CodeEntity) -> Result<()> {
        self.conn.execute(
            "INSERT INTO code_entities
                 (entity_key, file_path, symbol_name, kind, signature, fingerprint, content_hash, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(entity_key) DO UPDATE SET
                 file_path = excluded.file_path,
                 symbol_name = excluded.symbol_name,
                 kind = excluded.kind,
                 signature = excluded.signature,
                 fingerprint = excluded.fingerprint,
                 content_hash = excluded.content_hash,
                 updated_at = excluded.updated_at",
            params![
                entity.entity_key,
                entity.file_path,
                entity.symbol_name,
                entity.kind.as_str(),
                entity.signature,
                entity.fingerprint,
                entity.content_hash,
                entity.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Inserts an entity only if its key is not present. Used for relation
    /// endpoints so a stub never overwrites a fully extracted row.
    pub fn insert_entity_if_absent(&self, entity: &CodeEntity) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO code_entities
                 (entity_key, file_path, symbol_name, kind, signature, fingerprint, content_hash, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entity.entity_key,
                entity.file_path,
                entity.symbol_name,
                entity.kind.as_str(),
                entity.signature,
                entity.fingerprint,
                entity.content_hash,
                entity.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn entity(&self, entity_key: &str) -> Result<Option<CodeEntity>> {
        let entity = self
            .conn
            .query_row(
                "SELECT entity_key, file_path, symbol_name, kind, signature, fingerprint, content_hash, updated_at
                 FROM code_entities WHERE entity_key = ?1",
                [entity_key],
                entity_from_row,
            )
            .optional()?;
        Ok(entity)
    }

    pub fn entities_for_file(&self, path: &str) -> Result<Vec<CodeEntity>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_key, file_path, symbol_name, kind, signature, fingerprint, content_hash, updated_at
             FROM code_entities WHERE file_path = ?1",
        )?;
        let entities = stmt
            .query_map([path], entity_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entities)
    }

    pub fn delete_entity(&self, entity_key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM code_entities WHERE entity_key = ?1", [entity_key])?;
        Ok(())
    }

    // -- relations ---------------------------------------------------------

    pub fn insert_relation(
        &self,
        rel_type: RelationType,
        src_entity_key: &str,
        dst_entity_key: &str,
        meta: Option<&serde_json::Value>,
    ) -> Result<()> {
        let meta_text = meta.map(|m| m.to_string());
        self.conn.execute(
            "INSERT INTO code_relations (rel_type, src_entity_key, dst_entity_key, meta)
             VALUES (?1, ?2, ?3, ?4)",
            params![rel_type.as_str(), src_entity_key, dst_entity_key, meta_text],
        )?;
        Ok(())
    }

    /// Deletes all relations whose source entity is owned by `path`. Half of
    /// the wholesale per-file replacement.
    pub fn delete_relations_from_file(&self, path: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM code_relations WHERE src_entity_key IN
                 (SELECT entity_key FROM code_entities WHERE file_path = ?1)",
            [path],
        )?;
        Ok(())
    }

    /// Deletes every relation touching any entity owned by `path`, in either
    /// direction. Keeps the relation table free of dangling endpoints when a
    /// file's entities are removed.
    pub fn delete_relations_touching_file(&self, path: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM code_relations WHERE
                 src_entity_key IN (SELECT entity_key FROM code_entities WHERE file_path = ?1)
                 OR dst_entity_key IN (SELECT entity_key FROM code_entities WHERE file_path = ?1)",
            [path],
        )?;
        Ok(())
    }

    /// Rewrites every relation referencing `old_key` (as source or
    /// destination) to `new_key`.
    pub fn retarget_relations(&self, old_key: &str, new_key: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE code_relations SET src_entity_key = ?2 WHERE src_entity_key = ?1",
            params![old_key, new_key],
        )?;
        self.conn.execute(
            "UPDATE code_relations SET dst_entity_key = ?2 WHERE dst_entity_key = ?1",
            params![old_key, new_key],
        )?;
        Ok(())
    }

    pub fn relations_for_entity(&self, entity_key: &str) -> Result<Vec<CodeRelation>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, rel_type, src_entity_key, dst_entity_key, meta
             FROM code_relations WHERE src_entity_key = ?1 OR dst_entity_key = ?1
             ORDER BY id",
        )?;
        let relations = stmt
            .query_map([entity_key], relation_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(relations)
    }

    pub fn relations_from_file(&self, path: &str) -> Result<Vec<CodeRelation>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, rel_type, src_entity_key, dst_entity_key, meta
             FROM code_relations WHERE src_entity_key IN
                 (SELECT entity_key FROM code_entities WHERE file_path = ?1)
             ORDER BY id",
        )?;
        let relations = stmt
            .query_map([path], relation_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(relations)
    }

    // -- bulk maintenance --------------------------------------------------

    /// Deletes a removed (non-moved) file's entities, relations and
    /// file-state row.
    pub fn remove_file_rows(&self, path: &str) -> Result<()> {
        self.delete_relations_touching_file(path)?;
        self.conn
            .execute("DELETE FROM code_entities WHERE file_path = ?1", [path])?;
        self.delete_file_state(path)?;
        Ok(())
    }

    /// Wipes entities, relations and file states. The schema version row is
    /// kept. Used by the full rebuild inside its wrapping transaction.
    pub fn clear_graph(&self) -> Result<()> {
        self.conn.execute("DELETE FROM code_relations", [])?;
        self.conn.execute("DELETE FROM code_entities", [])?;
        self.conn.execute("DELETE FROM file_states", [])?;
        Ok(())
    }

    // -- queries -----------------------------------------------------------

    /// Keyword search over entity keys and symbol names, ranked by bm25.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let Some(match_expr) = fts_match_expr(query) else {
            return Ok(Vec::new());
        };
        let mut stmt = self.conn.prepare(
            "SELECT e.entity_key, e.symbol_name, e.file_path, e.kind, bm25(entity_fts) AS rank
             FROM entity_fts
             JOIN code_entities e ON e.rowid = entity_fts.rowid
             WHERE entity_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;
        let hits = stmt
            .query_map(params![match_expr, limit as i64], |row| {
                let kind: String = row.get(3)?;
                let rank: f64 = row.get(4)?;
                Ok(SearchHit {
                    entity_key: row.get(0)?,
                    symbol_name: row.get(1)?,
                    file_path: row.get(2)?,
                    kind: EntityKind::parse(&kind),
                    // bm25 ranks better matches lower (negative); flip so
                    // callers see higher-is-better.
                    score: -rank,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(hits)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let entities: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM code_entities", [], |row| row.get(0))?;
        let relations: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM code_relations", [], |row| row.get(0))?;
        let files: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM file_states", [], |row| row.get(0))?;
        Ok(StoreStats {
            entities: entities as usize,
            relations: relations as usize,
            files: files as usize,
        })
    }
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<CodeEntity> {
    let kind: String = row.get(3)?;
    Ok(CodeEntity {
        entity_key: row.get(0)?,
        file_path: row.get(1)?,
        symbol_name: row.get(2)?,
        kind: EntityKind::parse(&kind),
        signature: row.get(4)?,
        fingerprint: row.get(5)?,
        content_hash: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn relation_from_row(row: &Row<'_>) -> rusqlite::Result<CodeRelation> {
    let rel_type: String = row.get(1)?;
    let meta: Option<String> = row.get(4)?;
    Ok(CodeRelation {
        id: row.get(0)?,
        rel_type: RelationType::parse(&rel_type).unwrap_or(RelationType::Imports),
        src_entity_key: row.get(2)?,
        dst_entity_key: row.get(3)?,
        meta: meta.and_then(|m| serde_json::from_str(&m).ok()),
    })
}

/// Builds an FTS5 MATCH expression from a raw keyword query: each token is
/// quoted (so punctuation in keys cannot break the parser) and prefix-matched.
fn fts_match_expr(raw: &str) -> Option<String> {
    let tokens: Vec<String> = raw
        .split_whitespace()
        .map(|t| format!("\"{}\"*", t.replace('"', "\"\"")))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}
