//! Integration tests for the index engine.
//!
//! These tests drive whole index passes over real temp directories and check
//! the durable properties of the graph: idempotence, full-rebuild atomicity,
//! move continuity and conservative ambiguity handling.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use code_graph::{
    Extraction, Extractor, GraphStore, IndexConfig, IndexEngine, IndexMode, IndexerError,
    RegexExtractor, Result,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn create_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write file");
}

fn module_key(rel: &str) -> String {
    format!("module:{rel}")
}

fn symbol_key(rel: &str, name: &str) -> String {
    format!("symbol:{rel}#{name}")
}

fn open_store(dir: &TempDir) -> (GraphStore, IndexConfig) {
    let config = IndexConfig::new(dir.path());
    let store = GraphStore::open(config.db_path()).expect("Failed to open store");
    (store, config)
}

fn run_pass(store: &GraphStore, config: &IndexConfig, mode: IndexMode) -> code_graph::IndexOutcome {
    let extractor = RegexExtractor::new();
    IndexEngine::new(store, config, &extractor)
        .index_project(mode)
        .expect("Index pass failed")
}

/// Extractor that fails on one specific file and delegates the rest.
struct PoisonedExtractor {
    poison: String,
    inner: RegexExtractor,
}

impl Extractor for PoisonedExtractor {
    fn extract(&self, rel_path: &str, source: &str) -> Result<Extraction> {
        if rel_path == self.poison {
            return Err(IndexerError::Extract {
                file: rel_path.to_string(),
                message: "poisoned".to_string(),
            });
        }
        self.inner.extract(rel_path, source)
    }
}

// ============================================================================
// Idempotence
// ============================================================================

mod idempotence {
    use super::*;

    #[test]
    fn repeated_incremental_passes_do_no_work() {
        let dir = TempDir::new().unwrap();
        create_file(dir.path(), "src/lib.rs", "pub mod util;\npub fn run() {}\n");
        create_file(dir.path(), "src/util.rs", "pub fn helper(a: u32) {}\n");

        let (store, config) = open_store(&dir);
        let first = run_pass(&store, &config, IndexMode::Incremental);
        assert_eq!(first.indexed_code_files, 2);

        for _ in 0..3 {
            let again = run_pass(&store, &config, IndexMode::Incremental);
            assert_eq!(again.indexed_code_files, 0);
            assert_eq!(again.removed_files, 0);
        }
    }

    #[test]
    fn graph_content_is_stable_across_passes() {
        let dir = TempDir::new().unwrap();
        create_file(dir.path(), "src/lib.rs", "pub mod util;\n");
        create_file(dir.path(), "src/util.rs", "pub fn helper() {}\n");

        let (store, config) = open_store(&dir);
        run_pass(&store, &config, IndexMode::Incremental);
        let before = store.stats().unwrap();

        run_pass(&store, &config, IndexMode::Incremental);
        let after = store.stats().unwrap();
        assert_eq!(before.entities, after.entities);
        assert_eq!(before.relations, after.relations);
        assert_eq!(before.files, after.files);
    }
}

// ============================================================================
// Full Rebuild Atomicity
// ============================================================================

mod full_rebuild {
    use super::*;

    #[test]
    fn failing_file_rolls_back_the_whole_rebuild() {
        let dir = TempDir::new().unwrap();
        create_file(dir.path(), "a.rs", "pub fn one() {}\n");
        create_file(dir.path(), "b.rs", "pub fn two() {}\n");

        let (store, config) = open_store(&dir);
        run_pass(&store, &config, IndexMode::Incremental);
        let seeded = store.stats().unwrap();
        assert!(seeded.entities > 0);

        let extractor = PoisonedExtractor {
            poison: "b.rs".to_string(),
            inner: RegexExtractor::new(),
        };
        let result =
            IndexEngine::new(&store, &config, &extractor).index_project(IndexMode::Full);
        assert!(result.is_err());

        // The failed rebuild must not be observable: the pre-existing graph
        // survives intact, including the file that poisoned the pass.
        let after = store.stats().unwrap();
        assert_eq!(after.entities, seeded.entities);
        assert_eq!(after.files, seeded.files);
        assert!(store.entity(&symbol_key("b.rs", "two")).unwrap().is_some());
    }

    #[test]
    fn successful_full_pass_replaces_stale_rows() {
        let dir = TempDir::new().unwrap();
        create_file(dir.path(), "a.rs", "pub fn one() {}\n");

        let (store, config) = open_store(&dir);
        run_pass(&store, &config, IndexMode::Incremental);

        // Simulate drift: the file loses a symbol but keeps its mtime-based
        // state row; a full pass must not trust any of it.
        fs::remove_file(dir.path().join("a.rs")).unwrap();
        create_file(dir.path(), "a.rs", "pub fn renamed() {}\n");

        run_pass(&store, &config, IndexMode::Full);
        assert!(store.entity(&symbol_key("a.rs", "one")).unwrap().is_none());
        assert!(store
            .entity(&symbol_key("a.rs", "renamed"))
            .unwrap()
            .is_some());
    }
}

// ============================================================================
// Move Continuity
// ============================================================================

mod moves {
    use super::*;

    #[test]
    fn renamed_file_keeps_incoming_relations() {
        let dir = TempDir::new().unwrap();
        create_file(dir.path(), "src/lib.rs", "pub mod util;\n");
        create_file(dir.path(), "src/util.rs", "pub fn helper(a: u32, b: u32) {}\n");

        let (store, config) = open_store(&dir);
        run_pass(&store, &config, IndexMode::Incremental);
        assert_eq!(store.relations_from_file("src/lib.rs").unwrap().len(), 1);

        // Rename util.rs; lib.rs stays untouched so its stored relation is
        // the only thread of continuity.
        fs::rename(
            dir.path().join("src/util.rs"),
            dir.path().join("src/renamed.rs"),
        )
        .unwrap();

        let outcome = run_pass(&store, &config, IndexMode::Incremental);
        assert_eq!(outcome.removed_files, 1);

        assert!(store.entity(&module_key("src/util.rs")).unwrap().is_none());
        assert!(store
            .entity(&module_key("src/renamed.rs"))
            .unwrap()
            .is_some());
        assert!(store
            .entity(&symbol_key("src/renamed.rs", "helper"))
            .unwrap()
            .is_some());

        let relations = store.relations_from_file("src/lib.rs").unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].dst_entity_key, module_key("src/renamed.rs"));
    }

    #[test]
    fn no_relation_references_the_old_location_afterwards() {
        let dir = TempDir::new().unwrap();
        create_file(dir.path(), "src/lib.rs", "pub mod util;\n");
        create_file(dir.path(), "src/util.rs", "pub fn helper() {}\n");

        let (store, config) = open_store(&dir);
        run_pass(&store, &config, IndexMode::Incremental);

        fs::rename(
            dir.path().join("src/util.rs"),
            dir.path().join("src/renamed.rs"),
        )
        .unwrap();
        run_pass(&store, &config, IndexMode::Incremental);

        assert!(store
            .relations_for_entity(&module_key("src/util.rs"))
            .unwrap()
            .is_empty());
        assert!(store
            .relations_for_entity(&symbol_key("src/util.rs", "helper"))
            .unwrap()
            .is_empty());
        assert!(store.file_state("src/util.rs").unwrap().is_none());
    }

    #[test]
    fn plain_deletion_drops_entities_and_relations() {
        let dir = TempDir::new().unwrap();
        create_file(dir.path(), "src/lib.rs", "pub mod util;\n");
        create_file(dir.path(), "src/util.rs", "pub fn helper() {}\n");

        let (store, config) = open_store(&dir);
        run_pass(&store, &config, IndexMode::Incremental);

        fs::remove_file(dir.path().join("src/util.rs")).unwrap();
        let outcome = run_pass(&store, &config, IndexMode::Incremental);
        assert_eq!(outcome.removed_files, 1);

        assert!(store.entity(&module_key("src/util.rs")).unwrap().is_none());
        assert!(store.relations_from_file("src/lib.rs").unwrap().is_empty());
    }
}

// ============================================================================
// Ambiguity Safety
// ============================================================================

mod ambiguity {
    use super::*;

    #[test]
    fn identical_twins_are_never_matched() {
        let dir = TempDir::new().unwrap();
        // Two files declaring the same symbol with identical structure; their
        // fingerprints collide on both the removed and added side.
        create_file(dir.path(), "one.py", "def dup(x):\n    pass\n");
        create_file(dir.path(), "two.py", "def dup(x):\n    pass\n");

        let (store, config) = open_store(&dir);
        run_pass(&store, &config, IndexMode::Incremental);

        fs::rename(dir.path().join("one.py"), dir.path().join("three.py")).unwrap();
        fs::rename(dir.path().join("two.py"), dir.path().join("four.py")).unwrap();
        let outcome = run_pass(&store, &config, IndexMode::Incremental);
        assert_eq!(outcome.removed_files, 2);

        // Old rows are gone, new rows exist; no retargeting was attempted.
        for old in ["one.py", "two.py"] {
            assert!(store.entity(&module_key(old)).unwrap().is_none());
            assert!(store.entity(&symbol_key(old, "dup")).unwrap().is_none());
        }
        for new in ["three.py", "four.py"] {
            assert!(store.entity(&module_key(new)).unwrap().is_some());
            assert!(store.entity(&symbol_key(new, "dup")).unwrap().is_some());
        }
    }

    #[test]
    fn unambiguous_module_rename_still_retargets_relations() {
        let dir = TempDir::new().unwrap();
        create_file(dir.path(), "lib.py", "from .special import helper\n");
        create_file(
            dir.path(),
            "special.py",
            "def unique_helper(a, b, c):\n    pass\n",
        );
        // A decoy with clashing symbol fingerprints; the module fingerprints
        // of special.py and moved.py still match one-to-one because the decoy
        // is neither removed nor added.
        create_file(
            dir.path(),
            "decoy.py",
            "def unique_helper(a, b, c):\n    pass\n",
        );

        let (store, config) = open_store(&dir);
        run_pass(&store, &config, IndexMode::Incremental);

        fs::rename(dir.path().join("special.py"), dir.path().join("moved.py")).unwrap();
        run_pass(&store, &config, IndexMode::Incremental);

        assert!(store
            .entity(&symbol_key("moved.py", "unique_helper"))
            .unwrap()
            .is_some());
        assert!(store
            .entity(&symbol_key("special.py", "unique_helper"))
            .unwrap()
            .is_none());
        let relations = store.relations_from_file("lib.py").unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].dst_entity_key, module_key("moved.py"));
    }
}

// ============================================================================
// Store Lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn version_mismatch_discards_the_cache() {
        let dir = TempDir::new().unwrap();
        create_file(dir.path(), "a.rs", "pub fn one() {}\n");

        let config = IndexConfig::new(dir.path());
        {
            let store = GraphStore::open(config.db_path()).unwrap();
            let extractor = RegexExtractor::new();
            IndexEngine::new(&store, &config, &extractor)
                .index_project(IndexMode::Incremental)
                .unwrap();
            assert!(store.stats().unwrap().entities > 0);
        }

        // Sabotage the version row, as a newer build would find it.
        {
            let conn = rusqlite::Connection::open(config.db_path()).unwrap();
            conn.execute(
                "UPDATE meta SET value = '999' WHERE key = 'schema_version'",
                [],
            )
            .unwrap();
        }

        let store = GraphStore::open(config.db_path()).unwrap();
        assert_eq!(store.stats().unwrap().entities, 0);

        // The cache is disposable: one incremental pass restores it.
        let extractor = RegexExtractor::new();
        let outcome = IndexEngine::new(&store, &config, &extractor)
            .index_project(IndexMode::Incremental)
            .unwrap();
        assert_eq!(outcome.indexed_code_files, 1);
    }

    #[test]
    fn search_finds_symbols_after_indexing() {
        let dir = TempDir::new().unwrap();
        create_file(dir.path(), "src/lib.rs", "pub fn parse_config() {}\n");

        let (store, config) = open_store(&dir);
        run_pass(&store, &config, IndexMode::Incremental);

        let hits = store.search("parse_config", 10).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(
            hits[0].entity_key,
            symbol_key("src/lib.rs", "parse_config")
        );
    }
}
