use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use code_graph::election::{Election, Role, SignalProbe};
use code_graph::error::{IndexerError, Result};
use code_graph::indexer::extract::RegexExtractor;
use code_graph::indexer::{IndexEngine, IndexMode};
use code_graph::store::GraphStore;
use code_graph::IndexConfig;

#[derive(Parser)]
#[command(name = "code-graph")]
#[command(about = "Incremental code graph index with full-text symbol search")]
#[command(version)]
#[command(after_long_help = r#"
EXAMPLES:
    # Incrementally index the current directory
    code-graph index

    # Rebuild the whole graph from scratch
    code-graph index --full

    # Index a subdirectory only
    code-graph index src

    # Full-text search over indexed symbols
    code-graph search "parse_config"

    # Inspect one entity and its relations
    code-graph entity "symbol:src/lib.rs#run"

    # Show index statistics
    code-graph stats
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project root holding the .code-graph cache directory
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Index the project (incremental by default)
    Index {
        /// Subdirectory to scan, relative to the project root
        path: Option<String>,

        /// Discard the existing graph and rebuild everything
        #[arg(long)]
        full: bool,
    },

    /// Full-text search over entity keys and symbol names
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show one entity and the relations touching it
    Entity {
        /// Entity key, e.g. "module:src/lib.rs" or "symbol:src/lib.rs#run"
        key: String,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show index statistics
    Stats,

    /// Clear the index
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

fn config_for(root: &PathBuf, source_dir: Option<&str>) -> IndexConfig {
    let mut config = IndexConfig::new(root);
    if let Some(dir) = source_dir {
        config.source_dir = dir.to_string();
    }
    config
}

/// Runs a write command under owner election. Readers cannot mutate the
/// index, so contended acquisition is an error here rather than a fallback.
fn with_ownership<T>(config: &IndexConfig, f: impl FnOnce(&GraphStore) -> Result<T>) -> Result<T> {
    let election = Election::for_current_process(config.lock_path());
    let outcome = election.acquire(&SignalProbe)?;
    match outcome.role {
        Role::Owner => {
            let result = (|| {
                let store = GraphStore::open(config.db_path())?;
                f(&store)
            })();
            election.release()?;
            result
        }
        Role::Reader => Err(IndexerError::Lock(match outcome.owner_pid {
            Some(pid) => format!("index is owned by process {pid}; try again later"),
            None => "index ownership is contended; try again later".to_string(),
        })),
    }
}

/// Opens the store for a query command. Winning the election gives normal
/// read/write access; losing it falls back to a read-only connection against
/// the current owner's database.
fn with_store<T>(config: &IndexConfig, f: impl FnOnce(&GraphStore) -> Result<T>) -> Result<T> {
    let election = Election::for_current_process(config.lock_path());
    let outcome = election.acquire(&SignalProbe)?;
    let result = match outcome.role {
        Role::Owner => (|| {
            let store = GraphStore::open(config.db_path())?;
            f(&store)
        })(),
        Role::Reader => (|| {
            let store = GraphStore::open_readonly(config.db_path())?;
            f(&store)
        })(),
    };
    election.release()?;
    result
}

pub fn index_project(root: &PathBuf, path: Option<&str>, full: bool) -> Result<()> {
    let config = config_for(root, path);
    let mode = if full {
        IndexMode::Full
    } else {
        IndexMode::Incremental
    };
    with_ownership(&config, |store| {
        let extractor = RegexExtractor::new();
        let engine = IndexEngine::new(store, &config, &extractor);
        let outcome = engine.index_project(mode)?;
        println!(
            "Indexed {} files, removed {}",
            outcome.indexed_code_files, outcome.removed_files
        );
        Ok(())
    })
}

pub fn search(root: &PathBuf, query: &str, limit: usize, format: OutputFormat) -> Result<()> {
    let config = config_for(root, None);
    with_store(&config, |store| {
        let hits = store.search(query, limit)?;
        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            }
            OutputFormat::Text => {
                if hits.is_empty() {
                    println!("No entities found for query: {query}");
                    return Ok(());
                }
                for hit in hits {
                    let name = hit.symbol_name.as_deref().unwrap_or("-");
                    println!(
                        "{} ({}) - {} [score: {:.2}]",
                        name,
                        hit.kind.as_str(),
                        hit.entity_key,
                        hit.score
                    );
                }
            }
        }
        Ok(())
    })
}

pub fn show_entity(root: &PathBuf, key: &str, format: OutputFormat) -> Result<()> {
    let config = config_for(root, None);
    with_store(&config, |store| {
        let Some(entity) = store.entity(key)? else {
            println!("No entity found for key: {key}");
            return Ok(());
        };
        let relations = store.relations_for_entity(key)?;
        match format {
            OutputFormat::Json => {
                let payload = serde_json::json!({
                    "entity": entity,
                    "relations": relations,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            }
            OutputFormat::Text => {
                println!("{}", entity.entity_key);
                println!("  file: {}", entity.file_path);
                println!("  kind: {}", entity.kind.as_str());
                if let Some(signature) = &entity.signature {
                    println!("  signature: {signature}");
                }
                println!("  fingerprint: {}", entity.fingerprint);
                if !relations.is_empty() {
                    println!("\n  relations:");
                    for relation in relations {
                        println!(
                            "    {} {} -> {}",
                            relation.rel_type.as_str(),
                            relation.src_entity_key,
                            relation.dst_entity_key
                        );
                    }
                }
            }
        }
        Ok(())
    })
}

pub fn show_stats(root: &PathBuf) -> Result<()> {
    let config = config_for(root, None);
    with_store(&config, |store| {
        let stats = store.stats()?;
        println!("Index statistics:");
        println!("  Tracked files: {}", stats.files);
        println!("  Entities: {}", stats.entities);
        println!("  Relations: {}", stats.relations);
        Ok(())
    })
}

pub fn clear_index(root: &PathBuf) -> Result<()> {
    let config = config_for(root, None);
    with_ownership(&config, |store| {
        store.with_transaction(|store| store.clear_graph())?;
        println!("Index cleared");
        Ok(())
    })
}
