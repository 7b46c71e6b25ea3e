pub mod config;
pub mod election;
pub mod error;
pub mod indexer;
pub mod store;

pub use config::IndexConfig;
pub use election::{Election, ElectionOutcome, Liveness, ProcessProbe, Role, SignalProbe};
pub use error::{IndexerError, Result};
pub use indexer::extract::{DeclaredSymbol, Extraction, Extractor, RawRelation, RegexExtractor};
pub use indexer::walker::FileWalker;
pub use indexer::{IndexEngine, IndexMode, IndexOutcome};
pub use store::models::{
    CodeEntity, CodeRelation, EntityKind, FileState, RelationType, SearchHit, StoreStats,
};
pub use store::transaction::TransactionManager;
pub use store::{GraphStore, SCHEMA_VERSION};
