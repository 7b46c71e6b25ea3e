mod commands;

pub use commands::{clear_index, index_project, search, show_entity, show_stats, Cli, Commands};
