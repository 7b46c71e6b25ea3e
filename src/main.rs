mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "code_graph=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Index { path, full } => {
            cli::index_project(&cli.root, path.as_deref(), full)?;
        }
        Commands::Search {
            query,
            limit,
            format,
        } => {
            cli::search(&cli.root, &query, limit, format)?;
        }
        Commands::Entity { key, format } => {
            cli::show_entity(&cli.root, &key, format)?;
        }
        Commands::Stats => {
            cli::show_stats(&cli.root)?;
        }
        Commands::Clear => {
            cli::clear_index(&cli.root)?;
        }
    }

    Ok(())
}
