mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codectx=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let engine = cli::open_engine(&cli)?;

    match &cli.command {
        Commands::Analyze { force } => cli::analyze(&engine, *force)?,
        Commands::List { absolute } => cli::list_files(&engine, *absolute)?,
        Commands::Tree { max_depth } => cli::show_tree(&engine, *max_depth)?,
        Commands::Dependencies { file, dependents } => {
            cli::show_dependencies(&engine, file, *dependents)?
        }
        Commands::Context { files } => cli::show_context(&engine, files)?,
        Commands::Watch => cli::watch(&engine)?,
        Commands::Clear => cli::clear_cache(&engine)?,
    }

    Ok(())
}
