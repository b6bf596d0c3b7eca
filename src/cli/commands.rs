use std::collections::BTreeMap;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use codectx::config::Config;
use codectx::engine::ContextEngine;
use codectx::error::{CodectxError, Result};
use codectx::index::{ChangeEvent, DependencyKind};
use codectx::indexer::EventCallback;

#[derive(Parser)]
#[command(name = "codectx")]
#[command(about = "Incremental project analyzer that builds LLM context from source files")]
#[command(version)]
#[command(after_long_help = r#"
EXAMPLES:
    # Analyze the current directory (reuses the disk cache when valid)
    codectx analyze

    # Force a full re-analysis of another project
    codectx --project ../service analyze --force

    # Show the project tree, two levels deep
    codectx tree --max-depth 2

    # Imports of a file, and the files importing it
    codectx dependencies src/app.py
    codectx dependencies src/app.py --dependents

    # Build context for a set of files
    codectx context src/app.py src/models.py

    # Keep the analysis current while files change (Enter to stop)
    codectx watch
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project root directory
    #[arg(long, short = 'p', global = true, default_value = ".")]
    pub project: PathBuf,

    /// Explicit config file (defaults to the nearest .codectx.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Neither read nor write the disk cache
    #[arg(long, global = true)]
    pub no_cache: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze the project and print a summary
    Analyze {
        /// Ignore in-memory and on-disk results
        #[arg(long)]
        force: bool,
    },

    /// List analyzed files
    List {
        /// Print absolute paths
        #[arg(long)]
        absolute: bool,
    },

    /// Print the project tree
    Tree {
        /// Collapse directories below this depth
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// Show the imports of a file
    Dependencies {
        /// File to inspect, relative to the project root
        file: PathBuf,

        /// Show files importing FILE instead
        #[arg(long)]
        dependents: bool,
    },

    /// Print formatted context for the given files
    Context {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Watch the project and update the analysis incrementally
    Watch,

    /// Delete the disk cache
    Clear,
}

pub fn open_engine(cli: &Cli) -> Result<ContextEngine> {
    let root = cli
        .project
        .canonicalize()
        .map_err(|e| CodectxError::PathResolution {
            path: cli.project.clone(),
            reason: e.to_string(),
        })?;
    let mut config = Config::load(&root, cli.config.as_deref())?;
    if cli.no_cache {
        config.cache.enabled = false;
    }
    ContextEngine::with_config(&root, config)
}

pub fn analyze(engine: &ContextEngine, force: bool) -> Result<()> {
    let records = engine.analyze(force)?;

    let mut languages: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependencies = 0;
    for record in &records {
        *languages
            .entry(record.language.as_deref().unwrap_or("unknown"))
            .or_default() += 1;
        dependencies += record.dependencies.len();
    }

    println!("Analyzed {} files in {}", records.len(), engine.project_root().display());
    for (language, count) in &languages {
        println!("  {:<18} {}", language, count);
    }
    println!("Dependencies found: {}", dependencies);
    Ok(())
}

pub fn list_files(engine: &ContextEngine, absolute: bool) -> Result<()> {
    engine.analyze(false)?;
    for file in engine.list_files(!absolute)? {
        println!("{}", file);
    }
    Ok(())
}

pub fn show_tree(engine: &ContextEngine, max_depth: Option<usize>) -> Result<()> {
    engine.analyze(false)?;
    println!("{}", engine.get_tree(max_depth)?);
    Ok(())
}

pub fn show_dependencies(engine: &ContextEngine, file: &PathBuf, dependents: bool) -> Result<()> {
    engine.analyze(false)?;

    if dependents {
        let found = engine.get_dependents(file)?;
        if found.is_empty() {
            println!("No files import {}", file.display());
        }
        for path in found {
            let shown = path.strip_prefix(engine.project_root()).unwrap_or(&path);
            println!("{}", shown.display());
        }
        return Ok(());
    }

    let deps = engine.get_dependencies(file)?;
    if deps.is_empty() {
        println!("No dependencies found in {}", file.display());
    }
    for dep in deps {
        match dep.kind {
            DependencyKind::InternalRelative { level } => println!(
                "{:<20} {}{}",
                dep.kind.as_str(),
                ".".repeat(level as usize),
                dep.module_name
            ),
            _ => println!("{:<20} {}", dep.kind.as_str(), dep.module_name),
        }
    }
    Ok(())
}

pub fn show_context(engine: &ContextEngine, files: &[PathBuf]) -> Result<()> {
    engine.analyze(false)?;
    let context = engine.get_context(files)?;
    println!("{}", context.context);
    Ok(())
}

/// Runs a watch session until Enter is pressed or stdin closes.
pub fn watch(engine: &ContextEngine) -> Result<()> {
    engine.analyze(false)?;

    let callback: EventCallback = Arc::new(|event: &ChangeEvent| {
        println!("{}", event);
    });
    engine.start_watching(Some(callback))?;
    println!("Watching {} (press Enter to stop)", engine.project_root().display());

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;

    engine.stop_watching();
    let stats = engine.store_stats();
    println!(
        "Stopped: {} files tracked, {} updates, {} removals, {} full re-scans",
        stats.files, stats.upserts, stats.removals, stats.full_replacements
    );
    Ok(())
}

pub fn clear_cache(engine: &ContextEngine) -> Result<()> {
    engine.clear_cache()?;
    println!("Cache cleared");
    Ok(())
}
