use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use schemasnap_core::{
    EventCode, EventSink, ObjectType, RecordingSink, SchemaObjectRef, SnapshotConfig,
};
use schemasnap_incremental::{
    DependencyGraphFile, FlushOutcome, ObjectCache, ObjectIndex, FORMAT_VERSION,
};

/// schemasnap - Inspect and manage incremental schema snapshot state
#[derive(Parser)]
#[command(name = "schemasnap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: <root>/schemasnap.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Project root holding the cache directory
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize cached and indexed objects
    Status,

    /// Show every object a change to the given object would invalidate
    Dependents {
        /// Object type (e.g. Table, View, Procedure)
        object_type: String,

        /// Schema-qualified name, e.g. dbo.Users
        name: String,
    },

    /// Print or export the dependency listing
    Graph {
        /// Write the listing as JSON instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Invalidate every dependent of an object and persist the result
    Invalidate {
        /// Object type (e.g. Table, View, Procedure)
        object_type: String,

        /// Schema-qualified name, e.g. dbo.Users
        name: String,
    },

    /// Delete the persisted cache and index (forces a cold run)
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    dotenvy::dotenv().ok();

    let config = load_config(&cli)?;

    if cli.verbose {
        eprintln!(
            "{} {}",
            "Using cache directory:".cyan(),
            config.cache_path().display()
        );
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let sink = Arc::new(RecordingSink::new());

    match cli.command {
        Commands::Status => status_command(&config, sink).await,
        Commands::Dependents { object_type, name } => {
            dependents_command(&config, &object_type, &name, sink).await
        }
        Commands::Graph { output } => graph_command(&config, output.as_deref(), sink).await,
        Commands::Invalidate { object_type, name } => {
            invalidate_command(&config, &object_type, &name, sink, &cancel).await
        }
        Commands::Clear => clear_command(&config, sink, &cancel, cli.verbose).await,
    }
}

/// Resolve the config file, the project root and environment overrides
fn load_config(cli: &Cli) -> Result<SnapshotConfig> {
    let default_path = cli.root.join("schemasnap.toml");

    let config = if let Some(config_path) = &cli.config {
        SnapshotConfig::from_file(config_path)?
    } else if default_path.exists() {
        SnapshotConfig::from_file(&default_path)?
    } else {
        if cli.verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        SnapshotConfig::default()
    };

    let mut config = config.with_project_root(&cli.root);

    if let Ok(value) = std::env::var("SCHEMASNAP_FORCE_RELOAD") {
        let force = matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        config = config.with_force_reload(force);
    }

    Ok(config)
}

fn parse_object(object_type: &str, name: &str) -> Result<SchemaObjectRef> {
    let object_type: ObjectType = object_type.parse()?;
    Ok(SchemaObjectRef::parse(object_type, name)?)
}

async fn open_cache(config: &SnapshotConfig, sink: &Arc<RecordingSink>) -> ObjectCache {
    let sink: Arc<dyn EventSink> = sink.clone();
    ObjectCache::from_config(config, sink).await
}

async fn open_index(config: &SnapshotConfig, sink: &Arc<RecordingSink>) -> ObjectIndex {
    let sink: Arc<dyn EventSink> = sink.clone();
    ObjectIndex::from_config(config, sink).await
}

/// Warn about persisted files that had to be discarded while loading
fn report_recovered(sink: &RecordingSink) {
    let recovered = sink.count(EventCode::CacheRecovered);
    if recovered > 0 {
        eprintln!(
            "{} {} persisted file(s) were unreadable and treated as empty",
            "⚠ Warning:".yellow(),
            recovered
        );
    }
}

/// Status command - per-type counts, watermark and invalidated entries
async fn status_command(config: &SnapshotConfig, sink: Arc<RecordingSink>) -> Result<()> {
    let (cache, index) = tokio::join!(open_cache(config, &sink), open_index(config, &sink));
    report_recovered(&sink);

    let entries = cache.entries();

    let mut per_type: BTreeMap<ObjectType, (usize, usize, usize)> = BTreeMap::new();
    for entry in &entries {
        let counts = per_type.entry(entry.object_type).or_default();
        counts.0 += 1;
        if entry.is_invalidated() {
            counts.2 += 1;
        }
    }
    for object_type in ObjectType::ALL {
        let indexed = index.entry_count(object_type);
        if indexed > 0 {
            per_type.entry(object_type).or_default().1 = indexed;
        }
    }

    println!("{}", "=".repeat(60).bright_blue());
    println!("{}", "Snapshot Status".bright_blue().bold());
    println!("{}", "=".repeat(60).bright_blue());
    println!();
    println!("{} {}", "Cache directory:".bold(), config.cache_path().display());

    match index.reference_timestamp() {
        Some(reference) => println!("{} {}", "Reference timestamp:".bold(), reference.to_rfc3339()),
        None => println!("{} {}", "Reference timestamp:".bold(), "none (cold start)".yellow()),
    }

    if config.force_reload {
        println!("{}", "Force reload is enabled for the next run".yellow());
    }

    println!();
    if per_type.is_empty() {
        println!("{}", "No cached objects".yellow());
    } else {
        println!(
            "  {:<24} {:>8} {:>8} {:>12}",
            "Type".bold(),
            "Cached".bold(),
            "Indexed".bold(),
            "Invalidated".bold()
        );
        for (object_type, (cached, indexed, invalidated)) in &per_type {
            let invalidated = if *invalidated > 0 {
                invalidated.to_string().yellow()
            } else {
                invalidated.to_string().green()
            };
            println!(
                "  {:<24} {:>8} {:>8} {:>12}",
                object_type.as_str(),
                cached,
                indexed,
                invalidated
            );
        }
    }

    let edges: usize = cache.reverse_adjacency().values().map(|set| set.len()).sum();
    println!();
    println!("{} {}", "Dependency edges:".bold(), edges);

    println!();
    println!("{}", "=".repeat(60).bright_blue());

    Ok(())
}

/// Dependents command - dry run of an invalidation cascade
async fn dependents_command(
    config: &SnapshotConfig,
    object_type: &str,
    name: &str,
    sink: Arc<RecordingSink>,
) -> Result<()> {
    let object = parse_object(object_type, name)?;
    let cache = open_cache(config, &sink).await;
    report_recovered(&sink);

    let direct = cache.dependents_of(&object);
    let downstream = cache.downstream_of(&object);

    println!("{}", "=".repeat(60).bright_blue());
    println!("{} {}", "Dependents of".bright_blue().bold(), object.to_string().bold());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    if cache.get_entry(&object).is_none() {
        println!("{}", "Object is not in the cache".yellow());
        println!();
    }

    println!("{} {}", "Direct dependents:".bold(), direct.len());
    for dependent in &direct {
        println!("  • {}", dependent.to_string().cyan());
    }

    println!();
    println!("{} {}", "Would invalidate:".bold(), downstream.len());
    for (i, dependent) in downstream.iter().enumerate() {
        println!("  {}. {}", i + 1, dependent.to_string().yellow());
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());

    Ok(())
}

/// Graph command - print or export the dependency listing
async fn graph_command(
    config: &SnapshotConfig,
    output: Option<&Path>,
    sink: Arc<RecordingSink>,
) -> Result<()> {
    let cache = open_cache(config, &sink).await;
    report_recovered(&sink);

    let nodes = cache.graph_nodes();

    if let Some(output) = output {
        let listing = DependencyGraphFile {
            version: FORMAT_VERSION,
            last_updated_utc: chrono::Utc::now(),
            nodes,
        };
        let json = serde_json::to_string_pretty(&listing)?;
        std::fs::write(output, json)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        println!(
            "{} {} ({} nodes)",
            "✓ Dependency listing written to".green(),
            output.display(),
            listing.nodes.len()
        );
        return Ok(());
    }

    if nodes.is_empty() {
        println!("{}", "No dependency data cached".yellow());
        return Ok(());
    }

    for node in &nodes {
        println!("{}", node.object.to_string().bold());
        for dependency in &node.dependencies {
            println!("  {} {}", "→".cyan(), dependency);
        }
        for dependent in &node.dependents {
            println!("  {} {}", "←".yellow(), dependent);
        }
    }

    Ok(())
}

/// Invalidate command - run a cascade and persist it
async fn invalidate_command(
    config: &SnapshotConfig,
    object_type: &str,
    name: &str,
    sink: Arc<RecordingSink>,
    cancel: &CancellationToken,
) -> Result<()> {
    let object = parse_object(object_type, name)?;
    let cache = open_cache(config, &sink).await;
    report_recovered(&sink);

    let invalidated = cache.invalidate_dependents(&object);

    if invalidated.is_empty() {
        println!("{} {}", "Nothing depends on".yellow(), object);
        return Ok(());
    }

    for dependent in &invalidated {
        println!("  {} {}", "✗".red(), dependent);
    }

    match cache.flush(cancel).await? {
        FlushOutcome::Written => println!(
            "{} {} dependent(s) of {}",
            "✓ Invalidated".green(),
            invalidated.len(),
            object
        ),
        FlushOutcome::Skipped | FlushOutcome::Failed => {
            anyhow::bail!("Invalidation of {} was not persisted", object)
        }
    }

    Ok(())
}

/// Clear command - delete persisted state
async fn clear_command(
    config: &SnapshotConfig,
    sink: Arc<RecordingSink>,
    cancel: &CancellationToken,
    verbose: bool,
) -> Result<()> {
    let (cache, index) = tokio::join!(open_cache(config, &sink), open_index(config, &sink));

    if verbose {
        eprintln!(
            "{} {} cached object(s)",
            "Clearing".cyan(),
            cache.len()
        );
    }

    cache.clear_all(cancel).await?;
    index.clear_all(cancel).await?;

    println!(
        "{} {}",
        "✓ Cleared snapshot state in".green(),
        config.cache_path().display()
    );

    Ok(())
}
