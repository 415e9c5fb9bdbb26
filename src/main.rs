//! refreg CLI: inspect and exercise reference registry snapshots.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use refreg::registry::RefRegistry;
use refreg::schema::RegistryConfig;
use refreg::translate::Row;

#[derive(Parser)]
#[command(name = "refreg", version, about = "Reference registry for LLM planners")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a registry config and summarize its tables.
    CheckConfig {
        /// Path to the TOML config.
        config: PathBuf,
    },

    /// Print the active view of a snapshot.
    Inspect {
        /// Path to the TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Path to a registry snapshot.
        #[arg(long)]
        snapshot: PathBuf,

        /// Turn to evaluate recency against.
        #[arg(long)]
        turn: u64,

        /// Recency window in turns (defaults to the config's `window_turns`).
        #[arg(long)]
        window: Option<u64>,
    },

    /// Dump a snapshot as JSON.
    Export {
        /// Path to the TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Path to a registry snapshot.
        #[arg(long)]
        snapshot: PathBuf,
    },

    /// Translate read rows from a JSON file and store the result in a snapshot.
    Ingest {
        /// Path to the TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Table the rows were read from.
        #[arg(long)]
        table: String,

        /// Path to a JSON array of row objects.
        #[arg(long)]
        rows: PathBuf,

        /// Snapshot to update (created if missing).
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Current turn.
        #[arg(long, default_value = "0")]
        turn: u64,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { config } => {
            let config = RegistryConfig::load(&config)?;
            println!("window_turns:        {}", config.window_turns);
            println!("placeholder_label:   \"{}\"", config.placeholder_label);
            println!("max_enrich_attempts: {}", config.max_enrich_attempts);
            if config.tables.is_empty() {
                println!("No tables declared.");
            } else {
                println!("Tables ({}):", config.tables.len());
                for (name, table) in &config.tables {
                    println!(
                        "  {name} [{}] id={} label={}",
                        table.entity_type, table.id_column, table.label_column
                    );
                    for (column, target) in &table.foreign_keys {
                        println!("    {column} -> {target}");
                    }
                }
            }
        }

        Commands::Inspect {
            config,
            snapshot,
            turn,
            window,
        } => {
            let config = RegistryConfig::load(&config)?;
            let window = window.unwrap_or(config.window_turns);
            let registry = load_snapshot(&snapshot, config)?;
            print!("{}", registry.format_active_view(turn, window));

            let tasks = registry.enrichment_tasks();
            if !tasks.is_empty() {
                println!("\nAwaiting labels ({}):", tasks.len());
                for task in tasks {
                    println!(
                        "  {} -> {}.{} (attempts: {})",
                        task.entity_ref, task.target_table, task.storage_id, task.attempts
                    );
                }
            }
        }

        Commands::Export { config, snapshot } => {
            let config = RegistryConfig::load(&config)?;
            let registry = load_snapshot(&snapshot, config)?;
            println!("{}", registry.export_json()?);
        }

        Commands::Ingest {
            config,
            table,
            rows,
            snapshot,
            turn,
        } => {
            let config = RegistryConfig::load(&config)?;
            let content = std::fs::read_to_string(&rows).into_diagnostic()?;
            let input: Vec<Row> = serde_json::from_str(&content).into_diagnostic()?;

            let existing = match &snapshot {
                Some(path) if path.exists() => Some(std::fs::read(path).into_diagnostic()?),
                _ => None,
            };
            let mut registry = match existing {
                Some(bytes) => RefRegistry::deserialize(&bytes, config)?,
                None => RefRegistry::new(config),
            };
            registry.set_turn(turn);

            let translated = registry.translate_read(input, &table)?;
            println!("{}", serde_json::to_string_pretty(&translated).into_diagnostic()?);

            let lookups = registry.pending_lookups();
            if !lookups.is_empty() {
                eprintln!("Pending label lookups:");
                for lookup in &lookups {
                    let ids: Vec<&str> = lookup.storage_ids.iter().map(|id| id.as_str()).collect();
                    eprintln!(
                        "  SELECT {}, {} FROM {} WHERE {} IN ({})",
                        lookup.id_column,
                        lookup.label_column,
                        lookup.table,
                        lookup.id_column,
                        ids.join(", ")
                    );
                }
            }

            if let Some(path) = snapshot {
                std::fs::write(&path, registry.serialize()?).into_diagnostic()?;
                eprintln!("Wrote {} references to {}", registry.len(), path.display());
            }
        }
    }

    Ok(())
}

/// Read and decode a snapshot file. Unlike a session restore, a bad snapshot
/// is an error here: the user asked for this specific file.
fn load_snapshot(path: &Path, config: RegistryConfig) -> Result<RefRegistry> {
    let bytes = std::fs::read(path).into_diagnostic()?;
    Ok(RefRegistry::deserialize(&bytes, config)?)
}
