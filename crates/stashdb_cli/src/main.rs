//! StashDB CLI
//!
//! Command-line tools for StashDB databases.
//!
//! # Commands
//!
//! - `dump` - Export the whole keyspace as a JSON snapshot
//! - `restore` - Import a JSON snapshot
//! - `get` / `set` / `delete` - Single-key access
//! - `keys` - List keys

mod commands;

use clap::{Parser, Subcommand};
use stashdb_core::{config_path_from_env, Config, Context, Database, Location};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// StashDB command-line database tools.
#[derive(Parser)]
#[command(name = "stashdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory (overrides the config file)
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// YAML configuration file (default: $STASHDB_CONFIG or stashdb.yaml)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export every entry as one JSON object
    Dump {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Indent the top-level object
        #[arg(long)]
        pretty: bool,
    },

    /// Import a JSON snapshot in one transaction
    Restore {
        /// Snapshot file to read
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print the JSON value stored under a key
    Get {
        /// Key to read
        key: String,
    },

    /// Store a JSON value under a key
    Set {
        /// Key to write
        key: String,
        /// JSON document, e.g. '42' or '{"a":1}'
        value: String,
    },

    /// Remove a key
    Delete {
        /// Key to remove
        key: String,
    },

    /// List every key
    Keys,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("StashDB CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("StashDB Core v{}", stashdb_core::VERSION);
        return Ok(());
    }

    let config = resolve_config(cli.config.as_deref(), cli.path)?;
    if config.location == Location::InMemory {
        return Err("no database path: pass --path or set `path` in the config file".into());
    }

    let ctx = Context::background();
    let db = Database::new(config);
    db.start(&ctx)?;

    let result = match cli.command {
        Commands::Dump { output, pretty } => {
            commands::backup::dump(&ctx, &db, output.as_deref(), pretty)
        }
        Commands::Restore { input } => commands::backup::restore(&ctx, &db, &input),
        Commands::Get { key } => commands::keys::get(&ctx, &db, &key, &mut std::io::stdout()),
        Commands::Set { key, value } => commands::keys::set(&ctx, &db, &key, &value),
        Commands::Delete { key } => commands::keys::delete(&ctx, &db, &key).map(|existed| {
            if !existed {
                eprintln!("key {key} did not exist");
            }
        }),
        Commands::Keys => commands::keys::list(&ctx, &db, &mut std::io::stdout()),
        Commands::Version => Ok(()),
    };

    db.stop(&ctx)?;
    result
}

/// Loads the config file, if any, then applies `--path`.
fn resolve_config(
    explicit: Option<&Path>,
    path: Option<PathBuf>,
) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match explicit {
        Some(file) => Config::load(file)?,
        None => {
            let file = config_path_from_env();
            if file.exists() {
                debug!("Loading configuration from {:?}", file);
                Config::load(&file)?
            } else {
                Config::default()
            }
        }
    };

    if let Some(path) = path {
        config = config.path(path);
    }
    Ok(config)
}
