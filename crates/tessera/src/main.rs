// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tessera - long-term memory engine for conversational agents.
//!
//! This binary is the operator entry point: it validates configuration and
//! runs offline maintenance against the configured database.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod ops;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tessera_config::TesseraConfig;
use tessera_core::{PluginAdapter, StorageAdapter, TesseraError};
use tessera_memory::MemoryType;
use tessera_storage::SqliteStorage;

use crate::ops::{Ops, to_json};

/// Tessera - long-term memory engine for conversational agents.
#[derive(Parser, Debug)]
#[command(name = "tessera", version, about, long_about = None)]
struct Cli {
    /// Explicit config file instead of the XDG lookup.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and print the effective values.
    CheckConfig,
    /// Report database health and row counts.
    Status,
    /// Run trend expiry, promotion and behavior decay for one owner.
    Maintain {
        #[arg(long)]
        owner: String,
    },
    /// Restore an owner's memories to their state at an instant (RFC 3339).
    Rollback {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        to: DateTime<Utc>,
    },
    /// Delete every memory, evidence link and history row of an owner.
    Erase {
        #[arg(long)]
        owner: String,
    },
    /// Print the change history of one memory.
    History {
        #[arg(long)]
        memory: String,
    },
    /// List an owner's current memories.
    List {
        #[arg(long)]
        owner: String,
        /// fact, episodic, document or trait.
        #[arg(long = "type")]
        memory_type: Option<MemoryType>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => tessera_config::load_and_validate_path(path),
        None => tessera_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            tessera_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    init_tracing(&config.service.log_level);

    let Some(command) = cli.command else {
        println!("tessera: use --help for available commands");
        return;
    };

    if let Err(e) = run(command, &config).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: &TesseraConfig) -> Result<(), TesseraError> {
    let output = match command {
        Commands::CheckConfig => to_json(config)?,
        command => {
            let storage = SqliteStorage::new(config.storage.clone());
            storage.initialize().await?;
            let output = dispatch(&storage, command, config).await;
            storage.shutdown().await?;
            output?
        }
    };
    let text = serde_json::to_string_pretty(&output)
        .map_err(|e| TesseraError::Internal(format!("json encoding: {e}")))?;
    println!("{text}");
    Ok(())
}

async fn dispatch(
    storage: &SqliteStorage,
    command: Commands,
    config: &TesseraConfig,
) -> Result<serde_json::Value, TesseraError> {
    let ops = Ops::new(storage.database()?.clone());
    match command {
        Commands::CheckConfig => to_json(config),
        Commands::Status => Ok(serde_json::json!({
            "backend": format!("{} {}", storage.name(), storage.version()),
            "health": storage.health_check().await?,
            "stats": storage.stats().await?,
        })),
        Commands::Maintain { owner } => ops.maintain(&owner).await,
        Commands::Rollback { owner, to } => ops.rollback(&owner, to).await,
        Commands::Erase { owner } => ops.erase(&owner).await,
        Commands::History { memory } => ops.history(&memory).await,
        Commands::List { owner, memory_type } => ops.list(&owner, memory_type).await,
    }
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tessera={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}
