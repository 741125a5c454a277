//! relaysync
//!
//! Runs one replicating service against a shared folder, or performs a
//! single replication step (poll, snapshot export/import) and exits.

mod node;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relaysync_config::SyncConfig;
use relaysync_core::{
    start_sync_coordinator, OperationContext, SyncCoordinatorConfig, SyncStatus,
};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::node::SyncNode;

#[derive(Parser, Debug)]
#[command(name = "relaysync", version, about = "Shared-folder replication node")]
struct Cli {
    /// Config file (defaults to the per-user relaysync.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Shared sync folder
    #[arg(long, global = true)]
    folder: Option<PathBuf>,

    /// Application name used in snapshot file names
    #[arg(long, global = true)]
    app_name: Option<String>,

    /// Node id, or AUTO to use the shared identity file
    #[arg(long, global = true)]
    node_id: Option<String>,

    /// Directory holding the local tables
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bootstrap, then keep importing peer changes until interrupted
    Run,
    /// Bootstrap if needed and apply pending peer changes once
    Poll,
    /// Full-state snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotCommand,
    },
    /// Print this node's id
    NodeId,
    /// Show replication status
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Save a record locally (and publish it to peers)
    Put {
        /// Entity type, e.g. Proveedor
        entity_type: String,
        /// Record as JSON
        record: String,
    },
    /// Print every local record of a type in its wire form
    List { entity_type: String },
}

#[derive(Subcommand, Debug)]
enum SnapshotCommand {
    /// Write this node's full snapshot into the sync folder
    Export,
    /// Import a snapshot now, ignoring the bootstrap state
    Import {
        /// Snapshot file; defaults to the preferred peer snapshot
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

impl Cli {
    fn load_config(&self) -> Result<SyncConfig> {
        let mut config = SyncConfig::load(self.config.as_deref()).context("loading configuration")?;
        if let Some(folder) = &self.folder {
            config.folder_path = folder.clone();
        }
        if let Some(app_name) = &self.app_name {
            config.app_name = app_name.clone();
        }
        if let Some(node_id) = &self.node_id {
            config.node_id = node_id.clone();
        }
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_tracing(&config.log_filter, cli.verbose);

    let node = SyncNode::open(config)?;
    match cli.command {
        Command::Run => run(node).await,
        Command::Poll => {
            node.bootstrap.import_if_needed();
            print_json(&node.importer.poll_once())
        }
        Command::Snapshot { action } => match action {
            SnapshotCommand::Export => {
                let path = node.bootstrap.export_full_snapshot()?;
                println!("{}", path.display());
                Ok(())
            }
            SnapshotCommand::Import { file } => {
                let report = match file {
                    Some(path) => node.bootstrap.import_from(&path)?,
                    None => node.bootstrap.import_latest()?,
                };
                node.gate.mark_completed();
                print_json(&report)
            }
        },
        Command::NodeId => {
            println!("{}", node.identity.id());
            Ok(())
        }
        Command::Status { json } => {
            println!("{}", render_status(&node.status(), json)?);
            Ok(())
        }
        Command::Put {
            entity_type,
            record,
        } => {
            let adapter = node.adapter(&entity_type)?;
            let record: Value = serde_json::from_str(&record).context("parsing record JSON")?;
            let saved = adapter.save(&OperationContext::new(), record)?;
            print_json(&saved)
        }
        Command::List { entity_type } => {
            let records = node.adapter(&entity_type)?.find_all_wire()?;
            print_json(&records)
        }
    }
}

async fn run(node: SyncNode) -> Result<()> {
    info!("relaysync v{} starting", env!("CARGO_PKG_VERSION"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = start_sync_coordinator(
        node.importer.clone(),
        node.bootstrap.clone(),
        SyncCoordinatorConfig::from(&node.config),
        shutdown_rx,
    )
    .await;

    shutdown_signal().await;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    if let Err(e) = handle.await {
        error!("Sync coordinator ended abnormally: {}", e);
    }
    info!("Stopped");
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_status(status: &SyncStatus, json: bool) -> Result<String> {
    if json {
        Ok(serde_json::to_string_pretty(status)?)
    } else {
        Ok(status.to_string())
    }
}

fn init_tracing(default_filter: &str, verbosity: u8) {
    // RUST_LOG wins over the configured filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match verbosity {
            0 => default_filter,
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
            }
            _ => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    }
}
