//! Synthnode - Proof-of-Discovery validation and reward ledger.
//!
//! A single-node ledger where discovery agents submit content-addressed
//! discoveries, validators score them on coherence/density/novelty, and
//! validated discoverers earn SYNTH from a fixed supply as the network
//! advances through its epochs.

mod cli;
mod ledger;
mod rpc;
mod storage;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};
use crate::ledger::PodState;
use crate::rpc::start_rpc_server;

/// Checkpoint the state this often even when the ledger is idle.
const PERIODIC_SAVE_SECS: u64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { data_dir } => {
            tracing::info!("Initializing Synthnode at {:?}", data_dir);
            std::fs::create_dir_all(&data_dir)?;

            // Create default config
            let config_path = data_dir.join("config.json");
            let default_config = serde_json::json!({
                "rpc_port": 26658,
                "owner": "treasury"
            });
            std::fs::write(&config_path, serde_json::to_string_pretty(&default_config)?)?;

            tracing::info!("Node initialized. Config written to {:?}", config_path);
        }

        Commands::Start { data_dir, rpc_bind, owner } => {
            tracing::info!("🦀 Starting Synthnode...");

            let rpc_addr: std::net::SocketAddr = rpc_bind
                .parse()
                .expect("Invalid RPC bind address (use format: 127.0.0.1:26658)");

            std::fs::create_dir_all(&data_dir)?;

            // Initialize ledger state with the user-specified data directory
            let state = PodState::with_data_dir(data_dir.clone(), &owner);

            // Start RPC server
            let (rpc_handle, _event_tx) = start_rpc_server(state.clone(), rpc_addr).await?;

            // Spawn periodic checkpointer — covers idle periods between the
            // mutation-count-driven saves
            let state_for_saver = state.clone();
            let saver_handle = tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(tokio::time::Duration::from_secs(PERIODIC_SAVE_SECS));
                loop {
                    interval.tick().await;
                    if let Err(e) = state_for_saver.save() {
                        tracing::warn!("⚠️ Periodic state save failed: {}", e);
                    }
                }
            });

            tracing::info!("✅ Node running - RPC: {}", rpc_addr);
            tracing::info!("🔭 Ready for discovery agents to connect!");

            // Wait for shutdown
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down...");
                }
                _ = saver_handle => {}
            }

            // Final checkpoint before exit
            if let Err(e) = state.save() {
                tracing::error!("Failed to save state on shutdown: {}", e);
            }
            rpc_handle.stop()?;
        }

        Commands::Hash { file } => {
            let content = std::fs::read(&file)?;
            let hash = ledger::hash_content(&content);
            println!("{}", hex::encode(hash));
        }
    }

    Ok(())
}
