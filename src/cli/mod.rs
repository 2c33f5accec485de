//! CLI module for Synthnode

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "synthnode")]
#[command(author = "Synthnode Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Proof-of-Discovery validation and reward ledger.", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new Synthnode
    Init {
        /// Directory to store node data
        #[arg(short, long, default_value = ".synthnode")]
        data_dir: PathBuf,
    },

    /// Start the Synthnode (JSON-RPC server + ledger)
    Start {
        /// Directory containing node data
        #[arg(short, long, default_value = ".synthnode")]
        data_dir: PathBuf,

        /// JSON-RPC bind address (use 0.0.0.0 for public access)
        #[arg(long, default_value = "127.0.0.1:26658")]
        rpc_bind: String,

        /// Owner/treasury address for a fresh ledger. Ignored when
        /// restoring an existing state file.
        #[arg(long, default_value = "treasury")]
        owner: String,
    },

    /// Hash a content file into the 32-byte fingerprint used for dedup
    Hash {
        /// Path to the content file
        file: PathBuf,
    },
}
