//! Proof-of-Discovery (PoD) ledger for Synthnode
//!
//! This module defines the core state machine that:
//! - Accepts discovery submissions and deduplicates them by content hash
//! - Validates discoveries against multi-dimensional score thresholds
//! - Rewards validated discoverers with SYNTH tokens
//! - Advances the epoch machine as coherence density accumulates

mod error;
mod gateway;
mod registry;
mod score;
mod token;

pub use error::LedgerError;
pub use gateway::{ValidationRequest, ValidatorGateway};
pub use registry::{
    hash_content, is_state_tainted, Discovery, LedgerEvent, LedgerSummary, PodState, Role,
    SubmitOutcome, ValidateOutcome, REGISTRY_ADDRESS,
};
pub use token::{EpochState, TokenLedger};
