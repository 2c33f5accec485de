//! Error taxonomy for the PoD ledger
//!
//! Every error is a full rejection of the triggering call: the ledger is
//! left exactly as it was before the call. There is no internal retry;
//! resubmitting after a rejection is the caller's responsibility.

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The content hash was already submitted (ever). Repeat submissions
    /// are rejected, never merged.
    #[error("Content already exists (redundant)")]
    DuplicateContent,

    /// No discovery (or pending validation request) with this id.
    #[error("discovery {0} not found")]
    NotFound(u64),

    /// The discovery already reached a terminal state (validated or
    /// redundant) and is immutable.
    #[error("discovery {0} already processed")]
    AlreadyProcessed(u64),

    /// Caller does not hold the capability this operation requires.
    #[error("caller {0} is not authorized for this operation")]
    Unauthorized(String),

    /// A validation request for this discovery is already queued.
    #[error("validation request already pending for discovery {0}")]
    PendingRequestExists(u64),

    /// A value (pagination offset, score) exceeds its allowed maximum.
    #[error("value {value} out of range (max {max})")]
    OutOfRange { value: u64, max: u64 },

    /// Minting this amount would push total minted past the fixed supply
    /// cap. The mint is rejected whole, never clamped.
    #[error("mint of {requested} SYNTH would exceed supply cap ({minted} of {cap} minted)")]
    SupplyExceeded {
        requested: u128,
        minted: u128,
        cap: u128,
    },

    /// Collaborator-boundary error for the narrow transfer interface.
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u128, need: u128 },

    /// A poisoned lock was recovered; mutations are refused until restart.
    #[error("node state is tainted (poisoned lock detected) — restart required")]
    Tainted,
}
