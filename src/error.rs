//! Error types for the custody layer
//!
//! Typed errors for every failure class the transition engine can surface:
//! input validation, state conflicts, authorization, and resource errors.
//! All failures are atomic and leave the custody account unchanged.

use crate::models::{Address, Amount, EscrowStatus};
use thiserror::Error;

/// Main error type for custody operations
#[derive(Error, Debug)]
pub enum CustodyError {
    /// Operation precondition on `status` not met (double-fund,
    /// double-release, any mutation of a terminal account)
    #[error("invalid escrow status: {operation} requires {required}, account is {actual}")]
    InvalidEscrowStatus {
        operation: &'static str,
        required: &'static str,
        actual: EscrowStatus,
    },

    /// Signer does not match the account's recorded poster
    #[error("unauthorized poster: signer {signer} does not match recorded poster {poster}")]
    UnauthorizedPoster { signer: Address, poster: Address },

    /// Destination account does not match the worker recorded at creation
    #[error("worker mismatch: supplied {supplied}, recorded {recorded}")]
    WorkerMismatch { supplied: Address, recorded: Address },

    /// Spendable balance cannot cover the requested movement
    #[error("insufficient funds: {address} has {available}, needs {required}")]
    InsufficientFunds {
        address: Address,
        available: Amount,
        required: Amount,
    },

    /// A custody account already exists at the derived address
    #[error("custody account already exists for task \"{task_id}\"")]
    AccountAlreadyExists { task_id: String },

    /// No custody account at the given address
    #[error("no custody account at address {0}")]
    AccountNotFound(Address),

    /// Empty or oversized task identifier
    #[error("invalid task id: {0}")]
    InvalidTaskId(String),

    /// Zero, over-limit, or overflowing amount
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// No valid bump exists in the derivation search space. Fatal
    /// configuration error; never retried.
    #[error("address derivation failed for task \"{task_id}\": search space exhausted")]
    DerivationExhausted { task_id: String },

    /// Ledger storage backend errors
    #[error(transparent)]
    Ledger(#[from] anyhow::Error),
}

impl CustodyError {
    /// Create an invalid-task-id error
    pub fn invalid_task_id<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTaskId(msg.into())
    }

    /// Create an invalid-amount error
    pub fn invalid_amount<S: Into<String>>(msg: S) -> Self {
        Self::InvalidAmount(msg.into())
    }
}
