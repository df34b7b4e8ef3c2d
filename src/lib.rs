//! Trust-minimized escrow custody for task payments
//!
//! This crate implements the custody state machine that lets a poster
//! escrow a payment for a task and release it to a worker without a
//! trusted intermediary holding funds:
//! - Deterministic, keyless custody address derivation per task
//! - A four-operation transition engine (create, fund, release, cancel)
//! - Per-operation signer authorization
//! - A transactional native-currency ledger
//!
//! Off-chain collaborators observe transitions through the engine's event
//! stream and the read-only status query; they never mutate custody state.

pub mod derivation;
pub mod engine;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod mirror;
pub mod models;

use error::CustodyError;

/// Result type alias for custody operations
pub type CustodyResult<T> = Result<T, CustodyError>;
