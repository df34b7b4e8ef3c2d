//! Core data models for the custody layer
//!
//! This module contains the custody account record, the escrow status
//! state machine, the amount/address newtypes, and the audit event
//! emitted after each committed transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Smallest-unit scale of the native currency (10^9 base units per coin).
pub const BASE_UNIT: u64 = 1_000_000_000;

/// Maximum byte length of a task identifier.
pub const MAX_TASK_ID_LEN: usize = 50;

/// Native-currency amount in smallest units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub fn from_base_units(units: u64) -> Self {
        Self(units)
    }

    /// Whole-coin convenience for configuration and tests. The f64 path
    /// is lossy above 2^53 base units and clamps to the u64 range
    /// (negative inputs become zero); exact amounts go through
    /// [`Amount::from_base_units`].
    pub fn from_native(native: f64) -> Self {
        Self((native * BASE_UNIT as f64) as u64)
    }

    pub fn to_base_units(&self) -> u64 {
        self.0
    }

    pub fn to_native(&self) -> f64 {
        self.0 as f64 / BASE_UNIT as f64
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}", self.to_native())
    }
}

/// Opaque 32-byte account identity.
///
/// Wallet addresses are x-only secp256k1 public keys; custody addresses
/// are derived hashes that never parse as a public key, so no party can
/// sign for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address([u8; 32]);

impl Address {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_public_key(pubkey: &secp256k1::XOnlyPublicKey) -> Self {
        Self(pubkey.serialize())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0[..8]))
    }
}

/// A transaction signer whose signature the execution environment has
/// already verified. The guard compares its address against recorded
/// parties; it never sees key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signer(Address);

impl Signer {
    pub fn new(address: Address) -> Self {
        Self(address)
    }

    pub fn from_public_key(pubkey: &secp256k1::XOnlyPublicKey) -> Self {
        Self(Address::from_public_key(pubkey))
    }

    pub fn address(&self) -> Address {
        self.0
    }
}

/// Escrow status state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowStatus {
    /// Account allocated, no value held yet
    Created,
    /// Full amount held in custody
    Funded,
    /// Amount paid out to the worker (terminal)
    Released,
    /// Escrow cancelled, any held amount refunded (terminal)
    Cancelled,
}

impl EscrowStatus {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Cancelled)
    }

    /// Check if this state allows funding
    pub fn can_fund(&self) -> bool {
        matches!(self, Self::Created)
    }

    /// Check if this state allows releasing funds to the worker
    pub fn can_release(&self) -> bool {
        matches!(self, Self::Funded)
    }

    /// Check if this state allows cancellation
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Created | Self::Funded)
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Funded => "Funded",
            Self::Released => "Released",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{}", name)
    }
}

/// The durable record of one escrow instance.
///
/// Owned exclusively by the transition engine; `poster`, `worker`,
/// `task_id` and `amount` are immutable after creation, and terminal
/// accounts are retained as an auditable record rather than deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyAccount {
    pub poster: Address,
    pub worker: Address,
    pub task_id: String,
    pub amount: Amount,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub funded_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub derivation_bump: u8,
}

impl CustodyAccount {
    pub fn new(
        poster: Address,
        worker: Address,
        task_id: String,
        amount: Amount,
        derivation_bump: u8,
    ) -> Self {
        Self {
            poster,
            worker,
            task_id,
            amount,
            status: EscrowStatus::Created,
            created_at: Utc::now(),
            funded_at: None,
            released_at: None,
            cancelled_at: None,
            derivation_bump,
        }
    }

    /// Read-only view consumed by UIs and the off-chain status mirror.
    pub fn snapshot(&self) -> EscrowSnapshot {
        EscrowSnapshot {
            poster: self.poster,
            worker: self.worker,
            task_id: self.task_id.clone(),
            amount: self.amount,
            status: self.status,
            funded_at: self.funded_at,
            released_at: self.released_at,
        }
    }
}

/// Read-only status query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowSnapshot {
    pub poster: Address,
    pub worker: Address,
    pub task_id: String,
    pub amount: Amount,
    pub status: EscrowStatus,
    pub funded_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

/// Audit event appended after each committed transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowEvent {
    pub id: Uuid,
    pub event_type: String,
    pub task_id: String,
    pub address: Address,
    pub actor: Option<Address>,
    pub status: EscrowStatus,
    pub amount: Option<Amount>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
