//! Native-currency ledger
//!
//! Balance store the transition engine moves value through. Backends
//! implement [`LedgerStore`]; the in-memory backend is transactional via
//! a snapshot taken at `begin_transaction`. The [`Ledger`] front enforces
//! checked arithmetic and commits a transfer in full or not at all.

use crate::{
    error::CustodyError,
    models::{Address, Amount},
    CustodyResult,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Why a transfer happened, kept in the history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferReason {
    /// External credit (genesis, faucet, deposit from outside the engine)
    Credit,
    /// Poster funding an escrow
    EscrowDeposit,
    /// Escrowed amount paid out to the worker
    EscrowRelease,
    /// Escrowed amount refunded to the poster on cancel
    EscrowRefund,
}

/// One committed transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    pub reason: TransferReason,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: String,
}

type BalanceMap = HashMap<Address, Amount>;

/// Storage backend for balances and transfer history.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_balance(&self, address: Address) -> Result<Amount>;
    async fn set_balance(&self, address: Address, balance: Amount) -> Result<()>;

    async fn begin_transaction(&self) -> Result<()>;
    async fn commit_transaction(&self) -> Result<()>;
    async fn rollback_transaction(&self) -> Result<()>;

    async fn record_transfer(&self, record: TransferRecord) -> Result<()>;
    async fn transfer_history(&self, address: Address) -> Result<Vec<TransferRecord>>;
}

/// In-memory backend with snapshot-based rollback.
pub struct MemoryLedger {
    balances: Arc<RwLock<BalanceMap>>,
    snapshot: Arc<RwLock<Option<BalanceMap>>>,
    history: Arc<RwLock<Vec<TransferRecord>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            balances: Arc::new(RwLock::new(HashMap::new())),
            snapshot: Arc::new(RwLock::new(None)),
            history: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn get_balance(&self, address: Address) -> Result<Amount> {
        let balances = self.balances.read().await;
        Ok(balances.get(&address).copied().unwrap_or(Amount::ZERO))
    }

    async fn set_balance(&self, address: Address, balance: Amount) -> Result<()> {
        let mut balances = self.balances.write().await;
        if balance.is_zero() {
            balances.remove(&address);
        } else {
            balances.insert(address, balance);
        }
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<()> {
        let balances = self.balances.read().await;
        let mut snapshot = self.snapshot.write().await;
        *snapshot = Some(balances.clone());
        debug!(accounts = balances.len(), "ledger transaction began");
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        let mut snapshot = self.snapshot.write().await;
        *snapshot = None;
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        let mut snapshot = self.snapshot.write().await;
        if let Some(backup) = snapshot.take() {
            let mut balances = self.balances.write().await;
            *balances = backup;
            debug!("ledger transaction rolled back");
        }
        Ok(())
    }

    async fn record_transfer(&self, record: TransferRecord) -> Result<()> {
        let mut history = self.history.write().await;
        history.push(record);
        Ok(())
    }

    async fn transfer_history(&self, address: Address) -> Result<Vec<TransferRecord>> {
        let history = self.history.read().await;
        Ok(history
            .iter()
            .filter(|tx| tx.from == address || tx.to == address)
            .cloned()
            .collect())
    }
}

/// Checked balance operations over a pluggable store.
///
/// The store keeps a single snapshot per transaction, so every balance
/// mutation serializes on `tx_lock`: a rollback must never restore a
/// snapshot that predates another caller's committed writes.
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    tx_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            tx_lock: Mutex::new(()),
        }
    }

    pub async fn balance(&self, address: Address) -> CustodyResult<Amount> {
        Ok(self.store.get_balance(address).await?)
    }

    pub async fn transfer_history(&self, address: Address) -> CustodyResult<Vec<TransferRecord>> {
        Ok(self.store.transfer_history(address).await?)
    }

    /// Credit an address from outside the engine (genesis, deposits).
    pub async fn credit(&self, address: Address, amount: Amount) -> CustodyResult<()> {
        if amount.is_zero() {
            return Ok(());
        }

        let _tx = self.tx_lock.lock().await;
        let current = self.balance(address).await?;
        let new_balance = current.checked_add(amount).ok_or_else(|| {
            CustodyError::invalid_amount(format!("balance overflow for {}", address))
        })?;
        self.store.set_balance(address, new_balance).await?;

        info!(
            address = %address,
            amount = %amount,
            balance_after = %new_balance,
            "balance credited"
        );
        Ok(())
    }

    /// Move `amount` from one address to another. Commits in full or
    /// rolls back; the insufficient-funds check happens inside the
    /// transaction so concurrent ledger users cannot interleave.
    pub async fn transfer(
        &self,
        from: Address,
        to: Address,
        amount: Amount,
        reason: TransferReason,
    ) -> CustodyResult<()> {
        if amount.is_zero() {
            return Ok(());
        }
        if from == to {
            return Err(CustodyError::invalid_amount(
                "cannot transfer to the same address",
            ));
        }

        let _tx = self.tx_lock.lock().await;
        self.store.begin_transaction().await?;
        match self.transfer_internal(from, to, amount, reason).await {
            Ok(tx_hash) => {
                self.store.commit_transaction().await?;
                info!(
                    from = %from,
                    to = %to,
                    amount = %amount,
                    reason = ?reason,
                    tx_hash = %tx_hash,
                    "transfer committed"
                );
                Ok(())
            }
            Err(e) => {
                self.store.rollback_transaction().await?;
                Err(e)
            }
        }
    }

    async fn transfer_internal(
        &self,
        from: Address,
        to: Address,
        amount: Amount,
        reason: TransferReason,
    ) -> CustodyResult<String> {
        let from_balance = self.store.get_balance(from).await?;
        if from_balance < amount {
            return Err(CustodyError::InsufficientFunds {
                address: from,
                available: from_balance,
                required: amount,
            });
        }

        let to_balance = self.store.get_balance(to).await?;
        let new_from = from_balance.saturating_sub(amount);
        let new_to = to_balance.checked_add(amount).ok_or_else(|| {
            CustodyError::invalid_amount(format!("balance overflow for {}", to))
        })?;

        self.store.set_balance(from, new_from).await?;
        self.store.set_balance(to, new_to).await?;

        let now = Utc::now();
        let tx_hash = transfer_hash(from, to, amount, now);
        self.store
            .record_transfer(TransferRecord {
                from,
                to,
                amount,
                reason,
                timestamp: now,
                tx_hash: tx_hash.clone(),
            })
            .await?;

        Ok(tx_hash)
    }
}

fn transfer_hash(from: Address, to: Address, amount: Amount, timestamp: DateTime<Utc>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(from.as_bytes());
    hasher.update(to.as_bytes());
    hasher.update(&amount.to_base_units().to_le_bytes());
    hasher.update(&timestamp.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hex::encode(hasher.finalize().as_bytes())
}
