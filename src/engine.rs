//! Transition engine
//!
//! The four operations that mutate a custody account and move value:
//! create, fund, release, cancel. Each operation locks the account,
//! re-checks `status` (no stale-read transitions), consults the
//! authorization guard, and commits the value movement and the status
//! update together or not at all. Operations on different accounts run
//! fully in parallel; operations on the same account serialize on the
//! account's own mutex.

use crate::{
    derivation,
    error::CustodyError,
    guard,
    ledger::{Ledger, TransferReason},
    models::{Address, Amount, CustodyAccount, EscrowEvent, EscrowSnapshot, EscrowStatus, Signer},
    CustodyResult,
};
use chrono::Utc;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

/// Configuration for the custody engine
#[derive(Debug, Clone)]
pub struct CustodyEngineConfig {
    /// Maximum escrow amount in base units
    pub max_escrow_amount: Amount,
    /// Balance floor retained in the custody account on release/refund
    /// (rent analog; zero means the full held amount moves out)
    pub min_persistent_balance: Amount,
    /// Capacity of the transition event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for CustodyEngineConfig {
    fn default() -> Self {
        Self {
            max_escrow_amount: Amount::from_native(1_000.0),
            min_persistent_balance: Amount::ZERO,
            event_channel_capacity: 256,
        }
    }
}

/// Escrow creation request
#[derive(Debug, Clone)]
pub struct CreateEscrowRequest {
    pub task_id: String,
    pub amount: Amount,
    pub worker: Address,
}

type AccountMap = HashMap<Address, Arc<Mutex<CustodyAccount>>>;

/// The custody engine. Sole mutator of custody accounts.
pub struct CustodyEngine {
    config: CustodyEngineConfig,
    accounts: Arc<RwLock<AccountMap>>,
    ledger: Arc<Ledger>,
    events: Arc<RwLock<Vec<EscrowEvent>>>,
    event_tx: broadcast::Sender<EscrowEvent>,
}

impl CustodyEngine {
    pub fn new(config: CustodyEngineConfig, ledger: Arc<Ledger>) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        Self {
            config,
            accounts: Arc::new(RwLock::new(HashMap::new())),
            ledger,
            events: Arc::new(RwLock::new(Vec::new())),
            event_tx,
        }
    }

    /// Subscribe to committed transition events. Events are sent strictly
    /// after the transition commits, so a consumer never observes a state
    /// the custody layer has not reached.
    pub fn subscribe(&self) -> broadcast::Receiver<EscrowEvent> {
        self.event_tx.subscribe()
    }

    /// Allocate a new custody account at the derived address. No value
    /// moves yet; the signer becomes the recorded poster.
    pub async fn create(
        &self,
        request: CreateEscrowRequest,
        signer: &Signer,
    ) -> CustodyResult<CustodyAccount> {
        guard::validate_amount(request.amount, self.config.max_escrow_amount)?;
        let (address, bump) = derivation::derive_custody_address(&request.task_id)?;

        let account = CustodyAccount::new(
            signer.address(),
            request.worker,
            request.task_id.clone(),
            request.amount,
            bump,
        );

        {
            let mut accounts = self.accounts.write().await;
            if accounts.contains_key(&address) {
                return Err(CustodyError::AccountAlreadyExists {
                    task_id: request.task_id,
                });
            }
            accounts.insert(address, Arc::new(Mutex::new(account.clone())));
        }

        info!(
            task_id = %account.task_id,
            address = %address,
            poster = %account.poster,
            worker = %account.worker,
            amount = %account.amount,
            "custody account created"
        );
        self.emit("escrow.created", &account, address, Some(account.poster), None)
            .await;

        Ok(account)
    }

    /// Transfer exactly `amount` from the poster's balance into custody.
    pub async fn fund(&self, address: Address, signer: &Signer) -> CustodyResult<CustodyAccount> {
        let handle = self.account_handle(address).await?;
        let mut account = handle.lock().await;

        guard::require_poster(&account, signer)?;
        guard::require_can_fund(&account)?;

        self.ledger
            .transfer(account.poster, address, account.amount, TransferReason::EscrowDeposit)
            .await?;

        account.status = EscrowStatus::Funded;
        account.funded_at = Some(Utc::now());
        let committed = account.clone();
        drop(account);

        info!(
            task_id = %committed.task_id,
            address = %address,
            amount = %committed.amount,
            "escrow funded"
        );
        self.emit(
            "escrow.funded",
            &committed,
            address,
            Some(committed.poster),
            Some(committed.amount),
        )
        .await;

        Ok(committed)
    }

    /// Pay the full escrowed amount out of custody to the recorded worker.
    pub async fn release(
        &self,
        address: Address,
        worker: Address,
        signer: &Signer,
    ) -> CustodyResult<CustodyAccount> {
        let handle = self.account_handle(address).await?;
        let mut account = handle.lock().await;

        guard::require_can_release(&account)?;
        guard::require_poster(&account, signer)?;
        guard::require_recorded_worker(&account, worker)?;

        let available = self.available_balance(address).await?;
        self.ledger
            .transfer(address, worker, available, TransferReason::EscrowRelease)
            .await?;

        account.status = EscrowStatus::Released;
        account.released_at = Some(Utc::now());
        let committed = account.clone();
        drop(account);

        info!(
            task_id = %committed.task_id,
            address = %address,
            worker = %worker,
            amount = %available,
            "escrow released"
        );
        self.emit(
            "escrow.released",
            &committed,
            address,
            Some(committed.poster),
            Some(available),
        )
        .await;

        Ok(committed)
    }

    /// Cancel the escrow. Refunds the held amount to the poster if the
    /// account is `Funded`; from `Created` no value moves.
    pub async fn cancel(&self, address: Address, signer: &Signer) -> CustodyResult<CustodyAccount> {
        let handle = self.account_handle(address).await?;
        let mut account = handle.lock().await;

        guard::require_poster(&account, signer)?;
        guard::require_can_cancel(&account)?;

        let refunded = if account.status == EscrowStatus::Funded {
            let available = self.available_balance(address).await?;
            self.ledger
                .transfer(address, account.poster, available, TransferReason::EscrowRefund)
                .await?;
            Some(available)
        } else {
            None
        };

        account.status = EscrowStatus::Cancelled;
        account.cancelled_at = Some(Utc::now());
        let committed = account.clone();
        drop(account);

        info!(
            task_id = %committed.task_id,
            address = %address,
            refunded = refunded.map(|a| a.to_base_units()).unwrap_or(0),
            "escrow cancelled"
        );
        self.emit(
            "escrow.cancelled",
            &committed,
            address,
            Some(committed.poster),
            refunded,
        )
        .await;

        Ok(committed)
    }

    /// Fetch the full account record.
    pub async fn get_account(&self, address: Address) -> CustodyResult<CustodyAccount> {
        let handle = self.account_handle(address).await?;
        let account = handle.lock().await;
        Ok(account.clone())
    }

    /// Read-only status query used by UIs to mirror state off-chain.
    pub async fn snapshot(&self, address: Address) -> CustodyResult<EscrowSnapshot> {
        Ok(self.get_account(address).await?.snapshot())
    }

    /// Audit-trail events recorded for a task, oldest first.
    pub async fn task_events(&self, task_id: &str) -> Vec<EscrowEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|event| event.task_id == task_id)
            .cloned()
            .collect()
    }

    async fn account_handle(&self, address: Address) -> CustodyResult<Arc<Mutex<CustodyAccount>>> {
        let accounts = self.accounts.read().await;
        accounts
            .get(&address)
            .cloned()
            .ok_or(CustodyError::AccountNotFound(address))
    }

    /// Held balance minus the configured persistence floor.
    async fn available_balance(&self, address: Address) -> CustodyResult<Amount> {
        let balance = self.ledger.balance(address).await?;
        Ok(balance.saturating_sub(self.config.min_persistent_balance))
    }

    async fn emit(
        &self,
        event_type: &str,
        account: &CustodyAccount,
        address: Address,
        actor: Option<Address>,
        amount: Option<Amount>,
    ) {
        let event = EscrowEvent {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            task_id: account.task_id.clone(),
            address,
            actor,
            status: account.status,
            amount,
            metadata: Some(serde_json::json!({
                "poster": account.poster.to_hex(),
                "worker": account.worker.to_hex(),
            })),
            created_at: Utc::now(),
        };

        self.events.write().await.push(event.clone());
        // No receivers is fine; the audit log above is authoritative.
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;

    fn engine() -> CustodyEngine {
        let ledger = Arc::new(Ledger::new(Arc::new(MemoryLedger::new())));
        CustodyEngine::new(CustodyEngineConfig::default(), ledger)
    }

    fn request(task_id: &str) -> CreateEscrowRequest {
        CreateEscrowRequest {
            task_id: task_id.to_string(),
            amount: Amount::from_base_units(100_000_000),
            worker: Address::from_bytes([2; 32]),
        }
    }

    #[tokio::test]
    async fn duplicate_task_id_fails() {
        let engine = engine();
        let poster = Signer::new(Address::from_bytes([1; 32]));

        engine.create(request("task-a"), &poster).await.unwrap();
        let err = engine.create(request("task-a"), &poster).await.unwrap_err();
        assert!(matches!(err, CustodyError::AccountAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn zero_amount_is_rejected_before_any_mutation() {
        let engine = engine();
        let poster = Signer::new(Address::from_bytes([1; 32]));

        let mut req = request("task-b");
        req.amount = Amount::ZERO;
        assert!(matches!(
            engine.create(req, &poster).await.unwrap_err(),
            CustodyError::InvalidAmount(_)
        ));

        let address = derivation::custody_address_for("task-b").unwrap();
        assert!(matches!(
            engine.get_account(address).await.unwrap_err(),
            CustodyError::AccountNotFound(_)
        ));
    }

    #[tokio::test]
    async fn snapshot_exposes_read_only_fields() {
        let engine = engine();
        let poster = Signer::new(Address::from_bytes([1; 32]));
        let account = engine.create(request("task-c"), &poster).await.unwrap();

        let address = derivation::custody_address_for("task-c").unwrap();
        let snapshot = engine.snapshot(address).await.unwrap();
        assert_eq!(snapshot.task_id, "task-c");
        assert_eq!(snapshot.poster, account.poster);
        assert_eq!(snapshot.worker, account.worker);
        assert_eq!(snapshot.status, EscrowStatus::Created);
        assert!(snapshot.funded_at.is_none());
    }

    #[tokio::test]
    async fn created_account_records_bump_that_verifies() {
        let engine = engine();
        let poster = Signer::new(Address::from_bytes([1; 32]));
        let account = engine.create(request("task-d"), &poster).await.unwrap();

        let address = derivation::custody_address_for("task-d").unwrap();
        assert!(derivation::verify_custody_address(
            "task-d",
            address,
            account.derivation_bump
        ));
    }
}
