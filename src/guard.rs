//! Authorization guard
//!
//! Per-operation checks the transition engine consults before mutating a
//! custody account: input validation for `create`, signer checks for every
//! value-moving operation, and the status preconditions that make the
//! state machine monotonic. All checks are pure; none mutate state.

use crate::{
    error::CustodyError,
    models::{Address, Amount, CustodyAccount, Signer, MAX_TASK_ID_LEN},
    CustodyResult,
};

/// Reject empty or oversized task identifiers before any state mutation.
pub fn validate_task_id(task_id: &str) -> CustodyResult<()> {
    if task_id.is_empty() {
        return Err(CustodyError::invalid_task_id("task id cannot be empty"));
    }
    if task_id.len() > MAX_TASK_ID_LEN {
        return Err(CustodyError::invalid_task_id(format!(
            "task id is {} bytes, maximum is {}",
            task_id.len(),
            MAX_TASK_ID_LEN
        )));
    }
    Ok(())
}

/// Reject zero and over-limit escrow amounts.
pub fn validate_amount(amount: Amount, max: Amount) -> CustodyResult<()> {
    if amount.is_zero() {
        return Err(CustodyError::invalid_amount("amount must be greater than 0"));
    }
    if amount > max {
        return Err(CustodyError::invalid_amount(format!(
            "amount {} exceeds maximum {}",
            amount, max
        )));
    }
    Ok(())
}

/// Only the recorded poster may fund, release, or cancel an escrow.
pub fn require_poster(account: &CustodyAccount, signer: &Signer) -> CustodyResult<()> {
    if account.poster != signer.address() {
        return Err(CustodyError::UnauthorizedPoster {
            signer: signer.address(),
            poster: account.poster,
        });
    }
    Ok(())
}

/// The release destination must match the worker recorded at creation;
/// a different account fails rather than silently redirecting funds.
pub fn require_recorded_worker(account: &CustodyAccount, worker: Address) -> CustodyResult<()> {
    if account.worker != worker {
        return Err(CustodyError::WorkerMismatch {
            supplied: worker,
            recorded: account.worker,
        });
    }
    Ok(())
}

/// `fund` requires `Created`; this is what blocks double-funding.
pub fn require_can_fund(account: &CustodyAccount) -> CustodyResult<()> {
    if !account.status.can_fund() {
        return Err(CustodyError::InvalidEscrowStatus {
            operation: "fund",
            required: "Created",
            actual: account.status,
        });
    }
    Ok(())
}

/// `release` requires `Funded`; blocks double-release and releasing an
/// account that was never funded.
pub fn require_can_release(account: &CustodyAccount) -> CustodyResult<()> {
    if !account.status.can_release() {
        return Err(CustodyError::InvalidEscrowStatus {
            operation: "release",
            required: "Funded",
            actual: account.status,
        });
    }
    Ok(())
}

/// `cancel` requires `Created` or `Funded`; terminal accounts stay terminal.
pub fn require_can_cancel(account: &CustodyAccount) -> CustodyResult<()> {
    if !account.status.can_cancel() {
        return Err(CustodyError::InvalidEscrowStatus {
            operation: "cancel",
            required: "Created or Funded",
            actual: account.status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EscrowStatus;

    fn account() -> CustodyAccount {
        CustodyAccount::new(
            Address::from_bytes([1; 32]),
            Address::from_bytes([2; 32]),
            "task-1".to_string(),
            Amount::from_base_units(100),
            255,
        )
    }

    #[test]
    fn task_id_bounds() {
        assert!(validate_task_id("test-task-123").is_ok());
        assert!(validate_task_id("").is_err());
        assert!(validate_task_id(&"x".repeat(MAX_TASK_ID_LEN + 1)).is_err());
    }

    #[test]
    fn amount_bounds() {
        let max = Amount::from_base_units(1_000);
        assert!(validate_amount(Amount::from_base_units(1), max).is_ok());
        assert!(validate_amount(Amount::ZERO, max).is_err());
        assert!(validate_amount(Amount::from_base_units(1_001), max).is_err());
    }

    #[test]
    fn poster_check() {
        let account = account();
        assert!(require_poster(&account, &Signer::new(account.poster)).is_ok());

        let stranger = Signer::new(Address::from_bytes([9; 32]));
        assert!(matches!(
            require_poster(&account, &stranger),
            Err(CustodyError::UnauthorizedPoster { .. })
        ));
    }

    #[test]
    fn worker_check() {
        let account = account();
        assert!(require_recorded_worker(&account, account.worker).is_ok());
        assert!(matches!(
            require_recorded_worker(&account, Address::from_bytes([9; 32])),
            Err(CustodyError::WorkerMismatch { .. })
        ));
    }

    #[test]
    fn status_preconditions() {
        let mut account = account();
        assert!(require_can_fund(&account).is_ok());
        assert!(require_can_release(&account).is_err());
        assert!(require_can_cancel(&account).is_ok());

        account.status = EscrowStatus::Funded;
        assert!(require_can_fund(&account).is_err());
        assert!(require_can_release(&account).is_ok());
        assert!(require_can_cancel(&account).is_ok());

        account.status = EscrowStatus::Released;
        assert!(require_can_fund(&account).is_err());
        assert!(require_can_release(&account).is_err());
        assert!(require_can_cancel(&account).is_err());

        account.status = EscrowStatus::Cancelled;
        assert!(require_can_cancel(&account).is_err());
    }
}
