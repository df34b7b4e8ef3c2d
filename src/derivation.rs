//! Custody address derivation
//!
//! Maps a task identifier to a unique custody account address plus an
//! auxiliary bump. The same task id always derives the same address, and
//! the derived bytes are guaranteed not to parse as an x-only secp256k1
//! public key, so no party holds a private key for the custody account.
//! Any observer can re-run the derivation to verify an address.

use crate::{error::CustodyError, guard, models::Address, CustodyResult};
use secp256k1::XOnlyPublicKey;

/// Domain-separation seed prefixed to every candidate hash.
pub const CUSTODY_SEED: &[u8] = b"task_custody";

/// Derived-address lookup for a task identifier. Pure, no side effects.
pub fn custody_address_for(task_id: &str) -> CustodyResult<Address> {
    derive_custody_address(task_id).map(|(address, _)| address)
}

/// Derive the custody address and bump for a task identifier.
///
/// Candidates are searched from bump 255 downward; the first hash that is
/// not a valid public key wins. Roughly half of all 32-byte strings are
/// valid x coordinates, so the expected search depth is two. Exhausting
/// all 256 bumps is reported as a fatal error rather than retried.
pub fn derive_custody_address(task_id: &str) -> CustodyResult<(Address, u8)> {
    guard::validate_task_id(task_id)?;

    for bump in (0u8..=255).rev() {
        let candidate = candidate_hash(task_id, bump);
        if has_no_private_key(&candidate) {
            return Ok((Address::from_bytes(candidate), bump));
        }
    }

    Err(CustodyError::DerivationExhausted {
        task_id: task_id.to_string(),
    })
}

/// Cheap observer-side check that `address` is the custody address for
/// `task_id` under `bump`.
pub fn verify_custody_address(task_id: &str, address: Address, bump: u8) -> bool {
    if guard::validate_task_id(task_id).is_err() {
        return false;
    }
    let candidate = candidate_hash(task_id, bump);
    candidate == *address.as_bytes() && has_no_private_key(&candidate)
}

fn candidate_hash(task_id: &str, bump: u8) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(CUSTODY_SEED);
    hasher.update(task_id.as_bytes());
    hasher.update(&[bump]);
    *hasher.finalize().as_bytes()
}

/// A 32-byte string only has a corresponding keypair if it is a valid
/// x-only public key; rejecting those keeps custody addresses keyless.
fn has_no_private_key(bytes: &[u8; 32]) -> bool {
    XOnlyPublicKey::from_slice(bytes).is_err()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MAX_TASK_ID_LEN;
    use secp256k1::{Secp256k1, SecretKey};

    #[test]
    fn derivation_is_deterministic() {
        let (addr_a, bump_a) = derive_custody_address("test-task-123").unwrap();
        let (addr_b, bump_b) = derive_custody_address("test-task-123").unwrap();
        assert_eq!(addr_a, addr_b);
        assert_eq!(bump_a, bump_b);
    }

    #[test]
    fn distinct_tasks_derive_distinct_addresses() {
        let (addr_a, _) = derive_custody_address("test-task-123").unwrap();
        let (addr_b, _) = derive_custody_address("test-task-456").unwrap();
        assert_ne!(addr_a, addr_b);
    }

    #[test]
    fn derived_address_verifies() {
        let (address, bump) = derive_custody_address("cancel-task-789").unwrap();
        assert!(verify_custody_address("cancel-task-789", address, bump));
        assert!(!verify_custody_address("cancel-task-789", address, bump.wrapping_sub(1)));
        assert!(!verify_custody_address("some-other-task", address, bump));
    }

    #[test]
    fn derived_address_has_no_keypair() {
        let (address, _) = derive_custody_address("unauthorized-task-999").unwrap();
        assert!(XOnlyPublicKey::from_slice(address.as_bytes()).is_err());
    }

    #[test]
    fn wallet_address_is_never_a_custody_address() {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let (pubkey, _) = secret.public_key(&secp).x_only_public_key();
        let wallet = Address::from_public_key(&pubkey);

        for bump in 0u8..=255 {
            assert!(!verify_custody_address("test-task-123", wallet, bump));
        }
    }

    #[test]
    fn invalid_task_ids_are_rejected() {
        assert!(matches!(
            derive_custody_address(""),
            Err(CustodyError::InvalidTaskId(_))
        ));

        let oversized = "x".repeat(MAX_TASK_ID_LEN + 1);
        assert!(matches!(
            derive_custody_address(&oversized),
            Err(CustodyError::InvalidTaskId(_))
        ));

        let at_limit = "x".repeat(MAX_TASK_ID_LEN);
        assert!(derive_custody_address(&at_limit).is_ok());
    }
}
