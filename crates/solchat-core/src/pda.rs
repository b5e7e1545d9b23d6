//! Registry address derivation.
//!
//! The registry entry for an identity lives at a program-derived address:
//! the first sha256 digest of `seeds ‖ bump ‖ program_id ‖ marker` (bump
//! counting down from 255) that does NOT decompress to a Curve25519 point,
//! so no private key can ever exist for it. Pure computation, no network.

use curve25519_dalek::edwards::CompressedEdwardsY;
use sha2::{Digest, Sha256};

use crate::error::{ChatError, ChatResult};
use crate::types::Pubkey;

/// Seed prefix for registry accounts, matching the on-chain program
pub const REGISTRY_SEED: &[u8] = b"messenger";

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Derive the registry account address for an identity.
pub fn find_registry_address(identity: &Pubkey, program_id: &Pubkey) -> ChatResult<(Pubkey, u8)> {
    find_program_address(&[REGISTRY_SEED, identity.as_bytes()], program_id)
}

/// Canonical PDA search: highest bump whose digest is off-curve.
///
/// # Errors
///
/// Returns `ChatError::Crypto` in the cryptographically negligible case
/// that all 256 bump values land on the curve.
pub fn find_program_address(seeds: &[&[u8]], program_id: &Pubkey) -> ChatResult<(Pubkey, u8)> {
    for bump in (0..=255u8).rev() {
        let mut hasher = Sha256::new();
        for seed in seeds {
            hasher.update(seed);
        }
        hasher.update([bump]);
        hasher.update(program_id.as_bytes());
        hasher.update(PDA_MARKER);
        let digest: [u8; 32] = hasher.finalize().into();

        if CompressedEdwardsY(digest).decompress().is_none() {
            return Ok((Pubkey::new(digest), bump));
        }
    }

    Err(ChatError::Crypto(
        "no off-curve registry address found".to_string(),
    ))
}
