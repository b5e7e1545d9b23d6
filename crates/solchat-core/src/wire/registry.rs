//! Registry account data parser.
//!
//! Account layout: `discriminator(8) ‖ owner(32) ‖ encryption_key(32)`,
//! then `created_at(i64 LE) ‖ updated_at(i64 LE)` on current program
//! versions (account space 88). Clients only strictly need the encryption
//! key at 40..72; longer accounts (future fee fields) are tolerated.

use crate::error::{ChatError, ChatResult};
use crate::types::Pubkey;

/// Byte offset of the encryption key within the account data
pub const ENCRYPTION_KEY_OFFSET: usize = 40;

/// Minimum account length: discriminator + owner + encryption key
pub const MIN_ACCOUNT_LEN: usize = 72;

/// A parsed registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// The identity that owns this entry
    pub owner: Pubkey,
    /// Published encryption public key
    pub encryption_key: Pubkey,
    /// Creation time, when the account carries it
    pub created_at: Option<i64>,
    /// Last update time, when the account carries it
    pub updated_at: Option<i64>,
}

/// Parse a registry account's raw data.
///
/// # Errors
///
/// Returns `ChatError::Wire` when the data is shorter than
/// [`MIN_ACCOUNT_LEN`].
pub fn parse_registry_account(data: &[u8]) -> ChatResult<RegistryEntry> {
    if data.len() < MIN_ACCOUNT_LEN {
        return Err(ChatError::Wire(format!(
            "registry account is {} bytes, need at least {}",
            data.len(),
            MIN_ACCOUNT_LEN
        )));
    }

    let owner = Pubkey::try_from_slice(&data[8..40])?;
    let encryption_key =
        Pubkey::try_from_slice(&data[ENCRYPTION_KEY_OFFSET..ENCRYPTION_KEY_OFFSET + 32])?;

    let (created_at, updated_at) = if data.len() >= 88 {
        let created = i64::from_le_bytes(data[72..80].try_into().expect("slice is 8 bytes"));
        let updated = i64::from_le_bytes(data[80..88].try_into().expect("slice is 8 bytes"));
        (Some(created), Some(updated))
    } else {
        (None, None)
    };

    Ok(RegistryEntry {
        owner,
        encryption_key,
        created_at,
        updated_at,
    })
}
