//! Instruction payload builders.
//!
//! All four payloads are little-endian, discriminator-prefixed:
//!
//! ```text
//! send_message            disc(8) ‖ recipient(32) ‖ ct_len(u32 LE) ‖ ciphertext ‖ nonce(24)
//! register                disc(8) ‖ encryption_pubkey(32)
//! update_encryption_key   disc(8) ‖ new_encryption_pubkey(32)
//! deregister              disc(8)
//! ```
//!
//! The discriminators and account orderings are a locked external contract;
//! regression tests snapshot them byte for byte.

use crate::crypto::NONCE_SIZE;
use crate::error::{ChatError, ChatResult};
use crate::types::Pubkey;

/// Discriminator for `send_message`
pub const SEND_MESSAGE_DISCRIMINATOR: [u8; 8] = [0x39, 0x28, 0x22, 0xB2, 0xBD, 0x0A, 0x41, 0x1A];

/// Discriminator for `register`
pub const REGISTER_DISCRIMINATOR: [u8; 8] = [0xD3, 0x7C, 0x43, 0x0F, 0xD3, 0xC2, 0xB2, 0xF0];

/// Discriminator for `update_encryption_key`
pub const UPDATE_ENCRYPTION_KEY_DISCRIMINATOR: [u8; 8] =
    [0x5C, 0xE9, 0x1D, 0x65, 0x98, 0x61, 0x6E, 0xEB];

/// Discriminator for `deregister`
pub const DEREGISTER_DISCRIMINATOR: [u8; 8] = [0xA1, 0xB2, 0x27, 0xBD, 0xE7, 0xE0, 0x0D, 0xBB];

/// The system program's well-known all-zero address
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new([0u8; 32]);

/// One account reference in an instruction, with its declared roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMeta {
    /// Account address
    pub pubkey: Pubkey,
    /// Whether this account must sign the transaction
    pub is_signer: bool,
    /// Whether the instruction may mutate the account
    pub is_writable: bool,
}

impl AccountMeta {
    /// A writable account reference.
    pub fn writable(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    /// A read-only account reference.
    pub fn readonly(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

/// A program instruction ready for message compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Target program
    pub program_id: Pubkey,
    /// Ordered account list with roles
    pub accounts: Vec<AccountMeta>,
    /// Discriminator-prefixed payload
    pub data: Vec<u8>,
}

/// Account layout for `send_message`, selected at construction time to
/// match the deployed program's version. Submitting the wrong layout is a
/// configuration error, never a silent fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendLayout {
    /// `[sender (writable signer)]`
    Basic,
    /// Fee-collecting program versions append
    /// `config(ro), fee_vault(rw), recipient_registry(ro),
    ///  recipient_wallet(rw), system_program(ro)`
    FeeEnabled {
        /// Platform config account
        config: Pubkey,
        /// Fee vault account
        fee_vault: Pubkey,
        /// The recipient's registry PDA
        recipient_registry: Pubkey,
    },
}

/// Build a `send_message` instruction.
///
/// # Errors
///
/// Returns `ChatError::Wire` when the ciphertext is empty or exceeds the
/// program's 900-byte ceiling. The program would reject it, so the client
/// refuses to submit it.
pub fn send_message(
    program_id: &Pubkey,
    sender: &Pubkey,
    recipient: &Pubkey,
    ciphertext: &[u8],
    nonce: &[u8; NONCE_SIZE],
    layout: &SendLayout,
) -> ChatResult<Instruction> {
    if ciphertext.is_empty() {
        return Err(ChatError::Wire("ciphertext is empty".to_string()));
    }
    if ciphertext.len() > super::MAX_CIPHERTEXT_LEN {
        return Err(ChatError::Wire(format!(
            "ciphertext is {} bytes, program maximum is {}",
            ciphertext.len(),
            super::MAX_CIPHERTEXT_LEN
        )));
    }

    let mut data = Vec::with_capacity(8 + 32 + 4 + ciphertext.len() + NONCE_SIZE);
    data.extend_from_slice(&SEND_MESSAGE_DISCRIMINATOR);
    data.extend_from_slice(recipient.as_bytes());
    data.extend_from_slice(&(ciphertext.len() as u32).to_le_bytes());
    data.extend_from_slice(ciphertext);
    data.extend_from_slice(nonce);

    let mut accounts = vec![AccountMeta::writable(*sender, true)];
    if let SendLayout::FeeEnabled {
        config,
        fee_vault,
        recipient_registry,
    } = layout
    {
        accounts.push(AccountMeta::readonly(*config, false));
        accounts.push(AccountMeta::writable(*fee_vault, false));
        accounts.push(AccountMeta::readonly(*recipient_registry, false));
        accounts.push(AccountMeta::writable(*recipient, false));
        accounts.push(AccountMeta::readonly(SYSTEM_PROGRAM_ID, false));
    }

    Ok(Instruction {
        program_id: *program_id,
        accounts,
        data,
    })
}

/// Build a `register` instruction publishing `encryption_key` for `owner`.
pub fn register(
    program_id: &Pubkey,
    owner: &Pubkey,
    registry: &Pubkey,
    encryption_key: &Pubkey,
) -> Instruction {
    let mut data = Vec::with_capacity(8 + 32);
    data.extend_from_slice(&REGISTER_DISCRIMINATOR);
    data.extend_from_slice(encryption_key.as_bytes());

    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::writable(*registry, false),
            AccountMeta::writable(*owner, true),
            AccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
        ],
        data,
    }
}

/// Build an `update_encryption_key` instruction.
pub fn update_encryption_key(
    program_id: &Pubkey,
    owner: &Pubkey,
    registry: &Pubkey,
    new_encryption_key: &Pubkey,
) -> Instruction {
    let mut data = Vec::with_capacity(8 + 32);
    data.extend_from_slice(&UPDATE_ENCRYPTION_KEY_DISCRIMINATOR);
    data.extend_from_slice(new_encryption_key.as_bytes());

    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::writable(*registry, false),
            AccountMeta::readonly(*owner, true),
        ],
        data,
    }
}

/// Build a `deregister` instruction closing the registry entry.
pub fn deregister(program_id: &Pubkey, owner: &Pubkey, registry: &Pubkey) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::writable(*registry, false),
            AccountMeta::writable(*owner, true),
        ],
        data: DEREGISTER_DISCRIMINATOR.to_vec(),
    }
}
