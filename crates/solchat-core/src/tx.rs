//! Version-0 transaction message compilation and assembly.
//!
//! Message wire format:
//!
//! ```text
//! +------+--------+-------------------+-----------+--------------+------------+
//! | 0x80 | HDR 3B | ACCOUNT KEYS (cv) | BLOCKHASH | INSTRS (cv)  | LOOKUPS=0  |
//! +------+--------+-------------------+-----------+--------------+------------+
//! ```
//!
//! Header = (num required signatures, num read-only signed, num read-only
//! unsigned). Account keys are deduplicated with merged roles and ordered:
//! writable signers (fee payer first), read-only signers, writable
//! non-signers, read-only non-signers. `cv` marks compact-u16
//! length-prefixed arrays.

use crate::error::{ChatError, ChatResult};
use crate::types::{Blockhash, Pubkey, Signature};
use crate::wire::Instruction;

/// Version prefix byte for v0 messages
pub const MESSAGE_VERSION_PREFIX: u8 = 0x80;

/// Append a compact-u16 length (7-bit little-endian varint).
pub fn encode_compact_len(out: &mut Vec<u8>, mut len: usize) {
    loop {
        let mut byte = (len & 0x7F) as u8;
        len >>= 7;
        if len != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            return;
        }
    }
}

#[derive(Clone, Copy)]
struct KeyRole {
    is_signer: bool,
    is_writable: bool,
}

/// Compile a single-fee-payer v0 message for `instructions`.
///
/// The fee payer is always the first account, as a writable signer.
///
/// # Errors
///
/// Returns `ChatError::Wire` if an instruction references more than 256
/// distinct accounts (unreachable with this program's instruction set).
pub fn compile_message(
    fee_payer: &Pubkey,
    blockhash: &Blockhash,
    instructions: &[Instruction],
) -> ChatResult<Vec<u8>> {
    fn upsert(keys: &mut Vec<Pubkey>, roles: &mut Vec<KeyRole>, key: Pubkey, role: KeyRole) {
        if let Some(i) = keys.iter().position(|k| *k == key) {
            roles[i].is_signer |= role.is_signer;
            roles[i].is_writable |= role.is_writable;
        } else {
            keys.push(key);
            roles.push(role);
        }
    }

    // Deduplicate keys, merging roles across references
    let mut keys: Vec<Pubkey> = vec![*fee_payer];
    let mut roles: Vec<KeyRole> = vec![KeyRole {
        is_signer: true,
        is_writable: true,
    }];

    for instruction in instructions {
        for meta in &instruction.accounts {
            upsert(
                &mut keys,
                &mut roles,
                meta.pubkey,
                KeyRole {
                    is_signer: meta.is_signer,
                    is_writable: meta.is_writable,
                },
            );
        }
        upsert(
            &mut keys,
            &mut roles,
            instruction.program_id,
            KeyRole {
                is_signer: false,
                is_writable: false,
            },
        );
    }

    // Order: writable signers (fee payer stays first), read-only signers,
    // writable non-signers, read-only non-signers
    let mut indexed: Vec<(Pubkey, KeyRole)> = keys.into_iter().zip(roles).collect();
    let fee_payer_entry = indexed.remove(0);
    let class = |r: &KeyRole| match (r.is_signer, r.is_writable) {
        (true, true) => 0u8,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    };
    indexed.sort_by_key(|(_, role)| class(role));
    indexed.insert(0, fee_payer_entry);

    if indexed.len() > 256 {
        return Err(ChatError::Wire(format!(
            "{} accounts referenced, maximum is 256",
            indexed.len()
        )));
    }

    let num_signers = indexed.iter().filter(|(_, r)| r.is_signer).count() as u8;
    let num_readonly_signed = indexed
        .iter()
        .filter(|(_, r)| r.is_signer && !r.is_writable)
        .count() as u8;
    let num_readonly_unsigned = indexed
        .iter()
        .filter(|(_, r)| !r.is_signer && !r.is_writable)
        .count() as u8;

    let index_of = |key: &Pubkey| -> u8 {
        indexed
            .iter()
            .position(|(k, _)| k == key)
            .expect("every referenced key was collected") as u8
    };

    let mut out = Vec::new();
    out.push(MESSAGE_VERSION_PREFIX);
    out.push(num_signers);
    out.push(num_readonly_signed);
    out.push(num_readonly_unsigned);

    encode_compact_len(&mut out, indexed.len());
    for (key, _) in &indexed {
        out.extend_from_slice(key.as_bytes());
    }

    out.extend_from_slice(blockhash.as_bytes());

    encode_compact_len(&mut out, instructions.len());
    for instruction in instructions {
        out.push(index_of(&instruction.program_id));
        encode_compact_len(&mut out, instruction.accounts.len());
        for meta in &instruction.accounts {
            out.push(index_of(&meta.pubkey));
        }
        encode_compact_len(&mut out, instruction.data.len());
        out.extend_from_slice(&instruction.data);
    }

    // No address table lookups
    encode_compact_len(&mut out, 0);

    Ok(out)
}

/// Assemble a submittable transaction from signatures and message bytes.
pub fn assemble_transaction(signatures: &[Signature], message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + signatures.len() * Signature::LEN + message.len());
    encode_compact_len(&mut out, signatures.len());
    for signature in signatures {
        out.extend_from_slice(signature.as_bytes());
    }
    out.extend_from_slice(message);
    out
}

/// Serialize an unsigned single-signer transaction: the signature slot is
/// zeroed, for handoff to an external signer.
pub fn unsigned_transaction(message: &[u8]) -> Vec<u8> {
    assemble_transaction(&[Signature::new([0u8; 64])], message)
}
