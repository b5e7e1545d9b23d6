//! Core data types: chain addresses, signatures, and the caller-visible
//! message object.
//!
//! All 32-byte keys (identities, encryption keys, program ids) share the
//! [`Pubkey`] newtype; base58 is the only human/API surface for key material.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ChatError;

/// A 32-byte Ed25519 public key: identity, encryption key, program id, or
/// any derived address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pubkey([u8; 32]);

impl Pubkey {
    /// Length of a public key in bytes
    pub const LEN: usize = 32;

    /// Construct from raw bytes
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Take the raw bytes
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Construct from an arbitrary byte slice, checking the length
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, ChatError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChatError::Wire(format!("expected 32-byte key, got {}", bytes.len())))?;
        Ok(Self(arr))
    }
}

impl From<[u8; 32]> for Pubkey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.0).into_string())
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({})", self)
    }
}

impl FromStr for Pubkey {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| ChatError::Config(format!("invalid base58 key '{}': {}", s, e)))?;
        Self::try_from_slice(&bytes)
            .map_err(|_| ChatError::Config(format!("key '{}' is not 32 bytes", s)))
    }
}

impl Serialize for Pubkey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Pubkey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A 64-byte Ed25519 transaction signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Length of a signature in bytes
    pub const LEN: usize = 64;

    /// Construct from raw bytes
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl From<[u8; 64]> for Signature {
    fn from(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.0).into_string())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self)
    }
}

impl FromStr for Signature {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| ChatError::Wire(format!("invalid base58 signature: {}", e)))?;
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| ChatError::Wire("signature is not 64 bytes".to_string()))?;
        Ok(Self(arr))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A 32-byte recent blockhash, fetched before building a transaction.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Blockhash([u8; 32]);

impl Blockhash {
    /// Construct from raw bytes
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Blockhash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.0).into_string())
    }
}

impl fmt::Debug for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blockhash({})", self)
    }
}

impl FromStr for Blockhash {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| ChatError::Rpc(format!("invalid base58 blockhash: {}", e)))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChatError::Rpc("blockhash is not 32 bytes".to_string()))?;
        Ok(Self(arr))
    }
}

/// A fully reassembled, decrypted message as delivered to the caller.
///
/// Constructed only once every chunk of the logical message has been
/// decrypted; `signatures` lists the contributing transactions in chunk
/// order (length 1 for standalone messages).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Identity key of the sender
    pub sender: Pubkey,
    /// Identity key of the recipient
    pub recipient: Pubkey,
    /// Decrypted message text
    pub text: String,
    /// Block-assigned unix timestamp (seconds); for multi-chunk messages the
    /// earliest chunk timestamp
    pub timestamp: i64,
    /// Random 8-byte id correlating the chunks of this message
    pub message_id: [u8; 8],
    /// Transaction signatures that carried the chunks, in chunk order
    pub signatures: Vec<Signature>,
}

/// Options for the historical [`read`](crate::Messenger::read) path.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Discard messages whose block time is strictly before this unix
    /// timestamp (seconds)
    pub since: Option<i64>,
    /// Maximum number of messages to return
    pub limit: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            since: None,
            limit: 50,
        }
    }
}
