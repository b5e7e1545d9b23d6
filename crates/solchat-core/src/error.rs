//! Error types for the solchat client library.

use thiserror::Error;

use crate::types::Signature;

/// Main error type for solchat operations.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Invalid or incomplete configuration; fatal at construction
    #[error("Configuration error: {0}")]
    Config(String),

    /// An encryption-dependent operation was called before `init` made the
    /// local encryption keypair available
    #[error("Messenger not initialized: local encryption keypair not loaded")]
    NotInitialized,

    /// Cryptographic operation failed (key conversion, encryption)
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Key store file is malformed or inconsistent
    #[error("Key store error: {0}")]
    KeyStore(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Wire-format violation (instruction payload, account data, frame)
    #[error("Wire format error: {0}")]
    Wire(String),

    /// RPC transport or JSON-RPC level failure
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Log subscription failed or was torn down unexpectedly
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Transaction signing failed (local key or external signer callback)
    #[error("Signing error: {0}")]
    Signing(String),

    /// The transaction was submitted but never reached confirmed commitment.
    /// Carries the signature so the caller can reconcile later.
    #[error("Transaction {signature} not confirmed after {polls} status polls")]
    ConfirmationTimeout {
        /// Signature of the submitted transaction
        signature: Signature,
        /// Number of status polls performed before giving up
        polls: u32,
    },

    /// A multi-chunk send failed partway. The chunks in `sent` are already
    /// on chain; `failed_index` is the 0-based chunk that did not land.
    #[error("Send failed at chunk {failed_index} ({} chunks landed): {reason}", sent.len())]
    PartialSend {
        /// Signatures of the chunks that landed, in chunk order
        sent: Vec<Signature>,
        /// Index of the chunk whose submission failed
        failed_index: usize,
        /// Description of the underlying failure
        reason: String,
    },
}

/// Result type alias using ChatError
pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChatError::Config("missing rpc_url".to_string());
        assert_eq!(format!("{}", err), "Configuration error: missing rpc_url");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let chat_err: ChatError = io_err.into();
        assert!(matches!(chat_err, ChatError::Io(_)));
    }

    #[test]
    fn test_partial_send_display() {
        let err = ChatError::PartialSend {
            sent: vec![Signature::new([7u8; 64])],
            failed_index: 1,
            reason: "rpc unavailable".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("chunk 1"));
        assert!(msg.contains("1 chunks landed"));
    }
}
