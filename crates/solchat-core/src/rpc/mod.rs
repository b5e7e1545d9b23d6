//! Chain gateway: a thin, swappable adapter over the chain's JSON-RPC
//! surface. [`HttpRpc`] is the production implementation; tests drive the
//! messenger against in-memory implementations of [`ChainRpc`].

use async_trait::async_trait;

use crate::error::ChatResult;
use crate::types::{Blockhash, Pubkey, Signature};

pub mod http;
pub mod pubsub;

pub use http::HttpRpc;
pub use pubsub::{LogNotification, LogSubscription};

/// One entry from a signatures-for-address page.
#[derive(Debug, Clone)]
pub struct SignatureInfo {
    /// Transaction signature
    pub signature: Signature,
    /// Block time in unix seconds, when the node knows it
    pub block_time: Option<i64>,
    /// Whether the transaction failed
    pub err: bool,
}

/// A fetched transaction's observable pieces.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    /// Log message lines emitted during execution
    pub logs: Vec<String>,
    /// Block time in unix seconds
    pub block_time: Option<i64>,
}

/// Processing status of a submitted transaction.
#[derive(Debug, Clone)]
pub struct TxStatus {
    /// Commitment level reached ("processed" / "confirmed" / "finalized")
    pub confirmation_status: Option<String>,
    /// Whether execution failed
    pub err: bool,
}

impl TxStatus {
    /// Whether the transaction reached at least confirmed commitment.
    pub fn is_confirmed(&self) -> bool {
        matches!(
            self.confirmation_status.as_deref(),
            Some("confirmed") | Some("finalized")
        )
    }
}

/// The chain operations the messenger needs. Every method may suspend.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Fetch a recent blockhash for transaction building.
    async fn latest_blockhash(&self) -> ChatResult<Blockhash>;

    /// Submit serialized transaction bytes; returns the signature.
    async fn send_transaction(&self, tx_bytes: &[u8]) -> ChatResult<Signature>;

    /// Query processing status for each signature (None = unknown).
    async fn signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> ChatResult<Vec<Option<TxStatus>>>;

    /// Page backwards through signatures mentioning `address`, newest
    /// first, starting before `before` when set.
    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<&Signature>,
        limit: usize,
    ) -> ChatResult<Vec<SignatureInfo>>;

    /// Fetch a confirmed transaction; `None` when the node does not have it.
    async fn transaction(&self, signature: &Signature) -> ChatResult<Option<TransactionRecord>>;

    /// Fetch raw account data; `None` when the account does not exist.
    async fn account_data(&self, address: &Pubkey) -> ChatResult<Option<Vec<u8>>>;

    /// Open a live log subscription for transactions mentioning `mentions`,
    /// at confirmed commitment.
    async fn subscribe_logs(&self, mentions: &Pubkey) -> ChatResult<LogSubscription>;
}
