//! solchat core library
//!
//! Encrypted peer-to-peer messaging whose durable substrate is a public
//! blockchain. Any two identities, addressed by 32-byte signing keys,
//! exchange confidential messages with no relay, mailbox, or trusted
//! intermediary; the chain sees only ciphertext, sender, recipient, a
//! nonce, and a block-assigned timestamp.
//!
//! ## Overview
//!
//! - **Two-key identity**: the identity key pays and signs; a locally held
//!   encryption key decrypts. A small on-chain registry binds them.
//! - **Framed, chunked messages**: texts larger than one transaction's
//!   payload are split, sealed per chunk, and transparently reassembled.
//! - **Dual ingest**: historical back-fill and a live log subscription
//!   decode the same event stream and converge on identical messages.
//! - **Signing seam**: the identity key may live in-process or with an
//!   external custodial signer that never sees decryption material.
//!
//! ## Quick Start
//!
//! ```ignore
//! use solchat_core::{Messenger, MessengerConfig, ReadOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MessengerConfig::local("https://api.mainnet-beta.solana.com", secret);
//!     let mut messenger = Messenger::new(config)?;
//!
//!     // Bind the local encryption key on chain (idempotent)
//!     messenger.init().await?;
//!
//!     // Send; chunking and encryption are transparent
//!     let signatures = messenger.send(&friend, "gm", None).await?;
//!
//!     // Read history
//!     for message in messenger.read(ReadOptions::default()).await? {
//!         println!("{} @ {}: {}", message.sender, message.timestamp, message.text);
//!     }
//!
//!     // Or listen live
//!     let handle = messenger.listen(|m| println!("{}: {}", m.sender, m.text)).await?;
//!     handle.stop().await;
//!     Ok(())
//! }
//! ```

pub mod crypto;
pub mod error;
pub mod frame;
pub mod keystore;
pub mod messenger;
pub mod pda;
pub mod rpc;
pub mod signer;
pub mod tx;
pub mod types;
pub mod wire;

// Re-exports
pub use error::{ChatError, ChatResult};
pub use frame::{Frame, Reassembler};
pub use keystore::EncryptionKeypair;
pub use messenger::{
    InitOutcome, ListenHandle, Messenger, MessengerConfig, ProgramVersion, SigningMode,
    DEFAULT_PROGRAM_ID,
};
pub use rpc::{ChainRpc, HttpRpc, LogNotification, LogSubscription};
pub use signer::{ExternalSigner, LocalSigner, SignerCallback, TransactionSigner};
pub use types::{Blockhash, ChatMessage, Pubkey, ReadOptions, Signature};
pub use wire::{MessageSent, RegistryEntry};
