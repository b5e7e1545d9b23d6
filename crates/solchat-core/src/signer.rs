//! Transaction signing strategies.
//!
//! The identity key either lives in-process ([`LocalSigner`]) or with an
//! external service ([`ExternalSigner`]) that receives the unsigned
//! transaction bytes and returns signed bytes. The external signer is a
//! pay-and-sign capability only: it is never handed decryption material and
//! is never asked to produce any.

use std::sync::Arc;

use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey};
use futures_util::future::BoxFuture;

use crate::error::{ChatError, ChatResult};
use crate::tx;
use crate::types::{Blockhash, Pubkey, Signature};

/// Callback signature for delegated signing: receives the serialized
/// unsigned transaction (zeroed signature slot), the blockhash it was built
/// against, and the fee payer; returns the fully signed transaction bytes.
pub type SignerCallback =
    dyn Fn(Vec<u8>, Blockhash, Pubkey) -> BoxFuture<'static, ChatResult<Vec<u8>>> + Send + Sync;

/// Produces submittable signed transaction bytes from a compiled message.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// The identity address that pays for and signs transactions.
    fn address(&self) -> Pubkey;

    /// Sign the compiled message, returning serialized transaction bytes.
    async fn sign_transaction(&self, message: &[u8], blockhash: &Blockhash)
        -> ChatResult<Vec<u8>>;
}

/// In-process signer holding the identity's Ed25519 secret.
pub struct LocalSigner {
    signing_key: SigningKey,
}

impl LocalSigner {
    /// Build from identity secret bytes: either a 32-byte seed or the
    /// 64-byte seed‖public keypair form.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Config` on any other length, or when a 64-byte
    /// secret's public half does not match its seed.
    pub fn from_secret_bytes(secret: &[u8]) -> ChatResult<Self> {
        let seed: [u8; 32] = match secret.len() {
            32 => secret.try_into().expect("length checked"),
            64 => {
                let seed: [u8; 32] = secret[..32].try_into().expect("length checked");
                let derived = SigningKey::from_bytes(&seed).verifying_key().to_bytes();
                if derived != secret[32..] {
                    return Err(ChatError::Config(
                        "identity secret: public half does not match seed".to_string(),
                    ));
                }
                seed
            }
            n => {
                return Err(ChatError::Config(format!(
                    "identity secret must be 32 or 64 bytes, got {}",
                    n
                )))
            }
        };

        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// The 32-byte seed, reused as the encryption secret in local mode.
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

#[async_trait]
impl TransactionSigner for LocalSigner {
    fn address(&self) -> Pubkey {
        Pubkey::new(self.signing_key.verifying_key().to_bytes())
    }

    async fn sign_transaction(
        &self,
        message: &[u8],
        _blockhash: &Blockhash,
    ) -> ChatResult<Vec<u8>> {
        let signature = Signature::new(self.signing_key.sign(message).to_bytes());
        Ok(tx::assemble_transaction(&[signature], message))
    }
}

/// Delegated signer: the process holds only the identity's public address.
pub struct ExternalSigner {
    address: Pubkey,
    callback: Arc<SignerCallback>,
}

impl ExternalSigner {
    /// Build from the wallet address and the signing callback.
    pub fn new(address: Pubkey, callback: Arc<SignerCallback>) -> Self {
        Self { address, callback }
    }
}

#[async_trait]
impl TransactionSigner for ExternalSigner {
    fn address(&self) -> Pubkey {
        self.address
    }

    async fn sign_transaction(
        &self,
        message: &[u8],
        blockhash: &Blockhash,
    ) -> ChatResult<Vec<u8>> {
        let unsigned = tx::unsigned_transaction(message);
        let signed = (self.callback)(unsigned, *blockhash, self.address)
            .await
            .map_err(|e| ChatError::Signing(format!("external signer failed: {}", e)))?;
        if signed.is_empty() {
            return Err(ChatError::Signing(
                "external signer returned empty transaction".to_string(),
            ));
        }
        Ok(signed)
    }
}
