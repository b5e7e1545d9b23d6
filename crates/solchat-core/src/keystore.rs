//! Local encryption keypair persistence.
//!
//! Each identity gets one JSON key file under the keys directory:
//! `{ "publicKey": [32 bytes], "secretKey": [64 bytes] }`, filename
//! `<identity-base58>.json`. The secret half never leaves the process and
//! is zeroized when dropped.

use std::fs;
use std::path::{Path, PathBuf};

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ChatError, ChatResult};
use crate::types::Pubkey;

/// An Ed25519 keypair used (after X25519 conversion) for message encryption.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKeypair {
    public: [u8; 32],
    /// 64-byte secret: seed ‖ public
    secret: [u8; 64],
}

impl EncryptionKeypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> ChatResult<Self> {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed)
            .map_err(|e| ChatError::Crypto(format!("key generation failed: {}", e)))?;
        let signing = SigningKey::from_bytes(&seed);
        let public = signing.verifying_key().to_bytes();

        let mut secret = [0u8; 64];
        secret[..32].copy_from_slice(&seed);
        secret[32..].copy_from_slice(&public);
        seed.zeroize();

        Ok(Self { public, secret })
    }

    /// Reconstruct from persisted halves, checking internal consistency.
    fn from_parts(public: [u8; 32], secret: [u8; 64]) -> ChatResult<Self> {
        let seed: [u8; 32] = secret[..32]
            .try_into()
            .map_err(|_| ChatError::KeyStore("secret key truncated".to_string()))?;
        let derived = SigningKey::from_bytes(&seed).verifying_key().to_bytes();
        if derived != public {
            return Err(ChatError::KeyStore(
                "public key does not match secret key".to_string(),
            ));
        }
        Ok(Self { public, secret })
    }

    /// The public half.
    pub fn public(&self) -> Pubkey {
        Pubkey::new(self.public)
    }

    /// The 32-byte Ed25519 seed, input to the X25519 conversion.
    pub fn seed(&self) -> [u8; 32] {
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&self.secret[..32]);
        seed
    }
}

#[derive(Serialize, Deserialize)]
struct KeyFile {
    #[serde(rename = "publicKey")]
    public_key: Vec<u8>,
    #[serde(rename = "secretKey")]
    secret_key: Vec<u8>,
}

/// Result of [`load_or_generate`].
pub struct LoadedKeys {
    /// The encryption keypair, freshly generated or loaded from disk
    pub keypair: EncryptionKeypair,
    /// Path of the backing key file
    pub path: PathBuf,
    /// Whether a new keypair was generated (false when loaded)
    pub was_generated: bool,
}

/// Default keys directory: `<home>/.solana-messenger/keys`.
pub fn default_keys_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".solana-messenger")
        .join("keys")
}

/// Load the identity's encryption keypair from `keys_dir`, generating and
/// persisting a fresh one if no key file exists yet.
///
/// The directory is created recursively on first use; the file is written
/// atomically (temp file + rename). Key files are per-identity and never
/// shared.
pub fn load_or_generate(identity: &Pubkey, keys_dir: &Path) -> ChatResult<LoadedKeys> {
    let path = keys_dir.join(format!("{}.json", identity));

    if path.exists() {
        let keypair = load(&path)?;
        debug!(path = %path.display(), "loaded encryption keypair");
        return Ok(LoadedKeys {
            keypair,
            path,
            was_generated: false,
        });
    }

    fs::create_dir_all(keys_dir)?;
    let keypair = EncryptionKeypair::generate()?;
    write_atomic(&path, &keypair)?;
    info!(identity = %identity, path = %path.display(), "generated encryption keypair");

    Ok(LoadedKeys {
        keypair,
        path,
        was_generated: true,
    })
}

fn load(path: &Path) -> ChatResult<EncryptionKeypair> {
    let raw = fs::read_to_string(path)?;
    let file: KeyFile = serde_json::from_str(&raw)
        .map_err(|e| ChatError::KeyStore(format!("malformed key file: {}", e)))?;

    let public: [u8; 32] = file
        .public_key
        .as_slice()
        .try_into()
        .map_err(|_| ChatError::KeyStore("publicKey is not 32 bytes".to_string()))?;
    let secret: [u8; 64] = file
        .secret_key
        .as_slice()
        .try_into()
        .map_err(|_| ChatError::KeyStore("secretKey is not 64 bytes".to_string()))?;

    EncryptionKeypair::from_parts(public, secret)
}

fn write_atomic(path: &Path, keypair: &EncryptionKeypair) -> ChatResult<()> {
    let file = KeyFile {
        public_key: keypair.public.to_vec(),
        secret_key: keypair.secret.to_vec(),
    };
    let json = serde_json::to_string(&file)
        .map_err(|e| ChatError::Serialization(format!("key file: {}", e)))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
