//! The messenger: orchestrates identity setup, registry writes, sending,
//! and both receive paths over the chain gateway.
//!
//! # Example
//!
//! ```ignore
//! use solchat_core::{Messenger, MessengerConfig, ReadOptions};
//!
//! let config = MessengerConfig::local("https://api.mainnet-beta.solana.com", secret_bytes);
//! let mut messenger = Messenger::new(config)?;
//!
//! messenger.init().await?;
//! messenger.send(&friend, "gm", None).await?;
//!
//! for message in messenger.read(ReadOptions::default()).await? {
//!     println!("{}: {}", message.sender, message.text);
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::crypto;
use crate::error::{ChatError, ChatResult};
use crate::frame::{self, Frame, Reassembler};
use crate::keystore::{self, EncryptionKeypair};
use crate::pda;
use crate::rpc::{ChainRpc, HttpRpc, SignatureInfo};
use crate::signer::{ExternalSigner, LocalSigner, SignerCallback, TransactionSigner};
use crate::types::{ChatMessage, Pubkey, ReadOptions, Signature};
use crate::wire::event::MessageSent;
use crate::wire::instruction::{self, SendLayout};
use crate::wire::registry::RegistryEntry;
use crate::{tx, wire};

/// Library-provided mainnet program id
pub const DEFAULT_PROGRAM_ID: &str = "msg1jhfewu1hGDnQKGhXDmqas6JZTq7Lg7PbSX5jY9y";

/// Maximum confirmation status polls per submitted transaction
const CONFIRMATION_POLLS: u32 = 30;

/// Delay between confirmation polls
const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Page size when walking signatures-for-address backwards
const SIGNATURE_PAGE_LIMIT: usize = 1000;

/// Stop collecting signatures at `limit × FETCH_HEADROOM` (headroom for
/// traffic addressed to other parties)
const FETCH_HEADROOM: usize = 10;

/// Bounded concurrency for history transaction fetches
const MAX_CONCURRENT_FETCHES: usize = 20;

/// How transactions get signed: the identity secret in-process, or a
/// delegated callback holding only the public address. Exactly one applies;
/// the enum makes mixed or missing modes unrepresentable.
pub enum SigningMode {
    /// Self-custody: the identity secret lives in this process
    Local {
        /// Identity secret bytes (32-byte seed or 64-byte seed‖public)
        identity_secret: Vec<u8>,
    },
    /// Custodial: transactions are signed by an external service
    External {
        /// The identity's public address
        wallet_address: Pubkey,
        /// Delegated signing callback
        signer_callback: Arc<SignerCallback>,
    },
}

/// Which `send_message` account layout the deployed program expects.
/// Selecting the wrong one is a configuration error; the client never
/// guesses at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramVersion {
    /// Minimal layout: `[sender]`
    Basic,
    /// Fee-collecting layout with platform accounts
    FeeEnabled {
        /// Platform config account
        config: Pubkey,
        /// Fee vault account
        fee_vault: Pubkey,
    },
}

/// Construction options for [`Messenger`].
pub struct MessengerConfig {
    /// HTTP RPC endpoint (required)
    pub rpc_url: String,
    /// WebSocket endpoint; derived from `rpc_url` when `None`
    pub ws_url: Option<String>,
    /// On-chain program id
    pub program_id: Pubkey,
    /// Encryption key storage directory; defaults to
    /// `<home>/.solana-messenger/keys`
    pub keys_dir: Option<PathBuf>,
    /// Deployed program's send layout
    pub program_version: ProgramVersion,
    /// Signing strategy
    pub signing: SigningMode,
}

impl MessengerConfig {
    fn base(rpc_url: impl Into<String>, signing: SigningMode) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            ws_url: None,
            program_id: DEFAULT_PROGRAM_ID
                .parse()
                .expect("default program id is valid base58"),
            keys_dir: None,
            program_version: ProgramVersion::Basic,
            signing,
        }
    }

    /// Self-custody configuration: the identity secret stays in-process.
    pub fn local(rpc_url: impl Into<String>, identity_secret: impl Into<Vec<u8>>) -> Self {
        Self::base(
            rpc_url,
            SigningMode::Local {
                identity_secret: identity_secret.into(),
            },
        )
    }

    /// External-signer configuration: the identity key is held elsewhere.
    pub fn external(
        rpc_url: impl Into<String>,
        wallet_address: Pubkey,
        signer_callback: Arc<SignerCallback>,
    ) -> Self {
        Self::base(
            rpc_url,
            SigningMode::External {
                wallet_address,
                signer_callback,
            },
        )
    }

    /// Override the program id.
    pub fn with_program_id(mut self, program_id: Pubkey) -> Self {
        self.program_id = program_id;
        self
    }

    /// Override the WebSocket endpoint.
    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = Some(ws_url.into());
        self
    }

    /// Override the encryption key storage directory.
    pub fn with_keys_dir(mut self, keys_dir: impl Into<PathBuf>) -> Self {
        self.keys_dir = Some(keys_dir.into());
        self
    }

    /// Target a fee-collecting program deployment.
    pub fn with_program_version(mut self, version: ProgramVersion) -> Self {
        self.program_version = version;
        self
    }
}

/// Outcome of [`Messenger::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    /// The local encryption public key now bound to the identity
    pub encryption_key: Pubkey,
    /// Whether an on-chain write (register or update) was needed
    pub wrote: bool,
}

/// Handle returned by [`Messenger::listen`]. Stopping it cancels the
/// subscription and any in-flight decoding; dropping it has the same
/// effect without waiting for the task to wind down.
pub struct ListenHandle {
    task: Option<JoinHandle<()>>,
}

impl ListenHandle {
    /// Cancel the listen session. No callbacks fire after this returns.
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    /// Whether the background session has ended on its own.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for ListenHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Key material available for decrypting incoming events: the local
/// encryption seed (primary) and, in local-signer mode, the identity seed
/// (fallback for traffic encrypted to the raw identity key).
#[derive(Clone, Copy)]
struct DecryptKeys {
    encryption_seed: Option<[u8; 32]>,
    identity_seed: Option<[u8; 32]>,
}

impl DecryptKeys {
    fn decrypt(&self, event: &MessageSent) -> Option<Vec<u8>> {
        if let Some(seed) = &self.encryption_seed {
            if let Some(plaintext) =
                crypto::open(&event.ciphertext, &event.nonce, event.sender.as_bytes(), seed)
            {
                return Some(plaintext);
            }
        }
        if let Some(seed) = &self.identity_seed {
            return crypto::open(&event.ciphertext, &event.nonce, event.sender.as_bytes(), seed);
        }
        None
    }
}

/// Client for encrypted peer-to-peer messaging over the chain.
pub struct Messenger {
    identity: Pubkey,
    program_id: Pubkey,
    program_version: ProgramVersion,
    keys_dir: PathBuf,
    rpc: Arc<dyn ChainRpc>,
    signer: Arc<dyn TransactionSigner>,
    /// Present in local-signer mode only; never handed to the signer seam
    identity_seed: Option<[u8; 32]>,
    /// Loaded by `init`; the private half never leaves the process
    encryption: Option<EncryptionKeypair>,
}

impl Messenger {
    /// Build a messenger over the configured HTTP/WebSocket endpoints.
    pub fn new(config: MessengerConfig) -> ChatResult<Self> {
        if config.rpc_url.is_empty() {
            return Err(ChatError::Config("rpc_url is required".to_string()));
        }
        let rpc = Arc::new(HttpRpc::new(&config.rpc_url, config.ws_url.clone())?);
        Self::with_rpc(config, rpc)
    }

    /// Build a messenger over any [`ChainRpc`] implementation. Useful for
    /// in-memory gateways in tests and custom transports.
    pub fn with_rpc(config: MessengerConfig, rpc: Arc<dyn ChainRpc>) -> ChatResult<Self> {
        let (signer, identity_seed): (Arc<dyn TransactionSigner>, Option<[u8; 32]>) =
            match &config.signing {
                SigningMode::Local { identity_secret } => {
                    let local = LocalSigner::from_secret_bytes(identity_secret)?;
                    let seed = local.seed();
                    (Arc::new(local), Some(seed))
                }
                SigningMode::External {
                    wallet_address,
                    signer_callback,
                } => (
                    Arc::new(ExternalSigner::new(
                        *wallet_address,
                        Arc::clone(signer_callback),
                    )),
                    None,
                ),
            };

        let identity = signer.address();
        info!(identity = %identity, program = %config.program_id, "messenger created");

        Ok(Self {
            identity,
            program_id: config.program_id,
            program_version: config.program_version,
            keys_dir: config.keys_dir.unwrap_or_else(keystore::default_keys_dir),
            rpc,
            signer,
            identity_seed,
            encryption: None,
        })
    }

    /// The identity address this messenger signs and receives as.
    pub fn identity(&self) -> Pubkey {
        self.identity
    }

    /// Load (or generate) the local encryption keypair and reconcile it
    /// with the on-chain registry. Idempotent: a second call with the same
    /// key file performs no further writes.
    pub async fn init(&mut self) -> ChatResult<InitOutcome> {
        let loaded = keystore::load_or_generate(&self.identity, &self.keys_dir)?;
        let local_key = loaded.keypair.public();

        let wrote = match self.lookup_encryption_key(&self.identity).await {
            Some(on_chain) if on_chain == local_key => {
                debug!(key = %local_key, "registry already current");
                false
            }
            None => {
                info!(key = %local_key, "registering encryption key");
                self.register(local_key).await?;
                true
            }
            Some(stale) => {
                info!(old = %stale, new = %local_key, "updating encryption key");
                self.update(local_key).await?;
                true
            }
        };

        self.encryption = Some(loaded.keypair);
        Ok(InitOutcome {
            encryption_key: local_key,
            wrote,
        })
    }

    /// Publish `encryption_key` in a fresh registry entry.
    pub async fn register(&self, encryption_key: Pubkey) -> ChatResult<Signature> {
        let (registry, _) = pda::find_registry_address(&self.identity, &self.program_id)?;
        let instruction =
            instruction::register(&self.program_id, &self.identity, &registry, &encryption_key);
        self.submit(instruction).await
    }

    /// Replace the registry entry's encryption key.
    pub async fn update(&self, new_encryption_key: Pubkey) -> ChatResult<Signature> {
        let (registry, _) = pda::find_registry_address(&self.identity, &self.program_id)?;
        let instruction = instruction::update_encryption_key(
            &self.program_id,
            &self.identity,
            &registry,
            &new_encryption_key,
        );
        self.submit(instruction).await
    }

    /// Close the registry entry, invalidating the published key.
    pub async fn deregister(&self) -> ChatResult<Signature> {
        let (registry, _) = pda::find_registry_address(&self.identity, &self.program_id)?;
        let instruction = instruction::deregister(&self.program_id, &self.identity, &registry);
        self.submit(instruction).await
    }

    /// Fetch and parse an identity's registry entry. Absent accounts AND
    /// transport failures both yield `None`: lookups are cheap and
    /// non-throwing by contract.
    pub async fn lookup_registry(&self, identity: &Pubkey) -> Option<RegistryEntry> {
        let (registry, _) = pda::find_registry_address(identity, &self.program_id).ok()?;
        let data = self.rpc.account_data(&registry).await.ok()??;
        wire::registry::parse_registry_account(&data).ok()
    }

    /// The encryption key an identity has published, if any.
    pub async fn lookup_encryption_key(&self, identity: &Pubkey) -> Option<Pubkey> {
        self.lookup_registry(identity)
            .await
            .map(|entry| entry.encryption_key)
    }

    /// Encrypt `text` to `recipient` and submit it, one transaction per
    /// chunk. Returns the signatures in chunk order.
    ///
    /// Key resolution: an explicit `encryption_key` wins; otherwise the
    /// recipient's registry entry (once this messenger is initialized),
    /// falling back to the recipient's raw identity key so unregistered
    /// recipients stay reachable.
    ///
    /// # Errors
    ///
    /// A chunk failure aborts the remainder and surfaces
    /// [`ChatError::PartialSend`] carrying the landed signatures.
    pub async fn send(
        &self,
        recipient: &Pubkey,
        text: &str,
        encryption_key: Option<Pubkey>,
    ) -> ChatResult<Vec<Signature>> {
        let recipient_key = match encryption_key {
            Some(key) => key,
            None if self.encryption.is_some() => self
                .lookup_encryption_key(recipient)
                .await
                .unwrap_or(*recipient),
            None => *recipient,
        };

        let sender_seed = self.sending_seed()?;
        let frames = frame::encode(text)?;
        info!(recipient = %recipient, chunks = frames.len(), "sending message");

        let mut signatures = Vec::with_capacity(frames.len());
        for (index, chunk) in frames.iter().enumerate() {
            match self
                .send_chunk(chunk, recipient, &recipient_key, &sender_seed)
                .await
            {
                Ok(signature) => signatures.push(signature),
                Err(e) => {
                    return Err(ChatError::PartialSend {
                        sent: signatures,
                        failed_index: index,
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(signatures)
    }

    /// Read historical messages addressed to this identity.
    pub async fn read(&self, options: ReadOptions) -> ChatResult<Vec<ChatMessage>> {
        let limit = options.limit;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let infos = self.collect_signatures(&options).await?;
        debug!(candidates = infos.len(), "fetching history transactions");

        // Fetch transactions with bounded concurrency, preserving query order
        let rpc = Arc::clone(&self.rpc);
        let mut fetches = futures_util::stream::iter(infos.into_iter().map(move |info| {
            let rpc = Arc::clone(&rpc);
            async move {
                let record = rpc.transaction(&info.signature).await;
                (info.signature, record)
            }
        }))
        .buffered(MAX_CONCURRENT_FETCHES);

        let mut events: Vec<(MessageSent, Signature)> = Vec::new();
        while let Some((signature, result)) = fetches.next().await {
            let Some(record) = result? else { continue };
            for event in wire::event::parse_events(&record.logs) {
                if event.recipient == self.identity {
                    events.push((event, signature));
                }
            }
            if events.len() >= limit {
                break;
            }
        }
        drop(fetches);

        // Decrypt, decode, reassemble
        let keys = self.decrypt_keys();
        let mut reassembler = Reassembler::new();
        let mut messages = Vec::new();
        for (event, signature) in events {
            let Some(plaintext) = keys.decrypt(&event) else {
                continue;
            };
            let Ok(decoded) = Frame::parse(&plaintext) else {
                continue;
            };
            if let Some(message) = reassembler.insert(
                event.sender,
                event.recipient,
                decoded,
                signature,
                event.timestamp,
            ) {
                messages.push(message);
            }
        }

        messages.sort_by_key(|m| m.timestamp);
        messages.truncate(limit);
        Ok(messages)
    }

    /// Subscribe to live messages addressed to this identity. `callback`
    /// fires once per fully reassembled message. Per-event failures
    /// (foreign traffic, malformed frames) are swallowed to preserve
    /// liveness; a subscription-level failure ends the session.
    pub async fn listen<F>(&self, callback: F) -> ChatResult<ListenHandle>
    where
        F: Fn(ChatMessage) + Send + Sync + 'static,
    {
        let mut subscription = self.rpc.subscribe_logs(&self.program_id).await?;
        let me = self.identity;
        let keys = self.decrypt_keys();
        info!(program = %self.program_id, "listening for live messages");

        let task = tokio::spawn(async move {
            let mut reassembler = Reassembler::new();
            while let Some(notification) = subscription.recv().await {
                if notification.err {
                    continue;
                }
                for event in wire::event::parse_events(&notification.logs) {
                    if event.recipient != me {
                        continue;
                    }
                    let Some(plaintext) = keys.decrypt(&event) else {
                        continue;
                    };
                    let Ok(decoded) = Frame::parse(&plaintext) else {
                        continue;
                    };
                    if let Some(message) = reassembler.insert(
                        event.sender,
                        event.recipient,
                        decoded,
                        notification.signature,
                        event.timestamp,
                    ) {
                        callback(message);
                    }
                }
            }
            debug!("listen session ended");
        });

        Ok(ListenHandle { task: Some(task) })
    }

    // ─── internals ───────────────────────────────────────────────────────

    fn decrypt_keys(&self) -> DecryptKeys {
        DecryptKeys {
            encryption_seed: self.encryption.as_ref().map(|k| k.seed()),
            identity_seed: self.identity_seed,
        }
    }

    /// The secret this messenger encrypts outgoing traffic with: the
    /// identity seed in local mode (one key, one artefact on disk), the
    /// local encryption seed in external-signer mode.
    fn sending_seed(&self) -> ChatResult<[u8; 32]> {
        if let Some(seed) = self.identity_seed {
            return Ok(seed);
        }
        self.encryption
            .as_ref()
            .map(|keys| keys.seed())
            .ok_or(ChatError::NotInitialized)
    }

    fn send_layout(&self, recipient: &Pubkey) -> ChatResult<SendLayout> {
        match &self.program_version {
            ProgramVersion::Basic => Ok(SendLayout::Basic),
            ProgramVersion::FeeEnabled { config, fee_vault } => {
                let (recipient_registry, _) =
                    pda::find_registry_address(recipient, &self.program_id)?;
                Ok(SendLayout::FeeEnabled {
                    config: *config,
                    fee_vault: *fee_vault,
                    recipient_registry,
                })
            }
        }
    }

    async fn send_chunk(
        &self,
        chunk: &Frame,
        recipient: &Pubkey,
        recipient_key: &Pubkey,
        sender_seed: &[u8; 32],
    ) -> ChatResult<Signature> {
        let (ciphertext, nonce) =
            crypto::seal(&chunk.to_bytes(), sender_seed, recipient_key.as_bytes())?;
        let layout = self.send_layout(recipient)?;
        let instruction = instruction::send_message(
            &self.program_id,
            &self.identity,
            recipient,
            &ciphertext,
            &nonce,
            &layout,
        )?;
        self.submit(instruction).await
    }

    async fn submit(&self, instruction: wire::Instruction) -> ChatResult<Signature> {
        let blockhash = self.rpc.latest_blockhash().await?;
        let message = tx::compile_message(&self.identity, &blockhash, &[instruction])?;
        let tx_bytes = self.signer.sign_transaction(&message, &blockhash).await?;
        let signature = self.rpc.send_transaction(&tx_bytes).await?;
        self.confirm(&signature).await?;
        Ok(signature)
    }

    async fn confirm(&self, signature: &Signature) -> ChatResult<()> {
        for poll in 0..CONFIRMATION_POLLS {
            let statuses = self.rpc.signature_statuses(&[*signature]).await?;
            if let Some(Some(status)) = statuses.first() {
                if status.err {
                    return Err(ChatError::Rpc(format!(
                        "transaction {} failed on chain",
                        signature
                    )));
                }
                if status.is_confirmed() {
                    debug!(signature = %signature, polls = poll + 1, "transaction confirmed");
                    return Ok(());
                }
            }
            tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await;
        }

        warn!(signature = %signature, "confirmation timed out");
        Err(ChatError::ConfirmationTimeout {
            signature: *signature,
            polls: CONFIRMATION_POLLS,
        })
    }

    /// Walk signatures-for-address backwards, keeping successful entries
    /// that pass the `since` filter, until a short page ends the history or
    /// enough candidates are held.
    async fn collect_signatures(&self, options: &ReadOptions) -> ChatResult<Vec<SignatureInfo>> {
        let target = options.limit.saturating_mul(FETCH_HEADROOM);
        let mut collected: Vec<SignatureInfo> = Vec::new();
        let mut before: Option<Signature> = None;

        loop {
            let batch = self
                .rpc
                .signatures_for_address(&self.program_id, before.as_ref(), SIGNATURE_PAGE_LIMIT)
                .await?;
            let Some(last) = batch.last() else { break };
            before = Some(last.signature);
            let full_page = batch.len() == SIGNATURE_PAGE_LIMIT;

            for info in batch {
                if info.err {
                    continue;
                }
                if let (Some(since), Some(block_time)) = (options.since, info.block_time) {
                    if block_time < since {
                        continue;
                    }
                }
                collected.push(info);
            }

            if collected.len() >= target || !full_page {
                break;
            }
        }

        Ok(collected)
    }
}
