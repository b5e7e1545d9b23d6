//! End-to-end messenger scenarios against an in-memory chain.
//!
//! `MockChain` executes submitted transactions the way the on-chain program
//! would: it verifies the fee-payer signature, applies registry writes to an
//! account map, and emits `Program data:` event lines for sends, which feed
//! both the paginated history path and live log subscriptions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signer as _, SigningKey, Verifier, VerifyingKey};
use tempfile::TempDir;
use tokio::sync::mpsc;

use solchat_core::error::{ChatError, ChatResult};
use solchat_core::rpc::{
    ChainRpc, LogNotification, LogSubscription, SignatureInfo, TransactionRecord, TxStatus,
};
use solchat_core::signer::SignerCallback;
use solchat_core::tx::assemble_transaction;
use solchat_core::wire::event::{encode_event, MessageSent};
use solchat_core::wire::instruction::{
    DEREGISTER_DISCRIMINATOR, REGISTER_DISCRIMINATOR, SEND_MESSAGE_DISCRIMINATOR,
    UPDATE_ENCRYPTION_KEY_DISCRIMINATOR,
};
use solchat_core::{
    Blockhash, Messenger, MessengerConfig, Pubkey, ReadOptions, Signature,
};

const GENESIS_TIME: i64 = 1_700_000_000;

// ─── transaction decoding ─────────────────────────────────────────────────

fn decode_compact(bytes: &[u8], mut cursor: usize) -> Option<(usize, usize)> {
    let mut value = 0usize;
    let mut shift = 0;
    loop {
        let byte = *bytes.get(cursor)?;
        cursor += 1;
        value |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            return Some((value, cursor));
        }
        shift += 7;
    }
}

struct ParsedInstruction {
    program: Pubkey,
    accounts: Vec<Pubkey>,
    data: Vec<u8>,
}

struct ParsedTransaction {
    instructions: Vec<ParsedInstruction>,
}

/// Decode a serialized v0 transaction and verify its fee-payer signature.
fn parse_and_verify(tx_bytes: &[u8]) -> Option<ParsedTransaction> {
    let (num_sigs, mut cursor) = decode_compact(tx_bytes, 0)?;
    if num_sigs != 1 {
        return None;
    }
    let signature: [u8; 64] = tx_bytes.get(cursor..cursor + 64)?.try_into().ok()?;
    cursor += 64;
    let message = tx_bytes.get(cursor..)?;

    // Version prefix + header
    if *message.first()? != 0x80 {
        return None;
    }
    let num_signers = *message.get(1)? as usize;
    if num_signers != 1 {
        return None;
    }

    let (num_keys, mut m) = decode_compact(message, 4)?;
    let mut keys = Vec::with_capacity(num_keys);
    for _ in 0..num_keys {
        keys.push(Pubkey::try_from_slice(message.get(m..m + 32)?).ok()?);
        m += 32;
    }
    m += 32; // blockhash

    let verifying = VerifyingKey::from_bytes(keys.first()?.as_bytes()).ok()?;
    verifying
        .verify(message, &ed25519_dalek::Signature::from_bytes(&signature))
        .ok()?;

    let (num_instructions, mut m) = decode_compact(message, m)?;
    let mut instructions = Vec::with_capacity(num_instructions);
    for _ in 0..num_instructions {
        let program = *keys.get(*message.get(m)? as usize)?;
        m += 1;
        let (num_accounts, m2) = decode_compact(message, m)?;
        m = m2;
        let mut accounts = Vec::with_capacity(num_accounts);
        for _ in 0..num_accounts {
            accounts.push(*keys.get(*message.get(m)? as usize)?);
            m += 1;
        }
        let (data_len, m2) = decode_compact(message, m)?;
        m = m2;
        let data = message.get(m..m + data_len)?.to_vec();
        m += data_len;
        instructions.push(ParsedInstruction {
            program,
            accounts,
            data,
        });
    }

    Some(ParsedTransaction { instructions })
}

// ─── the in-memory chain ──────────────────────────────────────────────────

struct TxEntry {
    signature: Signature,
    block_time: i64,
    logs: Vec<String>,
}

struct ChainState {
    accounts: HashMap<Pubkey, Vec<u8>>,
    /// Oldest first; queries walk it backwards
    transactions: Vec<TxEntry>,
    clock: i64,
    counter: u64,
}

struct MockChain {
    program_id: Pubkey,
    state: Mutex<ChainState>,
    subscribers: Mutex<Vec<mpsc::Sender<LogNotification>>>,
}

impl MockChain {
    fn new(program_id: Pubkey) -> Arc<Self> {
        Arc::new(Self {
            program_id,
            state: Mutex::new(ChainState {
                accounts: HashMap::new(),
                transactions: Vec::new(),
                clock: GENESIS_TIME,
                counter: 0,
            }),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    fn transaction_count(&self) -> usize {
        self.state.lock().unwrap().transactions.len()
    }

    fn registry_account(data: &[u8], owner: &Pubkey, now: i64, previous: Option<&[u8]>) -> Vec<u8> {
        let created = previous
            .map(|p| i64::from_le_bytes(p[72..80].try_into().unwrap()))
            .unwrap_or(now);
        let mut account = vec![0x0B; 8];
        account.extend_from_slice(owner.as_bytes());
        account.extend_from_slice(&data[8..40]);
        account.extend_from_slice(&created.to_le_bytes());
        account.extend_from_slice(&now.to_le_bytes());
        account
    }

    fn execute(&self, parsed: &ParsedTransaction) -> Result<Signature, String> {
        let mut state = self.state.lock().unwrap();
        let now = state.clock;
        let mut logs = vec![format!("Program {} invoke [1]", self.program_id)];

        for instruction in &parsed.instructions {
            if instruction.program != self.program_id {
                return Err("unknown program".to_string());
            }
            let disc: [u8; 8] = instruction.data[..8].try_into().unwrap();
            match disc {
                SEND_MESSAGE_DISCRIMINATOR => {
                    let data = &instruction.data;
                    let recipient = Pubkey::try_from_slice(&data[8..40]).unwrap();
                    let ct_len =
                        u32::from_le_bytes(data[40..44].try_into().unwrap()) as usize;
                    if ct_len == 0 || ct_len > 900 {
                        return Err("ciphertext bounds".to_string());
                    }
                    let ciphertext = data[44..44 + ct_len].to_vec();
                    let nonce: [u8; 24] =
                        data[44 + ct_len..44 + ct_len + 24].try_into().unwrap();
                    let event = MessageSent {
                        sender: instruction.accounts[0],
                        recipient,
                        ciphertext,
                        nonce,
                        timestamp: now,
                    };
                    logs.push("Program log: Instruction: SendMessage".to_string());
                    logs.push(format!(
                        "Program data: {}",
                        BASE64.encode(encode_event(&event))
                    ));
                }
                REGISTER_DISCRIMINATOR => {
                    let registry = instruction.accounts[0];
                    let owner = instruction.accounts[1];
                    if state.accounts.contains_key(&registry) {
                        return Err("registry already exists".to_string());
                    }
                    let account =
                        Self::registry_account(&instruction.data, &owner, now, None);
                    state.accounts.insert(registry, account);
                    logs.push("Program log: Instruction: Register".to_string());
                }
                UPDATE_ENCRYPTION_KEY_DISCRIMINATOR => {
                    let registry = instruction.accounts[0];
                    let owner = instruction.accounts[1];
                    let previous = state
                        .accounts
                        .get(&registry)
                        .ok_or("registry missing")?
                        .clone();
                    let account = Self::registry_account(
                        &instruction.data,
                        &owner,
                        now,
                        Some(&previous),
                    );
                    state.accounts.insert(registry, account);
                    logs.push("Program log: Instruction: UpdateEncryptionKey".to_string());
                }
                DEREGISTER_DISCRIMINATOR => {
                    let registry = instruction.accounts[0];
                    state.accounts.remove(&registry);
                    logs.push("Program log: Instruction: Deregister".to_string());
                }
                _ => return Err("unknown instruction".to_string()),
            }
        }

        logs.push(format!("Program {} success", self.program_id));

        state.counter += 1;
        let mut sig_bytes = [0u8; 64];
        sig_bytes[..8].copy_from_slice(&state.counter.to_le_bytes());
        let signature = Signature::new(sig_bytes);

        state.clock += 1;
        state.transactions.push(TxEntry {
            signature,
            block_time: now,
            logs: logs.clone(),
        });
        drop(state);

        let notification = LogNotification {
            signature,
            logs: logs.clone(),
            err: false,
        };
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|sender| sender.try_send(notification.clone()).is_ok());

        Ok(signature)
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn latest_blockhash(&self) -> ChatResult<Blockhash> {
        Ok(Blockhash::new([7u8; 32]))
    }

    async fn send_transaction(&self, tx_bytes: &[u8]) -> ChatResult<Signature> {
        let parsed = parse_and_verify(tx_bytes)
            .ok_or_else(|| ChatError::Rpc("malformed or unsigned transaction".to_string()))?;
        self.execute(&parsed).map_err(ChatError::Rpc)
    }

    async fn signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> ChatResult<Vec<Option<TxStatus>>> {
        let state = self.state.lock().unwrap();
        Ok(signatures
            .iter()
            .map(|sig| {
                state
                    .transactions
                    .iter()
                    .find(|t| t.signature == *sig)
                    .map(|_| TxStatus {
                        confirmation_status: Some("confirmed".to_string()),
                        err: false,
                    })
            })
            .collect())
    }

    async fn signatures_for_address(
        &self,
        _address: &Pubkey,
        before: Option<&Signature>,
        limit: usize,
    ) -> ChatResult<Vec<SignatureInfo>> {
        let state = self.state.lock().unwrap();
        let newest_first: Vec<&TxEntry> = state.transactions.iter().rev().collect();
        let start = match before {
            Some(before) => match newest_first.iter().position(|t| t.signature == *before) {
                Some(i) => i + 1,
                None => return Ok(Vec::new()),
            },
            None => 0,
        };
        Ok(newest_first
            .into_iter()
            .skip(start)
            .take(limit)
            .map(|t| SignatureInfo {
                signature: t.signature,
                block_time: Some(t.block_time),
                err: false,
            })
            .collect())
    }

    async fn transaction(&self, signature: &Signature) -> ChatResult<Option<TransactionRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .transactions
            .iter()
            .find(|t| t.signature == *signature)
            .map(|t| TransactionRecord {
                logs: t.logs.clone(),
                block_time: Some(t.block_time),
            }))
    }

    async fn account_data(&self, address: &Pubkey) -> ChatResult<Option<Vec<u8>>> {
        let state = self.state.lock().unwrap();
        Ok(state.accounts.get(address).cloned())
    }

    async fn subscribe_logs(&self, _mentions: &Pubkey) -> ChatResult<LogSubscription> {
        let (sender, receiver) = mpsc::channel(64);
        self.subscribers.lock().unwrap().push(sender);
        Ok(LogSubscription::new(receiver, None))
    }
}

// ─── fixtures ─────────────────────────────────────────────────────────────

fn program_id() -> Pubkey {
    Pubkey::new([200u8; 32])
}

fn identity_pubkey(seed: [u8; 32]) -> Pubkey {
    Pubkey::new(SigningKey::from_bytes(&seed).verifying_key().to_bytes())
}

/// A local-mode messenger with its own key directory on the shared chain.
fn local_messenger(chain: &Arc<MockChain>, seed: [u8; 32], keys_dir: &TempDir) -> Messenger {
    let config = MessengerConfig::local("http://localhost:8899", seed.to_vec())
        .with_program_id(program_id())
        .with_keys_dir(keys_dir.path());
    Messenger::with_rpc(config, chain.clone() as Arc<dyn ChainRpc>).unwrap()
}

// ─── scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn self_loop_standalone() {
    let chain = MockChain::new(program_id());
    let keys = TempDir::new().unwrap();
    let mut me = local_messenger(&chain, [11u8; 32], &keys);

    let outcome = me.init().await.unwrap();
    assert!(outcome.wrote);

    let my_address = me.identity();
    let signatures = me.send(&my_address, "gm", None).await.unwrap();
    assert_eq!(signatures.len(), 1);

    let messages = me
        .read(ReadOptions {
            limit: 10,
            since: None,
        })
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "gm");
    assert_eq!(messages[0].sender, my_address);
    assert_eq!(messages[0].recipient, my_address);
    assert_eq!(messages[0].signatures.len(), 1);
    assert_eq!(messages[0].signatures, signatures);
}

#[tokio::test]
async fn chunked_1500_byte_message() {
    let chain = MockChain::new(program_id());
    let sender_keys = TempDir::new().unwrap();
    let recipient_keys = TempDir::new().unwrap();
    let mut sender = local_messenger(&chain, [21u8; 32], &sender_keys);
    let mut recipient = local_messenger(&chain, [22u8; 32], &recipient_keys);

    sender.init().await.unwrap();
    recipient.init().await.unwrap();

    let text: String = "abcde".repeat(300); // 1500 bytes
    let signatures = sender
        .send(&recipient.identity(), &text, None)
        .await
        .unwrap();
    assert_eq!(signatures.len(), 3);

    let messages = recipient.read(ReadOptions::default()).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, text);
    assert_eq!(messages[0].signatures.len(), 3);
    assert_eq!(messages[0].signatures, signatures);
}

#[tokio::test]
async fn unregistered_recipient_via_identity_key() {
    let chain = MockChain::new(program_id());
    let sender_keys = TempDir::new().unwrap();
    let recipient_keys = TempDir::new().unwrap();
    let mut sender = local_messenger(&chain, [31u8; 32], &sender_keys);
    // Recipient never calls init: no registry entry, no encryption keypair
    let recipient = local_messenger(&chain, [32u8; 32], &recipient_keys);

    sender.init().await.unwrap();
    assert!(sender
        .lookup_encryption_key(&recipient.identity())
        .await
        .is_none());

    sender
        .send(&recipient.identity(), "hi", None)
        .await
        .unwrap();

    // The recipient decrypts with its identity secret
    let messages = recipient.read(ReadOptions::default()).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "hi");
    assert_eq!(messages[0].sender, sender.identity());
}

#[tokio::test]
async fn rotate_encryption_key() {
    let chain = MockChain::new(program_id());
    let my_keys = TempDir::new().unwrap();
    let peer_keys = TempDir::new().unwrap();
    let mut me = local_messenger(&chain, [41u8; 32], &my_keys);
    let mut peer = local_messenger(&chain, [42u8; 32], &peer_keys);

    let outcome = me.init().await.unwrap();
    let k1 = outcome.encryption_key;
    peer.init().await.unwrap();

    // A message encrypted to K1 lands before the rotation
    peer.send(&me.identity(), "pre-rotation", None).await.unwrap();

    let k2 = Pubkey::new([0x55; 32]);
    me.update(k2).await.unwrap();
    assert_eq!(me.lookup_encryption_key(&me.identity()).await, Some(k2));
    assert_ne!(k1, k2);

    // The old encryption private key is still held locally, so the
    // pre-rotation message must still decrypt
    let messages = me.read(ReadOptions::default()).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "pre-rotation");
}

#[tokio::test]
async fn deregister_cleanup() {
    let chain = MockChain::new(program_id());
    let keys = TempDir::new().unwrap();
    let mut me = local_messenger(&chain, [51u8; 32], &keys);

    me.init().await.unwrap();
    assert!(me.lookup_encryption_key(&me.identity()).await.is_some());

    me.deregister().await.unwrap();
    assert!(me.lookup_encryption_key(&me.identity()).await.is_none());
}

#[tokio::test]
async fn live_and_history_converge() {
    let chain = MockChain::new(program_id());
    let sender_keys = TempDir::new().unwrap();
    let recipient_keys = TempDir::new().unwrap();
    let mut sender = local_messenger(&chain, [61u8; 32], &sender_keys);
    let mut recipient = local_messenger(&chain, [62u8; 32], &recipient_keys);

    sender.init().await.unwrap();
    recipient.init().await.unwrap();

    // Listener opens before the send
    let (delivered_tx, mut delivered_rx) = mpsc::channel(8);
    let handle = recipient
        .listen(move |message| {
            let _ = delivered_tx.try_send(message);
        })
        .await
        .unwrap();

    let text = "x".repeat(700); // two chunks
    sender.send(&recipient.identity(), &text, None).await.unwrap();

    let live = tokio::time::timeout(Duration::from_secs(5), delivered_rx.recv())
        .await
        .expect("listener delivered nothing")
        .unwrap();
    handle.stop().await;

    let history = recipient.read(ReadOptions::default()).await.unwrap();
    assert_eq!(history.len(), 1);
    let from_history = &history[0];

    assert_eq!(live.text, from_history.text);
    assert_eq!(live.message_id, from_history.message_id);
    assert_eq!(live.timestamp, from_history.timestamp);
    assert_eq!(live.signatures, from_history.signatures);
}

// ─── further flows ────────────────────────────────────────────────────────

#[tokio::test]
async fn init_is_idempotent() {
    let chain = MockChain::new(program_id());
    let keys = TempDir::new().unwrap();

    let mut first = local_messenger(&chain, [71u8; 32], &keys);
    let outcome = first.init().await.unwrap();
    assert!(outcome.wrote);
    let writes_after_first = chain.transaction_count();

    // Fresh messenger, same key directory: load, no write
    let mut second = local_messenger(&chain, [71u8; 32], &keys);
    let outcome = second.init().await.unwrap();
    assert!(!outcome.wrote);
    assert_eq!(outcome.encryption_key, first.init().await.unwrap().encryption_key);
    assert_eq!(chain.transaction_count(), writes_after_first);
}

#[tokio::test]
async fn read_respects_limit_and_order() {
    let chain = MockChain::new(program_id());
    let keys = TempDir::new().unwrap();
    let mut me = local_messenger(&chain, [81u8; 32], &keys);
    me.init().await.unwrap();
    let my_address = me.identity();

    for text in ["one", "two", "three"] {
        me.send(&my_address, text, None).await.unwrap();
    }

    let all = me.read(ReadOptions::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    // Ascending by block-assigned timestamp
    assert_eq!(
        all.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(),
        vec!["one", "two", "three"]
    );
    assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    // A limit keeps the newest events
    let limited = me
        .read(ReadOptions {
            limit: 2,
            since: None,
        })
        .await
        .unwrap();
    assert_eq!(
        limited.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(),
        vec!["two", "three"]
    );
}

#[tokio::test]
async fn read_since_filters_old_messages() {
    let chain = MockChain::new(program_id());
    let keys = TempDir::new().unwrap();
    let mut me = local_messenger(&chain, [91u8; 32], &keys);
    me.init().await.unwrap();
    let my_address = me.identity();

    me.send(&my_address, "old", None).await.unwrap();
    me.send(&my_address, "new", None).await.unwrap();

    let all = me.read(ReadOptions::default()).await.unwrap();
    let cutoff = all.iter().find(|m| m.text == "new").unwrap().timestamp;

    let recent = me
        .read(ReadOptions {
            since: Some(cutoff),
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].text, "new");
}

#[tokio::test]
async fn explicit_encryption_key_wins() {
    let chain = MockChain::new(program_id());
    let sender_keys = TempDir::new().unwrap();
    let recipient_keys = TempDir::new().unwrap();
    let mut sender = local_messenger(&chain, [101u8; 32], &sender_keys);
    let mut recipient = local_messenger(&chain, [102u8; 32], &recipient_keys);

    sender.init().await.unwrap();
    let outcome = recipient.init().await.unwrap();

    // Pass the recipient's published key explicitly; decryption still works
    sender
        .send(&recipient.identity(), "direct", Some(outcome.encryption_key))
        .await
        .unwrap();

    let messages = recipient.read(ReadOptions::default()).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "direct");
}

#[tokio::test]
async fn external_signer_full_flow() {
    let chain = MockChain::new(program_id());
    let keys = TempDir::new().unwrap();

    // The custodial service holds the identity secret; the messenger
    // process never sees it
    let custodial_seed = [111u8; 32];
    let wallet = identity_pubkey(custodial_seed);
    let callback: Arc<SignerCallback> = Arc::new(move |unsigned, _blockhash, _fee_payer| {
        Box::pin(async move {
            let signing = SigningKey::from_bytes(&custodial_seed);
            // unsigned = compact count (1) ‖ zeroed signature ‖ message
            let message = &unsigned[65..];
            let signature = Signature::new(signing.sign(message).to_bytes());
            Ok(assemble_transaction(&[signature], message))
        })
    });

    let config = MessengerConfig::external("http://localhost:8899", wallet, callback)
        .with_program_id(program_id())
        .with_keys_dir(keys.path());
    let mut me = Messenger::with_rpc(config, chain.clone() as Arc<dyn ChainRpc>).unwrap();

    // Sending before init has no encryption secret available
    let premature = me.send(&wallet, "too early", None).await;
    assert!(premature.is_err());

    // init registers the local encryption key through the delegated signer;
    // the mock verifies the custodial signature on every transaction
    let outcome = me.init().await.unwrap();
    assert!(outcome.wrote);
    assert_eq!(
        me.lookup_encryption_key(&wallet).await,
        Some(outcome.encryption_key)
    );

    // Outgoing traffic is sealed with the local encryption secret (the
    // identity secret never enters this process)
    let signatures = me.send(&wallet, "custodial gm", None).await.unwrap();
    assert_eq!(signatures.len(), 1);
    assert_eq!(chain.transaction_count(), 2);
}

#[tokio::test]
async fn listener_stops_delivering_after_stop() {
    let chain = MockChain::new(program_id());
    let sender_keys = TempDir::new().unwrap();
    let recipient_keys = TempDir::new().unwrap();
    let mut sender = local_messenger(&chain, [121u8; 32], &sender_keys);
    let mut recipient = local_messenger(&chain, [122u8; 32], &recipient_keys);

    sender.init().await.unwrap();
    recipient.init().await.unwrap();

    let (delivered_tx, mut delivered_rx) = mpsc::channel(8);
    let handle = recipient
        .listen(move |message| {
            let _ = delivered_tx.try_send(message);
        })
        .await
        .unwrap();
    handle.stop().await;

    sender
        .send(&recipient.identity(), "after stop", None)
        .await
        .unwrap();

    // The callback channel must stay empty: its sender was dropped with
    // the aborted task, so recv resolves to None rather than hanging
    assert!(delivered_rx.recv().await.is_none());
}
