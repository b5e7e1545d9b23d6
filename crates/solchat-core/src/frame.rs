//! Message framing and chunk reassembly.
//!
//! A frame is the plaintext unit that gets encrypted into one transaction's
//! payload. Wire format:
//!
//! ```text
//! +----------+----------------+-------------------+--------------------+---------+
//! | FLAGS 1B | MESSAGE_ID 8B  | CHUNK_INDEX 2B BE | TOTAL_CHUNKS 2B BE | PAYLOAD |
//! +----------+----------------+-------------------+--------------------+---------+
//! ```
//!
//! Texts whose UTF-8 encoding exceeds [`MAX_CHUNK_PAYLOAD`] are split into
//! chunks sharing a random message id; [`Reassembler`] stitches them back
//! together on the receive side, tolerant of reordering and duplicates.

use std::collections::{BTreeMap, HashMap};

use rand::RngCore;
use tracing::warn;

use crate::error::{ChatError, ChatResult};
use crate::types::{ChatMessage, Pubkey, Signature};

/// Fixed frame header size
pub const HEADER_SIZE: usize = 13;

/// Largest payload per frame. A transaction leaves ~900 bytes for
/// ciphertext; minus the 16-byte Poly1305 tag and this 13-byte header,
/// 661 is the largest chunk that always fits.
pub const MAX_CHUNK_PAYLOAD: usize = 661;

/// Flags value for a single-frame message
pub const FLAG_STANDALONE: u8 = 0x00;

/// Flags value for one chunk of a multi-frame message
pub const FLAG_CHUNKED: u8 = 0x01;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 0x00 standalone, 0x01 chunked
    pub flags: u8,
    /// Random id shared by all chunks of a logical message
    pub message_id: [u8; 8],
    /// 0-based position of this chunk
    pub chunk_index: u16,
    /// Number of chunks in the logical message (≥ 1)
    pub total_chunks: u16,
    /// UTF-8 payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Serialize header + payload to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.push(self.flags);
        out.extend_from_slice(&self.message_id);
        out.extend_from_slice(&self.chunk_index.to_be_bytes());
        out.extend_from_slice(&self.total_chunks.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a frame from decrypted bytes.
    ///
    /// The payload length is NOT validated against [`MAX_CHUNK_PAYLOAD`];
    /// the decoder stays tolerant of future format revisions.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Wire` if fewer than [`HEADER_SIZE`] bytes are
    /// present.
    pub fn parse(bytes: &[u8]) -> ChatResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(ChatError::Wire(format!(
                "frame too short: {} bytes, need at least {}",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        let mut message_id = [0u8; 8];
        message_id.copy_from_slice(&bytes[1..9]);

        Ok(Self {
            flags: bytes[0],
            message_id,
            chunk_index: u16::from_be_bytes([bytes[9], bytes[10]]),
            total_chunks: u16::from_be_bytes([bytes[11], bytes[12]]),
            payload: bytes[HEADER_SIZE..].to_vec(),
        })
    }

    /// Whether this frame is part of a multi-chunk message.
    pub fn is_chunked(&self) -> bool {
        self.flags & FLAG_CHUNKED != 0
    }
}

/// Encode a text into one or more frames under a fresh random message id.
///
/// A single standalone frame is emitted when the UTF-8 encoding fits in
/// [`MAX_CHUNK_PAYLOAD`]; otherwise `ceil(len / MAX_CHUNK_PAYLOAD)` chunks,
/// left to right, only the final one short.
pub fn encode(text: &str) -> ChatResult<Vec<Frame>> {
    let mut message_id = [0u8; 8];
    rand::rng().fill_bytes(&mut message_id);
    encode_with_id(text, message_id)
}

/// Encode under a caller-chosen message id. Split out for deterministic
/// tests; production paths use [`encode`].
pub fn encode_with_id(text: &str, message_id: [u8; 8]) -> ChatResult<Vec<Frame>> {
    let payload = text.as_bytes();

    if payload.len() <= MAX_CHUNK_PAYLOAD {
        return Ok(vec![Frame {
            flags: FLAG_STANDALONE,
            message_id,
            chunk_index: 0,
            total_chunks: 1,
            payload: payload.to_vec(),
        }]);
    }

    let total = payload.len().div_ceil(MAX_CHUNK_PAYLOAD);
    let total_chunks: u16 = total
        .try_into()
        .map_err(|_| ChatError::Wire(format!("message needs {} chunks, max 65535", total)))?;

    Ok(payload
        .chunks(MAX_CHUNK_PAYLOAD)
        .enumerate()
        .map(|(i, chunk)| Frame {
            flags: FLAG_CHUNKED,
            message_id,
            chunk_index: i as u16,
            total_chunks,
            payload: chunk.to_vec(),
        })
        .collect())
}

/// Buffered state for one partially received logical message.
struct PendingMessage {
    recipient: Pubkey,
    total_chunks: u16,
    /// chunk_index → (payload, carrying signature)
    chunks: BTreeMap<u16, (Vec<u8>, Signature)>,
    /// Earliest chunk timestamp seen
    timestamp: i64,
}

/// Reassembles logical messages from decrypted frames.
///
/// Keyed by (sender, message_id). Completion fires exactly once per key,
/// when `total_chunks` distinct chunk indices have arrived; the entry is
/// evicted at that point. Duplicate chunk indices are ignored (first write
/// wins). A frame whose `total_chunks` disagrees with the buffered value
/// drops the whole pending entry; nothing authenticates the header
/// independently of the envelope, so inconsistency means a broken or
/// malicious sender.
pub struct Reassembler {
    pending: HashMap<(Pubkey, [u8; 8]), PendingMessage>,
}

impl Reassembler {
    /// Create an empty reassembler.
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Offer one decrypted frame. Returns the finished message when this
    /// frame completes it (or immediately for standalone frames), `None`
    /// otherwise. Frames whose payload fails UTF-8 decoding are discarded.
    pub fn insert(
        &mut self,
        sender: Pubkey,
        recipient: Pubkey,
        frame: Frame,
        signature: Signature,
        timestamp: i64,
    ) -> Option<ChatMessage> {
        if frame.total_chunks <= 1 {
            let text = String::from_utf8(frame.payload).ok()?;
            return Some(ChatMessage {
                sender,
                recipient,
                text,
                timestamp,
                message_id: frame.message_id,
                signatures: vec![signature],
            });
        }

        if frame.chunk_index >= frame.total_chunks {
            return None;
        }

        let key = (sender, frame.message_id);
        let entry = self.pending.entry(key).or_insert_with(|| PendingMessage {
            recipient,
            total_chunks: frame.total_chunks,
            chunks: BTreeMap::new(),
            timestamp,
        });

        if entry.total_chunks != frame.total_chunks {
            warn!(
                sender = %sender,
                message_id = ?frame.message_id,
                buffered = entry.total_chunks,
                received = frame.total_chunks,
                "conflicting total_chunks, dropping message"
            );
            self.pending.remove(&key);
            return None;
        }

        entry.timestamp = entry.timestamp.min(timestamp);
        entry
            .chunks
            .entry(frame.chunk_index)
            .or_insert((frame.payload, signature));

        if entry.chunks.len() < entry.total_chunks as usize {
            return None;
        }

        let done = self.pending.remove(&key)?;
        let mut text_bytes = Vec::new();
        let mut signatures = Vec::with_capacity(done.chunks.len());
        for (_, (payload, sig)) in done.chunks {
            text_bytes.extend_from_slice(&payload);
            signatures.push(sig);
        }

        let text = String::from_utf8(text_bytes).ok()?;
        Some(ChatMessage {
            sender,
            recipient: done.recipient,
            text,
            timestamp: done.timestamp,
            message_id: frame.message_id,
            signatures,
        })
    }

    /// Number of partially assembled messages currently buffered.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}
