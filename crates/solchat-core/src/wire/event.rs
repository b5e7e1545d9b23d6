//! `MessageSent` event extraction from transaction logs.
//!
//! The program emits one event per send as a base64 blob behind the
//! `Program data: ` log prefix. A transaction's log list also contains
//! invoke/success lines, compute budget noise, and events from other
//! programs; everything that does not parse as a `MessageSent` is skipped
//! without error.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::crypto::NONCE_SIZE;
use crate::types::Pubkey;

/// Discriminator identifying a `MessageSent` event blob
pub const MESSAGE_SENT_DISCRIMINATOR: [u8; 8] = [0x74, 0x46, 0xE0, 0x4C, 0x80, 0x1C, 0x6E, 0x37];

/// Log line prefix carrying emitted event data
pub const PROGRAM_DATA_PREFIX: &str = "Program data: ";

/// Program-enforced ciphertext ceiling per event
pub const MAX_CIPHERTEXT_LEN: usize = 900;

/// A decoded `MessageSent` event record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSent {
    /// Identity that signed the send
    pub sender: Pubkey,
    /// Addressed identity
    pub recipient: Pubkey,
    /// Sealed frame bytes
    pub ciphertext: Vec<u8>,
    /// Encryption nonce
    pub nonce: [u8; NONCE_SIZE],
    /// Block-assigned unix timestamp (seconds)
    pub timestamp: i64,
}

/// Extract every valid `MessageSent` event from a transaction's log lines,
/// in emission order. Unrelated lines, foreign events, and corrupt payloads
/// are silently skipped.
pub fn parse_events(logs: &[String]) -> Vec<MessageSent> {
    logs.iter().filter_map(|line| parse_line(line)).collect()
}

fn parse_line(line: &str) -> Option<MessageSent> {
    let encoded = line.strip_prefix(PROGRAM_DATA_PREFIX)?;
    let bytes = BASE64.decode(encoded.trim()).ok()?;
    decode_event(&bytes)
}

/// Decode one event blob:
/// `disc(8) ‖ sender(32) ‖ recipient(32) ‖ ct_len(u32 LE) ‖ ciphertext ‖ nonce(24) ‖ timestamp(i64 LE)`
pub fn decode_event(bytes: &[u8]) -> Option<MessageSent> {
    if bytes.len() < 8 || bytes[..8] != MESSAGE_SENT_DISCRIMINATOR {
        return None;
    }
    let mut cursor = 8;

    let sender = read_pubkey(bytes, &mut cursor)?;
    let recipient = read_pubkey(bytes, &mut cursor)?;

    let len_bytes: [u8; 4] = bytes.get(cursor..cursor + 4)?.try_into().ok()?;
    let ct_len = u32::from_le_bytes(len_bytes) as usize;
    cursor += 4;

    let ciphertext = bytes.get(cursor..cursor + ct_len)?.to_vec();
    cursor += ct_len;

    let nonce: [u8; NONCE_SIZE] = bytes.get(cursor..cursor + NONCE_SIZE)?.try_into().ok()?;
    cursor += NONCE_SIZE;

    let ts_bytes: [u8; 8] = bytes.get(cursor..cursor + 8)?.try_into().ok()?;
    let timestamp = i64::from_le_bytes(ts_bytes);

    Some(MessageSent {
        sender,
        recipient,
        ciphertext,
        nonce,
        timestamp,
    })
}

fn read_pubkey(bytes: &[u8], cursor: &mut usize) -> Option<Pubkey> {
    let slice: [u8; 32] = bytes.get(*cursor..*cursor + 32)?.try_into().ok()?;
    *cursor += 32;
    Some(Pubkey::new(slice))
}

/// Encode a `MessageSent` blob. The inverse of [`decode_event`]; used by
/// in-memory chain harnesses.
pub fn encode_event(event: &MessageSent) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 32 + 32 + 4 + event.ciphertext.len() + NONCE_SIZE + 8);
    out.extend_from_slice(&MESSAGE_SENT_DISCRIMINATOR);
    out.extend_from_slice(event.sender.as_bytes());
    out.extend_from_slice(event.recipient.as_bytes());
    out.extend_from_slice(&(event.ciphertext.len() as u32).to_le_bytes());
    out.extend_from_slice(&event.ciphertext);
    out.extend_from_slice(&event.nonce);
    out.extend_from_slice(&event.timestamp.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> MessageSent {
        MessageSent {
            sender: Pubkey::new([1; 32]),
            recipient: Pubkey::new([2; 32]),
            ciphertext: vec![0xDE, 0xAD, 0xBE, 0xEF],
            nonce: [3; NONCE_SIZE],
            timestamp: 1_700_000_000,
        }
    }

    fn data_line(event: &MessageSent) -> String {
        format!("{}{}", PROGRAM_DATA_PREFIX, BASE64.encode(encode_event(event)))
    }

    #[test]
    fn test_event_roundtrip() {
        let event = sample_event();
        let logs = vec![data_line(&event)];
        assert_eq!(parse_events(&logs), vec![event]);
    }

    #[test]
    fn test_unrelated_lines_skipped() {
        let event = sample_event();
        let logs = vec![
            "Program msg1jhfewu1hGDnQKGhXDmqas6JZTq7Lg7PbSX5jY9y invoke [1]".to_string(),
            "Program log: Instruction: SendMessage".to_string(),
            data_line(&event),
            "Program msg1jhfewu1hGDnQKGhXDmqas6JZTq7Lg7PbSX5jY9y success".to_string(),
        ];
        assert_eq!(parse_events(&logs), vec![event]);
    }

    #[test]
    fn test_foreign_discriminator_skipped() {
        let mut blob = encode_event(&sample_event());
        blob[0] ^= 0xFF;
        let logs = vec![format!("{}{}", PROGRAM_DATA_PREFIX, BASE64.encode(blob))];
        assert!(parse_events(&logs).is_empty());
    }

    #[test]
    fn test_corrupt_base64_skipped() {
        let logs = vec![format!("{}%%%not-base64%%%", PROGRAM_DATA_PREFIX)];
        assert!(parse_events(&logs).is_empty());
    }

    #[test]
    fn test_truncated_blob_skipped() {
        let blob = encode_event(&sample_event());
        let truncated = &blob[..blob.len() - 9];
        let logs = vec![format!("{}{}", PROGRAM_DATA_PREFIX, BASE64.encode(truncated))];
        assert!(parse_events(&logs).is_empty());
    }

    #[test]
    fn test_lying_length_skipped() {
        let event = sample_event();
        let mut blob = encode_event(&event);
        // Claim a ciphertext longer than the blob itself
        blob[72..76].copy_from_slice(&u32::MAX.to_le_bytes());
        let logs = vec![format!("{}{}", PROGRAM_DATA_PREFIX, BASE64.encode(blob))];
        assert!(parse_events(&logs).is_empty());
    }

    #[test]
    fn test_multiple_events_in_order() {
        let mut second = sample_event();
        second.timestamp += 5;
        second.ciphertext = vec![0x01];
        let logs = vec![
            data_line(&sample_event()),
            "Program log: between".to_string(),
            data_line(&second),
        ];
        let events = parse_events(&logs);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], sample_event());
        assert_eq!(events[1], second);
    }

    #[test]
    fn test_negative_timestamp_parses() {
        let mut event = sample_event();
        event.timestamp = -1;
        let logs = vec![data_line(&event)];
        assert_eq!(parse_events(&logs)[0].timestamp, -1);
    }
}
