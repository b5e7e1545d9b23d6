//! Authenticated public-key encryption between chain identities.
//!
//! Identities on chain are Ed25519 signing keys. Both sides are mapped onto
//! Curve25519's Montgomery form and run through the NaCl "box" construction:
//! X25519 ECDH + XSalsa20-Poly1305.
//!
//! # Ed25519 → X25519 conversion
//!
//! Ed25519 and X25519 share Curve25519: Ed25519 uses the Edwards form,
//! X25519 the Montgomery form. The conversion is the standard birational map
//! (RFC 8032 §5.1.5 / RFC 7748 §4.1):
//!
//! ```text
//! x25519_secret = SHA-512(ed25519_seed)[0..32]   (clamped on use)
//! x25519_public = ed_compressed_point.to_montgomery()
//! ```
//!
//! Reusing the identity key for DH means a sender can encrypt to a recipient
//! who never published an encryption key: the recipient decrypts with their
//! signing secret.

use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::Aead;
use crypto_box::{PublicKey as BoxPublicKey, SalsaBox, SecretKey as BoxSecretKey};
use curve25519_dalek::edwards::CompressedEdwardsY;
use sha2::{Digest, Sha512};

use crate::error::{ChatError, ChatResult};

/// Nonce size for XSalsa20-Poly1305 (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size appended to every ciphertext
pub const TAG_SIZE: usize = 16;

/// Convert an Ed25519 public key to its X25519 (Montgomery) form.
///
/// # Errors
///
/// Returns `ChatError::Crypto` if the bytes do not decompress to a valid
/// Edwards point (not every 32-byte string is a curve point).
pub fn ed25519_pubkey_to_x25519(ed_public: &[u8; 32]) -> ChatResult<[u8; 32]> {
    let point = CompressedEdwardsY(*ed_public)
        .decompress()
        .ok_or_else(|| ChatError::Crypto("public key is not a valid curve point".to_string()))?;
    Ok(point.to_montgomery().to_bytes())
}

/// Convert an Ed25519 seed (the first 32 bytes of a secret key) to an
/// X25519 scalar. Clamping happens inside the scalar multiplication.
pub fn ed25519_seed_to_x25519(ed_seed: &[u8; 32]) -> [u8; 32] {
    let digest = Sha512::digest(ed_seed);
    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&digest[..32]);
    scalar
}

/// Encrypt `plaintext` from the holder of `sender_seed` to the holder of
/// `recipient_public`'s secret. Both keys are Ed25519; the conversion to
/// X25519 happens internally.
///
/// A fresh uniformly random 24-byte nonce is drawn per call and returned
/// alongside the ciphertext (which carries the 16-byte Poly1305 tag).
pub fn seal(
    plaintext: &[u8],
    sender_seed: &[u8; 32],
    recipient_public: &[u8; 32],
) -> ChatResult<(Vec<u8>, [u8; NONCE_SIZE])> {
    let secret = BoxSecretKey::from(ed25519_seed_to_x25519(sender_seed));
    let public = BoxPublicKey::from(ed25519_pubkey_to_x25519(recipient_public)?);
    let cipher = SalsaBox::new(&public, &secret);

    let mut nonce = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| ChatError::Crypto(format!("nonce generation failed: {}", e)))?;

    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .map_err(|_| ChatError::Crypto("encryption failed".to_string()))?;

    Ok((ciphertext, nonce))
}

/// Decrypt a ciphertext produced by [`seal`].
///
/// Returns `None` on any failure: invalid counterparty key, wrong keys, or
/// tampered ciphertext/nonce. Receive paths scan a program-wide event stream
/// containing traffic for other parties, so failure is expected and silent.
pub fn open(
    ciphertext: &[u8],
    nonce: &[u8; NONCE_SIZE],
    counterparty_public: &[u8; 32],
    my_seed: &[u8; 32],
) -> Option<Vec<u8>> {
    let secret = BoxSecretKey::from(ed25519_seed_to_x25519(my_seed));
    let public = BoxPublicKey::from(ed25519_pubkey_to_x25519(counterparty_public).ok()?);
    let cipher = SalsaBox::new(&public, &secret);

    cipher
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn keypair(seed_byte: u8) -> ([u8; 32], [u8; 32]) {
        let seed = [seed_byte; 32];
        let signing = SigningKey::from_bytes(&seed);
        (seed, signing.verifying_key().to_bytes())
    }

    #[test]
    fn test_seal_open_duality() {
        let (a_seed, a_pub) = keypair(1);
        let (b_seed, b_pub) = keypair(2);

        let plaintext = b"the chain sees only ciphertext";
        let (ciphertext, nonce) = seal(plaintext, &a_seed, &b_pub).unwrap();

        let opened = open(&ciphertext, &nonce, &a_pub, &b_seed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_ciphertext_carries_tag() {
        let (a_seed, _) = keypair(1);
        let (_, b_pub) = keypair(2);

        let plaintext = b"hello";
        let (ciphertext, _) = seal(plaintext, &a_seed, &b_pub).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let (a_seed, _) = keypair(1);
        let (_, b_pub) = keypair(2);

        let (ct1, n1) = seal(b"same", &a_seed, &b_pub).unwrap();
        let (ct2, n2) = seal(b"same", &a_seed, &b_pub).unwrap();
        assert_ne!(n1, n2);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn test_tamper_rejection_ciphertext() {
        let (a_seed, a_pub) = keypair(1);
        let (b_seed, b_pub) = keypair(2);

        let (ciphertext, nonce) = seal(b"integrity", &a_seed, &b_pub).unwrap();

        for i in 0..ciphertext.len() {
            let mut tampered = ciphertext.clone();
            tampered[i] ^= 0x01;
            assert!(
                open(&tampered, &nonce, &a_pub, &b_seed).is_none(),
                "bit flip at byte {} not rejected",
                i
            );
        }
    }

    #[test]
    fn test_tamper_rejection_nonce() {
        let (a_seed, a_pub) = keypair(1);
        let (b_seed, b_pub) = keypair(2);

        let (ciphertext, nonce) = seal(b"integrity", &a_seed, &b_pub).unwrap();

        for i in 0..NONCE_SIZE {
            let mut tampered = nonce;
            tampered[i] ^= 0x01;
            assert!(
                open(&ciphertext, &tampered, &a_pub, &b_seed).is_none(),
                "nonce bit flip at byte {} not rejected",
                i
            );
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let (a_seed, a_pub) = keypair(1);
        let (_, b_pub) = keypair(2);
        let (c_seed, _) = keypair(3);

        let (ciphertext, nonce) = seal(b"not for c", &a_seed, &b_pub).unwrap();
        assert!(open(&ciphertext, &nonce, &a_pub, &c_seed).is_none());
    }

    #[test]
    fn test_pubkey_conversion_deterministic() {
        let (_, a_pub) = keypair(9);
        let x1 = ed25519_pubkey_to_x25519(&a_pub).unwrap();
        let x2 = ed25519_pubkey_to_x25519(&a_pub).unwrap();
        assert_eq!(x1, x2);
    }

    #[test]
    fn test_invalid_point_rejected() {
        // All-0xFF is not a valid compressed Edwards point
        let bad = [0xFFu8; 32];
        assert!(ed25519_pubkey_to_x25519(&bad).is_err());
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let (a_seed, a_pub) = keypair(1);
        let (b_seed, b_pub) = keypair(2);

        let (ciphertext, nonce) = seal(b"", &a_seed, &b_pub).unwrap();
        assert_eq!(ciphertext.len(), TAG_SIZE);
        assert_eq!(open(&ciphertext, &nonce, &a_pub, &b_seed).unwrap(), b"");
    }
}
