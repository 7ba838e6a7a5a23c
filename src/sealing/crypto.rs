//! AES-256-GCM sealing and associated-data construction
//!
//! Sealed blobs are `nonce (12) || ciphertext || tag (16)`. The nonce is drawn
//! from the OS RNG on every call and is never taken from the caller.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

const AAD_DOMAIN: &[u8] = b"fleet-trust-aad-v1";

/// Sealing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("Sealed data shorter than a nonce")]
    CiphertextTooShort,

    /// Wrong key, wrong associated data and tampered bytes all report this
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Encryption failed")]
    EncryptionFailed,
}

/// Seal `plaintext` under `key` with a fresh random nonce
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let body = seal_with_nonce(key, &nonce, plaintext, aad)?;
    let mut sealed = Vec::with_capacity(NONCE_SIZE + body.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&body);
    Ok(sealed)
}

/// Open a `nonce || ciphertext` blob produced by [`encrypt`]
pub fn decrypt(key: &[u8; KEY_SIZE], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_SIZE {
        return Err(CryptoError::CiphertextTooShort);
    }
    let (nonce, body) = sealed.split_at(NONCE_SIZE);
    let nonce: &[u8; NONCE_SIZE] = nonce.try_into().map_err(|_| CryptoError::CiphertextTooShort)?;
    open_with_nonce(key, nonce, body, aad)
}

/// Context binding for a ciphertext: node identity, transaction nonce and caller.
///
/// Length-prefixed so distinct inputs can never produce the same bytes.
pub fn build_associated_data(node_identity: &str, challenge_nonce: &[u8; NONCE_SIZE], caller: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(AAD_DOMAIN.len() + 8 + node_identity.len() + NONCE_SIZE + caller.len());
    aad.extend_from_slice(AAD_DOMAIN);
    aad.extend_from_slice(&(node_identity.len() as u32).to_be_bytes());
    aad.extend_from_slice(node_identity.as_bytes());
    aad.extend_from_slice(challenge_nonce);
    aad.extend_from_slice(&(caller.len() as u32).to_be_bytes());
    aad.extend_from_slice(caller.as_bytes());
    aad
}

/// Fresh random key material
pub fn random_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Seal with a caller-generated nonce. Only for key sets that store their
/// own freshly drawn nonce.
pub(crate) fn seal_with_nonce(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptionFailed)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)
}

pub(crate) fn open_with_nonce(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    body: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: body, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = random_key();
        let big = [0xffu8; 4096];
        let cases: [(&[u8], &[u8]); 3] = [(b"", b""), (b"secret", b"node-A"), (&big, b"")];
        for (pt, aad) in cases {
            let sealed = encrypt(&key, pt, aad).unwrap();
            assert_eq!(sealed.len(), NONCE_SIZE + pt.len() + TAG_SIZE);
            assert_eq!(decrypt(&key, &sealed, aad).unwrap(), pt);
        }
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = random_key();
        let a = encrypt(&key, b"same", b"").unwrap();
        let b = encrypt(&key, b"same", b"").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_associated_data() {
        let key = random_key();
        let sealed = encrypt(&key, b"secret", b"node-A").unwrap();
        assert_eq!(decrypt(&key, &sealed, b"node-B"), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_wrong_key() {
        let sealed = encrypt(&random_key(), b"secret", b"").unwrap();
        assert_eq!(decrypt(&random_key(), &sealed, b""), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_every_byte_is_authenticated() {
        let key = random_key();
        let sealed = encrypt(&key, b"secret", b"ctx").unwrap();
        for i in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x01;
            assert_eq!(
                decrypt(&key, &tampered, b"ctx"),
                Err(CryptoError::DecryptionFailed),
                "byte {} not authenticated",
                i
            );
        }
    }

    #[test]
    fn test_short_input() {
        let key = random_key();
        assert_eq!(decrypt(&key, &[0u8; 11], b""), Err(CryptoError::CiphertextTooShort));
        // A bare nonce has no tag
        assert_eq!(decrypt(&key, &[0u8; 12], b""), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_associated_data_is_deterministic_and_injective() {
        let nonce = [9u8; NONCE_SIZE];
        let base = build_associated_data("node-a", &nonce, "203.0.113.5");
        assert_eq!(base, build_associated_data("node-a", &nonce, "203.0.113.5"));

        assert_ne!(base, build_associated_data("node-b", &nonce, "203.0.113.5"));
        assert_ne!(base, build_associated_data("node-a", &[8u8; NONCE_SIZE], "203.0.113.5"));
        assert_ne!(base, build_associated_data("node-a", &nonce, "203.0.113.6"));
        // Shifting bytes between fields must not collide
        assert_ne!(
            build_associated_data("ab", &nonce, "c"),
            build_associated_data("a", &nonce, "bc")
        );
    }

    #[test]
    fn test_bound_ciphertext_rejects_other_context() {
        let key = random_key();
        let nonce = [1u8; NONCE_SIZE];
        let aad_a = build_associated_data("node-a", &nonce, "203.0.113.5");
        let sealed = encrypt(&key, b"disk key", &aad_a).unwrap();

        let aad_b = build_associated_data("node-b", &nonce, "203.0.113.5");
        let aad_y = build_associated_data("node-a", &nonce, "198.51.100.9");
        assert!(decrypt(&key, &sealed, &aad_b).is_err());
        assert!(decrypt(&key, &sealed, &aad_y).is_err());
        assert_eq!(decrypt(&key, &sealed, &aad_a).unwrap(), b"disk key");
    }
}
