//! At-rest sealing of queue payloads.
//!
//! Queue entries carry raw face descriptors, so deployments can require them
//! to be encrypted on disk. Layout: one format byte, then either the plain
//! payload or `nonce (12 bytes) || AES-256-GCM ciphertext`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const FORMAT_PLAIN: u8 = 0;
const FORMAT_AES_GCM: u8 = 1;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum SealError {
    #[error("sealed payload is truncated")]
    Truncated,
    #[error("unknown payload format {0}")]
    UnknownFormat(u8),
    #[error("payload is encrypted but no passphrase is configured")]
    KeyRequired,
    #[error("payload failed authentication")]
    Unauthentic,
    #[error("invalid key material")]
    InvalidKey,
    #[error("encryption failed")]
    Encrypt,
}

#[derive(Clone)]
pub struct Sealer {
    cipher: Option<Aes256Gcm>,
}

impl Sealer {
    /// Store payloads unencrypted.
    pub fn plaintext() -> Self {
        Self { cipher: None }
    }

    /// Encrypt payloads with a key derived from `passphrase` (SHA-256).
    ///
    /// The derivation is unsalted and single-round: the same passphrase must
    /// reopen the queue after a restart with nothing else stored beside it.
    /// It protects against casual reads of the store file, not offline
    /// guessing, so the passphrase should be a high-entropy device secret.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, SealError> {
        let key = Sha256::digest(passphrase.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(key.as_slice()).map_err(|_| SealError::InvalidKey)?;
        Ok(Self { cipher: Some(cipher) })
    }

    pub fn is_encrypting(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn seal(&self, payload: &[u8]) -> Result<Vec<u8>, SealError> {
        let Some(cipher) = &self.cipher else {
            let mut out = Vec::with_capacity(payload.len() + 1);
            out.push(FORMAT_PLAIN);
            out.extend_from_slice(payload);
            return Ok(out);
        };

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|_| SealError::Encrypt)?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        out.push(FORMAT_AES_GCM);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Plain payloads open with any sealer; encrypted ones need the same passphrase.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, SealError> {
        let (&format, body) = sealed.split_first().ok_or(SealError::Truncated)?;
        match format {
            FORMAT_PLAIN => Ok(body.to_vec()),
            FORMAT_AES_GCM => {
                let cipher = self.cipher.as_ref().ok_or(SealError::KeyRequired)?;
                if body.len() < NONCE_LEN {
                    return Err(SealError::Truncated);
                }
                let (nonce, ciphertext) = body.split_at(NONCE_LEN);
                cipher
                    .decrypt(Nonce::from_slice(nonce), ciphertext)
                    .map_err(|_| SealError::Unauthentic)
            }
            other => Err(SealError::UnknownFormat(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaintext_passthrough() {
        let sealer = Sealer::plaintext();
        let sealed = sealer.seal(b"descriptor").unwrap();
        assert_eq!(sealed[0], FORMAT_PLAIN);
        assert_eq!(sealer.open(&sealed).unwrap(), b"descriptor");
    }

    #[test]
    fn test_encrypted_payload_hides_content() {
        let sealer = Sealer::from_passphrase("kiosk-7").unwrap();
        let sealed = sealer.seal(b"descriptor").unwrap();
        assert_eq!(sealed[0], FORMAT_AES_GCM);
        assert!(!sealed.windows(10).any(|w| w == b"descriptor"));
        assert_eq!(sealer.open(&sealed).unwrap(), b"descriptor");
    }

    #[test]
    fn test_same_passphrase_reopens_after_restart() {
        let sealed = Sealer::from_passphrase("kiosk-7").unwrap().seal(b"descriptor").unwrap();
        let reopened = Sealer::from_passphrase("kiosk-7").unwrap();
        assert_eq!(reopened.open(&sealed).unwrap(), b"descriptor");
    }

    #[test]
    fn test_nonces_differ() {
        let sealer = Sealer::from_passphrase("kiosk-7").unwrap();
        assert_ne!(sealer.seal(b"same").unwrap(), sealer.seal(b"same").unwrap());
    }

    #[test]
    fn test_wrong_passphrase_rejected() {
        let sealed = Sealer::from_passphrase("right").unwrap().seal(b"x").unwrap();
        let err = Sealer::from_passphrase("wrong").unwrap().open(&sealed).unwrap_err();
        assert!(matches!(err, SealError::Unauthentic));
    }

    #[test]
    fn test_encrypted_payload_needs_key() {
        let sealed = Sealer::from_passphrase("right").unwrap().seal(b"x").unwrap();
        assert!(matches!(Sealer::plaintext().open(&sealed), Err(SealError::KeyRequired)));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let sealer = Sealer::from_passphrase("k").unwrap();
        let mut sealed = sealer.seal(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(sealer.open(&sealed), Err(SealError::Unauthentic)));
    }

    #[test]
    fn test_truncated_payloads() {
        let sealer = Sealer::from_passphrase("k").unwrap();
        assert!(matches!(sealer.open(&[]), Err(SealError::Truncated)));
        assert!(matches!(sealer.open(&[FORMAT_AES_GCM, 1, 2]), Err(SealError::Truncated)));
        assert!(matches!(sealer.open(&[9, 1, 2]), Err(SealError::UnknownFormat(9))));
    }
}
