//! Authenticated encryption of envelope bodies using AES-256-GCM
//!
//! Every call to [`seal`] draws a fresh 12-byte nonce from the OS RNG. No
//! associated data is bound. The 16-byte tag is kept detached so that an
//! [`Envelope`] exposes nonce, ciphertext and tag as separate parts.
//!
//! The binary form of an envelope is:
//! - nonce: 12 bytes
//! - ciphertext: variable length (same length as the plaintext)
//! - tag: 16 bytes

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::{ErrorCategory, ErrorKind, PqsealError, Result};

/// Length of nonce in bytes
pub const NONCE_LEN: usize = 12;

/// Length of the authentication tag in bytes
pub const TAG_LEN: usize = 16;

/// Length of the symmetric key in bytes
pub const KEY_LEN: usize = 32;

/// Output of one authenticated encryption.
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Envelope({} byte ciphertext)", self.ciphertext.len())
    }
}

impl Envelope {
    /// Smallest possible binary envelope (empty plaintext).
    pub const MIN_LEN: usize = NONCE_LEN + TAG_LEN;

    /// Serializes as nonce || ciphertext || tag.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut output = Vec::with_capacity(NONCE_LEN + self.ciphertext.len() + TAG_LEN);
        output.extend_from_slice(&self.nonce);
        output.extend_from_slice(&self.ciphertext);
        output.extend_from_slice(&self.tag);
        output
    }

    /// Splits nonce || ciphertext || tag back into its parts.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::MIN_LEN {
            return Err(PqsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::MalformedRecord,
                "input likely truncated while reading envelope",
            ));
        }
        let (nonce, rest) = bytes.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

        let mut envelope = Envelope {
            nonce: [0u8; NONCE_LEN],
            ciphertext: ciphertext.to_vec(),
            tag: [0u8; TAG_LEN],
        };
        envelope.nonce.copy_from_slice(nonce);
        envelope.tag.copy_from_slice(tag);
        Ok(envelope)
    }
}

/// Encrypt plaintext under `key` with a fresh random nonce
pub fn seal(plaintext: &[u8], key: &[u8; KEY_LEN]) -> Result<Envelope> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.try_fill_bytes(&mut nonce).map_err(|e| {
        PqsealError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::KeyGenerationFailure,
            "failed to generate nonce",
            e,
        )
    })?;

    seal_with_nonce(plaintext, key, &nonce)
}

/// Encrypt plaintext under `key` with the provided nonce
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `seal()` which generates a random nonce.
pub fn seal_with_nonce(
    plaintext: &[u8],
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
) -> Result<Envelope> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut ciphertext = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), b"", &mut ciphertext)
        .map_err(|_| {
            PqsealError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::SerializationFailure,
                "plaintext too large to encrypt",
            )
        })?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(Envelope {
        nonce: *nonce,
        ciphertext,
        tag: tag_bytes,
    })
}

/// Verify the tag and decrypt
///
/// Any mismatch in key, nonce, ciphertext or tag results in an
/// `IntegrityFailure`; no plaintext is returned in that case.
pub fn open(envelope: &Envelope, key: &[u8; KEY_LEN]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut plaintext = envelope.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&envelope.nonce),
            b"",
            &mut plaintext,
            Tag::from_slice(&envelope.tag),
        )
        .map_err(|_| {
            PqsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::IntegrityFailure,
                "corrupt input, tampered-with data, or wrong key",
            )
        })?;

    Ok(plaintext)
}
