//! Secret encryption using AES-256-GCM
//!
//! [`SecretCipher`] seals plaintext for the LOCAL backend (with the platform
//! master key) and for KMS envelopes (with a per-secret data key). Every
//! encryption draws a fresh random 12-byte nonce; the 16-byte tag is appended
//! to the ciphertext.
//!
//! ## Key Rotation
//!
//! Sealed records carry the key version they were written with. A cipher
//! refuses records sealed under a different version instead of producing an
//! authentication failure that looks like tampering.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use zeroize::Zeroizing;

use crate::config::EncryptionConfig;
use crate::domain::{EncryptedRecord, SecretBytes};
use crate::errors::{BackendErrorCode, KeywardError, Result};

/// Size of AES-256-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Size of AES-256-GCM tag in bytes
const TAG_SIZE: usize = 16;

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; NONCE_SIZE]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_SIZE]) -> Self {
        Self { nonce: Some(nonce_bytes) }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

fn cipher_failure(message: impl Into<String>) -> KeywardError {
    KeywardError::secret_management(BackendErrorCode::EncryptDecryptFailed, message)
}

/// Decode a base64 AES-256 key, checking its length
pub fn decode_key(key_base64: &str) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    let decoded = Zeroizing::new(
        BASE64
            .decode(key_base64.trim())
            .map_err(|e| KeywardError::config(format!("Invalid base64 in encryption key: {}", e)))?,
    );

    if decoded.len() != KEY_SIZE {
        return Err(KeywardError::config(format!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            decoded.len()
        )));
    }

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&decoded);
    Ok(key)
}

/// AES-256-GCM cipher bound to one key
#[derive(Clone)]
pub struct SecretCipher {
    key_bytes: Arc<Zeroizing<[u8; KEY_SIZE]>>,
    key_version: String,
    rng: Arc<SystemRandom>,
}

impl SecretCipher {
    /// Create the platform cipher from configuration
    pub fn new(config: &EncryptionConfig) -> Result<Self> {
        let key = decode_key(config.master_key_base64.expose_secret())?;

        debug!(key_version = %config.key_version, "Secret cipher initialized");

        Ok(Self {
            key_bytes: Arc::new(key),
            key_version: config.key_version.clone(),
            rng: Arc::new(SystemRandom::new()),
        })
    }

    /// Create a cipher from raw key bytes (KMS data keys)
    pub fn from_key_bytes(key: &[u8], key_version: impl Into<String>) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(cipher_failure(format!(
                "Data key must be {} bytes, got {} bytes",
                KEY_SIZE,
                key.len()
            )));
        }
        let mut key_array = Zeroizing::new([0u8; KEY_SIZE]);
        key_array.copy_from_slice(key);

        Ok(Self {
            key_bytes: Arc::new(key_array),
            key_version: key_version.into(),
            rng: Arc::new(SystemRandom::new()),
        })
    }

    /// Get the current key version
    pub fn key_version(&self) -> &str {
        &self.key_version
    }

    /// Encrypt plaintext data
    ///
    /// Returns `(ciphertext, nonce)`; the ciphertext has the tag appended.
    #[instrument(skip(self, plaintext), fields(plaintext_len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng.fill(&mut nonce_bytes).map_err(|_| {
            error!("Failed to generate random nonce");
            cipher_failure("Failed to generate random nonce for encryption")
        })?;

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.key_bytes[..]).map_err(|_| {
            error!("Failed to create encryption key");
            cipher_failure("Failed to create encryption key")
        })?;

        let mut sealing_key = aead::SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut ciphertext = plaintext.to_vec();
        ciphertext.reserve(TAG_SIZE);

        sealing_key.seal_in_place_append_tag(Aad::empty(), &mut ciphertext).map_err(|_| {
            error!("Encryption failed");
            cipher_failure("Failed to encrypt secret data")
        })?;

        Ok((ciphertext, nonce_bytes.to_vec()))
    }

    /// Decrypt ciphertext data (tag appended) with the nonce used to seal it
    #[instrument(skip(self, ciphertext, nonce), fields(ciphertext_len = ciphertext.len()))]
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<SecretBytes> {
        if nonce.len() != NONCE_SIZE {
            return Err(cipher_failure(format!(
                "Invalid nonce length: expected {} bytes, got {} bytes",
                NONCE_SIZE,
                nonce.len()
            )));
        }

        if ciphertext.len() < TAG_SIZE {
            return Err(cipher_failure("Ciphertext too short (missing authentication tag)"));
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce);

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.key_bytes[..]).map_err(|_| {
            error!("Failed to create decryption key");
            cipher_failure("Failed to create decryption key")
        })?;

        let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut buffer = Zeroizing::new(ciphertext.to_vec());
        let decrypted = opening_key.open_in_place(Aad::empty(), &mut buffer).map_err(|_| {
            error!("Decryption failed - possible tampering or wrong key");
            cipher_failure("Failed to decrypt secret data - authentication failed")
        })?;

        Ok(SecretBytes::new(decrypted.to_vec()))
    }

    /// Encrypt into a [`EncryptedRecord::Sealed`] record
    pub fn seal(&self, plaintext: &SecretBytes) -> Result<EncryptedRecord> {
        let (ciphertext, nonce) = self.encrypt(plaintext.expose_secret())?;
        Ok(EncryptedRecord::Sealed {
            key_version: self.key_version.clone(),
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        })
    }

    /// Decrypt a [`EncryptedRecord::Sealed`] record
    pub fn open(&self, record: &EncryptedRecord) -> Result<SecretBytes> {
        let EncryptedRecord::Sealed { key_version, nonce, ciphertext } = record else {
            return Err(cipher_failure(format!(
                "Expected a sealed record, found '{}'",
                record.kind()
            )));
        };

        if key_version != &self.key_version {
            return Err(cipher_failure(format!(
                "Record sealed with key version '{}' but cipher holds '{}'",
                key_version, self.key_version
            )));
        }

        let (ciphertext, nonce) = decode_pair(ciphertext, nonce)?;
        self.decrypt(&ciphertext, &nonce)
    }
}

/// Decode base64 ciphertext and nonce from a stored record
pub(crate) fn decode_pair(ciphertext: &str, nonce: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let ciphertext = BASE64
        .decode(ciphertext)
        .map_err(|e| cipher_failure(format!("Malformed ciphertext encoding: {}", e)))?;
    let nonce = BASE64
        .decode(nonce)
        .map_err(|e| cipher_failure(format!("Malformed nonce encoding: {}", e)))?;
    Ok((ciphertext, nonce))
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("key_version", &self.key_version)
            .field("key_bytes", &"[REDACTED]")
            .finish()
    }
}
