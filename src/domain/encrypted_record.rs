//! Opaque result of an encrypt call, stored alongside the secret.

use serde::{Deserialize, Serialize};

/// Backend-specific shape of an encrypted value.
///
/// Binary fields are base64 (standard alphabet) so the record stores as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncryptedRecord {
    /// AES-256-GCM ciphertext sealed with the platform master key
    Sealed { key_version: String, nonce: String, ciphertext: String },
    /// Data-key envelope: the data key is wrapped by the remote KMS key
    Envelope { key_id: String, encrypted_data_key: String, nonce: String, ciphertext: String },
    /// The value lives in a path-keyed remote store
    Remote { path: String },
}

impl EncryptedRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sealed { .. } => "sealed",
            Self::Envelope { .. } => "envelope",
            Self::Remote { .. } => "remote",
        }
    }

    pub fn remote_path(&self) -> Option<&str> {
        match self {
            Self::Remote { path } => Some(path),
            _ => None,
        }
    }
}
