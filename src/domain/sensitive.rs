//! Wrappers for plaintext secret material.
//!
//! Plaintext only ever travels inside [`SecretString`] or [`SecretBytes`].
//! Both redact themselves in `Debug`, `Display` and serialization and zero
//! their memory on drop.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{KeywardError, Result};

const REDACTED: &str = "[REDACTED]";

/// Sentinel returned in place of real credential or secret material on every
/// outward read. Submitting it back on update means "keep the stored value".
pub const SECRET_MASK: &str = "**************";

/// A string wrapper that redacts its contents in Debug, Display, and serialization.
///
/// Deserialization accepts the real value so credentials can arrive from
/// requests or config files. Reading the value requires an explicit
/// [`SecretString::expose_secret`] call.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The mask sentinel as a secret
    pub fn mask() -> Self {
        Self(SECRET_MASK.to_string())
    }

    /// Exposes the underlying secret value. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// True when the value is the mask sentinel handed out on reads
    pub fn is_mask(&self) -> bool {
        self.0 == SECRET_MASK
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_bytes(&self) -> SecretBytes {
        SecretBytes::new(self.0.as_bytes().to_vec())
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString({})", REDACTED)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Binary plaintext (secret text encoded as UTF-8, or secret file contents).
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn expose_secret(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the bytes spell the mask sentinel
    pub fn is_mask(&self) -> bool {
        self.0 == SECRET_MASK.as_bytes()
    }

    /// Interpret the bytes as UTF-8 text
    pub fn to_secret_string(&self) -> Result<SecretString> {
        std::str::from_utf8(&self.0)
            .map(SecretString::new)
            .map_err(|_| KeywardError::validation("Secret value is not valid UTF-8"))
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes({} bytes, {})", self.0.len(), REDACTED)
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&str> for SecretBytes {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}
