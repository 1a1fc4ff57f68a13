//! Encryption type tag
//!
//! Every secret-manager config and every secret carries the tag of the backend
//! family that owns it. Dispatch to a backend is keyed on this tag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::KeywardError;

/// Backend family owning a config or secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EncryptionType {
    /// AES-256-GCM with the platform master key
    #[serde(rename = "LOCAL")]
    Local,
    /// AWS KMS envelope encryption
    #[serde(rename = "KMS_AWS", alias = "AWS_KMS", alias = "KMS")]
    AwsKms,
    /// Google Cloud KMS envelope encryption
    #[serde(rename = "KMS_GCP", alias = "GCP_KMS")]
    GcpKms,
    /// HashiCorp Vault KV engine
    #[serde(rename = "VAULT")]
    Vault,
    /// Azure Key Vault
    #[serde(rename = "AZURE_VAULT")]
    AzureVault,
    /// AWS Secrets Manager
    #[serde(rename = "AWS_SECRETS_MANAGER")]
    AwsSecretsManager,
    /// CyberArk (read-only references)
    #[serde(rename = "CYBERARK")]
    CyberArk,
    /// Customer-provided secret manager driven by scripts
    #[serde(rename = "CUSTOM")]
    Custom,
}

impl EncryptionType {
    pub const ALL: [EncryptionType; 8] = [
        Self::Local,
        Self::AwsKms,
        Self::GcpKms,
        Self::Vault,
        Self::AzureVault,
        Self::AwsSecretsManager,
        Self::CyberArk,
        Self::Custom,
    ];

    /// Get the storage representation of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::AwsKms => "KMS_AWS",
            Self::GcpKms => "KMS_GCP",
            Self::Vault => "VAULT",
            Self::AzureVault => "AZURE_VAULT",
            Self::AwsSecretsManager => "AWS_SECRETS_MANAGER",
            Self::CyberArk => "CYBERARK",
            Self::Custom => "CUSTOM",
        }
    }

    /// Whether secrets may point at an existing path inside this backend
    /// instead of carrying a value.
    pub fn supports_references(&self) -> bool {
        matches!(self, Self::Vault | Self::AwsSecretsManager | Self::AzureVault | Self::CyberArk)
    }

    /// Whether the remote identity of a secret is its name, so a rename is a
    /// create at the new path followed by a delete of the old one.
    pub fn is_path_keyed(&self) -> bool {
        matches!(self, Self::Vault | Self::AwsSecretsManager | Self::AzureVault)
    }

    /// KMS-style backends return ciphertext that is stored inline.
    pub fn is_envelope(&self) -> bool {
        matches!(self, Self::AwsKms | Self::GcpKms)
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EncryptionType {
    type Err = KeywardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOCAL" => Ok(Self::Local),
            "KMS_AWS" | "AWS_KMS" | "KMS" => Ok(Self::AwsKms),
            "KMS_GCP" | "GCP_KMS" => Ok(Self::GcpKms),
            "VAULT" => Ok(Self::Vault),
            "AZURE_VAULT" => Ok(Self::AzureVault),
            "AWS_SECRETS_MANAGER" => Ok(Self::AwsSecretsManager),
            "CYBERARK" => Ok(Self::CyberArk),
            "CUSTOM" => Ok(Self::Custom),
            other => Err(KeywardError::unsupported(format!(
                "Encryption type '{}' is not supported",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_storage_repr() {
        for ty in EncryptionType::ALL {
            assert_eq!(ty.as_str().parse::<EncryptionType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("GCP_KMS".parse::<EncryptionType>().unwrap(), EncryptionType::GcpKms);
        assert_eq!("vault".parse::<EncryptionType>().unwrap(), EncryptionType::Vault);

        let ty: EncryptionType = serde_json::from_str("\"GCP_KMS\"").unwrap();
        assert_eq!(ty, EncryptionType::GcpKms);
        assert_eq!(serde_json::to_string(&ty).unwrap(), "\"KMS_GCP\"");
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let err = "UNSUPPORTED_TYPE".parse::<EncryptionType>().unwrap_err();
        assert!(matches!(err, KeywardError::Unsupported { .. }));
    }

    #[test]
    fn test_capabilities() {
        assert!(EncryptionType::Vault.is_path_keyed());
        assert!(EncryptionType::Vault.supports_references());
        assert!(EncryptionType::CyberArk.supports_references());
        assert!(!EncryptionType::CyberArk.is_path_keyed());
        assert!(!EncryptionType::Local.supports_references());
        assert!(EncryptionType::GcpKms.is_envelope());
    }
}
