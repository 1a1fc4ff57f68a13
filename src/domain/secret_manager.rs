//! Secret-manager configuration domain types
//!
//! A [`SecretManagerConfig`] describes one configured backend for a tenant:
//! which family it belongs to, how to reach it and the credentials to use.
//!
//! ## Credential handling
//!
//! Plaintext credentials only exist in [`SecretManagerConfig::credentials`]
//! while a request is being served. At rest they are kept in
//! `sealed_credentials`, sealed by the LOCAL backend. Outward reads replace
//! them with [`SECRET_MASK`](super::SECRET_MASK).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use super::{EncryptedRecord, EncryptionType, Scope, SecretManagerId, SecretString, TenantId};

/// How to reach a backend. Unused fields stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ConnectionSettings {
    /// Vault / Azure / CyberArk endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(url(message = "Connection URL must be a valid URL"))]
    pub url: Option<String>,
    /// Vault secret engine mount (e.g. "secret")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_name: Option<String>,
    /// KV engine version (1 or 2)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 2, message = "Engine version must be 1 or 2"))]
    pub engine_version: Option<u8>,
    /// Prefix under which secrets are written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
    /// Vault namespace (enterprise)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// KMS key ARN / resource name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Backend-specific extras
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl ConnectionSettings {
    /// Names of connection-identity fields that differ from `other`.
    ///
    /// These fields locate already written secrets, so they freeze once any
    /// secret references the config.
    pub fn identity_changes(&self, other: &ConnectionSettings) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.url != other.url {
            changed.push("url");
        }
        if self.engine_name != other.engine_name {
            changed.push("engine_name");
        }
        if self.engine_version != other.engine_version {
            changed.push("engine_version");
        }
        if self.base_path != other.base_path {
            changed.push("base_path");
        }
        if self.namespace != other.namespace {
            changed.push("namespace");
        }
        changed
    }
}

/// A configured secret manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretManagerConfig {
    pub id: SecretManagerId,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub scope: Scope,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub encryption_type: EncryptionType,
    #[serde(default)]
    pub is_default: bool,
    /// System-provisioned; tenants cannot mutate or delete it
    #[serde(default)]
    pub platform_managed: bool,
    #[serde(default)]
    pub connection: ConnectionSettings,
    /// Plaintext or masked credentials; never persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SecretString>,
    /// Credentials sealed by the LOCAL backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_credentials: Option<EncryptedRecord>,
    #[serde(default)]
    pub deleted: bool,
    /// Optimistic-lock token; 0 until first save
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecretManagerConfig {
    /// Synthetic LOCAL config used when a tenant with local encryption has no
    /// default of its own.
    pub fn local_fallback(tenant_id: &TenantId) -> Self {
        let now = Utc::now();
        Self {
            id: SecretManagerId::local_fallback(tenant_id),
            tenant_id: tenant_id.clone(),
            scope: Scope::account(),
            name: "Local Secret Manager".to_string(),
            description: None,
            encryption_type: EncryptionType::Local,
            is_default: true,
            platform_managed: true,
            connection: ConnectionSettings::default(),
            credentials: None,
            sealed_credentials: None,
            deleted: false,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy with credentials replaced by the mask sentinel
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        copy.credentials = copy.sealed_credentials.as_ref().map(|_| SecretString::mask());
        copy
    }

    /// Copy suitable for persistence: plaintext credentials dropped
    pub fn without_plaintext(&self) -> Self {
        let mut copy = self.clone();
        copy.credentials = None;
        copy
    }

    /// Plaintext credentials if present and not the mask
    pub fn plaintext_credentials(&self) -> Option<&SecretString> {
        self.credentials.as_ref().filter(|c| !c.is_mask())
    }
}

/// Request to create a secret-manager config
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewSecretManagerConfig {
    #[serde(default)]
    pub scope: Scope,
    #[validate(length(min = 1, max = 128, message = "Name must be 1-128 characters"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 1024, message = "Description must be at most 1024 characters"))]
    pub description: Option<String>,
    /// Raw tag; parsed so unknown types fail as unsupported rather than malformed
    pub encryption_type: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub platform_managed: bool,
    #[serde(default)]
    #[validate(nested)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub credentials: Option<SecretString>,
    /// Skip the live backend check (used when provisioning offline)
    #[serde(default)]
    pub skip_validation: bool,
}

/// Partial update of a config. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SecretManagerConfigUpdate {
    #[serde(default)]
    #[validate(length(min = 1, max = 128, message = "Name must be 1-128 characters"))]
    pub name: Option<String>,
    #[serde(default)]
    #[validate(length(max = 1024, message = "Description must be at most 1024 characters"))]
    pub description: Option<String>,
    #[serde(default)]
    pub is_default: Option<bool>,
    #[serde(default)]
    #[validate(nested)]
    pub connection: Option<ConnectionSettings>,
    /// New credentials; the mask sentinel means "unchanged"
    #[serde(default)]
    pub credentials: Option<SecretString>,
    /// Compare-and-swap token; rejected if it does not match the stored version
    #[serde(default)]
    pub expected_version: Option<i64>,
    #[serde(default)]
    pub skip_validation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SECRET_MASK;

    fn sample() -> SecretManagerConfig {
        let mut config = SecretManagerConfig::local_fallback(&TenantId::new("acct").unwrap());
        config.credentials = Some(SecretString::new("token"));
        config.sealed_credentials = Some(EncryptedRecord::Remote { path: "p".into() });
        config
    }

    #[test]
    fn test_masked_replaces_credentials() {
        let masked = sample().masked();
        assert_eq!(masked.credentials.unwrap().expose_secret(), SECRET_MASK);
    }

    #[test]
    fn test_masked_without_sealed_has_no_credentials() {
        let mut config = sample();
        config.sealed_credentials = None;
        assert!(config.masked().credentials.is_none());
    }

    #[test]
    fn test_without_plaintext() {
        assert!(sample().without_plaintext().credentials.is_none());
    }

    #[test]
    fn test_identity_changes() {
        let a = ConnectionSettings {
            url: Some("https://vault:8200".into()),
            base_path: Some("harness".into()),
            ..Default::default()
        };
        let mut b = a.clone();
        assert!(a.identity_changes(&b).is_empty());

        b.base_path = Some("other".into());
        b.region = Some("us-east-1".into());
        assert_eq!(a.identity_changes(&b), vec!["base_path"]);
    }

    #[test]
    fn test_new_config_validation() {
        let request = NewSecretManagerConfig {
            scope: Scope::account(),
            name: String::new(),
            description: None,
            encryption_type: "VAULT".into(),
            is_default: false,
            platform_managed: false,
            connection: ConnectionSettings {
                engine_version: Some(3),
                ..Default::default()
            },
            credentials: None,
            skip_validation: false,
        };
        let errors = request.validate().unwrap_err();
        let fields = errors.errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("connection"));
    }
}
