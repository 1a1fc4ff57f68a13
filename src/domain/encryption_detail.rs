//! Per-field decryption instructions for entities that hold secret references.

use serde::Serialize;

use super::{EncryptionType, Scope, SecretId, SecretManagerConfig, SecretPayload};

/// One encrypted field on a host entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFieldRef {
    pub field_name: String,
    /// `None` when the field is not set on this instance
    pub secret_id: Option<SecretId>,
}

impl EncryptedFieldRef {
    pub fn new(field_name: impl Into<String>, secret_id: Option<SecretId>) -> Self {
        Self { field_name: field_name.into(), secret_id }
    }
}

/// An entity whose fields point at secrets (connectors, service variables, ...)
pub trait EncryptableEntity {
    /// Entity kind used in usage logs
    fn entity_type(&self) -> &str;

    fn entity_id(&self) -> &str;

    /// Scope the entity lives in; resolution is checked against it
    fn scope(&self) -> &Scope;

    fn encrypted_fields(&self) -> Vec<EncryptedFieldRef>;
}

/// What a downstream executor needs to decrypt one field
#[derive(Debug, Clone, Serialize)]
pub struct EncryptedDataDetail {
    pub field_name: String,
    pub secret_id: SecretId,
    pub secret_name: String,
    pub encryption_type: EncryptionType,
    pub payload: SecretPayload,
    /// Owning config with unsealed credentials (redacted when serialized)
    pub secret_manager: SecretManagerConfig,
}
