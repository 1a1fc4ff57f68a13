//! Secret domain types
//!
//! A [`SecretRecord`] is one secret text or secret file owned by a scope
//! inside a tenant. It never holds plaintext: the value is either an
//! [`EncryptedRecord`] produced by the owning backend or a reference path
//! into a backend that already holds the value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::{
    EncryptedRecord, EncryptionType, Scope, SecretBytes, SecretId, SecretManagerId, TenantId,
};
use crate::errors::{KeywardError, Result};

/// Maximum secret name length
pub const MAX_SECRET_NAME_LEN: usize = 128;

const ILLEGAL_NAME_CHARACTERS: &[char] =
    &['~', '!', '@', '#', '$', '%', '^', '&', '*', '\'', '"', '?', '/', '<', '>', ',', ';'];

/// Checks a secret name against the allowed alphabet.
pub fn validate_secret_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(KeywardError::validation_field("Secret name must not be empty", "name"));
    }
    if name.chars().count() > MAX_SECRET_NAME_LEN {
        return Err(KeywardError::validation_field(
            format!("Secret name must be at most {} characters", MAX_SECRET_NAME_LEN),
            "name",
        ));
    }
    if name.contains(ILLEGAL_NAME_CHARACTERS) {
        return Err(KeywardError::validation_field(
            "Secret name contains one of the illegal characters ~ ! @ # $ % ^ & * ' \" ? / < > , ;",
            "name",
        ));
    }
    Ok(())
}

/// Text or file secret
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    #[default]
    Text,
    File,
}

impl SecretKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
        }
    }
}

impl std::str::FromStr for SecretKind {
    type Err = KeywardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "file" => Ok(Self::File),
            other => Err(KeywardError::validation_field(
                format!("Unknown secret kind: {}", other),
                "kind",
            )),
        }
    }
}

/// Where the secret value lives. Exactly one of the two shapes is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecretPayload {
    /// Value given by the caller and encrypted by the backend
    Inline { record: EncryptedRecord },
    /// Pointer to a value that already exists in the backend
    Reference { path: String },
}

impl SecretPayload {
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference { .. })
    }

    pub fn encrypted_record(&self) -> Option<&EncryptedRecord> {
        match self {
            Self::Inline { record } => Some(record),
            Self::Reference { .. } => None,
        }
    }
}

/// Entity that depends on a secret (e.g. a service variable)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParentReference {
    pub entity_type: String,
    pub entity_id: String,
}

impl ParentReference {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self { entity_type: entity_type.into(), entity_id: entity_id.into() }
    }
}

impl fmt::Display for ParentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

/// Which callers may resolve a secret
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRestrictions {
    /// Only account-level callers may resolve the secret
    #[serde(default)]
    pub scoped_to_account: bool,
    /// When non-empty, the caller scope must sit inside one of these
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_scopes: Vec<Scope>,
}

impl UsageRestrictions {
    pub fn permits(&self, caller: &Scope) -> bool {
        if self.scoped_to_account && !caller.is_account() {
            return false;
        }
        self.allowed_scopes.is_empty() || self.allowed_scopes.iter().any(|s| s.contains(caller))
    }

    pub fn validate(&self) -> Result<()> {
        self.allowed_scopes.iter().try_for_each(Scope::validate)
    }
}

/// A stored secret
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    pub id: SecretId,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub scope: Scope,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: SecretKind,
    /// Copied from the owning config at creation
    pub encryption_type: EncryptionType,
    pub secret_manager_id: SecretManagerId,
    pub payload: SecretPayload,
    #[serde(default)]
    pub parents: BTreeSet<ParentReference>,
    #[serde(default)]
    pub usage_restrictions: UsageRestrictions,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Value supplied when creating or updating a secret
#[derive(Debug, Clone)]
pub enum SecretValue {
    Inline(SecretBytes),
    /// Path into the backend, e.g. `/foo/bar/my-secret#my-key` for Vault
    Reference(String),
}

impl SecretValue {
    /// The mask sentinel (or an empty value) submitted back means "keep".
    pub fn is_unchanged_marker(&self) -> bool {
        match self {
            Self::Inline(bytes) => bytes.is_empty() || bytes.is_mask(),
            Self::Reference(path) => path.is_empty(),
        }
    }
}

/// Request to create a secret
#[derive(Debug, Clone)]
pub struct NewSecret {
    pub scope: Scope,
    pub name: String,
    pub description: Option<String>,
    pub kind: SecretKind,
    /// Owning config; `None` resolves the tenant's global secret manager
    pub secret_manager_id: Option<SecretManagerId>,
    pub value: SecretValue,
    pub usage_restrictions: UsageRestrictions,
}

impl NewSecret {
    pub fn text(scope: Scope, name: impl Into<String>, value: &str) -> Self {
        Self {
            scope,
            name: name.into(),
            description: None,
            kind: SecretKind::Text,
            secret_manager_id: None,
            value: SecretValue::Inline(SecretBytes::from(value)),
            usage_restrictions: UsageRestrictions::default(),
        }
    }

    pub fn with_secret_manager(mut self, id: SecretManagerId) -> Self {
        self.secret_manager_id = Some(id);
        self
    }

    /// Parse bulk-import lines of the form `name,value[,path]`.
    ///
    /// A non-empty path makes the entry a reference and its value is
    /// ignored. Blank lines are skipped.
    pub fn parse_import(scope: &Scope, text: &str) -> Result<Vec<Self>> {
        let mut requests = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.splitn(3, ',').map(str::trim).collect();
            let (name, value) = match parts.as_slice() {
                [name, value, ..] => (*name, *value),
                _ => {
                    return Err(KeywardError::validation_field(
                        format!("Import line {} must be 'name,value[,path]'", index + 1),
                        "import",
                    ))
                }
            };
            let mut request = Self::text(scope.clone(), name, value);
            if let Some(path) = parts.get(2).filter(|p| !p.is_empty()) {
                request.value = SecretValue::Reference(path.to_string());
            }
            requests.push(request);
        }
        Ok(requests)
    }
}

/// Partial update of a secret. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct SecretUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub value: Option<SecretValue>,
    pub usage_restrictions: Option<UsageRestrictions>,
    pub expected_version: Option<i64>,
}

/// Filter for listing secrets
#[derive(Debug, Clone, Default)]
pub struct SecretFilter {
    /// Restrict to one scope; `None` lists every scope of the tenant
    pub scope: Option<Scope>,
    pub ids: Option<Vec<SecretId>>,
    pub kinds: Option<Vec<SecretKind>>,
    pub encryption_types: Option<Vec<EncryptionType>>,
    pub secret_manager_id: Option<SecretManagerId>,
    /// Case-insensitive substring match on name or description
    pub search_term: Option<String>,
}

impl SecretFilter {
    pub fn matches(&self, record: &SecretRecord) -> bool {
        if self.scope.as_ref().is_some_and(|s| s != &record.scope) {
            return false;
        }
        if self.ids.as_ref().is_some_and(|ids| !ids.contains(&record.id)) {
            return false;
        }
        if self.kinds.as_ref().is_some_and(|k| !k.contains(&record.kind)) {
            return false;
        }
        if self.encryption_types.as_ref().is_some_and(|t| !t.contains(&record.encryption_type)) {
            return false;
        }
        if self.secret_manager_id.as_ref().is_some_and(|id| id != &record.secret_manager_id) {
            return false;
        }
        match self.search_term.as_deref().map(str::to_lowercase) {
            Some(term) if !term.is_empty() => {
                record.name.to_lowercase().contains(&term)
                    || record
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&term))
            }
            _ => true,
        }
    }
}
