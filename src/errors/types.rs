//! # Error Types
//!
//! Error taxonomy for secret-manager and secret operations using `thiserror`.

use std::fmt;

/// Custom result type for keyward operations
pub type Result<T> = std::result::Result<T, KeywardError>;

/// Machine-readable code carried by [`KeywardError::SecretManagement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorCode {
    /// The remote call did not finish within the configured timeout
    Timeout,
    /// Network failure or connection reset while talking to the backend
    ConnectionFailed,
    /// The backend rejected the configured credentials
    AuthenticationFailed,
    /// The backend has no secret at the requested path / key
    SecretNotFound,
    /// The backend answered with something we could not interpret
    MalformedResponse,
    /// Local cipher operation failed (tampered record, wrong key)
    EncryptDecryptFailed,
    /// Any other backend failure
    OperationFailed,
}

impl BackendErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionFailed => "connection_failed",
            Self::AuthenticationFailed => "authentication_failed",
            Self::SecretNotFound => "secret_not_found",
            Self::MalformedResponse => "malformed_response",
            Self::EncryptDecryptFailed => "encrypt_decrypt_failed",
            Self::OperationFailed => "operation_failed",
        }
    }

    /// Transient causes are safe to retry; auth and data failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionFailed)
    }
}

impl fmt::Display for BackendErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for keyward
#[derive(thiserror::Error, Debug)]
pub enum KeywardError {
    /// Malformed user input (missing field, invalid enum, illegal characters)
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Name collision within a tenant or scope
    #[error("Duplicate {resource_type}: {field} '{value}' already exists")]
    DuplicateField { resource_type: String, field: String, value: String },

    /// Referenced entity absent, or operation attempted in the wrong state
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Unsupported encryption type or forbidden mutation
    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    /// Remote backend call failed
    #[error("Secret management error [{code}]: {message}")]
    SecretManagement { code: BackendErrorCode, message: String },

    /// Destructive operation blocked because other entities still reference the target
    #[error("Cannot delete {resource_type} '{id}': {count} {referenced_by} still reference it")]
    ReferencesExist { resource_type: String, id: String, count: u64, referenced_by: String },

    /// Optimistic lock failure
    #[error(
        "Version conflict on {resource_type} '{id}': expected version {expected}, found {actual}"
    )]
    VersionConflict { resource_type: String, id: String, expected: i64, actual: i64 },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl KeywardError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a duplicate-field error
    pub fn duplicate<R: Into<String>, F: Into<String>, V: Into<String>>(
        resource_type: R,
        field: F,
        value: V,
    ) -> Self {
        Self::DuplicateField {
            resource_type: resource_type.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest { message: message.into() }
    }

    /// Create an unsupported operation error
    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::Unsupported { message: message.into() }
    }

    /// Create a backend failure with a machine-readable code
    pub fn secret_management<S: Into<String>>(code: BackendErrorCode, message: S) -> Self {
        Self::SecretManagement { code, message: message.into() }
    }

    /// Create a reference-count violation
    pub fn references_exist<R: Into<String>, I: Into<String>, B: Into<String>>(
        resource_type: R,
        id: I,
        count: u64,
        referenced_by: B,
    ) -> Self {
        Self::ReferencesExist {
            resource_type: resource_type.into(),
            id: id.into(),
            count,
            referenced_by: referenced_by.into(),
        }
    }

    /// Create a version conflict error
    pub fn version_conflict<R: Into<String>, I: Into<String>>(
        resource_type: R,
        id: I,
        expected: i64,
        actual: i64,
    ) -> Self {
        Self::VersionConflict {
            resource_type: resource_type.into(),
            id: id.into(),
            expected,
            actual,
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a database error with context
    pub fn database<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self::Database { source, context: context.into() }
    }

    /// Create a serialization error with context
    pub fn serialization<S: Into<String>>(source: serde_json::Error, context: S) -> Self {
        Self::Serialization { source, context: context.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Backend error code, if this is a backend failure
    pub fn backend_code(&self) -> Option<BackendErrorCode> {
        match self {
            Self::SecretManagement { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when the backend reported that the secret does not exist
    pub fn is_backend_not_found(&self) -> bool {
        self.backend_code() == Some(BackendErrorCode::SecretNotFound)
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> u16 {
        match self {
            KeywardError::Validation { .. } => 400,
            KeywardError::DuplicateField { .. } => 409,
            KeywardError::InvalidRequest { .. } => 400,
            KeywardError::Unsupported { .. } => 501,
            KeywardError::SecretManagement { code, .. } => match code {
                BackendErrorCode::Timeout => 504,
                BackendErrorCode::SecretNotFound => 404,
                _ => 502,
            },
            KeywardError::ReferencesExist { .. } => 409,
            KeywardError::VersionConflict { .. } => 409,
            KeywardError::Config { .. } => 500,
            KeywardError::Database { .. } => 500,
            KeywardError::Serialization { .. } => 400,
            KeywardError::Internal { .. } => 500,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            KeywardError::SecretManagement { code, .. } => code.is_retryable(),
            KeywardError::Database { .. } => true,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for KeywardError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<serde_json::Error> for KeywardError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON processing failed".to_string() }
    }
}

impl From<validator::ValidationErrors> for KeywardError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::validation(format!("Validation failed: {}", errors))
    }
}
