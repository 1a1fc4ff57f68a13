//! Domain ID Types with NewType Pattern
//!
//! Type-safe wrappers for identifiers so a secret id can never be passed where
//! a secret-manager id or tenant id is expected. Every ID implements Display,
//! FromStr, Serialize, Deserialize and the sqlx SQLite codec traits.

use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::{Decode, Encode, Sqlite, Type};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::KeywardError;

/// Account id used for platform-wide configs shared by every tenant.
pub const GLOBAL_TENANT_ID: &str = "__GLOBAL_ACCOUNT_ID__";

/// Implements the sqlx SQLite codec for a string newtype
macro_rules! sqlite_string_codec {
    ($name:ident) => {
        impl Type<Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <String as Type<Sqlite>>::type_info()
            }
        }

        impl<'q> Encode<'q, Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<IsNull, BoxDynError> {
                <String as Encode<'q, Sqlite>>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> Decode<'r, Sqlite> for $name {
            fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
                let s = <String as Decode<'r, Sqlite>>::decode(value)?;
                Ok(Self(s))
            }
        }
    };
}

/// Macro to generate UUID-backed NewType ID wrappers with all required traits
macro_rules! domain_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new ID from a UUID
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Create an ID from an existing string (for database retrieval)
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Create an ID from a string slice
            pub fn from_str_unchecked(s: &str) -> Self {
                Self(s.to_string())
            }

            /// Get the inner string value
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Convert to inner string value
            pub fn into_string(self) -> String {
                self.0
            }

            /// Parse and validate a UUID string
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(s)?;
                Ok(Self(s.to_string()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        sqlite_string_codec!($name);
    };
}

domain_id!(
    /// Unique identifier for a secret-manager configuration
    SecretManagerId
);

domain_id!(
    /// Unique identifier for a stored secret
    SecretId
);

impl SecretManagerId {
    /// Id of the synthetic LOCAL config handed out by the global fallback chain
    pub fn local_fallback(tenant_id: &TenantId) -> Self {
        Self(format!("local:{}", tenant_id))
    }

    pub fn is_local_fallback(&self) -> bool {
        self.0.starts_with("local:")
    }
}

/// Tenant (account) identifier.
///
/// Tenants are issued by the surrounding product, so the value is an opaque
/// non-empty string rather than a UUID. It is the outer key of every stored
/// entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<Self, KeywardError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(KeywardError::validation_field("Tenant id must not be empty", "tenant_id"));
        }
        Ok(Self(id))
    }

    /// The platform-wide tenant that owns shared default configs
    pub fn global() -> Self {
        Self(GLOBAL_TENANT_ID.to_string())
    }

    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_TENANT_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = KeywardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

sqlite_string_codec!(TenantId);
