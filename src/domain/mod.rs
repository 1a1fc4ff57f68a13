//! Domain layer
//!
//! Pure domain entities with no infrastructure dependencies beyond the
//! sqlx codec impls on the ID types.
//!
//! ## Module Organization
//!
//! - `id`: Type-safe identifiers with NewType pattern
//! - `encryption_type`: The backend family tag used for dispatch
//! - `scope`: Account / org / project ownership tuple
//! - `sensitive`: Redacting, zeroizing wrappers for plaintext
//! - `encrypted_record`: Opaque output of an encrypt call
//! - `secret_manager`: Secret-manager configuration
//! - `secret`: Secret text / file records
//! - `encryption_detail`: Per-field decryption instructions
//! - `outcome`: Delete outcomes, connectivity results and paging

pub mod encrypted_record;
pub mod encryption_detail;
pub mod encryption_type;
pub mod id;
pub mod outcome;
pub mod scope;
pub mod secret;
pub mod secret_manager;
pub mod sensitive;

pub use encrypted_record::EncryptedRecord;
pub use encryption_detail::{EncryptableEntity, EncryptedDataDetail, EncryptedFieldRef};
pub use encryption_type::EncryptionType;
pub use id::{SecretId, SecretManagerId, TenantId, GLOBAL_TENANT_ID};
pub use outcome::{ConnectivityResult, DeleteOutcome, Page, PageRequest};
pub use scope::Scope;
pub use secret::{
    validate_secret_name, NewSecret, ParentReference, SecretFilter, SecretKind, SecretPayload,
    SecretRecord, SecretUpdate, SecretValue, UsageRestrictions, MAX_SECRET_NAME_LEN,
};
pub use secret_manager::{
    ConnectionSettings, NewSecretManagerConfig, SecretManagerConfig, SecretManagerConfigUpdate,
};
pub use sensitive::{SecretBytes, SecretString, SECRET_MASK};
