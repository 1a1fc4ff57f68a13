//! # Encryption Backends
//!
//! One [`EncryptionBackend`] per encryption family, dispatched through the
//! [`BackendRegistry`]:
//!
//! - [`LocalBackend`]: AES-256-GCM under the platform master key
//! - [`EnvelopeBackend`]: KMS data keys wrapping locally sealed values
//! - [`PathKeyedBackend`]: remote stores addressed by path (Vault, AWS
//!   Secrets Manager, Azure Key Vault), with [`VaultConnector`] built in

pub mod backend;
pub mod kms;
pub mod local;
pub mod path_keyed;
pub mod registry;
pub mod vault;

pub use backend::{EncryptionBackend, SecretEngine};
pub use kms::{DataKey, EnvelopeBackend, KmsClient, KmsConnector};
pub use local::LocalBackend;
pub use path_keyed::{
    parse_reference, secret_path, PathKeyedBackend, RemoteSecretStore, RemoteStoreConnector,
    VALUE_KEY,
};
pub use registry::{BackendRegistry, DEFAULT_CALL_TIMEOUT};
pub use vault::{VaultConnector, VaultKvStore};
