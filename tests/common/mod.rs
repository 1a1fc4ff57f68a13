//! Common test utilities for all integration tests.
//!
//! In-process stand-ins for the remote side of the backends (a path-keyed
//! store and a KMS), a recording audit sink, and a fully wired engine.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use keyward::backends::{
    DataKey, EnvelopeBackend, KmsClient, KmsConnector, PathKeyedBackend, RemoteSecretStore,
    RemoteStoreConnector, SecretEngine,
};
use keyward::config::{AppConfig, EncryptionConfig};
use keyward::domain::{
    ConnectionSettings, EncryptionType, NewSecretManagerConfig, Scope, SecretManagerConfig,
    SecretString, TenantId,
};
use keyward::errors::{BackendErrorCode, KeywardError, Result};
use keyward::services::{AuditAction, AuditEvent, AuditSink};
use keyward::{Keyward, SecretCrudService, SecretManagerConfigService};

pub const VAULT_TOKEN: &str = "s.valid-token";
pub const KMS_KEY_ID: &str = "projects/p/locations/global/keyRings/r/cryptoKeys/k";

/// Path-keyed store kept in memory: path -> key -> value
#[derive(Default)]
pub struct MemoryRemoteStore {
    entries: RwLock<HashMap<String, HashMap<String, String>>>,
    pub fail_writes: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub writes: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl MemoryRemoteStore {
    pub async fn contains(&self, path: &str) -> bool {
        self.entries.read().await.contains_key(path)
    }

    pub async fn value(&self, path: &str, key: &str) -> Option<String> {
        self.entries.read().await.get(path).and_then(|e| e.get(key).cloned())
    }

    /// Seed a value the way an operator would, outside keyward
    pub async fn put(&self, path: &str, key: &str, value: &str) {
        self.entries
            .write()
            .await
            .entry(path.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Drop a path behind keyward's back
    pub async fn forget(&self, path: &str) {
        self.entries.write().await.remove(path);
    }

    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.entries.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl RemoteSecretStore for MemoryRemoteStore {
    async fn write(&self, path: &str, key: &str, value: &SecretString) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KeywardError::secret_management(
                BackendErrorCode::ConnectionFailed,
                "connection reset by peer",
            ));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.put(path, key, value.expose_secret()).await;
        Ok(())
    }

    async fn read(&self, path: &str, key: &str) -> Result<SecretString> {
        self.value(path, key).await.map(SecretString::new).ok_or_else(|| {
            KeywardError::secret_management(
                BackendErrorCode::SecretNotFound,
                format!("nothing at {}#{}", path, key),
            )
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(KeywardError::secret_management(
                BackendErrorCode::OperationFailed,
                "delete refused",
            ));
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        match self.entries.write().await.remove(path) {
            Some(_) => Ok(()),
            None => Err(KeywardError::secret_management(
                BackendErrorCode::SecretNotFound,
                format!("nothing at {}", path),
            )),
        }
    }

    async fn check_access(&self) -> Result<()> {
        Ok(())
    }

    async fn list_engines(&self) -> Result<Vec<SecretEngine>> {
        Ok(vec![SecretEngine {
            name: "secret".to_string(),
            engine_type: "kv".to_string(),
            version: Some(2),
        }])
    }
}

/// Hands out the shared store when the config carries [`VAULT_TOKEN`]
#[derive(Clone)]
pub struct MemoryRemoteConnector {
    pub store: Arc<MemoryRemoteStore>,
}

impl std::fmt::Debug for MemoryRemoteConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MemoryRemoteConnector")
    }
}

#[async_trait]
impl RemoteStoreConnector for MemoryRemoteConnector {
    async fn connect(&self, config: &SecretManagerConfig) -> Result<Arc<dyn RemoteSecretStore>> {
        match config.plaintext_credentials().map(|c| c.expose_secret()) {
            Some(VAULT_TOKEN) => Ok(self.store.clone()),
            _ => Err(KeywardError::secret_management(
                BackendErrorCode::AuthenticationFailed,
                "permission denied",
            )),
        }
    }
}

/// KMS that wraps data keys by XOR and counts its calls
#[derive(Default)]
pub struct ScriptedKms {
    pub generated: AtomicUsize,
    pub unwrapped: AtomicUsize,
}

#[async_trait]
impl KmsClient for ScriptedKms {
    async fn generate_data_key(&self, _key_id: &str) -> Result<DataKey> {
        let n = self.generated.fetch_add(1, Ordering::SeqCst) as u8;
        let plaintext: Vec<u8> = (0..32u8).map(|i| i.wrapping_add(n)).collect();
        let ciphertext = plaintext.iter().map(|b| b ^ 0xa5).collect();
        Ok(DataKey { plaintext: Zeroizing::new(plaintext), ciphertext })
    }

    async fn decrypt_data_key(
        &self,
        key_id: &str,
        encrypted_data_key: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        if key_id != KMS_KEY_ID {
            return Err(KeywardError::secret_management(
                BackendErrorCode::AuthenticationFailed,
                "key not accessible",
            ));
        }
        self.unwrapped.fetch_add(1, Ordering::SeqCst);
        Ok(Zeroizing::new(encrypted_data_key.iter().map(|b| b ^ 0xa5).collect()))
    }

    async fn check_access(&self, key_id: &str) -> Result<()> {
        if key_id == KMS_KEY_ID {
            Ok(())
        } else {
            Err(KeywardError::secret_management(
                BackendErrorCode::AuthenticationFailed,
                "key not accessible",
            ))
        }
    }
}

#[derive(Clone)]
pub struct ScriptedKmsConnector {
    pub kms: Arc<ScriptedKms>,
}

impl std::fmt::Debug for ScriptedKmsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ScriptedKmsConnector")
    }
}

#[async_trait]
impl KmsConnector for ScriptedKmsConnector {
    async fn connect(&self, config: &SecretManagerConfig) -> Result<Arc<dyn KmsClient>> {
        if config.plaintext_credentials().is_none() {
            return Err(KeywardError::validation_field(
                "KMS config requires service account credentials",
                "credentials",
            ));
        }
        Ok(self.kms.clone())
    }
}

/// Audit sink that keeps every event; can be told to fail
#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    pub fail: AtomicBool,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn actions_for(&self, resource_id: &str) -> Vec<AuditAction> {
        self.events()
            .into_iter()
            .filter(|e| e.resource_id == resource_id)
            .map(|e| e.action)
            .collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(KeywardError::internal("audit store unavailable"));
        }
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        Ok(())
    }
}

/// A wired engine plus handles on every fake it talks to
pub struct Harness {
    pub keyward: Keyward,
    pub remote: Arc<MemoryRemoteStore>,
    pub kms: Arc<ScriptedKms>,
    pub audit: Arc<RecordingAuditSink>,
    pub tenant: TenantId,
}

impl Harness {
    pub fn configs(&self) -> &SecretManagerConfigService {
        self.keyward.secret_managers()
    }

    pub fn secrets(&self) -> &SecretCrudService {
        self.keyward.secrets()
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        encryption: EncryptionConfig::generate("test").expect("key generation"),
        ..Default::default()
    }
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: AppConfig) -> Harness {
    let remote = Arc::new(MemoryRemoteStore::default());
    let kms = Arc::new(ScriptedKms::default());
    let audit = Arc::new(RecordingAuditSink::default());

    let keyward = Keyward::builder(config)
        .with_backend(Arc::new(PathKeyedBackend::new(
            EncryptionType::Vault,
            Arc::new(MemoryRemoteConnector { store: remote.clone() }),
        )))
        .with_backend(Arc::new(EnvelopeBackend::new(
            EncryptionType::GcpKms,
            Arc::new(ScriptedKmsConnector { kms: kms.clone() }),
        )))
        .with_audit_sink(audit.clone())
        .build_in_memory()
        .expect("engine wiring");

    Harness { keyward, remote, kms, audit, tenant: TenantId::new("acct-1").expect("tenant id") }
}

pub fn vault_request(name: &str) -> NewSecretManagerConfig {
    NewSecretManagerConfig {
        scope: Scope::account(),
        name: name.to_string(),
        description: None,
        encryption_type: "VAULT".to_string(),
        is_default: false,
        platform_managed: false,
        connection: ConnectionSettings {
            url: Some("https://vault.internal:8200".to_string()),
            engine_name: Some("secret".to_string()),
            engine_version: Some(2),
            base_path: Some("keyward".to_string()),
            ..Default::default()
        },
        credentials: Some(SecretString::new(VAULT_TOKEN)),
        skip_validation: false,
    }
}

pub fn gcp_request(name: &str, credentials: &str) -> NewSecretManagerConfig {
    NewSecretManagerConfig {
        scope: Scope::account(),
        name: name.to_string(),
        description: None,
        encryption_type: "GCP_KMS".to_string(),
        is_default: false,
        platform_managed: false,
        connection: ConnectionSettings {
            key_id: Some(KMS_KEY_ID.to_string()),
            region: Some("global".to_string()),
            ..Default::default()
        },
        credentials: Some(SecretString::new(credentials)),
        skip_validation: false,
    }
}
