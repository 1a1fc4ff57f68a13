//! Backend registry
//!
//! Dispatches by [`EncryptionType`] and owns the cross-cutting concerns of a
//! remote call: a bounded timeout, a span and the dispatch metrics. Services
//! never talk to a backend directly.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

use super::backend::{EncryptionBackend, SecretEngine};
use crate::backend_span;
use crate::domain::{EncryptedRecord, EncryptionType, SecretBytes, SecretManagerConfig, TenantId};
use crate::errors::{BackendErrorCode, KeywardError, Result};
use crate::observability::{record_backend_call, CallOutcome};

/// Timeout applied when none is configured
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct BackendRegistry {
    backends: HashMap<EncryptionType, Arc<dyn EncryptionBackend>>,
    call_timeout: Duration,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT)
    }
}

impl BackendRegistry {
    pub fn new(call_timeout: Duration) -> Self {
        Self { backends: HashMap::new(), call_timeout }
    }

    /// Register a backend under its own encryption type, replacing any previous one
    pub fn register(&mut self, backend: Arc<dyn EncryptionBackend>) -> &mut Self {
        let encryption_type = backend.encryption_type();
        if self.backends.insert(encryption_type, backend).is_some() {
            warn!(encryption_type = %encryption_type, "Replaced registered backend");
        } else {
            info!(encryption_type = %encryption_type, "Registered encryption backend");
        }
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn EncryptionBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn contains(&self, encryption_type: EncryptionType) -> bool {
        self.backends.contains_key(&encryption_type)
    }

    pub fn registered_types(&self) -> Vec<EncryptionType> {
        let mut types: Vec<_> = self.backends.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    pub fn get(&self, encryption_type: EncryptionType) -> Result<Arc<dyn EncryptionBackend>> {
        self.backends.get(&encryption_type).cloned().ok_or_else(|| {
            KeywardError::unsupported(format!(
                "No backend registered for encryption type {}",
                encryption_type
            ))
        })
    }

    async fn dispatch<T, F>(
        &self,
        encryption_type: EncryptionType,
        operation: &'static str,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let span = backend_span!(operation, encryption_type);

        let (result, outcome) =
            match tokio::time::timeout(self.call_timeout, call.instrument(span)).await {
                Ok(Ok(value)) => (Ok(value), CallOutcome::Success),
                Ok(Err(e)) => (Err(e), CallOutcome::Error),
                Err(_) => {
                    warn!(
                        encryption_type = %encryption_type,
                        operation = operation,
                        timeout_ms = self.call_timeout.as_millis() as u64,
                        "Backend call timed out"
                    );
                    let err = KeywardError::secret_management(
                        BackendErrorCode::Timeout,
                        format!(
                            "{} {} timed out after {:?}",
                            encryption_type, operation, self.call_timeout
                        ),
                    );
                    (Err(err), CallOutcome::Timeout)
                }
            };

        record_backend_call(encryption_type, operation, outcome, start.elapsed());
        result
    }

    pub async fn validate(&self, config: &SecretManagerConfig) -> Result<()> {
        let backend = self.get(config.encryption_type)?;
        self.dispatch(config.encryption_type, "validate", backend.validate(config)).await
    }

    pub async fn encrypt(
        &self,
        tenant_id: &TenantId,
        name: &str,
        plaintext: &SecretBytes,
        config: &SecretManagerConfig,
    ) -> Result<EncryptedRecord> {
        let backend = self.get(config.encryption_type)?;
        let call = backend.encrypt_secret(tenant_id, name, plaintext, config);
        self.dispatch(config.encryption_type, "encrypt", call).await
    }

    pub async fn update(
        &self,
        tenant_id: &TenantId,
        name: &str,
        plaintext: &SecretBytes,
        existing: &EncryptedRecord,
        config: &SecretManagerConfig,
    ) -> Result<EncryptedRecord> {
        let backend = self.get(config.encryption_type)?;
        let call = backend.update_secret(tenant_id, name, plaintext, existing, config);
        self.dispatch(config.encryption_type, "update", call).await
    }

    pub async fn decrypt(
        &self,
        tenant_id: &TenantId,
        record: &EncryptedRecord,
        config: &SecretManagerConfig,
    ) -> Result<SecretBytes> {
        let backend = self.get(config.encryption_type)?;
        let call = backend.decrypt_secret(tenant_id, record, config);
        self.dispatch(config.encryption_type, "decrypt", call).await
    }

    pub async fn resolve_reference(
        &self,
        tenant_id: &TenantId,
        path: &str,
        config: &SecretManagerConfig,
    ) -> Result<SecretBytes> {
        let backend = self.get(config.encryption_type)?;
        let call = backend.resolve_reference(tenant_id, path, config);
        self.dispatch(config.encryption_type, "resolve_reference", call).await
    }

    /// Delete remote state. Nothing at the location counts as deleted.
    pub async fn delete(
        &self,
        tenant_id: &TenantId,
        record: &EncryptedRecord,
        config: &SecretManagerConfig,
    ) -> Result<()> {
        let backend = self.get(config.encryption_type)?;
        let call = backend.delete_secret(tenant_id, record, config);
        match self.dispatch(config.encryption_type, "delete", call).await {
            Err(e) if e.is_backend_not_found() => {
                debug!(record_kind = %record.kind(), "Remote secret already absent");
                Ok(())
            }
            other => other,
        }
    }

    pub async fn deprovision(&self, config: &SecretManagerConfig) -> Result<()> {
        let backend = self.get(config.encryption_type)?;
        self.dispatch(config.encryption_type, "deprovision", backend.deprovision(config)).await
    }

    pub async fn list_engines(&self, config: &SecretManagerConfig) -> Result<Vec<SecretEngine>> {
        let backend = self.get(config.encryption_type)?;
        self.dispatch(config.encryption_type, "list_engines", backend.list_engines(config)).await
    }
}
