//! Audit and usage events
//!
//! Every secret and secret-manager mutation produces an [`AuditEvent`]. Events
//! are handed to an [`AuditSink`] and a failing sink never fails the
//! operation that produced the event. Events carry names and ids, never
//! values.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::domain::{SecretManagerConfig, SecretRecord, TenantId};
use crate::errors::Result;
use crate::observability::metrics::record_audit_failure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    SoftDelete,
    /// A secret was resolved for a consumer
    Usage,
    /// A secret moved to another secret manager
    Migrate,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::SoftDelete => "soft_delete",
            Self::Usage => "usage",
            Self::Migrate => "migrate",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub tenant_id: TenantId,
    pub resource_type: &'static str,
    pub resource_id: String,
    pub resource_name: String,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn secret(action: AuditAction, record: &SecretRecord) -> Self {
        Self {
            tenant_id: record.tenant_id.clone(),
            resource_type: "secret",
            resource_id: record.id.to_string(),
            resource_name: record.name.clone(),
            action,
            description: None,
            metadata: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn secret_manager(action: AuditAction, config: &SecretManagerConfig) -> Self {
        Self {
            tenant_id: config.tenant_id.clone(),
            resource_type: "secret_manager",
            resource_id: config.id.to_string(),
            resource_name: config.name.clone(),
            action,
            description: None,
            metadata: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// "Changed name & value" from the list of changed fields; `None` if nothing changed
pub fn describe_changes(changed: &[&str]) -> Option<String> {
    if changed.is_empty() {
        return None;
    }
    Some(format!("Changed {}", changed.join(" & ")))
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

/// Writes events to the `keyward::audit` tracing target
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        info!(
            target: "keyward::audit",
            tenant_id = %event.tenant_id,
            resource_type = event.resource_type,
            resource_id = %event.resource_id,
            resource_name = %event.resource_name,
            action = event.action.as_str(),
            description = event.description.as_deref().unwrap_or(""),
            "audit event"
        );
        Ok(())
    }
}

/// Deliver an event; failures are logged and counted, never returned
pub async fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    let action = event.action.as_str();
    let resource_id = event.resource_id.clone();
    if let Err(e) = sink.record(event).await {
        error!(
            error = %e,
            action = action,
            resource_id = %resource_id,
            "Failed to record audit event"
        );
        record_audit_failure(action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::KeywardError;
    use tracing_test::traced_test;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _event: AuditEvent) -> Result<()> {
            Err(KeywardError::internal("sink down"))
        }
    }

    fn event() -> AuditEvent {
        let config = SecretManagerConfig::local_fallback(&TenantId::new("acct").unwrap());
        AuditEvent::secret_manager(AuditAction::Create, &config)
    }

    #[test]
    fn test_describe_changes() {
        assert_eq!(describe_changes(&[]), None);
        assert_eq!(
            describe_changes(&["name", "value", "usage restrictions"]).as_deref(),
            Some("Changed name & value & usage restrictions")
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failing_sink_is_swallowed() {
        emit(&FailingSink, event()).await;
        assert!(logs_contain("Failed to record audit event"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_tracing_sink_logs_event() {
        emit(&TracingAuditSink, event()).await;
        assert!(logs_contain("audit event"));
    }
}
