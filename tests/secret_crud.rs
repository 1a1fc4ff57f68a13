//! Secret lifecycle against the in-process Vault store and KMS

mod common;

use std::sync::atomic::Ordering;

use common::{gcp_request, harness, vault_request, Harness};
use keyward::domain::{
    DeleteOutcome, EncryptedFieldRef, EncryptableEntity, EncryptedRecord, EncryptionType,
    NewSecret, ParentReference, Scope, SecretBytes, SecretId, SecretKind, SecretPayload,
    SecretRecord, SecretUpdate, SecretValue, SECRET_MASK,
};
use keyward::errors::KeywardError;
use keyward::services::AuditAction;

async fn vault_secret(h: &Harness, scope: Scope, name: &str, value: &str) -> SecretRecord {
    let config = match h.configs().list(&h.tenant, false).await.unwrap().into_iter().next() {
        Some(config) => config,
        None => h.configs().create(&h.tenant, vault_request("vaultA")).await.unwrap(),
    };
    let request = NewSecret::text(scope, name, value).with_secret_manager(config.id);
    h.secrets().create(&h.tenant, request).await.unwrap()
}

fn remote_path(record: &SecretRecord) -> String {
    match &record.payload {
        SecretPayload::Inline { record: EncryptedRecord::Remote { path } } => path.clone(),
        other => panic!("expected a remote payload, got {:?}", other),
    }
}

fn text_value(value: &str) -> Option<SecretValue> {
    Some(SecretValue::Inline(SecretBytes::from(value)))
}

#[tokio::test]
async fn test_vault_secret_written_under_base_path() {
    let h = harness();
    let secret = vault_secret(&h, Scope::account(), "s1", "v1").await;

    assert_eq!(secret.encryption_type, EncryptionType::Vault);
    assert_eq!(remote_path(&secret), "keyward/s1");
    assert_eq!(h.remote.value("keyward/s1", "value").await.as_deref(), Some("v1"));

    let value =
        h.secrets().get_decrypted_value(&h.tenant, &Scope::account(), &secret.id).await.unwrap();
    assert_eq!(value.expose_secret(), b"v1");
}

#[tokio::test]
async fn test_project_secret_path_is_scope_qualified() {
    let h = harness();
    let scope = Scope::project("eng", "api");
    let secret = vault_secret(&h, scope, "db", "pw").await;
    assert_eq!(remote_path(&secret), "keyward/eng/api/db");
}

#[tokio::test]
async fn test_update_value_replaces_remote_value() {
    let h = harness();
    let scope = Scope::account();
    let secret = vault_secret(&h, scope.clone(), "s1", "v1").await;

    let update = SecretUpdate { value: text_value("v2"), ..Default::default() };
    let updated = h.secrets().update(&h.tenant, &scope, &secret.id, update).await.unwrap();

    let value = h.secrets().get_decrypted_value(&h.tenant, &scope, &updated.id).await.unwrap();
    assert_eq!(value.expose_secret(), b"v2");
    // "v1" is gone from the backend
    assert_eq!(h.remote.paths().await, vec!["keyward/s1".to_string()]);
    assert_eq!(h.remote.value("keyward/s1", "value").await.as_deref(), Some("v2"));
}

#[tokio::test]
async fn test_rename_moves_remote_value() {
    let h = harness();
    let scope = Scope::account();
    let secret = vault_secret(&h, scope.clone(), "s1", "v1").await;

    let update = SecretUpdate { name: Some("s2".into()), ..Default::default() };
    let renamed = h.secrets().update(&h.tenant, &scope, &secret.id, update).await.unwrap();

    assert_eq!(remote_path(&renamed), "keyward/s2");
    assert!(!h.remote.contains("keyward/s1").await);
    assert_eq!(h.remote.value("keyward/s2", "value").await.as_deref(), Some("v1"));
    assert_eq!(
        h.audit.events().last().and_then(|e| e.description.clone()).as_deref(),
        Some("Changed name")
    );
}

#[tokio::test]
async fn test_rename_with_new_value() {
    let h = harness();
    let scope = Scope::account();
    let secret = vault_secret(&h, scope.clone(), "s1", "v1").await;

    let update =
        SecretUpdate { name: Some("s2".into()), value: text_value("v2"), ..Default::default() };
    let renamed = h.secrets().update(&h.tenant, &scope, &secret.id, update).await.unwrap();

    assert_eq!(h.remote.paths().await, vec!["keyward/s2".to_string()]);
    let value = h.secrets().get_decrypted_value(&h.tenant, &scope, &renamed.id).await.unwrap();
    assert_eq!(value.expose_secret(), b"v2");
    assert_eq!(
        h.audit.events().last().and_then(|e| e.description.clone()).as_deref(),
        Some("Changed name & value")
    );
}

#[tokio::test]
async fn test_failed_remote_write_leaves_no_record() {
    let h = harness();
    let config = h.configs().create(&h.tenant, vault_request("vaultA")).await.unwrap();
    h.remote.fail_writes.store(true, Ordering::SeqCst);

    let request = NewSecret::text(Scope::account(), "s1", "v1").with_secret_manager(config.id);
    let err = h.secrets().create(&h.tenant, request).await.unwrap_err();
    assert!(err.is_retryable());

    let filter = Default::default();
    let page = h.secrets().list(&h.tenant, &filter, Default::default()).await.unwrap();
    assert_eq!(page.total, 0);
    assert!(h.remote.paths().await.is_empty());
}

#[tokio::test]
async fn test_reference_secret_resolves_existing_value() {
    let h = harness();
    let config = h.configs().create(&h.tenant, vault_request("vaultA")).await.unwrap();
    h.remote.put("/team/db", "password", "from-vault").await;

    let mut request = NewSecret::text(Scope::account(), "db", "");
    request.value = SecretValue::Reference("/team/db#password".into());
    request.secret_manager_id = Some(config.id.clone());
    let secret = h.secrets().create(&h.tenant, request).await.unwrap();
    assert!(secret.payload.is_reference());

    let value =
        h.secrets().get_decrypted_value(&h.tenant, &Scope::account(), &secret.id).await.unwrap();
    assert_eq!(value.expose_secret(), b"from-vault");

    // Deleting the record leaves the operator's value alone
    h.secrets().delete(&h.tenant, &Scope::account(), &secret.id, false).await.unwrap();
    assert!(h.remote.contains("/team/db").await);
    assert_eq!(h.remote.deletes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_vault_reference_requires_key() {
    let h = harness();
    let config = h.configs().create(&h.tenant, vault_request("vaultA")).await.unwrap();

    let mut request = NewSecret::text(Scope::account(), "db", "");
    request.value = SecretValue::Reference("/team/db".into());
    request.secret_manager_id = Some(config.id);
    let err = h.secrets().create(&h.tenant, request).await.unwrap_err();
    assert!(matches!(err, KeywardError::Validation { .. }));
}

#[tokio::test]
async fn test_dangling_reference_is_rejected() {
    let h = harness();
    let config = h.configs().create(&h.tenant, vault_request("vaultA")).await.unwrap();

    let mut request = NewSecret::text(Scope::account(), "db", "");
    request.value = SecretValue::Reference("/nowhere#key".into());
    request.secret_manager_id = Some(config.id);
    let err = h.secrets().create(&h.tenant, request).await.unwrap_err();
    assert!(err.is_backend_not_found());
}

#[tokio::test]
async fn test_kms_references_unsupported() {
    let h = harness();
    let config = h.configs().create(&h.tenant, gcp_request("gcp1", "{}")).await.unwrap();

    let mut request = NewSecret::text(Scope::account(), "db", "");
    request.value = SecretValue::Reference("projects/p/secrets/db#value".into());
    request.secret_manager_id = Some(config.id);
    let err = h.secrets().create(&h.tenant, request).await.unwrap_err();
    assert!(matches!(err, KeywardError::Unsupported { .. }));
}

#[tokio::test]
async fn test_file_secret_cannot_be_reference() {
    let h = harness();
    let mut request = NewSecret::text(Scope::account(), "cert", "");
    request.kind = SecretKind::File;
    request.value = SecretValue::Reference("/pki/cert#pem".into());
    let err = h.secrets().create(&h.tenant, request).await.unwrap_err();
    assert!(matches!(err, KeywardError::Validation { .. }));
}

#[tokio::test]
async fn test_inline_secret_cannot_become_reference() {
    let h = harness();
    let scope = Scope::account();
    let secret = vault_secret(&h, scope.clone(), "s1", "v1").await;

    let update = SecretUpdate {
        value: Some(SecretValue::Reference("/team/db#password".into())),
        ..Default::default()
    };
    let err = h.secrets().update(&h.tenant, &scope, &secret.id, update).await.unwrap_err();
    assert!(matches!(err, KeywardError::Validation { .. }));
}

#[tokio::test]
async fn test_kms_envelope_roundtrip() {
    let h = harness();
    let config = h.configs().create(&h.tenant, gcp_request("gcp1", "{}")).await.unwrap();
    let scope = Scope::account();

    let request =
        NewSecret::text(scope.clone(), "api-key", "sk-123").with_secret_manager(config.id);
    let secret = h.secrets().create(&h.tenant, request).await.unwrap();
    match &secret.payload {
        SecretPayload::Inline { record: EncryptedRecord::Envelope { ciphertext, .. } } => {
            assert!(!ciphertext.contains("sk-123"));
        }
        other => panic!("expected an envelope, got {:?}", other),
    }

    let value = h.secrets().get_decrypted_value(&h.tenant, &scope, &secret.id).await.unwrap();
    assert_eq!(value.expose_secret(), b"sk-123");
    assert_eq!(h.kms.generated.load(Ordering::SeqCst), 1);
    assert_eq!(h.kms.unwrapped.load(Ordering::SeqCst), 1);

    // Nothing lives remotely, so delete does not call out
    let outcome = h.secrets().delete(&h.tenant, &scope, &secret.id, false).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Deleted);
}

#[tokio::test]
async fn test_masked_value_keeps_stored_payload() {
    let h = harness();
    let scope = Scope::account();
    let secret = vault_secret(&h, scope.clone(), "s1", "v1").await;
    let writes = h.remote.writes.load(Ordering::SeqCst);

    let update = SecretUpdate {
        value: text_value(SECRET_MASK),
        description: Some("rotated quarterly".into()),
        ..Default::default()
    };
    let updated = h.secrets().update(&h.tenant, &scope, &secret.id, update).await.unwrap();

    assert_eq!(updated.payload, secret.payload);
    assert_eq!(h.remote.writes.load(Ordering::SeqCst), writes);
    assert_eq!(h.remote.value("keyward/s1", "value").await.as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_delete_guarded_by_parents_and_forced() {
    let h = harness();
    let scope = Scope::account();
    let secret = vault_secret(&h, scope.clone(), "s1", "v1").await;
    let parent = ParentReference::new("connector", "c-1");
    h.secrets().add_parent_reference(&h.tenant, &scope, &secret.id, parent).await.unwrap();

    let err = h.secrets().delete(&h.tenant, &scope, &secret.id, false).await.unwrap_err();
    assert!(matches!(err, KeywardError::ReferencesExist { count: 1, .. }));
    assert!(h.remote.contains("keyward/s1").await);

    let outcome = h.secrets().delete(&h.tenant, &scope, &secret.id, true).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Deleted);
    assert!(!h.remote.contains("keyward/s1").await);
    assert!(h.secrets().get(&h.tenant, &scope, &secret.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_tolerates_value_already_gone() {
    let h = harness();
    let scope = Scope::account();
    let secret = vault_secret(&h, scope.clone(), "s1", "v1").await;
    h.remote.forget("keyward/s1").await;

    let outcome = h.secrets().delete(&h.tenant, &scope, &secret.id, false).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Deleted);
}

#[tokio::test]
async fn test_delete_keeps_record_when_backend_refuses() {
    let h = harness();
    let scope = Scope::account();
    let secret = vault_secret(&h, scope.clone(), "s1", "v1").await;
    h.remote.fail_deletes.store(true, Ordering::SeqCst);

    let err = h.secrets().delete(&h.tenant, &scope, &secret.id, false).await.unwrap_err();
    assert!(matches!(err, KeywardError::SecretManagement { .. }));
    assert!(h.secrets().get(&h.tenant, &scope, &secret.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_missing_secret_is_not_found() {
    let h = harness();
    let outcome =
        h.secrets().delete(&h.tenant, &Scope::account(), &SecretId::new(), false).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::NotFound);
}

#[tokio::test]
async fn test_transition_moves_inline_secrets_to_kms() {
    let h = harness();
    let scope = Scope::account();
    let vault = h.configs().create(&h.tenant, vault_request("vaultA")).await.unwrap();
    let kms = h.configs().create(&h.tenant, gcp_request("gcp1", "{}")).await.unwrap();

    let request =
        NewSecret::text(scope.clone(), "s1", "v1").with_secret_manager(vault.id.clone());
    let inline = h.secrets().create(&h.tenant, request).await.unwrap();
    h.remote.put("/team/db", "password", "from-vault").await;
    let mut request = NewSecret::text(scope.clone(), "db", "");
    request.value = SecretValue::Reference("/team/db#password".into());
    request.secret_manager_id = Some(vault.id.clone());
    let reference = h.secrets().create(&h.tenant, request).await.unwrap();

    let moved = h.secrets().transition_secrets(&h.tenant, &vault.id, &kms.id).await.unwrap();
    assert_eq!(moved, 1);

    let migrated = h.secrets().get(&h.tenant, &scope, &inline.id).await.unwrap().unwrap();
    assert_eq!(migrated.encryption_type, EncryptionType::GcpKms);
    assert_eq!(migrated.secret_manager_id, kms.id);
    assert!(migrated.version > inline.version);
    assert!(!h.remote.contains("keyward/s1").await);
    let value = h.secrets().get_decrypted_value(&h.tenant, &scope, &inline.id).await.unwrap();
    assert_eq!(value.expose_secret(), b"v1");

    let untouched = h.secrets().get(&h.tenant, &scope, &reference.id).await.unwrap().unwrap();
    assert_eq!(untouched.secret_manager_id, vault.id);
    assert_eq!(h.audit.actions_for(inline.id.as_str()).last(), Some(&AuditAction::Migrate));
}

struct Connector {
    id: String,
    scope: Scope,
    token: Option<SecretId>,
    password: Option<SecretId>,
}

impl EncryptableEntity for Connector {
    fn entity_type(&self) -> &str {
        "connector"
    }

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn scope(&self) -> &Scope {
        &self.scope
    }

    fn encrypted_fields(&self) -> Vec<EncryptedFieldRef> {
        vec![
            EncryptedFieldRef::new("token", self.token.clone()),
            EncryptedFieldRef::new("password", self.password.clone()),
        ]
    }
}

#[tokio::test]
async fn test_encryption_details_carry_unsealed_config() {
    let h = harness();
    let secret = vault_secret(&h, Scope::org("eng"), "token", "t-1").await;
    let connector = Connector {
        id: "c-1".into(),
        scope: Scope::project("eng", "api"),
        token: Some(secret.id.clone()),
        password: None,
    };

    let details = h
        .secrets()
        .get_encryption_details(&h.tenant, &connector, Some("pipeline run"))
        .await
        .unwrap();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].field_name, "token");
    assert_eq!(details[0].encryption_type, EncryptionType::Vault);
    let credentials = details[0].secret_manager.credentials.as_ref().unwrap();
    assert_eq!(credentials.expose_secret(), common::VAULT_TOKEN);

    let usage = h.audit.actions_for(secret.id.as_str());
    assert_eq!(usage.last(), Some(&AuditAction::Usage));
}

#[tokio::test]
async fn test_encryption_details_reject_restricted_secret() {
    let h = harness();
    let secret = vault_secret(&h, Scope::account(), "token", "t-1").await;
    let mut restrictions = secret.usage_restrictions.clone();
    restrictions.scoped_to_account = true;
    h.secrets()
        .update_usage_restrictions(&h.tenant, &Scope::account(), &secret.id, restrictions)
        .await
        .unwrap();

    let connector = Connector {
        id: "c-1".into(),
        scope: Scope::org("eng"),
        token: Some(secret.id.clone()),
        password: None,
    };
    let err = h.secrets().get_encryption_details(&h.tenant, &connector, None).await.unwrap_err();
    assert!(matches!(err, KeywardError::InvalidRequest { .. }));
}

#[tokio::test]
async fn test_audit_trail_for_secret_lifecycle() {
    let h = harness();
    let scope = Scope::account();
    let secret = vault_secret(&h, scope.clone(), "s1", "v1").await;
    let update = SecretUpdate { value: text_value("v2"), ..Default::default() };
    h.secrets().update(&h.tenant, &scope, &secret.id, update).await.unwrap();
    h.secrets().delete(&h.tenant, &scope, &secret.id, false).await.unwrap();

    assert_eq!(
        h.audit.actions_for(secret.id.as_str()),
        vec![AuditAction::Create, AuditAction::Update, AuditAction::Delete]
    );
    let events = h.audit.events();
    assert!(events.iter().all(|e| !e.metadata.to_string().contains("v2")));
}
