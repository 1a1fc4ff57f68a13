//! Runs against a real Vault dev server.
//!
//! Start one with `vault server -dev -dev-root-token-id=root` and run
//! `VAULT_ADDR=http://127.0.0.1:8200 VAULT_TOKEN=root cargo test --features vault_tests`.
#![cfg(feature = "vault_tests")]

mod common;

use common::test_config;
use keyward::domain::{
    ConnectionSettings, DeleteOutcome, NewSecret, NewSecretManagerConfig, Scope, SecretBytes,
    SecretString, SecretUpdate, SecretValue, TenantId,
};
use keyward::Keyward;

fn vault_config(name: &str) -> NewSecretManagerConfig {
    let address = std::env::var("VAULT_ADDR").unwrap_or_else(|_| "http://127.0.0.1:8200".into());
    let token = std::env::var("VAULT_TOKEN").unwrap_or_else(|_| "root".into());
    NewSecretManagerConfig {
        scope: Scope::account(),
        name: name.to_string(),
        description: None,
        encryption_type: "VAULT".to_string(),
        is_default: false,
        platform_managed: false,
        connection: ConnectionSettings {
            url: Some(address),
            engine_name: Some("secret".to_string()),
            engine_version: Some(2),
            base_path: Some(format!("keyward-it/{}", uuid::Uuid::new_v4())),
            ..Default::default()
        },
        credentials: Some(SecretString::new(token)),
        skip_validation: false,
    }
}

#[tokio::test]
async fn test_vault_secret_lifecycle() {
    let keyward = Keyward::builder(test_config()).build_in_memory().unwrap();
    let tenant = TenantId::new("vault-it").unwrap();
    let scope = Scope::account();

    let config = keyward.secret_managers().create(&tenant, vault_config("dev")).await.unwrap();
    assert!(keyward
        .secret_managers()
        .test_connection(&tenant, &scope, &config.id)
        .await
        .is_success());

    let request = NewSecret::text(scope.clone(), "s1", "v1").with_secret_manager(config.id);
    let secret = keyward.secrets().create(&tenant, request).await.unwrap();

    let update = SecretUpdate {
        name: Some("s2".into()),
        value: Some(SecretValue::Inline(SecretBytes::from("v2"))),
        ..Default::default()
    };
    keyward.secrets().update(&tenant, &scope, &secret.id, update).await.unwrap();
    let value = keyward.secrets().get_decrypted_value(&tenant, &scope, &secret.id).await.unwrap();
    assert_eq!(value.expose_secret(), b"v2");

    let outcome = keyward.secrets().delete(&tenant, &scope, &secret.id, false).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Deleted);
}
