//! Secrets backend provider and loader integration.

#![allow(clippy::pedantic)]

mod common;

use std::env;
use std::sync::Arc;

use common::{CallKind, ScriptedBackend, approle_config, connector, secs};
use serde_json::json;
use serial_test::serial;
use vaultenv::provider::{AsyncProvider, VaultProvider, priority};
use vaultenv::{
    BackendError, ConfigLoader, Error, ProviderError, ProviderSource, SessionRegistry, Source,
};

const KV2_PATH: &str = "secret/data/app";
const KV1_PATH: &str = "kv/app";

fn scripted() -> Arc<ScriptedBackend> {
    Arc::new(
        ScriptedBackend::new(secs(3600), true)
            .with_secret(
                KV2_PATH,
                json!({
                    "data": { "db_password": "hunter2", "port": 5432, "debug": null },
                    "metadata": { "version": 3 }
                }),
            )
            .with_secret(KV1_PATH, json!({ "api_key": "k-123" })),
    )
}

fn provider(backend: &Arc<ScriptedBackend>, path: &str) -> VaultProvider {
    let registry = Arc::new(SessionRegistry::new());
    let handle = registry
        .acquire(approle_config("vault:8200"), &connector(backend))
        .unwrap();
    VaultProvider::new(handle, path)
}

// ============================================================================
// VaultProvider
// ============================================================================

#[tokio::test]
async fn test_reads_kv_v2_fields() {
    let backend = scripted();
    let provider = provider(&backend, KV2_PATH);

    let value = provider.get("db_password").await.unwrap().unwrap();
    assert_eq!(value.value, "hunter2");
    assert!(value.secret);
    assert_eq!(value.source, ProviderSource::secret_backend(KV2_PATH));

    let port = provider.get("port").await.unwrap().unwrap();
    assert_eq!(port.value, "5432");

    assert!(provider.get("debug").await.unwrap().is_none());
    assert!(provider.get("version").await.unwrap().is_none());

    assert_eq!(backend.count(CallKind::Read), 1);
    assert_eq!(provider.priority(), priority::SECRET_BACKEND);

    provider.close().await;
}

#[tokio::test]
async fn test_reads_kv_v1_fields() {
    let backend = scripted();
    let provider = provider(&backend, KV1_PATH);

    let fields = provider.load().await.unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields["api_key"], "k-123");

    provider.close().await;
}

#[tokio::test]
async fn test_empty_secret_is_data_not_found() {
    let backend = scripted();
    let provider = provider(&backend, "secret/data/missing");

    let err = provider.load_json().await.unwrap_err();
    assert!(matches!(err, Error::Read { .. }));
    assert!(err.to_string().contains("data not found"));

    backend.push_read(Ok(None));
    let err = provider.load_json().await.unwrap_err();
    assert!(err.to_string().contains("data not found"));

    provider.close().await;
}

#[tokio::test]
async fn test_login_failure_is_connection_error() {
    let backend = scripted();
    backend.push_login(Err(BackendError::response(400, "invalid secret_id")));
    let provider = provider(&backend, KV2_PATH);

    let err = provider.get("db_password").await.unwrap_err();
    assert!(matches!(err, ProviderError::Connection { .. }));

    // A failed load is not cached
    let value = provider.get("db_password").await.unwrap().unwrap();
    assert_eq!(value.value, "hunter2");

    provider.close().await;
}

#[tokio::test]
async fn test_closed_provider_is_unavailable() {
    let backend = scripted();
    let provider = provider(&backend, KV2_PATH);

    assert!(provider.is_available().await);
    provider.close().await;
    assert!(!provider.is_available().await);
}

#[test]
fn test_connect_rejects_empty_path() {
    let backend = scripted();
    let result = VaultProvider::connect(approle_config("vault:8200"), &connector(&backend), "/");
    assert!(matches!(result, Err(Error::Configuration { .. })));
}

// ============================================================================
// ConfigLoader Integration
// ============================================================================

#[test]
#[serial]
fn test_loader_with_env_override() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let backend = scripted();

    // SAFETY: Tests are serialized with #[serial]
    unsafe {
        env::set_var("VAULTENV_IT_port", "6543");
        env::remove_var("VAULTENV_IT_db_password");
    }

    let mut loader = ConfigLoader::new()
        .with_env_prefix("VAULTENV_IT_")
        .with_async_provider(provider(&backend, KV2_PATH), runtime.handle().clone());

    assert_eq!(loader.get_str("db_password").as_deref(), Some("hunter2"));
    assert_eq!(loader.get_parsed::<u16>("port").unwrap(), Some(6543));
    assert_eq!(
        loader.get_with_default("pool_size", "8").value,
        "8"
    );
    assert!(loader.get_required("api_key").is_none());

    let sources = loader.sources();
    assert_eq!(
        sources.get("db_password").unwrap().source,
        Source::SecretBackend(KV2_PATH.into())
    );
    assert_eq!(sources.get("port").unwrap().source, Source::Environment);
    assert_eq!(sources.get("pool_size").unwrap().source, Source::Default);

    let err = loader.finish().unwrap_err();
    assert!(matches!(err, Error::Missing { .. }));
    assert_eq!(backend.count(CallKind::Login), 1);

    // SAFETY: Tests are serialized with #[serial]
    unsafe {
        env::remove_var("VAULTENV_IT_port");
    }
}

#[test]
fn test_loader_accumulates_backend_errors() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let backend = scripted();
    backend.push_login(Err(BackendError::transport("connection refused")));
    backend.push_login(Err(BackendError::transport("connection refused")));

    let mut loader = ConfigLoader::new()
        .with_async_provider(provider(&backend, KV2_PATH), runtime.handle().clone());

    assert!(loader.get("db_password").is_none());
    assert!(loader.get("port").is_none());

    let err = loader.finish().unwrap_err();
    let Error::Multiple { errors } = err else {
        panic!("expected Multiple");
    };
    assert_eq!(errors.len(), 2);
    assert!(matches!(errors[0], Error::Provider { .. }));
}
