//! Session sharing through the registry.

#![allow(clippy::pedantic)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{CallKind, ScriptedBackend, approle_config, connector, millis, secs};
use serial_test::serial;
use tokio::time::{sleep, timeout};
use vaultenv::auth::{AppRoleAuth, KubernetesAuth, LdapAuth};
use vaultenv::{
    BackendClient, BackendError, Error, SessionConfig, SessionRegistry, TlsIdentity,
};

const CA: &str = "-----BEGIN CERTIFICATE-----\nQ0E=\n-----END CERTIFICATE-----";

fn backend() -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::new(secs(60), false))
}

#[tokio::test]
async fn test_connector_runs_once_per_identity() {
    let registry = Arc::new(SessionRegistry::new());
    let backend = backend();
    let connects = AtomicUsize::new(0);
    let counting = |_: &SessionConfig| -> Result<Arc<dyn BackendClient>, BackendError> {
        connects.fetch_add(1, Ordering::SeqCst);
        Ok(backend.clone())
    };

    let a = registry.acquire(approle_config("vault:8200"), &counting).unwrap();
    let b = registry.acquire(approle_config("vault:8200"), &counting).unwrap();
    let c = registry.acquire(approle_config("vault:8200"), &counting).unwrap();

    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(a.fingerprint(), c.fingerprint());
    assert!(Arc::ptr_eq(b.session(), c.session()));

    a.close().await;
    b.close().await;
    c.close().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_shared_session_logs_in_once() {
    let registry = Arc::new(SessionRegistry::new());
    let backend = backend();
    let connect = connector(&backend);

    let a = registry.acquire(approle_config("vault:8200"), &connect).unwrap();
    let b = registry.acquire(approle_config("vault:8200"), &connect).unwrap();

    a.read("secret/a").await.unwrap();
    b.read("secret/b").await.unwrap();

    assert_eq!(backend.count(CallKind::Login), 1);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_header_order_does_not_split_sessions() {
    let registry = Arc::new(SessionRegistry::new());
    let backend = backend();
    let connect = connector(&backend);

    let a = registry
        .acquire(
            approle_config("vault:8200")
                .with_header("X-Vault-Namespace", "team")
                .with_header("X-Request-Source", "app"),
            &connect,
        )
        .unwrap();
    let b = registry
        .acquire(
            approle_config("vault:8200")
                .with_header("X-Request-Source", "app")
                .with_header("X-Vault-Namespace", "team"),
            &connect,
        )
        .unwrap();

    assert!(Arc::ptr_eq(a.session(), b.session()));
}

#[tokio::test]
async fn test_distinct_identities_get_distinct_sessions() {
    let registry = Arc::new(SessionRegistry::new());
    let backend = backend();
    let connect = connector(&backend);

    let configs = [
        approle_config("vault:8200"),
        approle_config("vault:8201"),
        approle_config("vault:8200").with_header("X-Vault-Namespace", "team"),
        approle_config("vault:8200").with_tls(TlsIdentity::new().with_ca_pem(CA).unwrap()),
        SessionConfig::new("vault:8200").with_auth(AppRoleAuth::new("other-role", "secret-id")),
        SessionConfig::new("vault:8200").with_auth(
            KubernetesAuth::new("app").with_service_account_token("eyJhbGciOi"),
        ),
        SessionConfig::new("vault:8200").with_auth(LdapAuth::new("alice", "pw")),
        SessionConfig::new("vault:8200").with_access_token("s.one"),
        SessionConfig::new("vault:8200").with_access_token("s.two"),
    ];
    let count = configs.len();

    let handles: Vec<_> = configs
        .into_iter()
        .map(|config| registry.acquire(config, &connect).unwrap())
        .collect();

    assert_eq!(registry.len(), count);
    for (i, a) in handles.iter().enumerate() {
        for b in &handles[i + 1..] {
            assert_ne!(a.fingerprint(), b.fingerprint());
        }
    }

    for handle in &handles {
        handle.close().await;
    }
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_release_closes_session_and_next_acquire_reconnects() {
    let registry = Arc::new(SessionRegistry::new());
    let backend = backend();
    let connect = connector(&backend);

    let first = registry.acquire(approle_config("vault:8200"), &connect).unwrap();
    first.read("secret/a").await.unwrap();
    let old = Arc::clone(first.session());
    first.close().await;

    assert!(old.is_closed());
    assert!(registry.is_empty());

    let second = registry.acquire(approle_config("vault:8200"), &connect).unwrap();
    assert!(!Arc::ptr_eq(&old, second.session()));
    second.read("secret/a").await.unwrap();
    assert_eq!(backend.count(CallKind::Login), 2);

    second.close().await;
}

#[test]
fn test_invalid_config_is_rejected_before_connecting() {
    let registry = Arc::new(SessionRegistry::new());
    let backend = backend();
    let connect = connector(&backend);

    let err = registry
        .acquire(SessionConfig::new("vault:8200"), &connect)
        .unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));

    let err = registry
        .acquire(approle_config(""), &connect)
        .unwrap_err();
    assert!(err.to_string().contains("host"));

    assert!(registry.is_empty());
}

#[tokio::test]
#[serial]
async fn test_global_registry_is_shared() {
    let backend = backend();
    let connect = connector(&backend);
    let config = || approle_config("global.registry.test:8200");

    let a = SessionRegistry::global().acquire(config(), &connect).unwrap();
    let b = SessionRegistry::global().acquire(config(), &connect).unwrap();

    assert!(Arc::ptr_eq(a.session(), b.session()));
    assert!(SessionRegistry::global().contains(&a.fingerprint()));

    a.close().await;
    b.close().await;
    assert!(!SessionRegistry::global().contains(&a.fingerprint()));
}

#[tokio::test(start_paused = true)]
async fn test_last_release_does_not_wait_for_stalled_read() {
    let registry = Arc::new(SessionRegistry::new());
    let backend = Arc::new(ScriptedBackend::new(secs(60), true).stalled_reads());
    let connect = connector(&backend);

    let handle = Arc::new(registry.acquire(approle_config("vault:8200"), &connect).unwrap());
    let reader = tokio::spawn({
        let handle = Arc::clone(&handle);
        async move { handle.read("secret/a").await }
    });
    sleep(millis(10)).await;
    assert_eq!(backend.count(CallKind::Read), 1);

    timeout(secs(2), handle.close())
        .await
        .expect("release waited for an in-flight read");
    assert!(registry.is_empty());

    reader.abort();
}
