//! Shared test fixtures: a scripted in-memory secrets backend.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use vaultenv::auth::AppRoleAuth;
use vaultenv::{
    AuthMethod, BackendClient, BackendError, BoxFuture, Secret, SecretAuth, SecretString,
    SessionConfig,
};

/// Which backend call was made.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    Login,
    Renew,
    Read,
}

/// Backend whose answers are queued up front.
///
/// Queued responses are used first; once a queue is empty every call gets
/// the default answer: logins and renewals return a token with the
/// configured TTL, reads return the stored secret for the path.
pub struct ScriptedBackend {
    ttl: Duration,
    renewable: bool,
    renew_status: Option<u16>,
    stall_reads: bool,
    epoch: Instant,
    logins: Mutex<VecDeque<Result<Secret, BackendError>>>,
    renewals: Mutex<VecDeque<Result<Secret, BackendError>>>,
    reads: Mutex<VecDeque<Result<Option<Secret>, BackendError>>>,
    secrets: Mutex<HashMap<String, Secret>>,
    calls: Mutex<Vec<(CallKind, Duration)>>,
}

impl ScriptedBackend {
    pub fn new(ttl: Duration, renewable: bool) -> Self {
        Self {
            ttl,
            renewable,
            renew_status: None,
            stall_reads: false,
            epoch: Instant::now(),
            logins: Mutex::new(VecDeque::new()),
            renewals: Mutex::new(VecDeque::new()),
            reads: Mutex::new(VecDeque::new()),
            secrets: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every renewal without a queued answer fails with `status`.
    pub fn failing_renewals(mut self, status: u16) -> Self {
        self.renew_status = Some(status);
        self
    }

    /// Reads are recorded and then never complete.
    pub fn stalled_reads(mut self) -> Self {
        self.stall_reads = true;
        self
    }

    /// Stores `data` as the payload returned for reads of `path`.
    pub fn with_secret(self, path: &str, data: Value) -> Self {
        let Value::Object(map) = data else {
            panic!("secret data must be a JSON object");
        };
        self.secrets
            .lock()
            .insert(path.to_string(), Secret::with_data(map));
        self
    }

    pub fn push_login(&self, result: Result<Secret, BackendError>) {
        self.logins.lock().push_back(result);
    }

    pub fn push_renewal(&self, result: Result<Secret, BackendError>) {
        self.renewals.lock().push_back(result);
    }

    pub fn push_read(&self, result: Result<Option<Secret>, BackendError>) {
        self.reads.lock().push_back(result);
    }

    /// Offsets from construction of every call of `kind`.
    pub fn calls(&self, kind: CallKind) -> Vec<Duration> {
        self.calls
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.calls(kind).len()
    }

    fn record(&self, kind: CallKind) -> usize {
        let mut calls = self.calls.lock();
        calls.push((kind, self.epoch.elapsed()));
        calls.iter().filter(|(k, _)| *k == kind).count()
    }

    fn token(&self, prefix: &str, n: usize) -> Secret {
        Secret::with_auth(SecretAuth::new(
            format!("s.{prefix}-{n}"),
            self.ttl,
            self.renewable,
        ))
    }
}

impl BackendClient for ScriptedBackend {
    fn login<'a>(&'a self, _auth: &'a AuthMethod) -> BoxFuture<'a, Result<Secret, BackendError>> {
        Box::pin(async move {
            let n = self.record(CallKind::Login);
            self.logins
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(self.token("login", n)))
        })
    }

    fn renew_self<'a>(
        &'a self,
        _client_token: &'a SecretString,
        _increment: Duration,
    ) -> BoxFuture<'a, Result<Secret, BackendError>> {
        Box::pin(async move {
            let n = self.record(CallKind::Renew);
            if let Some(result) = self.renewals.lock().pop_front() {
                return result;
            }
            match self.renew_status {
                Some(status) => Err(BackendError::response(status, "renewal refused")),
                None => Ok(self.token("renewed", n)),
            }
        })
    }

    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Secret>, BackendError>> {
        Box::pin(async move {
            self.record(CallKind::Read);
            if self.stall_reads {
                std::future::pending::<()>().await;
            }
            if let Some(result) = self.reads.lock().pop_front() {
                return result;
            }
            Ok(Some(
                self.secrets
                    .lock()
                    .get(path)
                    .cloned()
                    .unwrap_or_default(),
            ))
        })
    }
}

/// Connector that always hands out `backend`.
pub fn connector(
    backend: &Arc<ScriptedBackend>,
) -> impl Fn(&SessionConfig) -> Result<Arc<dyn BackendClient>, BackendError> + Send + Sync + use<>
{
    let backend = Arc::clone(backend);
    move |_: &SessionConfig| -> Result<Arc<dyn BackendClient>, BackendError> {
        Ok(Arc::clone(&backend) as Arc<dyn BackendClient>)
    }
}

/// An AppRole configuration for `host`.
pub fn approle_config(host: &str) -> SessionConfig {
    SessionConfig::new(host).with_auth(AppRoleAuth::new("role-id", "secret-id"))
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

pub fn millis(n: u64) -> Duration {
    Duration::from_millis(n)
}
