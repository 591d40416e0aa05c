//! Authenticated sessions against a secrets backend.
//!
//! A [`Session`] owns one authenticated connection: it logs in on first use,
//! hands every fresh token to a background [token monitor](monitor) that
//! renews it or marks it expired, and serializes reads that may need a login.
//!
//! # Lifecycle
//!
//! ```text
//! Session::new ──► read() ──► login (generation += 1) ──► monitor started
//!                    │                                        │
//!                    ◄──────── needs_login = true ◄───────────┘ (expiry)
//!                    │
//!                 close() ──► cancel ──► monitor Stopped (joined)
//! ```
//!
//! Sessions are normally obtained through the [`SessionRegistry`], which
//! shares one session between all callers with an equal [`SessionConfig`].
//!
//! Every login bumps the session's *generation*. Token messages carry the
//! generation of the login that produced them, and the monitor drops any
//! message that is older than the session's current generation.

mod backoff;
mod config;
mod monitor;
mod registry;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use backoff::{BackoffPolicy, backoff_interval, grace_period, grace_period_with, sleep_duration};
pub use config::{Credentials, SessionConfig};
pub use registry::{SessionHandle, SessionRegistry};

use crate::Error;
use crate::backend::{BackendClient, Secret};
use crate::fingerprint::Fingerprint;
use monitor::TokenMonitor;

/// Phase of a session's token monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorState {
    /// No login has succeeded yet.
    Idle = 0,
    /// Waiting for the next token.
    WaitingForMessage = 1,
    /// Sleeping until a non-renewable token must be replaced.
    MonitoringNonRenewable = 2,
    /// Renewing a renewable token.
    MonitoringRenewable = 3,
    /// Terminated by close.
    Stopped = 4,
}

impl MonitorState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::WaitingForMessage,
            2 => Self::MonitoringNonRenewable,
            3 => Self::MonitoringRenewable,
            4 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// A token produced by a login or renewal, tagged with the login generation.
#[derive(Debug)]
pub(crate) struct TokenMessage {
    pub secret: Secret,
    pub generation: u64,
}

/// Mutable session state, guarded by [`SessionInner::state`].
pub(crate) struct SessionState {
    pub needs_login: bool,
    pub login_generation: u64,
    monitor_tx: Option<mpsc::UnboundedSender<TokenMessage>>,
}

/// Resolves once the monitor task has finished.
type MonitorDone = Shared<BoxFuture<'static, ()>>;

/// State shared between a [`Session`] and its token monitor task.
pub(crate) struct SessionInner {
    pub config: SessionConfig,
    pub fingerprint: Fingerprint,
    pub backend: Arc<dyn BackendClient>,
    pub state: Mutex<SessionState>,
    pub cancel: CancellationToken,
    monitor_state: AtomicU8,
    /// Kept apart from `state`, which a read holds across backend calls.
    monitor_done: parking_lot::Mutex<Option<MonitorDone>>,
}

impl SessionInner {
    pub(crate) fn set_monitor_state(&self, state: MonitorState) {
        self.monitor_state.store(state as u8, Ordering::Release);
    }

    /// Locks the session state, giving up once the session is cancelled.
    pub(crate) async fn lock_state(&self) -> Option<MutexGuard<'_, SessionState>> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            state = self.state.lock() => Some(state),
        }
    }

    /// Marks the session as needing a login, unless a newer login happened.
    pub(crate) async fn expire(&self, generation: u64) {
        let Some(mut state) = self.lock_state().await else {
            return;
        };
        if state.login_generation == generation {
            state.needs_login = true;
            info!(
                host = %self.config.host(),
                fingerprint = %self.fingerprint.short(),
                generation,
                "token expired, next read will log in again"
            );
        } else {
            debug!(
                generation,
                current = state.login_generation,
                "ignoring expiry of superseded token"
            );
        }
    }
}

/// One authenticated connection to the secrets backend.
///
/// Dropping a session cancels its token monitor without waiting for it;
/// call [`close`](Self::close) to wait.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Creates a session. No network traffic happens until the first read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `config` is invalid.
    pub fn new(config: SessionConfig, backend: Arc<dyn BackendClient>) -> Result<Self, Error> {
        let config = config.prepare()?;
        let fingerprint = config.fingerprint();

        debug!(
            host = %config.host(),
            fingerprint = %fingerprint.short(),
            "session created"
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                fingerprint,
                backend,
                state: Mutex::new(SessionState {
                    needs_login: true,
                    login_generation: 0,
                    monitor_tx: None,
                }),
                cancel: CancellationToken::new(),
                monitor_state: AtomicU8::new(MonitorState::Idle as u8),
                monitor_done: parking_lot::Mutex::new(None),
            }),
        })
    }

    /// The configuration this session was built from.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The session's identity.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.inner.fingerprint
    }

    /// Reads the secret at `path`, logging in first if necessary.
    ///
    /// Static token sessions call the backend directly. All other reads on a
    /// session are serialized, so concurrent callers never log in twice.
    ///
    /// A permission-denied answer on a session that did not just log in is
    /// taken as a token that expired unnoticed: the session logs in again and
    /// retries once.
    ///
    /// # Errors
    ///
    /// - [`Error::Login`] if logging in fails
    /// - [`Error::PermissionDenied`] if the read is refused after a fresh login
    /// - [`Error::Read`] for any other backend failure, or a closed session
    pub async fn read(&self, path: &str) -> Result<Option<Secret>, Error> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(Error::read(path, "session is closed"));
        }

        let Some(auth) = inner.config.auth() else {
            return inner
                .backend
                .read(path)
                .await
                .map_err(|e| Error::from_read(path, e));
        };

        let mut state = inner.state.lock().await;
        let mut retried = false;

        loop {
            let fresh_login = state.needs_login;
            if state.needs_login {
                state.login_generation += 1;
                let generation = state.login_generation;

                debug!(
                    host = %inner.config.host(),
                    fingerprint = %inner.fingerprint.short(),
                    method = auth.kind(),
                    generation,
                    "logging in"
                );

                let secret = match inner.backend.login(auth).await {
                    Ok(secret) => secret,
                    Err(e) => {
                        warn!(
                            host = %inner.config.host(),
                            method = auth.kind(),
                            generation,
                            error = %e,
                            "login failed"
                        );
                        return Err(Error::login(e));
                    }
                };

                info!(
                    host = %inner.config.host(),
                    fingerprint = %inner.fingerprint.short(),
                    generation,
                    ttl = ?secret.token_ttl(),
                    renewable = ?secret.token_is_renewable(),
                    "login succeeded"
                );

                self.deliver(&mut state, TokenMessage { secret, generation });
                state.needs_login = false;
            }

            match inner.backend.read(path).await {
                Ok(secret) => return Ok(secret),
                Err(e) if e.is_permission_denied() && !fresh_login && !retried => {
                    debug!(
                        path,
                        generation = state.login_generation,
                        "read denied with an existing token, logging in again"
                    );
                    retried = true;
                    state.needs_login = true;
                }
                Err(e) => return Err(Error::from_read(path, e)),
            }
        }
    }

    /// Hands `message` to the token monitor, starting it on first use.
    fn deliver(&self, state: &mut SessionState, message: TokenMessage) {
        if state.monitor_tx.is_none() {
            // Checked under the lock `close` takes after cancelling, so a
            // monitor is either never spawned or always joined.
            let mut done = self.inner.monitor_done.lock();
            if self.inner.cancel.is_cancelled() {
                return;
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let monitor = TokenMonitor::new(Arc::clone(&self.inner), rx);
            *done = Some(tokio::spawn(monitor.run()).map(|_| ()).boxed().shared());

            debug!(
                fingerprint = %self.inner.fingerprint.short(),
                "token monitor started"
            );
            state.monitor_tx = Some(tx);
        }

        if let Some(tx) = &state.monitor_tx {
            // The receiver lives until the monitor stops, which only happens
            // after cancellation; a failed send is harmless then.
            let _ = tx.send(message);
        }
    }

    /// Returns `true` if the next read will log in.
    pub async fn needs_login(&self) -> bool {
        self.inner.state.lock().await.needs_login
    }

    /// Number of login attempts made so far.
    pub async fn login_generation(&self) -> u64 {
        self.inner.state.lock().await.login_generation
    }

    /// Current phase of the token monitor.
    #[must_use]
    pub fn monitor_state(&self) -> MonitorState {
        MonitorState::from_u8(self.inner.monitor_state.load(Ordering::Acquire))
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Stops the token monitor and waits for it to finish.
    ///
    /// Idempotent; concurrent and repeated calls all wait for the same
    /// shutdown. Does not wait for reads still in flight.
    pub async fn close(&self) {
        self.inner.cancel.cancel();

        let done = self.inner.monitor_done.lock().clone();
        if let Some(done) = done {
            done.await;
        }
        self.inner.set_monitor_state(MonitorState::Stopped);

        debug!(
            fingerprint = %self.inner.fingerprint.short(),
            "session closed"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.inner.config.host())
            .field("fingerprint", &self.inner.fingerprint)
            .field("monitor_state", &self.monitor_state())
            .finish_non_exhaustive()
    }
}
