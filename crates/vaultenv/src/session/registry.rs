//! Process-wide session sharing.
//!
//! The [`SessionRegistry`] maps a [`Fingerprint`] to a live [`Session`] and a
//! reference count. Acquiring a configuration that is already live returns
//! the existing session; the session is closed when its last reference is
//! released.
//!
//! The registry's lock only guards the map. It is never held across a login
//! or read, so traffic on one session does not contend with bookkeeping for
//! another.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Session, SessionConfig};
use crate::Error;
use crate::backend::{BackendConnector, Secret};
use crate::fingerprint::Fingerprint;

static GLOBAL: LazyLock<Arc<SessionRegistry>> = LazyLock::new(|| Arc::new(SessionRegistry::new()));

struct Entry {
    session: Arc<Session>,
    refs: usize,
}

/// Reference-counted table of live sessions.
#[derive(Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<Fingerprint, Entry>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Returns the session for `fingerprint`, creating it with `factory` if
    /// none is live. Either way the reference count goes up by one.
    ///
    /// # Errors
    ///
    /// Propagates the factory's error; nothing is stored in that case.
    pub fn get_or_create<F>(&self, fingerprint: Fingerprint, factory: F) -> Result<Arc<Session>, Error>
    where
        F: FnOnce() -> Result<Session, Error>,
    {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(&fingerprint) {
            entry.refs += 1;
            debug!(
                fingerprint = %fingerprint.short(),
                refs = entry.refs,
                "session reused"
            );
            return Ok(Arc::clone(&entry.session));
        }

        let session = Arc::new(factory()?);
        entries.insert(
            fingerprint,
            Entry {
                session: Arc::clone(&session),
                refs: 1,
            },
        );
        debug!(fingerprint = %fingerprint.short(), "session registered");
        Ok(session)
    }

    /// Returns a handle to the session for `config`, connecting a new
    /// backend client only if no equal session is live.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `config` is invalid or the
    /// connector cannot build a client.
    pub fn acquire(
        self: &Arc<Self>,
        config: SessionConfig,
        connector: &dyn BackendConnector,
    ) -> Result<SessionHandle, Error> {
        let config = config.prepare()?;
        let fingerprint = config.fingerprint();

        let session = self.get_or_create(fingerprint, || {
            let backend = connector.connect(&config).map_err(|e| {
                Error::configuration(format!("unable to create backend client: {e}"))
            })?;
            Session::new(config, backend)
        })?;

        Ok(SessionHandle {
            registry: Arc::clone(self),
            fingerprint,
            session,
            released: AtomicBool::new(false),
        })
    }

    /// Drops one reference to `fingerprint`. The last release removes the
    /// entry and closes the session, waiting for its monitor to stop.
    pub async fn release(&self, fingerprint: Fingerprint) {
        if let Some(session) = self.decrement(fingerprint) {
            session.close().await;
        }
    }

    /// Like [`release`](Self::release), but only signals the session to stop.
    pub(crate) fn release_nowait(&self, fingerprint: Fingerprint) {
        if let Some(session) = self.decrement(fingerprint) {
            session.inner.cancel.cancel();
        }
    }

    /// Returns the removed session when the count reaches zero.
    fn decrement(&self, fingerprint: Fingerprint) -> Option<Arc<Session>> {
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get_mut(&fingerprint) else {
            warn!(
                fingerprint = %fingerprint.short(),
                "release of unknown session"
            );
            return None;
        };

        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            debug!(
                fingerprint = %fingerprint.short(),
                refs = entry.refs,
                "session released"
            );
            return None;
        }

        debug!(fingerprint = %fingerprint.short(), "last reference released, closing session");
        entries.remove(&fingerprint).map(|entry| entry.session)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns `true` if a session for `fingerprint` is live.
    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.lock().contains_key(fingerprint)
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

/// One caller's reference to a shared session.
///
/// Call [`close`](Self::close) when done. Dropping an open handle releases
/// the reference too, but cannot wait for the session to shut down.
pub struct SessionHandle {
    registry: Arc<SessionRegistry>,
    fingerprint: Fingerprint,
    session: Arc<Session>,
    released: AtomicBool,
}

impl SessionHandle {
    /// Reads the secret at `path`. See [`Session::read`].
    ///
    /// # Errors
    ///
    /// Returns the session's read error.
    pub async fn read(&self, path: &str) -> Result<Option<Secret>, Error> {
        self.session.read(path).await
    }

    /// The shared session's identity.
    #[must_use]
    pub const fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// The shared session.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Releases this handle's reference. Idempotent.
    pub async fn close(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.registry.release(self.fingerprint).await;
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.registry.release_nowait(self.fingerprint);
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("fingerprint", &self.fingerprint)
            .field("released", &self.released.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;

    use super::*;
    use crate::auth::{AppRoleAuth, AuthMethod};
    use crate::backend::{BackendClient, BackendError, BoxFuture, SecretAuth};

    struct NullBackend;

    impl BackendClient for NullBackend {
        fn login<'a>(&'a self, _auth: &'a AuthMethod) -> BoxFuture<'a, Result<Secret, BackendError>> {
            Box::pin(async { Ok(Secret::with_auth(SecretAuth::new("t", Duration::ZERO, false))) })
        }

        fn renew_self<'a>(
            &'a self,
            _client_token: &'a SecretString,
            _increment: Duration,
        ) -> BoxFuture<'a, Result<Secret, BackendError>> {
            Box::pin(async { Err(BackendError::transport("unused")) })
        }

        fn read<'a>(&'a self, _path: &'a str) -> BoxFuture<'a, Result<Option<Secret>, BackendError>> {
            Box::pin(async { Ok(None) })
        }
    }

    fn connector(_: &SessionConfig) -> Result<Arc<dyn BackendClient>, BackendError> {
        Ok(Arc::new(NullBackend))
    }

    fn config(host: &str) -> SessionConfig {
        SessionConfig::new(host).with_auth(AppRoleAuth::new("role", "secret"))
    }

    #[tokio::test]
    async fn test_equal_configs_share_session() {
        let registry = Arc::new(SessionRegistry::new());

        let a = registry.acquire(config("vault:8200"), &connector).unwrap();
        let b = registry.acquire(config("vault:8200"), &connector).unwrap();

        assert!(Arc::ptr_eq(a.session(), b.session()));
        assert_eq!(registry.len(), 1);

        a.close().await;
        assert!(registry.contains(&b.fingerprint()));
        assert!(!b.session().is_closed());

        b.close().await;
        assert!(registry.is_empty());
        assert!(b.session().is_closed());
    }

    #[tokio::test]
    async fn test_different_hosts_get_distinct_sessions() {
        let registry = Arc::new(SessionRegistry::new());

        let a = registry.acquire(config("a:8200"), &connector).unwrap();
        let b = registry.acquire(config("b:8200"), &connector).unwrap();

        assert!(!Arc::ptr_eq(a.session(), b.session()));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_handle_close_is_idempotent() {
        let registry = Arc::new(SessionRegistry::new());
        let a = registry.acquire(config("vault:8200"), &connector).unwrap();
        let b = registry.acquire(config("vault:8200"), &connector).unwrap();

        a.close().await;
        a.close().await;
        assert_eq!(registry.len(), 1);
        drop(b);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_drop_releases_reference() {
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.acquire(config("vault:8200"), &connector).unwrap();
        let session = Arc::clone(handle.session());

        drop(handle);
        assert!(registry.is_empty());
        assert!(session.is_closed());
    }

    #[test]
    fn test_factory_error_leaves_no_entry() {
        let registry = SessionRegistry::new();
        let fp = config("vault:8200").fingerprint();

        let result = registry.get_or_create(fp, || Err(Error::configuration("boom")));
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_connector_failure_is_configuration_error() {
        let registry = Arc::new(SessionRegistry::new());
        let failing = |_: &SessionConfig| -> Result<Arc<dyn BackendClient>, BackendError> {
            Err(BackendError::transport("bad CA bundle"))
        };

        let err = registry.acquire(config("vault:8200"), &failing).unwrap_err();
        assert!(err.to_string().contains("bad CA bundle"));
        assert!(registry.is_empty());
    }
}
