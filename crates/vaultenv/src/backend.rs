//! The secrets backend seam.
//!
//! `vaultenv` does not speak any wire protocol itself. A [`BackendClient`]
//! implementation performs the actual login, token renewal, and authenticated
//! reads; sessions drive it and decide *when* each call happens.
//!
//! Implementations own their current client token: a successful
//! [`login`](BackendClient::login) is expected to make subsequent
//! [`read`](BackendClient::read) calls use the new token.
//!
//! Cancellation is expressed by dropping the returned future. The token
//! monitor does this whenever a renewal is overtaken by a newer login or by
//! the session being closed, so implementations must tolerate being dropped
//! mid-request.

use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use secrecy::SecretString;
use serde_json::{Map, Value};
use thiserror::Error as ThisError;

use crate::auth::AuthMethod;
use crate::session::SessionConfig;

/// Boxed future type for backend methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Status code the backend uses for an explicit authorization failure.
pub const STATUS_PERMISSION_DENIED: u16 = 403;

/// Authentication metadata attached to a login or renewal response.
#[derive(Clone, Debug)]
pub struct SecretAuth {
    /// The opaque client token. Never printed.
    pub client_token: SecretString,

    /// Remaining validity of the token. Zero means it never expires.
    pub lease_duration: Duration,

    /// Whether the token can be extended with a renew-self call.
    pub renewable: bool,
}

impl SecretAuth {
    /// Creates auth metadata for a token.
    pub fn new(client_token: impl Into<String>, lease_duration: Duration, renewable: bool) -> Self {
        Self {
            client_token: SecretString::from(client_token.into()),
            lease_duration,
            renewable,
        }
    }
}

/// A response envelope returned by the backend.
///
/// Login and renewal responses carry [`SecretAuth`]; read responses carry
/// `data`.
#[derive(Clone, Debug, Default)]
pub struct Secret {
    /// Key/value payload of a read.
    pub data: Map<String, Value>,

    /// Token metadata of a login or renewal.
    pub auth: Option<SecretAuth>,
}

impl Secret {
    /// Creates a read response holding `data`.
    #[must_use]
    pub const fn with_data(data: Map<String, Value>) -> Self {
        Self { data, auth: None }
    }

    /// Creates a login or renewal response.
    #[must_use]
    pub fn with_auth(auth: SecretAuth) -> Self {
        Self {
            data: Map::new(),
            auth: Some(auth),
        }
    }

    /// Returns the token TTL, or `None` when the envelope has no auth block.
    #[must_use]
    pub fn token_ttl(&self) -> Option<Duration> {
        self.auth.as_ref().map(|a| a.lease_duration)
    }

    /// Returns whether the token is renewable, or `None` without an auth block.
    #[must_use]
    pub fn token_is_renewable(&self) -> Option<bool> {
        self.auth.as_ref().map(|a| a.renewable)
    }

    /// Returns the client token, if present.
    #[must_use]
    pub fn client_token(&self) -> Option<&SecretString> {
        self.auth.as_ref().map(|a| &a.client_token)
    }
}

/// Errors produced by a [`BackendClient`].
#[derive(Debug, ThisError, Diagnostic)]
#[non_exhaustive]
pub enum BackendError {
    /// The backend answered with an error status.
    #[error("backend responded with status {status}: {message}")]
    #[diagnostic(code(vaultenv::backend::response))]
    Response {
        /// HTTP-style status code.
        status: u16,
        /// Error text returned by the backend.
        message: String,
    },

    /// The request never got a response.
    #[error("backend request failed: {message}")]
    #[diagnostic(
        code(vaultenv::backend::transport),
        help("check connectivity to the secrets backend")
    )]
    Transport {
        /// Human-readable error message.
        message: String,
        /// The underlying error source.
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

impl BackendError {
    /// Creates a `Response` error.
    pub fn response(status: u16, message: impl Into<String>) -> Self {
        Self::Response {
            status,
            message: message.into(),
        }
    }

    /// Creates a `Transport` error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a `Transport` error with source.
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the response status code, if the backend answered.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Response { status, .. } => Some(*status),
            Self::Transport { .. } => None,
        }
    }

    /// Returns `true` when the backend refused the request (status 403).
    #[must_use]
    pub const fn is_permission_denied(&self) -> bool {
        matches!(self.status_code(), Some(STATUS_PERMISSION_DENIED))
    }
}

/// Wire-level client for a secrets backend.
///
/// # Example
///
/// ```rust,ignore
/// struct HttpBackend { /* reqwest client, current token, ... */ }
///
/// impl BackendClient for HttpBackend {
///     fn login<'a>(&'a self, auth: &'a AuthMethod) -> BoxFuture<'a, Result<Secret, BackendError>> {
///         Box::pin(async move { /* POST auth/<mount>/login */ })
///     }
///     // ...
/// }
/// ```
pub trait BackendClient: Send + Sync {
    /// Authenticates with `auth` and returns the new token's metadata.
    fn login<'a>(&'a self, auth: &'a AuthMethod) -> BoxFuture<'a, Result<Secret, BackendError>>;

    /// Extends the TTL of `client_token`.
    ///
    /// A zero `increment` asks the backend for its default increment.
    fn renew_self<'a>(
        &'a self,
        client_token: &'a SecretString,
        increment: Duration,
    ) -> BoxFuture<'a, Result<Secret, BackendError>>;

    /// Reads the secret stored at `path`.
    ///
    /// `Ok(None)` means the path holds no secret.
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Secret>, BackendError>>;
}

/// Builds a [`BackendClient`] for a prepared [`SessionConfig`].
///
/// The connector receives the host, headers, TLS identity and, for static
/// token sessions, the token the client should send. It is only invoked when
/// the [`SessionRegistry`](crate::SessionRegistry) has no live session for the
/// configuration's fingerprint.
///
/// Any `Fn(&SessionConfig) -> Result<Arc<dyn BackendClient>, BackendError>`
/// is a connector.
pub trait BackendConnector: Send + Sync {
    /// Creates a client for `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the client cannot be constructed, e.g.
    /// the TLS material does not parse.
    fn connect(&self, config: &SessionConfig) -> Result<Arc<dyn BackendClient>, BackendError>;
}

impl<F> BackendConnector for F
where
    F: Fn(&SessionConfig) -> Result<Arc<dyn BackendClient>, BackendError> + Send + Sync,
{
    fn connect(&self, config: &SessionConfig) -> Result<Arc<dyn BackendClient>, BackendError> {
        self(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_classification() {
        let err = BackendError::response(403, "permission denied");
        assert_eq!(err.status_code(), Some(403));
        assert!(err.is_permission_denied());

        let err = BackendError::response(503, "sealed");
        assert!(!err.is_permission_denied());

        let err = BackendError::transport("connection refused");
        assert_eq!(err.status_code(), None);
        assert!(!err.is_permission_denied());
    }

    #[test]
    fn test_secret_token_accessors() {
        let secret = Secret::with_auth(SecretAuth::new("s.abc", Duration::from_secs(30), true));
        assert_eq!(secret.token_ttl(), Some(Duration::from_secs(30)));
        assert_eq!(secret.token_is_renewable(), Some(true));
        assert!(secret.client_token().is_some());

        let secret = Secret::default();
        assert_eq!(secret.token_ttl(), None);
        assert_eq!(secret.token_is_renewable(), None);
    }

    #[test]
    fn test_client_token_not_in_debug() {
        let secret = Secret::with_auth(SecretAuth::new("s.very-secret", Duration::ZERO, false));
        let debug = format!("{secret:?}");
        assert!(!debug.contains("s.very-secret"));
    }
}
