//! Error types for session management and configuration loading.
//!
//! # Error Variants
//!
//! | Variant | When It Occurs |
//! |---------|----------------|
//! | [`Error::Configuration`] | Connection or auth parameters are invalid or missing |
//! | [`Error::Login`] | The secrets backend rejected the login |
//! | [`Error::PermissionDenied`] | A read was refused even after a fresh login |
//! | [`Error::Read`] | Path not found, backend unavailable, or transport failure |
//! | [`Error::Missing`] | No provider had a value for a required key |
//! | [`Error::Parse`] | A loaded value did not parse as the requested type |
//! | [`Error::Provider`] | A configuration provider failed while loading |
//! | [`Error::Multiple`] | Several loading errors were accumulated |
//!
//! Token renewal failures never show up here. They are handled inside the
//! token monitor, and the only visible effect is that the next read performs
//! a fresh login.

use std::error::Error as StdError;

use miette::Diagnostic;
use thiserror::Error as ThisError;

use crate::backend::BackendError;

/// Errors surfaced to callers of sessions and loaders.
///
/// Integrates with [`miette`] so every variant carries a diagnostic code and,
/// where useful, a help message.
///
/// # Diagnostic Codes
///
/// | Code | Meaning |
/// |------|---------|
/// | `vaultenv::configuration` | Invalid or missing connection/auth parameters |
/// | `vaultenv::login` | Authentication rejected by the backend |
/// | `vaultenv::permission_denied` | Authorization failure on a read |
/// | `vaultenv::read` | Read failed for any other reason |
/// | `vaultenv::missing_value` | Required key not provided |
/// | `vaultenv::parse_error` | Value failed to parse as expected type |
/// | `vaultenv::provider_error` | A configuration provider failed |
/// | `vaultenv::multiple_errors` | Multiple errors occurred |
#[derive(Debug, ThisError, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    /// The session could not be built from the supplied parameters.
    #[error("invalid secrets backend configuration: {message}")]
    #[diagnostic(
        code(vaultenv::configuration),
        help("check the host, TLS settings and credentials passed to SessionConfig")
    )]
    Configuration {
        /// What is wrong with the configuration.
        message: String,
    },

    /// Authentication against the secrets backend failed.
    #[error("login to secrets backend failed: {message}")]
    #[diagnostic(
        code(vaultenv::login),
        help("verify the auth method credentials and the backend's auth mount")
    )]
    Login {
        /// Human-readable error message.
        message: String,
        /// The backend error that caused the failure.
        #[source]
        source: Option<BackendError>,
    },

    /// The backend refused access to a path.
    #[error("permission denied reading '{path}'")]
    #[diagnostic(
        code(vaultenv::permission_denied),
        help("the authenticated identity lacks a policy granting read on this path")
    )]
    PermissionDenied {
        /// The path that was refused.
        path: String,
        /// The backend error that caused the failure.
        #[source]
        source: Option<BackendError>,
    },

    /// A read failed for a reason other than authorization.
    #[error("failed to read '{path}': {message}")]
    #[diagnostic(code(vaultenv::read))]
    Read {
        /// The path being read.
        path: String,
        /// Human-readable error message.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// No provider had a value for a required key.
    #[error("missing required configuration value: {key}")]
    #[diagnostic(code(vaultenv::missing_value))]
    Missing {
        /// The key that was looked up.
        key: String,
        /// Help text.
        #[help]
        help: String,
    },

    /// A loaded value could not be converted to the requested type.
    ///
    /// The raw value is kept only for non-secret values.
    #[error("failed to parse {key}: expected {expected_type}")]
    #[diagnostic(code(vaultenv::parse_error))]
    Parse {
        /// The key whose value failed to parse.
        key: String,
        /// The raw value, `None` when it is secret.
        value: Option<String>,
        /// The requested type.
        expected_type: String,
        /// Help text.
        #[help]
        help: String,
        /// The underlying parse error.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// A configuration provider failed.
    #[error("error loading from {provider}: {message}")]
    #[diagnostic(code(vaultenv::provider_error))]
    Provider {
        /// The provider that failed.
        provider: String,

        /// Error message.
        message: String,

        /// Help text.
        #[help]
        help: String,
    },

    /// Multiple errors occurred.
    #[error("{} configuration error(s) occurred", .errors.len())]
    #[diagnostic(
        code(vaultenv::multiple_errors),
        help("fix all listed configuration errors")
    )]
    Multiple {
        /// All accumulated errors.
        #[related]
        errors: Vec<Error>,
    },
}

impl Error {
    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wraps a backend failure that happened during login.
    pub fn login(source: BackendError) -> Self {
        Self::Login {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Classifies a backend failure that happened while reading `path`.
    ///
    /// A 403 becomes [`Error::PermissionDenied`]; anything else is a
    /// [`Error::Read`].
    pub fn from_read(path: impl Into<String>, source: BackendError) -> Self {
        let path = path.into();
        if source.is_permission_denied() {
            Self::PermissionDenied {
                path,
                source: Some(source),
            }
        } else {
            Self::Read {
                path,
                message: source.to_string(),
                source: Some(Box::new(source)),
            }
        }
    }

    /// Creates a `Read` error without an underlying source.
    pub fn read(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Read {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a `Missing` error.
    pub fn missing(key: impl Into<String>) -> Self {
        let key = key.into();
        let help = format!("set {key} in the environment or store it in the secrets backend");
        Self::Missing { key, help }
    }

    /// Creates a `Parse` error. Secret values are not retained.
    pub fn parse(
        key: impl Into<String>,
        value: impl Into<String>,
        secret: bool,
        expected_type: impl Into<String>,
        source: Box<dyn StdError + Send + Sync>,
    ) -> Self {
        let expected_type = expected_type.into();
        Self::Parse {
            key: key.into(),
            value: (!secret).then(|| value.into()),
            help: format!("expected a valid {expected_type}"),
            expected_type,
            source,
        }
    }

    /// Collects multiple errors into a single error.
    /// Returns `None` if the input is empty.
    pub fn multiple(errors: Vec<Error>) -> Option<Self> {
        if errors.len() > 1 {
            Some(Self::Multiple { errors })
        } else {
            // Zero or one element; a single error is returned as-is.
            errors.into_iter().next()
        }
    }

    /// Returns `true` for [`Error::PermissionDenied`].
    #[must_use]
    pub const fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}
