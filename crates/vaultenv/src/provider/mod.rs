//! Provider abstraction for configuration sources.
//!
//! A provider answers "what is the value of this key?". The
//! [`ConfigLoader`](crate::loader::ConfigLoader) chains providers by priority
//! and records where each answer came from.
//!
//! # Built-in Providers
//!
//! - [`EnvProvider`] - process environment variables
//! - [`VaultProvider`] - one secret in the secrets backend, read through a
//!   shared [`SessionHandle`](crate::SessionHandle)
//!
//! [`VaultProvider`] is asynchronous; wrap it in a [`BlockingAdapter`] to use
//! it with the synchronous loader.
//!
//! # Custom Providers
//!
//! ```rust,ignore
//! use vaultenv::provider::{Provider, ProviderResult, ProviderValue, ProviderSource};
//!
//! struct StaticProvider(HashMap<String, String>);
//!
//! impl Provider for StaticProvider {
//!     fn name(&self) -> &str { "static" }
//!
//!     fn get(&self, key: &str) -> ProviderResult<ProviderValue> {
//!         Ok(self.0.get(key).map(|v| {
//!             ProviderValue::new(v.clone(), ProviderSource::custom("static", None))
//!         }))
//!     }
//! }
//! ```

mod adapter;
mod env;
mod vault;

pub use adapter::BlockingAdapter;
pub use env::EnvProvider;
pub use vault::VaultProvider;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter, Result as FmtResult};

use miette::Diagnostic;
use thiserror::Error as ThisError;

pub use crate::backend::BoxFuture;
use crate::Source;

// ============================================================================
// Provider Priority Registry
// ============================================================================

/// Provider priority constants.
///
/// Lower values = higher priority. The first provider in priority order that
/// returns a value wins.
///
/// ```text
/// Environment (20) > SecretBackend (50) > Custom (100) > Default (1000)
/// ```
///
/// Environment variables outrank the secrets backend so a single value can
/// be overridden locally without touching the stored secret.
pub mod priority {
    /// Environment variables (process env).
    pub const ENVIRONMENT: u32 = 20;

    /// Secrets backend.
    pub const SECRET_BACKEND: u32 = 50;

    /// Default priority for custom providers.
    pub const CUSTOM: u32 = 100;

    /// Caller-supplied defaults.
    pub const DEFAULT: u32 = 1000;
}

// ============================================================================
// Provider Value Types
// ============================================================================

/// A configuration value retrieved from a provider.
#[derive(Clone)]
pub struct ProviderValue {
    /// The raw string value.
    pub value: String,

    /// Where this value originated from.
    pub source: ProviderSource,

    /// Whether this value must be masked in logs and `Debug` output.
    pub secret: bool,
}

impl ProviderValue {
    /// Creates a new provider value.
    #[must_use]
    pub fn new(value: impl Into<String>, source: ProviderSource) -> Self {
        Self {
            value: value.into(),
            source,
            secret: false,
        }
    }

    /// Marks this value as secret.
    #[must_use]
    pub const fn with_secret(mut self, secret: bool) -> Self {
        self.secret = secret;
        self
    }
}

impl fmt::Debug for ProviderValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let value: &dyn fmt::Debug = if self.secret {
            &"[REDACTED]"
        } else {
            &self.value
        };
        f.debug_struct("ProviderValue")
            .field("value", value)
            .field("source", &self.source)
            .field("secret", &self.secret)
            .finish()
    }
}

// ============================================================================
// Provider Source (Extensible)
// ============================================================================

/// Wraps the built-in [`Source`] types and allows custom providers to define
/// their own attribution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderSource {
    /// A built-in source type.
    BuiltIn(Source),

    /// A custom provider source.
    Custom {
        /// The provider name (e.g., "consul", "aws-ssm").
        provider: String,

        /// Optional path or key within the provider.
        path: Option<String>,
    },
}

impl ProviderSource {
    /// Creates a custom provider source.
    #[must_use]
    pub fn custom(provider: impl Into<String>, path: Option<String>) -> Self {
        Self::Custom {
            provider: provider.into(),
            path,
        }
    }

    /// Creates a source from environment.
    #[must_use]
    pub const fn environment() -> Self {
        Self::BuiltIn(Source::Environment)
    }

    /// Creates a source for a secret stored at `path`.
    #[must_use]
    pub fn secret_backend(path: impl Into<String>) -> Self {
        Self::BuiltIn(Source::SecretBackend(path.into()))
    }

    /// Creates a default source.
    #[must_use]
    pub const fn default_value() -> Self {
        Self::BuiltIn(Source::Default)
    }

    /// Converts this provider source to a [`Source`].
    #[must_use]
    pub fn to_source(&self) -> Source {
        match self {
            Self::BuiltIn(s) => s.clone(),

            Self::Custom { provider, .. } => Source::CustomProvider(provider.clone()),
        }
    }
}

impl Display for ProviderSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::BuiltIn(source) => write!(f, "{source}"),

            Self::Custom {
                provider,
                path: Some(path),
            } => write!(f, "{provider} ({path})"),

            Self::Custom {
                provider,
                path: None,
            } => write!(f, "{provider}"),
        }
    }
}

// ============================================================================
// Provider Errors
// ============================================================================

/// Errors that can occur during provider operations.
#[derive(Debug, ThisError, Diagnostic)]
pub enum ProviderError {
    /// Provider connection or authentication error.
    #[error("provider '{provider}' connection error: {message}")]
    #[diagnostic(
        code(vaultenv::provider::connection),
        help("check provider configuration and connectivity")
    )]
    Connection {
        /// The provider name.
        provider: String,
        /// The error message.
        message: String,
        /// The underlying error source.
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// Value format error (e.g., not valid UTF-8).
    #[error("invalid value for '{key}' from provider '{provider}': {message}")]
    #[diagnostic(code(vaultenv::provider::invalid_value))]
    InvalidValue {
        /// The key with the invalid value.
        key: String,
        /// The provider name.
        provider: String,
        /// The error message.
        message: String,
    },

    /// Provider is not available.
    #[error("provider '{provider}' is not available: {message}")]
    #[diagnostic(
        code(vaultenv::provider::unavailable),
        help("ensure the provider is properly configured and accessible")
    )]
    Unavailable {
        /// The provider name.
        provider: String,
        /// The error message.
        message: String,
    },

    /// Generic provider error.
    #[error("provider '{provider}' error: {message}")]
    #[diagnostic(code(vaultenv::provider::error))]
    Other {
        /// The provider name.
        provider: String,
        /// The error message.
        message: String,
        /// The underlying error source.
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

impl ProviderError {
    /// Returns the provider name from the error.
    #[must_use]
    pub fn provider_name(&self) -> &str {
        match self {
            Self::Connection { provider, .. }
            | Self::InvalidValue { provider, .. }
            | Self::Unavailable { provider, .. }
            | Self::Other { provider, .. } => provider,
        }
    }

    /// Creates a connection error.
    pub fn connection(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            provider: provider.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a connection error with source.
    pub fn connection_with_source(
        provider: impl Into<String>,
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            provider: provider.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a generic error with source.
    pub fn other_with_source(
        provider: impl Into<String>,
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            provider: provider.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for provider operations.
///
/// - `Ok(Some(value))` - Key found, value returned
/// - `Ok(None)` - Key not found in this provider (try next)
/// - `Err(e)` - An error occurred
pub type ProviderResult<T> = Result<Option<T>, ProviderError>;

// ============================================================================
// Provider Trait (Sync)
// ============================================================================

/// Trait for synchronous configuration providers.
pub trait Provider: Send + Sync {
    /// Returns the provider's name for error messages and source attribution.
    fn name(&self) -> &str;

    /// Gets a single configuration value by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider encounters an error fetching the value.
    fn get(&self, key: &str) -> ProviderResult<ProviderValue>;

    /// Gets multiple configuration values in a single call.
    ///
    /// The default implementation calls `get()` for each key.
    fn get_many(&self, keys: &[&str]) -> HashMap<String, ProviderResult<ProviderValue>> {
        keys.iter()
            .map(|k| ((*k).to_string(), self.get(k)))
            .collect()
    }

    /// Checks if this provider is currently available. Defaults to `true`.
    fn is_available(&self) -> bool {
        true
    }

    /// Returns the priority of this provider (lower = higher priority).
    ///
    /// See the [`priority`] module for standard priority constants.
    fn priority(&self) -> u32 {
        priority::CUSTOM
    }

    /// Whether the loader should try the next provider when this one has no
    /// value for a key. Defaults to `true`.
    fn fallthrough(&self) -> bool {
        true
    }
}

// ============================================================================
// Async Provider Trait
// ============================================================================

/// Trait for asynchronous configuration providers.
///
/// The async equivalent of [`Provider`], for providers that talk to the
/// network. Use [`BlockingAdapter`] to plug one into the sync loader.
pub trait AsyncProvider: Send + Sync {
    /// Returns the provider's name.
    fn name(&self) -> &str;

    /// Gets a configuration value asynchronously.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ProviderResult<ProviderValue>>;

    /// Gets multiple values asynchronously.
    fn get_many<'a>(
        &'a self,
        keys: &'a [&'a str],
    ) -> BoxFuture<'a, HashMap<String, ProviderResult<ProviderValue>>> {
        Box::pin(async move {
            let mut results = HashMap::new();
            for key in keys {
                results.insert((*key).to_string(), self.get(key).await);
            }
            results
        })
    }

    /// Checks if the provider is available asynchronously.
    #[allow(clippy::elidable_lifetime_names)]
    fn is_available<'a>(&'a self) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }

    /// Returns the priority of this provider.
    fn priority(&self) -> u32 {
        priority::CUSTOM
    }
}
