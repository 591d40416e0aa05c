//! # vaultenv
//!
//! Configuration loading backed by a secrets service, with shared,
//! self-renewing authenticated sessions.
//!
//! `vaultenv` keeps one authenticated session per distinct backend identity
//! in the process. Whoever asks for a session with the same host, headers,
//! TLS identity and credentials gets the same one. The session logs in on
//! first use. A background monitor then renews the token ahead of expiry, or
//! marks it for a fresh login when renewal is impossible. Callers only ever
//! see reads succeed or fail.
//!
//! ## What It Handles
//!
//! - **Deduplication** - equal [`SessionConfig`]s share one [`Session`] via
//!   the [`SessionRegistry`], keyed by a structural [`Fingerprint`]
//! - **Serialized login** - concurrent reads never trigger a second login
//! - **Proactive renewal** - renewable tokens are renewed at roughly 70% of
//!   their TTL, with jittered exponential backoff on transient failures
//! - **Self-healing reads** - a permission-denied read with an older token
//!   logs in again and retries once
//! - **Generation tracking** - renewals of a superseded login are discarded
//! - **Deterministic shutdown** - [`Session::close`] cancels and joins the
//!   monitor
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vaultenv::{ConfigLoader, SessionConfig, auth::AppRoleAuth};
//! use vaultenv::provider::VaultProvider;
//!
//! let config = SessionConfig::new("vault.internal:8200")
//!     .with_default_tls()
//!     .with_auth(AppRoleAuth::new(role_id, secret_id));
//!
//! // `connector` builds the wire-level BackendClient for a configuration
//! let vault = VaultProvider::connect(config, &connector, "secret/data/app")?;
//!
//! let mut loader = ConfigLoader::new()
//!     .with_env_prefix("APP_")
//!     .with_async_provider(vault, runtime.handle().clone());
//!
//! let db_password = loader.get_required("db_password");
//! let sources = loader.finish()?;
//! ```
//!
//! ## Reading Directly
//!
//! ```rust,ignore
//! let handle = SessionRegistry::global().acquire(config, &connector)?;
//! let secret = handle.read("secret/data/app").await?;
//! handle.close().await;
//! ```
//!
//! ## Error Handling
//!
//! All errors are reported through the [`Error`] type, which integrates with
//! [`miette`] for rich terminal diagnostics:
//!
//! ```rust,ignore
//! match handle.read("secret/data/app").await {
//!     Ok(secret) => { /* use secret */ }
//!     Err(e) => eprintln!("{:?}", miette::Report::from(e)),
//! }
//! ```
//!
//! Renewal failures never surface as errors; their only visible effect is
//! that the next read logs in again.
//!
//! ## Logging
//!
//! Session lifecycle, logins, renewals and expiries are reported through
//! [`tracing`]. No subscriber is installed.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(unused, reason = "False warnings")]

// ============================================================================
// Re-exported Dependencies
// ============================================================================

/// Re-export miette for error handling.
pub use miette;

/// Re-export secrecy for token and key types.
pub use secrecy;
pub use secrecy::{ExposeSecret, SecretString};

// ============================================================================
// Core Modules
// ============================================================================

mod error;
pub use error::Error;

/// A Result type that displays errors with miette's fancy formatting.
///
/// ```rust,ignore
/// fn main() -> vaultenv::Result<()> {
///     let sources = loader.finish()?;
///     Ok(())
/// }
/// ```
pub type Result<T> = miette::Result<T>;

mod fingerprint;
pub use fingerprint::Fingerprint;

mod source;
pub use source::{ConfigSources, Source, ValueSource};

// ============================================================================
// Secrets Backend Sessions
// ============================================================================

pub mod auth;
pub mod backend;
pub mod session;
pub mod tls;

pub use auth::AuthMethod;
pub use backend::{
    BackendClient, BackendConnector, BackendError, BoxFuture, Secret, SecretAuth,
};
pub use session::{
    BackoffPolicy, Credentials, MonitorState, Session, SessionConfig, SessionHandle,
    SessionRegistry,
};
pub use tls::{TlsEnvVarNames, TlsIdentity, TlsVersion};

// ============================================================================
// Provider Extensibility
// ============================================================================

pub mod loader;
pub mod provider;

pub use provider::{
    AsyncProvider, BlockingAdapter, EnvProvider, Provider, ProviderError, ProviderResult,
    ProviderSource, ProviderValue, VaultProvider,
};

pub use loader::ConfigLoader;
