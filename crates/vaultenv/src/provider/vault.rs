//! Secrets backend provider.
//!
//! Exposes the fields of one stored secret as configuration keys. The secret
//! is read once, on the first lookup, through a shared session; subsequent
//! lookups are served from memory.
//!
//! Both KV layouts are understood: a version 2 response nests the fields
//! under `data`, a version 1 response has them at the top level.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::debug;

use super::{
    AsyncProvider, BoxFuture, ProviderError, ProviderResult, ProviderSource, ProviderValue,
    priority,
};
use crate::backend::BackendConnector;
use crate::session::{SessionConfig, SessionHandle, SessionRegistry};
use crate::Error;

const PROVIDER_NAME: &str = "vault";

/// Provider serving the fields of the secret stored at one path.
///
/// Every value is marked secret.
///
/// # Example
///
/// ```rust,ignore
/// use vaultenv::provider::{BlockingAdapter, VaultProvider};
///
/// let provider = VaultProvider::connect(config, &connector, "secret/data/app")?;
/// let password = provider.get("db_password").await?;
/// ```
pub struct VaultProvider {
    handle: SessionHandle,
    path: String,
    priority: u32,
    values: OnceCell<HashMap<String, String>>,
}

impl VaultProvider {
    /// Creates a provider reading `path` through `handle`.
    pub fn new(handle: SessionHandle, path: impl Into<String>) -> Self {
        Self {
            handle,
            path: path.into(),
            priority: priority::SECRET_BACKEND,
            values: OnceCell::new(),
        }
    }

    /// Acquires a session for `config` from the process-wide registry and
    /// creates a provider reading `path` through it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `config` or `path` is invalid.
    pub fn connect(
        config: SessionConfig,
        connector: &dyn BackendConnector,
        path: impl Into<String>,
    ) -> Result<Self, Error> {
        let path = path.into();
        if path.trim_matches('/').is_empty() {
            return Err(Error::configuration("secret path not set"));
        }
        let handle = SessionRegistry::global().acquire(config, connector)?;
        Ok(Self::new(handle, path))
    }

    /// Overrides the provider priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// The secret path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The session handle used for reads.
    #[must_use]
    pub const fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Reads the secret and returns its fields as JSON.
    ///
    /// Always goes to the backend; does not touch the lookup cache.
    ///
    /// # Errors
    ///
    /// Returns the session's read error, or [`Error::Read`] with
    /// "data not found" when the path holds no secret.
    pub async fn load_json(&self) -> Result<Map<String, Value>, Error> {
        let secret = self.handle.read(&self.path).await?;
        let Some(secret) = secret else {
            return Err(Error::read(&self.path, "data not found"));
        };

        let mut data = secret.data;
        let fields = match data.remove("data") {
            Some(Value::Object(fields)) => fields,
            Some(other) => {
                data.insert("data".to_owned(), other);
                data
            }
            None => data,
        };

        if fields.is_empty() {
            return Err(Error::read(&self.path, "data not found"));
        }
        Ok(fields)
    }

    /// Reads the secret and flattens its fields to strings.
    ///
    /// Strings are kept verbatim, `null` fields are dropped and any other
    /// value becomes its JSON text.
    ///
    /// # Errors
    ///
    /// See [`load_json`](Self::load_json).
    pub async fn load(&self) -> Result<HashMap<String, String>, Error> {
        let fields = self.load_json().await?;
        debug!(path = %self.path, fields = fields.len(), "secret loaded");
        Ok(flatten(fields))
    }

    /// Releases the session reference held by this provider.
    pub async fn close(&self) {
        self.handle.close().await;
    }

    async fn cached(&self) -> Result<&HashMap<String, String>, ProviderError> {
        self.values
            .get_or_try_init(|| self.load())
            .await
            .map_err(|e| to_provider_error(&self.path, e))
    }
}

impl AsyncProvider for VaultProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ProviderResult<ProviderValue>> {
        Box::pin(async move {
            let values = self.cached().await?;
            Ok(values.get(key).map(|value| {
                ProviderValue::new(value.clone(), ProviderSource::secret_backend(&self.path))
                    .with_secret(true)
            }))
        })
    }

    #[allow(clippy::elidable_lifetime_names)]
    fn is_available<'a>(&'a self) -> BoxFuture<'a, bool> {
        Box::pin(async move { !self.handle.session().is_closed() })
    }

    fn priority(&self) -> u32 {
        self.priority
    }
}

fn flatten(fields: Map<String, Value>) -> HashMap<String, String> {
    fields
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((key, s)),
            other => Some((key, other.to_string())),
        })
        .collect()
}

fn to_provider_error(path: &str, error: Error) -> ProviderError {
    match error {
        Error::Login { .. } => ProviderError::connection_with_source(
            PROVIDER_NAME,
            "unable to log in to the secrets backend",
            error,
        ),
        other => ProviderError::other_with_source(
            PROVIDER_NAME,
            format!("unable to read '{path}'"),
            other,
        ),
    }
}
