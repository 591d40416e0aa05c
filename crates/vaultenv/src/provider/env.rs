//! Environment variable provider.

use std::collections::HashSet;
use std::env::{self, VarError};

use super::{Provider, ProviderError, ProviderResult, ProviderSource, ProviderValue, priority};

/// Provider that reads configuration from environment variables.
///
/// Outranks the secrets backend, so any stored secret can be overridden for
/// local development by exporting the variable.
///
/// # Example
///
/// ```rust,ignore
/// use vaultenv::provider::EnvProvider;
///
/// // Reads APP_DB_PASSWORD for key "DB_PASSWORD", masked in logs
/// let provider = EnvProvider::with_prefix("APP_").with_secret_key("DB_PASSWORD");
/// ```
#[derive(Debug, Default)]
pub struct EnvProvider {
    prefix: Option<String>,
    secret_keys: HashSet<String>,
}

impl EnvProvider {
    /// Creates an environment provider without a prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an environment provider that prepends `prefix` to every key.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            secret_keys: HashSet::new(),
        }
    }

    /// Marks values of `key` as secret.
    #[must_use]
    pub fn with_secret_key(mut self, key: impl Into<String>) -> Self {
        self.secret_keys.insert(key.into());
        self
    }

    fn full_key(&self, key: &str) -> String {
        self.prefix
            .as_ref()
            .map_or_else(|| key.to_string(), |p| format!("{p}{key}"))
    }
}

impl Provider for EnvProvider {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn get(&self, key: &str) -> ProviderResult<ProviderValue> {
        let full_key = self.full_key(key);

        match env::var(&full_key) {
            Ok(value) => Ok(Some(
                ProviderValue::new(value, ProviderSource::environment())
                    .with_secret(self.secret_keys.contains(key)),
            )),

            Err(VarError::NotPresent) => Ok(None),

            Err(VarError::NotUnicode(_)) => Err(ProviderError::InvalidValue {
                key: full_key,
                provider: self.name().to_string(),
                message: "environment variable contains invalid UTF-8".to_string(),
            }),
        }
    }

    fn priority(&self) -> u32 {
        priority::ENVIRONMENT
    }
}
