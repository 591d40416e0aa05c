//! Configuration loader that orchestrates multiple providers.
//!
//! The [`ConfigLoader`] chains providers together and accumulates all errors
//! rather than failing on the first one.
//!
//! # Example
//!
//! ```rust,ignore
//! use vaultenv::loader::ConfigLoader;
//! use vaultenv::provider::{BlockingAdapter, VaultProvider};
//!
//! let vault = VaultProvider::connect(config, &connector, "secret/data/app")?;
//!
//! let mut loader = ConfigLoader::new()
//!     .with_env_prefix("APP_")
//!     .with_async_provider(vault, runtime.handle().clone());
//!
//! let password = loader.get_required("db_password");
//! let port = loader.get_parsed::<u16>("port")?.unwrap_or(5432);
//! let sources = loader.finish()?;
//! ```

use std::collections::HashMap;

use tracing::debug;

use crate::provider::{
    AsyncProvider, BlockingAdapter, EnvProvider, Provider, ProviderError, ProviderSource,
    ProviderValue,
};
use crate::{ConfigSources, Error, Source, ValueSource};

/// Orchestrates configuration loading from multiple providers.
///
/// Providers are queried in priority order (lower number = higher priority).
/// The first provider to return a value for a key wins.
pub struct ConfigLoader {
    providers: Vec<Box<dyn Provider>>,
    cache: HashMap<String, ProviderValue>,
    sources: ConfigSources,
    errors: Vec<Error>,
    sorted: bool,
}

impl ConfigLoader {
    /// Creates a new empty configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            cache: HashMap::new(),
            sources: ConfigSources::new(),
            errors: Vec::new(),
            sorted: false,
        }
    }

    /// Adds a provider to the loader.
    #[must_use]
    pub fn with_provider(mut self, provider: Box<dyn Provider>) -> Self {
        self.providers.push(provider);
        self.sorted = false;
        self
    }

    /// Adds an async provider, blocking on `runtime` for each lookup.
    #[must_use]
    pub fn with_async_provider<P>(self, provider: P, runtime: tokio::runtime::Handle) -> Self
    where
        P: AsyncProvider + 'static,
    {
        self.with_provider(Box::new(BlockingAdapter::new(provider, runtime)))
    }

    /// Adds an environment provider.
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_provider(Box::new(EnvProvider::new()))
    }

    /// Adds an environment provider with a prefix.
    #[must_use]
    pub fn with_env_prefix(self, prefix: impl Into<String>) -> Self {
        self.with_provider(Box::new(EnvProvider::with_prefix(prefix)))
    }

    fn sort_providers(&mut self) {
        if !self.sorted {
            self.providers.sort_by_key(|p| p.priority());
            self.sorted = true;
        }
    }

    /// Gets a raw value from the provider chain.
    ///
    /// Returns `None` if no provider has the key. Provider errors are
    /// accumulated and can be retrieved with [`errors()`](Self::errors).
    pub fn get(&mut self, key: &str) -> Option<ProviderValue> {
        if let Some(cached) = self.cache.get(key) {
            return Some(cached.clone());
        }

        self.sort_providers();

        for provider in &self.providers {
            if !provider.is_available() {
                debug!(provider = provider.name(), "skipping unavailable provider");
                continue;
            }

            match provider.get(key) {
                Ok(Some(value)) => {
                    debug!(key, provider = provider.name(), "value resolved");
                    self.sources
                        .add(key, ValueSource::new(key, value.source.to_source()));
                    self.cache.insert(key.to_string(), value.clone());
                    return Some(value);
                }
                Ok(None) => {
                    if !provider.fallthrough() {
                        break;
                    }
                }
                Err(e) => {
                    self.errors.push(Self::provider_error_to_error(&e));
                }
            }
        }

        None
    }

    /// Gets a required value, recording a `Missing` error if not found.
    pub fn get_required(&mut self, key: &str) -> Option<ProviderValue> {
        let value = self.get(key);
        if value.is_none() {
            self.errors.push(Error::missing(key));
            self.sources.add(key, ValueSource::new(key, Source::NotSet));
        }
        value
    }

    /// Gets a value with a default fallback.
    pub fn get_with_default(&mut self, key: &str, default: &str) -> ProviderValue {
        if let Some(v) = self.get(key) {
            v
        } else {
            self.sources.add(key, ValueSource::new(key, Source::Default));
            ProviderValue::new(default, ProviderSource::default_value())
        }
    }

    /// Gets a value and parses it to the target type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the value cannot be parsed. Secret values
    /// are not included in the error.
    pub fn get_parsed<T: std::str::FromStr>(&mut self, key: &str) -> Result<Option<T>, Error>
    where
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(key) {
            Some(pv) => pv.value.parse::<T>().map(Some).map_err(|e| {
                Error::parse(
                    key,
                    pv.value.as_str(),
                    pv.secret,
                    std::any::type_name::<T>(),
                    Box::new(e),
                )
            }),
            None => Ok(None),
        }
    }

    /// Gets a raw string value from the provider chain.
    pub fn get_str(&mut self, key: &str) -> Option<String> {
        self.get(key).map(|pv| pv.value)
    }

    /// Gets a value with its source attribution.
    pub fn get_with_source(&mut self, key: &str) -> Option<(String, Source)> {
        self.get(key).map(|pv| (pv.value, pv.source.to_source()))
    }

    /// Lists all cached keys.
    #[must_use]
    pub fn cached_keys(&self) -> Vec<&str> {
        self.cache.keys().map(String::as_str).collect()
    }

    /// Checks if any errors have occurred.
    #[must_use]
    pub const fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns accumulated errors.
    #[must_use]
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Takes accumulated errors, leaving the loader empty.
    pub fn take_errors(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.errors)
    }

    /// Returns the source attribution for loaded values.
    #[must_use]
    pub const fn sources(&self) -> &ConfigSources {
        &self.sources
    }

    /// Finalizes loading.
    ///
    /// # Errors
    ///
    /// Returns the single accumulated error, or [`Error::Multiple`] when
    /// there are several.
    pub fn finish(self) -> Result<ConfigSources, Error> {
        match Error::multiple(self.errors) {
            None => Ok(self.sources),
            Some(err) => Err(err),
        }
    }

    fn provider_error_to_error(e: &ProviderError) -> Error {
        Error::Provider {
            provider: e.provider_name().to_string(),
            message: e.to_string(),
            help: "check provider configuration".to_string(),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
