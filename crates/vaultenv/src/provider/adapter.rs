//! Bridge from the synchronous loader to async providers.
//!
//! A secrets lookup may log in and start a token monitor, both of which live
//! on a tokio runtime. [`BlockingAdapter`] drives each lookup to completion on
//! a runtime handle chosen by the application, so
//! [`ConfigLoader`](crate::ConfigLoader) can stay synchronous.

use std::collections::HashMap;

use tokio::runtime::Handle;

use super::{AsyncProvider, Provider, ProviderResult, ProviderValue};
use crate::Error;

/// Presents an [`AsyncProvider`] as a [`Provider`].
///
/// Use the handle of a multi-threaded runtime: token monitors spawned by a
/// lookup must keep running between lookups. Lookups block the calling
/// thread, so call them from a plain thread or `spawn_blocking`, never from
/// async code running on that runtime.
///
/// ```rust,ignore
/// let runtime = tokio::runtime::Runtime::new()?;
/// let vault = VaultProvider::connect(config, &connector, "secret/data/app")?;
/// let loader = ConfigLoader::new()
///     .with_provider(Box::new(BlockingAdapter::new(vault, runtime.handle().clone())));
/// ```
pub struct BlockingAdapter<P> {
    provider: P,
    handle: Handle,
}

impl<P: AsyncProvider> BlockingAdapter<P> {
    /// Drives `provider` on `handle`.
    #[must_use]
    pub const fn new(provider: P, handle: Handle) -> Self {
        Self { provider, handle }
    }

    /// Drives `provider` on the runtime the caller is currently inside.
    ///
    /// Meant for code already running under `spawn_blocking`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when called outside a tokio runtime.
    pub fn from_current(provider: P) -> Result<Self, Error> {
        let handle = Handle::try_current().map_err(|e| {
            Error::configuration(format!(
                "provider '{}' needs a tokio runtime: {e}",
                provider.name()
            ))
        })?;
        Ok(Self::new(provider, handle))
    }

    /// The wrapped provider.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Unwraps the provider, dropping the runtime handle.
    #[must_use]
    pub fn into_provider(self) -> P {
        self.provider
    }
}

impl<P: AsyncProvider> Provider for BlockingAdapter<P> {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn get(&self, key: &str) -> ProviderResult<ProviderValue> {
        self.handle.block_on(self.provider.get(key))
    }

    fn get_many(&self, keys: &[&str]) -> HashMap<String, ProviderResult<ProviderValue>> {
        self.handle.block_on(self.provider.get_many(keys))
    }

    fn is_available(&self) -> bool {
        self.handle.block_on(self.provider.is_available())
    }

    fn priority(&self) -> u32 {
        self.provider.priority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{BoxFuture, ProviderSource, priority};
    use std::time::Duration;

    /// Answers after a timer tick, so lookups need a driven runtime.
    struct DelayedProvider;

    impl AsyncProvider for DelayedProvider {
        fn name(&self) -> &str {
            "delayed"
        }

        fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ProviderResult<ProviderValue>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok((key == "port").then(|| {
                    ProviderValue::new("8200", ProviderSource::custom("delayed", None))
                }))
            })
        }

        fn priority(&self) -> u32 {
            priority::CUSTOM + 1
        }
    }

    #[test]
    fn test_lookups_run_on_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let adapter = BlockingAdapter::new(DelayedProvider, runtime.handle().clone());

        assert_eq!(adapter.name(), "delayed");
        assert_eq!(adapter.priority(), priority::CUSTOM + 1);
        assert!(adapter.is_available());
        assert_eq!(adapter.get("port").unwrap().unwrap().value, "8200");
        assert!(adapter.get("host").unwrap().is_none());

        let many = adapter.get_many(&["port", "host"]);
        assert_eq!(many.len(), 2);
        assert!(many["host"].as_ref().unwrap().is_none());
    }

    #[test]
    fn test_from_current_outside_runtime_is_error() {
        let err = BlockingAdapter::from_current(DelayedProvider).err().unwrap();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("delayed"));
    }

    #[test]
    fn test_from_current_inside_blocking_task() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let value = runtime.block_on(async {
            tokio::task::spawn_blocking(|| {
                let adapter = BlockingAdapter::from_current(DelayedProvider).unwrap();
                adapter.get("port").unwrap().unwrap().value
            })
            .await
            .unwrap()
        });
        assert_eq!(value, "8200");
    }
}
