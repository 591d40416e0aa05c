//! Source attribution for loaded values.
//!
//! Every value handed out by the [`ConfigLoader`](crate::ConfigLoader) is
//! recorded together with where it came from, so an application can tell a
//! secret read from the backend apart from an environment override.

use std::fmt::{self, Display, Formatter};

/// Where a configuration value originated.
///
/// # Example
///
/// ```rust,ignore
/// for (key, source) in loader.sources().iter() {
///     if let Source::SecretBackend(path) = &source.source {
///         println!("{key} read from {path}");
///     }
/// }
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Source {
    /// Read from a process environment variable.
    Environment,

    /// Read from the secrets backend at the given path.
    SecretBackend(String),

    /// Supplied by a user-defined provider.
    CustomProvider(String),

    /// Fallback supplied by the caller.
    Default,

    /// No provider had a value.
    NotSet,
}

impl Display for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => write!(f, "Environment variable"),

            Self::SecretBackend(path) => write!(f, "Secret backend ({path})"),

            Self::CustomProvider(name) => write!(f, "Custom provider ({name})"),

            Self::Default => write!(f, "Default value"),

            Self::NotSet => write!(f, "Not set"),
        }
    }
}

/// Source information for a single value: the name it was looked up under
/// in its provider and where it came from.
#[derive(Clone, Debug)]
pub struct ValueSource {
    /// The lookup name (environment variable, secret field, ...).
    pub var_name: String,

    /// Where the value originated from.
    pub source: Source,
}

impl ValueSource {
    /// Creates a new `ValueSource`.
    pub fn new(var_name: impl Into<String>, source: Source) -> Self {
        Self {
            var_name: var_name.into(),
            source,
        }
    }
}

impl Display for ValueSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.var_name, self.source)
    }
}

/// Source attributions for every key a loader resolved, in lookup order.
///
/// Prints as an aligned table:
///
/// ```text
/// Configuration Source:
/// --------------------------------------------------
///   db_password  <- Secret backend (secret/data/app) [db_password]
///   port         <- Default value [PORT]
/// ```
#[derive(Clone, Debug, Default)]
pub struct ConfigSources {
    entries: Vec<(String, ValueSource)>,
}

impl ConfigSources {
    /// Creates an empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Records the source of `key`.
    pub fn add(&mut self, key: impl Into<String>, source: ValueSource) {
        self.entries.push((key.into(), source));
    }

    /// All entries as `(key, source)` pairs.
    #[must_use]
    pub fn entries(&self) -> &[(String, ValueSource)] {
        &self.entries
    }

    /// Looks up the source recorded for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ValueSource> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, source)| source)
    }

    /// Iterates over keys and their sources.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValueSource)> {
        self.entries
            .iter()
            .map(|(name, source)| (name.as_str(), source))
    }

    /// Number of recorded keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Display for ConfigSources {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration Source:")?;
        writeln!(f, "{}", "-".repeat(50))?;

        let width = self
            .entries
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0);

        for (key, source) in &self.entries {
            writeln!(
                f,
                "  {key:<width$}  <- {} [{}]",
                source.source, source.var_name,
            )?;
        }

        Ok(())
    }
}
