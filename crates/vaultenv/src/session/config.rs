//! Connection and credential parameters for a session.

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use super::backoff::BackoffPolicy;
use crate::Error;
use crate::auth::{AuthMethod, opt_secret_string};
use crate::fingerprint::{Fingerprint, FingerprintBuilder};
use crate::tls::TlsIdentity;

/// How a session proves its identity.
#[derive(Clone, Debug)]
pub enum Credentials {
    /// A pre-issued token. Used as-is, never renewed.
    Token(SecretString),
    /// Log in with an auth method; the resulting token is kept alive.
    Auth(AuthMethod),
}

/// Builder for the parameters that identify a session.
///
/// Sessions built from equal configurations share one [`Fingerprint`] and
/// therefore one underlying session in the
/// [`SessionRegistry`](super::SessionRegistry).
///
/// # Example
///
/// ```rust,ignore
/// use vaultenv::{SessionConfig, auth::AppRoleAuth};
///
/// let config = SessionConfig::new("vault.internal:8200")
///     .with_default_tls()
///     .with_header("X-Vault-Namespace", "team-a")
///     .with_auth(AppRoleAuth::new(role_id, secret_id));
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "RawSessionConfig")]
pub struct SessionConfig {
    host: String,
    headers: BTreeMap<String, String>,
    tls: Option<TlsIdentity>,
    credentials: Option<Credentials>,
    renew_increment: Duration,
    backoff: BackoffPolicy,
}

impl SessionConfig {
    /// Starts a configuration for the backend at `host` (`name[:port]`).
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            headers: BTreeMap::new(),
            tls: None,
            credentials: None,
            renew_increment: Duration::ZERO,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Adds a header sent with every request. Empty values are ignored.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.headers.insert(key.into(), value);
        }
        self
    }

    /// Adds several headers.
    #[must_use]
    pub fn with_headers<K, V>(self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        headers
            .into_iter()
            .fold(self, |config, (k, v)| config.with_header(k, v))
    }

    /// Connects over TLS with the given identity.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsIdentity) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Connects over TLS using system roots and no client certificate.
    #[must_use]
    pub fn with_default_tls(self) -> Self {
        self.with_tls(TlsIdentity::default())
    }

    /// Authenticates with a pre-issued token. Replaces any auth method.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::Token(SecretString::from(token.into())));
        self
    }

    /// Authenticates by logging in. Replaces any access token.
    #[must_use]
    pub fn with_auth(mut self, auth: impl Into<AuthMethod>) -> Self {
        self.credentials = Some(Credentials::Auth(auth.into()));
        self
    }

    /// Requested TTL extension per renewal. Zero uses the backend default.
    #[must_use]
    pub const fn with_renew_increment(mut self, increment: Duration) -> Self {
        self.renew_increment = increment;
        self
    }

    /// Retry schedule for failed renewals.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// The backend address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Extra request headers, sorted by name.
    #[must_use]
    pub const fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// TLS settings, `None` for plaintext.
    #[must_use]
    pub const fn tls(&self) -> Option<&TlsIdentity> {
        self.tls.as_ref()
    }

    /// The configured credentials.
    #[must_use]
    pub const fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// The static access token, if one is configured.
    #[must_use]
    pub fn access_token(&self) -> Option<&SecretString> {
        match &self.credentials {
            Some(Credentials::Token(token)) => Some(token),
            _ => None,
        }
    }

    /// The auth method, if one is configured.
    #[must_use]
    pub fn auth(&self) -> Option<&AuthMethod> {
        match &self.credentials {
            Some(Credentials::Auth(auth)) => Some(auth),
            _ => None,
        }
    }

    /// Requested renewal increment.
    #[must_use]
    pub const fn renew_increment(&self) -> Duration {
        self.renew_increment
    }

    /// Renewal retry schedule.
    #[must_use]
    pub const fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Validates the configuration and resolves on-disk credentials.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the host or credentials are
    /// missing, a header name is empty, the TLS identity is incomplete, or
    /// the auth method is invalid.
    pub fn prepare(mut self) -> Result<Self, Error> {
        if self.host.trim().is_empty() {
            return Err(Error::configuration("host not set"));
        }
        if self.headers.keys().any(String::is_empty) {
            return Err(Error::configuration("header name cannot be empty"));
        }
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }

        self.credentials = match self.credentials.take() {
            None => {
                return Err(Error::configuration(
                    "authentication method not specified",
                ));
            }
            Some(Credentials::Token(token)) => {
                if token.expose_secret().is_empty() {
                    return Err(Error::configuration("access token is empty"));
                }
                Some(Credentials::Token(token))
            }
            Some(Credentials::Auth(auth)) => Some(Credentials::Auth(auth.prepare()?)),
        };

        Ok(self)
    }

    /// Identity of this configuration for session sharing.
    ///
    /// Covers the host, headers, TLS identity and credentials. Renewal
    /// tuning does not take part.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut fp = FingerprintBuilder::new();

        fp.tag("host");
        fp.str(&self.host);

        fp.tag("headers");
        fp.u64(self.headers.len() as u64);
        for (key, value) in &self.headers {
            fp.str(key);
            fp.str(value);
        }

        match &self.tls {
            Some(tls) => tls.write_fingerprint(&mut fp),
            None => fp.tag("plaintext"),
        }

        match &self.credentials {
            Some(Credentials::Token(token)) => {
                fp.tag("token");
                fp.str(token.expose_secret());
            }
            Some(Credentials::Auth(auth)) => {
                fp.tag("auth");
                auth.write_fingerprint(&mut fp);
            }
            None => fp.tag("anonymous"),
        }

        fp.finish()
    }
}

/// Wire shape of [`SessionConfig`]; both credential fields are accepted so a
/// conflict can be reported.
#[derive(Deserialize)]
struct RawSessionConfig {
    host: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    tls: Option<TlsIdentity>,
    #[serde(default, deserialize_with = "opt_secret_string")]
    access_token: Option<SecretString>,
    #[serde(default)]
    auth: Option<AuthMethod>,
    #[serde(default, deserialize_with = "duration_secs")]
    renew_increment: Duration,
    #[serde(default)]
    backoff: BackoffPolicy,
}

impl TryFrom<RawSessionConfig> for SessionConfig {
    type Error = Error;

    fn try_from(raw: RawSessionConfig) -> Result<Self, Self::Error> {
        let credentials = match (raw.access_token, raw.auth) {
            (Some(_), Some(_)) => {
                return Err(Error::configuration(
                    "access_token and auth are mutually exclusive",
                ));
            }
            (Some(token), None) => Some(Credentials::Token(token)),
            (None, Some(auth)) => Some(Credentials::Auth(auth)),
            (None, None) => None,
        };

        let config = Self {
            host: raw.host,
            headers: BTreeMap::new(),
            tls: raw.tls,
            credentials,
            renew_increment: raw.renew_increment,
            backoff: raw.backoff,
        };
        Ok(config.with_headers(raw.headers))
    }
}

/// Deserializes a [`Duration`] given as (fractional) seconds.
pub(crate) fn duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}
