//! TLS identity for the backend connection.
//!
//! [`TlsIdentity`] is plain structural data: PEM text for the trusted CA
//! certificates and an optional client certificate/key pair, plus a minimum
//! protocol version. It takes part in the session fingerprint by content, so
//! two identities loaded from the same PEM material deduplicate.
//!
//! Values are usually taken from the environment:
//!
//! | Variable | Content |
//! |----------|---------|
//! | `SSL_CA_CERT` | CA bundle |
//! | `SSL_CLIENT_CERT` | Client certificate |
//! | `SSL_CLIENT_KEY` | Client private key |
//!
//! Each value is either inline PEM (it starts with `-----` after leading
//! whitespace) or a path to a PEM file.

use std::env::{self, VarError};
use std::fs;
use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::Error;
use crate::auth::opt_secret_string;
use crate::fingerprint::FingerprintBuilder;

const CERTIFICATE_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const CERTIFICATE_END: &str = "-----END CERTIFICATE-----";

/// Minimum TLS protocol version.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.2
    #[default]
    #[serde(rename = "1.2")]
    Tls12 = 12,
    /// TLS 1.3
    #[serde(rename = "1.3")]
    Tls13 = 13,
}

/// Environment variable names consulted by [`TlsIdentity::from_env`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TlsEnvVarNames {
    /// Variable holding the CA bundle.
    pub ca_cert: String,
    /// Variable holding the client certificate.
    pub client_cert: String,
    /// Variable holding the client key.
    pub client_key: String,
}

impl Default for TlsEnvVarNames {
    fn default() -> Self {
        Self {
            ca_cert: "SSL_CA_CERT".to_owned(),
            client_cert: "SSL_CLIENT_CERT".to_owned(),
            client_key: "SSL_CLIENT_KEY".to_owned(),
        }
    }
}

/// Structural TLS settings for a session.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TlsIdentity {
    /// Trusted CA certificates, one PEM block each.
    #[serde(default)]
    pub ca_certificates: Vec<String>,

    /// Client certificate PEM.
    #[serde(default)]
    pub client_certificate: Option<String>,

    /// Client private key PEM.
    #[serde(default, deserialize_with = "opt_secret_string")]
    pub client_key: Option<SecretString>,

    /// Lowest protocol version to negotiate.
    #[serde(default)]
    pub min_version: TlsVersion,
}

impl TlsIdentity {
    /// Creates an identity with no certificates and TLS 1.2 minimum.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every certificate block found in `pem`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `pem` holds no certificate or a
    /// certificate block is not terminated.
    pub fn with_ca_pem(mut self, pem: &str) -> Result<Self, Error> {
        self.ca_certificates.extend(certificate_blocks(pem, "CA bundle")?);
        Ok(self)
    }

    /// Sets the client certificate and key.
    #[must_use]
    pub fn with_client_pem(mut self, certificate: impl Into<String>, key: impl Into<String>) -> Self {
        self.client_certificate = Some(certificate.into());
        self.client_key = Some(SecretString::from(key.into()));
        self
    }

    /// Sets the minimum protocol version.
    #[must_use]
    pub const fn with_min_version(mut self, version: TlsVersion) -> Self {
        self.min_version = version;
        self
    }

    /// Loads the identity from the environment variables named in `names`.
    ///
    /// Unset or empty variables are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a variable is not valid UTF-8, a
    /// referenced file cannot be read, the CA value contains no complete
    /// certificate, or only one half of the client certificate/key pair is
    /// present.
    pub fn from_env(names: &TlsEnvVarNames) -> Result<Self, Error> {
        let mut identity = Self::default();

        if let Some(ca) = load_env_pem(&names.ca_cert)? {
            identity
                .ca_certificates
                .extend(certificate_blocks(&ca, &names.ca_cert)?);
        }

        let cert = load_env_pem(&names.client_cert)?;
        let key = load_env_pem(&names.client_key)?;
        match (cert, key) {
            (Some(cert), Some(key)) => identity = identity.with_client_pem(cert, key),
            (None, None) => {}
            (Some(_), None) => {
                return Err(Error::configuration(format!(
                    "{} is set but {} is not",
                    names.client_cert, names.client_key
                )));
            }
            (None, Some(_)) => {
                return Err(Error::configuration(format!(
                    "{} is set but {} is not",
                    names.client_key, names.client_cert
                )));
            }
        }

        Ok(identity)
    }

    /// Returns `true` when a client certificate is configured.
    #[must_use]
    pub const fn has_client_identity(&self) -> bool {
        self.client_certificate.is_some()
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.client_certificate.is_some() != self.client_key.is_some() {
            return Err(Error::configuration(
                "client certificate and client key must be provided together",
            ));
        }
        Ok(())
    }

    pub(crate) fn write_fingerprint(&self, fp: &mut FingerprintBuilder) {
        fp.tag("tls");
        fp.u8(self.min_version as u8);
        fp.u64(self.ca_certificates.len() as u64);
        for ca in &self.ca_certificates {
            fp.str(ca.trim());
        }
        fp.opt_str(self.client_certificate.as_deref().map(str::trim));
        fp.opt_str(self.client_key.as_ref().map(|k| k.expose_secret().trim()));
    }
}

/// Returns `true` if `value` is inline PEM rather than a file path.
fn is_pem(value: &str) -> bool {
    value.trim_start().starts_with("-----")
}

fn load_env_pem(var: &str) -> Result<Option<String>, Error> {
    let value = match env::var(var) {
        Ok(v) if !v.is_empty() => v,
        Ok(_) | Err(VarError::NotPresent) => return Ok(None),
        Err(VarError::NotUnicode(_)) => {
            return Err(Error::configuration(format!("{var} is not valid UTF-8")));
        }
    };

    if is_pem(&value) {
        return Ok(Some(value));
    }

    let path = Path::new(&value);
    fs::read_to_string(path).map(Some).map_err(|e| {
        Error::configuration(format!(
            "unable to read {var} file '{}': {e}",
            path.display()
        ))
    })
}

/// Splits a PEM bundle into its `CERTIFICATE` blocks; other blocks are skipped.
///
/// `origin` names the material in error messages.
fn certificate_blocks(pem: &str, origin: &str) -> Result<Vec<String>, Error> {
    let mut blocks = Vec::new();
    let mut rest = pem;
    while let Some(start) = rest.find(CERTIFICATE_BEGIN) {
        let tail = &rest[start..];
        let body = &tail[CERTIFICATE_BEGIN.len()..];
        let end = body
            .find(CERTIFICATE_END)
            .filter(|&end| !body[..end].contains(CERTIFICATE_BEGIN))
            .ok_or_else(|| {
                Error::configuration(format!(
                    "{origin}: certificate {} is missing its END line",
                    blocks.len() + 1
                ))
            })?;
        let end = CERTIFICATE_BEGIN.len() + end + CERTIFICATE_END.len();
        blocks.push(tail[..end].to_owned());
        rest = &tail[end..];
    }

    if blocks.is_empty() {
        return Err(Error::configuration(format!("{origin}: no certificate found")));
    }
    Ok(blocks)
}
