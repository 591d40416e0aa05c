//! Authentication method descriptors.
//!
//! An [`AuthMethod`] says *how* a session logs in; the [`BackendClient`]
//! decides what that means on the wire. Descriptors are plain data: they
//! can be deserialized from configuration files, are validated before a
//! session is built, and contribute their fields to the session
//! [`Fingerprint`](crate::Fingerprint) so equal descriptors share a session.
//!
//! ```rust,ignore
//! use vaultenv::auth::{AppRoleAuth, AuthMethod};
//!
//! let auth: AuthMethod = AppRoleAuth::new("my-role-id", "my-secret-id")
//!     .with_mount_path("approle-prod")
//!     .into();
//! ```
//!
//! [`BackendClient`]: crate::backend::BackendClient

use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use crate::Error;
use crate::fingerprint::FingerprintBuilder;

/// Service-account token locations probed when no Kubernetes token is given.
pub const KUBERNETES_TOKEN_FILES: &[&str] = &[
    "/var/run/secrets/kubernetes.io/serviceaccount/token",
    "/run/secrets/kubernetes.io/serviceaccount/token",
];

/// How a session authenticates against the secrets backend.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
#[non_exhaustive]
pub enum AuthMethod {
    /// Role id / secret id pair.
    AppRole(AppRoleAuth),
    /// Kubernetes service-account token.
    Kubernetes(KubernetesAuth),
    /// LDAP username and password.
    Ldap(LdapAuth),
    /// AWS IAM or EC2 identity.
    Aws(AwsAuth),
    /// Google Cloud GCE or IAM identity.
    Gcp(GcpAuth),
    /// Azure managed identity.
    Azure(AzureAuth),
}

impl AuthMethod {
    /// Short name of the method, also its default mount path.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AppRole(_) => "approle",
            Self::Kubernetes(_) => "kubernetes",
            Self::Ldap(_) => "ldap",
            Self::Aws(_) => "aws",
            Self::Gcp(_) => "gcp",
            Self::Azure(_) => "azure",
        }
    }

    /// The auth mount to log in at.
    #[must_use]
    pub fn mount_path(&self) -> &str {
        let explicit = match self {
            Self::AppRole(a) => a.mount_path.as_deref(),
            Self::Kubernetes(a) => a.mount_path.as_deref(),
            Self::Ldap(a) => a.mount_path.as_deref(),
            Self::Aws(a) => a.mount_path.as_deref(),
            Self::Gcp(a) => a.mount_path.as_deref(),
            Self::Azure(a) => a.mount_path.as_deref(),
        };
        explicit
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.kind())
    }

    /// Validates required fields and resolves anything read from disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when a required field is empty or a
    /// Kubernetes service-account token cannot be located.
    pub fn prepare(self) -> Result<Self, Error> {
        match self {
            Self::AppRole(a) => {
                require(&a.role_id, "no role id specified for AppRole auth")?;
                require(
                    a.secret_id.expose_secret(),
                    "no secret id specified for AppRole auth",
                )?;
                Ok(Self::AppRole(a))
            }
            Self::Kubernetes(a) => {
                require(&a.role, "no role specified for Kubernetes auth")?;
                Ok(Self::Kubernetes(a.resolve_token()?))
            }
            Self::Ldap(a) => {
                require(&a.username, "no user name specified for LDAP auth")?;
                require(
                    a.password.expose_secret(),
                    "no password specified for LDAP auth",
                )?;
                Ok(Self::Ldap(a))
            }
            Self::Aws(a) => {
                require(&a.role, "no role specified for AWS auth")?;
                Ok(Self::Aws(a))
            }
            Self::Gcp(a) => {
                require(&a.role, "no role specified for GCP auth")?;
                if let GcpAuthKind::Iam {
                    service_account_email,
                } = &a.kind
                {
                    require(
                        service_account_email,
                        "no service account email specified for GCP IAM auth",
                    )?;
                }
                Ok(Self::Gcp(a))
            }
            Self::Azure(a) => {
                require(&a.role, "no role specified for Azure auth")?;
                Ok(Self::Azure(a))
            }
        }
    }

    pub(crate) fn write_fingerprint(&self, fp: &mut FingerprintBuilder) {
        fp.tag(self.kind());
        match self {
            Self::AppRole(a) => {
                fp.str(&a.role_id);
                fp.str(a.secret_id.expose_secret());
                fp.opt_str(a.mount_path.as_deref());
                fp.bool(a.unwrap_secret_id);
            }
            Self::Kubernetes(a) => {
                fp.str(&a.role);
                fp.opt_str(a.service_account_token.as_ref().map(|t| t.expose_secret()));
                fp.opt_str(a.token_path.as_deref().and_then(Path::to_str));
                fp.opt_str(a.mount_path.as_deref());
            }
            Self::Ldap(a) => {
                fp.str(&a.username);
                fp.str(a.password.expose_secret());
                fp.opt_str(a.mount_path.as_deref());
            }
            Self::Aws(a) => {
                fp.str(&a.role);
                fp.opt_str(a.mount_path.as_deref());
                fp.u8(a.kind as u8);
                fp.u8(a.signature as u8);
                fp.opt_str(a.iam_server_id.as_deref());
                fp.opt_str(a.nonce.as_deref());
                fp.opt_str(a.region.as_deref());
            }
            Self::Gcp(a) => {
                fp.str(&a.role);
                fp.opt_str(a.mount_path.as_deref());
                match &a.kind {
                    GcpAuthKind::Gce => fp.tag("gce"),
                    GcpAuthKind::Iam {
                        service_account_email,
                    } => {
                        fp.tag("iam");
                        fp.str(service_account_email);
                    }
                }
            }
            Self::Azure(a) => {
                fp.str(&a.role);
                fp.opt_str(a.mount_path.as_deref());
                fp.opt_str(a.resource.as_deref());
            }
        }
    }
}

fn require(value: &str, message: &str) -> Result<(), Error> {
    if value.is_empty() {
        Err(Error::configuration(message))
    } else {
        Ok(())
    }
}

// ============================================================================
// Per-method descriptors
// ============================================================================

/// AppRole credentials.
#[derive(Clone, Debug, Deserialize)]
pub struct AppRoleAuth {
    /// The role id.
    pub role_id: String,
    /// The secret id, or a wrapping token when `unwrap_secret_id` is set.
    #[serde(deserialize_with = "secret_string")]
    pub secret_id: SecretString,
    /// Auth mount, defaults to `approle`.
    #[serde(default)]
    pub mount_path: Option<String>,
    /// Treat `secret_id` as a response-wrapping token.
    #[serde(default)]
    pub unwrap_secret_id: bool,
}

impl AppRoleAuth {
    /// Creates AppRole credentials.
    pub fn new(role_id: impl Into<String>, secret_id: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            secret_id: SecretString::from(secret_id.into()),
            mount_path: None,
            unwrap_secret_id: false,
        }
    }

    /// Sets the auth mount.
    #[must_use]
    pub fn with_mount_path(mut self, mount_path: impl Into<String>) -> Self {
        self.mount_path = Some(mount_path.into());
        self
    }

    /// Marks the secret id as a wrapping token.
    #[must_use]
    pub const fn with_secret_unwrap(mut self, unwrap: bool) -> Self {
        self.unwrap_secret_id = unwrap;
        self
    }
}

impl From<AppRoleAuth> for AuthMethod {
    fn from(value: AppRoleAuth) -> Self {
        Self::AppRole(value)
    }
}

/// Kubernetes service-account credentials.
#[derive(Clone, Debug, Deserialize)]
pub struct KubernetesAuth {
    /// The role to log in as.
    pub role: String,
    /// The service-account JWT. Resolved from disk when absent.
    #[serde(default, deserialize_with = "opt_secret_string")]
    pub service_account_token: Option<SecretString>,
    /// Read the token from this file instead of the well-known locations.
    #[serde(default)]
    pub token_path: Option<PathBuf>,
    /// Auth mount, defaults to `kubernetes`.
    #[serde(default)]
    pub mount_path: Option<String>,
}

impl KubernetesAuth {
    /// Creates Kubernetes credentials for `role`.
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            service_account_token: None,
            token_path: None,
            mount_path: None,
        }
    }

    /// Uses an explicit service-account token.
    #[must_use]
    pub fn with_service_account_token(mut self, token: impl Into<String>) -> Self {
        self.service_account_token = Some(SecretString::from(token.into()));
        self
    }

    /// Reads the token from `path`.
    #[must_use]
    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = Some(path.into());
        self
    }

    /// Sets the auth mount.
    #[must_use]
    pub fn with_mount_path(mut self, mount_path: impl Into<String>) -> Self {
        self.mount_path = Some(mount_path.into());
        self
    }

    fn resolve_token(mut self) -> Result<Self, Error> {
        let has_token = self
            .service_account_token
            .as_ref()
            .is_some_and(|t| !t.expose_secret().is_empty());
        if has_token {
            return Ok(self);
        }

        let candidates: Vec<PathBuf> = match &self.token_path {
            Some(path) => vec![path.clone()],
            None => KUBERNETES_TOKEN_FILES.iter().map(PathBuf::from).collect(),
        };

        for path in &candidates {
            match fs::read_to_string(path) {
                Ok(content) if !content.trim().is_empty() => {
                    self.service_account_token = Some(SecretString::from(content.trim().to_owned()));
                    return Ok(self);
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::configuration(format!(
                        "unable to read service account token file '{}': {e}",
                        path.display()
                    )));
                }
            }
        }

        Err(Error::configuration(
            "no service account token specified for Kubernetes auth and none found on disk",
        ))
    }
}

impl From<KubernetesAuth> for AuthMethod {
    fn from(value: KubernetesAuth) -> Self {
        Self::Kubernetes(value)
    }
}

/// LDAP credentials.
#[derive(Clone, Debug, Deserialize)]
pub struct LdapAuth {
    /// The LDAP user name.
    pub username: String,
    /// The LDAP password.
    #[serde(deserialize_with = "secret_string")]
    pub password: SecretString,
    /// Auth mount, defaults to `ldap`.
    #[serde(default)]
    pub mount_path: Option<String>,
}

impl LdapAuth {
    /// Creates LDAP credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
            mount_path: None,
        }
    }

    /// Sets the auth mount.
    #[must_use]
    pub fn with_mount_path(mut self, mount_path: impl Into<String>) -> Self {
        self.mount_path = Some(mount_path.into());
        self
    }
}

impl From<LdapAuth> for AuthMethod {
    fn from(value: LdapAuth) -> Self {
        Self::Ldap(value)
    }
}

/// AWS login flavour.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AwsAuthKind {
    /// Signed `sts:GetCallerIdentity` request.
    #[default]
    Iam = 1,
    /// EC2 instance identity document.
    Ec2 = 2,
}

/// Which EC2 identity document signature to present.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AwsSignature {
    /// Identity document plus its signature.
    #[default]
    Identity = 1,
    /// PKCS#7 signature.
    Pkcs7 = 2,
    /// RSA-2048 signature.
    Rsa2048 = 3,
}

/// AWS credentials.
#[derive(Clone, Debug, Deserialize)]
pub struct AwsAuth {
    /// The role to log in as.
    pub role: String,
    /// IAM or EC2.
    #[serde(default)]
    pub kind: AwsAuthKind,
    /// EC2 signature type.
    #[serde(default)]
    pub signature: AwsSignature,
    /// Value for the `X-Vault-AWS-IAM-Server-ID` header.
    #[serde(default)]
    pub iam_server_id: Option<String>,
    /// EC2 client nonce.
    #[serde(default)]
    pub nonce: Option<String>,
    /// AWS region for the STS request.
    #[serde(default)]
    pub region: Option<String>,
    /// Auth mount, defaults to `aws`.
    #[serde(default)]
    pub mount_path: Option<String>,
}

impl AwsAuth {
    /// Creates AWS credentials for `role` using IAM.
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            kind: AwsAuthKind::default(),
            signature: AwsSignature::default(),
            iam_server_id: None,
            nonce: None,
            region: None,
            mount_path: None,
        }
    }

    /// Selects IAM or EC2.
    #[must_use]
    pub const fn with_kind(mut self, kind: AwsAuthKind) -> Self {
        self.kind = kind;
        self
    }

    /// Selects the EC2 signature type.
    #[must_use]
    pub const fn with_signature(mut self, signature: AwsSignature) -> Self {
        self.signature = signature;
        self
    }

    /// Sets the IAM server id header.
    #[must_use]
    pub fn with_iam_server_id(mut self, id: impl Into<String>) -> Self {
        self.iam_server_id = Some(id.into());
        self
    }

    /// Sets the EC2 nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Sets the auth mount.
    #[must_use]
    pub fn with_mount_path(mut self, mount_path: impl Into<String>) -> Self {
        self.mount_path = Some(mount_path.into());
        self
    }
}

impl From<AwsAuth> for AuthMethod {
    fn from(value: AwsAuth) -> Self {
        Self::Aws(value)
    }
}

/// GCP login flavour.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum GcpAuthKind {
    /// Compute Engine instance identity.
    #[default]
    Gce,
    /// Signed JWT for a service account.
    Iam {
        /// The service account to sign as.
        service_account_email: String,
    },
}

/// GCP credentials.
#[derive(Clone, Debug, Deserialize)]
pub struct GcpAuth {
    /// The role to log in as.
    pub role: String,
    /// GCE or IAM.
    #[serde(default)]
    pub kind: GcpAuthKind,
    /// Auth mount, defaults to `gcp`.
    #[serde(default)]
    pub mount_path: Option<String>,
}

impl GcpAuth {
    /// Creates GCP credentials for `role` using GCE identity.
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            kind: GcpAuthKind::Gce,
            mount_path: None,
        }
    }

    /// Switches to IAM login as `service_account_email`.
    #[must_use]
    pub fn with_iam(mut self, service_account_email: impl Into<String>) -> Self {
        self.kind = GcpAuthKind::Iam {
            service_account_email: service_account_email.into(),
        };
        self
    }

    /// Sets the auth mount.
    #[must_use]
    pub fn with_mount_path(mut self, mount_path: impl Into<String>) -> Self {
        self.mount_path = Some(mount_path.into());
        self
    }
}

impl From<GcpAuth> for AuthMethod {
    fn from(value: GcpAuth) -> Self {
        Self::Gcp(value)
    }
}

/// Azure managed-identity credentials.
#[derive(Clone, Debug, Deserialize)]
pub struct AzureAuth {
    /// The role to log in as.
    pub role: String,
    /// Resource URL the identity token is requested for.
    #[serde(default)]
    pub resource: Option<String>,
    /// Auth mount, defaults to `azure`.
    #[serde(default)]
    pub mount_path: Option<String>,
}

impl AzureAuth {
    /// Creates Azure credentials for `role`.
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            resource: None,
            mount_path: None,
        }
    }

    /// Sets the resource URL.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Sets the auth mount.
    #[must_use]
    pub fn with_mount_path(mut self, mount_path: impl Into<String>) -> Self {
        self.mount_path = Some(mount_path.into());
        self
    }
}

impl From<AzureAuth> for AuthMethod {
    fn from(value: AzureAuth) -> Self {
        Self::Azure(value)
    }
}

// ============================================================================
// Serde helpers
// ============================================================================

pub(crate) fn secret_string<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(SecretString::from(s))
}

pub(crate) fn opt_secret_string<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.map(SecretString::from))
}
