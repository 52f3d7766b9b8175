use crate::error::Error;

use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// SASL SCRAM hash used when credentials are supplied.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScramAlgorithm {
    /// SCRAM-SHA-256.
    Sha256,

    /// SCRAM-SHA-512.
    Sha512,
}

impl Display for ScramAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Sha256 => f.write_str("sha256"),
            Self::Sha512 => f.write_str("sha512"),
        }
    }
}

impl FromStr for ScramAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(Error::ConfigInvalid(format!(
                "invalid SHA algorithm \"{other}\": can be either \"sha256\" or \"sha512\""
            ))),
        }
    }
}

fn default_shutdown_timeout_ms() -> u64 {
    10_000
}

/// Connection settings shared by every backend.
#[derive(Clone, Deserialize, Serialize)]
pub struct MessagingConfig {
    /// Comma-separated broker addresses.
    pub servers: String,

    /// Application name used to namespace consumer groups.
    pub app_name: String,

    /// SASL / NATS user name.
    #[serde(default)]
    pub username: Option<String>,

    /// SASL / NATS password.
    #[serde(default)]
    pub password: Option<String>,

    /// SCRAM hash (required when `username` is set on Kafka).
    #[serde(default)]
    pub algorithm: Option<ScramAlgorithm>,

    /// CA bundle; enables TLS when set.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Client certificate.
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    /// Client private key.
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// Skip server certificate verification.
    #[serde(default)]
    pub tls_skip_verify: bool,

    /// Upper bound on how long `shutdown` waits for consume loops to exit.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl MessagingConfig {
    /// Creates a config without credentials or TLS.
    #[must_use]
    pub fn new<S, A>(servers: S, app_name: A) -> Self
    where
        S: Into<String>,
        A: Into<String>,
    {
        Self {
            servers: servers.into(),
            app_name: app_name.into(),
            username: None,
            password: None,
            algorithm: None,
            ca_file: None,
            cert_file: None,
            key_file: None,
            tls_skip_verify: false,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }

    /// Adds SASL credentials.
    #[must_use]
    pub fn with_credentials<U, P>(
        mut self,
        username: U,
        password: P,
        algorithm: ScramAlgorithm,
    ) -> Self
    where
        U: Into<String>,
        P: Into<String>,
    {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self.algorithm = Some(algorithm);
        self
    }

    /// Adds TLS material.
    #[must_use]
    pub fn with_tls<C, E, K>(mut self, ca_file: C, cert_file: E, key_file: K) -> Self
    where
        C: Into<PathBuf>,
        E: Into<PathBuf>,
        K: Into<PathBuf>,
    {
        self.ca_file = Some(ca_file.into());
        self.cert_file = Some(cert_file.into());
        self.key_file = Some(key_file.into());
        self
    }

    /// Broker addresses with surrounding whitespace and empty entries removed.
    #[must_use]
    pub fn server_list(&self) -> Vec<String> {
        self.servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    /// Whether credentials were supplied.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
    }

    /// Whether TLS should be enabled.
    #[must_use]
    pub const fn uses_tls(&self) -> bool {
        self.ca_file.is_some()
    }

    /// Bound on the graceful-stop wait.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Checks the config before any connection attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] for an empty server list or app name.
    pub fn validate(&self) -> Result<(), Error> {
        if self.server_list().is_empty() {
            return Err(Error::ConfigInvalid("servers cannot be empty".to_string()));
        }

        if self.app_name.trim().is_empty() {
            return Err(Error::ConfigInvalid("app name cannot be empty".to_string()));
        }

        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(Error::ConfigInvalid(
                "cert file and key file must be set together".to_string(),
            ));
        }

        Ok(())
    }
}

impl Debug for MessagingConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("MessagingConfig")
            .field("servers", &self.servers)
            .field("app_name", &self.app_name)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("algorithm", &self.algorithm)
            .field("ca_file", &self.ca_file)
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("tls_skip_verify", &self.tls_skip_verify)
            .field("shutdown_timeout_ms", &self.shutdown_timeout_ms)
            .finish()
    }
}
