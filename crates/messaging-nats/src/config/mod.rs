use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_nats::ConnectOptions;
use serde::Deserialize;

use crate::factory::Error;

/// TLS settings for a NATS identity.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TlsConfig {
    /// Whether TLS is required.
    pub enabled: bool,

    /// Path to a PEM file with root certificates.
    pub ca_path: Option<PathBuf>,

    /// Path to the client certificate.
    pub cert_path: Option<PathBuf>,

    /// Path to the client key.
    pub key_path: Option<PathBuf>,
}

/// How to connect as one named identity.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NatsIdentityConfig {
    /// Server URLs.
    pub urls: Vec<String>,

    /// Username for user/password authentication.
    pub username: Option<String>,

    /// File holding the password.
    pub password_path: Option<PathBuf>,

    /// File holding an authentication token.
    pub token_path: Option<PathBuf>,

    /// TLS settings.
    pub tls: TlsConfig,

    /// Whether the server echoes this connection's own publishes back to it.
    pub echo: bool,
}

impl Default for NatsIdentityConfig {
    fn default() -> Self {
        Self {
            urls: vec!["nats://localhost:4222".to_string()],
            username: None,
            password_path: None,
            token_path: None,
            tls: TlsConfig::default(),
            echo: false,
        }
    }
}

/// A TOML file listing identities under `[identities.<name>]`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct IdentitiesFile {
    /// Identities by name.
    #[serde(default)]
    pub identities: HashMap<String, NatsIdentityConfig>,
}

impl IdentitiesFile {
    /// Parses identities from TOML.
    ///
    /// # Errors
    ///
    /// Returns `Error::Toml` if the document is malformed.
    pub fn from_toml_str(source: &str) -> Result<Self, Error> {
        Ok(toml::from_str(source)?)
    }
}

/// An identity with its secrets read from disk.
#[derive(Clone, Debug)]
pub struct NatsIdentity {
    /// The configuration the identity was resolved from.
    pub config: NatsIdentityConfig,

    password: Option<String>,
    token: Option<String>,
}

async fn read_secret(path: &Path) -> Result<String, Error> {
    tokio::fs::read_to_string(path)
        .await
        .map(|contents| contents.trim().to_string())
        .map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
}

impl NatsIdentity {
    /// Resolves an identity, reading the password and token files it references.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if a secret file cannot be read.
    pub async fn load(config: NatsIdentityConfig) -> Result<Self, Error> {
        let password = match &config.password_path {
            Some(path) => Some(read_secret(path).await?),
            None => None,
        };
        let token = match &config.token_path {
            Some(path) => Some(read_secret(path).await?),
            None => None,
        };

        Ok(Self {
            config,
            password,
            token,
        })
    }

    /// The password, if one was configured.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// The token, if one was configured.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// The server list in the comma separated form the client accepts.
    #[must_use]
    pub fn servers(&self) -> String {
        self.config.urls.join(",")
    }

    /// Builds client options for this identity.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new();

        if let (Some(username), Some(password)) = (&self.config.username, &self.password) {
            options = options.user_and_password(username.clone(), password.clone());
        }

        if let Some(token) = &self.token {
            options = options.token(token.clone());
        }

        let tls = &self.config.tls;
        if tls.enabled {
            options = options.require_tls(true);
        }
        if let Some(ca_path) = &tls.ca_path {
            options = options.add_root_certificates(ca_path.clone());
        }
        if let (Some(cert_path), Some(key_path)) = (&tls.cert_path, &tls.key_path) {
            options = options.add_client_certificate(cert_path.clone(), key_path.clone());
        }

        if !self.config.echo {
            options = options.no_echo();
        }

        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use assert_matches::assert_matches;

    #[test]
    fn test_parse_identities() {
        let file = IdentitiesFile::from_toml_str(
            r#"
            [identities.default]
            urls = ["nats://a:4222", "nats://b:4222"]
            username = "courier"
            password_path = "/run/secrets/nats-password"

            [identities.secure]
            echo = true

            [identities.secure.tls]
            enabled = true
            ca_path = "/etc/nats/ca.pem"
            "#,
        )
        .unwrap();

        let default = &file.identities["default"];
        assert_eq!(default.urls.len(), 2);
        assert_eq!(default.username.as_deref(), Some("courier"));
        assert!(!default.echo);
        assert!(!default.tls.enabled);

        let secure = &file.identities["secure"];
        assert_eq!(secure.urls, vec!["nats://localhost:4222".to_string()]);
        assert!(secure.echo);
        assert!(secure.tls.enabled);
        assert_eq!(
            secure.tls.ca_path.as_deref(),
            Some(Path::new("/etc/nats/ca.pem"))
        );
    }

    #[test]
    fn test_parse_rejects_malformed_toml() {
        let result = IdentitiesFile::from_toml_str("[identities.default\nurls = 3");

        assert_matches!(result, Err(Error::Toml(_)));
    }

    #[tokio::test]
    async fn test_load_reads_trimmed_secrets() {
        let mut password = tempfile::NamedTempFile::new().unwrap();
        writeln!(password, "  hunter2  ").unwrap();
        let mut token = tempfile::NamedTempFile::new().unwrap();
        writeln!(token, "s3cr3t").unwrap();

        let identity = NatsIdentity::load(NatsIdentityConfig {
            username: Some("courier".to_string()),
            password_path: Some(password.path().to_path_buf()),
            token_path: Some(token.path().to_path_buf()),
            ..NatsIdentityConfig::default()
        })
        .await
        .unwrap();

        assert_eq!(identity.password(), Some("hunter2"));
        assert_eq!(identity.token(), Some("s3cr3t"));
        assert_eq!(identity.servers(), "nats://localhost:4222");
    }

    #[tokio::test]
    async fn test_load_missing_secret_file() {
        let result = NatsIdentity::load(NatsIdentityConfig {
            password_path: Some(PathBuf::from("/nonexistent/courier/password")),
            ..NatsIdentityConfig::default()
        })
        .await;

        assert_matches!(result, Err(Error::Io { path, .. }) if path.ends_with("password"));
    }
}
