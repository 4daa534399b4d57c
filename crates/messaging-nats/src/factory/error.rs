use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving identities and opening connections.
#[derive(Debug, Error)]
pub enum Error {
    /// Connecting failed.
    #[error("failed to connect as {identity}: {message}")]
    Connect {
        /// The identity name.
        identity: String,

        /// The client's description of the failure.
        message: String,
    },

    /// The identity exists but has not been booted.
    #[error("identity {0} has not been booted")]
    IdentityNotBooted(String),

    /// No identity with this name is configured.
    #[error("unknown identity {0}")]
    IdentityNotFound(String),

    /// A configuration or secret file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file.
        path: PathBuf,

        /// The underlying error.
        source: std::io::Error,
    },

    /// The identities file is not valid TOML.
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}
