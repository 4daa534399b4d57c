mod error;

pub use error::Error;

use crate::config::{IdentitiesFile, NatsIdentity, NatsIdentityConfig};
use crate::transport::NatsTransport;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use courier_ack::{Client, ClientOptions};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Opens and pools NATS connections and acknowledging clients by identity name.
///
/// Connections and clients live in separate pools; every client owns its own
/// connection and publisher cache.
#[derive(Debug)]
pub struct NatsConnectionFactory {
    configs: HashMap<String, NatsIdentityConfig>,
    identities: Mutex<HashMap<String, Arc<NatsIdentity>>>,
    pool: Mutex<HashMap<String, NatsTransport>>,
    client_options: ClientOptions,
    clients: Mutex<HashMap<String, Client<NatsTransport>>>,
}

async fn drain(name: &str, transport: &NatsTransport) {
    if let Err(e) = transport.client().drain().await {
        warn!(identity = name, error = %e, "failed to drain connection");
    }
}

impl NatsConnectionFactory {
    /// Creates a factory over the given identities.
    #[must_use]
    pub fn new(configs: HashMap<String, NatsIdentityConfig>) -> Self {
        Self {
            configs,
            identities: Mutex::new(HashMap::new()),
            pool: Mutex::new(HashMap::new()),
            client_options: ClientOptions::default(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the options of clients created from now on.
    #[must_use]
    pub fn with_client_options(mut self, options: ClientOptions) -> Self {
        self.client_options = options;
        self
    }

    /// Creates a factory from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Toml` if the document is malformed.
    pub fn from_toml_str(source: &str) -> Result<Self, Error> {
        Ok(Self::new(IdentitiesFile::from_toml_str(source)?.identities))
    }

    /// Creates a factory from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read and `Error::Toml` if it is malformed.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| Error::Io {
                path: path.to_path_buf(),
                source,
            })?;

        Self::from_toml_str(&source)
    }

    /// Names of the configured identities.
    pub fn identity_names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    /// Resolves an identity, reading its secrets on first use.
    ///
    /// # Errors
    ///
    /// Returns `Error::IdentityNotFound` for unknown names and `Error::Io` when a secret
    /// file cannot be read.
    pub async fn identity(&self, name: &str) -> Result<Arc<NatsIdentity>, Error> {
        let mut identities = self.identities.lock().await;
        if let Some(identity) = identities.get(name) {
            return Ok(identity.clone());
        }

        let config = self
            .configs
            .get(name)
            .ok_or_else(|| Error::IdentityNotFound(name.to_string()))?;

        let identity = Arc::new(NatsIdentity::load(config.clone()).await?);
        identities.insert(name.to_string(), identity.clone());

        Ok(identity)
    }

    /// Opens a new, unpooled connection.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connect` if the server cannot be reached, or any identity error.
    pub async fn create(&self, name: &str) -> Result<NatsTransport, Error> {
        let identity = self.identity(name).await?;
        let servers = identity.servers();

        debug!(identity = name, servers = %servers, "connecting");

        let client = identity
            .connect_options()
            .connect(servers.as_str())
            .await
            .map_err(|e| Error::Connect {
                identity: name.to_string(),
                message: e.to_string(),
            })?;

        info!(identity = name, "connected");

        Ok(NatsTransport::new(client))
    }

    /// Returns the pooled connection for an identity, opening it if needed.
    ///
    /// With `force` a new connection replaces the pooled one.
    ///
    /// # Errors
    ///
    /// See [`Self::create`].
    pub async fn boot(&self, name: &str, force: bool) -> Result<NatsTransport, Error> {
        let mut pool = self.pool.lock().await;

        if !force {
            if let Some(transport) = pool.get(name) {
                return Ok(transport.clone());
            }
        }

        let transport = self.create(name).await?;
        pool.insert(name.to_string(), transport.clone());

        Ok(transport)
    }

    /// Returns a connection previously opened with [`Self::boot`].
    ///
    /// # Errors
    ///
    /// Returns `Error::IdentityNotFound` for unknown names and `Error::IdentityNotBooted`
    /// when the identity exists but was never booted.
    pub async fn get(&self, name: &str) -> Result<NatsTransport, Error> {
        if !self.configs.contains_key(name) {
            return Err(Error::IdentityNotFound(name.to_string()));
        }

        self.pool
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::IdentityNotBooted(name.to_string()))
    }

    /// Flushes and drains every pooled connection, closing it for every holder of a clone.
    pub async fn close_pool(&self) {
        let pooled: Vec<(String, NatsTransport)> = self.pool.lock().await.drain().collect();

        for (name, transport) in pooled {
            if let Err(e) = transport.client().flush().await {
                warn!(identity = %name, error = %e, "failed to flush connection");
            }
            drain(&name, &transport).await;
            debug!(identity = %name, "connection closed");
        }
    }

    /// Opens a new, unpooled client on its own connection.
    ///
    /// # Errors
    ///
    /// See [`Self::create`].
    pub async fn create_client(&self, name: &str) -> Result<Client<NatsTransport>, Error> {
        let transport = self.create(name).await?;

        debug!(identity = name, "client created");

        Ok(Client::new(transport, self.client_options.clone()))
    }

    /// Returns the pooled client for an identity, creating it if needed.
    ///
    /// With `force` a new client replaces the pooled one.
    ///
    /// # Errors
    ///
    /// See [`Self::create`].
    pub async fn boot_client(
        &self,
        name: &str,
        force: bool,
    ) -> Result<Client<NatsTransport>, Error> {
        let mut clients = self.clients.lock().await;

        if !force {
            if let Some(client) = clients.get(name) {
                return Ok(client.clone());
            }
        }

        let client = self.create_client(name).await?;
        clients.insert(name.to_string(), client.clone());

        Ok(client)
    }

    /// Returns a client previously created with [`Self::boot_client`].
    ///
    /// # Errors
    ///
    /// Returns `Error::IdentityNotFound` for unknown names and `Error::IdentityNotBooted`
    /// when the identity exists but no client was booted for it.
    pub async fn get_client(&self, name: &str) -> Result<Client<NatsTransport>, Error> {
        if !self.configs.contains_key(name) {
            return Err(Error::IdentityNotFound(name.to_string()));
        }

        self.clients
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::IdentityNotBooted(name.to_string()))
    }

    /// Closes every pooled client and drains its connection.
    pub async fn close_client_pool(&self) {
        let pooled: Vec<(String, Client<NatsTransport>)> =
            self.clients.lock().await.drain().collect();

        for (name, client) in pooled {
            if let Err(e) = client.close().await {
                warn!(identity = %name, error = %e, "failed to close client");
            }
            drain(&name, client.transport()).await;
            debug!(identity = %name, "client closed");
        }
    }
}
