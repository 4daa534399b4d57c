//! Demo producer and listener for acknowledged delivery over NATS.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use courier_ack::{
    Client, ClientOptions, EventOptions, PublishOptions, RequestOptions, ServiceManager,
    ServiceOptions, decode_payload,
};
use courier_messaging::service_handler::{ServiceHandler, ServiceHandlerError};
use courier_messaging::subscription_handler::{SubscriptionHandler, SubscriptionHandlerError};
use courier_messaging::{Codec, Message};
use courier_messaging_nats::{NatsConnectionFactory, NatsTransport};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Client error
    #[error(transparent)]
    Client(#[from] courier_ack::client::Error<courier_messaging_nats::Error>),

    /// Connection error
    #[error("failed to connect: {0}")]
    Connect(String),

    /// Connection factory error
    #[error(transparent)]
    Factory(#[from] courier_messaging_nats::factory::Error),

    /// The published message was not acknowledged by every consumer group
    #[error("message to {0} was not acknowledged")]
    NotAcknowledged(String),

    /// Payload is not valid JSON
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Service manager error
    #[error(transparent)]
    Service(#[from] courier_ack::service::Error<courier_messaging_nats::Error>),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// NATS server URL, used unless an identity file is given
    #[arg(long, default_value = "nats://localhost:4222", env = "COURIER_NATS_URL")]
    url: String,

    /// TOML file with `[identities.<name>]` tables
    #[arg(long, env = "COURIER_IDENTITY_FILE", requires = "identity")]
    identity_file: Option<PathBuf>,

    /// Identity to connect as
    #[arg(long, env = "COURIER_IDENTITY")]
    identity: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Listen on a subject, acknowledging every message
    Listen {
        /// Subject to listen on
        #[arg(long)]
        subject: String,

        /// Queue group
        #[arg(long, default_value = courier_ack::envelope::DEFAULT_QUEUE_GROUP)]
        queue: String,

        /// Answer requests with `true` instead of consuming events
        #[arg(long)]
        respond: bool,
    },

    /// Publish a JSON payload
    Emit {
        /// Subject to publish to
        #[arg(long)]
        subject: String,

        /// JSON payload
        #[arg(long)]
        payload: String,

        /// Do not wait for acknowledgements
        #[arg(long)]
        no_ack: bool,

        /// Acknowledgement timeout per attempt
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },

    /// Send a request and print the reply
    Request {
        /// Subject to send to
        #[arg(long)]
        subject: String,

        /// JSON payload, `{}` when omitted
        #[arg(long)]
        payload: Option<String>,

        /// Reply timeout
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },
}

/// Handlers in this binary cannot fail.
#[derive(Debug)]
enum Never {}

impl fmt::Display for Never {
    fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {}
    }
}

impl std::error::Error for Never {}

impl ServiceHandlerError for Never {}
impl SubscriptionHandlerError for Never {}

#[derive(Clone)]
struct LogEvent {
    queue: String,
}

#[async_trait]
impl SubscriptionHandler for LogEvent {
    type Error = Never;

    async fn handle(&self, message: Message) -> Result<(), Never> {
        match decode_payload::<Value>(Codec::Json, &message.payload) {
            Ok(data) => info!(subject = %message.subject, queue = %self.queue, %data, "data received"),
            Err(_) => info!(subject = %message.subject, queue = %self.queue, data = %message.string(), "data received"),
        }
        Ok(())
    }
}

#[derive(Clone)]
struct AlwaysTrue;

#[async_trait]
impl ServiceHandler for AlwaysTrue {
    type Error = Never;
    type Request = Value;
    type Response = bool;

    async fn handle(&self, request: Value, message: &Message) -> Result<bool, Never> {
        info!(subject = %message.subject, data = %request, "request received");
        Ok(true)
    }
}

/// A client, pooled by the factory when connecting through an identity.
struct Connection {
    client: Client<NatsTransport>,
    factory: Option<NatsConnectionFactory>,
}

impl Connection {
    async fn open(args: &Args) -> Result<Self, Error> {
        if let (Some(path), Some(identity)) = (&args.identity_file, &args.identity) {
            let factory = NatsConnectionFactory::from_file(path).await?;
            let client = factory.boot_client(identity, false).await?;

            return Ok(Self {
                client,
                factory: Some(factory),
            });
        }

        let client = async_nats::connect(args.url.as_str())
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;

        info!(url = %args.url, "connected");

        Ok(Self {
            client: Client::new(NatsTransport::new(client), ClientOptions::default()),
            factory: None,
        })
    }

    /// Flushes pending publishes before the process exits.
    async fn close(self) -> Result<(), Error> {
        match self.factory {
            Some(factory) => factory.close_client_pool().await,
            None => self.client.close().await?,
        }

        Ok(())
    }
}

async fn listen(
    transport: NatsTransport,
    subject: String,
    queue: String,
    respond: bool,
) -> Result<(), Error> {
    let mut manager = ServiceManager::with_queue_group(transport, queue.clone());
    if respond {
        manager.on_request(subject, ServiceOptions::default(), AlwaysTrue);
    } else {
        manager.on_event(subject, EventOptions::default(), LogEvent { queue });
    }
    manager.start().await?;

    info!("service running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for interrupt");
    }

    info!("shutting down");
    manager.shutdown();
    manager.wait().await;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let connection = Connection::open(&args).await?;

    match args.command {
        Command::Listen {
            subject,
            queue,
            respond,
        } => {
            let transport = connection.client.transport().clone();
            listen(transport, subject, queue, respond).await?;
            connection.close().await
        }
        Command::Emit {
            subject,
            payload,
            no_ack,
            timeout_ms,
        } => {
            let data: Value = serde_json::from_str(&payload)?;

            info!(ack = !no_ack, %data, "emit");
            let delivered = connection
                .client
                .publish(
                    &subject,
                    &data,
                    &PublishOptions {
                        acknowledge: !no_ack,
                        timeout: Some(Duration::from_millis(timeout_ms)),
                        codec: None,
                    },
                )
                .await;
            connection.close().await?;

            if delivered {
                Ok(())
            } else {
                Err(Error::NotAcknowledged(subject))
            }
        }
        Command::Request {
            subject,
            payload,
            timeout_ms,
        } => {
            let data = payload
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()?;

            let reply: Value = connection
                .client
                .request(
                    &subject,
                    data.as_ref(),
                    &RequestOptions {
                        timeout: Duration::from_millis(timeout_ms),
                        ..RequestOptions::default()
                    },
                )
                .await?;
            connection.close().await?;

            println!("{reply}");
            Ok(())
        }
    }
}
