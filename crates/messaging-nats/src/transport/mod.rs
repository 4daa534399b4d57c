mod error;

pub use error::Error;

use crate::subscription::NatsSubscription;

use std::time::Duration;

use async_nats::Client;
use async_nats::client::RequestErrorKind;
use async_nats::connection::State;
use async_trait::async_trait;
use bytes::Bytes;
use courier_messaging::subject::{validate_pattern, validate_publishable};
use courier_messaging::{Message, Transport};
use tracing::trace;

/// A [`Transport`] backed by an `async-nats` client.
#[derive(Clone, Debug)]
pub struct NatsTransport {
    client: Client,
}

impl NatsTransport {
    /// Wraps a connected client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

impl From<Client> for NatsTransport {
    fn from(client: Client) -> Self {
        Self::new(client)
    }
}

/// Converts a NATS message into a transport-agnostic one.
pub(crate) fn convert_message(message: async_nats::Message) -> Message {
    let headers = message.headers.map(|headers| {
        headers
            .iter()
            .filter_map(|(name, values)| {
                values
                    .first()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect()
    });

    Message {
        subject: message.subject.to_string(),
        reply: message.reply.map(|reply| reply.to_string()),
        payload: message.payload,
        headers,
    }
}

#[async_trait]
impl Transport for NatsTransport {
    type Error = Error;
    type Subscription = NatsSubscription;

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), Self::Error> {
        validate_publishable(subject)?;

        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| Error::Publish(e.kind()))
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<Self::Subscription, Self::Error> {
        validate_pattern(subject)?;

        let subscriber = match queue_group {
            Some(group) => {
                self.client
                    .queue_subscribe(subject.to_string(), group.to_string())
                    .await
            }
            None => self.client.subscribe(subject.to_string()).await,
        }
        .map_err(|e| Error::Subscribe(e.to_string()))?;

        trace!(subject, ?queue_group, "subscribed");

        Ok(NatsSubscription::new(subject.to_string(), subscriber))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Message, Self::Error> {
        validate_publishable(subject)?;

        let response =
            tokio::time::timeout(timeout, self.client.request(subject.to_string(), payload))
                .await
                .map_err(|_| Error::Timeout(subject.to_string()))?;

        match response {
            Ok(message) => Ok(convert_message(message)),
            Err(e) => match e.kind() {
                RequestErrorKind::NoResponders => Err(Error::NoResponders(subject.to_string())),
                RequestErrorKind::TimedOut => Err(Error::Timeout(subject.to_string())),
                kind => Err(Error::Request(kind)),
            },
        }
    }

    async fn respond(&self, message: &Message, payload: Bytes) -> Result<(), Self::Error> {
        let reply = message
            .reply
            .as_deref()
            .ok_or_else(|| Error::NoReplySubject(message.subject.clone()))?;

        self.client
            .publish(reply.to_string(), payload)
            .await
            .map_err(|e| Error::Publish(e.kind()))
    }

    async fn flush(&self) -> Result<(), Self::Error> {
        self.client
            .flush()
            .await
            .map_err(|e| Error::Flush(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.client.connection_state() == State::Connected
    }
}
