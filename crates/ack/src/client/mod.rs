mod error;

pub use error::Error;

use crate::envelope::{DEFAULT_QUEUE_GROUP, RequestEnvelope};
use crate::publisher::{Publisher, PublisherOptions};
use crate::service::ServiceErrorReply;
use crate::subscriber::{Subscriber, SubscriberOptions};

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use courier_messaging::subscription_handler::SubscriptionHandler;
use courier_messaging::{Codec, Message, Transport};
use futures::Stream;
use futures::stream::BoxStream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Options for new clients.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Queue group of subscribers that name none.
    pub default_queue_group: String,

    /// Options for publishers the client creates.
    pub publisher: PublisherOptions,

    /// Options for subscribers the client creates.
    pub subscriber: SubscriberOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            default_queue_group: DEFAULT_QUEUE_GROUP.to_string(),
            publisher: PublisherOptions::default(),
            subscriber: SubscriberOptions::default(),
        }
    }
}

/// Options for [`Client::publish`].
#[derive(Clone, Copy, Debug)]
pub struct PublishOptions {
    /// Wait for every known consumer group to acknowledge.
    pub acknowledge: bool,

    /// Acknowledgement timeout per attempt, the publisher default when `None`.
    pub timeout: Option<Duration>,

    /// Codec, the client default when `None`.
    pub codec: Option<Codec>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            acknowledge: true,
            timeout: None,
            codec: None,
        }
    }
}

/// Options for [`Client::subscribe`].
#[derive(Clone, Debug, Default)]
pub struct SubscribeOptions {
    /// Queue group, the client default when `None`.
    pub queue_group: Option<String>,
}

/// Options for [`Client::request`].
#[derive(Clone, Copy, Debug)]
pub struct RequestOptions {
    /// How long to wait for the reply.
    pub timeout: Duration,

    /// Codec of request and reply.
    pub codec: Codec,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            codec: Codec::default(),
        }
    }
}

#[derive(Serialize)]
struct EmptyRequest {}

/// A stream of messages from a [`Client::subscribe`] call.
pub struct ClientSubscription<T> {
    subscriber: Subscriber<T>,
    messages: BoxStream<'static, Message>,
}

impl<T> ClientSubscription<T>
where
    T: Transport,
{
    /// The subscriber behind the stream.
    #[must_use]
    pub const fn subscriber(&self) -> &Subscriber<T> {
        &self.subscriber
    }

    /// Ends the stream and the subscriber's announcements.
    pub fn stop(&self) {
        self.subscriber.stop();
    }
}

impl<T> Stream for ClientSubscription<T> {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.messages.as_mut().poll_next(cx)
    }
}

/// Publish, subscribe and request on one connection.
///
/// Publishers are created on the first acknowledged publish to a subject and reused
/// afterwards. Clones share them.
#[derive(Debug)]
pub struct Client<T> {
    transport: T,
    options: ClientOptions,
    publishers: Arc<Mutex<HashMap<String, Publisher<T>>>>,
}

impl<T> Clone for Client<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            options: self.options.clone(),
            publishers: self.publishers.clone(),
        }
    }
}

impl<T> Client<T>
where
    T: Transport,
{
    /// Creates a client over a connection.
    #[must_use]
    pub fn new(transport: T, options: ClientOptions) -> Self {
        Self {
            transport,
            options,
            publishers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The connection.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether the connection is usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// The publisher for a subject, created on first use.
    ///
    /// # Errors
    ///
    /// Returns `Error::Publisher` if the publisher cannot be created.
    pub async fn publisher(&self, subject: &str) -> Result<Publisher<T>, Error<T::Error>> {
        let mut publishers = self.publishers.lock().await;

        if let Some(publisher) = publishers.get(subject) {
            return Ok(publisher.clone());
        }

        let publisher = Publisher::new(self.transport.clone(), subject, self.options.publisher)
            .await
            .map_err(Error::Publisher)?;
        publishers.insert(subject.to_string(), publisher.clone());

        debug!(subject, "publisher created");

        Ok(publisher)
    }

    /// Subjects with a publisher.
    pub async fn publisher_subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.publishers.lock().await.keys().cloned().collect();
        subjects.sort();
        subjects
    }

    /// Publishes a payload.
    ///
    /// With `acknowledge` set, returns whether every known consumer group acknowledged.
    /// Otherwise returns whether the payload was handed to the connection.
    pub async fn publish<P>(&self, subject: &str, payload: &P, options: &PublishOptions) -> bool
    where
        P: Serialize + Sync + ?Sized,
    {
        if !options.acknowledge {
            let codec = options.codec.unwrap_or(self.options.publisher.codec);
            let result = match RequestEnvelope::new(payload).encode(codec) {
                Ok(bytes) => self
                    .transport
                    .publish(subject, bytes)
                    .await
                    .map_err(Error::Transport),
                Err(e) => Err(Error::Codec(e)),
            };

            return match result {
                Ok(()) => true,
                Err(e) => {
                    error!(subject, error = %e, "publish failed");
                    false
                }
            };
        }

        match self.publisher(subject).await {
            Ok(publisher) => {
                publisher
                    .request(payload, options.timeout, options.codec)
                    .await
            }
            Err(e) => {
                error!(subject, error = %e, "publish failed");
                false
            }
        }
    }

    async fn subscriber(
        &self,
        subject: &str,
        options: &SubscribeOptions,
    ) -> Result<Subscriber<T>, Error<T::Error>> {
        let queue_group = options
            .queue_group
            .clone()
            .unwrap_or_else(|| self.options.default_queue_group.clone());

        Subscriber::new(
            self.transport.clone(),
            subject,
            queue_group,
            self.options.subscriber,
        )
        .await
        .map_err(Error::Subscriber)
    }

    /// Subscribes in a queue group and returns the message stream.
    ///
    /// # Errors
    ///
    /// Returns `Error::Subscriber` if the subscriber cannot be created.
    pub async fn subscribe(
        &self,
        subject: &str,
        options: &SubscribeOptions,
    ) -> Result<ClientSubscription<T>, Error<T::Error>> {
        let subscriber = self.subscriber(subject, options).await?;
        let messages = subscriber.subscribe().await.map_err(Error::Subscriber)?;

        Ok(ClientSubscription {
            subscriber,
            messages,
        })
    }

    /// Subscribes in a queue group and drives `handler` for every message on a spawned
    /// task until the returned subscriber is stopped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Subscriber` if the subscriber cannot be created.
    pub async fn subscribe_with<H>(
        &self,
        subject: &str,
        options: &SubscribeOptions,
        handler: H,
    ) -> Result<Subscriber<T>, Error<T::Error>>
    where
        H: SubscriptionHandler,
    {
        let subscriber = self.subscriber(subject, options).await?;
        subscriber
            .spawn_wait(handler)
            .await
            .map_err(Error::Subscriber)?;

        Ok(subscriber)
    }

    /// Sends a request to a single responder and decodes its reply.
    ///
    /// Bypasses acknowledgements entirely. Without a payload an empty object is sent.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the request fails or times out, `Error::Service` if
    /// the responder reported a failure and `Error::Codec` if the reply does not decode.
    pub async fn request<Req, Resp>(
        &self,
        subject: &str,
        payload: Option<&Req>,
        options: &RequestOptions,
    ) -> Result<Resp, Error<T::Error>>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        let bytes = match payload {
            Some(payload) => options.codec.encode(payload)?,
            None => options.codec.encode(&EmptyRequest {})?,
        };

        let reply = self
            .transport
            .request(subject, bytes, options.timeout)
            .await
            .map_err(Error::Transport)?;

        if let Ok(failure) = options.codec.decode::<ServiceErrorReply>(&reply.payload) {
            if failure.is_service_error() {
                return Err(Error::Service(failure.error));
            }
        }

        Ok(options.codec.decode(&reply.payload)?)
    }

    /// Stops every publisher, forgets them and flushes the connection, so that
    /// unacknowledged publishes are written before the caller exits.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the connection cannot be flushed.
    pub async fn close(&self) -> Result<(), Error<T::Error>> {
        let publishers: Vec<Publisher<T>> = self
            .publishers
            .lock()
            .await
            .drain()
            .map(|(_, publisher)| publisher)
            .collect();

        for publisher in &publishers {
            publisher.stop();
        }

        self.transport.flush().await.map_err(Error::Transport)?;

        info!(publishers = publishers.len(), "client closed");

        Ok(())
    }
}
