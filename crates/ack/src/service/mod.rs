mod error;

pub use error::Error;

use crate::envelope::{DEFAULT_QUEUE_GROUP, decode_payload, request_options};
use crate::subscriber::{self, Subscriber, SubscriberOptions};

use async_trait::async_trait;
use courier_messaging::service_handler::ServiceHandler;
use courier_messaging::subscription_handler::{
    Acknowledgement, HandlerFailure, SubscriptionHandler,
};
use courier_messaging::{Codec, Message, Transport};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

/// Body of the reply to a request whose handler failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceErrorReply {
    /// Always `NatsError`.
    pub message: String,

    /// The handler's error.
    pub error: String,
}

impl ServiceErrorReply {
    const MESSAGE: &'static str = "NatsError";

    /// Wraps an error description.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            message: Self::MESSAGE.to_string(),
            error: error.into(),
        }
    }

    /// Whether the body is a service error rather than a reply that happens to decode.
    #[must_use]
    pub fn is_service_error(&self) -> bool {
        self.message == Self::MESSAGE
    }
}

/// Options for [`ServiceManager::on_event`].
#[derive(Clone, Debug)]
pub struct EventOptions {
    /// Queue group, the manager default when `None`.
    pub queue_group: Option<String>,

    /// Acknowledge after the handler succeeded. Otherwise the handler is driven through
    /// `handle_with_ack` and decides itself.
    pub auto_acknowledge: bool,

    /// Codec, the manager default when `None`.
    pub codec: Option<Codec>,
}

impl Default for EventOptions {
    fn default() -> Self {
        Self {
            queue_group: None,
            auto_acknowledge: true,
            codec: None,
        }
    }
}

/// Options for [`ServiceManager::on_request`].
#[derive(Clone, Debug, Default)]
pub struct ServiceOptions {
    /// Queue group, the manager default when `None`.
    pub queue_group: Option<String>,

    /// Codec, the manager default when `None`.
    pub codec: Option<Codec>,
}

struct StartContext<T> {
    transport: T,
    queue_group: String,
    codec: Codec,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

#[async_trait]
trait Registration<T>: Send + Sync
where
    T: Transport,
{
    fn subject(&self) -> &str;

    async fn start(
        self: Box<Self>,
        context: StartContext<T>,
    ) -> Result<Subscriber<T>, subscriber::Error<T::Error>>;
}

struct EventRegistration<H> {
    subject: String,
    options: EventOptions,
    handler: H,
}

#[async_trait]
impl<T, H> Registration<T> for EventRegistration<H>
where
    T: Transport,
    H: SubscriptionHandler,
{
    fn subject(&self) -> &str {
        &self.subject
    }

    async fn start(
        self: Box<Self>,
        context: StartContext<T>,
    ) -> Result<Subscriber<T>, subscriber::Error<T::Error>> {
        let Self {
            subject,
            options,
            handler,
        } = *self;
        let codec = options.codec.unwrap_or(context.codec);
        let queue_group = options.queue_group.unwrap_or(context.queue_group);

        let subscriber = Subscriber::new(
            context.transport,
            subject,
            queue_group,
            SubscriberOptions {
                auto_register: true,
                codec,
            },
        )
        .await?;
        let mut subscription = subscriber.manual_subscription().await?;

        let shutdown = context.shutdown;
        let auto_acknowledge = options.auto_acknowledge;
        let handle = subscriber.clone();
        context.tracker.spawn(async move {
            loop {
                let message = tokio::select! {
                    () = shutdown.cancelled() => break,
                    message = subscription.next() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };

                if let Err(e) = request_options(codec, &message.payload) {
                    error!(subject = %message.subject, error = %e, "event is not decodable");
                    handler.on_error(HandlerFailure::Decode(e), message).await;
                    continue;
                }

                let handled = if auto_acknowledge {
                    handler.handle(message.clone()).await
                } else {
                    let subscriber = handle.clone();
                    let acknowledged = message.clone();
                    let ack = Acknowledgement::new(move || async move {
                        subscriber
                            .manual_acknowledge(&acknowledged, Some(codec))
                            .await
                            .unwrap_or_else(|e| {
                                warn!(subject = %acknowledged.subject, error = %e, "failed to acknowledge");
                                false
                            })
                    });
                    handler.handle_with_ack(message.clone(), ack).await
                };

                match handled {
                    Ok(()) => {
                        if auto_acknowledge {
                            if let Err(e) = handle.manual_acknowledge(&message, Some(codec)).await {
                                warn!(subject = %message.subject, error = %e, "failed to acknowledge");
                            }
                        }
                    }
                    Err(e) => {
                        error!(subject = %message.subject, error = %e, "event handler failed");
                        handler.on_error(HandlerFailure::Handler(e), message).await;
                    }
                }
            }

            handle.stop();
        });

        Ok(subscriber)
    }
}

struct RequestRegistration<H> {
    subject: String,
    options: ServiceOptions,
    handler: H,
}

async fn reply<T, H>(transport: &T, handler: &H, codec: Codec, message: &Message)
where
    T: Transport,
    H: ServiceHandler,
{
    let body = match decode_payload::<H::Request>(codec, &message.payload) {
        Ok(request) => match handler.handle(request, message).await {
            Ok(response) => codec.encode(&response),
            Err(e) => {
                error!(subject = %message.subject, error = %e, "request handler failed");
                codec.encode(&ServiceErrorReply::new(e.to_string()))
            }
        },
        Err(e) => {
            error!(subject = %message.subject, error = %e, "request is not decodable");
            codec.encode(&ServiceErrorReply::new(e.to_string()))
        }
    };

    let body = match body {
        Ok(body) => body,
        Err(e) => {
            error!(subject = %message.subject, error = %e, "failed to encode reply");
            return;
        }
    };

    if message.reply.is_none() {
        trace!(subject = %message.subject, "request without reply subject");
        return;
    }

    if let Err(e) = transport.respond(message, body).await {
        warn!(subject = %message.subject, error = %e, "failed to reply");
    }
}

#[async_trait]
impl<T, H> Registration<T> for RequestRegistration<H>
where
    T: Transport,
    H: ServiceHandler,
{
    fn subject(&self) -> &str {
        &self.subject
    }

    async fn start(
        self: Box<Self>,
        context: StartContext<T>,
    ) -> Result<Subscriber<T>, subscriber::Error<T::Error>> {
        let Self {
            subject,
            options,
            handler,
        } = *self;
        let codec = options.codec.unwrap_or(context.codec);
        let queue_group = options.queue_group.unwrap_or(context.queue_group);
        let transport = context.transport;

        let subscriber = Subscriber::new(
            transport.clone(),
            subject,
            queue_group,
            SubscriberOptions {
                auto_register: true,
                codec,
            },
        )
        .await?;
        let mut subscription = subscriber.manual_subscription().await?;

        let shutdown = context.shutdown;
        let handle = subscriber.clone();
        context.tracker.spawn(async move {
            loop {
                let message = tokio::select! {
                    () = shutdown.cancelled() => break,
                    message = subscription.next() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };

                reply(&transport, &handler, codec, &message).await;

                if let Err(e) = handle.manual_acknowledge(&message, Some(codec)).await {
                    warn!(subject = %message.subject, error = %e, "failed to acknowledge");
                }
            }

            handle.stop();
        });

        Ok(subscriber)
    }
}

/// Binds handlers to subjects from an explicit table built at startup.
///
/// Every registration gets its own subscriber, so quorum publishers count it.
pub struct ServiceManager<T>
where
    T: Transport,
{
    transport: T,
    queue_group: String,
    codec: Codec,
    registrations: Vec<Box<dyn Registration<T>>>,
    subscribers: Mutex<Vec<Subscriber<T>>>,
    token: CancellationToken,
    tracker: TaskTracker,
    started: bool,
}

impl<T> ServiceManager<T>
where
    T: Transport,
{
    /// Creates a manager whose registrations default to the `general` queue group.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::with_queue_group(transport, DEFAULT_QUEUE_GROUP)
    }

    /// Creates a manager with a default queue group.
    #[must_use]
    pub fn with_queue_group(transport: T, queue_group: impl Into<String>) -> Self {
        Self {
            transport,
            queue_group: queue_group.into(),
            codec: Codec::default(),
            registrations: Vec::new(),
            subscribers: Mutex::new(Vec::new()),
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: false,
        }
    }

    /// Sets the default codec.
    #[must_use]
    pub const fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Registers an event handler.
    pub fn on_event<H>(
        &mut self,
        subject: impl Into<String>,
        options: EventOptions,
        handler: H,
    ) -> &mut Self
    where
        H: SubscriptionHandler,
    {
        self.registrations.push(Box::new(EventRegistration {
            subject: subject.into(),
            options,
            handler,
        }));
        self
    }

    /// Registers a request handler.
    pub fn on_request<H>(
        &mut self,
        subject: impl Into<String>,
        options: ServiceOptions,
        handler: H,
    ) -> &mut Self
    where
        H: ServiceHandler,
    {
        self.registrations.push(Box::new(RequestRegistration {
            subject: subject.into(),
            options,
            handler,
        }));
        self
    }

    /// Subscribes every registration.
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyStarted` on a second call and `Error::Registration` if a
    /// registration cannot subscribe; registrations started before it are shut down.
    pub async fn start(&mut self) -> Result<(), Error<T::Error>> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        self.started = true;

        for registration in std::mem::take(&mut self.registrations) {
            let subject = registration.subject().to_string();
            let context = StartContext {
                transport: self.transport.clone(),
                queue_group: self.queue_group.clone(),
                codec: self.codec,
                shutdown: self.token.child_token(),
                tracker: self.tracker.clone(),
            };

            match registration.start(context).await {
                Ok(subscriber) => {
                    debug!(subject = %subject, queue_group = %subscriber.queue_group(), "registered");
                    self.subscribers.lock().push(subscriber);
                }
                Err(source) => {
                    self.shutdown();
                    return Err(Error::Registration { subject, source });
                }
            }
        }

        self.tracker.close();
        info!(
            registrations = self.subscribers.lock().len(),
            "service manager started"
        );

        Ok(())
    }

    /// Stops every registration. Idempotent.
    pub fn shutdown(&self) {
        if self.token.is_cancelled() {
            return;
        }

        self.token.cancel();
        self.tracker.close();
        for subscriber in self.subscribers.lock().iter() {
            subscriber.stop();
        }

        info!("service manager shut down");
    }

    /// Waits until every registration stopped. Returns immediately if never started.
    pub async fn wait(&self) {
        if !self.started {
            return;
        }
        self.tracker.wait().await;
    }
}
