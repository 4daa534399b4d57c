mod error;

pub use error::Error;

use crate::envelope::{
    ack_subject, consumer_register_subject, producer_register_subject, request_options,
};

use std::sync::Arc;

use bytes::Bytes;
use courier_messaging::subject::validate_publishable;
use courier_messaging::subscription_handler::{HandlerFailure, SubscriptionHandler};
use courier_messaging::{Codec, Message, Subscription, Transport};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, trace, warn};

type Result<T, TE> = std::result::Result<T, Error<TE>>;

/// Options for new subscribers.
#[derive(Clone, Copy, Debug)]
pub struct SubscriberOptions {
    /// Announce the queue group to publishers, now and whenever a publisher boots.
    pub auto_register: bool,

    /// Codec used to read request envelopes.
    pub codec: Codec,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            auto_register: true,
            codec: Codec::default(),
        }
    }
}

/// One queue group's presence on one subject.
#[derive(Clone, Debug)]
struct Member<T> {
    transport: T,
    subject: String,
    queue_group: String,
}

impl<T> Member<T>
where
    T: Transport,
{
    async fn announce(&self) -> std::result::Result<(), T::Error> {
        let subject = consumer_register_subject(&self.subject);
        self.transport
            .publish(&subject, Bytes::from(self.queue_group.clone()))
            .await?;

        debug!(subject = %subject, queue_group = %self.queue_group, "register");

        Ok(())
    }

    async fn acknowledge(&self, id: &str) -> std::result::Result<(), T::Error> {
        let subject = ack_subject(&self.subject, id);
        self.transport
            .publish(&subject, Bytes::from(self.queue_group.clone()))
            .await?;

        trace!(subject = %subject, queue_group = %self.queue_group, "acknowledge");

        Ok(())
    }

    async fn acknowledge_or_warn(&self, id: &str) {
        if let Err(e) = self.acknowledge(id).await {
            warn!(subject = %self.subject, id, error = %e, "failed to acknowledge");
        }
    }
}

/// The active consumer. `finished` is cancelled once it unsubscribed.
#[derive(Debug)]
struct Consumption {
    token: CancellationToken,
    finished: CancellationToken,
}

/// Held by the running consumer; dropping it marks the consumer finished.
struct ConsumerGuard {
    token: CancellationToken,
    _finished: DropGuard,
}

#[derive(Debug)]
struct Inner<T> {
    member: Member<T>,
    options: SubscriberOptions,
    shutdown: CancellationToken,
    consumption: Mutex<Option<Consumption>>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// The consumer side of the acknowledgement protocol for one subject and queue group.
///
/// Handles are cheap to clone. Dropping the last handle stops the subscriber.
#[derive(Debug)]
pub struct Subscriber<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Subscriber<T>
where
    T: Transport,
{
    /// Creates a subscriber, announcing its queue group when `auto_register` is set.
    ///
    /// # Errors
    ///
    /// Fails on an empty queue group, an invalid subject or a transport failure while
    /// announcing.
    pub async fn new(
        transport: T,
        subject: impl Into<String>,
        queue_group: impl Into<String>,
        options: SubscriberOptions,
    ) -> Result<Self, T::Error> {
        let subject = subject.into();
        let queue_group = queue_group.into();

        if queue_group.is_empty() {
            return Err(Error::EmptyQueueGroup);
        }
        validate_publishable(&subject)?;

        let subscriber = Self {
            inner: Arc::new(Inner {
                member: Member {
                    transport,
                    subject,
                    queue_group,
                },
                options,
                shutdown: CancellationToken::new(),
                consumption: Mutex::new(None),
            }),
        };

        if options.auto_register {
            subscriber.listen_for_producers().await?;
            subscriber
                .inner
                .member
                .announce()
                .await
                .map_err(Error::Transport)?;
        }

        Ok(subscriber)
    }

    /// The subject consumed.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.inner.member.subject
    }

    /// The queue group this subscriber belongs to.
    #[must_use]
    pub fn queue_group(&self) -> &str {
        &self.inner.member.queue_group
    }

    /// Whether [`Self::stop`] was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    async fn listen_for_producers(&self) -> Result<(), T::Error> {
        let member = self.inner.member.clone();
        let shutdown = self.inner.shutdown.clone();
        let subject = producer_register_subject(&member.subject);

        let mut producers = member
            .transport
            .subscribe(&subject, None)
            .await
            .map_err(Error::Transport)?;

        debug!(subject = %subject, "listen for producer");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    message = producers.next() => {
                        if message.is_none() {
                            break;
                        }
                        if let Err(e) = member.announce().await {
                            warn!(subject = %member.subject, error = %e, "failed to re-announce");
                        }
                    }
                }
            }

            if let Err(e) = producers.unsubscribe().await {
                debug!(error = %e, "failed to unsubscribe producer listener");
            }
        });

        Ok(())
    }

    /// Ends the previous consumer, waiting until it unsubscribed, then subscribes afresh.
    ///
    /// A consumer inside a handler finishes that message first.
    async fn refresh_subscription(&self) -> Result<(T::Subscription, ConsumerGuard), T::Error> {
        let member = &self.inner.member;

        let previous = self.inner.consumption.lock().take();
        if let Some(previous) = previous {
            previous.token.cancel();
            previous.finished.cancelled().await;
        }

        let subscription = member
            .transport
            .subscribe(&member.subject, Some(&member.queue_group))
            .await
            .map_err(Error::Transport)?;

        let token = self.inner.shutdown.child_token();
        let finished = CancellationToken::new();
        *self.inner.consumption.lock() = Some(Consumption {
            token: token.clone(),
            finished: finished.clone(),
        });

        debug!(subject = %member.subject, queue_group = %member.queue_group, "refresh subscription");

        Ok((
            subscription,
            ConsumerGuard {
                token,
                _finished: finished.drop_guard(),
            },
        ))
    }

    /// Consumes the subject as a stream.
    ///
    /// A message that asks for acknowledgement is acknowledged when the stream is polled
    /// again, after the caller processed it. Undecodable messages are logged and skipped.
    /// The stream ends on [`Self::stop`] or on the next call to `subscribe`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if subscribing fails.
    pub async fn subscribe(&self) -> Result<BoxStream<'static, Message>, T::Error> {
        debug!(subject = %self.subject(), "subscribe normal mode");

        let (mut subscription, consumer) = self.refresh_subscription().await?;
        let (sender, receiver) = mpsc::channel::<(Message, Option<String>)>(1);
        let codec = self.inner.options.codec;
        let subject = self.subject().to_string();

        tokio::spawn(async move {
            let token = &consumer.token;

            loop {
                let message = tokio::select! {
                    () = token.cancelled() => break,
                    () = sender.closed() => break,
                    message = subscription.next() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };

                match request_options(codec, &message.payload) {
                    Ok(options) => {
                        if let Some(options) = &options {
                            trace!(id = %options.id, timeout = options.timeout, "new message");
                        } else {
                            trace!("new message");
                        }

                        let id = options.map(|options| options.id);
                        tokio::select! {
                            () = token.cancelled() => break,
                            sent = sender.send((message, id)) => if sent.is_err() {
                                break;
                            },
                        }
                    }
                    Err(e) => error!(subject = %subject, error = %e, "error in subscribe loop"),
                }
            }

            if let Err(e) = subscription.unsubscribe().await {
                debug!(error = %e, "failed to unsubscribe");
            }
        });

        let member = self.inner.member.clone();
        let pending: Option<String> = None;

        Ok(stream::unfold(
            (receiver, pending, member),
            |(mut receiver, pending, member)| async move {
                if let Some(id) = pending {
                    member.acknowledge_or_warn(&id).await;
                }

                let (message, id) = receiver.recv().await?;
                Some((message, (receiver, id, member)))
            },
        )
        .boxed())
    }

    /// Consumes the subject, driving `handler` for every message until stopped.
    ///
    /// A message is acknowledged only after the handler succeeded. Decode and handler
    /// failures go to the handler's `on_error` and consumption continues.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if subscribing fails.
    pub async fn subscribe_wait<H>(&self, handler: H) -> Result<(), T::Error>
    where
        H: SubscriptionHandler,
    {
        debug!(subject = %self.subject(), "subscribe wait mode");

        let (subscription, consumer) = self.refresh_subscription().await?;
        self.drive(subscription, consumer, handler).await
    }

    /// Like [`Self::subscribe_wait`] on a spawned task.
    ///
    /// The subscription is open when this returns. The task holds a handle, so the
    /// subscriber keeps running until [`Self::stop`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if subscribing fails.
    pub async fn spawn_wait<H>(
        &self,
        handler: H,
    ) -> Result<JoinHandle<Result<(), T::Error>>, T::Error>
    where
        H: SubscriptionHandler,
    {
        debug!(subject = %self.subject(), "subscribe wait mode");

        let (subscription, consumer) = self.refresh_subscription().await?;
        let subscriber = self.clone();

        Ok(tokio::spawn(async move {
            subscriber.drive(subscription, consumer, handler).await
        }))
    }

    async fn drive<H>(
        &self,
        mut subscription: T::Subscription,
        consumer: ConsumerGuard,
        handler: H,
    ) -> Result<(), T::Error>
    where
        H: SubscriptionHandler,
    {
        let token = &consumer.token;
        let member = &self.inner.member;
        let codec = self.inner.options.codec;

        loop {
            let message = tokio::select! {
                () = token.cancelled() => break,
                message = subscription.next() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            match request_options(codec, &message.payload) {
                Ok(options) => {
                    if let Some(options) = &options {
                        trace!(id = %options.id, timeout = options.timeout, "new message wait mode");
                    } else {
                        trace!("new message");
                    }

                    match handler.handle(message.clone()).await {
                        Ok(()) => {
                            if let Some(options) = options {
                                member.acknowledge_or_warn(&options.id).await;
                            }
                        }
                        Err(e) => {
                            error!(subject = %member.subject, error = %e, "error in subscribe wait loop");
                            handler.on_error(HandlerFailure::Handler(e), message).await;
                        }
                    }
                }
                Err(e) => {
                    error!(subject = %member.subject, error = %e, "error in subscribe wait loop");
                    handler.on_error(HandlerFailure::Decode(e), message).await;
                }
            }
        }

        subscription.unsubscribe().await.map_err(Error::Transport)
    }

    /// A raw subscription in this subscriber's queue group, for callers that acknowledge
    /// with [`Self::manual_acknowledge`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if subscribing fails.
    pub async fn manual_subscription(&self) -> Result<T::Subscription, T::Error> {
        let member = &self.inner.member;

        member
            .transport
            .subscribe(&member.subject, Some(&member.queue_group))
            .await
            .map_err(Error::Transport)
    }

    /// Acknowledges a message if it asks for it.
    ///
    /// Returns whether an acknowledgement was sent. Undecodable messages are not
    /// acknowledged.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if publishing the acknowledgement fails.
    pub async fn manual_acknowledge(
        &self,
        message: &Message,
        codec: Option<Codec>,
    ) -> Result<bool, T::Error> {
        let codec = codec.unwrap_or(self.inner.options.codec);

        match request_options(codec, &message.payload) {
            Ok(Some(options)) => {
                self.acknowledge(&options.id).await?;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                debug!(msg = %message.string(), error = %e, "message is not decodable");
                Ok(false)
            }
        }
    }

    /// Publishes an acknowledgement for a correlation id.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if publishing fails.
    pub async fn acknowledge(&self, id: &str) -> Result<(), T::Error> {
        self.inner
            .member
            .acknowledge(id)
            .await
            .map_err(Error::Transport)
    }

    /// Stops listening for producers and ends the active consumer. Idempotent.
    pub fn stop(&self) {
        if !self.inner.shutdown.is_cancelled() {
            self.inner.shutdown.cancel();
            debug!(subject = %self.subject(), queue_group = %self.queue_group(), "stopped");
        }
    }
}
