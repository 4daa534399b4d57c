mod error;

pub use error::{AttemptError, Error};

use crate::envelope::{
    AckRequest, DEFAULT_ACK_TIMEOUT, RequestEnvelope, ack_subject, consumer_register_subject,
    producer_register_subject,
};
use crate::retry::{RetryConfig, RetryRunner};

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use courier_messaging::subject::validate_publishable;
use courier_messaging::{Codec, Subscription, Transport};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

/// How many consumer groups must acknowledge a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SubscriberCount {
    /// Every group that announced itself on the subject.
    #[default]
    Auto,

    /// A fixed number of groups, without discovery.
    Fixed(usize),
}

/// Options for new publishers.
#[derive(Clone, Copy, Debug)]
pub struct PublisherOptions {
    /// How the expected number of acknowledgements is determined.
    pub subscriber_count: SubscriberCount,

    /// Default codec for payloads.
    pub codec: Codec,

    /// Default time to wait for acknowledgements per attempt.
    pub ack_timeout: Duration,

    /// Time consumers get to answer the producer announcement before the publisher
    /// considers itself registered.
    pub registration_grace: Duration,

    /// Poll interval while waiting for registration.
    pub consumer_poll_interval: Duration,

    /// Retries of an unacknowledged message.
    pub retry: RetryConfig,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            subscriber_count: SubscriberCount::Auto,
            codec: Codec::default(),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            registration_grace: Duration::from_millis(50),
            consumer_poll_interval: Duration::from_millis(60),
            retry: RetryConfig {
                max_attempts: 3,
                ..RetryConfig::default()
            },
        }
    }
}

#[derive(Debug)]
struct Inner<T> {
    transport: T,
    subject: String,
    options: PublisherOptions,
    consumers: Arc<Mutex<BTreeSet<String>>>,
    registered: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// The producer side of the acknowledgement protocol for one subject.
///
/// Handles are cheap to clone. Dropping the last handle stops discovery.
#[derive(Debug)]
pub struct Publisher<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Publisher<T>
where
    T: Transport,
{
    /// Creates a publisher. In `Auto` mode it starts discovering consumer groups.
    ///
    /// # Errors
    ///
    /// Fails on an invalid subject or if the discovery subscription cannot be opened.
    pub async fn new(
        transport: T,
        subject: impl Into<String>,
        options: PublisherOptions,
    ) -> Result<Self, Error<T::Error>> {
        let subject = subject.into();
        validate_publishable(&subject)?;

        let publisher = Self {
            inner: Arc::new(Inner {
                transport,
                subject,
                options,
                consumers: Arc::new(Mutex::new(BTreeSet::new())),
                registered: Arc::new(AtomicBool::new(false)),
                shutdown: CancellationToken::new(),
            }),
        };

        match options.subscriber_count {
            SubscriberCount::Auto => publisher.subscribe_for_consumers().await?,
            SubscriberCount::Fixed(_) => publisher.inner.registered.store(true, Ordering::SeqCst),
        }

        Ok(publisher)
    }

    /// The subject published to.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.inner.subject
    }

    /// Number of acknowledgements a message currently needs.
    #[must_use]
    pub fn expected_count(&self) -> usize {
        match self.inner.options.subscriber_count {
            SubscriberCount::Auto => self.inner.consumers.lock().len(),
            SubscriberCount::Fixed(count) => count,
        }
    }

    /// Queue groups discovered so far.
    #[must_use]
    pub fn known_consumers(&self) -> Vec<String> {
        self.inner.consumers.lock().iter().cloned().collect()
    }

    /// Whether the registration grace period has passed.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.inner.registered.load(Ordering::SeqCst)
    }

    async fn subscribe_for_consumers(&self) -> Result<(), Error<T::Error>> {
        let inner = &self.inner;
        let subject = consumer_register_subject(&inner.subject);

        let mut announcements = inner
            .transport
            .subscribe(&subject, None)
            .await
            .map_err(Error::Transport)?;

        debug!(subject = %subject, "subscribed for consumer");

        let consumers = inner.consumers.clone();
        let shutdown = inner.shutdown.clone();
        let publisher_subject = inner.subject.clone();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    () = shutdown.cancelled() => break,
                    message = announcements.next() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };

                let consumer = message.string();
                let mut known = consumers.lock();
                if known.insert(consumer.clone()) {
                    debug!(consumer = %consumer, subscriber_count = known.len(), subject = %publisher_subject, "new consumer");
                } else {
                    trace!(consumer = %consumer, subscriber_count = known.len(), subject = %publisher_subject, "consumer already registered");
                }
            }

            if let Err(e) = announcements.unsubscribe().await {
                debug!(error = %e, "failed to unsubscribe consumer listener");
            }
        });

        let transport = inner.transport.clone();
        let registered = inner.registered.clone();
        let shutdown = inner.shutdown.clone();
        let grace = inner.options.registration_grace;
        let subject = producer_register_subject(&inner.subject);
        tokio::spawn(async move {
            if let Err(e) = transport.publish(&subject, Bytes::new()).await {
                warn!(subject = %subject, error = %e, "failed to announce producer");
            }

            tokio::select! {
                () = shutdown.cancelled() => {},
                () = tokio::time::sleep(grace) => {
                    registered.store(true, Ordering::SeqCst);
                    debug!(subject = %subject, "register");
                }
            }
        });

        Ok(())
    }

    /// Waits until a consumer is known or registration completed.
    ///
    /// Returns `false` when registration completed without any consumer.
    pub async fn wait_for_consumers(&self) -> bool {
        loop {
            trace!("check for register to been called");

            if self.expected_count() > 0 {
                return true;
            }
            if self.is_registered() {
                error!(subject = %self.inner.subject, "there is no consumer");
                return false;
            }

            tokio::time::sleep(self.inner.options.consumer_poll_interval).await;
        }
    }

    /// Delivers a payload and waits until every known consumer group acknowledged it.
    ///
    /// Returns `false` once every attempt failed. With no known consumer the payload
    /// is published without acknowledgement and `true` is returned.
    #[instrument(skip(self, payload), fields(subject = %self.inner.subject))]
    pub async fn request<P>(
        &self,
        payload: &P,
        timeout: Option<Duration>,
        codec: Option<Codec>,
    ) -> bool
    where
        P: Serialize + Sync + ?Sized,
    {
        trace!("message publish start");

        match self.request_detailed(payload, timeout, codec).await {
            Ok(()) => {
                trace!("message published successfully");
                true
            }
            Err(e) => {
                error!(error = %e, "publish failed");
                false
            }
        }
    }

    /// Like [`Self::request`], returning the failure with every attempt's error.
    ///
    /// # Errors
    ///
    /// Returns `Error::Retry` once every attempt failed and `Error::Codec` or
    /// `Error::Transport` if the unacknowledged fallback publish fails.
    pub async fn request_detailed<P>(
        &self,
        payload: &P,
        timeout: Option<Duration>,
        codec: Option<Codec>,
    ) -> Result<(), Error<T::Error>>
    where
        P: Serialize + Sync + ?Sized,
    {
        let timeout = timeout.unwrap_or(self.inner.options.ack_timeout);
        let codec = codec.unwrap_or(self.inner.options.codec);

        if !self.wait_for_consumers().await {
            return self.publish(payload, Some(codec)).await;
        }

        let runner = RetryRunner::new(
            move || self.attempt(payload, timeout, codec),
            self.inner.options.retry,
        );

        runner.run().await.map_err(Error::Retry)
    }

    async fn attempt<P>(
        &self,
        payload: &P,
        timeout: Duration,
        codec: Codec,
    ) -> Result<(), AttemptError<T::Error>>
    where
        P: Serialize + Sync + ?Sized,
    {
        let inner = &self.inner;
        let expected = self.expected_count();
        let request = AckRequest::new(timeout);
        let id = request.id.clone();
        let subject = ack_subject(&inner.subject, &id);
        let bytes = RequestEnvelope::new(payload)
            .with_ack(request)
            .encode(codec)?;

        let mut acknowledgements = inner
            .transport
            .subscribe(&subject, None)
            .await
            .map_err(AttemptError::Transport)?;

        trace!(subject = %subject, id = %id, "wait for acknowledgement");

        if let Err(e) = inner.transport.publish(&inner.subject, bytes).await {
            let _ = acknowledgements.unsubscribe().await;
            return Err(AttemptError::Transport(e));
        }

        debug!(id = %id, "message published");

        let mut acknowledged = HashSet::new();
        let collected = tokio::time::timeout(timeout, async {
            while acknowledged.len() < expected {
                match acknowledgements.next().await {
                    Some(message) => {
                        acknowledged.insert(message.string());
                    }
                    None => break,
                }
            }
        })
        .await;

        if collected.is_err() {
            trace!(id = %id, "acknowledgement timeout");
        }

        if let Err(e) = acknowledgements.unsubscribe().await {
            debug!(error = %e, "failed to unsubscribe acknowledgements");
        }

        if acknowledged.len() >= expected {
            return Ok(());
        }

        let missing: Vec<String> = inner
            .consumers
            .lock()
            .iter()
            .filter(|consumer| !acknowledged.contains(*consumer))
            .cloned()
            .collect();

        error!(id = %id, left_consumers = ?missing, "acknowledgement not fulfilled");

        Err(AttemptError::InsufficientAcknowledgements {
            expected,
            acknowledged: acknowledged.len(),
            missing,
        })
    }

    /// Publishes a payload without asking for acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns `Error::Codec` if the payload cannot be encoded and `Error::Transport` if
    /// publishing fails.
    pub async fn publish<P>(&self, payload: &P, codec: Option<Codec>) -> Result<(), Error<T::Error>>
    where
        P: Serialize + Sync + ?Sized,
    {
        let codec = codec.unwrap_or(self.inner.options.codec);
        let bytes = RequestEnvelope::new(payload).encode(codec)?;

        self.inner
            .transport
            .publish(&self.inner.subject, bytes)
            .await
            .map_err(Error::Transport)
    }

    /// Stops discovery. Idempotent.
    pub fn stop(&self) {
        if !self.inner.shutdown.is_cancelled() {
            self.inner.shutdown.cancel();
            debug!(subject = %self.inner.subject, "stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use courier_messaging_memory::MemoryBroker;
    use tracing_test::traced_test;

    #[tokio::test(start_paused = true)]
    async fn test_discovers_consumers_from_announcements() {
        let broker = MemoryBroker::new();
        let consumer = broker.connect();
        let mut producer_announcements = consumer
            .subscribe("jobs.producer.register", None)
            .await
            .unwrap();

        let publisher = Publisher::new(broker.connect(), "jobs", PublisherOptions::default())
            .await
            .unwrap();

        producer_announcements.next().await.unwrap();
        for group in ["workers", "auditors", "workers"] {
            consumer
                .publish("jobs.consumer.register", Bytes::from(group))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(publisher.is_registered());
        assert_eq!(publisher.expected_count(), 2);
        assert_eq!(publisher.known_consumers(), vec!["auditors", "workers"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_count_skips_discovery() {
        let broker = MemoryBroker::new();

        let publisher = Publisher::new(
            broker.connect(),
            "jobs",
            PublisherOptions {
                subscriber_count: SubscriberCount::Fixed(3),
                ..PublisherOptions::default()
            },
        )
        .await
        .unwrap();

        assert!(publisher.is_registered());
        assert_eq!(publisher.expected_count(), 3);
        assert!(broker.subscriptions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_consumer_degrades_to_fire_and_forget() {
        let broker = MemoryBroker::new();
        let observer = broker.connect();
        let mut published = observer.subscribe("jobs", None).await.unwrap();

        let publisher = Publisher::new(broker.connect(), "jobs", PublisherOptions::default())
            .await
            .unwrap();

        assert!(publisher.request(&1, None, None).await);

        let message = published.next().await.unwrap();
        assert_eq!(&message.payload[..], br#"{"_payload":1}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let broker = MemoryBroker::new();
        let publisher = Publisher::new(broker.connect(), "jobs", PublisherOptions::default())
            .await
            .unwrap();

        publisher.stop();
        publisher.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(broker.subscriptions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_unacknowledged_publish_is_logged() {
        let broker = MemoryBroker::new();
        let ghost = broker.connect();

        let publisher = Publisher::new(
            broker.connect(),
            "jobs",
            PublisherOptions {
                retry: RetryConfig {
                    max_attempts: 2,
                    ..RetryConfig::default()
                },
                ..PublisherOptions::default()
            },
        )
        .await
        .unwrap();
        ghost
            .publish("jobs.consumer.register", Bytes::from("ghost"))
            .await
            .unwrap();

        assert!(
            !publisher
                .request(&1, Some(Duration::from_millis(100)), None)
                .await
        );
        assert_eq!(publisher.known_consumers(), vec!["ghost"]);
        assert!(logs_contain("acknowledgement not fulfilled"));
        assert!(logs_contain("ghost"));
        assert!(logs_contain("publish failed"));
    }
}
