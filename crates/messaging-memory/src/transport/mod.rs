mod error;

pub use error::Error;

use crate::broker::MemoryBroker;
use crate::subscription::MemorySubscription;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use courier_messaging::subject::{validate_pattern, validate_publishable};
use courier_messaging::{Message, Transport};
use futures::StreamExt;
use tracing::debug;
use uuid::Uuid;

/// A connection to a [`MemoryBroker`].
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    broker: MemoryBroker,
    connection_id: u64,
    closed: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub(crate) fn new(broker: MemoryBroker, connection_id: u64) -> Self {
        Self {
            broker,
            connection_id,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The broker this connection belongs to.
    #[must_use]
    pub const fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    /// Closes the connection, ending every subscription opened through it.
    ///
    /// Simulates a crashed process: subscribers stop receiving without unsubscribing.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(connection_id = self.connection_id, "closing connection");
            self.broker.disconnect(self.connection_id);
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Error = Error;
    type Subscription = MemorySubscription;

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), Self::Error> {
        self.ensure_open()?;
        validate_publishable(subject)?;

        self.broker.route(&Message::new(subject, payload));

        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<Self::Subscription, Self::Error> {
        self.ensure_open()?;
        validate_pattern(subject)?;

        Ok(self
            .broker
            .subscribe(self.connection_id, subject, queue_group))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Message, Self::Error> {
        self.ensure_open()?;
        validate_publishable(subject)?;

        let inbox = format!("_INBOX.{}", Uuid::new_v4().simple());
        let mut replies = self.broker.subscribe(self.connection_id, &inbox, None);

        let delivered = self
            .broker
            .route(&Message::new(subject, payload).with_reply(inbox));
        if delivered == 0 {
            return Err(Error::NoResponders(subject.to_string()));
        }

        match tokio::time::timeout(timeout, replies.next()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(Error::Closed),
            Err(_) => Err(Error::Timeout(subject.to_string())),
        }
    }

    async fn respond(&self, message: &Message, payload: Bytes) -> Result<(), Self::Error> {
        let reply = message
            .reply
            .as_deref()
            .ok_or_else(|| Error::NoReplySubject(message.subject.clone()))?;

        self.publish(reply, payload).await
    }

    async fn flush(&self) -> Result<(), Self::Error> {
        self.ensure_open()
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}
