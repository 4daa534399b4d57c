use crate::broker::MemoryBroker;
use crate::transport::Error;

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use courier_messaging::{Message, Subscription};
use futures::Stream;
use tokio::sync::mpsc;

/// A subscription on a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemorySubscription {
    id: u64,
    subject: String,
    receiver: mpsc::UnboundedReceiver<Message>,
    broker: MemoryBroker,
}

impl MemorySubscription {
    pub(crate) const fn new(
        id: u64,
        subject: String,
        receiver: mpsc::UnboundedReceiver<Message>,
        broker: MemoryBroker,
    ) -> Self {
        Self {
            id,
            subject,
            receiver,
            broker,
        }
    }
}

impl Stream for MemorySubscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    type Error = Error;

    fn subject(&self) -> &str {
        &self.subject
    }

    async fn unsubscribe(&mut self) -> Result<(), Self::Error> {
        self.broker.unsubscribe(self.id);
        self.receiver.close();
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.broker.unsubscribe(self.id);
    }
}
