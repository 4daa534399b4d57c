use crate::transport::{Error, convert_message};

use std::fmt::{self, Debug};
use std::pin::Pin;
use std::task::{Context, Poll};

use async_nats::Subscriber;
use async_trait::async_trait;
use courier_messaging::{Message, Subscription};
use futures::{Stream, StreamExt};

/// A subscription backed by a NATS subscriber.
pub struct NatsSubscription {
    subject: String,
    subscriber: Subscriber,
}

impl NatsSubscription {
    pub(crate) const fn new(subject: String, subscriber: Subscriber) -> Self {
        Self {
            subject,
            subscriber,
        }
    }
}

impl Debug for NatsSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsSubscription")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl Stream for NatsSubscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.subscriber
            .poll_next_unpin(cx)
            .map(|message| message.map(convert_message))
    }
}

#[async_trait]
impl Subscription for NatsSubscription {
    type Error = Error;

    fn subject(&self) -> &str {
        &self.subject
    }

    async fn unsubscribe(&mut self) -> Result<(), Self::Error> {
        self.subscriber
            .unsubscribe()
            .await
            .map_err(|e| Error::Unsubscribe(e.to_string()))
    }
}
