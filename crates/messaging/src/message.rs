use std::collections::HashMap;

use bytes::Bytes;

/// Optional string headers attached to a message.
pub type Headers = HashMap<String, String>;

/// A message delivered by a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// The subject the message was published to.
    pub subject: String,

    /// The subject a responder should reply to, if the sender expects a reply.
    pub reply: Option<String>,

    /// The raw payload.
    pub payload: Bytes,

    /// Headers, if the transport carried any.
    pub headers: Option<Headers>,
}

impl Message {
    /// Creates a message without reply subject or headers.
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            payload: payload.into(),
            headers: None,
        }
    }

    /// Sets the reply subject.
    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// The payload read as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn string(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
