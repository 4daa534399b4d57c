use std::time::Duration;

use bytes::Bytes;
use courier_messaging::{Codec, CodecError};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Suffix of the subject consumers announce their queue group on.
pub const CONSUMER_REGISTER_SUFFIX: &str = ".consumer.register";

/// Suffix of the subject producers announce themselves on.
pub const PRODUCER_REGISTER_SUFFIX: &str = ".producer.register";

/// Infix between the subject and the correlation id of acknowledgements.
pub const ACKNOWLEDGEMENT_SUFFIX: &str = ".akc.";

/// How long a publisher waits for acknowledgements per attempt.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(2000);

/// Queue group used when a caller names none.
pub const DEFAULT_QUEUE_GROUP: &str = "general";

/// Asks every consumer group to acknowledge on `<subject>.akc.<id>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckRequest {
    /// The correlation id.
    pub id: String,

    /// How long the publisher waits, in milliseconds.
    pub timeout: u64,
}

impl AckRequest {
    /// Creates a request with a fresh correlation id.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            id: correlation_id(),
            timeout: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// The body of every message a publisher sends.
#[derive(Debug, Serialize)]
pub struct RequestEnvelope<'a, P: ?Sized> {
    /// The caller's value.
    #[serde(rename = "_payload")]
    pub payload: &'a P,

    /// Present if and only if acknowledgement is required.
    #[serde(rename = "_natsRequestOptions", skip_serializing_if = "Option::is_none")]
    pub options: Option<AckRequest>,
}

impl<'a, P> RequestEnvelope<'a, P>
where
    P: Serialize + ?Sized,
{
    /// Wraps a payload without asking for acknowledgement.
    pub const fn new(payload: &'a P) -> Self {
        Self {
            payload,
            options: None,
        }
    }

    /// Asks for acknowledgement.
    #[must_use]
    pub fn with_ack(mut self, request: AckRequest) -> Self {
        self.options = Some(request);
        self
    }

    /// Encodes the envelope.
    ///
    /// # Errors
    ///
    /// Returns the codec's error if the payload cannot be encoded.
    pub fn encode(&self, codec: Codec) -> Result<Bytes, CodecError> {
        codec.encode(self)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OptionsProbe {
    Envelope {
        #[serde(rename = "_natsRequestOptions")]
        options: AckRequest,
    },
    #[allow(dead_code)]
    Other(IgnoredAny),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PayloadProbe<T> {
    Envelope {
        #[serde(rename = "_payload")]
        payload: T,
    },
    Bare(T),
}

/// Reads the acknowledgement request of a message body.
///
/// A well-formed body that is not an envelope, or an envelope without the options block,
/// yields `None`.
///
/// # Errors
///
/// Returns the codec's error if the body cannot be decoded at all.
pub fn request_options(codec: Codec, payload: &[u8]) -> Result<Option<AckRequest>, CodecError> {
    Ok(match codec.decode::<OptionsProbe>(payload)? {
        OptionsProbe::Envelope { options } => Some(options),
        OptionsProbe::Other(_) => None,
    })
}

/// Decodes the caller's value from a message body.
///
/// Envelopes yield their `_payload`, any other body is decoded as a whole.
///
/// # Errors
///
/// Returns the codec's error if the body does not decode into `T`.
pub fn decode_payload<T>(codec: Codec, payload: &[u8]) -> Result<T, CodecError>
where
    T: DeserializeOwned,
{
    Ok(match codec.decode::<PayloadProbe<T>>(payload)? {
        PayloadProbe::Envelope { payload } | PayloadProbe::Bare(payload) => payload,
    })
}

/// Whether a subject carries protocol traffic rather than application messages.
#[must_use]
pub fn is_acknowledge_event(subject: &str) -> bool {
    [
        CONSUMER_REGISTER_SUFFIX,
        PRODUCER_REGISTER_SUFFIX,
        ACKNOWLEDGEMENT_SUFFIX,
    ]
    .iter()
    .any(|suffix| subject.contains(suffix))
}

/// `<subject>.consumer.register`
#[must_use]
pub fn consumer_register_subject(subject: &str) -> String {
    format!("{subject}{CONSUMER_REGISTER_SUFFIX}")
}

/// `<subject>.producer.register`
#[must_use]
pub fn producer_register_subject(subject: &str) -> String {
    format!("{subject}{PRODUCER_REGISTER_SUFFIX}")
}

/// `<subject>.akc.<id>`
#[must_use]
pub fn ack_subject(subject: &str, id: &str) -> String {
    format!("{subject}{ACKNOWLEDGEMENT_SUFFIX}{id}")
}

/// A fresh correlation id: a v4 UUID without hyphens.
#[must_use]
pub fn correlation_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{Value, json};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Job {
        id: u32,
    }

    #[test]
    fn test_envelope_wire_format() {
        let job = Job { id: 1 };
        let request = AckRequest {
            id: "abc".to_string(),
            timeout: 500,
        };

        let bytes = RequestEnvelope::new(&job)
            .with_ack(request)
            .encode(Codec::Json)
            .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(
            value,
            json!({"_payload": {"id": 1}, "_natsRequestOptions": {"id": "abc", "timeout": 500}})
        );
    }

    #[test]
    fn test_envelope_without_ack_omits_options() {
        let bytes = RequestEnvelope::new("hello").encode(Codec::Json).unwrap();

        assert_eq!(&bytes[..], br#"{"_payload":"hello"}"#);
    }

    #[test]
    fn test_request_options() {
        let with = br#"{"_payload":1,"_natsRequestOptions":{"id":"x","timeout":2000}}"#;
        let without = br#"{"_payload":1}"#;
        let bare = br#"[1,2,3]"#;

        assert_eq!(
            request_options(Codec::Json, with).unwrap(),
            Some(AckRequest {
                id: "x".to_string(),
                timeout: 2000
            })
        );
        assert_eq!(request_options(Codec::Json, without).unwrap(), None);
        assert_eq!(request_options(Codec::Json, bare).unwrap(), None);
        assert!(request_options(Codec::Json, b"not json").is_err());
    }

    #[test]
    fn test_null_body_is_delivered_without_acknowledgement() {
        assert_eq!(request_options(Codec::Json, b"null").unwrap(), None);
        assert_eq!(
            decode_payload::<Option<Job>>(Codec::Json, b"null").unwrap(),
            None
        );
    }

    #[test]
    fn test_request_options_cbor() {
        let bytes = RequestEnvelope::new(&Job { id: 7 })
            .with_ack(AckRequest::new(Duration::from_millis(300)))
            .encode(Codec::Cbor)
            .unwrap();

        let options = request_options(Codec::Cbor, &bytes).unwrap().unwrap();

        assert_eq!(options.timeout, 300);
        assert_eq!(options.id.len(), 32);
    }

    #[test]
    fn test_decode_payload() {
        let enveloped = br#"{"_payload":{"id":3}}"#;
        let bare = br#"{"id":4}"#;

        assert_eq!(
            decode_payload::<Job>(Codec::Json, enveloped).unwrap(),
            Job { id: 3 }
        );
        assert_eq!(
            decode_payload::<Job>(Codec::Json, bare).unwrap(),
            Job { id: 4 }
        );
        assert!(decode_payload::<Job>(Codec::Json, br#"{"name":"x"}"#).is_err());
    }

    #[test]
    fn test_is_acknowledge_event() {
        assert!(is_acknowledge_event("jobs.created.consumer.register"));
        assert!(is_acknowledge_event("jobs.created.producer.register"));
        assert!(is_acknowledge_event("jobs.created.akc.0123"));
        assert!(!is_acknowledge_event("jobs.created"));
    }

    #[test]
    fn test_subjects() {
        assert_eq!(ack_subject("jobs", "42"), "jobs.akc.42");
        assert_eq!(
            consumer_register_subject("jobs"),
            "jobs.consumer.register"
        );
        assert_eq!(
            producer_register_subject("jobs"),
            "jobs.producer.register"
        );
        assert!(!correlation_id().contains('-'));
    }
}
