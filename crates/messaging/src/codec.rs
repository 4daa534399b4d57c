use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors raised while encoding or decoding payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// CBOR decoding failed.
    #[error("cbor decode error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    /// CBOR encoding failed.
    #[error("cbor encode error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wire encoding for structured payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Codec {
    /// Compact binary encoding.
    Cbor,

    /// UTF-8 JSON.
    #[default]
    Json,
}

impl Codec {
    /// Encodes a value into a payload.
    ///
    /// # Errors
    ///
    /// Returns a `CodecError` if the value cannot be serialized.
    pub fn encode<T>(self, value: &T) -> Result<Bytes, CodecError>
    where
        T: Serialize + ?Sized,
    {
        match self {
            Self::Cbor => {
                let mut buffer = Vec::new();
                ciborium::into_writer(value, &mut buffer)?;
                Ok(Bytes::from(buffer))
            }
            Self::Json => Ok(Bytes::from(serde_json::to_vec(value)?)),
        }
    }

    /// Decodes a payload into a value.
    ///
    /// # Errors
    ///
    /// Returns a `CodecError` if the payload is not a valid encoding of `T`.
    pub fn decode<T>(self, payload: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        match self {
            Self::Cbor => Ok(ciborium::from_reader(payload)?),
            Self::Json => Ok(serde_json::from_slice(payload)?),
        }
    }
}
