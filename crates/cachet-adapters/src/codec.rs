//! Serialization codecs used by the file and REST adapters.

use std::string::FromUtf8Error;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Value could not be encoded as JSON.
    #[error("failed to encode value as JSON")]
    JsonEncode {
        #[source]
        source: serde_json::Error,
    },

    /// Stored bytes are not valid JSON for the expected type.
    #[error("failed to decode value from JSON")]
    JsonDecode {
        #[source]
        source: serde_json::Error,
    },

    /// Stored bytes are not valid UTF-8.
    #[error("stored bytes are not valid UTF-8")]
    Utf8 {
        #[source]
        source: FromUtf8Error,
    },
}

/// Converts values to and from their stored byte representation.
pub trait Codec<T>: Send + Sync {
    /// Encode a value into bytes.
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode a value from bytes.
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;

    /// MIME type advertised when the encoded bytes travel over HTTP.
    fn content_type(&self) -> &'static str;
}

/// JSON codec backed by serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|source| CodecError::JsonEncode { source })
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|source| CodecError::JsonDecode { source })
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}

/// Plain-text (UTF-8) codec for string values.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl Codec<String> for TextCodec {
    fn encode(&self, value: &String) -> Result<Vec<u8>, CodecError> {
        Ok(value.clone().into_bytes())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        String::from_utf8(bytes.to_vec()).map_err(|source| CodecError::Utf8 { source })
    }

    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }
}
