pub mod json;

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{QueueError, QueueResult};

pub use json::JsonCodec;

/// Codec id of payloads the engine did not encode itself
pub const RAW_CODEC: &str = "raw";

/// Opaque job payload.
///
/// The engine never looks inside `bytes`; the codec id and schema version
/// travel with the payload so the handler can validate what it receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Codec used for serialization
    pub codec: String,

    /// Schema version chosen by the producer
    pub version: u32,

    /// Serialized payload (opaque bytes)
    pub bytes: Bytes,
}

impl Payload {
    /// Wrap bytes the caller serialized itself
    pub fn raw(bytes: impl Into<Bytes>) -> Self {
        Self {
            codec: RAW_CODEC.to_string(),
            version: 1,
            bytes: bytes.into(),
        }
    }

    /// Encode a value with the JSON codec at schema version 1
    pub fn json<T: Serialize>(value: &T) -> QueueResult<Self> {
        JsonCodec.encode(value, 1)
    }

    /// Set the schema version
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Decode a JSON payload
    pub fn decode_json<T: DeserializeOwned>(&self) -> QueueResult<T> {
        JsonCodec.decode(self)
    }

    /// Get the payload size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::raw(Bytes::new())
    }
}

/// Trait for payload codecs
pub trait PayloadCodec: Send + Sync {
    /// Get codec identifier
    fn codec_id(&self) -> &'static str;

    /// Serialize a value into a payload tagged with this codec
    fn encode<T: Serialize>(&self, value: &T, version: u32) -> QueueResult<Payload>;

    /// Deserialize a payload produced by this codec
    fn decode<T: DeserializeOwned>(&self, payload: &Payload) -> QueueResult<T>;

    /// Reject payloads produced by another codec
    fn check_codec(&self, payload: &Payload) -> QueueResult<()> {
        if payload.codec == self.codec_id() {
            Ok(())
        } else {
            Err(QueueError::Serialization(format!(
                "payload codec '{}' is not '{}'",
                payload.codec,
                self.codec_id()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_payload_is_opaque() {
        let payload = Payload::raw(vec![0xde, 0xad]);
        assert_eq!(payload.codec, RAW_CODEC);
        assert_eq!(payload.len(), 2);
        assert!(payload.decode_json::<serde_json::Value>().is_err());
    }

    #[test]
    fn test_version_is_carried() {
        let payload = Payload::json(&serde_json::json!({"to": "a@b.c"})).unwrap().with_version(3);
        assert_eq!(payload.version, 3);
    }
}
