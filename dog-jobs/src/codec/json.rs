use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::{codec::{Payload, PayloadCodec}, QueueResult};

/// JSON codec for job payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn codec_id(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize>(&self, value: &T, version: u32) -> QueueResult<Payload> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Payload {
            codec: self.codec_id().to_string(),
            version,
            bytes: Bytes::from(bytes),
        })
    }

    fn decode<T: DeserializeOwned>(&self, payload: &Payload) -> QueueResult<T> {
        self.check_codec(payload)?;
        Ok(serde_json::from_slice(&payload.bytes)?)
    }
}
