//! Encode/decode helpers for capture stream messages
//!
//! MsgPack is the wire encoding; JSON is kept for debugging and tooling.
//! MsgPack uses the named (map) representation so the `type`-tagged enums
//! in this crate survive the roundtrip.

use serde::{de::DeserializeOwned, Serialize};

/// Errors during message encode/decode.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a message as MsgPack.
pub fn to_msgpack<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode a message from MsgPack.
pub fn from_msgpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Encode a message as JSON.
pub fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode a message from JSON.
pub fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CaptureEvent, CaptureRequest, CaptureResponse};
    use pretty_assertions::assert_eq;

    #[test]
    fn msgpack_roundtrips_tagged_enums() {
        let response = CaptureResponse::Events {
            events: vec![
                CaptureEvent::FunctionCall {
                    function_id: 1,
                    tid: 77,
                    begin_ns: 100,
                    end_ns: 250,
                    depth: 0,
                },
                CaptureEvent::CallstackSample {
                    tid: 77,
                    timestamp_ns: 300,
                    frames: vec![0xdead, 0xbeef],
                },
            ],
        };
        let bytes = to_msgpack(&response).unwrap();
        let parsed: CaptureResponse = from_msgpack(&bytes).unwrap();
        assert_eq!(response, parsed);
    }

    #[test]
    fn msgpack_rejects_garbage() {
        let result: Result<CaptureRequest, _> = from_msgpack(&[0xc1, 0xff, 0x00]);
        assert!(result.is_err());
    }

    #[test]
    fn json_roundtrips_stop() {
        let bytes = to_json(&CaptureRequest::Stop).unwrap();
        let parsed: CaptureRequest = from_json(&bytes).unwrap();
        assert_eq!(parsed, CaptureRequest::Stop);
    }
}
