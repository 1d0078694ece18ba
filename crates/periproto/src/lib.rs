//! periproto - Protocol types for the Periscope capture stream
//!
//! This crate defines the messages exchanged between the Periscope client
//! and a remote capture service over one bidirectional stream per session.
//! The client side writes control and configuration ([`CaptureRequest`]);
//! the service side answers with a live event stream ([`CaptureResponse`]).
//!
//! ## Control flow
//!
//! A session is exactly one request/response conversation:
//!
//! ```text
//! client                          service
//!   │ ── Start(CaptureSpec) ──────▶ │
//!   │ ◀────── CaptureStarted ────── │
//!   │ ◀────── Events ────────────── │  (repeated)
//!   │ ── Stop, half-close ────────▶ │
//!   │ ◀────── CaptureFinished ───── │
//!   │ ◀────── stream end ────────── │
//! ```
//!
//! Only what is needed for control flow lives here; the capture service's
//! full internal message catalog is deliberately out of scope.
//!
//! ## Encodings
//!
//! Messages are serde types, tagged by a `type` field in snake_case.
//! The `codec` module provides MsgPack (wire) and JSON (debugging)
//! encode/decode helpers. Binary user data is base64-encoded in
//! human-readable encodings and passed through raw otherwise.

pub mod capture;
pub mod codec;

pub use capture::{
    CaptureOptions, CaptureSpec, FunctionInfo, ModuleInfo, ProcessInfo, SelectionSet,
    TracepointInfo, UserRegion,
};
pub use codec::CodecError;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Client -> service
// ============================================================================

/// Control messages written by the client on a capture stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureRequest {
    /// Begin a capture described by the spec. Always the first message on
    /// a stream.
    Start(CaptureSpec),
    /// End the capture. The client half-closes its write side after this;
    /// the service drains, emits `CaptureFinished`, and closes.
    Stop,
}

// ============================================================================
// Service -> client
// ============================================================================

/// Acknowledgment that the capture is running on the target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureBegin {
    /// Service-assigned id for this capture, echoed in `CaptureEnd`.
    pub capture_id: Uuid,
    pub pid: u32,
    /// Service monotonic clock, nanoseconds. All event timestamps share
    /// this clock.
    pub timestamp_ns: u64,
}

/// Terminal message of a capture stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureEnd {
    pub capture_id: Uuid,
    pub timestamp_ns: u64,
    /// Events the service dropped under backpressure. Informational; the
    /// delivered stream is still in order.
    pub dropped_events: u64,
}

/// One decoded capture event.
///
/// Batches arrive in wire order; within a batch, events are ordered by the
/// service. Timestamps are nanoseconds on the service's monotonic clock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureEvent {
    /// Entry/exit pair of an instrumented function. `function_id` is the
    /// caller-assigned id from the session's selection set.
    FunctionCall {
        function_id: u64,
        tid: u32,
        begin_ns: u64,
        end_ns: u64,
        depth: u32,
    },
    /// Scheduler slice of a target thread on a core.
    SchedulingSlice {
        pid: u32,
        tid: u32,
        core: u32,
        begin_ns: u64,
        end_ns: u64,
    },
    /// Periodic callstack sample; frames are raw instruction addresses,
    /// outermost last. Symbolization happens downstream.
    CallstackSample {
        tid: u32,
        timestamp_ns: u64,
        frames: Vec<u64>,
    },
    /// A selected tracepoint fired.
    TracepointHit {
        category: String,
        name: String,
        tid: u32,
        timestamp_ns: u64,
    },
    /// The target's module list changed mid-capture (dlopen etc.).
    ModulesUpdated { modules: Vec<ModuleInfo> },
    /// Opaque user payload emitted by the target through the capture API.
    UserData {
        label: String,
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },
}

/// Messages read by the client from a capture stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureResponse {
    CaptureStarted(CaptureBegin),
    Events { events: Vec<CaptureEvent> },
    CaptureFinished(CaptureEnd),
}

impl CaptureResponse {
    /// Wire tag of this message, for logging.
    pub fn tag(&self) -> &'static str {
        match self {
            CaptureResponse::CaptureStarted(_) => "capture_started",
            CaptureResponse::Events { .. } => "events",
            CaptureResponse::CaptureFinished(_) => "capture_finished",
        }
    }
}

/// Base64 encoding for binary data in JSON
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            STANDARD.encode(bytes).serialize(serializer)
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            STANDARD.decode(&s).map_err(serde::de::Error::custom)
        } else {
            serde_bytes::deserialize(deserializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_spec() -> CaptureSpec {
        CaptureSpec {
            process: ProcessInfo::new(4242, "game"),
            modules: vec![ModuleInfo {
                path: "/opt/game/libengine.so".to_string(),
                build_id: "a1b2c3".to_string(),
                load_bias: 0x1000,
                address_start: 0x7f00_0000_0000,
                address_end: 0x7f00_0010_0000,
            }],
            selection: SelectionSet::new()
                .with_function(
                    1,
                    FunctionInfo {
                        name: "tick".to_string(),
                        module_path: "/opt/game/libengine.so".to_string(),
                        address: 0x2400,
                        size: 128,
                    },
                )
                .with_tracepoint(TracepointInfo::new("sched", "sched_switch")),
            options: CaptureOptions::default().with_sampling_period_us(1000),
        }
    }

    #[test]
    fn start_request_roundtrip() {
        let request = CaptureRequest::Start(sample_spec());
        let json = serde_json::to_string(&request).unwrap();
        let parsed: CaptureRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request, parsed);
    }

    #[test]
    fn stop_request_is_tagged() {
        let json = serde_json::to_string(&CaptureRequest::Stop).unwrap();
        assert_eq!(json, r#"{"type":"stop"}"#);
    }

    #[test]
    fn user_data_is_base64_in_json() {
        let response = CaptureResponse::Events {
            events: vec![CaptureEvent::UserData {
                label: "frame_stats".to_string(),
                payload: vec![0x4d, 0x54, 0x68, 0x64],
            }],
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("TVRoZA=="));
        let parsed: CaptureResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(response, parsed);
    }

    #[test]
    fn response_tags_match_wire_names() {
        let begin = CaptureBegin {
            capture_id: Uuid::new_v4(),
            pid: 1,
            timestamp_ns: 0,
        };
        assert_eq!(CaptureResponse::CaptureStarted(begin).tag(), "capture_started");
        assert_eq!(CaptureResponse::Events { events: vec![] }.tag(), "events");
    }
}
