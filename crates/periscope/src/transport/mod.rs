//! Transport capability consumed by the capture client
//!
//! The client does not implement a transport; it consumes one that already
//! reaches the capture service. A transport opens one duplex stream per
//! session, split into independent tx/rx halves so the control path can
//! write a stop while the reader task is blocked on the next event.
//!
//! The client guarantees at most one outstanding `send` and one
//! outstanding `next_event` at a time: the write half is driven from the
//! control path under a lock, the read half is owned by a single reader
//! task. Whole-stream cancellation is the client's concern (it wraps reads
//! and writes in its session cancellation token); transports only need to
//! fail cleanly once a half is dropped.

pub mod channel;

use async_trait::async_trait;
use periproto::{CaptureRequest, CaptureResponse};

/// Errors surfaced by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("stream closed by peer")]
    Closed,
    #[error("stream cancelled locally")]
    Cancelled,
    #[error("transport failure: {0}")]
    Failed(String),
}

/// An established channel to the capture service.
#[async_trait]
pub trait CaptureTransport: Send + Sync {
    /// Open one duplex stream for one capture session, returning the
    /// write and read halves.
    async fn open_stream(
        &self,
    ) -> Result<(Box<dyn RequestSink>, Box<dyn EventSource>), TransportError>;
}

/// Write half of a capture stream.
#[async_trait]
pub trait RequestSink: Send {
    /// Write one control message. May wait on transport flow control.
    async fn send(&mut self, request: CaptureRequest) -> Result<(), TransportError>;

    /// Half-close: no more writes from this side; reads continue to drain.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a capture stream.
#[async_trait]
pub trait EventSource: Send {
    /// Next decoded message from the service; `Ok(None)` is end of
    /// stream (the remote closed, normally or not).
    async fn next_event(&mut self) -> Result<Option<CaptureResponse>, TransportError>;
}
