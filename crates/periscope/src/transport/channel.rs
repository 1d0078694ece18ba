//! In-memory duplex transport
//!
//! Pairs a client-side [`CaptureTransport`] with a service-side
//! [`StreamAcceptor`] over tokio channels: the in-process equivalent of a
//! real connection, used by the integration tests and by loopback capture
//! services. Each `open_stream` call produces a fresh stream, so one pair
//! serves back-to-back sessions.
//!
//! Half-close maps onto channel closure: the client dropping its request
//! sender ends the service's `requests` receiver, and the service dropping
//! its event sender ends the client's stream.

use async_trait::async_trait;
use periproto::{CaptureRequest, CaptureResponse};
use tokio::sync::mpsc;

use super::{CaptureTransport, EventSource, RequestSink, TransportError};

/// Create a connected transport/acceptor pair. `capacity` bounds each
/// direction of every stream opened over the pair.
pub fn pair(capacity: usize) -> (ChannelTransport, StreamAcceptor) {
    let (accept_tx, accept_rx) = mpsc::channel(1);
    (
        ChannelTransport {
            accept_tx,
            capacity,
        },
        StreamAcceptor { accept_rx },
    )
}

/// Client side of an in-memory connection.
pub struct ChannelTransport {
    accept_tx: mpsc::Sender<ServiceStream>,
    capacity: usize,
}

/// Service side of an in-memory connection: yields one [`ServiceStream`]
/// per client `open_stream` call.
pub struct StreamAcceptor {
    accept_rx: mpsc::Receiver<ServiceStream>,
}

impl StreamAcceptor {
    /// Wait for the next stream. `None` once the client transport is gone.
    pub async fn accept(&mut self) -> Option<ServiceStream> {
        self.accept_rx.recv().await
    }
}

/// Service-side halves of one capture stream.
pub struct ServiceStream {
    /// Control messages from the client; `None` after the client
    /// half-closes its write side.
    pub requests: mpsc::Receiver<CaptureRequest>,
    /// Event channel back to the client; dropping it ends the client's
    /// stream.
    pub events: mpsc::Sender<CaptureResponse>,
}

#[async_trait]
impl CaptureTransport for ChannelTransport {
    async fn open_stream(
        &self,
    ) -> Result<(Box<dyn RequestSink>, Box<dyn EventSource>), TransportError> {
        let (request_tx, request_rx) = mpsc::channel(self.capacity);
        let (event_tx, event_rx) = mpsc::channel(self.capacity);

        self.accept_tx
            .send(ServiceStream {
                requests: request_rx,
                events: event_tx,
            })
            .await
            .map_err(|_| TransportError::Closed)?;

        Ok((
            Box::new(ChannelSink {
                tx: Some(request_tx),
            }),
            Box::new(ChannelEvents { rx: event_rx }),
        ))
    }
}

struct ChannelSink {
    tx: Option<mpsc::Sender<CaptureRequest>>,
}

#[async_trait]
impl RequestSink for ChannelSink {
    async fn send(&mut self, request: CaptureRequest) -> Result<(), TransportError> {
        match &self.tx {
            Some(tx) => tx.send(request).await.map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

struct ChannelEvents {
    rx: mpsc::Receiver<CaptureResponse>,
}

#[async_trait]
impl EventSource for ChannelEvents {
    async fn next_event(&mut self) -> Result<Option<CaptureResponse>, TransportError> {
        Ok(self.rx.recv().await)
    }
}
