//! Listener surface for decoded capture events
//!
//! The client forwards everything it decodes to a caller-supplied
//! [`CaptureListener`]. Callbacks are invoked synchronously from the
//! session's reader task, in wire order, and the terminal callback
//! (finished or failed) is always the last one for a session. A listener
//! that blocks stalls the reader, which in turn stalls the remote's event
//! flow; keep the callbacks cheap and hand heavy aggregation to another
//! task.

use periproto::{CaptureBegin, CaptureEvent};

use crate::client::CaptureFailure;

/// Callback surface invoked by the session's reader task.
pub trait CaptureListener: Send + Sync {
    /// The remote acknowledged the start request; the capture is live.
    fn on_capture_started(&self, begin: &CaptureBegin);

    /// One batch of decoded events, forwarded verbatim in wire order.
    fn on_capture_events(&self, events: Vec<CaptureEvent>);

    /// The session ended because this client asked it to (stop or abort).
    fn on_capture_finished(&self);

    /// The session ended without a stop or abort from this client.
    fn on_capture_failed(&self, failure: &CaptureFailure);
}

/// Listener that discards everything. Useful in tests and for sessions
/// driven purely for their side effects on the target.
pub struct NullListener;

impl CaptureListener for NullListener {
    fn on_capture_started(&self, _begin: &CaptureBegin) {}
    fn on_capture_events(&self, _events: Vec<CaptureEvent>) {}
    fn on_capture_finished(&self) {}
    fn on_capture_failed(&self, _failure: &CaptureFailure) {}
}
