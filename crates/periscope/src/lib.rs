//! periscope - Client-side controller for remote capture sessions
//!
//! This crate drives one performance-capture session at a time against a
//! remote capture service, over a bidirectional stream the caller already
//! has. It owns the session lifecycle (idle → starting → started →
//! stopping → idle), writes control and configuration on the stream, and
//! forwards every decoded event to a caller-supplied listener while the
//! stream is live.
//!
//! What this crate is *not*: it does not discover or deploy the remote
//! service, does not aggregate profiling data into call trees, and does
//! not enumerate processes or resolve symbols. It consumes a connected
//! [`transport::CaptureTransport`] and an opaque
//! [`periproto::SelectionSet`], and hands raw decoded events to a
//! [`CaptureListener`].
//!
//! ## Guarantees
//!
//! - At most one session is active at a time; overlapping starts are
//!   rejected before any I/O.
//! - Listener callbacks for a session arrive in wire order from a single
//!   reader task, and the terminal finished/failed callback is always
//!   last, before Stopped becomes observable to a synchronized caller.
//! - `stop_capture` returns only after full teardown, so the client can
//!   immediately start the next session.
//! - A session stuck against an unresponsive remote can always be ended:
//!   `try_abort_capture` cancels the stream out from under the blocked
//!   reader.

pub mod client;
pub mod listener;
pub mod state;
pub mod transport;

pub use client::{
    CaptureClient, CaptureFailure, ClientConfig, StartError, UnexpectedMessagePolicy,
};
pub use listener::{CaptureListener, NullListener};
pub use state::{SessionState, SessionTracker};
pub use transport::{CaptureTransport, EventSource, RequestSink, TransportError};
