//! Capture session controller
//!
//! Drives one capture session end-to-end: builds the start request from
//! the caller's selection, writes it on a fresh duplex stream, and hands
//! the read half to a background reader task that decodes events and
//! forwards them to the listener. Transport failures after the stream is
//! live never reach a caller thread; they arrive at the listener as a
//! terminal `on_capture_failed`.
//!
//! ## Lifecycle
//!
//! Stopped → Starting → Started → Stopping → Stopped, with the short
//! circuit back to Stopped on abort or failure. At most one session is
//! active at a time; `start_capture` is rejected until the previous
//! session is fully torn down. `stop_capture` blocks until teardown
//! completes, so its return means the client is safe to reuse.
//!
//! ## Teardown
//!
//! Aborting is cooperative (the reader checks the abort flag between
//! messages) plus preemptive: `try_abort_capture` cancels the session's
//! token, which fails the blocked read and any in-flight write promptly.
//! A remote that never answers cannot wedge a caller that aborts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use periproto::{
    CaptureOptions, CaptureRequest, CaptureResponse, CaptureSpec, ModuleInfo, ProcessInfo,
    SelectionSet,
};

use crate::listener::CaptureListener;
use crate::state::{SessionState, SessionTracker};
use crate::transport::{CaptureTransport, EventSource, RequestSink, TransportError};

// ============================================================================
// Configuration
// ============================================================================

/// What to do when the service sends something other than the start
/// acknowledgment while the handshake is still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnexpectedMessagePolicy {
    /// Log and keep reading; the remote may deliver the first few control
    /// messages out of order while it warms up.
    Tolerate,
    /// Treat it as a protocol error and end the session.
    Fail,
}

/// Configuration for [`CaptureClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Client name for logging.
    pub name: String,
    /// Handling of out-of-order messages during the start handshake.
    pub unexpected_message_policy: UnexpectedMessagePolicy,
}

impl ClientConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            unexpected_message_policy: UnexpectedMessagePolicy::Tolerate,
        }
    }

    pub fn with_unexpected_message_policy(mut self, policy: UnexpectedMessagePolicy) -> Self {
        self.unexpected_message_policy = policy;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("capture")
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors returned synchronously from [`CaptureClient::start_capture`].
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// A session is already in flight; nothing was written.
    #[error("a capture is already in progress")]
    AlreadyInProgress,
    /// Opening the stream or writing the start request failed; the
    /// session is back to Stopped and a retry is possible.
    #[error("failed to start capture: {0}")]
    StartFailed(#[source] TransportError),
}

/// Why a live session ended without this client asking it to. Delivered
/// asynchronously through [`CaptureListener::on_capture_failed`].
#[derive(Debug, thiserror::Error)]
pub enum CaptureFailure {
    /// The stream ended with no stop requested and no abort set.
    #[error("capture stream ended unexpectedly")]
    UnexpectedEnd,
    /// The transport failed mid-stream.
    #[error("capture stream failed: {0}")]
    Transport(#[source] TransportError),
    /// The service broke the protocol (only under
    /// [`UnexpectedMessagePolicy::Fail`]).
    #[error("capture protocol error: {0}")]
    Protocol(String),
}

// ============================================================================
// Controller
// ============================================================================

/// Shared between the controller surface and the session's reader task.
struct SessionCore {
    config: ClientConfig,
    tracker: SessionTracker,
    listener: Arc<dyn CaptureListener>,
    /// Set at most once per session; observed by the reader between
    /// messages. Single-writer, relaxed reads are fine.
    try_abort: AtomicBool,
    /// Records a failed stop write, to tell "remote closed on us" apart
    /// from "we failed to tell the remote to stop".
    stop_write_failed: AtomicBool,
    /// Cancellation scope of the current session's stream.
    cancel: StdMutex<CancellationToken>,
    /// Write half of the open stream, parked here for the stop path.
    /// `None` whenever no stream is open.
    sink: Mutex<Option<Box<dyn RequestSink>>>,
}

impl SessionCore {
    fn current_token(&self) -> CancellationToken {
        self.cancel.lock().unwrap().clone()
    }
}

/// Client-side controller for remote capture sessions.
///
/// All methods take `&self`; share the client between tasks with an
/// `Arc`. The listener is supplied at construction and invoked only from
/// the session reader task.
pub struct CaptureClient {
    transport: Arc<dyn CaptureTransport>,
    core: Arc<SessionCore>,
}

impl CaptureClient {
    pub fn new(transport: Arc<dyn CaptureTransport>, listener: Arc<dyn CaptureListener>) -> Self {
        Self::with_config(transport, listener, ClientConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn CaptureTransport>,
        listener: Arc<dyn CaptureListener>,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            core: Arc::new(SessionCore {
                config,
                tracker: SessionTracker::new(),
                listener,
                try_abort: AtomicBool::new(false),
                stop_write_failed: AtomicBool::new(false),
                cancel: StdMutex::new(CancellationToken::new()),
                sink: Mutex::new(None),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.core.tracker.state()
    }

    /// True while a session exists in any form (anything but Stopped).
    pub fn is_capturing(&self) -> bool {
        self.core.tracker.state() != SessionState::Stopped
    }

    /// Whether the most recent stop failed to reach the remote. The
    /// session still stops either way; this only qualifies the error
    /// report.
    pub fn stop_write_failed(&self) -> bool {
        self.core.stop_write_failed.load(Ordering::Relaxed)
    }

    /// Begin a capture session.
    ///
    /// Writes the start request and returns without waiting for the
    /// remote acknowledgment; the session is observably `Starting` until
    /// the acknowledgment arrives on the stream. The selection is
    /// consumed for the duration of the session.
    pub async fn start_capture(
        &self,
        process: ProcessInfo,
        modules: Vec<ModuleInfo>,
        selection: SelectionSet,
        options: CaptureOptions,
    ) -> Result<(), StartError> {
        let core = &self.core;
        if !core.tracker.try_begin_start() {
            return Err(StartError::AlreadyInProgress);
        }

        // New session: clear the previous session's flags and install a
        // fresh cancellation scope.
        core.try_abort.store(false, Ordering::Relaxed);
        core.stop_write_failed.store(false, Ordering::Relaxed);
        let token = CancellationToken::new();
        *core.cancel.lock().unwrap() = token.clone();

        let (mut sink, events) = match self.transport.open_stream().await {
            Ok(halves) => halves,
            Err(e) => {
                warn!("{}: failed to open capture stream: {}", core.config.name, e);
                core.tracker.complete_stop();
                return Err(StartError::StartFailed(e));
            }
        };

        let spec = CaptureSpec {
            process,
            modules,
            selection,
            options,
        };
        debug!(
            "{}: sending start request (pid={}, {} functions, {} tracepoints)",
            core.config.name,
            spec.process.pid,
            spec.selection.functions.len(),
            spec.selection.tracepoints.len()
        );

        if let Err(e) = sink.send(CaptureRequest::Start(spec)).await {
            warn!("{}: failed to send start request: {}", core.config.name, e);
            core.tracker.complete_stop();
            return Err(StartError::StartFailed(e));
        }

        *core.sink.lock().await = Some(sink);
        tokio::spawn(drive_stream(Arc::clone(core), events, token));
        Ok(())
    }

    /// Request the end of the current session and wait for full teardown.
    ///
    /// Returns `true` iff this call is the one that initiated the stop;
    /// `false` when a stop was already in flight or the session was
    /// already Stopped. Every caller, `true` or `false`, returns only
    /// once the session is fully Stopped, so concurrent stoppers can race
    /// without double-acting.
    pub async fn stop_capture(&self) -> bool {
        let core = &self.core;

        // Sending a stop before the start handshake completes is
        // undefined on the remote side; wait until the session leaves
        // Starting. Bounded by the session's own progress: the
        // acknowledgment, a stream failure, or an abort all end Starting.
        core.tracker
            .wait_while(|s| s == SessionState::Starting)
            .await;

        let initiated = core.tracker.begin_stop();
        if initiated {
            info!("{}: stopping capture", core.config.name);
            let token = core.current_token();
            let mut sink = core.sink.lock().await;
            if let Some(sink) = sink.as_mut() {
                let sent = tokio::select! {
                    result = async {
                        sink.send(CaptureRequest::Stop).await?;
                        sink.close().await
                    } => result,
                    _ = token.cancelled() => Err(TransportError::Cancelled),
                };
                if let Err(e) = sent {
                    core.stop_write_failed.store(true, Ordering::Relaxed);
                    warn!(
                        "{}: failed to send stop request: {} (waiting for stream end anyway)",
                        core.config.name, e
                    );
                }
            }
        }

        core.tracker
            .wait_while(|s| s != SessionState::Stopped)
            .await;
        initiated
    }

    /// Abort a session that is stuck, typically in Starting against an
    /// unresponsive remote. Sets the abort flag and cancels the stream so
    /// the blocked reader fails promptly; follow with
    /// [`stop_capture`](Self::stop_capture) to wait for teardown.
    ///
    /// Returns whether the flag transitioned from unset to set; `false`
    /// when already aborted or when no session exists.
    pub fn try_abort_capture(&self) -> bool {
        let core = &self.core;
        if core.tracker.state() == SessionState::Stopped {
            return false;
        }
        if core.try_abort.swap(true, Ordering::Relaxed) {
            return false;
        }
        info!("{}: aborting capture session", core.config.name);
        core.current_token().cancel();
        true
    }
}

// ============================================================================
// Reader task
// ============================================================================

enum Dispatch {
    Continue,
    Finished,
    Failed(CaptureFailure),
}

/// Drains the event stream for one session. Sole invoker of the listener;
/// on exit it tears the stream down, delivers the terminal callback, and
/// only then makes Stopped observable.
async fn drive_stream(
    core: Arc<SessionCore>,
    mut events: Box<dyn EventSource>,
    token: CancellationToken,
) {
    let mut failure: Option<CaptureFailure> = None;

    loop {
        // Abort flag is checked between messages; a cancelled token also
        // wakes the blocked read below.
        if core.try_abort.load(Ordering::Relaxed) && !token.is_cancelled() {
            debug!("{}: abort flag set, cancelling stream", core.config.name);
            token.cancel();
        }

        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("{}: capture stream cancelled", core.config.name);
                break;
            }
            next = events.next_event() => next,
        };

        match next {
            Ok(Some(response)) => match dispatch(&core, response) {
                Dispatch::Continue => {}
                Dispatch::Finished => break,
                Dispatch::Failed(f) => {
                    failure = Some(f);
                    break;
                }
            },
            Ok(None) => {
                debug!("{}: capture stream ended", core.config.name);
                break;
            }
            Err(e) => {
                warn!("{}: capture stream read failed: {}", core.config.name, e);
                failure = Some(CaptureFailure::Transport(e));
                break;
            }
        }
    }

    drop(events);
    finish_capture(core, failure).await;
}

/// Route one decoded message. Ordering guarantee: this runs on the reader
/// task only, so listener callbacks follow wire order exactly.
fn dispatch(core: &SessionCore, response: CaptureResponse) -> Dispatch {
    let starting = core.tracker.state() == SessionState::Starting;

    if starting && !matches!(response, CaptureResponse::CaptureStarted(_)) {
        warn!(
            "{}: unexpected '{}' message before start acknowledgment",
            core.config.name,
            response.tag()
        );
        if core.config.unexpected_message_policy == UnexpectedMessagePolicy::Fail {
            return Dispatch::Failed(CaptureFailure::Protocol(format!(
                "unexpected '{}' message during start handshake",
                response.tag()
            )));
        }
    }

    match response {
        CaptureResponse::CaptureStarted(begin) => {
            if core.tracker.complete_start() {
                debug!(
                    "{}: capture {} started on pid {}",
                    core.config.name, begin.capture_id, begin.pid
                );
                core.listener.on_capture_started(&begin);
            } else {
                warn!(
                    "{}: duplicate start acknowledgment ignored",
                    core.config.name
                );
            }
            Dispatch::Continue
        }
        CaptureResponse::Events { events } => {
            core.listener.on_capture_events(events);
            Dispatch::Continue
        }
        CaptureResponse::CaptureFinished(end) => {
            debug!(
                "{}: capture {} finished (dropped_events={})",
                core.config.name, end.capture_id, end.dropped_events
            );
            Dispatch::Finished
        }
    }
}

/// Terminal path for every session, solicited or not. Drops the stream
/// handle, delivers the last listener callback, then unlocks the state
/// machine for the next session.
async fn finish_capture(core: Arc<SessionCore>, failure: Option<CaptureFailure>) {
    // The read half is already gone; dropping the write half releases the
    // last of the stream's remote resources.
    core.sink.lock().await.take();

    let solicited = core.tracker.state() == SessionState::Stopping
        || core.try_abort.load(Ordering::Relaxed);

    if solicited {
        info!("{}: capture session finished", core.config.name);
        core.listener.on_capture_finished();
    } else {
        let failure = failure.unwrap_or(CaptureFailure::UnexpectedEnd);
        warn!("{}: capture session failed: {}", core.config.name, failure);
        core.listener.on_capture_failed(&failure);
    }

    core.tracker.complete_stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::NullListener;
    use crate::transport::channel;

    #[test]
    fn config_builder_sets_policy() {
        let config = ClientConfig::new("test")
            .with_unexpected_message_policy(UnexpectedMessagePolicy::Fail);
        assert_eq!(
            config.unexpected_message_policy,
            UnexpectedMessagePolicy::Fail
        );
    }

    #[tokio::test]
    async fn abort_without_session_is_a_noop() {
        let (transport, _acceptor) = channel::pair(8);
        let client = CaptureClient::new(Arc::new(transport), Arc::new(NullListener));
        assert!(!client.try_abort_capture());
        assert_eq!(client.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn stop_without_session_returns_false() {
        let (transport, _acceptor) = channel::pair(8);
        let client = CaptureClient::new(Arc::new(transport), Arc::new(NullListener));
        assert!(!client.stop_capture().await);
        assert!(!client.is_capturing());
    }
}
