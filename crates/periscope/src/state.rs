//! Capture session lifecycle state
//!
//! One mutable state value behind one exclusive lock, with a notify signal
//! on every transition so stop callers can wait without polling. The
//! transition functions hold the lock only for the check-and-set; nothing
//! here touches I/O.

use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::warn;

/// Lifecycle state of a capture session.
///
/// Legal edges: Stopped → Starting → Started → Stopping → Stopped, plus
/// Starting → Stopped on abort or start failure. `Stopped` with nothing in
/// flight is both the initial and the terminal-success state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Stopped => "stopped",
            SessionState::Starting => "starting",
            SessionState::Started => "started",
            SessionState::Stopping => "stopping",
        }
    }
}

/// Owns the session state and its transition rules: the single source of
/// truth for whether a start, stop, or abort may proceed right now.
pub struct SessionTracker {
    state: Mutex<SessionState>,
    changed: Notify,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Stopped),
            changed: Notify::new(),
        }
    }

    /// Current state. The value can be stale the instant it is returned;
    /// synchronize through [`wait_while`](Self::wait_while) when ordering
    /// matters.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Claim the idle session for a new capture. Succeeds (state →
    /// Starting) iff the session is Stopped.
    pub fn try_begin_start(&self) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::Stopped {
                return false;
            }
            *state = SessionState::Starting;
        }
        self.changed.notify_waiters();
        true
    }

    /// Record the remote's start acknowledgment (Starting → Started).
    /// Outside Starting the call is ignored and logged; returns whether
    /// the state actually changed.
    pub fn complete_start(&self) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::Starting {
                warn!(
                    "complete_start ignored in state {}",
                    state.as_str()
                );
                return false;
            }
            *state = SessionState::Started;
        }
        self.changed.notify_waiters();
        true
    }

    /// Claim the stop (Started → Stopping). Returns false when a stop is
    /// already in flight or the session is already Stopped, which is how
    /// "stop requested twice" is detected.
    pub fn begin_stop(&self) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::Started {
                return false;
            }
            *state = SessionState::Stopping;
        }
        self.changed.notify_waiters();
        true
    }

    /// Force any non-Stopped state to Stopped. Idempotent; the only path
    /// back to Stopped. Wakes every waiter.
    pub fn complete_stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == SessionState::Stopped {
                return;
            }
            *state = SessionState::Stopped;
        }
        self.changed.notify_waiters();
    }

    /// Wait until `pred(state)` is false. Registers for the transition
    /// signal before re-checking so a wakeup between the check and the
    /// await is not lost.
    pub async fn wait_while<F>(&self, pred: F)
    where
        F: Fn(SessionState) -> bool,
    {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !pred(self.state()) {
                return;
            }
            notified.await;
        }
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn full_lifecycle_walks_legal_edges() {
        let tracker = SessionTracker::new();
        assert_eq!(tracker.state(), SessionState::Stopped);

        assert!(tracker.try_begin_start());
        assert_eq!(tracker.state(), SessionState::Starting);

        assert!(tracker.complete_start());
        assert_eq!(tracker.state(), SessionState::Started);

        assert!(tracker.begin_stop());
        assert_eq!(tracker.state(), SessionState::Stopping);

        tracker.complete_stop();
        assert_eq!(tracker.state(), SessionState::Stopped);
    }

    #[test]
    fn second_start_rejected_until_stopped() {
        let tracker = SessionTracker::new();
        assert!(tracker.try_begin_start());
        assert!(!tracker.try_begin_start());
        tracker.complete_stop();
        assert!(tracker.try_begin_start());
    }

    #[test]
    fn begin_stop_only_claims_once() {
        let tracker = SessionTracker::new();
        assert!(tracker.try_begin_start());
        assert!(tracker.complete_start());
        assert!(tracker.begin_stop());
        assert!(!tracker.begin_stop());
        tracker.complete_stop();
        assert!(!tracker.begin_stop());
    }

    #[test]
    fn complete_start_outside_starting_is_noop() {
        let tracker = SessionTracker::new();
        assert!(!tracker.complete_start());
        assert_eq!(tracker.state(), SessionState::Stopped);
    }

    #[test]
    fn complete_stop_is_idempotent() {
        let tracker = SessionTracker::new();
        assert!(tracker.try_begin_start());
        tracker.complete_stop();
        tracker.complete_stop();
        assert_eq!(tracker.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn wait_while_wakes_on_transition() {
        let tracker = Arc::new(SessionTracker::new());
        assert!(tracker.try_begin_start());

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                tracker
                    .wait_while(|s| s != SessionState::Stopped)
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        tracker.complete_stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake after complete_stop")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_while_returns_immediately_when_satisfied() {
        let tracker = SessionTracker::new();
        tokio::time::timeout(
            Duration::from_millis(100),
            tracker.wait_while(|s| s != SessionState::Stopped),
        )
        .await
        .expect("already stopped, must not block");
    }
}
