//! The shared stop signal observed by every pump task.
//!
//! ```text
//! Running ──raise(reason)──▶ Stopping
//! ```
//!
//! The first raise records its reason and wakes every waiter. Later raises
//! are no-ops, so concurrent triggers never race each other.

use std::{fmt, sync::Arc};

use tokio::sync::watch;

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The caller asked to disconnect.
    Requested,
    /// The remote end closed the stream.
    RemoteClosed,
    /// A writer found its source queue closed.
    QueueClosed,
    /// Local input reached end of file.
    InputClosed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "disconnect requested"),
            Self::RemoteClosed => write!(f, "remote closed the connection"),
            Self::QueueClosed => write!(f, "message queue closed"),
            Self::InputClosed => write!(f, "local input closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Running,
    Stopping,
}

impl fmt::Display for PumpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Cloneable handle to one session's stop signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    state: Arc<watch::Sender<Option<StopReason>>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
        }
    }

    /// Moves the signal to `Stopping`. Returns `true` for the call that made
    /// the transition.
    pub fn raise(&self, reason: StopReason) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn state(&self) -> PumpState {
        if self.state.borrow().is_some() {
            PumpState::Stopping
        } else {
            PumpState::Running
        }
    }

    pub fn is_raised(&self) -> bool {
        self.state() == PumpState::Stopping
    }

    /// The reason recorded by the first raise, if any.
    pub fn reason(&self) -> Option<StopReason> {
        *self.state.borrow()
    }

    /// Resolves once the signal is raised, immediately if it already was.
    ///
    /// Safe to use as a `select!` branch: dropping the future loses nothing.
    pub async fn raised(&self) -> StopReason {
        let mut observer = self.state.subscribe();
        let reason = match observer.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(StopReason::Requested),
            // The sender lives as long as `self`, so this is unreachable in
            // practice.
            Err(_) => StopReason::Requested,
        };
        reason
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
