//! Connection lifecycle state machine.
//!
//! ```text
//! Connecting ──► Authenticating ──► Active ──► Closed
//!      │               │              │
//!      └───────────────┴──────────────┴──────► Failed
//! ```
//!
//! `Closed` and `Failed` are terminal. The current state is published on a
//! `watch` channel so callers can wait for `Active` or observe failure.

use crate::domain::error::ConnectionFailure;
use std::fmt;
use tokio::sync::watch;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Active,
    Closed,
    Failed(ConnectionFailure),
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Active => "active",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed(_) => "failed",
        }
    }

    /// The failure to hand to callers once terminal.
    pub fn failure(&self) -> Option<ConnectionFailure> {
        match self {
            ConnectionState::Closed => Some(ConnectionFailure::Closed),
            ConnectionState::Failed(failure) => Some(failure.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of receiving `connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// `Authenticating → Active`.
    Activated,
    /// Already active; a repeated `connected`.
    Duplicate,
    /// Not authenticating; the message is out of sequence.
    OutOfSequence,
}

/// Owner of the state; transitions are checked.
#[derive(Debug)]
pub struct Lifecycle {
    state: watch::Sender<ConnectionState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self { state }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// `Connecting → Authenticating`. Returns false on any other state.
    pub fn begin_authentication(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Authenticating;
                true
            } else {
                false
            }
        })
    }

    /// Handle a `connected` reply.
    pub fn activate(&self) -> Activation {
        let mut outcome = Activation::OutOfSequence;
        self.state.send_if_modified(|state| match state {
            ConnectionState::Authenticating => {
                *state = ConnectionState::Active;
                outcome = Activation::Activated;
                true
            }
            ConnectionState::Active => {
                outcome = Activation::Duplicate;
                false
            }
            _ => false,
        });
        outcome
    }

    /// Move to `Closed` (for [`ConnectionFailure::Closed`]) or `Failed`.
    ///
    /// Returns false if the state was already terminal; only the first
    /// terminal transition wins.
    pub fn terminate(&self, failure: &ConnectionFailure) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = match failure {
                ConnectionFailure::Closed => ConnectionState::Closed,
                other => ConnectionState::Failed(other.clone()),
            };
            true
        })
    }

    /// Resolve once `Active`, or with the failure if terminal first.
    pub async fn wait_active(&self) -> Result<(), ConnectionFailure> {
        let mut rx = self.state.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            match current {
                ConnectionState::Active => return Ok(()),
                terminal if terminal.is_terminal() => {
                    return Err(terminal.failure().unwrap_or(ConnectionFailure::Closed));
                }
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(ConnectionFailure::Closed);
            }
        }
    }
}
