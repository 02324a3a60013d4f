// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Connection state machine of the publish client.
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> Reconnecting
//!                                  |              |
//!                                  +--> Closed <--+
//! ```
//!
//! `Closed` is terminal: it is entered on an explicit disconnect or once the reconnect
//! budget is exhausted, and no event moves the machine out of it. Every applied transition
//! is reported to a [`ConnectionObserver`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::publisher::DRIVER_NAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempts: usize },
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempts } => write!(f, "reconnecting (attempt {attempts})"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Receives every applied state transition.
pub trait ConnectionObserver: Send + Sync {
    fn on_transition(&self, from: ConnectionState, to: ConnectionState);
}

/// Reports transitions to the log sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl ConnectionObserver for LoggingObserver {
    fn on_transition(&self, from: ConnectionState, to: ConnectionState) {
        match (from, to) {
            (ConnectionState::Connected, ConnectionState::Reconnecting { .. }) => {
                warn!(driver = DRIVER_NAME, "nats: disconnected");
            }
            (ConnectionState::Reconnecting { attempts }, ConnectionState::Connected) => {
                info!(
                    driver = DRIVER_NAME,
                    "nats: reconnected after {attempts} attempts"
                );
            }
            (_, ConnectionState::Closed) => {
                warn!(driver = DRIVER_NAME, "nats: connection closed");
            }
            (from, to) => debug!(driver = DRIVER_NAME, "nats: {from} -> {to}"),
        }
    }
}

pub struct ConnectionStateMachine {
    state: Mutex<ConnectionState>,
    max_reconnects: usize,
    observer: Arc<dyn ConnectionObserver>,
}

impl ConnectionStateMachine {
    #[must_use]
    pub fn new(max_reconnects: usize, observer: Arc<dyn ConnectionObserver>) -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            max_reconnects,
            observer,
        }
    }

    #[must_use]
    pub fn current(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.current() == ConnectionState::Connected
    }

    pub fn connecting(&self) -> bool {
        self.transition(|state| match state {
            ConnectionState::Disconnected => Some(ConnectionState::Connecting),
            _ => None,
        })
    }

    pub fn connected(&self) -> bool {
        self.transition(|state| match state {
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. } => {
                Some(ConnectionState::Connected)
            }
            _ => None,
        })
    }

    /// Connection lost. An established connection starts reconnecting; a failed initial
    /// connect falls back to `Disconnected`.
    pub fn disconnected(&self) -> bool {
        self.transition(|state| match state {
            ConnectionState::Connected => Some(ConnectionState::Reconnecting { attempts: 0 }),
            ConnectionState::Connecting => Some(ConnectionState::Disconnected),
            _ => None,
        })
    }

    /// Records a reconnect attempt; exceeding the budget closes the connection.
    pub fn reconnect_attempt(&self, attempts: usize) -> bool {
        let max_reconnects = self.max_reconnects;
        self.transition(|state| match state {
            ConnectionState::Reconnecting { .. } if attempts > max_reconnects => {
                Some(ConnectionState::Closed)
            }
            ConnectionState::Reconnecting { attempts: current } if attempts != current => {
                Some(ConnectionState::Reconnecting { attempts })
            }
            _ => None,
        })
    }

    pub fn closed(&self) -> bool {
        self.transition(|state| match state {
            ConnectionState::Closed => None,
            _ => Some(ConnectionState::Closed),
        })
    }

    // The observer runs after the lock is released.
    fn transition<F>(&self, next: F) -> bool
    where
        F: FnOnce(ConnectionState) -> Option<ConnectionState>,
    {
        let applied = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let from = *state;
            next(from).map(|to| {
                *state = to;
                (from, to)
            })
        };

        match applied {
            Some((from, to)) => {
                self.observer.on_transition(from, to);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ConnectionStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStateMachine")
            .field("state", &self.current())
            .field("max_reconnects", &self.max_reconnects)
            .finish()
    }
}
