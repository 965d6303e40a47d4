//! Endpoint connection state machine for beacon.
//!
//! This module provides a pure, side-effect-free state machine that folds
//! transport connection events into a visible endpoint status. The state
//! machine takes events as input and produces a new state plus a list of
//! actions to execute.
//!
//! The actual I/O (connecting, subscribing, clearing the roster) is performed
//! by beacon-client, not by this module.

use std::fmt;

/// Visible status of the broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EndpointStatus {
    /// Nothing attempted yet.
    #[default]
    Initial,
    /// Connection attempt in progress.
    Connecting,
    /// Connected to the broker.
    Connected,
    /// Not connected, optionally because the connection was lost.
    Disconnected {
        /// Why the connection went away, if it was not requested.
        reason: Option<String>,
    },
    /// The last attempt failed (including authentication failures).
    Error {
        /// Reason reported by the transport.
        reason: String,
    },
    /// The configuration is not usable for connecting.
    ConfigurationIncomplete {
        /// What is missing.
        reason: String,
    },
}

impl EndpointStatus {
    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }

    /// Failure reason, if the status carries one.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Disconnected { reason } => reason.as_deref(),
            Self::Error { reason } | Self::ConfigurationIncomplete { reason } => Some(reason),
            Self::Initial | Self::Connecting | Self::Connected => None,
        }
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => f.write_str("Not connected"),
            Self::Connecting => f.write_str("Connecting"),
            Self::Connected => f.write_str("Connected"),
            Self::Disconnected { reason: None } => f.write_str("Disconnected"),
            Self::Disconnected {
                reason: Some(reason),
            } => write!(f, "Disconnected: {}", reason),
            Self::Error { reason } => write!(f, "Not connected: {}", reason),
            Self::ConfigurationIncomplete { reason } => {
                write!(f, "Configuration incomplete: {}", reason)
            }
        }
    }
}

/// Endpoint state machine - NO I/O, just state transitions.
///
/// Besides the visible status it remembers which broker the last successful
/// connection went to, so that connecting somewhere else clears the roster.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndpointState {
    status: EndpointStatus,
    last_connection_id: Option<String>,
}

impl EndpointState {
    /// Create a new state machine in the Initial state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current visible status.
    pub fn status(&self) -> &EndpointStatus {
        &self.status
    }

    /// Identity of the broker of the last successful connection.
    pub fn last_connection_id(&self) -> Option<&str> {
        self.last_connection_id.as_deref()
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (beacon-client)
    /// is responsible for executing the returned actions. An
    /// [`Action::EmitStatus`] is only produced when the status changes.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        let Self {
            status,
            mut last_connection_id,
        } = self;
        let mut actions = Vec::new();

        let next = match (&status, event) {
            (EndpointStatus::Connecting | EndpointStatus::Connected, Event::ConnectRequested) => {
                status.clone()
            }
            (_, Event::ConnectRequested) => {
                actions.push(Action::Connect);
                EndpointStatus::Connecting
            }

            (_, Event::ConfigurationIncomplete { reason }) => {
                EndpointStatus::ConfigurationIncomplete { reason }
            }

            (_, Event::ConnectSucceeded { connection_id }) => {
                if last_connection_id
                    .as_ref()
                    .is_some_and(|last| *last != connection_id)
                {
                    actions.push(Action::ClearContacts);
                }
                last_connection_id = Some(connection_id);
                actions.push(Action::Subscribe);
                EndpointStatus::Connected
            }

            (_, Event::ConnectFailed { reason }) | (_, Event::AuthenticationFailed { reason }) => {
                EndpointStatus::Error { reason }
            }

            (EndpointStatus::Connected | EndpointStatus::Connecting, Event::ConnectionLost { reason }) => {
                EndpointStatus::Disconnected {
                    reason: Some(reason),
                }
            }
            (_, Event::ConnectionLost { .. }) => status.clone(),

            (EndpointStatus::Connected | EndpointStatus::Connecting, Event::DisconnectRequested) => {
                actions.push(Action::Disconnect);
                EndpointStatus::Disconnected { reason: None }
            }
            (_, Event::DisconnectRequested) => status.clone(),
        };

        if next != status {
            actions.push(Action::EmitStatus(next.clone()));
        }

        (
            Self {
                status: next,
                last_connection_id,
            },
            actions,
        )
    }
}

/// Events that can occur in the endpoint lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A connection was requested.
    ConnectRequested,
    /// The configuration was checked and found unusable.
    ConfigurationIncomplete {
        /// What is missing.
        reason: String,
    },
    /// The transport connected.
    ConnectSucceeded {
        /// Broker identity (server URI and client id).
        connection_id: String,
    },
    /// The transport failed to connect.
    ConnectFailed {
        /// Error message describing the failure.
        reason: String,
    },
    /// The broker rejected the credentials.
    AuthenticationFailed {
        /// Error message describing the failure.
        reason: String,
    },
    /// An established connection was lost.
    ConnectionLost {
        /// Reason for disconnection.
        reason: String,
    },
    /// A disconnect was requested.
    DisconnectRequested,
}

/// Actions to be executed by beacon-client.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Initiate the transport connection.
    Connect,
    /// Disconnect the transport.
    Disconnect,
    /// Subscribe to the configured topics.
    Subscribe,
    /// Drop every contact; the broker changed.
    ClearContacts,
    /// Publish the new status to observers.
    EmitStatus(EndpointStatus),
}
