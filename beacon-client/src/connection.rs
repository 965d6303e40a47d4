//! Connection monitor.
//!
//! Drives the pure [`EndpointState`] machine from beacon-core and performs
//! the actions it asks for:
//!
//! ```text
//! TransportEvent / connect() → EndpointState::on_event → Actions
//!                                                         ├─ Subscribe     → Transport::subscribe
//!                                                         ├─ ClearContacts → ContactStore::clear_all
//!                                                         ├─ Disconnect    → Transport::disconnect
//!                                                         └─ EmitStatus    → watch channel
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use beacon_core::{Action, EndpointState, EndpointStatus, Event};
use tokio::sync::{mpsc, watch, Mutex};

use crate::config::Configuration;
use crate::store::{ContactStore, StoreError};
use crate::transport::{Transport, TransportError, TransportEvent};

/// Keeps the visible endpoint status in step with the transport.
pub struct ConnectionMonitor<T: Transport> {
    transport: Arc<T>,
    config: Configuration,
    store: Arc<ContactStore>,
    state: Mutex<EndpointState>,
    status: watch::Sender<EndpointStatus>,
}

impl<T: Transport> std::fmt::Debug for ConnectionMonitor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ConnectionMonitor<T> {
    /// Create a monitor; nothing is attempted until [`connect`](Self::connect).
    pub fn new(transport: Arc<T>, config: Configuration, store: Arc<ContactStore>) -> Self {
        let (status, _) = watch::channel(EndpointStatus::Initial);
        Self {
            transport,
            config,
            store,
            state: Mutex::new(EndpointState::new()),
            status,
        }
    }

    /// Current endpoint status.
    pub fn status(&self) -> EndpointStatus {
        self.status.borrow().clone()
    }

    /// Watch the endpoint status.
    pub fn subscribe_status(&self) -> watch::Receiver<EndpointStatus> {
        self.status.subscribe()
    }

    /// Connect with the current configuration.
    ///
    /// Transport failures do not return an error: they become the
    /// endpoint status. Only a store failure while clearing the roster is
    /// returned.
    pub async fn connect(&self) -> Result<EndpointStatus, StoreError> {
        let mut state = self.state.lock().await;
        if !self.step(&mut state, Event::ConnectRequested).await? {
            // Already connecting or connected
            return Ok(state.status().clone());
        }

        let settings = match self.config.endpoint_settings() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Not connecting: {}", e);
                let event = Event::ConfigurationIncomplete {
                    reason: e.to_string(),
                };
                self.step(&mut state, event).await?;
                return Ok(state.status().clone());
            }
        };

        tracing::info!("Connecting to {}", settings.server_uri());
        let event = match self.transport.connect(&settings).await {
            Ok(()) => Event::ConnectSucceeded {
                connection_id: settings.connection_id(),
            },
            Err(TransportError::AuthenticationFailed(reason)) => {
                tracing::warn!("Broker rejected credentials: {}", reason);
                Event::AuthenticationFailed { reason }
            }
            Err(e) => {
                tracing::warn!("Connection to {} failed: {}", settings.server_uri(), e);
                Event::ConnectFailed {
                    reason: e.to_string(),
                }
            }
        };
        self.step(&mut state, event).await?;
        Ok(state.status().clone())
    }

    /// Disconnect on request.
    pub async fn disconnect(&self) -> Result<EndpointStatus, StoreError> {
        let mut state = self.state.lock().await;
        self.step(&mut state, Event::DisconnectRequested).await?;
        Ok(state.status().clone())
    }

    /// Fold a connection change the transport reported on its own.
    pub async fn handle_event(&self, event: TransportEvent) -> Result<EndpointStatus, StoreError> {
        let event = match event {
            TransportEvent::Connected {
                server_uri,
                client_id,
            } => Event::ConnectSucceeded {
                connection_id: format!("{}/{}", server_uri, client_id),
            },
            TransportEvent::ConnectionLost { reason } => Event::ConnectionLost { reason },
            TransportEvent::AuthenticationFailed { reason } => {
                Event::AuthenticationFailed { reason }
            }
            TransportEvent::ConnectFailed { reason } => Event::ConnectFailed { reason },
        };
        let mut state = self.state.lock().await;
        self.step(&mut state, event).await?;
        Ok(state.status().clone())
    }

    /// Follow transport events until the channel closes.
    pub async fn run(&self, mut events: mpsc::Receiver<TransportEvent>) -> Result<(), StoreError> {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await?;
        }
        Ok(())
    }

    /// Feed `event` to the state machine and execute the actions, including
    /// those of follow-up events. Returns whether a connect was requested.
    async fn step(&self, state: &mut EndpointState, event: Event) -> Result<bool, StoreError> {
        let mut connect_requested = false;
        let mut events = VecDeque::from([event]);

        while let Some(event) = events.pop_front() {
            let (next, actions) = state.clone().on_event(event);
            *state = next;

            for action in actions {
                match action {
                    Action::Connect => connect_requested = true,
                    Action::Disconnect => {
                        if let Err(e) = self.transport.disconnect().await {
                            tracing::warn!("Disconnect failed: {}", e);
                        }
                    }
                    Action::Subscribe => {
                        if let Err(e) = self.subscribe().await {
                            tracing::warn!("Subscribe failed: {}", e);
                            events.push_back(Event::ConnectFailed {
                                reason: e.to_string(),
                            });
                        }
                    }
                    Action::ClearContacts => {
                        let cleared = self.store.clear_all()?;
                        tracing::info!("Broker changed, cleared {} contacts", cleared);
                    }
                    Action::EmitStatus(status) => {
                        tracing::debug!("Endpoint status: {}", status);
                        self.status.send_replace(status);
                    }
                }
            }
        }
        Ok(connect_requested)
    }

    async fn subscribe(&self) -> Result<(), TransportError> {
        let Ok(settings) = self.config.endpoint_settings() else {
            return Ok(());
        };
        if settings.subscriptions.is_empty() {
            return Ok(());
        }
        let topics: Vec<String> = settings.subscriptions.into_iter().collect();
        tracing::debug!("Subscribing to {} topics", topics.len());
        self.transport.subscribe(&topics, settings.sub_qos).await
    }
}
