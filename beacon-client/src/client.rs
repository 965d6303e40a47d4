//! LocationClient - the main interface for beacon.
//!
//! This module provides [`LocationClient`], which wires the contact store,
//! reconciliation engine, outbound publisher and connection monitor around
//! one transport and one explicitly passed preference store.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────── Configuration ◄── PreferenceStore
//!            ▼
//! Inbound → ReconciliationEngine → ContactStore → ContactEvent
//! Local   → OutboundPublisher ───────────────────► Transport
//! Events  → ConnectionMonitor ──► EndpointStatus
//! ```
//!
//! # Example
//!
//! ```ignore
//! use beacon_client::{LocationClient, MemoryPreferenceStore, MockTransport};
//!
//! let client = LocationClient::new(MockTransport::new(), Arc::new(MemoryPreferenceStore::new()));
//! client.configuration().set_string(PreferenceKey::Host, "broker.example")?;
//! client.connect().await?;
//! client.report_location(Location::new(52.52, 13.40, now))?.outcome().await;
//! ```

use std::sync::Arc;

use beacon_core::{Contact, EndpointError, EndpointStatus, PreferenceKey};
use beacon_types::{Card, Command, ContactId, Inbound, Location, Message};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

use crate::config::{ConfigError, Configuration};
use crate::connection::ConnectionMonitor;
use crate::engine::{Reconciled, ReconciliationEngine};
use crate::preferences::{migrate_legacy, PreferenceError, PreferenceStore};
use crate::publisher::{OutboundPublisher, PublishHandle, PublishOptions};
use crate::store::{ContactEvent, ContactStore, StoreError};
use crate::transport::{Transport, TransportEvent};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Contact store invariant violated.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Preference store error.
    #[error("preference error: {0}")]
    Preference(#[from] PreferenceError),

    /// The configuration is not usable for publishing.
    #[error("endpoint not configured: {0}")]
    Endpoint(#[from] EndpointError),
}

/// The main location-sharing client.
pub struct LocationClient<T: Transport> {
    config: Configuration,
    engine: Arc<ReconciliationEngine>,
    publisher: OutboundPublisher<T>,
    connection: ConnectionMonitor<T>,
}

impl<T: Transport> std::fmt::Debug for LocationClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationClient")
            .field("connection", &self.connection)
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> LocationClient<T> {
    /// Create a client over `transport` reading preferences from
    /// `preferences`.
    pub fn new(transport: T, preferences: Arc<dyn PreferenceStore>) -> Self {
        let transport = Arc::new(transport);
        let config = Configuration::new(preferences);
        let store = Arc::new(ContactStore::new());
        Self {
            engine: Arc::new(ReconciliationEngine::new(Arc::clone(&store), config.clone())),
            publisher: OutboundPublisher::new(Arc::clone(&transport), config.clone()),
            connection: ConnectionMonitor::new(transport, config.clone(), store),
            config,
        }
    }

    /// Create a client after folding superseded preference stores into
    /// `preferences`.
    pub fn with_legacy_preferences(
        transport: T,
        preferences: Arc<dyn PreferenceStore>,
        legacy: &[&dyn PreferenceStore],
    ) -> Result<Self, ClientError> {
        migrate_legacy(preferences.as_ref(), legacy)?;
        Ok(Self::new(transport, preferences))
    }

    /// Typed preference access.
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// The reconciliation engine.
    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    /// The outbound publisher.
    pub fn publisher(&self) -> &OutboundPublisher<T> {
        &self.publisher
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to the configured broker.
    pub async fn connect(&self) -> Result<EndpointStatus, ClientError> {
        Ok(self.connection.connect().await?)
    }

    /// Disconnect from the broker.
    pub async fn disconnect(&self) -> Result<EndpointStatus, ClientError> {
        Ok(self.connection.disconnect().await?)
    }

    /// Current endpoint status.
    pub fn status(&self) -> EndpointStatus {
        self.connection.status()
    }

    /// Watch the endpoint status.
    pub fn subscribe_status(&self) -> watch::Receiver<EndpointStatus> {
        self.connection.subscribe_status()
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Publish `message` on this device's topic for its kind.
    pub fn publish(&self, message: &Message, options: PublishOptions) -> Result<PublishHandle, ClientError> {
        let settings = self.config.endpoint_settings()?;
        let topic = settings.topic_for(message.kind());
        Ok(self.publisher.publish(message, &topic, options))
    }

    /// Publish this device's location.
    ///
    /// The tracker id preference is filled in when the location has none.
    pub fn report_location(&self, mut location: Location) -> Result<PublishHandle, ClientError> {
        if location.tracker_id.is_none() {
            let tid = self.config.get_string(PreferenceKey::Tid);
            if !tid.trim().is_empty() {
                location.tracker_id = Some(tid);
            }
        }
        self.publish(&Message::Location(location), PublishOptions::default())
    }

    /// Publish this device's card. Cards are always retained.
    pub fn publish_card(&self, card: Card) -> Result<PublishHandle, ClientError> {
        self.publish(&Message::Card(card), PublishOptions::default())
    }

    // =========================================================================
    // Inbound & roster
    // =========================================================================

    /// Apply one inbound envelope.
    pub fn handle_inbound(&self, inbound: &Inbound) -> Result<Reconciled, ClientError> {
        Ok(self.engine.handle(inbound)?)
    }

    /// Remove a contact. Returns whether it existed.
    pub fn clear_contact(&self, id: &ContactId) -> Result<bool, ClientError> {
        Ok(self.engine.store().clear(id)?)
    }

    /// Remove every contact.
    pub fn clear_contacts(&self) -> Result<usize, ClientError> {
        Ok(self.engine.clear_all()?)
    }

    /// Current contact, if present.
    pub fn contact(&self, id: &ContactId) -> Result<Option<Contact>, ClientError> {
        Ok(self.engine.store().get(id)?)
    }

    /// All contacts in display order.
    pub fn contacts(&self) -> Result<Vec<Contact>, ClientError> {
        Ok(self.engine.store().contacts()?)
    }

    /// Subscribe to contact changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ContactEvent> {
        self.engine.store().subscribe()
    }

    /// Run the engine and the connection monitor until both channels
    /// close or a store error occurs.
    pub async fn run(
        &self,
        inbound: mpsc::Receiver<Inbound>,
        transport_events: mpsc::Receiver<TransportEvent>,
        commands: Option<mpsc::Sender<Command>>,
    ) -> Result<(), ClientError> {
        tokio::try_join!(
            self.engine.run(inbound, commands),
            self.connection.run(transport_events),
        )?;
        Ok(())
    }
}
