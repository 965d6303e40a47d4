//! # beacon-client
//!
//! Client library for the beacon location-sharing client.
//!
//! This is the main library that applications use to keep a roster of
//! remote devices and to publish their own position.
//!
//! ## Features
//!
//! - **Contact Store**: per-identity locking, recency arbitration, change
//!   notifications
//! - **Reconciliation Engine**: tolerant of malformed, duplicated and
//!   out-of-order traffic
//! - **Outbound Publisher**: encode-at-call-time publishes with in-flight
//!   tracking
//! - **Preferences**: typed configuration over pluggable stores (memory,
//!   JSON file) with legacy migration
//! - **Transport Abstraction**: pluggable publish/subscribe transport (mock
//!   included)
//!
//! ## Example
//!
//! ```ignore
//! use beacon_client::{LocationClient, MemoryPreferenceStore};
//!
//! let client = LocationClient::new(transport, Arc::new(MemoryPreferenceStore::new()));
//! client.connect().await?;
//!
//! // Feed inbound traffic, read the roster
//! client.handle_inbound(&inbound)?;
//! let contacts = client.contacts()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod connection;
pub mod engine;
pub mod preferences;
pub mod publisher;
pub mod store;
pub mod transport;

pub use client::{ClientError, LocationClient};
pub use config::{ConfigError, Configuration, ImportReport, CONFIGURATION_TYPE};
pub use connection::ConnectionMonitor;
pub use engine::{EngineMetrics, Reconciled, ReconciliationEngine};
pub use preferences::{
    migrate_legacy, FilePreferenceStore, MemoryPreferenceStore, PreferenceError, PreferenceStore,
    StoredValue,
};
pub use publisher::{
    OutboundPublisher, PublishHandle, PublishOptions, PublishOutcome, PublisherMetrics,
};
pub use store::{ContactEvent, ContactStore, StoreError, DEFAULT_EVENT_CAPACITY};
pub use transport::{MockTransport, Transport, TransportError, TransportEvent};
