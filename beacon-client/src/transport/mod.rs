//! Transport abstraction for beacon.
//!
//! This module provides a pluggable transport layer that abstracts the
//! publish/subscribe connection (an MQTT client in production, mock for
//! testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` establishes a connection from [`EndpointSettings`]
//! - `subscribe()` registers interest in topics
//! - `publish()` hands one encoded envelope to the broker
//! - `disconnect()` gracefully terminates
//!
//! Inbound payloads and asynchronous connection changes are not pulled
//! through the trait: the transport pushes [`Inbound`](beacon_types::Inbound)
//! envelopes into the engine's channel and [`TransportEvent`]s into the
//! connection monitor.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.connect(&settings).await?;
//! transport.publish(outbound).await?;
//! ```

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use beacon_core::EndpointSettings;
use beacon_types::{Outbound, Qos};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Publish failed.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Subscribe failed.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// Operation timeout.
    #[error("timeout")]
    Timeout,
}

/// Connection changes reported by the transport outside of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport (re)connected on its own.
    Connected {
        /// URI of the broker connected to.
        server_uri: String,
        /// Client id used for the connection.
        client_id: String,
    },
    /// An established connection went away.
    ConnectionLost {
        /// Reason reported by the transport.
        reason: String,
    },
    /// The broker rejected the credentials.
    AuthenticationFailed {
        /// Reason reported by the transport.
        reason: String,
    },
    /// A connection attempt failed.
    ConnectFailed {
        /// Reason reported by the transport.
        reason: String,
    },
}

/// Transport trait for the publish/subscribe connection.
///
/// Implementations handle the underlying mechanism (MQTT, HTTP, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connect to the broker described by `settings`.
    async fn connect(&self, settings: &EndpointSettings) -> Result<(), TransportError>;

    /// Subscribe to `topics` at the given qos.
    async fn subscribe(&self, topics: &[String], qos: Qos) -> Result<(), TransportError>;

    /// Publish one envelope.
    ///
    /// Resolves once the transport knows the outcome.
    async fn publish(&self, outbound: Outbound) -> Result<(), TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
