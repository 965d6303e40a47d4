//! Mock transport for testing.
//!
//! Captures published envelopes and subscriptions for verification, and
//! can be told to fail or stall upcoming calls.

use super::{Transport, TransportError};
use async_trait::async_trait;
use beacon_core::EndpointSettings;
use beacon_types::{Outbound, Qos};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while the publisher
/// or connection monitor owns another.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connection_id: Option<String>,
    connect_attempts: usize,
    published: Vec<Outbound>,
    subscriptions: Vec<(String, Qos)>,
    fail_next_connect: Option<String>,
    reject_next_credentials: Option<String>,
    fail_next_publish: Option<String>,
    stall_next_publish: bool,
}

impl MockTransport {
    /// Create a new, disconnected mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock transport that is already connected.
    pub fn connected() -> Self {
        let transport = Self::new();
        transport.lock().connected = true;
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get all envelopes that were published.
    pub fn published(&self) -> Vec<Outbound> {
        self.lock().published.clone()
    }

    /// Get the last envelope that was published.
    pub fn last_published(&self) -> Option<Outbound> {
        self.lock().published.last().cloned()
    }

    /// Get every topic subscribed to, with its qos.
    pub fn subscriptions(&self) -> Vec<(String, Qos)> {
        self.lock().subscriptions.clone()
    }

    /// Broker identity of the current or last connection.
    pub fn connection_id(&self) -> Option<String> {
        self.lock().connection_id.clone()
    }

    /// Number of connect() calls so far.
    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next connect() to be rejected for bad credentials.
    pub fn reject_next_credentials(&self, reason: &str) {
        self.lock().reject_next_credentials = Some(reason.to_string());
    }

    /// Cause the next publish() to fail with the given error.
    pub fn fail_next_publish(&self, error: &str) {
        self.lock().fail_next_publish = Some(error.to_string());
    }

    /// Cause the next publish() to never complete.
    pub fn stall_next_publish(&self) {
        self.lock().stall_next_publish = true;
    }

    /// Simulate the connection dropping.
    pub fn drop_connection(&self) {
        self.lock().connected = false;
    }

    /// Clear all state (envelopes, subscriptions, connection).
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, settings: &EndpointSettings) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.connect_attempts += 1;

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        if let Some(reason) = inner.reject_next_credentials.take() {
            return Err(TransportError::AuthenticationFailed(reason));
        }

        inner.connected = true;
        inner.connection_id = Some(settings.connection_id());
        Ok(())
    }

    async fn subscribe(&self, topics: &[String], qos: Qos) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        inner
            .subscriptions
            .extend(topics.iter().map(|topic| (topic.clone(), qos)));
        Ok(())
    }

    async fn publish(&self, outbound: Outbound) -> Result<(), TransportError> {
        let stall = {
            let mut inner = self.lock();

            if !inner.connected {
                return Err(TransportError::NotConnected);
            }

            // Check for forced failure
            if let Some(error) = inner.fail_next_publish.take() {
                return Err(TransportError::PublishFailed(error));
            }

            inner.published.push(outbound);
            std::mem::take(&mut inner.stall_next_publish)
        };

        if stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.lock().connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{PreferenceKey, PreferenceSnapshot};
    use std::time::Duration;

    fn settings(host: &str) -> EndpointSettings {
        let prefs = PreferenceSnapshot::new().with(PreferenceKey::Host, host);
        EndpointSettings::from_preferences(&prefs).unwrap()
    }

    fn outbound(payload: &[u8]) -> Outbound {
        Outbound {
            routing_key: "owntracks/user/device".into(),
            payload: payload.to_vec(),
            qos: Qos::AtLeastOnce,
            retained: false,
        }
    }

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_connects() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport.connect(&settings("broker.example")).await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(
            transport.connection_id(),
            Some("ssl://broker.example:8883/device".to_string())
        );
        assert_eq!(transport.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn mock_transport_records_publishes() {
        let transport = MockTransport::connected();

        transport.publish(outbound(b"one")).await.unwrap();
        transport.publish(outbound(b"two")).await.unwrap();

        let published = transport.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].payload, b"one");
        assert_eq!(transport.last_published().unwrap().payload, b"two");
    }

    #[tokio::test]
    async fn mock_transport_records_subscriptions() {
        let transport = MockTransport::connected();
        let topics = vec!["a/+".to_string(), "b/#".to_string()];

        transport.subscribe(&topics, Qos::ExactlyOnce).await.unwrap();

        assert_eq!(
            transport.subscriptions(),
            vec![
                ("a/+".to_string(), Qos::ExactlyOnce),
                ("b/#".to_string(), Qos::ExactlyOnce)
            ]
        );
    }

    #[tokio::test]
    async fn mock_transport_disconnects() {
        let transport = MockTransport::connected();
        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
    }

    // ===========================================
    // Error Condition Tests
    // ===========================================

    #[tokio::test]
    async fn publish_without_connect_fails() {
        let transport = MockTransport::new();
        let result = transport.publish(outbound(b"data")).await;
        assert_eq!(result, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn forced_connect_failure() {
        let transport = MockTransport::new();
        transport.fail_next_connect("network unreachable");

        let result = transport.connect(&settings("broker.example")).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!transport.is_connected());

        // Next connect should work
        transport.connect(&settings("broker.example")).await.unwrap();
        assert_eq!(transport.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn rejected_credentials() {
        let transport = MockTransport::new();
        transport.reject_next_credentials("Not authorized");

        let result = transport.connect(&settings("broker.example")).await;
        assert_eq!(
            result,
            Err(TransportError::AuthenticationFailed("Not authorized".into()))
        );
    }

    #[tokio::test]
    async fn forced_publish_failure() {
        let transport = MockTransport::connected();
        transport.fail_next_publish("broker gone");

        let result = transport.publish(outbound(b"data")).await;
        assert!(matches!(result, Err(TransportError::PublishFailed(_))));
        assert!(transport.published().is_empty());

        // Next publish should work
        transport.publish(outbound(b"data")).await.unwrap();
    }

    #[tokio::test]
    async fn stalled_publish_never_completes() {
        let transport = MockTransport::connected();
        transport.stall_next_publish();

        let result =
            tokio::time::timeout(Duration::from_millis(50), transport.publish(outbound(b"x")))
                .await;
        assert!(result.is_err());

        // The envelope was still handed over
        assert_eq!(transport.published().len(), 1);
    }

    // ===========================================
    // Clone and Shared State Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        transport1.connect(&settings("broker.example")).await.unwrap();
        assert!(transport2.is_connected());

        transport2.publish(outbound(b"from t2")).await.unwrap();
        assert_eq!(transport1.published().len(), 1);
    }

    #[tokio::test]
    async fn mock_transport_reset_clears_all() {
        let transport = MockTransport::connected();
        transport.publish(outbound(b"data")).await.unwrap();

        transport.reset();

        assert!(!transport.is_connected());
        assert!(transport.published().is_empty());
        assert!(transport.connection_id().is_none());
    }
}
