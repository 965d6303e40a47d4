//! Outbound publisher.
//!
//! [`OutboundPublisher::publish`] encodes a message immediately, queues the
//! envelope in an [`OutboundBuffer`] and hands it to the transport on a
//! spawned task. The caller gets a [`PublishHandle`] that resolves to the
//! transport's verdict. There are no retries.
//!
//! ```text
//! Message → encode → OutboundBuffer → Transport::publish → PublishOutcome
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use beacon_core::{OutboundBuffer, PreferenceKey, QueuedPublish, DEFAULT_BUFFER_CAPACITY};
use beacon_types::{encode, Message, MessageKind, Outbound, PublishId, Qos};
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::config::Configuration;
use crate::transport::Transport;

/// Final state of one publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The transport accepted the envelope.
    Acknowledged,
    /// The publish did not go out.
    Failed(String),
}

impl PublishOutcome {
    /// Check if the transport accepted the envelope.
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged)
    }
}

/// Per-publish overrides. Unset fields come from preferences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Delivery tier; defaults to `pubQos`.
    pub qos: Option<Qos>,
    /// Retained flag; defaults to `pubRetain`. Cards are always retained.
    pub retained: Option<bool>,
}

impl PublishOptions {
    /// Override the delivery tier.
    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = Some(qos);
        self
    }

    /// Override the retained flag.
    pub fn with_retained(mut self, retained: bool) -> Self {
        self.retained = Some(retained);
        self
    }
}

/// Completion of a publish.
///
/// Dropping the handle abandons the outcome; the transport may still
/// deliver.
#[derive(Debug)]
pub struct PublishHandle {
    id: PublishId,
    outcome: oneshot::Receiver<PublishOutcome>,
}

impl PublishHandle {
    fn resolved(id: PublishId, outcome: PublishOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self { id, outcome: rx }
    }

    /// Identifier of the publish.
    pub fn id(&self) -> PublishId {
        self.id
    }

    /// Wait for the transport's verdict.
    pub async fn outcome(self) -> PublishOutcome {
        self.outcome
            .await
            .unwrap_or_else(|_| PublishOutcome::Failed("publisher task dropped".to_string()))
    }
}

/// Counters for outbound traffic.
#[derive(Debug, Default)]
pub struct PublisherMetrics {
    /// Publishes accepted into the buffer.
    pub queued: AtomicU64,
    /// Publishes the transport acknowledged.
    pub acknowledged: AtomicU64,
    /// Publishes the transport rejected.
    pub failed: AtomicU64,
    /// Publishes refused before reaching the transport.
    pub rejected: AtomicU64,
}

struct Shared {
    buffer: Mutex<OutboundBuffer>,
    waiters: DashMap<PublishId, oneshot::Sender<PublishOutcome>>,
    metrics: PublisherMetrics,
}

impl Shared {
    fn buffer(&self) -> MutexGuard<'_, OutboundBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, id: &PublishId, outcome: PublishOutcome) {
        if let Some((_, waiter)) = self.waiters.remove(id) {
            // Receiver gone means the caller abandoned the handle
            let _ = waiter.send(outcome);
        }
    }
}

/// Publishes locally generated messages through a [`Transport`].
pub struct OutboundPublisher<T: Transport> {
    transport: Arc<T>,
    config: Configuration,
    shared: Arc<Shared>,
}

impl<T: Transport> fmt::Debug for OutboundPublisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buffer = self.shared.buffer();
        f.debug_struct("OutboundPublisher")
            .field("queued", &buffer.queued())
            .field("in_flight", &buffer.in_flight())
            .field("capacity", &buffer.capacity())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> OutboundPublisher<T> {
    /// Create a publisher with the default buffer capacity.
    pub fn new(transport: Arc<T>, config: Configuration) -> Self {
        Self::with_capacity(transport, config, DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a publisher whose buffer holds at most `capacity` queued plus
    /// in-flight publishes.
    pub fn with_capacity(transport: Arc<T>, config: Configuration, capacity: usize) -> Self {
        Self {
            transport,
            config,
            shared: Arc::new(Shared {
                buffer: Mutex::new(OutboundBuffer::new(capacity)),
                waiters: DashMap::new(),
                metrics: PublisherMetrics::default(),
            }),
        }
    }

    /// Outbound traffic counters.
    pub fn metrics(&self) -> &PublisherMetrics {
        &self.shared.metrics
    }

    /// Publishes not yet handed to the transport.
    pub fn queued(&self) -> usize {
        self.shared.buffer().queued()
    }

    /// Publishes handed to the transport without a verdict yet.
    pub fn in_flight(&self) -> usize {
        self.shared.buffer().in_flight()
    }

    /// Whether `id` is still queued or in flight.
    pub fn is_outstanding(&self, id: &PublishId) -> bool {
        self.shared.waiters.contains_key(id)
    }

    /// Build the envelope for `message` on `routing_key`.
    ///
    /// The payload is `encode(message)` as of this call.
    pub fn envelope(&self, message: &Message, routing_key: &str, options: PublishOptions) -> Outbound {
        let qos = options
            .qos
            .unwrap_or_else(|| Qos::from_level(self.config.get_int(PreferenceKey::PubQos)));
        let retained = message.kind() == MessageKind::Card
            || options
                .retained
                .unwrap_or_else(|| self.config.get_bool(PreferenceKey::PubRetain));
        Outbound {
            routing_key: routing_key.to_string(),
            payload: encode(message),
            qos,
            retained,
        }
    }

    /// Publish `message` on `routing_key`.
    ///
    /// Never blocks on the network. The handle resolves as failed at once
    /// when the buffer is full or no async runtime is available.
    pub fn publish(&self, message: &Message, routing_key: &str, options: PublishOptions) -> PublishHandle {
        let publish = QueuedPublish::new(self.envelope(message, routing_key, options));
        let id = publish.id;

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                self.shared.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("No async runtime, dropping {} publish", message.kind().as_str());
                return PublishHandle::resolved(
                    id,
                    PublishOutcome::Failed("no async runtime available".to_string()),
                );
            }
        };

        let (tx, rx) = oneshot::channel();
        self.shared.waiters.insert(id, tx);
        if let Err(e) = self.shared.buffer().push(publish) {
            self.shared.waiters.remove(&id);
            self.shared.metrics.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Dropping {} publish: {}", message.kind().as_str(), e);
            return PublishHandle::resolved(id, PublishOutcome::Failed(e.to_string()));
        }
        self.shared.metrics.queued.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Queued {} publish {} on {}", message.kind().as_str(), id, routing_key);

        let transport = Arc::clone(&self.transport);
        let shared = Arc::clone(&self.shared);
        runtime.spawn(async move {
            // Hand over in queue order, whichever publish that is
            let Some(next) = shared.buffer().take_next() else {
                return;
            };
            let result = transport.publish(next.outbound).await;
            shared.buffer().settle(&next.id);

            let outcome = match result {
                Ok(()) => {
                    shared.metrics.acknowledged.fetch_add(1, Ordering::Relaxed);
                    PublishOutcome::Acknowledged
                }
                Err(e) => {
                    shared.metrics.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Publish {} failed: {}", next.id, e);
                    PublishOutcome::Failed(e.to_string())
                }
            };
            shared.resolve(&next.id, outcome);
        });

        PublishHandle { id, outcome: rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::MemoryPreferenceStore;
    use crate::transport::MockTransport;
    use beacon_types::{Card, Location};
    use std::time::Duration;

    const TOPIC: &str = "owntracks/user/device";

    fn configuration() -> Configuration {
        Configuration::new(Arc::new(MemoryPreferenceStore::new()))
    }

    fn publisher(transport: &MockTransport) -> OutboundPublisher<MockTransport> {
        OutboundPublisher::new(Arc::new(transport.clone()), configuration())
    }

    fn location(tst: u64) -> Message {
        Message::Location(Location::new(52.5, 13.4, tst))
    }

    // ===========================================
    // Publish Tests
    // ===========================================

    #[tokio::test]
    async fn publish_is_acknowledged() {
        let transport = MockTransport::connected();
        let publisher = publisher(&transport);

        let handle = publisher.publish(&location(10), TOPIC, PublishOptions::default());
        assert_eq!(handle.outcome().await, PublishOutcome::Acknowledged);

        let sent = transport.last_published().unwrap();
        assert_eq!(sent.routing_key, TOPIC);
        assert_eq!(sent.payload, encode(&location(10)));
        assert_eq!(publisher.metrics().acknowledged.load(Ordering::Relaxed), 1);
        assert_eq!(publisher.in_flight(), 0);
    }

    #[tokio::test]
    async fn qos_and_retain_default_from_preferences() {
        let transport = MockTransport::connected();
        let config = configuration();
        config.set_int(PreferenceKey::PubQos, 2).unwrap();
        config.set_bool(PreferenceKey::PubRetain, false).unwrap();
        let publisher = OutboundPublisher::new(Arc::new(transport.clone()), config);

        publisher
            .publish(&location(1), TOPIC, PublishOptions::default())
            .outcome()
            .await;
        let sent = transport.last_published().unwrap();
        assert_eq!(sent.qos, Qos::ExactlyOnce);
        assert!(!sent.retained);

        publisher
            .publish(
                &location(2),
                TOPIC,
                PublishOptions::default().with_qos(Qos::AtMostOnce),
            )
            .outcome()
            .await;
        assert_eq!(transport.last_published().unwrap().qos, Qos::AtMostOnce);
    }

    #[tokio::test]
    async fn cards_are_always_retained() {
        let transport = MockTransport::connected();
        let publisher = publisher(&transport);
        let card = Message::Card(Card {
            name: Some("Alice".into()),
            face: None,
        });

        publisher
            .publish(
                &card,
                "owntracks/user/device/info",
                PublishOptions::default().with_retained(false),
            )
            .outcome()
            .await;

        assert!(transport.last_published().unwrap().retained);
    }

    // ===========================================
    // Failure Tests
    // ===========================================

    #[tokio::test]
    async fn transport_failure_resolves_failed() {
        let transport = MockTransport::connected();
        transport.fail_next_publish("broker gone");
        let publisher = publisher(&transport);

        let outcome = publisher
            .publish(&location(1), TOPIC, PublishOptions::default())
            .outcome()
            .await;

        assert_eq!(
            outcome,
            PublishOutcome::Failed("publish failed: broker gone".to_string())
        );
        assert_eq!(publisher.metrics().failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn disconnected_transport_resolves_failed() {
        let transport = MockTransport::new();
        let publisher = publisher(&transport);

        let outcome = publisher
            .publish(&location(1), TOPIC, PublishOptions::default())
            .outcome()
            .await;

        assert_eq!(outcome, PublishOutcome::Failed("not connected".to_string()));
    }

    #[tokio::test]
    async fn full_buffer_fails_immediately() {
        let transport = MockTransport::connected();
        transport.stall_next_publish();
        let publisher =
            OutboundPublisher::with_capacity(Arc::new(transport.clone()), configuration(), 1);

        let stalled = publisher.publish(&location(1), TOPIC, PublishOptions::default());
        let rejected = publisher.publish(&location(2), TOPIC, PublishOptions::default());

        assert!(matches!(rejected.outcome().await, PublishOutcome::Failed(_)));
        assert_eq!(publisher.metrics().rejected.load(Ordering::Relaxed), 1);
        assert!(publisher.is_outstanding(&stalled.id()));
    }

    #[test]
    fn publish_without_runtime_fails() {
        let transport = MockTransport::connected();
        let publisher = publisher(&transport);

        let handle = publisher.publish(&location(1), TOPIC, PublishOptions::default());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        assert_eq!(
            runtime.block_on(handle.outcome()),
            PublishOutcome::Failed("no async runtime available".to_string())
        );
        assert!(transport.published().is_empty());
    }

    // ===========================================
    // In-Flight Tracking Tests
    // ===========================================

    #[tokio::test]
    async fn stalled_publish_stays_in_flight() {
        let transport = MockTransport::connected();
        transport.stall_next_publish();
        let publisher = publisher(&transport);

        let handle = publisher.publish(&location(1), TOPIC, PublishOptions::default());
        let waited = tokio::time::timeout(Duration::from_millis(50), handle.outcome()).await;

        assert!(waited.is_err());
        assert_eq!(publisher.in_flight(), 1);
        assert_eq!(publisher.queued(), 0);
    }

    #[tokio::test]
    async fn abandoned_handle_still_delivers() {
        let transport = MockTransport::connected();
        let publisher = publisher(&transport);

        drop(publisher.publish(&location(1), TOPIC, PublishOptions::default()));
        let follow_up = publisher.publish(&location(2), TOPIC, PublishOptions::default());
        follow_up.outcome().await;

        // Both went out, in order
        let published = transport.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].payload, encode(&location(1)));
        assert_eq!(published[1].payload, encode(&location(2)));
    }

    #[tokio::test]
    async fn payload_is_encoded_at_call_time() {
        let transport = MockTransport::connected();
        let publisher = publisher(&transport);
        let mut message = location(1);

        let handle = publisher.publish(&message, TOPIC, PublishOptions::default());
        if let Message::Location(location) = &mut message {
            location.timestamp = 99;
        }
        handle.outcome().await;

        assert_eq!(transport.last_published().unwrap().payload, encode(&location(1)));
    }
}
