//! Outbound publish tracking.
//!
//! Every publish is in one of two places until its outcome is known:
//!
//! ```text
//! push → queued ──take_next──▶ in flight ──settle──▶ gone
//! ```
//!
//! Queued publishes leave in the order they were pushed. Capacity bounds
//! queued and in-flight publishes together, so a stalled transport
//! eventually makes new publishes fail fast instead of piling up. Nothing
//! is retried here: acknowledged and failed publishes are settled alike.

use std::collections::{HashMap, VecDeque};

use beacon_types::{Outbound, PublishId};
use thiserror::Error;

/// Default number of queued plus in-flight publishes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// Buffer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Queued plus in-flight publishes reached the capacity.
    #[error("outbound buffer full (capacity: {capacity})")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },
}

/// An encoded envelope and the id its handle waits on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPublish {
    /// Identifier tying the publish to its handle.
    pub id: PublishId,
    /// The encoded envelope.
    pub outbound: Outbound,
}

impl QueuedPublish {
    /// Wrap an envelope under a fresh id.
    pub fn new(outbound: Outbound) -> Self {
        Self {
            id: PublishId::new(),
            outbound,
        }
    }
}

/// Queued and in-flight publishes.
#[derive(Debug)]
pub struct OutboundBuffer {
    capacity: usize,
    queue: VecDeque<QueuedPublish>,
    in_flight: HashMap<PublishId, Outbound>,
}

impl OutboundBuffer {
    /// Create a buffer holding at most `capacity` unsettled publishes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Queue a publish behind the ones already queued.
    pub fn push(&mut self, publish: QueuedPublish) -> Result<(), BufferError> {
        if self.is_full() {
            return Err(BufferError::Full {
                capacity: self.capacity,
            });
        }
        self.queue.push_back(publish);
        Ok(())
    }

    /// Oldest queued publish, now counted as in flight.
    pub fn take_next(&mut self) -> Option<QueuedPublish> {
        let publish = self.queue.pop_front()?;
        self.in_flight.insert(publish.id, publish.outbound.clone());
        Some(publish)
    }

    /// Forget an in-flight publish whose outcome is known.
    ///
    /// Returns its envelope, or `None` if `id` was not in flight.
    pub fn settle(&mut self, id: &PublishId) -> Option<Outbound> {
        self.in_flight.remove(id)
    }

    /// Whether `id` is queued or in flight.
    pub fn contains(&self, id: &PublishId) -> bool {
        self.in_flight.contains_key(id) || self.queue.iter().any(|publish| publish.id == *id)
    }

    /// Publishes waiting for the transport.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Publishes handed to the transport.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether a push would be rejected.
    pub fn is_full(&self) -> bool {
        self.queue.len() + self.in_flight.len() >= self.capacity
    }

    /// Maximum number of unsettled publishes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for OutboundBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
