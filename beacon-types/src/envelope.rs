//! Routing envelopes exchanged with the transport.
//!
//! The transport delivers a routing key, the raw payload and some delivery
//! metadata. The core only reads the key and the payload; qos and the
//! retained flag are carried through for observability.

use serde::{Deserialize, Serialize};

/// Delivery guarantee tier requested from or reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Qos {
    /// Fire and forget.
    AtMostOnce = 0,
    /// Acknowledged delivery, duplicates possible.
    #[default]
    AtLeastOnce = 1,
    /// Exactly-once handshake.
    ExactlyOnce = 2,
}

impl Qos {
    /// Map a numeric tier onto a qos level.
    ///
    /// Values above 2 clamp to [`Qos::ExactlyOnce`], negative values to
    /// [`Qos::AtMostOnce`].
    pub fn from_level(level: i64) -> Self {
        match level {
            i64::MIN..=0 => Self::AtMostOnce,
            1 => Self::AtLeastOnce,
            _ => Self::ExactlyOnce,
        }
    }

    /// The numeric tier.
    pub fn level(self) -> u8 {
        self as u8
    }
}

/// A payload delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Hierarchical topic the payload arrived on.
    pub routing_key: String,
    /// Raw payload bytes (JSON, or empty for a clear).
    pub payload: Vec<u8>,
    /// Delivery tier reported by the transport.
    pub qos: Qos,
    /// Whether the broker replayed a retained payload.
    pub retained: bool,
}

impl Inbound {
    /// Create an inbound delivery with default metadata.
    pub fn new(routing_key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload: payload.into(),
            qos: Qos::AtLeastOnce,
            retained: false,
        }
    }

    /// Mark the delivery as a retained replay.
    pub fn retained(mut self) -> Self {
        self.retained = true;
        self
    }
}

/// A payload handed to the transport for publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Topic to publish on.
    pub routing_key: String,
    /// Encoded payload bytes.
    pub payload: Vec<u8>,
    /// Requested delivery tier.
    pub qos: Qos,
    /// Whether the broker should retain the payload.
    pub retained: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_from_level_clamps() {
        assert_eq!(Qos::from_level(-3), Qos::AtMostOnce);
        assert_eq!(Qos::from_level(0), Qos::AtMostOnce);
        assert_eq!(Qos::from_level(1), Qos::AtLeastOnce);
        assert_eq!(Qos::from_level(2), Qos::ExactlyOnce);
        assert_eq!(Qos::from_level(9), Qos::ExactlyOnce);
    }

    #[test]
    fn qos_level_roundtrip() {
        for qos in [Qos::AtMostOnce, Qos::AtLeastOnce, Qos::ExactlyOnce] {
            assert_eq!(Qos::from_level(i64::from(qos.level())), qos);
        }
    }

    #[test]
    fn inbound_builder() {
        let inbound = Inbound::new("owntracks/a/b", b"{}".to_vec()).retained();
        assert_eq!(inbound.routing_key, "owntracks/a/b");
        assert!(inbound.retained);
        assert_eq!(inbound.qos, Qos::AtLeastOnce);
    }
}
