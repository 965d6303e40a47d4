//! Identity types for beacon.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Topic suffixes a device publishes under besides its base topic.
///
/// Cards arrive on `<base>/info`, transitions on `<base>/event` and
/// waypoints on `<base>/waypoint`. All of them belong to the contact
/// identified by `<base>`.
const IDENTITY_SUFFIXES: [&str; 3] = ["/info", "/event", "/waypoint"];

/// The identity of a remote device, derived from its transport routing key.
///
/// The routing key is a hierarchical topic such as `owntracks/alice/phone`.
/// Sub-topics a device publishes on are folded back onto the base topic so
/// that every message from one device lands on one contact.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(String);

impl ContactId {
    /// Derive the contact identity from a routing key.
    pub fn from_routing_key(routing_key: &str) -> Self {
        let base = IDENTITY_SUFFIXES
            .iter()
            .find_map(|suffix| routing_key.strip_suffix(suffix))
            .unwrap_or(routing_key);
        Self(base.to_string())
    }

    /// The full identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last path segment, used as a display fallback.
    pub fn last_segment(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContactId({})", self.0)
    }
}

/// A unique identifier for an outbound publish.
///
/// UUID v4 format (16 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublishId(uuid::Uuid);

impl PublishId {
    /// Create a new random PublishId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for PublishId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PublishId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PublishId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublishId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_topic_is_its_own_identity() {
        let id = ContactId::from_routing_key("owntracks/alice/phone");
        assert_eq!(id.as_str(), "owntracks/alice/phone");
    }

    #[test]
    fn device_sub_topics_fold_onto_base() {
        let base = ContactId::from_routing_key("owntracks/alice/phone");
        for topic in [
            "owntracks/alice/phone/info",
            "owntracks/alice/phone/event",
            "owntracks/alice/phone/waypoint",
        ] {
            assert_eq!(ContactId::from_routing_key(topic), base, "{}", topic);
        }
    }

    #[test]
    fn only_one_suffix_is_stripped() {
        let id = ContactId::from_routing_key("owntracks/info/info");
        assert_eq!(id.as_str(), "owntracks/info");
    }

    #[test]
    fn last_segment_of_identity() {
        let id = ContactId::from_routing_key("owntracks/alice/phone");
        assert_eq!(id.last_segment(), "phone");

        let flat = ContactId::from_routing_key("phone");
        assert_eq!(flat.last_segment(), "phone");
    }

    #[test]
    fn contact_id_serializes_as_plain_string() {
        let id = ContactId::from_routing_key("owntracks/bob/tablet");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"owntracks/bob/tablet\"");
    }

    #[test]
    fn publish_id_unique() {
        let a = PublishId::new();
        let b = PublishId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn publish_id_debug_format() {
        let id = PublishId::new();
        let debug = format!("{:?}", id);
        assert!(debug.starts_with("PublishId("));
    }
}
