//! Contact merge rules.
//!
//! A contact is the reconciled view of one remote device. This module decides
//! how a single inbound message changes a single contact slot; the caller
//! owns locking, sequencing and notification.
//!
//! Rules per slot:
//! - Absent + any roster message -> Present
//! - Present + `Location` -> applied when its `tst` is not older than the
//!   stored one (equal timestamps: last arrival wins), otherwise `Stale`
//! - Present + `Card` -> name and avatar replaced unconditionally
//! - `Transition`, `Waypoint`, `Lwt` only create the contact
//! - `Command` never touches the roster
//!
//! Clearing is not a message: the caller empties the slot.

use std::cmp::Ordering;

use beacon_types::{Card, ContactId, Location, Message};

/// Summary shown for a contact that has never reported a position.
pub const LOCATION_UNKNOWN: &str = "location unknown";

/// Result of merging one message into one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The slot was empty and now holds a contact.
    Created,
    /// The contact's fields changed.
    Updated,
    /// A location older than the stored one was discarded.
    Stale,
    /// The contact exists and the message changed nothing.
    Unchanged,
    /// The message kind does not touch the roster.
    Ignored,
}

impl MergeOutcome {
    /// Whether the slot changed and listeners should be told.
    pub fn is_change(self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }
}

/// Reconciled state of one remote device.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    /// Identity derived from the routing key.
    pub id: ContactId,
    /// Name from the latest card.
    pub name: Option<String>,
    /// Base64 avatar from the latest card.
    pub face: Option<String>,
    /// Latest accepted location.
    pub location: Option<Location>,
    /// Store sequence of the last change. Strictly increasing per store.
    pub sequence: u64,
}

impl Contact {
    /// A contact with no fields set.
    pub fn new(id: ContactId, sequence: u64) -> Self {
        Self {
            id,
            name: None,
            face: None,
            location: None,
            sequence,
        }
    }

    /// Name to show: card name, else latest tracker id, else the last
    /// segment of the identity.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| {
                self.location
                    .as_ref()
                    .and_then(|location| location.tracker_id.as_deref())
                    .filter(|tid| !tid.is_empty())
            })
            .unwrap_or_else(|| self.id.last_segment())
    }

    /// Timestamp of the latest accepted location.
    pub fn location_timestamp(&self) -> Option<u64> {
        self.location.as_ref().map(|location| location.timestamp)
    }

    /// One-line position summary. Never shows coordinates for a contact
    /// that has not reported a position.
    pub fn location_summary(&self) -> String {
        match &self.location {
            Some(location) => format!("{:.5}, {:.5}", location.latitude, location.longitude),
            None => LOCATION_UNKNOWN.to_string(),
        }
    }

    fn apply_location(&mut self, location: &Location, sequence: u64) -> MergeOutcome {
        match &self.location {
            Some(stored) if location.timestamp < stored.timestamp => MergeOutcome::Stale,
            Some(stored) if stored == location => MergeOutcome::Unchanged,
            _ => {
                self.location = Some(location.clone());
                self.sequence = sequence;
                MergeOutcome::Updated
            }
        }
    }

    fn apply_card(&mut self, card: &Card, sequence: u64) -> MergeOutcome {
        if self.name == card.name && self.face == card.face {
            return MergeOutcome::Unchanged;
        }
        self.name = card.name.clone();
        self.face = card.face.clone();
        self.sequence = sequence;
        MergeOutcome::Updated
    }
}

/// Merge one message into the slot for `id`.
///
/// `sequence` is recorded on the contact only when the outcome is a change.
pub fn merge(
    slot: &mut Option<Contact>,
    id: &ContactId,
    message: &Message,
    sequence: u64,
) -> MergeOutcome {
    if matches!(message, Message::Command(_)) {
        return MergeOutcome::Ignored;
    }

    let Some(contact) = slot.as_mut() else {
        let mut contact = Contact::new(id.clone(), sequence);
        match message {
            Message::Location(location) => contact.location = Some(location.clone()),
            Message::Card(card) => {
                contact.name = card.name.clone();
                contact.face = card.face.clone();
            }
            Message::Transition(_) | Message::Waypoint(_) | Message::Lwt(_) => {}
            Message::Command(_) => return MergeOutcome::Ignored,
        }
        *slot = Some(contact);
        return MergeOutcome::Created;
    };

    match message {
        Message::Location(location) => contact.apply_location(location, sequence),
        Message::Card(card) => contact.apply_card(card, sequence),
        Message::Transition(_) | Message::Waypoint(_) | Message::Lwt(_) => MergeOutcome::Unchanged,
        Message::Command(_) => MergeOutcome::Ignored,
    }
}

/// Display order: most recent location first, contacts without a location
/// last, then by display name, then by identity.
pub fn display_order(a: &Contact, b: &Contact) -> Ordering {
    b.location_timestamp()
        .cmp(&a.location_timestamp())
        .then_with(|| a.display_name().cmp(b.display_name()))
        .then_with(|| a.id.cmp(&b.id))
}
