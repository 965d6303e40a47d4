//! Concurrent contact store.
//!
//! Each identity owns one slot: an `Arc<Mutex<Option<Contact>>>` kept in a
//! `DashMap`. The map's shard lock is only held long enough to fetch or
//! create the slot; merges then serialize on the slot's own mutex, so
//! disjoint identities never wait on each other.
//!
//! Clearing a contact leaves its slot holding `None`. The slot is then
//! dropped from the map, under its own lock, unless another caller still
//! holds a handle to it; a merge that fetched the slot before the clear
//! must find it still in the map. Slots that could not be dropped stay as
//! empty tombstones until the next clear of that identity.
//!
//! Change notifications are sent while the slot lock is held, so per
//! identity they arrive in merge order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use beacon_core::{display_order, merge, Contact, MergeOutcome};
use beacon_types::{ContactId, Message};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;

/// Default capacity of the change notification channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

type Slot = Arc<Mutex<Option<Contact>>>;

/// Contact store errors.
///
/// These are invariant violations, not input errors: malformed messages
/// never produce a `StoreError`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A thread panicked while merging into this contact.
    #[error("contact slot poisoned: {0}")]
    Poisoned(ContactId),
}

/// Change notification.
///
/// Consumers must tolerate duplicates and may re-read by identity.
#[derive(Debug, Clone, PartialEq)]
pub enum ContactEvent {
    /// The contact was created or changed; carries the full new state.
    Updated(Contact),
    /// The contact was cleared.
    Removed(ContactId),
}

/// Identity -> reconciled contact, safe under concurrent merges.
#[derive(Debug)]
pub struct ContactStore {
    slots: DashMap<ContactId, Slot>,
    sequence: AtomicU64,
    events: broadcast::Sender<ContactEvent>,
}

impl ContactStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create an empty store whose notification channel buffers `capacity`
    /// events per slow receiver.
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            slots: DashMap::new(),
            sequence: AtomicU64::new(0),
            events,
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ContactEvent> {
        self.events.subscribe()
    }

    fn slot(&self, id: &ContactId) -> Slot {
        // Clone the Arc out so the shard lock is released before locking
        // the slot.
        Arc::clone(self.slots.entry(id.clone()).or_default().value())
    }

    fn existing_slot(&self, id: &ContactId) -> Option<Slot> {
        self.slots.get(id).map(|slot| Arc::clone(slot.value()))
    }

    fn lock<'a>(slot: &'a Slot, id: &ContactId) -> Result<MutexGuard<'a, Option<Contact>>, StoreError> {
        slot.lock().map_err(|_| StoreError::Poisoned(id.clone()))
    }

    /// Merge `message` into the contact for `id`.
    pub fn apply(&self, id: &ContactId, message: &Message) -> Result<MergeOutcome, StoreError> {
        let slot = self.slot(id);
        let mut contact = Self::lock(&slot, id)?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let outcome = merge(&mut contact, id, message, sequence);

        if outcome.is_change() {
            if let Some(snapshot) = contact.as_ref() {
                // No receivers is fine
                let _ = self.events.send(ContactEvent::Updated(snapshot.clone()));
            }
        }
        Ok(outcome)
    }

    /// Remove the contact for `id` with all its fields.
    ///
    /// Returns whether a contact existed.
    pub fn clear(&self, id: &ContactId) -> Result<bool, StoreError> {
        let Some(slot) = self.existing_slot(id) else {
            return Ok(false);
        };
        let mut contact = Self::lock(&slot, id)?;
        let existed = contact.take().is_some();
        if existed {
            let _ = self.events.send(ContactEvent::Removed(id.clone()));
        }
        self.compact(id, &slot);
        Ok(existed)
    }

    /// Drop the emptied slot for `id` if only the map and the caller hold
    /// it. Must be called with the slot locked.
    fn compact(&self, id: &ContactId, slot: &Slot) {
        self.slots.remove_if(id, |_, current| {
            Arc::ptr_eq(current, slot) && Arc::strong_count(current) == 2
        });
    }

    /// Remove every contact. Returns how many existed.
    pub fn clear_all(&self) -> Result<usize, StoreError> {
        let ids: Vec<ContactId> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        let mut cleared = 0;
        for id in ids {
            if self.clear(&id)? {
                cleared += 1;
            }
        }
        tracing::debug!("Cleared {} contacts", cleared);
        Ok(cleared)
    }

    /// Current state of the contact for `id`.
    pub fn get(&self, id: &ContactId) -> Result<Option<Contact>, StoreError> {
        match self.existing_slot(id) {
            Some(slot) => Ok(Self::lock(&slot, id)?.clone()),
            None => Ok(None),
        }
    }

    /// All present contacts in display order: most recent location first,
    /// then by display name.
    pub fn contacts(&self) -> Result<Vec<Contact>, StoreError> {
        let mut contacts = Vec::new();
        for (id, slot) in self.slots() {
            if let Some(contact) = Self::lock(&slot, &id)?.as_ref() {
                contacts.push(contact.clone());
            }
        }
        contacts.sort_by(display_order);
        Ok(contacts)
    }

    /// Number of present contacts.
    pub fn len(&self) -> Result<usize, StoreError> {
        self.contacts().map(|contacts| contacts.len())
    }

    /// Whether no contact is present.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        self.len().map(|len| len == 0)
    }

    /// Snapshot of the slot map, so no shard lock is held while slots are
    /// locked.
    fn slots(&self) -> Vec<(ContactId, Slot)> {
        self.slots
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }
}

impl Default for ContactStore {
    fn default() -> Self {
        Self::new()
    }
}
