//! Reconciliation engine.
//!
//! Turns inbound transport envelopes into contact store mutations:
//!
//! ```text
//! Inbound bytes → decode → Message → ContactStore::apply → ContactEvent
//! ```
//!
//! Malformed payloads are discarded one by one; they never stop the
//! engine. Only a [`StoreError`] is fatal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use beacon_core::{MergeOutcome, PreferenceKey};
use beacon_types::{decode, Command, ContactId, Inbound, Message};
use tokio::sync::{broadcast, mpsc};

use crate::config::Configuration;
use crate::store::{ContactStore, StoreError};

/// Counters for inbound traffic.
///
/// All counters are monotonically increasing.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Envelopes handled.
    pub received: AtomicU64,
    /// Merges that changed a contact.
    pub applied: AtomicU64,
    /// Locations discarded for being older than the stored one.
    pub stale: AtomicU64,
    /// Payloads that failed to decode.
    pub decode_failures: AtomicU64,
    /// Contacts cleared, by empty payload or preference change.
    pub clears: AtomicU64,
    /// Remote commands surfaced to the caller.
    pub commands: AtomicU64,
}

/// What handling one envelope did.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// The message was merged into a contact.
    Merged {
        /// Contact the message belongs to.
        id: ContactId,
        /// Result of the merge.
        outcome: MergeOutcome,
    },
    /// An empty payload cleared a contact.
    Cleared {
        /// Contact that was cleared.
        id: ContactId,
        /// Whether the contact existed.
        existed: bool,
    },
    /// A remote command for this device.
    Command(Command),
    /// The envelope was dropped (malformed, a command while remote
    /// commands are disabled, or a command not on our command topic).
    Discarded,
}

/// Applies inbound messages to a [`ContactStore`].
#[derive(Debug)]
pub struct ReconciliationEngine {
    store: Arc<ContactStore>,
    config: Configuration,
    metrics: EngineMetrics,
}

impl ReconciliationEngine {
    /// Create an engine over `store`.
    pub fn new(store: Arc<ContactStore>, config: Configuration) -> Self {
        Self {
            store,
            config,
            metrics: EngineMetrics::default(),
        }
    }

    /// The store this engine writes to.
    pub fn store(&self) -> &Arc<ContactStore> {
        &self.store
    }

    /// Inbound traffic counters.
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Handle one inbound envelope.
    ///
    /// An empty payload is the transport's clear signal for the identity
    /// derived from the routing key.
    pub fn handle(&self, inbound: &Inbound) -> Result<Reconciled, StoreError> {
        self.metrics.received.fetch_add(1, Ordering::Relaxed);
        let id = ContactId::from_routing_key(&inbound.routing_key);

        if inbound.payload.is_empty() {
            let existed = self.store.clear(&id)?;
            if existed {
                self.metrics.clears.fetch_add(1, Ordering::Relaxed);
            }
            tracing::debug!("Clear for {} (existed: {})", id, existed);
            return Ok(Reconciled::Cleared { id, existed });
        }

        let message = match decode(&inbound.payload) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.decode_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Discarding message on {}: {}", inbound.routing_key, e);
                return Ok(Reconciled::Discarded);
            }
        };

        if let Message::Command(command) = message {
            if !self.config.get_bool(PreferenceKey::Cmd) {
                tracing::debug!("Remote commands disabled, dropping {}", command.action.as_str());
                return Ok(Reconciled::Discarded);
            }
            if self.config.is_mqtt_mode() && inbound.routing_key != self.config.command_topic() {
                tracing::warn!(
                    "Dropping {} command on foreign topic {}",
                    command.action.as_str(),
                    inbound.routing_key
                );
                return Ok(Reconciled::Discarded);
            }
            self.metrics.commands.fetch_add(1, Ordering::Relaxed);
            return Ok(Reconciled::Command(command));
        }

        let outcome = self.store.apply(&id, &message)?;
        match outcome {
            MergeOutcome::Created | MergeOutcome::Updated => {
                self.metrics.applied.fetch_add(1, Ordering::Relaxed);
            }
            MergeOutcome::Stale => {
                self.metrics.stale.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Stale {} for {}", message.kind().as_str(), id);
            }
            MergeOutcome::Unchanged | MergeOutcome::Ignored => {}
        }
        Ok(Reconciled::Merged { id, outcome })
    }

    /// React to a changed preference.
    ///
    /// A change to anything that determines which broker we talk to makes
    /// the roster meaningless, so it is cleared (MQTT mode only). Returns
    /// the number of contacts cleared.
    pub fn handle_preference_change(&self, name: &str) -> Result<usize, StoreError> {
        let Some(key) = PreferenceKey::from_name(name) else {
            return Ok(0);
        };
        if !key.affects_connection() || !self.config.is_mqtt_mode() {
            return Ok(0);
        }
        tracing::info!("Connection preference {} changed, clearing contacts", key);
        self.clear_all()
    }

    /// Clear every contact.
    pub fn clear_all(&self) -> Result<usize, StoreError> {
        let cleared = self.store.clear_all()?;
        self.metrics.clears.fetch_add(cleared as u64, Ordering::Relaxed);
        Ok(cleared)
    }

    /// Run until the inbound channel closes.
    ///
    /// Also follows preference changes. Commands are forwarded to
    /// `commands` when given; a closed command receiver is not an error.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<Inbound>,
        commands: Option<mpsc::Sender<Command>>,
    ) -> Result<(), StoreError> {
        let mut changes = self.config.subscribe();
        let mut following_changes = true;

        loop {
            tokio::select! {
                received = inbound.recv() => {
                    let Some(envelope) = received else {
                        tracing::debug!("Inbound channel closed, engine stopping");
                        return Ok(());
                    };
                    if let Reconciled::Command(command) = self.handle(&envelope)? {
                        if let Some(commands) = &commands {
                            let _ = commands.send(command).await;
                        }
                    }
                }
                change = changes.recv(), if following_changes => match change {
                    Ok(name) => {
                        self.handle_preference_change(&name)?;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // Missed changes may have moved the broker
                        tracing::warn!("Missed {} preference changes, clearing contacts", missed);
                        if self.config.is_mqtt_mode() {
                            self.clear_all()?;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        following_changes = false;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::MemoryPreferenceStore;
    use crate::store::ContactEvent;
    use beacon_core::MODE_HTTP;
    use beacon_types::CommandAction;
    use std::time::Duration;

    fn engine() -> ReconciliationEngine {
        let config = Configuration::new(Arc::new(MemoryPreferenceStore::new()));
        ReconciliationEngine::new(Arc::new(ContactStore::new()), config)
    }

    fn location(topic: &str, tst: u64) -> Inbound {
        Inbound::new(
            topic,
            format!(r#"{{"_type":"location","lat":52.5,"lon":13.4,"tst":{}}}"#, tst),
        )
    }

    fn card(topic: &str, name: &str) -> Inbound {
        Inbound::new(
            topic,
            format!(r#"{{"_type":"card","name":"{}","face":"ZmFjZQ=="}}"#, name),
        )
    }

    fn count(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    // ===========================================
    // Merge Tests
    // ===========================================

    #[test]
    fn location_creates_contact() {
        let engine = engine();
        let result = engine.handle(&location("owntracks/alice/phone", 10)).unwrap();

        let id = ContactId::from_routing_key("owntracks/alice/phone");
        assert_eq!(
            result,
            Reconciled::Merged {
                id: id.clone(),
                outcome: MergeOutcome::Created
            }
        );
        let contact = engine.store().get(&id).unwrap().unwrap();
        assert_eq!(contact.location_timestamp(), Some(10));
    }

    #[test]
    fn same_location_twice_is_idempotent() {
        let engine = engine();
        engine.handle(&location("owntracks/alice/phone", 10)).unwrap();
        let before = engine.store().contacts().unwrap();

        let result = engine.handle(&location("owntracks/alice/phone", 10)).unwrap();

        assert!(matches!(
            result,
            Reconciled::Merged {
                outcome: MergeOutcome::Unchanged,
                ..
            }
        ));
        assert_eq!(engine.store().contacts().unwrap(), before);
    }

    #[test]
    fn older_location_is_stale() {
        let engine = engine();
        engine.handle(&location("owntracks/alice/phone", 10)).unwrap();
        engine.handle(&location("owntracks/alice/phone", 5)).unwrap();

        let id = ContactId::from_routing_key("owntracks/alice/phone");
        let contact = engine.store().get(&id).unwrap().unwrap();
        assert_eq!(contact.location_timestamp(), Some(10));
        assert_eq!(count(&engine.metrics().stale), 1);
        assert_eq!(count(&engine.metrics().applied), 1);
    }

    #[test]
    fn card_and_location_merge_into_one_contact() {
        let engine = engine();
        engine.handle(&card("owntracks/alice/phone/info", "Alice")).unwrap();
        engine.handle(&location("owntracks/alice/phone", 10)).unwrap();

        let contacts = engine.store().contacts().unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].display_name(), "Alice");
        assert_eq!(contacts[0].location_timestamp(), Some(10));
    }

    #[test]
    fn waypoint_and_location_merge_into_one_contact() {
        let engine = engine();
        engine.handle(&location("owntracks/alice/phone", 10)).unwrap();
        engine
            .handle(&Inbound::new(
                "owntracks/alice/phone/waypoint",
                r#"{"_type":"waypoint","desc":"office","lat":48.85,"lon":2.35,"tst":5,"rad":100}"#,
            ))
            .unwrap();

        let contacts = engine.store().contacts().unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].id.as_str(), "owntracks/alice/phone");
        assert_eq!(contacts[0].display_name(), "phone");
    }

    #[test]
    fn card_without_location_shows_unknown() {
        let engine = engine();
        engine.handle(&card("owntracks/bob/tab/info", "Bob")).unwrap();

        let contact = &engine.store().contacts().unwrap()[0];
        assert!(contact.location.is_none());
        assert_eq!(contact.location_summary(), "location unknown");
    }

    // ===========================================
    // Clear Tests
    // ===========================================

    #[test]
    fn empty_payload_on_info_clears_base_identity() {
        let engine = engine();
        engine.handle(&card("owntracks/alice/phone/info", "Alice")).unwrap();
        engine.handle(&location("owntracks/alice/phone", 10)).unwrap();

        let result = engine
            .handle(&Inbound::new("owntracks/alice/phone/info", Vec::<u8>::new()))
            .unwrap();

        let id = ContactId::from_routing_key("owntracks/alice/phone");
        assert_eq!(result, Reconciled::Cleared { id: id.clone(), existed: true });
        assert!(engine.store().get(&id).unwrap().is_none());
        assert_eq!(count(&engine.metrics().clears), 1);
    }

    #[test]
    fn cleared_contact_reappears_without_old_card() {
        let engine = engine();
        engine.handle(&card("owntracks/alice/phone/info", "Alice")).unwrap();
        engine
            .handle(&Inbound::new("owntracks/alice/phone", Vec::<u8>::new()))
            .unwrap();
        engine.handle(&location("owntracks/alice/phone", 3)).unwrap();

        let contact = &engine.store().contacts().unwrap()[0];
        assert!(contact.name.is_none());
        assert!(contact.face.is_none());
        assert_eq!(contact.display_name(), "phone");
    }

    // ===========================================
    // Failure Tests
    // ===========================================

    #[test]
    fn malformed_payloads_are_discarded() {
        let engine = engine();
        for payload in [
            &br#"{"_type":"location","lat":52.5"#[..],
            br#"{"_type":"teleport"}"#,
            br#"{"lat":1,"lon":2,"tst":3}"#,
            br#"{"_type":"location","lat":"north","lon":2,"tst":3}"#,
            b"[1,2,3]",
        ] {
            let result = engine
                .handle(&Inbound::new("owntracks/alice/phone", payload))
                .unwrap();
            assert_eq!(result, Reconciled::Discarded);
        }

        assert_eq!(count(&engine.metrics().decode_failures), 5);
        assert!(engine.store().is_empty().unwrap());

        // Valid traffic still flows
        engine.handle(&location("owntracks/alice/phone", 1)).unwrap();
        assert_eq!(engine.store().len().unwrap(), 1);
    }

    // ===========================================
    // Command Tests
    // ===========================================

    #[test]
    fn commands_surface_when_enabled() {
        let engine = engine();
        let result = engine
            .handle(&Inbound::new(
                "owntracks/user/device/cmd",
                r#"{"_type":"cmd","action":"reportLocation"}"#,
            ))
            .unwrap();

        assert_eq!(
            result,
            Reconciled::Command(Command {
                action: CommandAction::ReportLocation
            })
        );
        assert!(engine.store().is_empty().unwrap());
    }

    #[test]
    fn commands_dropped_when_disabled() {
        let engine = engine();
        engine.config.set_bool(PreferenceKey::Cmd, false).unwrap();

        let result = engine
            .handle(&Inbound::new(
                "owntracks/user/device/cmd",
                r#"{"_type":"cmd","action":"reportLocation"}"#,
            ))
            .unwrap();

        assert_eq!(result, Reconciled::Discarded);
        assert_eq!(count(&engine.metrics().commands), 0);
    }

    #[test]
    fn commands_on_other_topics_are_dropped() {
        let engine = engine();
        let restart = r#"{"_type":"cmd","action":"restart"}"#;

        for topic in ["owntracks/mallory/x", "owntracks/mallory/x/cmd", "owntracks/user/device"] {
            let result = engine.handle(&Inbound::new(topic, restart)).unwrap();
            assert_eq!(result, Reconciled::Discarded, "{}", topic);
        }
        assert_eq!(count(&engine.metrics().commands), 0);
        assert!(engine.store().is_empty().unwrap());
    }

    #[test]
    fn command_topic_follows_device_preferences() {
        let engine = engine();
        engine.config.set_string(PreferenceKey::Username, "alice").unwrap();
        engine.config.set_string(PreferenceKey::DeviceId, "phone").unwrap();
        let restart = r#"{"_type":"cmd","action":"restart"}"#;

        let old = engine
            .handle(&Inbound::new("owntracks/user/device/cmd", restart))
            .unwrap();
        assert_eq!(old, Reconciled::Discarded);

        let own = engine
            .handle(&Inbound::new("owntracks/alice/phone/cmd", restart))
            .unwrap();
        assert_eq!(
            own,
            Reconciled::Command(Command {
                action: CommandAction::Restart
            })
        );
    }

    // ===========================================
    // Preference Change Tests
    // ===========================================

    #[test]
    fn connection_preference_change_clears_store() {
        let engine = engine();
        engine.handle(&location("owntracks/alice/phone", 1)).unwrap();
        engine.handle(&location("owntracks/bob/phone", 1)).unwrap();

        assert_eq!(engine.handle_preference_change("tid").unwrap(), 0);
        assert_eq!(engine.handle_preference_change("unknownKey").unwrap(), 0);
        assert_eq!(engine.store().len().unwrap(), 2);

        assert_eq!(engine.handle_preference_change("host").unwrap(), 2);
        assert!(engine.store().is_empty().unwrap());
    }

    #[test]
    fn http_mode_keeps_contacts_on_connection_change() {
        let engine = engine();
        engine.config.set_int(PreferenceKey::Mode, MODE_HTTP).unwrap();
        engine.handle(&location("owntracks/alice/phone", 1)).unwrap();

        assert_eq!(engine.handle_preference_change("host").unwrap(), 0);
        assert_eq!(engine.store().len().unwrap(), 1);
    }

    // ===========================================
    // Run Loop Tests
    // ===========================================

    #[tokio::test]
    async fn run_applies_inbound_and_forwards_commands() {
        let engine = engine();
        let mut events = engine.store().subscribe();
        let (tx, rx) = mpsc::channel(8);
        let (command_tx, mut command_rx) = mpsc::channel(8);

        tx.send(location("owntracks/alice/phone", 10)).await.unwrap();
        tx.send(Inbound::new(
            "owntracks/user/device/cmd",
            r#"{"_type":"cmd","action":"restart"}"#,
        ))
        .await
        .unwrap();
        drop(tx);

        engine.run(rx, Some(command_tx)).await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), ContactEvent::Updated(_)));
        assert_eq!(
            command_rx.recv().await.unwrap().action,
            CommandAction::Restart
        );
    }

    #[tokio::test]
    async fn run_clears_on_connection_preference_change() {
        let engine = Arc::new(engine());
        let (tx, rx) = mpsc::channel(8);

        let runner = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.run(rx, None).await })
        };

        tx.send(location("owntracks/alice/phone", 10)).await.unwrap();
        wait_until(|| engine.store().len().unwrap() == 1).await;

        engine
            .config
            .set_string(PreferenceKey::Host, "other.example")
            .unwrap();
        wait_until(|| engine.store().is_empty().unwrap()).await;

        drop(tx);
        runner.await.unwrap().unwrap();
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }
}
