//! Replay captured traffic into a roster.
//!
//! The capture is JSON lines, one inbound envelope per line:
//!
//! ```text
//! {"topic":"owntracks/alice/phone","payload":{"_type":"location",...}}
//! {"topic":"owntracks/alice/phone/info","payload":""}
//! ```
//!
//! An object payload is sent as its JSON text, a string payload as is, and
//! an empty or missing payload is a clear.

use anyhow::{Context, Result};
use beacon_client::{Configuration, ContactStore, Reconciled, ReconciliationEngine};
use beacon_core::Contact;
use beacon_types::Inbound;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct CapturedEnvelope {
    topic: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    retained: bool,
}

impl CapturedEnvelope {
    fn into_inbound(self) -> Inbound {
        let payload = match self.payload {
            Value::Null => Vec::new(),
            Value::String(text) => text.into_bytes(),
            other => other.to_string().into_bytes(),
        };
        let inbound = Inbound::new(self.topic, payload);
        if self.retained {
            inbound.retained()
        } else {
            inbound
        }
    }
}

/// What a replay did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Lines read, excluding blank lines.
    pub lines: u64,
    /// Lines that were not a valid envelope.
    pub skipped: u64,
    /// Merges that changed a contact.
    pub applied: u64,
    /// Locations older than the stored one.
    pub stale: u64,
    /// Payloads that failed to decode.
    pub decode_failures: u64,
    /// Contacts cleared.
    pub clears: u64,
    /// Remote commands seen.
    pub commands: u64,
}

/// Run the replay command.
pub async fn run(config: Configuration, capture: &Path) -> Result<()> {
    let text = tokio::fs::read_to_string(capture)
        .await
        .with_context(|| format!("Failed to read capture {}", capture.display()))?;

    let (summary, contacts) = replay(config, &text)?;
    print!("{}", render_roster(&contacts));
    println!();
    println!(
        "{} envelopes: {} applied, {} stale, {} undecodable, {} cleared, {} commands, {} skipped",
        summary.lines,
        summary.applied,
        summary.stale,
        summary.decode_failures,
        summary.clears,
        summary.commands,
        summary.skipped
    );
    Ok(())
}

/// Feed every envelope in `capture` through a fresh engine.
fn replay(config: Configuration, capture: &str) -> Result<(ReplaySummary, Vec<Contact>)> {
    let engine = ReconciliationEngine::new(Arc::new(ContactStore::new()), config);
    let mut summary = ReplaySummary::default();

    for (number, line) in capture.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        summary.lines += 1;
        let envelope: CapturedEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Skipping line {}: {}", number + 1, e);
                summary.skipped += 1;
                continue;
            }
        };
        if let Reconciled::Command(command) = engine.handle(&envelope.into_inbound())? {
            tracing::info!("Remote command: {}", command.action.as_str());
        }
    }

    let metrics = engine.metrics();
    summary.applied = metrics.applied.load(Ordering::Relaxed);
    summary.stale = metrics.stale.load(Ordering::Relaxed);
    summary.decode_failures = metrics.decode_failures.load(Ordering::Relaxed);
    summary.clears = metrics.clears.load(Ordering::Relaxed);
    summary.commands = metrics.commands.load(Ordering::Relaxed);

    Ok((summary, engine.store().contacts()?))
}

/// One line per contact, in display order.
fn render_roster(contacts: &[Contact]) -> String {
    if contacts.is_empty() {
        return "No contacts\n".to_string();
    }
    let width = contacts
        .iter()
        .map(|contact| contact.display_name().len())
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    for contact in contacts {
        let seen = contact
            .location_timestamp()
            .map(|tst| format!(" (tst {})", tst))
            .unwrap_or_default();
        out.push_str(&format!(
            "{:<width$}  {}{}  [{}]\n",
            contact.display_name(),
            contact.location_summary(),
            seen,
            contact.id,
            width = width
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_client::MemoryPreferenceStore;
    use tempfile::tempdir;

    fn configuration() -> Configuration {
        Configuration::new(Arc::new(MemoryPreferenceStore::new()))
    }

    const CAPTURE: &str = r#"
{"topic":"owntracks/alice/phone/info","payload":{"_type":"card","name":"Alice"}}
{"topic":"owntracks/alice/phone","payload":{"_type":"location","lat":52.5,"lon":13.4,"tst":20}}
{"topic":"owntracks/alice/phone","payload":{"_type":"location","lat":52.0,"lon":13.0,"tst":10}}
{"topic":"owntracks/bob/tablet","payload":"{\"_type\":\"location\",\"lat\":48.1,\"lon\":11.6,\"tst\":30}","retained":true}
{"topic":"owntracks/carol/watch/info","payload":{"_type":"card","name":"Carol"}}
{"topic":"owntracks/dave/phone","payload":{"_type":"location","lat":1,"lon":2,"tst":5}}
{"topic":"owntracks/dave/phone"}
{"topic":"owntracks/erin/phone","payload":{"_type":"location","lat":"x"}}
{"topic":"owntracks/user/device/cmd","payload":{"_type":"cmd","action":"reportLocation"}}
not json
"#;

    #[test]
    fn replay_builds_roster() {
        let (summary, contacts) = replay(configuration(), CAPTURE).unwrap();

        let names: Vec<&str> = contacts.iter().map(|c| c.display_name()).collect();
        assert_eq!(names, vec!["tablet", "Alice", "Carol"]);
        assert_eq!(
            summary,
            ReplaySummary {
                lines: 10,
                skipped: 1,
                applied: 5,
                stale: 1,
                decode_failures: 1,
                clears: 1,
                commands: 1,
            }
        );
    }

    #[test]
    fn roster_rendering() {
        let (_, contacts) = replay(configuration(), CAPTURE).unwrap();
        let out = render_roster(&contacts);

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("Alice "));
        assert!(lines[1].contains("52.50000, 13.40000 (tst 20)"));
        assert!(lines[2].contains("location unknown"));
        assert!(lines[2].ends_with("[owntracks/carol/watch]"));

        assert_eq!(render_roster(&[]), "No contacts\n");
    }

    #[tokio::test]
    async fn run_reads_capture_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capture.jsonl");
        tokio::fs::write(&path, CAPTURE).await.unwrap();

        assert!(run(configuration(), &path).await.is_ok());
        assert!(run(configuration(), &dir.path().join("missing.jsonl"))
            .await
            .is_err());
    }
}
