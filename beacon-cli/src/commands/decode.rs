//! Decode a payload and show the typed message.

use anyhow::{Context, Result};
use beacon_types::{decode, encode, Message};

/// Run the decode command.
pub async fn run(payload: &[u8]) -> Result<()> {
    print!("{}", describe(payload)?);
    Ok(())
}

/// Typed view and canonical encoding of `payload`.
fn describe(payload: &[u8]) -> Result<String> {
    let message = decode(payload).context("Payload does not decode")?;
    let canonical = String::from_utf8(encode(&message)).context("Encoded payload is not UTF-8")?;

    let mut out = String::new();
    out.push_str(&format!("Type: {}\n", message.kind().as_str()));
    for (label, value) in summary(&message) {
        out.push_str(&format!("  {:<10} {}\n", label, value));
    }
    out.push_str(&format!("Canonical: {}\n", canonical));
    Ok(out)
}

fn summary(message: &Message) -> Vec<(&'static str, String)> {
    let mut fields = Vec::new();
    match message {
        Message::Location(location) => {
            fields.push(("position", format!("{:.5}, {:.5}", location.latitude, location.longitude)));
            fields.push(("timestamp", location.timestamp.to_string()));
            if let Some(accuracy) = location.accuracy {
                fields.push(("accuracy", format!("{} m", accuracy)));
            }
            if let Some(battery) = location.battery {
                fields.push(("battery", format!("{}%", battery)));
            }
            if let Some(tid) = &location.tracker_id {
                fields.push(("tracker", tid.clone()));
            }
        }
        Message::Card(card) => {
            fields.push(("name", card.name.clone().unwrap_or_else(|| "-".into())));
            let face = match card.face_bytes() {
                None => "none".to_string(),
                Some(Ok(bytes)) => format!("{} bytes", bytes.len()),
                Some(Err(_)) => "invalid base64".to_string(),
            };
            fields.push(("face", face));
        }
        Message::Transition(transition) => {
            fields.push(("event", transition.event.as_str().to_string()));
            fields.push(("region", transition.description.clone().unwrap_or_else(|| "-".into())));
            fields.push(("timestamp", transition.timestamp.to_string()));
        }
        Message::Waypoint(waypoint) => {
            fields.push(("region", waypoint.description.clone()));
            fields.push(("position", format!("{:.5}, {:.5}", waypoint.latitude, waypoint.longitude)));
            if let Some(radius) = waypoint.radius {
                fields.push(("radius", format!("{} m", radius)));
            }
        }
        Message::Command(command) => {
            fields.push(("action", command.action.as_str().to_string()));
        }
        Message::Lwt(lwt) => {
            fields.push(("timestamp", lwt.timestamp.to_string()));
        }
    }
    fields
}
