//! Show the broker endpoint derived from the configuration.

use anyhow::Result;
use beacon_client::Configuration;
use beacon_core::{EndpointSettings, PreferenceKey, MODE_MQTT};
use beacon_types::MessageKind;

/// Run the status command.
pub fn run(config: &Configuration) -> Result<()> {
    print!("{}", render(config));
    Ok(())
}

fn render(config: &Configuration) -> String {
    let mut out = String::from("=== beacon status ===\n\n");

    if !config.is_mqtt_mode() {
        let mode = config.get_int(PreferenceKey::Mode);
        out.push_str(&format!("Mode: HTTP (mode {})\n", mode));
        return out;
    }
    out.push_str(&format!("Mode: MQTT (mode {})\n\n", MODE_MQTT));

    match config.endpoint_settings() {
        Ok(settings) => render_endpoint(&mut out, &settings),
        Err(e) => {
            out.push_str(&format!("Endpoint: Configuration incomplete: {}\n\n", e));
            out.push_str("Run 'beacon config set host <broker>' to configure.\n");
        }
    }
    out
}

fn render_endpoint(out: &mut String, settings: &EndpointSettings) {
    out.push_str("Endpoint:\n");
    out.push_str(&format!("  Server:    {}\n", settings.server_uri()));
    out.push_str(&format!("  Client id: {}\n", settings.client_id));
    let user = settings
        .credentials
        .as_ref()
        .map(|credentials| credentials.username.as_str())
        .unwrap_or("(anonymous)");
    out.push_str(&format!("  User:      {}\n", user));
    out.push_str(&format!("  Keepalive: {}s\n", settings.keepalive.as_secs()));
    out.push_str("\nTopics:\n");
    out.push_str(&format!("  Publish:   {}\n", settings.topic_for(MessageKind::Location)));
    out.push_str(&format!("  Card:      {}\n", settings.topic_for(MessageKind::Card)));
    if settings.subscriptions.is_empty() {
        out.push_str("  Subscribe: (disabled)\n");
    }
    for topic in &settings.subscriptions {
        out.push_str(&format!("  Subscribe: {} (qos {})\n", topic, settings.sub_qos.level()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_client::MemoryPreferenceStore;
    use beacon_core::MODE_HTTP;
    use std::sync::Arc;

    fn configuration() -> Configuration {
        Configuration::new(Arc::new(MemoryPreferenceStore::new()))
    }

    #[test]
    fn incomplete_configuration() {
        let out = render(&configuration());
        assert!(out.contains("Configuration incomplete: Host missing"));
    }

    #[test]
    fn configured_endpoint() {
        let config = configuration();
        config.set_string(PreferenceKey::Host, "broker.example").unwrap();
        config.set_string(PreferenceKey::Username, "alice").unwrap();
        config.set_bool(PreferenceKey::Tls, false).unwrap();
        config.set_int(PreferenceKey::Port, 1883).unwrap();

        let out = render(&config);
        assert!(out.contains("Server:    tcp://broker.example:1883"));
        assert!(out.contains("Client id: alicedevice"));
        assert!(out.contains("Publish:   owntracks/alice/device\n"));
        assert!(out.contains("Card:      owntracks/alice/device/info"));
        assert!(out.contains("Subscribe: owntracks/alice/device/cmd (qos 2)"));
    }

    #[test]
    fn http_mode() {
        let config = configuration();
        config.set_int(PreferenceKey::Mode, MODE_HTTP).unwrap();
        assert!(render(&config).contains("Mode: HTTP (mode 3)"));
        assert!(run(&config).is_ok());
    }
}
