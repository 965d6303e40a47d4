//! Broker endpoint settings derived from preferences.
//!
//! Everything the transport needs to connect, subscribe and publish is
//! computed here from a [`PreferenceSnapshot`], so the rules can be tested
//! without a broker.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use beacon_types::{Lwt, Message, MessageKind, Outbound, Qos};
use thiserror::Error;

use crate::preferences::{PreferenceKey, PreferenceSnapshot};

/// Placeholder for the username in the publish topic base.
const USER_PLACEHOLDER: &str = "%u";
/// Placeholder for the device id in the publish topic base.
const DEVICE_PLACEHOLDER: &str = "%d";
/// Substituted for `%u` when no username is configured.
const ANONYMOUS_USER: &str = "user";

/// Error type for unusable endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// No broker host configured.
    #[error("Host missing")]
    HostMissing,

    /// Port outside 1..=65535.
    #[error("Invalid port: {0}")]
    InvalidPort(i64),
}

/// URL scheme of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain TCP.
    Tcp,
    /// TLS over TCP.
    Ssl,
    /// Plain websockets.
    Ws,
    /// Websockets over TLS.
    Wss,
}

impl Scheme {
    /// Pick the scheme from the `tls` and `ws` preferences.
    pub fn new(tls: bool, websockets: bool) -> Self {
        match (tls, websockets) {
            (false, false) => Self::Tcp,
            (true, false) => Self::Ssl,
            (false, true) => Self::Ws,
            (true, true) => Self::Wss,
        }
    }

    /// URL form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Ssl => "ssl",
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }
}

/// Broker credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// TLS material references.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct TlsSettings {
    /// Name of the CA certificate file, if a custom CA is used.
    pub ca_certificate: Option<String>,
    /// Name of the PKCS#12 client certificate file.
    pub client_certificate: Option<String>,
    /// Password for the client certificate.
    pub client_certificate_password: Option<String>,
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("ca_certificate", &self.ca_certificate)
            .field("client_certificate", &self.client_certificate)
            .field(
                "client_certificate_password",
                &self.client_certificate_password.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Everything needed to connect to, subscribe on and publish to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSettings {
    /// URL scheme.
    pub scheme: Scheme,
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// MQTT client id.
    pub client_id: String,
    /// Sent only when a non-blank username is configured.
    pub credentials: Option<Credentials>,
    /// Present when TLS is enabled.
    pub tls: Option<TlsSettings>,
    /// MQTT protocol level (3 = 3.1, 4 = 3.1.1).
    pub protocol_level: i64,
    /// Keepalive interval.
    pub keepalive: Duration,
    /// Connect timeout.
    pub connection_timeout: Duration,
    /// Whether to start a clean session.
    pub clean_session: bool,
    /// Publish topic base with placeholders substituted.
    pub topic_base: String,
    /// Qos for outgoing publishes.
    pub pub_qos: Qos,
    /// Whether outgoing publishes are retained.
    pub pub_retain: bool,
    /// Qos for subscriptions.
    pub sub_qos: Qos,
    /// Topics to subscribe to after connecting, sorted.
    pub subscriptions: BTreeSet<String>,
}

impl EndpointSettings {
    /// Derive the settings, failing if the configuration is incomplete.
    pub fn from_preferences(prefs: &PreferenceSnapshot) -> Result<Self, EndpointError> {
        let host = prefs.string(PreferenceKey::Host).trim().to_string();
        if host.is_empty() {
            return Err(EndpointError::HostMissing);
        }
        let raw_port = prefs.int(PreferenceKey::Port);
        let port = u16::try_from(raw_port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or(EndpointError::InvalidPort(raw_port))?;

        let tls = prefs.bool(PreferenceKey::Tls);
        let username = prefs.string(PreferenceKey::Username);
        let credentials = (!username.trim().is_empty()).then(|| Credentials {
            username: username.clone(),
            password: prefs.string(PreferenceKey::Password),
        });

        Ok(Self {
            scheme: Scheme::new(tls, prefs.bool(PreferenceKey::Ws)),
            host,
            port,
            client_id: client_id(prefs),
            credentials,
            tls: tls.then(|| TlsSettings {
                ca_certificate: non_blank(prefs.string(PreferenceKey::TlsCaCrt)),
                client_certificate: non_blank(prefs.string(PreferenceKey::TlsClientCrt)),
                client_certificate_password: non_blank(
                    prefs.string(PreferenceKey::TlsClientCrtPassword),
                ),
            }),
            protocol_level: prefs.int(PreferenceKey::MqttProtocolLevel),
            keepalive: seconds(prefs.int(PreferenceKey::Keepalive)),
            connection_timeout: seconds(prefs.int(PreferenceKey::ConnectionTimeoutSeconds)),
            clean_session: prefs.bool(PreferenceKey::CleanSession),
            topic_base: topic_base(prefs),
            pub_qos: Qos::from_level(prefs.int(PreferenceKey::PubQos)),
            pub_retain: prefs.bool(PreferenceKey::PubRetain),
            sub_qos: Qos::from_level(prefs.int(PreferenceKey::SubQos)),
            subscriptions: subscription_topics(prefs),
        })
    }

    /// Check that the preferences are complete enough to connect.
    pub fn check_complete(prefs: &PreferenceSnapshot) -> Result<(), EndpointError> {
        Self::from_preferences(prefs).map(|_| ())
    }

    /// Broker URI, e.g. `ssl://broker.example:8883`.
    pub fn server_uri(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }

    /// Broker identity used to detect a change of broker between
    /// connections.
    pub fn connection_id(&self) -> String {
        format!("{}/{}", self.server_uri(), self.client_id)
    }

    /// Topic this device publishes messages of `kind` on.
    pub fn topic_for(&self, kind: MessageKind) -> String {
        match kind {
            MessageKind::Location | MessageKind::Lwt => self.topic_base.clone(),
            MessageKind::Card => format!("{}/info", self.topic_base),
            MessageKind::Transition => format!("{}/event", self.topic_base),
            MessageKind::Waypoint => format!("{}/waypoint", self.topic_base),
            MessageKind::Command => format!("{}/cmd", self.topic_base),
        }
    }

    /// Last-will envelope registered when connecting.
    pub fn will(&self, now: u64) -> Outbound {
        Outbound {
            routing_key: self.topic_base.clone(),
            payload: Message::Lwt(Lwt { timestamp: now }).to_bytes(),
            qos: Qos::AtMostOnce,
            retained: false,
        }
    }
}

/// Publish topic base with `%u` and `%d` substituted.
pub fn topic_base(prefs: &PreferenceSnapshot) -> String {
    let username = prefs.string(PreferenceKey::Username);
    let user = if username.trim().is_empty() {
        ANONYMOUS_USER
    } else {
        username.as_str()
    };
    prefs
        .string(PreferenceKey::PubTopicBase)
        .replace(USER_PLACEHOLDER, user)
        .replace(DEVICE_PLACEHOLDER, &prefs.string(PreferenceKey::DeviceId))
}

/// The device's own command topic, `<topic base>/cmd`.
///
/// Does not need a complete configuration.
pub fn command_topic(prefs: &PreferenceSnapshot) -> String {
    format!("{}/cmd", topic_base(prefs))
}

/// Topics to subscribe to after connecting.
///
/// Empty when subscribing is disabled. The default subscription expands to
/// the info (if enabled), event and waypoint topics; a custom value is a
/// space-separated list taken as is. The device's own command topic is
/// always added.
pub fn subscription_topics(prefs: &PreferenceSnapshot) -> BTreeSet<String> {
    let mut topics = BTreeSet::new();
    if !prefs.bool(PreferenceKey::Sub) {
        return topics;
    }

    let sub_topic = prefs.string(PreferenceKey::SubTopic);
    if PreferenceKey::SubTopic.default_value().to_string() == sub_topic {
        if prefs.bool(PreferenceKey::Info) {
            topics.insert(format!("{}/info", sub_topic));
        }
        topics.insert(format!("{}/event", sub_topic));
        topics.insert(format!("{}/waypoint", sub_topic));
        topics.insert(sub_topic);
    } else {
        topics.extend(sub_topic.split_whitespace().map(str::to_string));
    }

    topics.insert(command_topic(prefs));
    topics
}

fn client_id(prefs: &PreferenceSnapshot) -> String {
    let configured = prefs.string(PreferenceKey::ClientId);
    if !configured.trim().is_empty() {
        return configured;
    }
    format!(
        "{}{}",
        prefs.string(PreferenceKey::Username),
        prefs.string(PreferenceKey::DeviceId)
    )
    .chars()
    .filter(char::is_ascii_alphanumeric)
    .collect::<String>()
    .to_lowercase()
}

fn non_blank(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

fn seconds(value: i64) -> Duration {
    Duration::from_secs(u64::try_from(value).unwrap_or(0))
}
