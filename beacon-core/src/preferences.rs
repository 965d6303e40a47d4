//! Preference schema and coercion.
//!
//! Every preference the client understands is a [`PreferenceKey`] with a
//! static type and a default. Values arriving from configuration documents
//! or free-text edits are coerced into that type here; storage lives in
//! beacon-client.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

/// `mode` value selecting the MQTT endpoint.
pub const MODE_MQTT: i64 = 0;
/// `mode` value selecting the HTTP endpoint.
pub const MODE_HTTP: i64 = 3;

/// Static type of a preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreferenceKind {
    /// `true` / `false`.
    Bool,
    /// Signed integer.
    Int,
    /// Free text.
    String,
    /// Sorted set of strings.
    StringSet,
}

impl fmt::Display for PreferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::String => "string",
            Self::StringSet => "string set",
        })
    }
}

macro_rules! preference_keys {
    ($( $variant:ident => $name:literal, $kind:ident, $default:expr; )+) => {
        /// A recognized preference.
        ///
        /// Variants are declared in alphabetical order of their names, which
        /// is also the order of the effective configuration document.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum PreferenceKey {
            $(
                #[doc = concat!("`", $name, "`")]
                $variant,
            )+
        }

        impl PreferenceKey {
            /// Every recognized key, alphabetically.
            pub const ALL: &'static [PreferenceKey] = &[$(PreferenceKey::$variant),+];

            /// The key as it appears in stores and documents.
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            /// Look up a key by name.
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Static type of the key.
            pub fn kind(self) -> PreferenceKind {
                match self {
                    $(Self::$variant => PreferenceKind::$kind,)+
                }
            }

            /// Value used when the key is unset.
            pub fn default_value(self) -> PreferenceValue {
                match self {
                    $(Self::$variant => PreferenceValue::from($default),)+
                }
            }
        }
    };
}

preference_keys! {
    Auth => "auth", Bool, true;
    CleanSession => "cleanSession", Bool, false;
    ClientId => "clientId", String, "";
    Cmd => "cmd", Bool, true;
    ConnectionTimeoutSeconds => "connectionTimeoutSeconds", Int, 30_i64;
    DeviceId => "deviceId", String, "device";
    ExperimentalFeatures => "experimentalFeatures", StringSet, BTreeSet::new();
    Host => "host", String, "";
    Info => "info", Bool, true;
    Keepalive => "keepalive", Int, 3600_i64;
    Mode => "mode", Int, MODE_MQTT;
    MqttProtocolLevel => "mqttProtocolLevel", Int, 3_i64;
    Password => "password", String, "";
    Port => "port", Int, 8883_i64;
    PubQos => "pubQos", Int, 1_i64;
    PubRetain => "pubRetain", Bool, true;
    PubTopicBase => "pubTopicBase", String, "owntracks/%u/%d";
    Sub => "sub", Bool, true;
    SubQos => "subQos", Int, 2_i64;
    SubTopic => "subTopic", String, "owntracks/+/+";
    Tid => "tid", String, "";
    Tls => "tls", Bool, true;
    TlsCaCrt => "tlsCaCrt", String, "";
    TlsClientCrt => "tlsClientCrt", String, "";
    TlsClientCrtPassword => "tlsClientCrtPassword", String, "";
    Username => "username", String, "";
    Ws => "ws", Bool, false;
}

impl PreferenceKey {
    /// Whether changing the key invalidates the current broker connection.
    pub fn affects_connection(self) -> bool {
        matches!(
            self,
            Self::MqttProtocolLevel
                | Self::Host
                | Self::Password
                | Self::Username
                | Self::Port
                | Self::ClientId
                | Self::Tls
                | Self::TlsCaCrt
                | Self::TlsClientCrt
                | Self::TlsClientCrtPassword
                | Self::Ws
                | Self::DeviceId
        )
    }
}

impl fmt::Display for PreferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed preference value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreferenceValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Text value.
    String(String),
    /// Sorted, deduplicated set of strings.
    StringSet(BTreeSet<String>),
}

impl PreferenceValue {
    /// Static type of the value.
    pub fn kind(&self) -> PreferenceKind {
        match self {
            Self::Bool(_) => PreferenceKind::Bool,
            Self::Int(_) => PreferenceKind::Int,
            Self::String(_) => PreferenceKind::String,
            Self::StringSet(_) => PreferenceKind::StringSet,
        }
    }

    /// JSON form used in configuration documents.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(value) => Value::from(*value),
            Self::Int(value) => Value::from(*value),
            Self::String(value) => Value::from(value.as_str()),
            Self::StringSet(values) => Value::from(values.iter().cloned().collect::<Vec<_>>()),
        }
    }
}

impl fmt::Display for PreferenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Int(value) => write!(f, "{}", value),
            Self::String(value) => f.write_str(value),
            Self::StringSet(values) => {
                let joined: Vec<&str> = values.iter().map(String::as_str).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

impl From<bool> for PreferenceValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PreferenceValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for PreferenceValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PreferenceValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<BTreeSet<String>> for PreferenceValue {
    fn from(values: BTreeSet<String>) -> Self {
        Self::StringSet(values)
    }
}

/// Error type for preference coercion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    /// The name is not a recognized preference.
    #[error("unknown preference: {0}")]
    UnknownKey(String),

    /// The value cannot be read as the key's type.
    #[error("{key}: expected {expected}, found {found}")]
    Mismatch {
        /// Preference name.
        key: &'static str,
        /// The key's static type.
        expected: PreferenceKind,
        /// The rejected value.
        found: String,
    },
}

impl CoercionError {
    fn mismatch(key: PreferenceKey, found: impl Into<String>) -> Self {
        Self::Mismatch {
            key: key.name(),
            expected: key.kind(),
            found: found.into(),
        }
    }
}

/// Split free text on commas into a trimmed, deduplicated, sorted set.
pub fn parse_string_set(text: &str) -> BTreeSet<String> {
    text.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl PreferenceKey {
    /// Coerce a JSON value from a configuration document into this key's
    /// type.
    ///
    /// - bool: JSON booleans, or the strings `true`/`false` (any case)
    /// - int: integral JSON numbers, or decimal strings
    /// - string: strings, numbers and booleans
    /// - string set: arrays of strings, or a comma-separated string
    pub fn coerce(self, value: &Value) -> Result<PreferenceValue, CoercionError> {
        let coerced = match (self.kind(), value) {
            (PreferenceKind::Bool, Value::Bool(b)) => Some(PreferenceValue::Bool(*b)),
            (PreferenceKind::Bool, Value::String(text)) => parse_bool(text).map(PreferenceValue::Bool),

            (PreferenceKind::Int, Value::Number(number)) => number
                .as_i64()
                .or_else(|| integral_f64(number.as_f64()?))
                .map(PreferenceValue::Int),
            (PreferenceKind::Int, Value::String(text)) => {
                text.trim().parse().ok().map(PreferenceValue::Int)
            }

            (PreferenceKind::String, Value::String(text)) => Some(PreferenceValue::from(text.clone())),
            (PreferenceKind::String, Value::Number(number)) => {
                Some(PreferenceValue::String(number.to_string()))
            }
            (PreferenceKind::String, Value::Bool(b)) => Some(PreferenceValue::String(b.to_string())),

            (PreferenceKind::StringSet, Value::String(text)) => {
                Some(PreferenceValue::StringSet(parse_string_set(text)))
            }
            (PreferenceKind::StringSet, Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::trim))
                .collect::<Option<Vec<&str>>>()
                .map(|items| {
                    PreferenceValue::StringSet(
                        items
                            .into_iter()
                            .filter(|item| !item.is_empty())
                            .map(str::to_string)
                            .collect(),
                    )
                }),

            _ => None,
        };
        coerced.ok_or_else(|| CoercionError::mismatch(self, value.to_string()))
    }

    /// Parse a free-text edit into this key's type.
    ///
    /// String-set keys are split on commas, trimmed, deduplicated and
    /// sorted.
    pub fn parse_text(self, text: &str) -> Result<PreferenceValue, CoercionError> {
        let parsed = match self.kind() {
            PreferenceKind::Bool => parse_bool(text).map(PreferenceValue::Bool),
            PreferenceKind::Int => text.trim().parse().ok().map(PreferenceValue::Int),
            PreferenceKind::String => Some(PreferenceValue::from(text)),
            PreferenceKind::StringSet => Some(PreferenceValue::StringSet(parse_string_set(text))),
        };
        parsed.ok_or_else(|| CoercionError::mismatch(self, text))
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim() {
        t if t.eq_ignore_ascii_case("true") => Some(true),
        t if t.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

fn integral_f64(value: f64) -> Option<i64> {
    let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
    (value.fract() == 0.0 && in_range).then_some(value as i64)
}

/// A point-in-time view of every preference, with defaults for unset keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferenceSnapshot {
    values: BTreeMap<PreferenceKey, PreferenceValue>,
}

impl PreferenceSnapshot {
    /// A snapshot where every key holds its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit value.
    ///
    /// The value must already have the key's type.
    pub fn set(&mut self, key: PreferenceKey, value: PreferenceValue) -> Result<(), CoercionError> {
        if value.kind() != key.kind() {
            return Err(CoercionError::mismatch(key, value.to_string()));
        }
        self.values.insert(key, value);
        Ok(())
    }

    /// Builder form of [`set`](Self::set) for tests and fixtures.
    pub fn with(mut self, key: PreferenceKey, value: impl Into<PreferenceValue>) -> Self {
        let _ = self.set(key, value.into());
        self
    }

    /// Whether the key has an explicit value.
    pub fn is_set(&self, key: PreferenceKey) -> bool {
        self.values.contains_key(&key)
    }

    /// Explicit value, else the default.
    pub fn get(&self, key: PreferenceKey) -> PreferenceValue {
        self.values
            .get(&key)
            .cloned()
            .unwrap_or_else(|| key.default_value())
    }

    /// Boolean value of `key`, or `false` for non-bool keys.
    pub fn bool(&self, key: PreferenceKey) -> bool {
        matches!(self.get(key), PreferenceValue::Bool(true))
    }

    /// Integer value of `key`, or 0 for non-int keys.
    pub fn int(&self, key: PreferenceKey) -> i64 {
        match self.get(key) {
            PreferenceValue::Int(value) => value,
            _ => 0,
        }
    }

    /// Text value of `key`; other kinds are rendered.
    pub fn string(&self, key: PreferenceKey) -> String {
        match self.get(key) {
            PreferenceValue::String(value) => value,
            other => other.to_string(),
        }
    }

    /// Set value of `key`, or an empty set for other kinds.
    pub fn string_set(&self, key: PreferenceKey) -> BTreeSet<String> {
        match self.get(key) {
            PreferenceValue::StringSet(values) => values,
            _ => BTreeSet::new(),
        }
    }

    /// The effective configuration document.
    ///
    /// `{"_type":"configuration", ...}` followed by every recognized key in
    /// alphabetical order, with defaults for unset keys.
    pub fn to_document(&self) -> Value {
        let mut document = Map::new();
        document.insert("_type".to_string(), Value::from("configuration"));
        for key in PreferenceKey::ALL {
            document.insert(key.name().to_string(), self.get(*key).to_json());
        }
        Value::Object(document)
    }
}
