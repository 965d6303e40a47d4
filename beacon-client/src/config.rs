//! Typed configuration over a preference store.
//!
//! [`Configuration`] projects the flat [`PreferenceStore`] onto the
//! recognized [`PreferenceKey`]s: reads coerce whatever was stored into the
//! key's type (falling back to the default), writes persist through the
//! store and so trigger its change notification.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use beacon_core::{
    command_topic, CoercionError, EndpointError, EndpointSettings, PreferenceKey, PreferenceSnapshot,
    PreferenceValue, MODE_MQTT,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::preferences::{PreferenceError, PreferenceStore, StoredValue};

/// `_type` of an effective configuration document.
pub const CONFIGURATION_TYPE: &str = "configuration";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value does not fit the key's type, or the key is unknown.
    #[error(transparent)]
    Coercion(#[from] CoercionError),

    /// The preference store failed to persist.
    #[error(transparent)]
    Store(#[from] PreferenceError),

    /// The document to import is not a configuration document.
    #[error("invalid configuration document: {0}")]
    InvalidDocument(String),
}

/// Result of importing a configuration document.
///
/// Valid keys are applied even when others fail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Keys that were written.
    pub applied: Vec<PreferenceKey>,
    /// Keys whose value could not be coerced.
    pub errors: Vec<CoercionError>,
    /// Names in the document that are not recognized preferences.
    pub ignored: Vec<String>,
}

impl ImportReport {
    /// Whether every recognized key was applied.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Typed view of a [`PreferenceStore`].
#[derive(Clone)]
pub struct Configuration {
    store: Arc<dyn PreferenceStore>,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Stored values include the broker password
        f.debug_struct("Configuration").finish_non_exhaustive()
    }
}

impl Configuration {
    /// Project `store`.
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn PreferenceStore> {
        &self.store
    }

    /// Subscribe to changed key names.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.store.subscribe()
    }

    /// Explicitly stored value of `key`, coerced to its type.
    ///
    /// A stored value that cannot be coerced is treated as unset.
    fn stored(&self, key: PreferenceKey) -> Option<PreferenceValue> {
        let stored = self.store.get(key.name())?;
        match key.coerce(&stored_to_json(&stored)) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring stored preference: {}", e);
                None
            }
        }
    }

    /// Value of `key`, or its default.
    pub fn get(&self, key: PreferenceKey) -> PreferenceValue {
        self.stored(key).unwrap_or_else(|| key.default_value())
    }

    /// Text value of `key`.
    pub fn get_string(&self, key: PreferenceKey) -> String {
        match self.get(key) {
            PreferenceValue::String(value) => value,
            other => other.to_string(),
        }
    }

    /// Boolean value of `key`; `false` for non-bool keys.
    pub fn get_bool(&self, key: PreferenceKey) -> bool {
        matches!(self.get(key), PreferenceValue::Bool(true))
    }

    /// Integer value of `key`; 0 for non-int keys.
    pub fn get_int(&self, key: PreferenceKey) -> i64 {
        match self.get(key) {
            PreferenceValue::Int(value) => value,
            _ => 0,
        }
    }

    /// Set value of `key`; empty for non-set keys.
    pub fn get_string_set(&self, key: PreferenceKey) -> BTreeSet<String> {
        match self.get(key) {
            PreferenceValue::StringSet(values) => values,
            _ => BTreeSet::new(),
        }
    }

    /// Persist `value` under `key`. The value must have the key's type.
    pub fn set(&self, key: PreferenceKey, value: impl Into<PreferenceValue>) -> Result<(), ConfigError> {
        let value = value.into();
        if value.kind() != key.kind() {
            return Err(CoercionError::Mismatch {
                key: key.name(),
                expected: key.kind(),
                found: value.to_string(),
            }
            .into());
        }
        self.store.put(key.name(), to_stored(value))?;
        tracing::debug!("Preference {} updated", key);
        Ok(())
    }

    /// Persist a text value.
    pub fn set_string(&self, key: PreferenceKey, value: impl Into<String>) -> Result<(), ConfigError> {
        self.set(key, PreferenceValue::String(value.into()))
    }

    /// Persist a boolean value.
    pub fn set_bool(&self, key: PreferenceKey, value: bool) -> Result<(), ConfigError> {
        self.set(key, value)
    }

    /// Persist an integer value.
    pub fn set_int(&self, key: PreferenceKey, value: i64) -> Result<(), ConfigError> {
        self.set(key, value)
    }

    /// Persist a set of strings.
    pub fn set_string_set(&self, key: PreferenceKey, values: BTreeSet<String>) -> Result<(), ConfigError> {
        self.set(key, values)
    }

    /// Apply a free-text edit to the key named `name`.
    ///
    /// String-set keys take a comma-separated list.
    pub fn set_from_text(&self, name: &str, text: &str) -> Result<PreferenceKey, ConfigError> {
        let key = PreferenceKey::from_name(name)
            .ok_or_else(|| CoercionError::UnknownKey(name.to_string()))?;
        let value = key.parse_text(text)?;
        self.set(key, value)?;
        Ok(key)
    }

    /// Drop the explicit value of `key`, returning it to its default.
    pub fn reset(&self, key: PreferenceKey) -> Result<(), ConfigError> {
        self.store.remove(key.name())?;
        Ok(())
    }

    /// Point-in-time view of every recognized key.
    pub fn snapshot(&self) -> PreferenceSnapshot {
        let mut snapshot = PreferenceSnapshot::new();
        for key in PreferenceKey::ALL {
            if let Some(value) = self.stored(*key) {
                // Coerced values always have the key's kind
                let _ = snapshot.set(*key, value);
            }
        }
        snapshot
    }

    /// The effective configuration document: `_type` then every recognized
    /// key alphabetically, with defaults for unset keys.
    pub fn effective_configuration(&self) -> Value {
        self.snapshot().to_document()
    }

    /// Whether the MQTT endpoint is selected.
    pub fn is_mqtt_mode(&self) -> bool {
        self.get_int(PreferenceKey::Mode) == MODE_MQTT
    }

    /// Broker settings, or why the configuration is incomplete.
    pub fn endpoint_settings(&self) -> Result<EndpointSettings, EndpointError> {
        EndpointSettings::from_preferences(&self.snapshot())
    }

    /// Topic remote commands for this device arrive on.
    pub fn command_topic(&self) -> String {
        command_topic(&self.snapshot())
    }

    /// Import a configuration document.
    ///
    /// Each recognized key is coerced into its type; failures are reported
    /// per key and do not block the others. Every valid key is persisted in
    /// a single write.
    pub fn import(&self, document: &Value) -> Result<ImportReport, ConfigError> {
        let object = document.as_object().ok_or_else(|| {
            ConfigError::InvalidDocument("expected a JSON object".to_string())
        })?;
        match object.get("_type") {
            None => {}
            Some(Value::String(kind)) if kind == CONFIGURATION_TYPE => {}
            Some(other) => {
                return Err(ConfigError::InvalidDocument(format!(
                    "unexpected _type {}",
                    other
                )))
            }
        }

        let mut report = ImportReport::default();
        let mut entries = BTreeMap::new();
        for (name, value) in object {
            if name == "_type" {
                continue;
            }
            let Some(key) = PreferenceKey::from_name(name) else {
                report.ignored.push(name.clone());
                continue;
            };
            match key.coerce(value) {
                Ok(value) => {
                    entries.insert(key.name().to_string(), to_stored(value));
                    report.applied.push(key);
                }
                Err(e) => {
                    tracing::warn!("Rejected imported preference: {}", e);
                    report.errors.push(e);
                }
            }
        }

        if !entries.is_empty() {
            self.store.put_all(entries)?;
        }
        tracing::info!(
            "Imported configuration: {} applied, {} rejected, {} ignored",
            report.applied.len(),
            report.errors.len(),
            report.ignored.len()
        );
        Ok(report)
    }

    /// Parse and import a configuration document.
    pub fn import_str(&self, text: &str) -> Result<ImportReport, ConfigError> {
        let document: Value = serde_json::from_str(text)
            .map_err(|e| ConfigError::InvalidDocument(e.to_string()))?;
        self.import(&document)
    }
}

fn stored_to_json(value: &StoredValue) -> Value {
    match value {
        StoredValue::String(text) => Value::from(text.as_str()),
        StoredValue::Bool(b) => Value::from(*b),
        StoredValue::Int(n) => Value::from(i64::from(*n)),
        StoredValue::Long(n) => Value::from(*n),
        StoredValue::Float(n) => Value::from(*n),
        StoredValue::StringSet(values) => Value::from(values.iter().cloned().collect::<Vec<_>>()),
    }
}

fn to_stored(value: PreferenceValue) -> StoredValue {
    match value {
        PreferenceValue::Bool(b) => StoredValue::Bool(b),
        PreferenceValue::Int(n) => match i32::try_from(n) {
            Ok(small) => StoredValue::Int(small),
            Err(_) => StoredValue::Long(n),
        },
        PreferenceValue::String(text) => StoredValue::String(text),
        PreferenceValue::StringSet(values) => StoredValue::StringSet(values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::MemoryPreferenceStore;
    use beacon_core::{PreferenceKind, Scheme};
    use serde_json::json;

    fn configuration() -> Configuration {
        Configuration::new(Arc::new(MemoryPreferenceStore::new()))
    }

    // ===========================================
    // Typed Access Tests
    // ===========================================

    #[test]
    fn unset_keys_read_defaults() {
        let config = configuration();

        assert_eq!(config.get_int(PreferenceKey::Port), 8883);
        assert!(config.get_bool(PreferenceKey::Tls));
        assert_eq!(config.get_string(PreferenceKey::PubTopicBase), "owntracks/%u/%d");
        assert!(config.get_string_set(PreferenceKey::ExperimentalFeatures).is_empty());
    }

    #[test]
    fn set_then_get() {
        let config = configuration();
        config.set_string(PreferenceKey::Host, "broker.example").unwrap();
        config.set_int(PreferenceKey::Port, 1883).unwrap();
        config.set_bool(PreferenceKey::Tls, false).unwrap();

        assert_eq!(config.get_string(PreferenceKey::Host), "broker.example");
        assert_eq!(config.get_int(PreferenceKey::Port), 1883);
        assert!(!config.get_bool(PreferenceKey::Tls));
        assert_eq!(
            config.store().get("port"),
            Some(StoredValue::Int(1883))
        );
    }

    #[test]
    fn large_ints_are_stored_as_long() {
        let config = configuration();
        config.set_int(PreferenceKey::Keepalive, 1 << 40).unwrap();

        assert_eq!(config.store().get("keepalive"), Some(StoredValue::Long(1 << 40)));
        assert_eq!(config.get_int(PreferenceKey::Keepalive), 1 << 40);
    }

    #[test]
    fn set_rejects_wrong_type() {
        let config = configuration();
        let result = config.set(PreferenceKey::Port, "1883");

        assert!(matches!(
            result,
            Err(ConfigError::Coercion(CoercionError::Mismatch {
                key: "port",
                expected: PreferenceKind::Int,
                ..
            }))
        ));
    }

    #[test]
    fn legacy_typed_values_are_coerced() {
        let store = Arc::new(MemoryPreferenceStore::new());
        store.put("port", StoredValue::Long(1883)).unwrap();
        store.put("tls", StoredValue::String("FALSE".into())).unwrap();
        store.put("keepalive", StoredValue::Float(60.0)).unwrap();
        let config = Configuration::new(store);

        assert_eq!(config.get_int(PreferenceKey::Port), 1883);
        assert!(!config.get_bool(PreferenceKey::Tls));
        assert_eq!(config.get_int(PreferenceKey::Keepalive), 60);
    }

    #[test]
    fn unreadable_stored_value_falls_back_to_default() {
        let store = Arc::new(MemoryPreferenceStore::new());
        store.put("port", StoredValue::String("not a port".into())).unwrap();
        let config = Configuration::new(store);

        assert_eq!(config.get_int(PreferenceKey::Port), 8883);
        assert!(!config.snapshot().is_set(PreferenceKey::Port));
    }

    #[test]
    fn free_text_string_set_is_normalized() {
        let config = configuration();
        let key = config
            .set_from_text("experimentalFeatures", "this, that,    other")
            .unwrap();

        assert_eq!(key, PreferenceKey::ExperimentalFeatures);
        let values: Vec<String> = config
            .get_string_set(PreferenceKey::ExperimentalFeatures)
            .into_iter()
            .collect();
        assert_eq!(values, vec!["other", "that", "this"]);
    }

    #[test]
    fn free_text_for_unknown_key_fails() {
        let config = configuration();
        let result = config.set_from_text("colour", "blue");
        assert!(matches!(
            result,
            Err(ConfigError::Coercion(CoercionError::UnknownKey(_)))
        ));
    }

    #[test]
    fn reset_restores_default() {
        let config = configuration();
        config.set_int(PreferenceKey::Port, 1883).unwrap();
        config.reset(PreferenceKey::Port).unwrap();
        assert_eq!(config.get_int(PreferenceKey::Port), 8883);
    }

    #[test]
    fn writes_notify_subscribers() {
        let config = configuration();
        let mut changes = config.subscribe();

        config.set_string(PreferenceKey::Host, "broker.example").unwrap();

        assert_eq!(changes.try_recv().unwrap(), "host");
    }

    // ===========================================
    // Effective Configuration Tests
    // ===========================================

    #[test]
    fn effective_configuration_lists_every_key_in_order() {
        let config = configuration();
        config.set_string(PreferenceKey::Host, "broker.example").unwrap();

        let document = config.effective_configuration();
        let object = document.as_object().unwrap();
        let names: Vec<&String> = object.keys().collect();

        assert_eq!(names[0], "_type");
        assert_eq!(object["_type"], json!("configuration"));
        assert_eq!(names.len(), PreferenceKey::ALL.len() + 1);
        assert!(names[1..].windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(object["host"], json!("broker.example"));
        assert_eq!(object["port"], json!(8883));
        assert_eq!(object["experimentalFeatures"], json!([]));
    }

    #[test]
    fn endpoint_settings_follow_preferences() {
        let config = configuration();
        assert_eq!(
            config.endpoint_settings().unwrap_err(),
            EndpointError::HostMissing
        );

        config.set_string(PreferenceKey::Host, "broker.example").unwrap();
        config.set_bool(PreferenceKey::Ws, true).unwrap();
        let settings = config.endpoint_settings().unwrap();

        assert_eq!(settings.scheme, Scheme::Wss);
        assert_eq!(settings.server_uri(), "wss://broker.example:8883");
    }

    // ===========================================
    // Import Tests
    // ===========================================

    #[test]
    fn import_applies_valid_and_reports_invalid() {
        let config = configuration();
        let report = config
            .import(&json!({
                "_type": "configuration",
                "host": "broker.example",
                "port": "1883",
                "tls": "maybe",
                "experimentalFeatures": ["b", "a", "b"],
                "waypoints": []
            }))
            .unwrap();

        assert_eq!(
            report.applied,
            vec![
                PreferenceKey::Host,
                PreferenceKey::Port,
                PreferenceKey::ExperimentalFeatures
            ]
        );
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].to_string(), "tls: expected bool, found \"maybe\"");
        assert_eq!(report.ignored, vec!["waypoints".to_string()]);
        assert!(!report.is_clean());

        assert_eq!(config.get_int(PreferenceKey::Port), 1883);
        assert!(config.get_bool(PreferenceKey::Tls));
        assert_eq!(
            config.get_string_set(PreferenceKey::ExperimentalFeatures).len(),
            2
        );
    }

    #[test]
    fn import_rejects_other_documents() {
        let config = configuration();

        assert!(matches!(
            config.import(&json!([1, 2])),
            Err(ConfigError::InvalidDocument(_))
        ));
        assert!(matches!(
            config.import(&json!({"_type": "location"})),
            Err(ConfigError::InvalidDocument(_))
        ));
        assert!(matches!(
            config.import_str("{oops"),
            Err(ConfigError::InvalidDocument(_))
        ));
    }

    #[test]
    fn exported_document_imports_cleanly() {
        let source = configuration();
        source.set_string(PreferenceKey::Username, "alice").unwrap();
        source.set_int(PreferenceKey::Mode, 3).unwrap();

        let target = configuration();
        let report = target.import(&source.effective_configuration()).unwrap();

        assert!(report.is_clean());
        assert_eq!(report.applied.len(), PreferenceKey::ALL.len());
        assert_eq!(target.effective_configuration(), source.effective_configuration());
        assert!(!target.is_mqtt_mode());
    }
}
