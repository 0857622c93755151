//! Typed key/value configuration with group namespacing.
//!
//! Leaf dependency for the rest of the crate: feature toggles and external
//! credentials live here. Values carry an explicit type so callers never
//! parse raw strings at the call site.

use serde::{Deserialize, Serialize};

/// Toggle controlling whether admin real-time broadcasts are emitted.
pub const BROADCAST_ENABLED: &str = "broadcasting.enabled";
/// Toggle controlling whether provider notifications request SMS delivery.
pub const SMS_ENABLED: &str = "sms.enabled";
/// Group that holds the outbound-integration toggles.
pub const INTEGRATIONS_GROUP: &str = "integrations";

/// A typed setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SettingValue {
    Text(String),
    Flag(bool),
    Number(i64),
    Json(serde_json::Value),
}

impl SettingValue {
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }
}

/// One stored setting with its group namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingRecord {
    pub key: String,
    pub value: SettingValue,
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Storage abstraction for settings so components can be exercised with an
/// in-memory store.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<SettingRecord>, SettingsError>;
    fn set(&self, record: SettingRecord) -> Result<SettingRecord, SettingsError>;
    fn by_group(&self, group: &str) -> Result<Vec<SettingRecord>, SettingsError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings store unavailable: {0}")]
    Unavailable(String),
}

/// Read a boolean toggle, falling back to `default` when the key is missing,
/// holds a non-flag value, or the store is unavailable.
pub fn flag(store: &dyn SettingsStore, key: &str, default: bool) -> bool {
    match store.get(key) {
        Ok(Some(record)) => record.value.as_flag().unwrap_or(default),
        Ok(None) => default,
        Err(_) => default,
    }
}

/// Notification feature toggles resolved once per operation and injected
/// into the lifecycle coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationToggles {
    pub broadcast_enabled: bool,
    pub sms_enabled: bool,
}

impl NotificationToggles {
    pub fn resolve(store: &dyn SettingsStore) -> Self {
        Self {
            broadcast_enabled: flag(store, BROADCAST_ENABLED, true),
            sms_enabled: flag(store, SMS_ENABLED, false),
        }
    }
}
