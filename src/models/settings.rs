use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::models::schema::{SettingRule, SettingsSchema};

/// A single setting value.
///
/// The wire format is a flat YAML mapping, so values are untagged: `true`
/// deserializes as a flag, `4` as a quantity, `"ocean"` as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Stable tag for log messages ("boolean" / "number" / "string").
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "string",
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Immutable point-in-time snapshot of all user settings.
///
/// Keys use the wire-format names (`hideShorts`, `premiumTheme`, ...) so the
/// mapping round-trips verbatim through the persistent store. Accessors fall
/// back to the schema default when a key is absent, which only happens for
/// hand-built snapshots; store-produced snapshots are always complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    values: IndexMap<String, SettingValue>,
}

impl Settings {
    /// Snapshot with every key at its schema default.
    pub fn defaults() -> Self {
        SettingsSchema::defaults()
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    /// Boolean setting; schema default when missing or not a flag.
    pub fn flag(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(SettingValue::Bool(b)) => *b,
            _ => matches!(
                SettingsSchema::rule(key),
                Some(SettingRule::Flag { default: true })
            ),
        }
    }

    /// Numeric setting; schema default when missing or not a number.
    pub fn number(&self, key: &str) -> f64 {
        match self.values.get(key) {
            Some(SettingValue::Number(n)) => *n,
            _ => match SettingsSchema::rule(key) {
                Some(SettingRule::Quantity { default, .. }) => *default,
                _ => 0.0,
            },
        }
    }

    /// Numeric setting rounded to an integer.
    pub fn integer(&self, key: &str) -> i64 {
        self.number(key).round() as i64
    }

    /// Text setting; schema default when missing or not text.
    pub fn text(&self, key: &str) -> &str {
        match self.values.get(key) {
            Some(SettingValue::Text(t)) => t,
            _ => match SettingsSchema::rule(key) {
                Some(SettingRule::Choice { default, .. }) => default,
                _ => "",
            },
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<SettingValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Builder-style insert, mostly for tests and the demo binary.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn raw(&self) -> &IndexMap<String, SettingValue> {
        &self.values
    }

    pub(crate) fn from_raw(values: IndexMap<String, SettingValue>) -> Self {
        Self { values }
    }
}
