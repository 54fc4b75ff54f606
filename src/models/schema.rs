//! Settings schema and validation.
//!
//! Every setting key has a rule: expected kind, default, and an optional
//! range or allowed-value list. [`SettingsSchema::validate_and_merge`]
//! sanitizes raw stored settings on every load:
//! - unknown keys are silently dropped (stale/renamed keys do not accumulate)
//! - missing keys are filled from defaults (forwards-compatible)
//! - wrong-kind values are reset to defaults
//! - numbers outside their range are clamped

use std::sync::OnceLock;

use indexmap::IndexMap;

use crate::models::settings::{SettingValue, Settings};

/// Validation rule for one setting key.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingRule {
    /// Boolean toggle.
    Flag { default: bool },
    /// Number clamped into `[min, max]`.
    Quantity { default: f64, min: f64, max: f64 },
    /// String restricted to `allowed` (empty slice = free text).
    Choice {
        default: &'static str,
        allowed: &'static [&'static str],
    },
}

impl SettingRule {
    pub fn default_value(&self) -> SettingValue {
        match self {
            Self::Flag { default } => SettingValue::Bool(*default),
            Self::Quantity { default, .. } => SettingValue::Number(*default),
            Self::Choice { default, .. } => SettingValue::Text((*default).to_string()),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Self::Flag { .. } => "boolean",
            Self::Quantity { .. } => "number",
            Self::Choice { .. } => "string",
        }
    }

    /// Check `value` against this rule. Returns the conformed value, or
    /// `None` if it has the wrong kind (or a disallowed choice) and must be
    /// reset to the default.
    fn conform(&self, value: &SettingValue) -> Option<SettingValue> {
        match (self, value) {
            (Self::Flag { .. }, SettingValue::Bool(b)) => Some(SettingValue::Bool(*b)),
            (Self::Quantity { min, max, .. }, SettingValue::Number(n)) => {
                Some(SettingValue::Number(n.clamp(*min, *max)))
            }
            (Self::Choice { allowed, .. }, SettingValue::Text(t)) => {
                if allowed.is_empty() || allowed.contains(&t.as_str()) {
                    Some(SettingValue::Text(t.clone()))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

const ACTIVE_THEMES: &[&str] = &[
    "default", "ocean", "sunset", "dracula", "forest", "midnight", "cherry", "system",
];

fn rule_table() -> IndexMap<&'static str, SettingRule> {
    use SettingRule::{Choice, Flag, Quantity};

    let mut rules = IndexMap::new();

    // Theme
    rules.insert("premiumTheme", Flag { default: true });
    rules.insert(
        "activeTheme",
        Choice {
            default: "default",
            allowed: ACTIVE_THEMES,
        },
    );
    rules.insert("trueBlack", Flag { default: false });
    rules.insert("hideScrollbar", Flag { default: false });

    // Layout
    rules.insert("grid4x4", Flag { default: true });
    rules.insert(
        "homeColumns",
        Quantity {
            default: 4.0,
            min: 1.0,
            max: 8.0,
        },
    );
    rules.insert(
        "searchColumns",
        Quantity {
            default: 4.0,
            min: 1.0,
            max: 8.0,
        },
    );

    // Visibility
    rules.insert("hideShorts", Flag { default: false });
    rules.insert("hideMixes", Flag { default: false });
    rules.insert("hideComments", Flag { default: false });
    rules.insert("hideMerch", Flag { default: false });
    rules.insert("hideEndScreens", Flag { default: false });

    // Search
    rules.insert("searchGrid", Flag { default: true });
    rules.insert("cleanSearch", Flag { default: true });

    // Ad skipper
    rules.insert("adSkipper", Flag { default: true });

    // Focus
    rules.insert("enableFocusMode", Flag { default: false });
    rules.insert(
        "focusMinutes",
        Quantity {
            default: 25.0,
            min: 5.0,
            max: 180.0,
        },
    );
    rules.insert("zenMode", Flag { default: false });

    rules
}

/// Static schema for all known setting keys.
pub struct SettingsSchema;

impl SettingsSchema {
    /// The full rule table, keyed in canonical (schema) order.
    pub fn rules() -> &'static IndexMap<&'static str, SettingRule> {
        static RULES: OnceLock<IndexMap<&'static str, SettingRule>> = OnceLock::new();
        RULES.get_or_init(rule_table)
    }

    pub fn rule(key: &str) -> Option<&'static SettingRule> {
        Self::rules().get(key)
    }

    /// A fresh snapshot built entirely from schema defaults.
    pub fn defaults() -> Settings {
        let values = Self::rules()
            .iter()
            .map(|(key, rule)| ((*key).to_string(), rule.default_value()))
            .collect();
        Settings::from_raw(values)
    }

    /// Validate and sanitize a raw settings mapping against the schema.
    ///
    /// The output always contains exactly the schema's keys, in schema order,
    /// with every value conforming to its rule.
    pub fn validate_and_merge(raw: &IndexMap<String, SettingValue>) -> Settings {
        let mut out = IndexMap::with_capacity(Self::rules().len());
        let mut resets = 0usize;

        for (key, rule) in Self::rules() {
            let Some(value) = raw.get(*key) else {
                // Key missing: new setting shipped, user hasn't seen it yet
                out.insert((*key).to_string(), rule.default_value());
                continue;
            };

            match rule.conform(value) {
                Some(conformed) => {
                    if &conformed != value {
                        tracing::debug!(
                            key,
                            "settings: value {:?} conformed to {:?}",
                            value,
                            conformed
                        );
                    }
                    out.insert((*key).to_string(), conformed);
                }
                None => {
                    tracing::warn!(
                        key,
                        expected = rule.kind_name(),
                        got = value.kind_name(),
                        "settings: invalid value, resetting to default"
                    );
                    out.insert((*key).to_string(), rule.default_value());
                    resets += 1;
                }
            }
        }

        for key in raw.keys() {
            if !Self::rules().contains_key(key.as_str()) {
                tracing::debug!(key, "settings: unknown key ignored (stale/renamed?)");
            }
        }

        if resets > 0 {
            tracing::warn!(resets, "settings: key(s) reset to defaults");
        }

        Settings::from_raw(out)
    }
}
