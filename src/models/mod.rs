//! Data model for user settings.
//!
//! A [`Settings`] value is an immutable, insertion-ordered snapshot of every
//! user-controlled setting. Snapshots are produced by the
//! [`SettingsStore`](crate::config::SettingsStore), validated against the
//! [`SettingsSchema`] on every load and save, and handed to the feature
//! runtime wholesale behind an `Arc`. Features read, never write.

pub mod schema;
pub mod settings;

pub use schema::{SettingRule, SettingsSchema};
pub use settings::{SettingValue, Settings};
