// Settings persistence module
//
// Handles loading and saving runtime settings with YAML serialization

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::models::{SettingValue, Settings, SettingsSchema};

const SETTINGS_FILE: &str = "settings.yaml";

/// Buffered settings snapshots per subscriber before lagging.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Persistent, validated settings with change notification.
///
/// Every snapshot handed out has passed [`SettingsSchema::validate_and_merge`],
/// so consumers never see a missing key or an out-of-range value. Cheap to
/// clone; all clones share the same current snapshot and change channel.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    settings_path: Utf8PathBuf,
    current: Arc<RwLock<Arc<Settings>>>,
    changes: broadcast::Sender<Arc<Settings>>,
}

impl SettingsStore {
    /// Open the store rooted at `config_dir`, creating the directory and a
    /// defaults file if nothing is there yet.
    pub fn new(config_dir: impl AsRef<Utf8Path>) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_owned();
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {config_dir}"))?;

        let settings_path = config_dir.join(SETTINGS_FILE);
        let settings = if settings_path.exists() {
            Self::load_from(&settings_path)?
        } else {
            info!(path = %settings_path, "No settings file found, writing defaults");
            let defaults = Settings::defaults();
            Self::write_to(&settings_path, &defaults)?;
            defaults
        };

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            settings_path,
            current: Arc::new(RwLock::new(Arc::new(settings))),
            changes,
        })
    }

    fn load_from(path: &Utf8Path) -> Result<Settings> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {path}"))?;
        let raw: IndexMap<String, SettingValue> = serde_yaml_ng::from_str(&contents)
            .with_context(|| format!("Failed to parse settings file: {path}"))?;
        debug!(path = %path, keys = raw.len(), "Loaded settings file");
        Ok(SettingsSchema::validate_and_merge(&raw))
    }

    fn write_to(path: &Utf8Path, settings: &Settings) -> Result<()> {
        let yaml = serde_yaml_ng::to_string(settings)
            .context("Failed to serialize settings to YAML")?;
        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write settings file: {path}"))?;
        Ok(())
    }

    /// The current validated snapshot.
    pub fn snapshot(&self) -> Arc<Settings> {
        Arc::clone(&self.current.read().unwrap())
    }

    /// Validate, persist, publish. Subscribers receive the new snapshot.
    pub fn save(&self, settings: Settings) -> Result<Arc<Settings>> {
        let validated = SettingsSchema::validate_and_merge(settings.raw());
        Self::write_to(&self.settings_path, &validated)?;

        let snapshot = Arc::new(validated);
        *self.current.write().unwrap() = Arc::clone(&snapshot);
        if self.changes.send(Arc::clone(&snapshot)).is_err() {
            debug!("Settings changed with no subscribers");
        }
        Ok(snapshot)
    }

    /// Apply `mutate` to a copy of the current settings and save the result.
    pub fn update(&self, mutate: impl FnOnce(&mut Settings)) -> Result<Arc<Settings>> {
        let mut settings = (*self.snapshot()).clone();
        mutate(&mut settings);
        self.save(settings)
    }

    /// Re-read the settings file, replacing the current snapshot.
    pub fn reload(&self) -> Result<Arc<Settings>> {
        let settings = if self.settings_path.exists() {
            Self::load_from(&self.settings_path)?
        } else {
            warn!(path = %self.settings_path, "Settings file missing on reload, using defaults");
            Settings::defaults()
        };
        let snapshot = Arc::new(settings);
        *self.current.write().unwrap() = Arc::clone(&snapshot);
        let _ = self.changes.send(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Subscribe to settings changes.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Settings>> {
        self.changes.subscribe()
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }
}
