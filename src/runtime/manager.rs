//! Feature orchestration.
//!
//! [`FeatureManager`] owns every registered feature and drives their
//! lifecycles from settings snapshots. Each `init` pass applies the snapshot
//! to all features in registration order, tracks per-feature error budgets,
//! and quarantines a feature once it exhausts its budget so one misbehaving
//! augmentation cannot take the page down with it.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use indexmap::IndexMap;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::features::FeatureKind;
use crate::models::Settings;
use crate::runtime::events::RuntimeEvent;
use crate::runtime::feature::{Feature, FeatureContext};

/// Consecutive-pass error budget before a feature is quarantined.
pub const MAX_FEATURE_ERRORS: u32 = 3;

struct RegistryEntry {
    feature: Box<dyn Feature>,
    error_count: u32,
}

/// Owns the feature registry and applies settings snapshots to it.
pub struct FeatureManager {
    ctx: FeatureContext,
    registry: IndexMap<&'static str, RegistryEntry>,
    instantiated: bool,
    settings: Arc<Settings>,
    epoch: u64,
}

impl FeatureManager {
    pub fn new(ctx: FeatureContext) -> Self {
        Self {
            ctx,
            registry: IndexMap::new(),
            instantiated: false,
            settings: Arc::new(Settings::defaults()),
            epoch: 0,
        }
    }

    /// Add a feature to the registry. Rejects duplicate names; the first
    /// registration wins.
    pub fn insert_feature(&mut self, feature: Box<dyn Feature>) {
        let name = feature.name();
        if self.registry.contains_key(name) {
            warn!(feature = name, "Duplicate feature name rejected");
            return;
        }
        self.registry.insert(
            name,
            RegistryEntry {
                feature,
                error_count: 0,
            },
        );
    }

    /// Run one orchestration pass with `settings`.
    ///
    /// The first pass instantiates the built-in features. Every pass resets
    /// all error budgets, applies the snapshot to each feature in order, and
    /// finishes by broadcasting [`RuntimeEvent::FeaturesUpdated`].
    pub async fn init(&mut self, settings: Arc<Settings>) {
        self.settings = settings;
        self.epoch += 1;
        for entry in self.registry.values_mut() {
            entry.error_count = 0;
        }

        if !self.instantiated {
            for kind in FeatureKind::ALL {
                self.insert_feature(kind.construct(&self.ctx));
            }
            self.instantiated = true;
            info!(features = self.registry.len(), "Feature registry instantiated");
        }

        self.apply_features().await;
    }

    /// Apply the current snapshot to every feature that still has budget.
    async fn apply_features(&mut self) {
        let diagnostics = self.ctx.diagnostics.clone();
        let metrics = Arc::clone(&self.ctx.metrics);
        let settings = Arc::clone(&self.settings);

        for (name, entry) in self.registry.iter_mut() {
            if entry.error_count >= MAX_FEATURE_ERRORS {
                debug!(feature = name, "Skipping quarantined feature");
                continue;
            }
            match entry.feature.update(&settings).await {
                Ok(()) => {
                    metrics.features_applied.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    entry.error_count += 1;
                    metrics.feature_errors.fetch_add(1, Ordering::Relaxed);
                    error!(
                        feature = name,
                        error = %err,
                        errors = entry.error_count,
                        "Feature update failed"
                    );
                    if entry.error_count == MAX_FEATURE_ERRORS {
                        warn!(feature = name, "Feature quarantined after repeated errors");
                        metrics.features_disabled.fetch_add(1, Ordering::Relaxed);
                        let _ = diagnostics.send(RuntimeEvent::FeatureDisabled {
                            name: name.to_string(),
                            error: err.to_string(),
                        });
                    }
                }
            }
        }

        metrics.init_passes.fetch_add(1, Ordering::Relaxed);
        let _ = diagnostics.send(RuntimeEvent::FeaturesUpdated {
            settings: Arc::clone(&self.settings),
            epoch: self.epoch,
        });
    }

    /// Re-apply the current snapshot without resetting error budgets.
    pub async fn refresh(&mut self) {
        self.apply_features().await;
    }

    pub fn feature(&self, name: &str) -> Option<&dyn Feature> {
        self.registry.get(name).map(|entry| entry.feature.as_ref())
    }

    pub fn error_count(&self, name: &str) -> Option<u32> {
        self.registry.get(name).map(|entry| entry.error_count)
    }

    pub fn feature_count(&self) -> usize {
        self.registry.len()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Subscribe to the runtime's diagnostic events.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.ctx.diagnostics.subscribe()
    }
}
