//! Runtime assembly.
//!
//! [`AppRuntime::bootstrap`] wires the document, settings store, background
//! service, and feature manager together and starts the driver task. The
//! driver owns the manager outright: navigation events and settings changes
//! are funneled into one bounded trigger queue and applied one orchestration
//! pass at a time, so passes never overlap. A burst of queued triggers
//! collapses into a single pass using the newest settings snapshot.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::background::{BackgroundClient, BackgroundService};
use crate::config::SettingsStore;
use crate::dom::Document;
use crate::metrics::Metrics;
use crate::models::Settings;
use crate::runtime::events::{EventBus, RuntimeEvent, NAVIGATE_FINISH};
use crate::runtime::feature::FeatureContext;
use crate::runtime::manager::FeatureManager;

/// Queued triggers before navigation events start being dropped.
const TRIGGER_QUEUE_CAPACITY: usize = 16;

/// Diagnostic broadcast capacity.
const DIAGNOSTIC_CHANNEL_CAPACITY: usize = 100;

enum Trigger {
    /// A navigation settled; re-apply the current snapshot.
    Navigation,
    /// Settings changed; apply this snapshot.
    Settings(Arc<Settings>),
}

/// A fully assembled, running instance of the runtime.
pub struct AppRuntime {
    document: Document,
    page_events: EventBus,
    diagnostics: broadcast::Sender<RuntimeEvent>,
    store: SettingsStore,
    background: BackgroundClient,
    metrics: Arc<Metrics>,
    driver: JoinHandle<()>,
    forwarder: JoinHandle<()>,
    background_task: JoinHandle<()>,
}

impl AppRuntime {
    /// Assemble the runtime around `document` and `store`, run the first
    /// orchestration pass, and start the driver.
    pub async fn bootstrap(document: Document, store: SettingsStore) -> Result<Self> {
        let page_events = EventBus::new();
        let (diagnostics, _) = broadcast::channel(DIAGNOSTIC_CHANNEL_CAPACITY);
        let metrics = Arc::new(Metrics::new());
        let (background, background_task) = BackgroundService::spawn(store.clone());

        let ctx = FeatureContext::new(
            document.clone(),
            page_events.clone(),
            diagnostics.clone(),
            background.clone(),
            Arc::clone(&metrics),
        );
        let mut manager = FeatureManager::new(ctx);
        manager.init(store.snapshot()).await;

        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_QUEUE_CAPACITY);

        // navigation feeds the queue from the page event bus
        let nav_tx = trigger_tx.clone();
        page_events.on(NAVIGATE_FINISH, move |_| {
            if nav_tx.try_send(Trigger::Navigation).is_err() {
                warn!("Trigger queue full, dropping navigation trigger");
            }
        });

        // settings changes feed the queue from the store's broadcast
        let mut changes = store.subscribe();
        let settings_tx = trigger_tx;
        let forwarder = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(snapshot) => {
                        if settings_tx
                            .send(Trigger::Settings(snapshot))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // only the newest snapshot matters, the driver
                        // collapses to it anyway
                        debug!(skipped, "Settings forwarder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let driver = tokio::spawn(drive(manager, store.clone(), trigger_rx));

        let _ = diagnostics.send(RuntimeEvent::RuntimeReady);
        info!("Runtime bootstrapped");

        Ok(Self {
            document,
            page_events,
            diagnostics,
            store,
            background,
            metrics,
            driver,
            forwarder,
            background_task,
        })
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn page_events(&self) -> &EventBus {
        &self.page_events
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    pub fn background(&self) -> &BackgroundClient {
        &self.background
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Subscribe to the runtime's diagnostic events.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.diagnostics.subscribe()
    }

    /// Announce that a navigation finished settling.
    pub fn notify_navigation(&self, target: &str) {
        debug!(target = %target, "Navigation finished");
        self.page_events.emit(
            NAVIGATE_FINISH,
            &crate::runtime::events::EventPayload::Text(target.to_string()),
        );
    }

    /// Persist a settings change; the driver re-orchestrates from it.
    pub fn apply_settings(&self, mutate: impl FnOnce(&mut Settings)) -> Result<Arc<Settings>> {
        self.store
            .update(mutate)
            .context("Failed to apply settings change")
    }

    /// Stop the driver and companion tasks and log a metrics summary.
    pub fn shutdown(self) {
        self.driver.abort();
        self.forwarder.abort();
        self.background_task.abort();
        self.page_events.clear();
        self.metrics.log_summary();
        info!("Runtime shut down");
    }
}

/// Driver loop. Owns the manager; one orchestration pass at a time. Both
/// navigation and settings changes run a full re-init pass, matching what a
/// page rebuild needs.
async fn drive(
    mut manager: FeatureManager,
    store: SettingsStore,
    mut triggers: mpsc::Receiver<Trigger>,
) {
    while let Some(first) = triggers.recv().await {
        // collapse whatever queued up while the previous pass ran
        let mut newest_settings = match first {
            Trigger::Settings(snapshot) => Some(snapshot),
            Trigger::Navigation => None,
        };
        let mut collapsed = 0u32;
        while let Ok(next) = triggers.try_recv() {
            collapsed += 1;
            if let Trigger::Settings(snapshot) = next {
                newest_settings = Some(snapshot);
            }
        }
        if collapsed > 0 {
            debug!(collapsed, "Collapsed queued triggers into one pass");
        }

        let snapshot = newest_settings.unwrap_or_else(|| store.snapshot());
        manager.init(snapshot).await;
    }
    debug!("Driver loop stopped");
}
