//! Feature lifecycle contract.
//!
//! A feature is one self-contained page augmentation. It receives everything
//! it is allowed to touch through [`FeatureContext`], keeps its bookkeeping
//! in an embedded [`FeatureBase`], and implements the [`Feature`] trait. The
//! provided [`Feature::update`] drives the enable/disable state machine from
//! a settings snapshot; implementors only write the three lifecycle hooks.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::background::{BackgroundClient, BackgroundError};
use crate::dom::{Document, DomError, SelectorError};
use crate::metrics::Metrics;
use crate::models::Settings;
use crate::runtime::cache::ElementCache;
use crate::runtime::events::{EventBus, EventPayload, ListenerId, RuntimeEvent};
use crate::runtime::observer::DomObserver;

/// Errors surfaced by feature lifecycle hooks.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("selector error: {0}")]
    Selector(#[from] SelectorError),

    #[error("document error: {0}")]
    Dom(#[from] DomError),

    #[error("background service error: {0}")]
    Background(#[from] BackgroundError),

    #[error("{0}")]
    Other(String),
}

/// Everything a feature is handed at construction time.
#[derive(Debug, Clone)]
pub struct FeatureContext {
    pub document: Document,
    pub page_events: EventBus,
    pub diagnostics: broadcast::Sender<RuntimeEvent>,
    pub background: BackgroundClient,
    pub metrics: Arc<Metrics>,
}

impl FeatureContext {
    pub fn new(
        document: Document,
        page_events: EventBus,
        diagnostics: broadcast::Sender<RuntimeEvent>,
        background: BackgroundClient,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            document,
            page_events,
            diagnostics,
            background,
            metrics,
        }
    }

    /// A fresh observer over this context's document.
    pub fn observer(&self) -> DomObserver {
        DomObserver::new(self.document.clone(), Arc::clone(&self.metrics))
    }

    /// A fresh element cache over this context's document.
    pub fn element_cache(&self) -> ElementCache {
        ElementCache::new(self.document.clone(), Arc::clone(&self.metrics))
    }
}

/// Per-feature bookkeeping embedded in every feature struct.
///
/// Tracks the enabled flag, the feature's own observer, and every page event
/// listener it registers, so teardown can undo all of it.
pub struct FeatureBase {
    ctx: FeatureContext,
    observer: DomObserver,
    listeners: Vec<(String, ListenerId)>,
    enabled: bool,
}

impl FeatureBase {
    pub fn new(ctx: &FeatureContext) -> Self {
        Self {
            observer: ctx.observer(),
            ctx: ctx.clone(),
            listeners: Vec::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn document(&self) -> &Document {
        &self.ctx.document
    }

    pub fn context(&self) -> &FeatureContext {
        &self.ctx
    }

    pub fn observer(&self) -> &DomObserver {
        &self.observer
    }

    /// Register a page event listener, recorded for teardown.
    pub fn add_listener(
        &mut self,
        event: &str,
        listener: impl FnMut(&EventPayload) + Send + 'static,
    ) {
        let id = self.ctx.page_events.on(event, listener);
        self.listeners.push((event.to_string(), id));
    }

    /// Remove every listener this feature registered.
    pub fn cleanup_listeners(&mut self) {
        for (event, id) in self.listeners.drain(..) {
            self.ctx.page_events.off(&event, id);
        }
    }

    /// Start this feature's observer. Called as part of enablement.
    pub fn begin(&self) {
        self.observer.start();
    }

    /// Stop the observer and drop page event listeners.
    pub fn teardown(&mut self) {
        self.observer.stop();
        self.cleanup_listeners();
    }
}

/// One page augmentation with a settings-driven lifecycle.
///
/// Implementors provide the hooks; the provided [`update`] owns the state
/// transitions and is what the orchestrator calls each pass.
///
/// [`update`]: Feature::update
#[async_trait]
pub trait Feature: Send {
    /// Stable identifier, unique across the registry.
    fn name(&self) -> &'static str;

    fn base(&self) -> &FeatureBase;
    fn base_mut(&mut self) -> &mut FeatureBase;

    /// Settings key gating this feature, or `None` for always-on features.
    fn config_key(&self) -> Option<&'static str> {
        None
    }

    /// Called once per transition from disabled to enabled. The feature is
    /// only marked enabled after this returns `Ok`.
    async fn on_enable(&mut self, _settings: &Settings) -> Result<(), FeatureError> {
        Ok(())
    }

    /// Called once per transition from enabled to disabled. Teardown of the
    /// observer and listeners happens after this returns `Ok`.
    async fn on_disable(&mut self, _settings: &Settings) -> Result<(), FeatureError> {
        Ok(())
    }

    /// Called on every pass where the feature stays enabled.
    async fn on_update(&mut self, _settings: &Settings) -> Result<(), FeatureError> {
        Ok(())
    }

    /// Drive the lifecycle from a settings snapshot.
    async fn update(&mut self, settings: &Settings) -> Result<(), FeatureError> {
        let should_enable = self.config_key().is_none_or(|key| settings.flag(key));
        if should_enable && !self.base().enabled {
            self.base().begin();
            if let Err(err) = self.on_enable(settings).await {
                // partial enablement must not outlive the failure
                self.base_mut().teardown();
                self.base().observer().clear();
                return Err(err);
            }
            self.base_mut().enabled = true;
            debug!(feature = self.name(), "Feature enabled");
        } else if !should_enable && self.base().enabled {
            self.on_disable(settings).await?;
            self.base_mut().teardown();
            self.base_mut().enabled = false;
            debug!(feature = self.name(), "Feature disabled");
        } else if self.base().enabled {
            self.on_update(settings).await?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::tests_support::test_context as context;
    use super::*;

    struct Tracked {
        base: FeatureBase,
        enables: u32,
        disables: u32,
        updates: u32,
        fail_enable: bool,
    }

    impl Tracked {
        fn new(ctx: &FeatureContext) -> Self {
            Self {
                base: FeatureBase::new(ctx),
                enables: 0,
                disables: 0,
                updates: 0,
                fail_enable: false,
            }
        }
    }

    #[async_trait]
    impl Feature for Tracked {
        fn name(&self) -> &'static str {
            "tracked"
        }

        fn base(&self) -> &FeatureBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut FeatureBase {
            &mut self.base
        }

        fn config_key(&self) -> Option<&'static str> {
            Some("hideShorts")
        }

        async fn on_enable(&mut self, _settings: &Settings) -> Result<(), FeatureError> {
            if self.fail_enable {
                return Err(FeatureError::Other("enable failed".to_string()));
            }
            self.enables += 1;
            Ok(())
        }

        async fn on_disable(&mut self, _settings: &Settings) -> Result<(), FeatureError> {
            self.disables += 1;
            Ok(())
        }

        async fn on_update(&mut self, _settings: &Settings) -> Result<(), FeatureError> {
            self.updates += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let (ctx, _dir) = context();
        let mut feature = Tracked::new(&ctx);

        let off = Settings::defaults();
        let on = Settings::defaults().with("hideShorts", true);

        // disabled and staying disabled runs no hooks
        feature.update(&off).await.unwrap();
        assert_eq!((feature.enables, feature.updates), (0, 0));
        assert!(!feature.base().is_enabled());

        feature.update(&on).await.unwrap();
        assert!(feature.base().is_enabled());
        assert!(feature.base().observer().is_running());
        assert_eq!(feature.enables, 1);

        // staying enabled runs on_update, not on_enable
        feature.update(&on).await.unwrap();
        assert_eq!((feature.enables, feature.updates), (1, 1));

        feature.update(&off).await.unwrap();
        assert!(!feature.base().is_enabled());
        assert!(!feature.base().observer().is_running());
        assert_eq!(feature.disables, 1);
    }

    #[tokio::test]
    async fn test_failed_enable_is_retried() {
        let (ctx, _dir) = context();
        let mut feature = Tracked::new(&ctx);
        feature.fail_enable = true;

        let on = Settings::defaults().with("hideShorts", true);
        assert!(feature.update(&on).await.is_err());
        assert!(!feature.base().is_enabled());

        feature.fail_enable = false;
        feature.update(&on).await.unwrap();
        assert!(feature.base().is_enabled());
        assert_eq!(feature.enables, 1);
    }

    #[tokio::test]
    async fn test_failed_enable_tears_down_partial_state() {
        use crate::dom::Selector;

        struct HalfWay {
            base: FeatureBase,
        }

        #[async_trait]
        impl Feature for HalfWay {
            fn name(&self) -> &'static str {
                "half-way"
            }
            fn base(&self) -> &FeatureBase {
                &self.base
            }
            fn base_mut(&mut self) -> &mut FeatureBase {
                &mut self.base
            }
            fn config_key(&self) -> Option<&'static str> {
                Some("hideShorts")
            }

            async fn on_enable(&mut self, _settings: &Settings) -> Result<(), FeatureError> {
                self.base.observer().register(
                    "shelves",
                    Selector::parse(".shelf")?,
                    true,
                    false,
                    |_, _| {},
                );
                self.base.add_listener("navigate-finish", |_| {});
                Err(FeatureError::Other("enable failed".to_string()))
            }
        }

        let (ctx, _dir) = context();
        let mut feature = HalfWay {
            base: FeatureBase::new(&ctx),
        };

        let on = Settings::defaults().with("hideShorts", true);
        assert!(feature.update(&on).await.is_err());

        // nothing from the aborted enablement stays live
        assert!(!feature.base().observer().is_running());
        assert_eq!(feature.base().observer().watch_count(), 0);
        assert_eq!(ctx.page_events.listener_count("navigate-finish"), 0);

        feature.update(&Settings::defaults()).await.unwrap();
        assert!(!feature.base().is_enabled());
    }

    #[tokio::test]
    async fn test_always_on_without_config_key() {
        struct AlwaysOn {
            base: FeatureBase,
        }

        #[async_trait]
        impl Feature for AlwaysOn {
            fn name(&self) -> &'static str {
                "always-on"
            }
            fn base(&self) -> &FeatureBase {
                &self.base
            }
            fn base_mut(&mut self) -> &mut FeatureBase {
                &mut self.base
            }
        }

        let (ctx, _dir) = context();
        let mut feature = AlwaysOn {
            base: FeatureBase::new(&ctx),
        };
        feature.update(&Settings::defaults()).await.unwrap();
        assert!(feature.base().is_enabled());
    }

    #[tokio::test]
    async fn test_teardown_removes_listeners() {
        let (ctx, _dir) = context();
        let mut feature = Tracked::new(&ctx);
        feature.base_mut().add_listener("navigate-finish", |_| {});
        assert_eq!(ctx.page_events.listener_count("navigate-finish"), 1);

        feature.base_mut().teardown();
        assert_eq!(ctx.page_events.listener_count("navigate-finish"), 0);
    }
}
