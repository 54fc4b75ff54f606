//! Focus mode feature.
//!
//! Marks the page as being in a focus session and runs the countdown through
//! the background service's end-time based timer. Gated by
//! `enableFocusMode`; `focusMinutes` sets the session length and `zenMode`
//! adds a stricter marker on top. The focus marker is re-asserted after each
//! navigation because hosts rebuild the page around it.

use async_trait::async_trait;
use tracing::warn;

use crate::models::Settings;
use crate::runtime::events::NAVIGATE_FINISH;
use crate::runtime::feature::{Feature, FeatureBase, FeatureContext, FeatureError};

const FOCUS_CLASS: &str = "graft-focus";
const ZEN_CLASS: &str = "graft-zen";

pub struct FocusMode {
    base: FeatureBase,
}

impl FocusMode {
    pub fn new(ctx: &FeatureContext) -> Self {
        Self {
            base: FeatureBase::new(ctx),
        }
    }

    fn sync_markers(&self, settings: &Settings) -> Result<(), FeatureError> {
        let doc = self.base.document().clone();
        let root = doc.root();
        doc.add_class(root, FOCUS_CLASS)?;
        doc.toggle_class(root, ZEN_CLASS, settings.flag("zenMode"))?;
        Ok(())
    }
}

#[async_trait]
impl Feature for FocusMode {
    fn name(&self) -> &'static str {
        "focusMode"
    }

    fn base(&self) -> &FeatureBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FeatureBase {
        &mut self.base
    }

    fn config_key(&self) -> Option<&'static str> {
        Some("enableFocusMode")
    }

    async fn on_enable(&mut self, settings: &Settings) -> Result<(), FeatureError> {
        self.sync_markers(settings)?;

        let minutes = settings.integer("focusMinutes").max(1) as u64;
        self.base
            .context()
            .background
            .start_timer(minutes)
            .await?;

        // navigation rebuilds the root's class list on real hosts
        let doc = self.base.document().clone();
        self.base.add_listener(NAVIGATE_FINISH, move |_| {
            if let Err(err) = doc.add_class(doc.root(), FOCUS_CLASS) {
                warn!(error = %err, "Failed to re-assert focus marker");
            }
        });
        Ok(())
    }

    async fn on_update(&mut self, settings: &Settings) -> Result<(), FeatureError> {
        self.sync_markers(settings)
    }

    async fn on_disable(&mut self, _settings: &Settings) -> Result<(), FeatureError> {
        self.base.context().background.stop_timer().await?;
        let doc = self.base.document().clone();
        doc.remove_class(doc.root(), FOCUS_CLASS)?;
        doc.remove_class(doc.root(), ZEN_CLASS)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::events::EventPayload;
    use crate::runtime::feature::tests_support::test_context;

    #[tokio::test]
    async fn test_focus_session_marks_root_and_starts_timer() {
        let (ctx, _dir) = test_context();
        let doc = ctx.document.clone();
        let mut focus = FocusMode::new(&ctx);

        let on = Settings::defaults()
            .with("enableFocusMode", true)
            .with("focusMinutes", 40.0);
        focus.update(&on).await.unwrap();
        assert!(doc.has_class(doc.root(), "graft-focus"));

        let timer = ctx.background.timer_state().await.unwrap();
        assert!(timer.running);
        assert_eq!(timer.duration_minutes, 40);

        let off = on.with("enableFocusMode", false);
        focus.update(&off).await.unwrap();
        assert!(!doc.has_class(doc.root(), "graft-focus"));
        assert!(!ctx.background.timer_state().await.unwrap().running);
    }

    #[tokio::test]
    async fn test_marker_reasserted_after_navigation() {
        let (ctx, _dir) = test_context();
        let doc = ctx.document.clone();
        let mut focus = FocusMode::new(&ctx);

        let on = Settings::defaults().with("enableFocusMode", true);
        focus.update(&on).await.unwrap();

        doc.remove_class(doc.root(), "graft-focus").unwrap();
        ctx.page_events.emit(NAVIGATE_FINISH, &EventPayload::None);
        assert!(doc.has_class(doc.root(), "graft-focus"));

        // teardown drops the listener with the feature
        focus.update(&on.with("enableFocusMode", false)).await.unwrap();
        assert_eq!(ctx.page_events.listener_count(NAVIGATE_FINISH), 0);
    }
}
