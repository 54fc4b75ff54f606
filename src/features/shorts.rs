//! Shorts filter feature.
//!
//! Hides short-form video shelves. Gated by `hideShorts`. A marker class on
//! the root lets host styling collapse everything at once, and an observer
//! watch tags each shelf individually as the page streams new ones in.

use async_trait::async_trait;
use tracing::warn;

use crate::dom::Selector;
use crate::models::Settings;
use crate::runtime::feature::{Feature, FeatureBase, FeatureContext, FeatureError};

const ROOT_CLASS: &str = "graft-hide-shorts";
const HIDDEN_CLASS: &str = "graft-hidden";
const SHELF_SELECTOR: &str = ".shorts-shelf";
const WATCH_ID: &str = "shorts-shelves";

pub struct ShortsFilter {
    base: FeatureBase,
}

impl ShortsFilter {
    pub fn new(ctx: &FeatureContext) -> Self {
        Self {
            base: FeatureBase::new(ctx),
        }
    }

    fn shelf_selector() -> Result<Selector, FeatureError> {
        Ok(Selector::parse(SHELF_SELECTOR)?)
    }
}

#[async_trait]
impl Feature for ShortsFilter {
    fn name(&self) -> &'static str {
        "shortsFilter"
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
        let doc = self.base.document().clone();
        doc.add_class(doc.root(), ROOT_CLASS)?;

        // tag shelves already present, then keep tagging as they stream in
        self.base.observer().register(
            WATCH_ID,
            Self::shelf_selector()?,
            true,
            true,
            |doc, node| {
                if let Err(err) = doc.add_class(node, HIDDEN_CLASS) {
                    warn!(error = %err, "Failed to hide shorts shelf");
                }
            },
        );
        Ok(())
    }

    async fn on_disable(&mut self, _settings: &Settings) -> Result<(), FeatureError> {
        self.base.observer().unregister(WATCH_ID);
        let doc = self.base.document().clone();
        doc.remove_class(doc.root(), ROOT_CLASS)?;
        for node in doc.query_selector_all(&Self::shelf_selector()?) {
            doc.remove_class(node, HIDDEN_CLASS)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::feature::tests_support::test_context;

    #[tokio::test]
    async fn test_shelves_hidden_on_enable_and_restored_on_disable() {
        let (ctx, _dir) = test_context();
        let doc = ctx.document.clone();
        let shelf = doc.create_element("div");
        doc.add_class(shelf, "shorts-shelf").unwrap();
        doc.append_child(doc.root(), shelf).unwrap();

        let mut filter = ShortsFilter::new(&ctx);
        let on = Settings::defaults().with("hideShorts", true);
        filter.update(&on).await.unwrap();

        assert!(doc.has_class(doc.root(), "graft-hide-shorts"));
        // present shelves are tagged immediately at enablement
        assert!(doc.has_class(shelf, "graft-hidden"));

        let late = doc.create_element("div");
        doc.add_class(late, "shorts-shelf").unwrap();
        doc.append_child(doc.root(), late).unwrap();
        filter.base().observer().sweep();
        assert!(doc.has_class(late, "graft-hidden"));

        let off = on.with("hideShorts", false);
        filter.update(&off).await.unwrap();
        assert!(!doc.has_class(doc.root(), "graft-hide-shorts"));
        assert!(!doc.has_class(shelf, "graft-hidden"));
        assert!(!doc.has_class(late, "graft-hidden"));
        assert_eq!(filter.base().observer().watch_count(), 0);
    }
}
