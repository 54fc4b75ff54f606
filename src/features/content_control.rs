//! Content control feature.
//!
//! Always-on feature that translates the fine-grained hide toggles into
//! marker classes on the document root. Host styling does the actual hiding;
//! this feature only keeps the markers in sync with the settings snapshot.

use async_trait::async_trait;

use crate::models::Settings;
use crate::runtime::feature::{Feature, FeatureBase, FeatureContext, FeatureError};

/// Root marker class per hide toggle.
const TOGGLES: [(&str, &str); 6] = [
    ("hideMixes", "graft-hide-mixes"),
    ("hideComments", "graft-hide-comments"),
    ("hideMerch", "graft-hide-merch"),
    ("hideEndScreens", "graft-hide-end-screens"),
    ("hideScrollbar", "graft-hide-scrollbar"),
    ("cleanSearch", "graft-clean-search"),
];

pub struct ContentControl {
    base: FeatureBase,
}

impl ContentControl {
    pub fn new(ctx: &FeatureContext) -> Self {
        Self {
            base: FeatureBase::new(ctx),
        }
    }

    fn sync(&self, settings: &Settings) -> Result<(), FeatureError> {
        let doc = self.base.document().clone();
        let root = doc.root();
        for (key, class) in TOGGLES {
            doc.toggle_class(root, class, settings.flag(key))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Feature for ContentControl {
    fn name(&self) -> &'static str {
        "contentControl"
    }

    fn base(&self) -> &FeatureBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FeatureBase {
        &mut self.base
    }

    async fn on_enable(&mut self, settings: &Settings) -> Result<(), FeatureError> {
        self.sync(settings)
    }

    async fn on_update(&mut self, settings: &Settings) -> Result<(), FeatureError> {
        self.sync(settings)
    }

    async fn on_disable(&mut self, _settings: &Settings) -> Result<(), FeatureError> {
        let doc = self.base.document().clone();
        let root = doc.root();
        for (_, class) in TOGGLES {
            doc.remove_class(root, class)?;
        }
        Ok(())
    }
}
