//! Theme feature.
//!
//! Stamps theme marker classes on the document root so host styling can key
//! off them. Gated by `premiumTheme`; the active variant and the true-black
//! modifier follow `activeTheme` and `trueBlack`.

use async_trait::async_trait;

use crate::models::Settings;
use crate::runtime::feature::{Feature, FeatureBase, FeatureContext, FeatureError};

const THEME_CLASS: &str = "graft-theme";
const TRUE_BLACK_CLASS: &str = "graft-true-black";

pub struct Theme {
    base: FeatureBase,
    applied_variant: Option<String>,
}

impl Theme {
    pub fn new(ctx: &FeatureContext) -> Self {
        Self {
            base: FeatureBase::new(ctx),
            applied_variant: None,
        }
    }

    fn variant_class(name: &str) -> String {
        format!("{THEME_CLASS}-{name}")
    }

    fn apply(&mut self, settings: &Settings) -> Result<(), FeatureError> {
        let doc = self.base.document().clone();
        let root = doc.root();
        doc.add_class(root, THEME_CLASS)?;

        let variant = settings.text("activeTheme").to_string();
        if self.applied_variant.as_deref() != Some(&variant) {
            if let Some(old) = self.applied_variant.take() {
                doc.remove_class(root, &Self::variant_class(&old))?;
            }
            doc.add_class(root, &Self::variant_class(&variant))?;
            self.applied_variant = Some(variant);
        }

        doc.toggle_class(root, TRUE_BLACK_CLASS, settings.flag("trueBlack"))?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), FeatureError> {
        let doc = self.base.document().clone();
        let root = doc.root();
        doc.remove_class(root, THEME_CLASS)?;
        doc.remove_class(root, TRUE_BLACK_CLASS)?;
        if let Some(old) = self.applied_variant.take() {
            doc.remove_class(root, &Self::variant_class(&old))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Feature for Theme {
    fn name(&self) -> &'static str {
        "theme"
    }

    fn base(&self) -> &FeatureBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FeatureBase {
        &mut self.base
    }

    fn config_key(&self) -> Option<&'static str> {
        Some("premiumTheme")
    }

    async fn on_enable(&mut self, settings: &Settings) -> Result<(), FeatureError> {
        self.apply(settings)
    }

    async fn on_update(&mut self, settings: &Settings) -> Result<(), FeatureError> {
        self.apply(settings)
    }

    async fn on_disable(&mut self, _settings: &Settings) -> Result<(), FeatureError> {
        self.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::feature::tests_support::test_context;

    #[tokio::test]
    async fn test_theme_classes_follow_settings() {
        let (ctx, _dir) = test_context();
        let doc = ctx.document.clone();
        let root = doc.root();
        let mut theme = Theme::new(&ctx);

        let settings = Settings::defaults().with("trueBlack", true);
        theme.update(&settings).await.unwrap();
        assert!(doc.has_class(root, "graft-theme"));
        assert!(doc.has_class(root, "graft-theme-default"));
        assert!(doc.has_class(root, "graft-true-black"));

        // switching the variant swaps the variant class
        let settings = settings.with("activeTheme", "nord");
        theme.update(&settings).await.unwrap();
        assert!(!doc.has_class(root, "graft-theme-default"));
        assert!(doc.has_class(root, "graft-theme-nord"));

        let settings = settings.with("premiumTheme", false);
        theme.update(&settings).await.unwrap();
        assert!(!doc.has_class(root, "graft-theme"));
        assert!(!doc.has_class(root, "graft-theme-nord"));
        assert!(!doc.has_class(root, "graft-true-black"));
    }
}
