//! Layout feature.
//!
//! Stamps a column-count attribute on feed containers so host styling can
//! render a fixed grid. Gated by `grid4x4`; home and search feeds take their
//! counts from `homeColumns` and `searchColumns`. Feed containers are
//! re-rendered wholesale on navigation, so the observer re-stamps every
//! match on every sweep.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tracing::warn;

use crate::dom::Selector;
use crate::models::Settings;
use crate::runtime::cache::ElementCache;
use crate::runtime::feature::{Feature, FeatureBase, FeatureContext, FeatureError};

const COLUMNS_ATTR: &str = "data-graft-columns";
const SEARCH_GRID_CLASS: &str = "graft-search-grid";
const FEED_SELECTOR: &str = ".feed";
const SEARCH_SELECTOR: &str = ".search-results";

pub struct Layout {
    base: FeatureBase,
    cache: ElementCache,
    home_columns: Arc<AtomicU32>,
    search_columns: Arc<AtomicU32>,
}

impl Layout {
    pub fn new(ctx: &FeatureContext) -> Self {
        Self {
            base: FeatureBase::new(ctx),
            cache: ctx.element_cache(),
            home_columns: Arc::new(AtomicU32::new(0)),
            search_columns: Arc::new(AtomicU32::new(0)),
        }
    }

    fn read_columns(&self, settings: &Settings) -> Result<(), FeatureError> {
        self.home_columns
            .store(settings.integer("homeColumns").max(1) as u32, Ordering::SeqCst);
        self.search_columns
            .store(settings.integer("searchColumns").max(1) as u32, Ordering::SeqCst);

        let doc = self.base.document().clone();
        doc.toggle_class(doc.root(), SEARCH_GRID_CLASS, settings.flag("searchGrid"))?;
        Ok(())
    }

    fn stamp_all(&self) -> Result<(), FeatureError> {
        let doc = self.base.document().clone();
        for (selector, columns) in [
            (FEED_SELECTOR, &self.home_columns),
            (SEARCH_SELECTOR, &self.search_columns),
        ] {
            let count = columns.load(Ordering::SeqCst).to_string();
            for node in self.cache.get_all(&Selector::from_str(selector)?) {
                doc.set_attribute(node, COLUMNS_ATTR, &count)?;
            }
        }
        Ok(())
    }

    fn register_watches(&self) -> Result<(), FeatureError> {
        for (id, selector, columns) in [
            ("layout-home", FEED_SELECTOR, &self.home_columns),
            ("layout-search", SEARCH_SELECTOR, &self.search_columns),
        ] {
            let columns = Arc::clone(columns);
            self.base.observer().register(
                id,
                Selector::from_str(selector)?,
                true,
                false,
                move |doc, node| {
                    let count = columns.load(Ordering::SeqCst).to_string();
                    if let Err(err) = doc.set_attribute(node, COLUMNS_ATTR, &count) {
                        warn!(error = %err, "Failed to stamp column count");
                    }
                },
            );
        }
        Ok(())
    }

    fn clear_all(&self) -> Result<(), FeatureError> {
        let doc = self.base.document().clone();
        for selector in [FEED_SELECTOR, SEARCH_SELECTOR] {
            for node in self.cache.get_all(&Selector::from_str(selector)?) {
                doc.remove_attribute(node, COLUMNS_ATTR)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Feature for Layout {
    fn name(&self) -> &'static str {
        "layout"
    }

    fn base(&self) -> &FeatureBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FeatureBase {
        &mut self.base
    }

    fn config_key(&self) -> Option<&'static str> {
        Some("grid4x4")
    }

    async fn on_enable(&mut self, settings: &Settings) -> Result<(), FeatureError> {
        self.read_columns(settings)?;
        self.register_watches()?;
        self.stamp_all()?;

        // pin the primary feed so lookups survive page churn
        if self
            .cache
            .get("feed", &Selector::from_str(FEED_SELECTOR)?)
            .is_some()
        {
            self.cache.watch("feed");
        }
        Ok(())
    }

    async fn on_update(&mut self, settings: &Settings) -> Result<(), FeatureError> {
        self.read_columns(settings)?;
        self.stamp_all()
    }

    async fn on_disable(&mut self, _settings: &Settings) -> Result<(), FeatureError> {
        self.base.observer().unregister("layout-home");
        self.base.observer().unregister("layout-search");
        self.cache.remove("feed");
        let doc = self.base.document().clone();
        doc.remove_class(doc.root(), SEARCH_GRID_CLASS)?;
        self.clear_all()
    }
}
