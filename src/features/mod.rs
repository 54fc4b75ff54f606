//! Built-in page augmentations.
//!
//! Each feature lives in its own module and implements
//! [`Feature`](crate::runtime::feature::Feature). [`FeatureKind`] is the
//! closed registry of what ships with the runtime; the orchestrator
//! instantiates every kind on its first pass.

pub mod content_control;
pub mod focus_mode;
pub mod layout;
pub mod shorts;
pub mod theme;

use crate::runtime::feature::{Feature, FeatureContext};

pub use content_control::ContentControl;
pub use focus_mode::FocusMode;
pub use layout::Layout;
pub use shorts::ShortsFilter;
pub use theme::Theme;

/// The closed set of built-in features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Theme,
    Layout,
    ContentControl,
    ShortsFilter,
    FocusMode,
}

impl FeatureKind {
    /// Every built-in kind, in orchestration order.
    pub const ALL: [FeatureKind; 5] = [
        FeatureKind::Theme,
        FeatureKind::Layout,
        FeatureKind::ContentControl,
        FeatureKind::ShortsFilter,
        FeatureKind::FocusMode,
    ];

    /// Registry key for this kind.
    pub fn key(&self) -> &'static str {
        match self {
            FeatureKind::Theme => "theme",
            FeatureKind::Layout => "layout",
            FeatureKind::ContentControl => "contentControl",
            FeatureKind::ShortsFilter => "shortsFilter",
            FeatureKind::FocusMode => "focusMode",
        }
    }

    /// Build a fresh instance of this kind.
    pub fn construct(&self, ctx: &FeatureContext) -> Box<dyn Feature> {
        match self {
            FeatureKind::Theme => Box::new(Theme::new(ctx)),
            FeatureKind::Layout => Box::new(Layout::new(ctx)),
            FeatureKind::ContentControl => Box::new(ContentControl::new(ctx)),
            FeatureKind::ShortsFilter => Box::new(ShortsFilter::new(ctx)),
            FeatureKind::FocusMode => Box::new(FocusMode::new(ctx)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_keys_are_unique() {
        let mut keys: Vec<_> = FeatureKind::ALL.iter().map(|k| k.key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), FeatureKind::ALL.len());
    }
}
