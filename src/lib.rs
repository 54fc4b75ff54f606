// graft - Reactive Feature Orchestration Runtime
//
// This is the library crate containing the core runtime machinery.
// The binary crate (main.rs) runs a demo session against a synthetic page.

pub mod background;
pub mod bootstrap;
pub mod config;
pub mod dom;
pub mod features;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod runtime;

// Re-export commonly used types for convenience
pub use background::{BackgroundClient, BackgroundError, BackgroundService, TimerState};
pub use bootstrap::AppRuntime;
pub use config::SettingsStore;
pub use dom::{Document, DomError, MutationBatch, NodeId, Selector, SelectorError};
pub use metrics::Metrics;
pub use models::{SettingRule, SettingValue, Settings, SettingsSchema};
pub use runtime::{
    DomObserver, ElementCache, EventBus, EventPayload, Feature, FeatureBase, FeatureContext,
    FeatureError, FeatureManager, RuntimeEvent,
};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
