//! Core runtime machinery.
//!
//! Orchestration ([`FeatureManager`]), the feature contract
//! ([`Feature`]/[`FeatureBase`]), mutation observation ([`DomObserver`]),
//! the self-healing element cache ([`ElementCache`]), and event plumbing.

pub mod cache;
pub mod events;
pub mod feature;
pub mod manager;
pub mod observer;

pub use cache::{CacheStats, ElementCache};
pub use events::{EventBus, EventPayload, ListenerId, RuntimeEvent, NAVIGATE_FINISH};
pub use feature::{Feature, FeatureBase, FeatureContext, FeatureError};
pub use manager::{FeatureManager, MAX_FEATURE_ERRORS};
pub use observer::{DomObserver, DEBOUNCE_DEFAULT};
