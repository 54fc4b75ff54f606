//! Event plumbing for the runtime.
//!
//! Two channels exist side by side. [`EventBus`] is a synchronous callback
//! registry for page-level events (navigation, custom feature signals) where
//! listeners need to run inline with feature code. [`RuntimeEvent`] is a
//! tokio broadcast payload for diagnostic events that outside observers
//! consume asynchronously.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::models::Settings;

/// Page event emitted after a navigation settles.
pub const NAVIGATE_FINISH: &str = "navigate-finish";

/// Payload delivered to [`EventBus`] listeners.
#[derive(Debug, Clone)]
pub enum EventPayload {
    None,
    Text(String),
    Settings(Arc<Settings>),
}

/// Diagnostic events broadcast by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// A feature exceeded its error budget and was quarantined.
    FeatureDisabled { name: String, error: String },
    /// An orchestration pass finished applying the given settings snapshot.
    FeaturesUpdated { settings: Arc<Settings>, epoch: u64 },
    /// Bootstrap completed and the runtime is live.
    RuntimeReady,
    /// Bootstrap or the driver loop failed fatally.
    RuntimeFailed { error: String },
}

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&EventPayload) + Send>;

struct BusInner {
    listeners: HashMap<String, Vec<(ListenerId, Listener)>>,
    /// Removals requested while the keyed event is mid-dispatch. Applied
    /// when the dispatched list is merged back into the table.
    tombstones: HashMap<String, HashSet<ListenerId>>,
    next_id: u64,
}

/// Synchronous publish/subscribe registry keyed by event name.
///
/// Cheap to clone; all clones share one listener table. Listeners run on the
/// emitting thread, in registration order. A listener removed during an
/// `emit` of the same event may still receive that in-flight emission.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                listeners: HashMap::new(),
                tombstones: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Register a listener for `event`. Returns an id usable with [`off`].
    ///
    /// [`off`]: EventBus::off
    pub fn on(&self, event: &str, listener: impl FnMut(&EventPayload) + Send + 'static) -> ListenerId {
        let mut inner = self.inner.lock().unwrap();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner
            .listeners
            .entry(event.to_string())
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    /// Remove one listener. Unknown ids are ignored. Removing mid-dispatch
    /// takes effect for every later emission of the event.
    pub fn off(&self, event: &str, id: ListenerId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entries) = inner.listeners.get_mut(event) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                inner.listeners.remove(event);
            }
        }
        // the listener may be checked out by an in-flight emit()
        if let Some(removed) = inner.tombstones.get_mut(event) {
            removed.insert(id);
        }
    }

    /// Invoke every listener registered for `event`, in registration order.
    pub fn emit(&self, event: &str, payload: &EventPayload) {
        // Take the listener list out of the table while dispatching so
        // listeners can register or remove without deadlocking on the bus.
        let mut entries = {
            let mut inner = self.inner.lock().unwrap();
            match inner.listeners.remove(event) {
                Some(entries) => {
                    inner.tombstones.insert(event.to_string(), HashSet::new());
                    entries
                }
                None => return,
            }
        };
        for (_, listener) in entries.iter_mut() {
            listener(payload);
        }
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.tombstones.remove(event).unwrap_or_default();
        entries.retain(|(id, _)| !removed.contains(id));
        // listeners registered mid-dispatch go after the originals
        if let Some(mut new_entries) = inner.listeners.remove(event) {
            new_entries.retain(|(id, _)| !removed.contains(id));
            entries.extend(new_entries);
        }
        if !entries.is_empty() {
            inner.listeners.insert(event.to_string(), entries);
        }
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .listeners
            .get(event)
            .map_or(0, |entries| entries.len())
    }

    /// Drop every listener for every event.
    pub fn clear(&self) {
        self.inner.lock().unwrap().listeners.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("EventBus")
            .field("events", &inner.listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}
