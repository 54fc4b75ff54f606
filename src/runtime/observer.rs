//! Mutation observation multiplexer.
//!
//! One [`DomObserver`] consumes the document's mutation batch stream and fans
//! matches out to any number of registered selector watches, so each feature
//! can react to page churn without running its own subscription. Batches are
//! debounced with a trailing edge: a burst of mutations inside the debounce
//! window produces a single sweep once the document goes quiet.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dom::{Document, NodeId, Selector};
use crate::metrics::Metrics;

/// Trailing debounce applied to mutation bursts.
pub const DEBOUNCE_DEFAULT: Duration = Duration::from_millis(50);

/// Invoked once per matching node per sweep delivery.
pub type WatchCallback = Box<dyn FnMut(&Document, NodeId) + Send>;

struct Watch {
    selector: Selector,
    callback: WatchCallback,
    /// When false the watch fires once per distinct node; when true it fires
    /// for every still-present match on every sweep.
    multiple: bool,
    delivered: HashSet<NodeId>,
}

struct ObserverInner {
    watches: IndexMap<String, Watch>,
}

/// Debounced selector watcher over one [`Document`].
///
/// Registrations survive [`stop`]; restarting resumes delivery without
/// re-registering. Watch callbacks run with the observer's internal lock
/// held and must not call back into the same observer.
///
/// [`stop`]: DomObserver::stop
pub struct DomObserver {
    document: Document,
    metrics: Arc<Metrics>,
    debounce: Duration,
    inner: Arc<Mutex<ObserverInner>>,
    running: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl DomObserver {
    pub fn new(document: Document, metrics: Arc<Metrics>) -> Self {
        Self::with_debounce(document, metrics, DEBOUNCE_DEFAULT)
    }

    pub fn with_debounce(document: Document, metrics: Arc<Metrics>, debounce: Duration) -> Self {
        Self {
            document,
            metrics,
            debounce,
            inner: Arc::new(Mutex::new(ObserverInner {
                watches: IndexMap::new(),
            })),
            running: Arc::new(AtomicBool::new(false)),
            pump: Mutex::new(None),
        }
    }

    /// Register a watch under `id`, replacing any previous watch with the
    /// same id. When `immediate` is set, nodes already matching at
    /// registration time are delivered synchronously before this returns.
    pub fn register(
        &self,
        id: &str,
        selector: Selector,
        multiple: bool,
        immediate: bool,
        callback: impl FnMut(&Document, NodeId) + Send + 'static,
    ) {
        let mut inner = self.inner.lock().unwrap();
        if inner.watches.contains_key(id) {
            warn!(id = %id, "Replacing existing observer watch");
        }
        inner.watches.insert(
            id.to_string(),
            Watch {
                selector,
                callback: Box::new(callback),
                multiple,
                delivered: HashSet::new(),
            },
        );
        if immediate {
            if let Some(watch) = inner.watches.get_mut(id) {
                sweep_watch(&self.document, &self.metrics, watch);
            }
        }
    }

    /// Remove the watch under `id`, including its delivery history.
    pub fn unregister(&self, id: &str) {
        self.inner.lock().unwrap().watches.shift_remove(id);
    }

    pub fn watch_count(&self) -> usize {
        self.inner.lock().unwrap().watches.len()
    }

    /// Drop every registered watch.
    pub fn clear(&self) {
        self.inner.lock().unwrap().watches.clear();
    }

    /// Start consuming mutation batches. Calling on a running observer is a
    /// no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut rx = self.document.subscribe();
        let document = self.document.clone();
        let metrics = Arc::clone(&self.metrics);
        let inner = Arc::clone(&self.inner);
        let debounce = self.debounce;
        let running = Arc::clone(&self.running);
        *self.pump.lock().unwrap() = Some(tokio::spawn(async move {
            use tokio::sync::broadcast::error::RecvError;
            'outer: loop {
                let mut relevant = match rx.recv().await {
                    Ok(batch) => {
                        metrics.mutation_batches.fetch_add(1, Ordering::Relaxed);
                        !batch.added.is_empty()
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Observer lagged behind mutation batches");
                        true
                    }
                    Err(RecvError::Closed) => break,
                };
                // absorb the rest of the burst until the document goes quiet
                loop {
                    match tokio::time::timeout(debounce, rx.recv()).await {
                        Ok(Ok(batch)) => {
                            metrics.mutation_batches.fetch_add(1, Ordering::Relaxed);
                            relevant |= !batch.added.is_empty();
                        }
                        Ok(Err(RecvError::Lagged(skipped))) => {
                            debug!(skipped, "Observer lagged behind mutation batches");
                            relevant = true;
                        }
                        Ok(Err(RecvError::Closed)) => break 'outer,
                        Err(_) => break,
                    }
                }
                if relevant {
                    sweep_all(&document, &metrics, &inner);
                }
            }
            running.store(false, Ordering::SeqCst);
        }));
    }

    /// Stop consuming batches. Registrations are preserved for a later
    /// [`start`].
    ///
    /// [`start`]: DomObserver::start
    pub fn stop(&self) {
        if let Some(handle) = self.pump.lock().unwrap().take() {
            handle.abort();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one sweep over every watch synchronously. Tests use this to drive
    /// deliveries deterministically without the pump task.
    pub fn sweep(&self) {
        sweep_all(&self.document, &self.metrics, &self.inner);
    }
}

impl Drop for DomObserver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sweep_all(document: &Document, metrics: &Metrics, inner: &Mutex<ObserverInner>) {
    metrics.observer_sweeps.fetch_add(1, Ordering::Relaxed);
    let mut inner = inner.lock().unwrap();
    for watch in inner.watches.values_mut() {
        sweep_watch(document, metrics, watch);
    }
}

fn sweep_watch(document: &Document, metrics: &Metrics, watch: &mut Watch) {
    let matches = document.query_selector_all(&watch.selector);
    if watch.multiple {
        for node in matches {
            metrics.observer_deliveries.fetch_add(1, Ordering::Relaxed);
            (watch.callback)(document, node);
        }
    } else {
        // node ids are never reused, so the delivery set only needs pruning
        // to stay bounded, not for correctness
        watch.delivered.retain(|node| document.contains(*node));
        for node in matches {
            if watch.delivered.insert(node) {
                metrics.observer_deliveries.fetch_add(1, Ordering::Relaxed);
                (watch.callback)(document, node);
            }
        }
    }
}

impl std::fmt::Debug for DomObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomObserver")
            .field("watches", &self.watch_count())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn sel(text: &str) -> Selector {
        Selector::parse(text).unwrap()
    }

    fn observer() -> (Document, DomObserver) {
        let doc = Document::new();
        let obs = DomObserver::new(doc.clone(), Arc::new(Metrics::new()));
        (doc, obs)
    }

    fn add_shelf(doc: &Document) -> NodeId {
        let shelf = doc.create_element("div");
        doc.add_class(shelf, "shorts-shelf").unwrap();
        doc.append_child(doc.root(), shelf).unwrap();
        shelf
    }

    #[test]
    fn test_single_watch_fires_once_per_node() {
        let (doc, obs) = observer();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        obs.register("shelf", sel(".shorts-shelf"), false, false, move |_, _| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        add_shelf(&doc);
        obs.sweep();
        obs.sweep();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // a second node is a new delivery
        add_shelf(&doc);
        obs.sweep();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_replacement_node_is_redelivered() {
        let (doc, obs) = observer();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        obs.register("shelf", sel(".shorts-shelf"), false, false, move |_, node| {
            seen_clone.lock().unwrap().push(node);
        });

        let first = add_shelf(&doc);
        obs.sweep();
        doc.remove(first).unwrap();
        obs.sweep();

        let second = add_shelf(&doc);
        obs.sweep();
        assert_eq!(*seen.lock().unwrap(), vec![first, second]);
    }

    #[test]
    fn test_multiple_watch_fires_every_sweep() {
        let (doc, obs) = observer();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        obs.register("feeds", sel(".shorts-shelf"), true, false, move |_, _| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        add_shelf(&doc);
        add_shelf(&doc);
        obs.sweep();
        obs.sweep();
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_immediate_registration_delivers_existing_matches() {
        let (doc, obs) = observer();
        let shelf = add_shelf(&doc);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        obs.register("shelf", sel(".shorts-shelf"), false, true, move |_, node| {
            seen_clone.lock().unwrap().push(node);
        });
        assert_eq!(*seen.lock().unwrap(), vec![shelf]);

        // already delivered during registration
        obs.sweep();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unregister_drops_watch_and_history() {
        let (doc, obs) = observer();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        obs.register("shelf", sel(".shorts-shelf"), false, false, move |_, _| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        add_shelf(&doc);
        obs.sweep();
        obs.unregister("shelf");
        assert_eq!(obs.watch_count(), 0);
        obs.sweep();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_burst_collapses_into_one_sweep() {
        let doc = Document::new();
        let metrics = Arc::new(Metrics::new());
        let obs = DomObserver::with_debounce(
            doc.clone(),
            Arc::clone(&metrics),
            Duration::from_millis(20),
        );
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        obs.register("shelf", sel(".shorts-shelf"), false, false, move |_, _| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        obs.start();
        assert!(obs.is_running());
        obs.start();

        // two batches inside one debounce window
        add_shelf(&doc);
        add_shelf(&doc);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.observer_sweeps.load(Ordering::SeqCst), 1);

        obs.stop();
        assert!(!obs.is_running());
        assert_eq!(obs.watch_count(), 1);
    }

    #[tokio::test]
    async fn test_removal_only_batches_do_not_sweep() {
        let doc = Document::new();
        let metrics = Arc::new(Metrics::new());
        let obs = DomObserver::with_debounce(
            doc.clone(),
            Arc::clone(&metrics),
            Duration::from_millis(10),
        );
        obs.register("shelf", sel(".shorts-shelf"), true, false, |_, _| {});

        let shelf = add_shelf(&doc);
        obs.start();
        doc.remove(shelf).unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(metrics.observer_sweeps.load(Ordering::SeqCst), 0);
        obs.stop();
    }
}
