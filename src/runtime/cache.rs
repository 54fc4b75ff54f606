//! Self-healing element cache.
//!
//! Features look the same nodes up over and over while the host page churns
//! underneath them. [`ElementCache`] memoizes selector lookups by key and
//! invalidates entries in two ways: lazily, by checking that a cached node is
//! still connected before returning it, and eagerly, by consuming the
//! document's mutation batches and purging watched entries the moment their
//! node leaves the tree.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::dom::{Document, MutationBatch, NodeId, Selector};
use crate::metrics::Metrics;

/// Counts of live cache state, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Keys currently holding a cached node.
    pub cached: usize,
    /// Keys registered for eager purge on removal.
    pub watched: usize,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, NodeId>,
    watched: HashMap<String, NodeId>,
}

fn purge_removed(
    inner: &Mutex<CacheInner>,
    metrics: &Metrics,
    batch: &MutationBatch,
) {
    if batch.removed.is_empty() {
        return;
    }
    let mut inner = inner.lock().unwrap();
    let stale: Vec<String> = inner
        .watched
        .iter()
        .filter(|(_, node)| batch.removed.contains(node))
        .map(|(key, _)| key.clone())
        .collect();
    for key in stale {
        inner.watched.remove(&key);
        inner.entries.remove(&key);
        metrics.cache_evictions.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Purged watched cache entry after node removal");
    }
}

/// Keyed memoization of selector lookups against one [`Document`].
pub struct ElementCache {
    document: Document,
    metrics: Arc<Metrics>,
    inner: Arc<Mutex<CacheInner>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ElementCache {
    pub fn new(document: Document, metrics: Arc<Metrics>) -> Self {
        Self {
            document,
            metrics,
            inner: Arc::new(Mutex::new(CacheInner::default())),
            watcher: Mutex::new(None),
        }
    }

    /// Cached lookup for `key`. A cached node that has left the document is
    /// evicted and the selector re-run; a fresh match is cached for next time.
    pub fn get(&self, key: &str, selector: &Selector) -> Option<NodeId> {
        self.lookup(key, || self.document.query_selector(selector))
    }

    /// Like [`get`], scoped to descendants of `context`.
    ///
    /// [`get`]: ElementCache::get
    pub fn get_in(&self, key: &str, selector: &Selector, context: NodeId) -> Option<NodeId> {
        self.lookup(key, || self.document.query_selector_in(selector, context))
    }

    /// Multi-element lookup. Always queries fresh; node lists go stale too
    /// quickly under churn to be worth caching.
    pub fn get_all(&self, selector: &Selector) -> Vec<NodeId> {
        self.document.query_selector_all(selector)
    }

    fn lookup(&self, key: &str, query: impl FnOnce() -> Option<NodeId>) -> Option<NodeId> {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(node) = inner.entries.get(key).copied() {
                if self.document.contains(node) {
                    self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Some(node);
                }
                inner.entries.remove(key);
                inner.watched.remove(key);
                self.metrics.cache_evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);
        let found = query()?;
        self.inner
            .lock()
            .unwrap()
            .entries
            .insert(key.to_string(), found);
        Some(found)
    }

    /// Cache `node` under `key` without running a selector.
    pub fn set(&self, key: &str, node: NodeId) {
        self.inner
            .lock()
            .unwrap()
            .entries
            .insert(key.to_string(), node);
    }

    /// Whether `key` holds a node that is still in the document. Stale
    /// entries are evicted as a side effect.
    pub fn has(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.entries.get(key).copied() {
            Some(node) if self.document.contains(node) => true,
            Some(_) => {
                inner.entries.remove(key);
                inner.watched.remove(key);
                self.metrics.cache_evictions.fetch_add(1, Ordering::Relaxed);
                false
            }
            None => false,
        }
    }

    /// Drop `key` from the cache, returning the node it held.
    pub fn remove(&self, key: &str) -> Option<NodeId> {
        let mut inner = self.inner.lock().unwrap();
        inner.watched.remove(key);
        inner.entries.remove(key)
    }

    /// Drop every cached entry. Watch registrations are dropped with them.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.watched.clear();
    }

    /// Register the entry under `key` for eager purge when its node leaves
    /// the document. Returns false if `key` holds nothing.
    ///
    /// The first watch spawns a background task that consumes the document's
    /// mutation batches for the lifetime of the cache.
    pub fn watch(&self, key: &str) -> bool {
        let node = {
            let mut inner = self.inner.lock().unwrap();
            let Some(node) = inner.entries.get(key).copied() else {
                return false;
            };
            inner.watched.insert(key.to_string(), node);
            node
        };
        debug!(key = %key, node = ?node, "Watching cache entry for removal");
        self.ensure_watcher();
        true
    }

    fn ensure_watcher(&self) {
        let mut watcher = self.watcher.lock().unwrap();
        if watcher.is_some() {
            return;
        }
        let mut rx = self.document.subscribe();
        let inner = Arc::clone(&self.inner);
        let metrics = Arc::clone(&self.metrics);
        *watcher = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(batch) => {
                        metrics.mutation_batches.fetch_add(1, Ordering::Relaxed);
                        purge_removed(&inner, &metrics, &batch);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        // Lost batches may have carried removals we can no
                        // longer see. Lazy validation in lookup covers them.
                        debug!(skipped, "Cache watcher lagged behind mutation batches");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Apply one mutation batch synchronously. Tests use this to drive the
    /// purge path deterministically without the background watcher.
    pub fn process_batch(&self, batch: &MutationBatch) {
        purge_removed(&self.inner, &self.metrics, batch);
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            cached: inner.entries.len(),
            watched: inner.watched.len(),
        }
    }

    /// Stop the watcher task and drop all state.
    pub fn destroy(&self) {
        if let Some(handle) = self.watcher.lock().unwrap().take() {
            handle.abort();
        }
        self.clear();
    }
}

impl Drop for ElementCache {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for ElementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ElementCache")
            .field("cached", &stats.cached)
            .field("watched", &stats.watched)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(text: &str) -> Selector {
        Selector::parse(text).unwrap()
    }

    fn cache_with_feed() -> (Document, ElementCache, NodeId) {
        let doc = Document::new();
        let feed = doc.create_element("div");
        doc.add_class(feed, "feed").unwrap();
        doc.append_child(doc.root(), feed).unwrap();
        let cache = ElementCache::new(doc.clone(), Arc::new(Metrics::new()));
        (doc, cache, feed)
    }

    #[test]
    fn test_get_caches_and_validates() {
        let (doc, cache, feed) = cache_with_feed();

        assert_eq!(cache.get("feed", &sel(".feed")), Some(feed));
        assert_eq!(cache.get("feed", &sel(".feed")), Some(feed));
        assert_eq!(cache.stats().cached, 1);

        // removing the node forces a re-query on the next lookup
        doc.remove(feed).unwrap();
        assert_eq!(cache.get("feed", &sel(".feed")), None);
        assert_eq!(cache.stats().cached, 0);

        let replacement = doc.create_element("div");
        doc.add_class(replacement, "feed").unwrap();
        doc.append_child(doc.root(), replacement).unwrap();
        assert_eq!(cache.get("feed", &sel(".feed")), Some(replacement));
    }

    #[test]
    fn test_miss_for_absent_selector_is_not_cached() {
        let (doc, cache, _) = cache_with_feed();
        assert_eq!(cache.get("player", &sel(".player")), None);

        let player = doc.create_element("div");
        doc.add_class(player, "player").unwrap();
        doc.append_child(doc.root(), player).unwrap();
        assert_eq!(cache.get("player", &sel(".player")), Some(player));
    }

    #[test]
    fn test_get_all_never_caches() {
        let (doc, cache, feed) = cache_with_feed();
        assert_eq!(cache.get_all(&sel(".feed")), vec![feed]);

        let second = doc.create_element("div");
        doc.add_class(second, "feed").unwrap();
        doc.append_child(doc.root(), second).unwrap();
        assert_eq!(cache.get_all(&sel(".feed")), vec![feed, second]);
    }

    #[test]
    fn test_set_has_remove() {
        let (doc, cache, feed) = cache_with_feed();
        cache.set("main", feed);
        assert!(cache.has("main"));
        assert_eq!(cache.remove("main"), Some(feed));
        assert!(!cache.has("main"));

        cache.set("main", feed);
        doc.remove(feed).unwrap();
        assert!(!cache.has("main"));
        assert_eq!(cache.stats().cached, 0);
    }

    #[test]
    fn test_watched_entry_purged_exactly_once() {
        let (doc, cache, feed) = cache_with_feed();
        let mut rx = doc.subscribe();

        assert_eq!(cache.get("feed", &sel(".feed")), Some(feed));
        {
            let mut inner = cache.inner.lock().unwrap();
            inner.watched.insert("feed".to_string(), feed);
        }

        doc.remove(feed).unwrap();
        let batch = rx.try_recv().unwrap();

        let metrics = Arc::clone(&cache.metrics);
        cache.process_batch(&batch);
        assert_eq!(metrics.cache_evictions.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().cached, 0);
        assert_eq!(cache.stats().watched, 0);

        // replaying the batch must not purge or count again
        cache.process_batch(&batch);
        assert_eq!(metrics.cache_evictions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_watch_requires_cached_entry() {
        let (_doc, cache, feed) = cache_with_feed();
        assert!(!cache.watch("missing"));
        cache.set("feed", feed);
        // watch registration itself needs no runtime; only the background
        // watcher task does, and these tests drive process_batch directly
        {
            let mut inner = cache.inner.lock().unwrap();
            inner.watched.insert("feed".to_string(), feed);
        }
        assert_eq!(cache.stats().watched, 1);
    }

    #[test]
    fn test_clear_drops_entries_and_watches() {
        let (_doc, cache, feed) = cache_with_feed();
        cache.set("feed", feed);
        cache.inner.lock().unwrap().watched.insert("feed".to_string(), feed);
        cache.clear();
        assert_eq!(cache.stats(), CacheStats { cached: 0, watched: 0 });
    }
}
