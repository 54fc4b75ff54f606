// Integration tests for mutation observation and element caching
//
// Drives the document, observer, and cache together the way features do:
// page churn produces mutation batches, the observer multiplexes them into
// debounced sweeps, and the cache heals itself around removed nodes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use graft::dom::{Document, NodeId, Selector};
use graft::{DomObserver, ElementCache, Metrics};

fn sel(text: &str) -> Selector {
    Selector::parse(text).unwrap()
}

fn add_video(doc: &Document) -> NodeId {
    let video = doc.create_element("item");
    doc.add_class(video, "video").unwrap();
    doc.append_child(doc.root(), video).unwrap();
    video
}

#[tokio::test]
async fn test_cache_heals_across_removal_and_replacement() {
    let doc = Document::new();
    let metrics = Arc::new(Metrics::new());
    let cache = ElementCache::new(doc.clone(), Arc::clone(&metrics));

    // nothing matches yet, and the miss is not cached
    assert_eq!(cache.get("video", &sel(".video")), None);

    let first = add_video(&doc);
    assert_eq!(cache.get("video", &sel(".video")), Some(first));
    // second lookup is served from the cache
    assert_eq!(cache.get("video", &sel(".video")), Some(first));
    assert_eq!(metrics.cache_hits.load(Ordering::Relaxed), 1);

    doc.remove(first).unwrap();
    let second = add_video(&doc);
    // stale entry is evicted and the replacement found transparently
    assert_eq!(cache.get("video", &sel(".video")), Some(second));
    assert_eq!(metrics.cache_evictions.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_watched_entry_purged_through_mutation_stream() {
    let doc = Document::new();
    let metrics = Arc::new(Metrics::new());
    let cache = ElementCache::new(doc.clone(), Arc::clone(&metrics));

    let video = add_video(&doc);
    assert_eq!(cache.get("video", &sel(".video")), Some(video));
    assert!(cache.watch("video"));
    assert_eq!(cache.stats().watched, 1);

    doc.remove(video).unwrap();
    // give the watcher task a chance to drain the batch
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(cache.stats().cached, 0);
    assert_eq!(cache.stats().watched, 0);
    assert_eq!(metrics.cache_evictions.load(Ordering::Relaxed), 1);

    // an unrelated removal elsewhere purges nothing further
    let other = add_video(&doc);
    doc.remove(other).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(metrics.cache_evictions.load(Ordering::Relaxed), 1);
    cache.destroy();
}

#[tokio::test]
async fn test_observer_multiplexes_watches_over_one_stream() {
    let doc = Document::new();
    let metrics = Arc::new(Metrics::new());
    let observer = DomObserver::with_debounce(
        doc.clone(),
        Arc::clone(&metrics),
        Duration::from_millis(20),
    );

    let videos = Arc::new(AtomicUsize::new(0));
    let shelves = Arc::new(AtomicUsize::new(0));
    let videos_hits = Arc::clone(&videos);
    observer.register("videos", sel(".video"), false, false, move |_, _| {
        videos_hits.fetch_add(1, Ordering::SeqCst);
    });
    let shelf_hits = Arc::clone(&shelves);
    observer.register("shelves", sel(".shorts-shelf"), false, false, move |_, _| {
        shelf_hits.fetch_add(1, Ordering::SeqCst);
    });
    observer.start();

    // a burst of churn inside one debounce window
    add_video(&doc);
    add_video(&doc);
    let shelf = doc.create_element("div");
    doc.add_class(shelf, "shorts-shelf").unwrap();
    doc.append_child(doc.root(), shelf).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    // one sweep delivered every match to its own watch
    assert_eq!(metrics.observer_sweeps.load(Ordering::Relaxed), 1);
    assert_eq!(videos.load(Ordering::SeqCst), 2);
    assert_eq!(shelves.load(Ordering::SeqCst), 1);

    // stopping preserves registrations for a later restart
    observer.stop();
    assert_eq!(observer.watch_count(), 2);
    observer.start();
    add_video(&doc);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(videos.load(Ordering::SeqCst), 3);
    observer.stop();
}

#[tokio::test]
async fn test_sweep_is_deterministic_without_pump() {
    let doc = Document::new();
    let observer = DomObserver::new(doc.clone(), Arc::new(Metrics::new()));

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_hits = Arc::clone(&seen);
    observer.register("videos", sel(".video"), false, false, move |_, _| {
        seen_hits.fetch_add(1, Ordering::SeqCst);
    });

    add_video(&doc);
    add_video(&doc);
    observer.sweep();
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    // an idle sweep delivers nothing new
    observer.sweep();
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}
