//! graft - Reactive Feature Orchestration Runtime
//!
//! Main entry point for the demo binary.
//!
//! # Overview
//!
//! This binary runs a short scripted session of the runtime against a
//! synthetic page. It initializes:
//! - Logging infrastructure (file rotation + console output)
//! - Tokio async runtime
//! - Settings persistence ([`SettingsStore`])
//! - The assembled runtime ([`AppRuntime`] - orchestrator, observers,
//!   background service)
//!
//! # Execution Flow
//!
//! 1. Initialize logging → logs/graft_<timestamp>.log
//! 2. Create tokio runtime with 4 worker threads
//! 3. Build a synthetic page (feed, shorts shelves, search results)
//! 4. Open the settings store under graft-data/
//! 5. Bootstrap the runtime and let the initial pass apply defaults
//! 6. Simulate a navigation that re-renders the feed
//! 7. Flip a setting and watch the change propagate
//! 8. Log the metrics summary and shut down

use anyhow::Result;
use graft::dom::Document;
use graft::{AppRuntime, SettingsStore, APP_NAME, VERSION};
use std::time::Duration;

/// Build the synthetic page the demo session runs against.
fn build_page(doc: &Document) -> Result<()> {
    let feed = doc.create_element("div");
    doc.set_id(feed, "feed")?;
    doc.add_class(feed, "feed")?;
    doc.append_child(doc.root(), feed)?;

    for index in 0..3 {
        let video = doc.create_element("item");
        doc.add_class(video, "video")?;
        doc.set_attribute(video, "data-index", &index.to_string())?;
        doc.append_child(feed, video)?;
    }

    let shelf = doc.create_element("div");
    doc.add_class(shelf, "shorts-shelf")?;
    doc.append_child(feed, shelf)?;
    Ok(())
}

/// Main entry point for the graft demo session
///
/// # Errors
///
/// This function can fail if:
/// - Logging initialization fails (disk space, permissions)
/// - Tokio runtime creation fails (system resources)
/// - The settings file exists but is invalid YAML
/// - A document operation in the scripted session fails
fn main() -> Result<()> {
    // Setup logging with both file and console output
    let _guard = graft::logging::setup_logging("logs", "graft", false, true)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    // Create tokio runtime for async operations
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("graft-worker")
        .build()?;

    tracing::info!("Tokio runtime initialized with {} worker threads", 4);

    runtime.block_on(async {
        let document = Document::new();
        build_page(&document)?;
        tracing::info!(nodes = document.node_count(), "Synthetic page built");

        let store = SettingsStore::new("graft-data")?;
        let app = AppRuntime::bootstrap(document.clone(), store).await?;

        // surface diagnostic events in the log for the session
        let mut events = app.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                tracing::info!(?event, "Runtime event");
            }
        });

        // simulate a navigation that re-renders the feed wholesale
        if let Some(feed) = document.query_selector(&"#feed".parse()?) {
            document.remove(feed)?;
        }
        build_page(&document)?;
        app.notify_navigation("/results?search_query=rust");
        tokio::time::sleep(Duration::from_millis(200)).await;

        // flip a setting and let the change trigger a pass
        app.apply_settings(|s| s.insert("hideShorts", true))?;
        tokio::time::sleep(Duration::from_millis(200)).await;

        tracing::info!(
            hidden_shelves = document
                .query_selector_all(&".shorts-shelf".parse()?)
                .len(),
            "Session complete"
        );

        app.shutdown();
        Ok::<(), anyhow::Error>(())
    })?;

    // Shutdown the tokio runtime gracefully
    runtime.shutdown_timeout(Duration::from_secs(5));

    tracing::info!("Application shutdown complete");
    Ok(())
}
