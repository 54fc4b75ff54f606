//! Background service.
//!
//! Long-lived companion task that owns the focus timer and answers settings
//! requests for feature code that has no direct store handle. Features talk
//! to it through [`BackgroundClient`], a cheap clone-able mpsc front end with
//! oneshot replies.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::SettingsStore;
use crate::models::Settings;

/// Capacity of the request channel into the service task.
const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// Errors from talking to the background service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackgroundError {
    #[error("background service is no longer running")]
    ChannelClosed,
}

/// Snapshot of the focus timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    pub running: bool,
    pub ends_at: Option<Instant>,
    pub duration_minutes: u64,
}

impl TimerState {
    const STOPPED: TimerState = TimerState {
        running: false,
        ends_at: None,
        duration_minutes: 0,
    };

    /// Time left until the timer fires, zero when stopped or elapsed.
    pub fn remaining(&self) -> Duration {
        match self.ends_at {
            Some(ends_at) if self.running => ends_at.saturating_duration_since(Instant::now()),
            _ => Duration::ZERO,
        }
    }
}

enum Request {
    StartTimer {
        minutes: u64,
        reply: oneshot::Sender<TimerState>,
    },
    StopTimer {
        reply: oneshot::Sender<TimerState>,
    },
    ResetTimer {
        reply: oneshot::Sender<TimerState>,
    },
    GetTimerState {
        reply: oneshot::Sender<TimerState>,
    },
    GetSettings {
        reply: oneshot::Sender<Arc<Settings>>,
    },
}

/// Handle for sending requests to the background service.
#[derive(Debug, Clone)]
pub struct BackgroundClient {
    requests: mpsc::Sender<Request>,
    completions: broadcast::Sender<TimerState>,
}

impl BackgroundClient {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, BackgroundError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(build(tx))
            .await
            .map_err(|_| BackgroundError::ChannelClosed)?;
        rx.await.map_err(|_| BackgroundError::ChannelClosed)
    }

    /// Start (or restart) the focus timer for `minutes`.
    pub async fn start_timer(&self, minutes: u64) -> Result<TimerState, BackgroundError> {
        self.request(|reply| Request::StartTimer { minutes, reply })
            .await
    }

    /// Stop the timer without firing a completion.
    pub async fn stop_timer(&self) -> Result<TimerState, BackgroundError> {
        self.request(|reply| Request::StopTimer { reply }).await
    }

    /// Restart the timer with its previous duration, or stop it if it never
    /// ran.
    pub async fn reset_timer(&self) -> Result<TimerState, BackgroundError> {
        self.request(|reply| Request::ResetTimer { reply }).await
    }

    pub async fn timer_state(&self) -> Result<TimerState, BackgroundError> {
        self.request(|reply| Request::GetTimerState { reply }).await
    }

    /// Current validated settings snapshot.
    pub async fn settings(&self) -> Result<Arc<Settings>, BackgroundError> {
        self.request(|reply| Request::GetSettings { reply }).await
    }

    /// Subscribe to timer completion announcements.
    pub fn completions(&self) -> broadcast::Receiver<TimerState> {
        self.completions.subscribe()
    }
}

/// Spawns the service task and hands back its client.
pub struct BackgroundService;

impl BackgroundService {
    pub fn spawn(store: SettingsStore) -> (BackgroundClient, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (completions, _) = broadcast::channel(16);
        let client = BackgroundClient {
            requests: tx,
            completions: completions.clone(),
        };
        let handle = tokio::spawn(run(rx, completions, store));
        (client, handle)
    }
}

async fn run(
    mut requests: mpsc::Receiver<Request>,
    completions: broadcast::Sender<TimerState>,
    store: SettingsStore,
) {
    let mut timer = TimerState::STOPPED;
    loop {
        // arm the alarm only while the timer runs; end-time based, so the
        // remaining duration survives however long requests take to arrive
        let deadline = timer.ends_at.filter(|_| timer.running);
        let alarm = async move {
            match deadline {
                Some(ends_at) => tokio::time::sleep_until(ends_at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else { break };
                handle_request(request, &mut timer, &store);
            }
            () = alarm => {
                info!(minutes = timer.duration_minutes, "Focus timer completed");
                let finished = timer;
                timer = TimerState::STOPPED;
                let _ = completions.send(finished);
            }
        }
    }
    debug!("Background service shutting down");
}

fn handle_request(request: Request, timer: &mut TimerState, store: &SettingsStore) {
    match request {
        Request::StartTimer { minutes, reply } => {
            *timer = TimerState {
                running: true,
                ends_at: Some(Instant::now() + Duration::from_secs(minutes * 60)),
                duration_minutes: minutes,
            };
            debug!(minutes, "Focus timer started");
            let _ = reply.send(*timer);
        }
        Request::StopTimer { reply } => {
            timer.running = false;
            timer.ends_at = None;
            debug!("Focus timer stopped");
            let _ = reply.send(*timer);
        }
        Request::ResetTimer { reply } => {
            if timer.duration_minutes > 0 {
                timer.running = true;
                timer.ends_at =
                    Some(Instant::now() + Duration::from_secs(timer.duration_minutes * 60));
            } else {
                *timer = TimerState::STOPPED;
            }
            let _ = reply.send(*timer);
        }
        Request::GetTimerState { reply } => {
            let _ = reply.send(*timer);
        }
        Request::GetSettings { reply } => {
            let _ = reply.send(store.snapshot());
        }
    }
}
