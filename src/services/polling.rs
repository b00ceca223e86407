use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{sync::watch, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    dto::status::StatusResponse,
    services::{
        api::{ApiResult, ServerApi},
        backoff::{Degradation, FailureTracker, Thresholds},
        events::{
            EventSender, ObservationClock, StatusObservation, StatusSource, SyncChannel, SyncEvent,
        },
        task::{ScheduledTask, Shutdown},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    /// Cadence while the tab is visible.
    pub foreground: Duration,
    /// Slower cadence while the tab is hidden.
    pub background: Duration,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Issues status requests; at most one is in flight at any time.
struct Poller {
    api: Arc<dyn ServerApi>,
    events: EventSender,
    clock: ObservationClock,
    in_flight: AtomicBool,
    tracker: Mutex<FailureTracker>,
    shutdown: Shutdown,
}

impl Poller {
    /// Start a request unless one is pending. Returns whether one was started.
    fn try_poll(self: &Arc<Self>) -> bool {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("status poll still in flight; skipping tick");
            return false;
        }
        let ticket = self.clock.ticket();
        let poller = self.clone();
        tokio::spawn(async move {
            let mut shutdown = poller.shutdown.clone();
            let result = tokio::select! {
                _ = shutdown.cancelled() => None,
                result = poller.api.status() => Some(result),
            };
            if let Some(result) = result {
                poller.settle(result, ticket);
            }
            poller.in_flight.store(false, Ordering::SeqCst);
        });
        true
    }

    fn settle(&self, result: ApiResult<StatusResponse>, ticket: u64) {
        let change = match result {
            Ok(response) => {
                let _ = self.events.send(SyncEvent::Status(StatusObservation {
                    status: response.session,
                    player_count: Some(response.player_count),
                    source: StatusSource::Poll,
                    ticket,
                }));
                self.tracker().record_success()
            }
            Err(err) => {
                let mut tracker = self.tracker();
                let change = tracker.record_failure();
                warn!(failures = tracker.failures(), error = %err, "status poll failed");
                change
            }
        };

        if let Some(level) = change {
            match level {
                Degradation::Healthy => info!("status polling recovered"),
                Degradation::Unstable => warn!("status polling unstable"),
                Degradation::Failsafe => warn!("status polling in failsafe"),
            }
            let _ = self.events.send(SyncEvent::Health {
                channel: SyncChannel::Poll,
                level,
            });
        }
    }

    fn tracker(&self) -> std::sync::MutexGuard<'_, FailureTracker> {
        self.tracker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Periodic authoritative status check, independent of the push channel.
pub struct PollingLoop {
    api: Arc<dyn ServerApi>,
    config: PollingConfig,
    visibility: Arc<watch::Sender<Visibility>>,
    poller: Option<Arc<Poller>>,
    task: Option<ScheduledTask>,
}

impl PollingLoop {
    pub fn new(api: Arc<dyn ServerApi>, config: PollingConfig) -> Self {
        let (visibility, _receiver) = watch::channel(Visibility::Visible);
        Self {
            api,
            config,
            visibility: Arc::new(visibility),
            poller: None,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(ScheduledTask::is_running)
    }

    /// Start polling with an immediate first request. No-op while running.
    pub fn start(&mut self, events: EventSender, clock: ObservationClock) {
        if self.is_running() {
            return;
        }
        let api = self.api.clone();
        let config = self.config;
        let visibility = self.visibility.subscribe();
        let mut poller = None;
        let task = ScheduledTask::spawn("status-poll", |shutdown| {
            let shared = Arc::new(Poller {
                api,
                events,
                clock,
                in_flight: AtomicBool::new(false),
                tracker: Mutex::new(FailureTracker::new(config.thresholds)),
                shutdown: shutdown.clone(),
            });
            poller = Some(shared.clone());
            run(shared, config, visibility, shutdown)
        });
        self.poller = poller;
        self.task = Some(task);
        info!("status polling started");
    }

    /// Poll now unless a request is already pending.
    pub fn refresh(&self) -> bool {
        self.poller.as_ref().is_some_and(Poller::try_poll)
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        self.visibility.send_if_modified(|current| {
            let changed = *current != visibility;
            *current = visibility;
            changed
        });
    }

    pub fn visibility(&self) -> Visibility {
        *self.visibility.borrow()
    }

    /// Stop the loop and drop any pending request.
    pub async fn stop(&mut self) {
        self.poller = None;
        if let Some(task) = self.task.take() {
            task.stop().await;
            info!("status polling stopped");
        }
    }
}

async fn run(
    poller: Arc<Poller>,
    config: PollingConfig,
    mut visibility: watch::Receiver<Visibility>,
    mut shutdown: Shutdown,
) {
    poller.try_poll();
    loop {
        let current = *visibility.borrow_and_update();
        let period = match current {
            Visibility::Visible => config.foreground,
            Visibility::Hidden => config.background,
        };
        tokio::select! {
            _ = shutdown.cancelled() => return,
            changed = visibility.changed() => {
                if changed.is_err() {
                    return;
                }
                if *visibility.borrow() == Visibility::Visible {
                    poller.try_poll();
                }
            }
            _ = sleep(period) => {
                poller.try_poll();
            }
        }
    }
}
