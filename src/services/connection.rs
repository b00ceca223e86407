use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::{sync::watch, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    dto::push::{PushMessage, SUBSCRIBE_SIGNAL, parse_push},
    services::{
        backoff::{BackoffPolicy, Degradation, FailureTracker, Thresholds},
        events::{EventSender, ObservationClock, StatusObservation, StatusSource, SyncChannel, SyncEvent},
        task::{ScheduledTask, Shutdown},
        transport::{PushChannel, PushTransport},
    },
};

/// Lifecycle of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Closed,
    Connecting,
    Open,
    /// Waiting out the backoff delay after an unexpected drop.
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Consecutive failed attempts since the last successful open.
    pub attempt: u32,
    pub last_failure: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub backoff: BackoffPolicy,
    pub thresholds: Thresholds,
}

/// Owns the push channel and its reconnect loop.
pub struct ConnectionManager {
    transport: Arc<dyn PushTransport>,
    config: ConnectionConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    intentional_close: Arc<AtomicBool>,
    task: Option<ScheduledTask>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn PushTransport>, config: ConnectionConfig) -> Self {
        let (state, _receiver) = watch::channel(ConnectionState::default());
        Self {
            transport,
            config,
            state: Arc::new(state),
            intentional_close: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(ScheduledTask::is_running)
    }

    /// Start the channel. Status updates go to `events`. No-op while running.
    pub fn open(&mut self, events: EventSender, clock: ObservationClock) {
        if self.is_running() {
            return;
        }
        self.intentional_close.store(false, Ordering::SeqCst);
        let transport = self.transport.clone();
        let config = self.config;
        let state = self.state.clone();
        let intentional_close = self.intentional_close.clone();
        self.task = Some(ScheduledTask::spawn("push-channel", move |shutdown| {
            run(transport, config, state, intentional_close, events, clock, shutdown)
        }));
    }

    /// Intentional close: stop the channel and suppress any reconnection.
    pub async fn close(&mut self) {
        self.intentional_close.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.stop().await;
        }
        self.state.send_modify(|state| state.status = ConnectionStatus::Closed);
        info!("push channel closed intentionally");
    }
}

enum PumpEnd {
    Shutdown,
    Dropped(String),
}

async fn run(
    transport: Arc<dyn PushTransport>,
    config: ConnectionConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    intentional_close: Arc<AtomicBool>,
    events: EventSender,
    clock: ObservationClock,
    mut shutdown: Shutdown,
) {
    let mut tracker = FailureTracker::new(config.thresholds);
    let mut attempt = 0u32;

    loop {
        state.send_modify(|state| state.status = ConnectionStatus::Connecting);
        let connected = tokio::select! {
            _ = shutdown.cancelled() => return,
            connected = transport.connect() => connected,
        };

        let failure = match connected {
            Ok(mut channel) => match channel.send_text(SUBSCRIBE_SIGNAL.to_string()).await {
                Ok(()) => {
                    attempt = 0;
                    state.send_replace(ConnectionState {
                        status: ConnectionStatus::Open,
                        attempt,
                        last_failure: None,
                    });
                    info!("push channel open");
                    if let Some(level) = tracker.record_success() {
                        report_health(&events, level);
                    }

                    match pump(channel.as_mut(), &events, &clock, &mut shutdown).await {
                        PumpEnd::Shutdown => {
                            if let Err(err) = channel.close().await {
                                debug!(error = %err, "push channel close handshake failed");
                            }
                            return;
                        }
                        PumpEnd::Dropped(reason) => reason,
                    }
                }
                Err(err) => err.to_string(),
            },
            Err(err) => err.to_string(),
        };

        if intentional_close.load(Ordering::SeqCst) || shutdown.is_cancelled() {
            return;
        }

        attempt = attempt.saturating_add(1);
        let delay = config.backoff.delay(attempt);
        state.send_replace(ConnectionState {
            status: ConnectionStatus::Reconnecting,
            attempt,
            last_failure: Some(failure.clone()),
        });
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "push channel unavailable; scheduling reconnect"
        );
        if let Some(level) = tracker.record_failure() {
            report_health(&events, level);
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = sleep(delay) => {}
        }
    }
}

fn report_health(events: &EventSender, level: Degradation) {
    match level {
        Degradation::Healthy => info!("push channel recovered"),
        Degradation::Unstable => warn!("push channel unstable"),
        Degradation::Failsafe => warn!("push channel in failsafe; relying on polling"),
    }
    let _ = events.send(SyncEvent::Health {
        channel: SyncChannel::Push,
        level,
    });
}

/// Forward actionable frames until the channel drops or shutdown is requested.
async fn pump(
    channel: &mut dyn PushChannel,
    events: &EventSender,
    clock: &ObservationClock,
    shutdown: &mut Shutdown,
) -> PumpEnd {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => return PumpEnd::Shutdown,
            frame = channel.next_text() => frame,
        };

        let text = match frame {
            Ok(Some(text)) => text,
            Ok(None) => return PumpEnd::Dropped("closed by server".to_string()),
            Err(err) => return PumpEnd::Dropped(err.to_string()),
        };

        let ticket = clock.ticket();
        match parse_push(&text) {
            Ok(PushMessage::SessionUpdate(status)) => {
                debug!(status = %status.status, session_id = ?status.session_id, ticket, "session update pushed");
                let _ = events.send(SyncEvent::Status(StatusObservation {
                    status,
                    player_count: None,
                    source: StatusSource::Push,
                    ticket,
                }));
            }
            Ok(PushMessage::Ignored(_)) => {}
            Err(err) => warn!(error = %err, "ignoring malformed push frame"),
        }
    }
}
