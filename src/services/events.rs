use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::mpsc;

use crate::{dto::status::ServerSessionStatus, services::backoff::Degradation};

/// Sender half used by components to report into the session controller.
pub type EventSender = mpsc::UnboundedSender<SyncEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SyncEvent>;

/// Issues monotonically increasing tickets so status observations can be
/// ordered across the push channel, the poll loop and validation.
#[derive(Debug, Clone, Default)]
pub struct ObservationClock {
    next: Arc<AtomicU64>,
}

impl ObservationClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next ticket. Tickets start at 1.
    pub fn ticket(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Where a status observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    Push,
    Poll,
    Validation,
}

/// One server status reading, stamped with the ticket taken when it was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusObservation {
    pub status: ServerSessionStatus,
    pub player_count: Option<u32>,
    pub source: StatusSource,
    pub ticket: u64,
}

/// The two independent sync channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncChannel {
    Push,
    Poll,
}

impl SyncChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncChannel::Push => "push",
            SyncChannel::Poll => "poll",
        }
    }
}

/// Everything background components report to the session controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Status(StatusObservation),
    /// A channel crossed a degradation threshold (or recovered).
    Health {
        channel: SyncChannel,
        level: Degradation,
    },
    /// Another tab claimed the lock while this tab was leader.
    LeadershipLost { owner_id: String },
}
