use std::{fmt, sync::Arc, time::Duration};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::{Instant, MissedTickBehavior, interval_at, sleep},
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    dao::{
        models::TabLockRecord,
        storage::{
            StorageChange, StorageDomain, StorageResult, TAB_LOCK_KEY, decode_json, read_json,
            write_json,
        },
    },
    services::{
        events::{EventSender, SyncEvent},
        task::{ScheduledTask, Shutdown},
    },
};

/// Timing of the advisory tab lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterConfig {
    /// Age after which a lock record is no longer authoritative.
    pub stale_after: Duration,
    /// Grace period before re-reading a fresh foreign lock.
    pub handoff: Duration,
    /// Interval at which the leader refreshes its record.
    pub heartbeat: Duration,
}

/// Outcome of a leadership attempt.
#[derive(Debug)]
pub enum Arbitration {
    Leader(Lease),
    /// Another tab holds a fresh lock. Terminal for this tab.
    Blocked { owner_id: String },
}

/// Timestamp-based, last-writer-wins leader election over a shared storage domain.
///
/// There is no compare-and-swap: two tabs claiming at once can both believe
/// they lead until one observes the other's record and steps down.
pub struct TabArbiter {
    storage: Arc<dyn StorageDomain>,
    clock: Arc<dyn Clock>,
    config: ArbiterConfig,
    owner_id: String,
}

impl TabArbiter {
    /// New arbiter with a random owner id for this tab instance.
    pub fn new(storage: Arc<dyn StorageDomain>, clock: Arc<dyn Clock>, config: ArbiterConfig) -> Self {
        Self {
            storage,
            clock,
            config,
            owner_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn stale_after_ms(&self) -> i64 {
        i64::try_from(self.config.stale_after.as_millis()).unwrap_or(i64::MAX)
    }

    /// Fresh lock held by another tab, if any.
    fn foreign_holder(&self) -> StorageResult<Option<TabLockRecord>> {
        let record = read_json::<TabLockRecord>(self.storage.as_ref(), TAB_LOCK_KEY)?;
        let now = self.clock.now_ms();
        Ok(record.filter(|record| {
            record.owner_id != self.owner_id && record.is_fresh(now, self.stale_after_ms())
        }))
    }

    /// Try to become leader. On success the returned lease keeps the record
    /// fresh and reports a takeover through `events`.
    pub async fn acquire(&self, events: EventSender) -> StorageResult<Arbitration> {
        if let Some(holder) = self.foreign_holder()? {
            info!(
                holder = %holder.owner_id,
                handoff_ms = self.config.handoff.as_millis() as u64,
                "fresh foreign tab lock found; waiting for handoff"
            );
            sleep(self.config.handoff).await;
            if let Some(holder) = self.foreign_holder()? {
                warn!(holder = %holder.owner_id, "tab lock still held elsewhere; blocking this tab");
                return Ok(Arbitration::Blocked {
                    owner_id: holder.owner_id,
                });
            }
        }

        write_lock(self.storage.as_ref(), self.clock.as_ref(), &self.owner_id)?;
        let changes = self.storage.subscribe();
        info!(owner = %self.owner_id, "tab leadership claimed");

        let lease_storage = self.storage.clone();
        let clock = self.clock.clone();
        let owner_id = self.owner_id.clone();
        let heartbeat = self.config.heartbeat;
        let task = ScheduledTask::spawn("tab-lock-heartbeat", move |shutdown| {
            hold_lease(lease_storage, clock, owner_id, heartbeat, changes, events, shutdown)
        });

        Ok(Arbitration::Leader(Lease {
            owner_id: self.owner_id.clone(),
            storage: self.storage.clone(),
            task,
        }))
    }
}

/// Held leadership. Dropping it stops the heartbeat but leaves the record.
pub struct Lease {
    owner_id: String,
    storage: Arc<dyn StorageDomain>,
    task: ScheduledTask,
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("owner_id", &self.owner_id)
            .field("task", &self.task.name())
            .finish()
    }
}

impl Lease {
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Stop heartbeating and remove the record if this tab still owns it.
    pub async fn release(self) -> StorageResult<()> {
        let Lease {
            owner_id,
            storage,
            task,
        } = self;
        task.stop().await;

        let current = read_json::<TabLockRecord>(storage.as_ref(), TAB_LOCK_KEY)?;
        if current.is_some_and(|record| record.owner_id == owner_id) {
            storage.remove(TAB_LOCK_KEY)?;
            info!(owner = %owner_id, "tab lock released");
        }
        Ok(())
    }

    /// Stop heartbeating without touching the record, after losing leadership.
    pub async fn abandon(self) {
        self.task.stop().await;
    }
}

fn write_lock(storage: &dyn StorageDomain, clock: &dyn Clock, owner_id: &str) -> StorageResult<()> {
    let record = TabLockRecord {
        owner_id: owner_id.to_string(),
        timestamp: clock.now_ms(),
    };
    write_json(storage, TAB_LOCK_KEY, &record)
}

/// Foreign owner id carried by a lock change, if any.
fn foreign_change(change: &StorageChange, owner_id: &str) -> Option<String> {
    if change.key != TAB_LOCK_KEY {
        return None;
    }
    let record = decode_json::<TabLockRecord>(TAB_LOCK_KEY, change.value.as_deref()?)?;
    (record.owner_id != owner_id).then_some(record.owner_id)
}

async fn hold_lease(
    storage: Arc<dyn StorageDomain>,
    clock: Arc<dyn Clock>,
    owner_id: String,
    heartbeat: Duration,
    mut changes: broadcast::Receiver<StorageChange>,
    events: EventSender,
    mut shutdown: Shutdown,
) {
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut watching = true;

    let intruder = loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            change = changes.recv(), if watching => match change {
                Ok(change) => {
                    if let Some(intruder) = foreign_change(&change, &owner_id) {
                        break intruder;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "tab lock change feed lagged; rechecking record");
                    match read_json::<TabLockRecord>(storage.as_ref(), TAB_LOCK_KEY) {
                        Ok(Some(record)) if record.owner_id != owner_id => break record.owner_id,
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "failed to read tab lock"),
                    }
                }
                Err(RecvError::Closed) => watching = false,
            },
            _ = ticker.tick() => {
                match read_json::<TabLockRecord>(storage.as_ref(), TAB_LOCK_KEY) {
                    Ok(Some(record)) if record.owner_id != owner_id => break record.owner_id,
                    Ok(_) => {
                        if let Err(err) = write_lock(storage.as_ref(), clock.as_ref(), &owner_id) {
                            warn!(error = %err, "failed to refresh tab lock");
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to read tab lock"),
                }
            }
        }
    };

    warn!(owner = %owner_id, intruder = %intruder, "tab lock taken over by another tab");
    let _ = events.send(SyncEvent::LeadershipLost { owner_id: intruder });
}
