use tracing::debug;

use crate::{
    dto::status::{ServerSessionStatus, SessionPhase},
    services::events::StatusObservation,
};

/// Effect of a status observation on the known session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// Older than what is already known; dropped.
    Stale,
    /// Same phase and session; only the clock moved.
    Unchanged,
    Transition {
        previous: Option<SessionPhase>,
        current: SessionPhase,
    },
    /// The server moved on to another session.
    SessionChanged {
        previous: Option<i64>,
        current: i64,
        phase: SessionPhase,
    },
}

impl StatusChange {
    pub fn is_transition(self) -> bool {
        matches!(
            self,
            StatusChange::Transition { .. } | StatusChange::SessionChanged { .. }
        )
    }
}

/// Last applied server status and the ordering rules for new observations.
#[derive(Debug, Default)]
pub struct StatusTracker {
    last_ticket: u64,
    current: Option<ServerSessionStatus>,
    epoch: u64,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&ServerSessionStatus> {
        self.current.as_ref()
    }

    pub fn phase(&self) -> Option<SessionPhase> {
        self.current.as_ref().map(|status| status.status)
    }

    /// Bumped on every transition; in-flight work compares it to detect interruption.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// What applying `observation` would do, without applying it.
    pub fn classify(&self, observation: &StatusObservation) -> StatusChange {
        if observation.ticket <= self.last_ticket {
            return StatusChange::Stale;
        }
        let incoming = &observation.status;
        let Some(current) = self.current.as_ref() else {
            return match incoming.session_id {
                Some(session_id) => StatusChange::SessionChanged {
                    previous: None,
                    current: session_id,
                    phase: incoming.status,
                },
                None => StatusChange::Transition {
                    previous: None,
                    current: incoming.status,
                },
            };
        };

        match (current.session_id, incoming.session_id) {
            (Some(known), Some(seen)) if seen < known => return StatusChange::Stale,
            (known, Some(seen)) if known != Some(seen) => {
                return StatusChange::SessionChanged {
                    previous: known,
                    current: seen,
                    phase: incoming.status,
                };
            }
            _ => {}
        }

        if current.status == SessionPhase::Ended && incoming.status != SessionPhase::Ended {
            return StatusChange::Stale;
        }
        if current.status == incoming.status {
            return StatusChange::Unchanged;
        }
        StatusChange::Transition {
            previous: Some(current.status),
            current: incoming.status,
        }
    }

    /// Apply `observation` following [`StatusTracker::classify`].
    pub fn apply(&mut self, observation: &StatusObservation) -> StatusChange {
        let change = self.classify(observation);
        match change {
            StatusChange::Stale => {
                debug!(
                    ticket = observation.ticket,
                    last_ticket = self.last_ticket,
                    status = %observation.status.status,
                    "ignoring stale status observation"
                );
                return change;
            }
            StatusChange::Unchanged => {
                if let Some(current) = self.current.as_mut() {
                    current.remaining_seconds = observation.status.remaining_seconds;
                }
            }
            StatusChange::Transition { .. } | StatusChange::SessionChanged { .. } => {
                let session_id = observation
                    .status
                    .session_id
                    .or_else(|| self.current.as_ref().and_then(|current| current.session_id));
                self.current = Some(ServerSessionStatus {
                    session_id,
                    ..observation.status.clone()
                });
                self.epoch += 1;
            }
        }
        self.last_ticket = observation.ticket;
        change
    }

    /// Forget everything, e.g. after logout.
    pub fn reset(&mut self) {
        self.current = None;
        self.epoch += 1;
    }
}
