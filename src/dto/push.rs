use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dto::status::ServerSessionStatus;

/// Only actionable push event name.
pub const SESSION_UPDATE_EVENT: &str = "session_update";
/// Text frame sent once after the push channel opens.
pub const SUBSCRIBE_SIGNAL: &str = "subscribe";

/// Envelope wrapping every server push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// Decoded push frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    SessionUpdate(ServerSessionStatus),
    /// Any other event; kept only for logging.
    Ignored(String),
}

/// Errors raised while decoding a push frame. The channel stays open.
#[derive(Debug, thiserror::Error)]
pub enum PushDecodeError {
    #[error("push frame is not a valid envelope")]
    Envelope(#[source] serde_json::Error),
    #[error("session_update payload is malformed")]
    Payload(#[source] serde_json::Error),
}

/// Decode one text frame from the push channel.
pub fn parse_push(raw: &str) -> Result<PushMessage, PushDecodeError> {
    let envelope: PushEnvelope = serde_json::from_str(raw).map_err(PushDecodeError::Envelope)?;
    if envelope.event != SESSION_UPDATE_EVENT {
        debug!(event = %envelope.event, "ignoring push event");
        return Ok(PushMessage::Ignored(envelope.event));
    }
    let status = serde_json::from_value(envelope.payload).map_err(PushDecodeError::Payload)?;
    Ok(PushMessage::SessionUpdate(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::status::SessionPhase;

    #[test]
    fn session_update_is_decoded() {
        let raw = r#"{"event":"session_update","payload":{"session_id":3,"status":"paused",
            "remaining_seconds":120,"duration_minutes":30}}"#;
        assert_eq!(
            parse_push(raw).unwrap(),
            PushMessage::SessionUpdate(ServerSessionStatus::new(
                SessionPhase::Paused,
                120,
                Some(3)
            ))
        );
    }

    #[test]
    fn unknown_events_are_ignored() {
        let raw = r#"{"event":"leaderboard_update","payload":[]}"#;
        assert_eq!(
            parse_push(raw).unwrap(),
            PushMessage::Ignored("leaderboard_update".into())
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(
            parse_push("pong"),
            Err(PushDecodeError::Envelope(_))
        ));
        assert!(matches!(
            parse_push(r#"{"event":"session_update","payload":{"status":"bogus"}}"#),
            Err(PushDecodeError::Payload(_))
        ));
    }
}
