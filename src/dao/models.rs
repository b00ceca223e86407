use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Authenticated identity for this player, persisted as one record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Name the player registered with.
    pub username: String,
    /// Bearer token issued by the server.
    pub token: String,
    /// Server session the credential belongs to.
    pub session_id: i64,
}

/// Screen recorded in a snapshot, naming what to rebuild on resume.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SavedScreen {
    /// One-time introductory sequence.
    #[default]
    Intro,
    /// Open-world hub between levels.
    Arena,
    /// Multiple-choice question set.
    Question,
    /// Final coding challenge.
    Coding,
    /// Easy/hard route selection modal.
    PathChoice,
}

/// Last known resumable client state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Owner of the snapshot; must match the current credential.
    pub username: String,
    /// Session of the snapshot; must match the current credential.
    pub session_id: i64,
    pub level: u32,
    pub question_index: usize,
    pub path_choice: Option<String>,
    pub screen: SavedScreen,
    /// Terminal flag: once true, resumption never re-enters gameplay.
    pub completed: bool,
    /// Whether the introductory sequence has been played through.
    #[serde(default)]
    pub intro_complete: bool,
    /// Score as last reported by the server.
    #[serde(default)]
    pub score: i64,
    /// Opaque gameplay sub-state owned by external collaborators.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    /// Milliseconds since the Unix epoch at the time of writing.
    pub saved_at: i64,
}

impl ProgressSnapshot {
    /// Fresh snapshot for `credential`, positioned before the intro.
    pub fn new(credential: &Credential, saved_at: i64) -> Self {
        Self {
            username: credential.username.clone(),
            session_id: credential.session_id,
            level: 0,
            question_index: 0,
            path_choice: None,
            screen: SavedScreen::Intro,
            completed: false,
            intro_complete: false,
            score: 0,
            extra: Map::new(),
            saved_at,
        }
    }

    /// True when the snapshot was written for `credential`'s identity.
    pub fn belongs_to(&self, credential: &Credential) -> bool {
        self.username == credential.username && self.session_id == credential.session_id
    }

    fn same_identity(&self, other: &ProgressSnapshot) -> bool {
        self.username == other.username && self.session_id == other.session_id
    }

    /// Carry the terminal `completed` flag over from a previously stored record.
    pub fn inherit_completion(&mut self, previous: &ProgressSnapshot) {
        if previous.completed && self.same_identity(previous) {
            self.completed = true;
        }
    }
}

/// Advisory leadership claim written by the leader tab.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TabLockRecord {
    /// Random identifier of the claiming tab instance.
    pub owner_id: String,
    /// Last heartbeat, in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl TabLockRecord {
    /// Age of the claim relative to `now_ms`. Claims from the future count as fresh.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp).max(0)
    }

    /// Whether the claim is still authoritative under the given staleness window.
    pub fn is_fresh(&self, now_ms: i64, stale_after_ms: i64) -> bool {
        self.age_ms(now_ms) < stale_after_ms
    }
}
