use serde::{Deserialize, Serialize};

/// One multiple-choice question as served to players.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Coding challenge statement and starter code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodingPrompt {
    pub text: String,
    #[serde(default)]
    pub template: String,
}

/// Content of one level. Variant order matters for untagged decoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum LevelContent {
    Questions {
        #[serde(default)]
        title: String,
        questions: Vec<Question>,
    },
    Coding {
        #[serde(default)]
        title: String,
        question: CodingPrompt,
    },
    /// The level branches; the player must pick one of `paths` first.
    ChoosePath {
        #[serde(default)]
        title: String,
        #[serde(default)]
        message: String,
        paths: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitAnswerRequest {
    pub level: u32,
    pub question_id: String,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitCodeRequest {
    pub code: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Correct,
    #[serde(alias = "wrong")]
    Incorrect,
    AlreadyAnswered,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerResponse {
    pub status: AnswerStatus,
    pub new_score: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CodeStatus {
    Correct,
    Wrong,
}

/// Judge verdict for the coding challenge. Retries report the first verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeResponse {
    pub status: CodeStatus,
    #[serde(default)]
    pub new_score: Option<i64>,
}

/// Best-effort anti-cheat signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityRequest {
    pub event_type: String,
    #[serde(default)]
    pub details: String,
}

impl ActivityRequest {
    pub fn new(event_type: &str, details: impl Into<String>) -> Self {
        Self {
            event_type: event_type.to_string(),
            details: details.into(),
        }
    }
}
