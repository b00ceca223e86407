//! Resume decision table.
//!
//! Boot and every status transition reduce to one lookup keyed by the server
//! phase, the snapshot's `completed` flag and its saved screen.

use crate::{
    dao::models::{ProgressSnapshot, SavedScreen},
    dto::status::SessionPhase,
};

/// What the controller must construct for the current phase and snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeAction {
    /// Terminal; never re-enters gameplay.
    Completed,
    /// Rendered without persisting, so a snapshot mid-transition survives.
    Waiting { paused: bool },
    Ended,
    Intro,
    Arena { level: u32 },
    Question {
        level: u32,
        path: Option<String>,
        index: usize,
    },
    Coding { level: u32, path: Option<String> },
    PathChoice { level: u32 },
}

pub fn resume_action(phase: SessionPhase, snapshot: Option<&ProgressSnapshot>) -> ResumeAction {
    if snapshot.is_some_and(|snapshot| snapshot.completed) {
        return ResumeAction::Completed;
    }
    match phase {
        SessionPhase::Waiting => return ResumeAction::Waiting { paused: false },
        SessionPhase::Paused => return ResumeAction::Waiting { paused: true },
        SessionPhase::Ended => return ResumeAction::Ended,
        SessionPhase::Running => {}
    }

    let Some(snapshot) = snapshot.filter(|snapshot| snapshot.intro_complete) else {
        return ResumeAction::Intro;
    };
    let level = snapshot.level;
    let path = snapshot.path_choice.clone();
    match snapshot.screen {
        SavedScreen::Intro | SavedScreen::Arena => ResumeAction::Arena { level },
        SavedScreen::Question => ResumeAction::Question {
            level,
            path,
            index: snapshot.question_index,
        },
        SavedScreen::Coding => ResumeAction::Coding { level, path },
        SavedScreen::PathChoice => ResumeAction::PathChoice { level },
    }
}
