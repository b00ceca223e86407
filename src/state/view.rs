use crate::{
    dto::gameplay::Question,
    services::{backoff::Degradation, events::SyncChannel},
};

/// Everything the external UI needs to draw.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewState {
    pub screen: Screen,
    pub banner: Option<Banner>,
    pub username: Option<String>,
    pub score: i64,
    pub remaining_seconds: i64,
    pub player_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Screen {
    #[default]
    Login,
    /// Another tab leads; interaction is disabled for good.
    Blocked,
    Waiting {
        paused: bool,
    },
    Intro,
    Playing(PlayScreen),
    Ended,
    Completed,
}

impl Screen {
    pub fn is_playing(&self) -> bool {
        matches!(self, Screen::Playing(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayScreen {
    /// Open-world hub between levels.
    Arena { level: u32 },
    Question {
        level: u32,
        path: Option<String>,
        index: usize,
        total: usize,
        question: Question,
    },
    Coding {
        level: u32,
        text: String,
        template: String,
    },
    PathChoice {
        level: u32,
        title: String,
        paths: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Banner {
    ConnectionUnstable,
    AutoSync,
}

impl Banner {
    pub fn message(self) -> &'static str {
        match self {
            Banner::ConnectionUnstable => "connection unstable \u{2014} retrying",
            Banner::AutoSync => "auto-sync mode active",
        }
    }

    fn for_level(level: Degradation) -> Option<Self> {
        match level {
            Degradation::Healthy => None,
            Degradation::Unstable => Some(Banner::ConnectionUnstable),
            Degradation::Failsafe => Some(Banner::AutoSync),
        }
    }
}

/// Degradation of both sync channels; the worst one picks the banner.
#[derive(Debug, Clone, Copy, Default)]
pub struct BannerBoard {
    push: Degradation,
    poll: Degradation,
}

impl BannerBoard {
    pub fn banner(&self) -> Option<Banner> {
        Banner::for_level(self.push.max(self.poll))
    }

    /// Record a channel level; returns the banner to show if it changed.
    pub fn update(&mut self, channel: SyncChannel, level: Degradation) -> Option<Option<Banner>> {
        let before = self.banner();
        match channel {
            SyncChannel::Push => self.push = level,
            SyncChannel::Poll => self.poll = level,
        }
        let after = self.banner();
        (before != after).then_some(after)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
