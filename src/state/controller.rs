use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    clock::Clock,
    dao::{
        credential::CredentialStore,
        models::{Credential, ProgressSnapshot, SavedScreen},
        progress::ProgressStore,
        storage::StorageDomain,
    },
    dto::{
        auth::RegisterRequest,
        gameplay::{
            ActivityRequest, AnswerResponse, AnswerStatus, CodeResponse, CodeStatus, LevelContent,
            Question, SubmitAnswerRequest,
        },
        status::SessionPhase,
    },
    error::SessionError,
    services::{
        api::{ApiError, ServerApi},
        backoff::Degradation,
        connection::{ConnectionConfig, ConnectionManager},
        events::{
            EventReceiver, EventSender, ObservationClock, StatusObservation, StatusSource,
            SyncChannel, SyncEvent,
        },
        polling::{PollingConfig, PollingLoop, Visibility},
        tab_arbiter::{ArbiterConfig, Arbitration, Lease, TabArbiter},
        task::{ScheduledTask, Shutdown},
        transport::PushTransport,
    },
    state::{
        resume::{ResumeAction, resume_action},
        status::{StatusChange, StatusTracker},
        view::{BannerBoard, PlayScreen, Screen, ViewState},
    },
};

/// Secret route only reachable by typing it on this level's path choice.
const HIDDEN_PATH: &str = "backlog_king";
const HIDDEN_PATH_LEVEL: u32 = 1;

/// Shared resources a tab runs against.
pub struct TabEnvironment {
    /// Storage domain shared by every tab of the profile.
    pub storage: Arc<dyn StorageDomain>,
    pub api: Arc<dyn ServerApi>,
    pub transport: Arc<dyn PushTransport>,
    pub clock: Arc<dyn Clock>,
}

/// Timing of every component a controller owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub arbiter: ArbiterConfig,
    pub connection: ConnectionConfig,
    pub polling: PollingConfig,
    /// Interval of the player heartbeat sent while the session runs.
    pub server_heartbeat: Duration,
}

/// Result of an answer submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Correct { score: i64 },
    AlreadyAnswered,
    Incorrect,
    /// The server changed the session status while the request was in flight.
    Aborted,
}

/// Result of a coding challenge submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeOutcome {
    Completed { score: i64 },
    Wrong,
    Aborted,
}

/// Owns all session state of one tab and is the only component allowed to
/// change screens or trigger gameplay side effects.
///
/// Background components report through an event channel; the owner drives
/// the controller by feeding [`SessionController::next_event`] back into
/// [`SessionController::handle_event`].
pub struct SessionController {
    api: Arc<dyn ServerApi>,
    credentials: CredentialStore,
    progress: ProgressStore,
    clock: Arc<dyn Clock>,
    arbiter: TabArbiter,
    lease: Option<Lease>,
    connection: ConnectionManager,
    polling: PollingLoop,
    server_heartbeat: Duration,
    heartbeat: Option<ScheduledTask>,
    events_tx: EventSender,
    events_rx: EventReceiver,
    observations: ObservationClock,
    /// Events pulled off the channel while an operation was suspended.
    backlog: VecDeque<SyncEvent>,
    tracker: StatusTracker,
    banners: BannerBoard,
    view: watch::Sender<ViewState>,
    credential: Option<Credential>,
    snapshot: Option<ProgressSnapshot>,
    /// Question set of the open question screen.
    questions: Vec<Question>,
    blocked: bool,
    /// Validation failed transiently; boot again on the next observation.
    boot_pending: bool,
    /// The screen could not be rebuilt; resume again on the next observation.
    resume_pending: bool,
}

impl SessionController {
    pub fn new(env: TabEnvironment, config: ControllerConfig) -> Self {
        let TabEnvironment {
            storage,
            api,
            transport,
            clock,
        } = env;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (view, _receiver) = watch::channel(ViewState::default());
        Self {
            credentials: CredentialStore::new(storage.clone()),
            progress: ProgressStore::new(storage.clone()),
            arbiter: TabArbiter::new(storage, clock.clone(), config.arbiter),
            lease: None,
            connection: ConnectionManager::new(transport, config.connection),
            polling: PollingLoop::new(api.clone(), config.polling),
            server_heartbeat: config.server_heartbeat,
            heartbeat: None,
            api,
            clock,
            events_tx,
            events_rx,
            observations: ObservationClock::new(),
            backlog: VecDeque::new(),
            tracker: StatusTracker::new(),
            banners: BannerBoard::default(),
            view,
            credential: None,
            snapshot: None,
            questions: Vec::new(),
            blocked: false,
            boot_pending: false,
            resume_pending: false,
        }
    }

    /// Subscribe to rendered view changes.
    pub fn view(&self) -> watch::Receiver<ViewState> {
        self.view.subscribe()
    }

    pub fn current_view(&self) -> ViewState {
        self.view.borrow().clone()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Sender for injecting events, e.g. from an external push bridge.
    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    /// Ticket source shared with the sync channels.
    pub fn observation_clock(&self) -> ObservationClock {
        self.observations.clone()
    }

    /// Arbitrate leadership, then boot from the stored credential if any.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.credential = self.credentials.load()?;
        if !self.claim().await? {
            return Ok(());
        }
        if self.credential.is_some() {
            self.boot().await?;
        } else {
            self.publish(|view| view.screen = Screen::Login);
        }
        self.process_backlog().await
    }

    /// Obtain a credential for `username`, persist it, then boot.
    pub async fn register(&mut self, username: &str) -> Result<(), SessionError> {
        if self.blocked {
            return Err(SessionError::Blocked);
        }
        if self.credential.is_some() {
            return Err(SessionError::InvalidState("already signed in".into()));
        }
        let request = RegisterRequest::new(username);
        request.validate()?;
        if self.lease.is_none() && !self.claim().await? {
            return Err(SessionError::Blocked);
        }

        let admission = self.api.register(request).await?;
        info!(
            username = %admission.credential.username,
            session_id = admission.credential.session_id,
            "player registered"
        );
        self.credentials.save(&admission.credential)?;
        self.credential = Some(admission.credential);
        self.boot().await?;
        self.process_backlog().await
    }

    /// Close every channel, forget the player and give up the tab lock.
    pub async fn logout(&mut self) -> Result<(), SessionError> {
        if self.blocked {
            return Err(SessionError::Blocked);
        }
        info!("logging out");
        self.sign_out().await?;
        self.release_lease().await;
        Ok(())
    }

    /// Stop every task this tab owns without touching stored records.
    pub async fn teardown(&mut self) {
        self.stop_sync().await;
        self.release_lease().await;
        info!("tab torn down");
    }

    /// Apply one status observation from any source and react to it.
    pub async fn apply_server_status(
        &mut self,
        observation: StatusObservation,
    ) -> Result<StatusChange, SessionError> {
        let change = self.apply_status(observation).await;
        self.process_backlog().await?;
        change
    }

    /// Next event from the background components.
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        self.events_rx.recv().await
    }

    pub async fn handle_event(&mut self, event: SyncEvent) -> Result<(), SessionError> {
        self.dispatch(event).await?;
        self.process_backlog().await
    }

    /// Handle events deferred while an operation was suspended.
    pub async fn process_backlog(&mut self) -> Result<(), SessionError> {
        while let Some(event) = self.backlog.pop_front() {
            self.dispatch(event).await?;
        }
        Ok(())
    }

    /// Handle everything already queued without waiting for more.
    pub async fn sync_pending(&mut self) -> Result<(), SessionError> {
        self.drain_channel();
        self.process_backlog().await
    }

    /// Forward tab visibility to the poll loop.
    pub fn set_visibility(&self, visibility: Visibility) {
        if self.polling.visibility() == visibility {
            return;
        }
        self.polling.set_visibility(visibility);
        if visibility == Visibility::Hidden && !self.blocked {
            self.log_activity("visibility_hidden", "tab hidden");
        }
    }

    /// Leave the intro for good and open the first level.
    pub async fn complete_intro(&mut self) -> Result<(), SessionError> {
        self.ensure_active()?;
        if self.current_screen() != Screen::Intro {
            return Err(SessionError::InvalidState("intro is not playing".into()));
        }
        self.persist(|snapshot| {
            snapshot.intro_complete = true;
            snapshot.level = 0;
            snapshot.question_index = 0;
        })?;
        info!("intro completed");
        let result = self.show_level(0, None, 0).await;
        self.process_backlog().await?;
        result
    }

    pub async fn load_level(&mut self, level: u32, path: Option<&str>) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.ensure_intro_done()?;
        let result = self.show_level(level, path.map(str::to_string), 0).await;
        self.process_backlog().await?;
        result
    }

    /// Pick a route on the open path choice.
    pub async fn choose_path(&mut self, path: &str) -> Result<(), SessionError> {
        self.ensure_active()?;
        let Screen::Playing(PlayScreen::PathChoice { level, paths, .. }) = self.current_screen()
        else {
            return Err(SessionError::InvalidState("no path choice is open".into()));
        };
        let path = path.trim();
        let hidden = level == HIDDEN_PATH_LEVEL && path == HIDDEN_PATH;
        if !hidden && !paths.iter().any(|offered| offered == path) {
            return Err(SessionError::InvalidInput(format!(
                "unknown path `{path}` for level {level}"
            )));
        }
        info!(level, path, "path chosen");
        let result = self.show_level(level, Some(path.to_string()), 0).await;
        self.process_backlog().await?;
        result
    }

    pub fn enter_arena(&mut self, level: u32) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.ensure_intro_done()?;
        self.show_arena(level)
    }

    /// Leave the arena into the level it leads to.
    pub async fn open_level(&mut self) -> Result<(), SessionError> {
        self.ensure_active()?;
        let Screen::Playing(PlayScreen::Arena { level }) = self.current_screen() else {
            return Err(SessionError::InvalidState("not in the arena".into()));
        };
        let result = self.show_level(level, None, 0).await;
        self.process_backlog().await?;
        result
    }

    pub async fn submit_answer(&mut self, answer: &str) -> Result<SubmitOutcome, SessionError> {
        let credential = self.ensure_active()?;
        let Screen::Playing(PlayScreen::Question {
            level,
            path,
            index,
            total,
            question,
        }) = self.current_screen()
        else {
            return Err(SessionError::InvalidState("no question is open".into()));
        };
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(SessionError::InvalidInput("answer must not be empty".into()));
        }

        let epoch = self.tracker.epoch();
        let request = SubmitAnswerRequest {
            level,
            question_id: question.id.clone(),
            answer: answer.to_string(),
        };
        let result = self.api.submit_answer(credential.token, request).await;
        let outcome = if self.interrupted(epoch) {
            info!(level, question = %question.id, "status changed during submission; discarding result");
            Ok(SubmitOutcome::Aborted)
        } else {
            match result {
                Ok(response) => self.settle_answer(response, level, path, index, total),
                Err(err) => Err(self.reject(err).await),
            }
        };
        self.process_backlog().await?;
        outcome
    }

    pub async fn submit_code(&mut self, code: &str) -> Result<CodeOutcome, SessionError> {
        let credential = self.ensure_active()?;
        let Screen::Playing(PlayScreen::Coding { level, .. }) = self.current_screen() else {
            return Err(SessionError::InvalidState("no coding challenge is open".into()));
        };
        if code.trim().is_empty() {
            return Err(SessionError::InvalidInput("code must not be empty".into()));
        }

        let epoch = self.tracker.epoch();
        let result = self.api.submit_code(credential.token, code.to_string()).await;
        let outcome = if self.interrupted(epoch) {
            info!(level, "status changed during code submission; discarding result");
            Ok(CodeOutcome::Aborted)
        } else {
            match result {
                Ok(response) => self.settle_code(response, level),
                Err(err) => Err(self.reject(err).await),
            }
        };
        self.process_backlog().await?;
        outcome
    }

    async fn dispatch(&mut self, event: SyncEvent) -> Result<(), SessionError> {
        match event {
            SyncEvent::Status(observation) => {
                self.apply_status(observation).await?;
            }
            SyncEvent::Health { channel, level } => self.record_health(channel, level),
            SyncEvent::LeadershipLost { owner_id } => self.lose_leadership(owner_id).await,
        }
        Ok(())
    }

    async fn apply_status(
        &mut self,
        observation: StatusObservation,
    ) -> Result<StatusChange, SessionError> {
        if self.blocked || self.credential.is_none() {
            debug!(source = ?observation.source, "no session to apply status to");
            return Ok(StatusChange::Stale);
        }
        let change = self.tracker.apply(&observation);
        if change == StatusChange::Stale {
            return Ok(change);
        }
        let player_count = observation.player_count;
        self.publish(|view| {
            if player_count.is_some() {
                view.player_count = player_count;
            }
        });
        self.publish_remaining();

        if self.boot_pending {
            self.boot().await?;
            return Ok(change);
        }
        match change {
            StatusChange::SessionChanged {
                previous: Some(previous),
                current,
                ..
            } => {
                info!(previous, current, "server moved to a new session; revalidating");
                self.boot().await?;
            }
            StatusChange::Transition { .. } | StatusChange::SessionChanged { .. } => {
                info!(
                    status = %observation.status.status,
                    source = ?observation.source,
                    "session status changed"
                );
                self.resume_or_defer().await?;
            }
            StatusChange::Unchanged if self.resume_pending => {
                debug!("retrying deferred resume");
                self.resume_or_defer().await?;
            }
            StatusChange::Stale | StatusChange::Unchanged => {}
        }
        Ok(change)
    }

    async fn claim(&mut self) -> Result<bool, SessionError> {
        match self.arbiter.acquire(self.events_tx.clone()).await? {
            Arbitration::Leader(lease) => {
                self.lease = Some(lease);
                Ok(true)
            }
            Arbitration::Blocked { owner_id } => {
                warn!(holder = %owner_id, "another tab drives this session; blocking");
                self.blocked = true;
                self.publish(|view| view.screen = Screen::Blocked);
                self.log_activity("tab_blocked", format!("holder={owner_id}"));
                Ok(false)
            }
        }
    }

    /// Validate the credential and rebuild the screen. Safe to re-run.
    async fn boot(&mut self) -> Result<(), SessionError> {
        let Some(credential) = self.credential.clone() else {
            self.publish(|view| view.screen = Screen::Login);
            return Ok(());
        };
        let ticket = self.observations.ticket();
        let admission = match self.api.validate(credential.token.clone()).await {
            Ok(admission) => admission,
            Err(err) if err.is_auth_failure() => {
                warn!(username = %credential.username, error = %err, "stored credential rejected; signing out");
                return self.sign_out().await;
            }
            Err(err) => {
                warn!(error = %err, "credential validation failed; retrying on next status");
                self.boot_pending = true;
                self.start_sync();
                self.publish(|view| {
                    view.username = Some(credential.username.clone());
                    view.screen = Screen::Waiting { paused: false };
                });
                return Ok(());
            }
        };

        self.boot_pending = false;
        let validated = admission.credential;
        if validated != credential {
            self.credentials.save(&validated)?;
        }
        self.snapshot = self.progress.read(&validated)?;
        let score = admission.score;
        self.publish(|view| {
            view.username = Some(validated.username.clone());
            view.score = score;
        });
        self.credential = Some(validated);
        self.tracker.apply(&StatusObservation {
            status: admission.status,
            player_count: None,
            source: StatusSource::Validation,
            ticket,
        });
        self.publish_remaining();
        self.start_sync();

        if self.snapshot.is_some() && self.tracker.phase() == Some(SessionPhase::Running) {
            info!("resuming saved progress");
            self.log_activity("session_resumed", "boot");
        }
        self.resume_or_defer().await
    }

    /// Resume, or wait for the next observation when the server is unreachable.
    async fn resume_or_defer(&mut self) -> Result<(), SessionError> {
        match self.resume().await {
            Ok(()) => {
                self.resume_pending = false;
                Ok(())
            }
            Err(SessionError::Api(err)) if err.is_transient() => {
                warn!(error = %err, "failed to rebuild the screen; retrying on next status");
                self.resume_pending = true;
                if !self.current_screen().is_playing() {
                    self.publish(|view| view.screen = Screen::Waiting { paused: false });
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Construct whatever the current phase and snapshot call for.
    async fn resume(&mut self) -> Result<(), SessionError> {
        let Some(phase) = self.tracker.phase() else {
            return Ok(());
        };
        let action = resume_action(phase, self.snapshot.as_ref());
        debug!(?action, %phase, "resuming");
        match action {
            ResumeAction::Completed => self.publish(|view| view.screen = Screen::Completed),
            ResumeAction::Waiting { paused } => {
                self.publish(|view| view.screen = Screen::Waiting { paused })
            }
            ResumeAction::Ended => self.publish(|view| view.screen = Screen::Ended),
            ResumeAction::Intro => {
                self.persist(|snapshot| snapshot.screen = SavedScreen::Intro)?;
                self.publish(|view| view.screen = Screen::Intro);
            }
            ResumeAction::Arena { level } => self.show_arena(level)?,
            ResumeAction::Question { level, path, index } => {
                self.show_level(level, path, index).await?
            }
            ResumeAction::Coding { level, path } => self.show_level(level, path, 0).await?,
            ResumeAction::PathChoice { level } => self.show_level(level, None, 0).await?,
        }
        self.sync_heartbeat();
        Ok(())
    }

    /// Fetch a level and open it at `index`. A status change during the
    /// fetch leaves the screen to the pending event.
    async fn show_level(
        &mut self,
        level: u32,
        path: Option<String>,
        index: usize,
    ) -> Result<(), SessionError> {
        let epoch = self.tracker.epoch();
        let result = self.api.level_content(level, path.clone()).await;
        if self.interrupted(epoch) {
            debug!(level, "level load superseded by a status change");
            return Ok(());
        }
        let content = match result {
            Ok(content) => content,
            Err(ApiError::NotFound { .. }) => {
                return Err(SessionError::InvalidInput(format!("level {level} does not exist")));
            }
            Err(err) => return Err(self.reject(err).await),
        };

        match content {
            LevelContent::ChoosePath { title, paths, .. } => {
                self.questions.clear();
                self.persist(|snapshot| {
                    snapshot.level = level;
                    snapshot.screen = SavedScreen::PathChoice;
                    snapshot.question_index = 0;
                    snapshot.path_choice = None;
                })?;
                self.publish(|view| {
                    view.screen = Screen::Playing(PlayScreen::PathChoice {
                        level,
                        title,
                        paths,
                    })
                });
            }
            LevelContent::Questions { questions, .. } => {
                let Some(question) = questions.get(index).cloned() else {
                    debug!(level, index, "saved question index past the end; back to the arena");
                    return self.show_arena(level + 1);
                };
                let total = questions.len();
                self.questions = questions;
                let path_choice = path.clone();
                self.persist(|snapshot| {
                    snapshot.level = level;
                    snapshot.screen = SavedScreen::Question;
                    snapshot.question_index = index;
                    snapshot.path_choice = path_choice;
                })?;
                self.publish(|view| {
                    view.screen = Screen::Playing(PlayScreen::Question {
                        level,
                        path,
                        index,
                        total,
                        question,
                    })
                });
            }
            LevelContent::Coding { question, .. } => {
                self.questions.clear();
                self.persist(|snapshot| {
                    snapshot.level = level;
                    snapshot.screen = SavedScreen::Coding;
                    snapshot.question_index = 0;
                    snapshot.path_choice = path;
                })?;
                self.publish(|view| {
                    view.screen = Screen::Playing(PlayScreen::Coding {
                        level,
                        text: question.text,
                        template: question.template,
                    })
                });
            }
        }
        Ok(())
    }

    fn show_arena(&mut self, level: u32) -> Result<(), SessionError> {
        self.questions.clear();
        self.persist(|snapshot| {
            snapshot.level = level;
            snapshot.screen = SavedScreen::Arena;
            snapshot.question_index = 0;
            snapshot.path_choice = None;
            snapshot.intro_complete = true;
        })?;
        self.publish(|view| view.screen = Screen::Playing(PlayScreen::Arena { level }));
        Ok(())
    }

    fn settle_answer(
        &mut self,
        response: AnswerResponse,
        level: u32,
        path: Option<String>,
        index: usize,
        total: usize,
    ) -> Result<SubmitOutcome, SessionError> {
        self.publish(|view| view.score = response.new_score);
        let outcome = match response.status {
            AnswerStatus::Incorrect => return Ok(SubmitOutcome::Incorrect),
            AnswerStatus::Correct => SubmitOutcome::Correct {
                score: response.new_score,
            },
            AnswerStatus::AlreadyAnswered => SubmitOutcome::AlreadyAnswered,
        };

        let next = index + 1;
        match self.questions.get(next).cloned() {
            Some(question) if next < total => {
                self.persist(|snapshot| snapshot.question_index = next)?;
                self.publish(|view| {
                    view.screen = Screen::Playing(PlayScreen::Question {
                        level,
                        path,
                        index: next,
                        total,
                        question,
                    })
                });
            }
            _ => {
                info!(level, "level cleared");
                self.show_arena(level + 1)?;
            }
        }
        Ok(outcome)
    }

    fn settle_code(&mut self, response: CodeResponse, level: u32) -> Result<CodeOutcome, SessionError> {
        if let Some(score) = response.new_score {
            self.publish(|view| view.score = score);
        }
        match response.status {
            CodeStatus::Wrong => Ok(CodeOutcome::Wrong),
            CodeStatus::Correct => {
                info!(level, "coding challenge solved; mission completed");
                self.persist(|snapshot| snapshot.completed = true)?;
                self.publish(|view| view.screen = Screen::Completed);
                self.sync_heartbeat();
                let score = self.view.borrow().score;
                Ok(CodeOutcome::Completed { score })
            }
        }
    }

    /// Map a failed player request to the error the caller sees.
    async fn reject(&mut self, err: ApiError) -> SessionError {
        match err {
            ApiError::Unauthorized { .. } => {
                warn!(error = %err, "credential rejected mid-session; signing out");
                match self.sign_out().await {
                    Ok(()) => SessionError::Unauthorized,
                    Err(storage) => storage,
                }
            }
            ApiError::Forbidden { .. } => {
                debug!(error = %err, "server refused gameplay; refreshing status");
                self.polling.refresh();
                SessionError::SessionInactive
            }
            other => SessionError::Api(other),
        }
    }

    fn record_health(&mut self, channel: SyncChannel, level: Degradation) {
        if let Some(banner) = self.banners.update(channel, level) {
            info!(channel = channel.as_str(), ?banner, "sync banner changed");
            self.publish(|view| view.banner = banner);
        }
        if level == Degradation::Failsafe {
            let event_type = match channel {
                SyncChannel::Push => "push_failsafe",
                SyncChannel::Poll => "poll_failsafe",
            };
            self.log_activity(event_type, "failsafe threshold reached");
        }
    }

    async fn lose_leadership(&mut self, owner_id: String) {
        if self.blocked {
            return;
        }
        warn!(holder = %owner_id, "tab lock taken over; ending this tab's session");
        self.blocked = true;
        self.stop_sync().await;
        if let Some(lease) = self.lease.take() {
            lease.abandon().await;
        }
        self.backlog.clear();
        self.publish(|view| {
            view.screen = Screen::Blocked;
            view.banner = None;
        });
        self.log_activity("leadership_lost", format!("holder={owner_id}"));
    }

    /// Drop the local session: stop syncing, clear both records, render Login.
    async fn sign_out(&mut self) -> Result<(), SessionError> {
        self.stop_sync().await;
        self.credential = None;
        self.snapshot = None;
        self.questions.clear();
        self.boot_pending = false;
        self.resume_pending = false;
        self.tracker.reset();
        self.banners.reset();
        self.drain_channel();
        self.backlog
            .retain(|event| matches!(event, SyncEvent::LeadershipLost { .. }));
        self.view.send_replace(ViewState::default());
        self.credentials.clear()?;
        self.progress.clear()?;
        Ok(())
    }

    fn start_sync(&mut self) {
        self.connection
            .open(self.events_tx.clone(), self.observations.clone());
        self.polling
            .start(self.events_tx.clone(), self.observations.clone());
    }

    async fn stop_sync(&mut self) {
        self.connection.close().await;
        self.polling.stop().await;
        self.stop_heartbeat();
    }

    async fn release_lease(&mut self) {
        if let Some(lease) = self.lease.take() {
            if let Err(err) = lease.release().await {
                warn!(error = %err, "failed to release tab lock");
            }
        }
    }

    /// Run the server heartbeat exactly while the session is running.
    fn sync_heartbeat(&mut self) {
        let completed = self.snapshot.as_ref().is_some_and(|snapshot| snapshot.completed);
        let wanted = !self.blocked
            && !completed
            && self.lease.is_some()
            && self.tracker.phase() == Some(SessionPhase::Running);
        match (wanted, self.credential.as_ref()) {
            (true, Some(credential)) => {
                if self.heartbeat.is_none() {
                    let api = self.api.clone();
                    let token = credential.token.clone();
                    let period = self.server_heartbeat;
                    self.heartbeat = Some(ScheduledTask::spawn("server-heartbeat", move |shutdown| {
                        server_heartbeat(api, token, period, shutdown)
                    }));
                    debug!("server heartbeat started");
                }
            }
            _ => self.stop_heartbeat(),
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.cancel();
            debug!("server heartbeat stopped");
        }
    }

    /// Whether the server changed state (or leadership was lost) since `epoch`.
    /// Pulls queued events into the backlog so they are handled afterwards.
    fn interrupted(&mut self, epoch: u64) -> bool {
        self.drain_channel();
        self.blocked
            || self.tracker.epoch() != epoch
            || self.backlog.iter().any(|event| match event {
                SyncEvent::Status(observation) => self.tracker.classify(observation).is_transition(),
                SyncEvent::LeadershipLost { .. } => true,
                SyncEvent::Health { .. } => false,
            })
    }

    fn drain_channel(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.backlog.push_back(event);
        }
    }

    fn ensure_active(&self) -> Result<Credential, SessionError> {
        if self.blocked {
            return Err(SessionError::Blocked);
        }
        let Some(credential) = self.credential.clone() else {
            return Err(SessionError::SignedOut);
        };
        if self.snapshot.as_ref().is_some_and(|snapshot| snapshot.completed) {
            return Err(SessionError::InvalidState("mission already completed".into()));
        }
        if self.tracker.phase() != Some(SessionPhase::Running) {
            return Err(SessionError::SessionInactive);
        }
        Ok(credential)
    }

    fn ensure_intro_done(&self) -> Result<(), SessionError> {
        if self.snapshot.as_ref().is_some_and(|snapshot| snapshot.intro_complete) {
            Ok(())
        } else {
            Err(SessionError::InvalidState("intro has not been completed".into()))
        }
    }

    fn current_screen(&self) -> Screen {
        self.view.borrow().screen.clone()
    }

    /// Write the snapshot as a whole record after applying `update`.
    fn persist(&mut self, update: impl FnOnce(&mut ProgressSnapshot)) -> Result<(), SessionError> {
        let Some(credential) = self.credential.as_ref() else {
            return Err(SessionError::SignedOut);
        };
        let now = self.clock.now_ms();
        let mut snapshot = match self.snapshot.clone() {
            Some(snapshot) if snapshot.belongs_to(credential) => snapshot,
            _ => ProgressSnapshot::new(credential, now),
        };
        update(&mut snapshot);
        snapshot.saved_at = now;
        snapshot.score = self.view.borrow().score;
        self.snapshot = Some(self.progress.write(snapshot)?);
        Ok(())
    }

    fn publish(&self, update: impl FnOnce(&mut ViewState)) {
        self.view.send_if_modified(|view| {
            let before = view.clone();
            update(view);
            *view != before
        });
    }

    fn publish_remaining(&self) {
        if let Some(remaining) = self.tracker.current().map(|status| status.remaining_seconds) {
            self.publish(|view| view.remaining_seconds = remaining);
        }
    }

    /// Fire-and-forget anti-cheat signal.
    fn log_activity(&self, event_type: &str, details: impl Into<String>) {
        let Some(credential) = self.credential.as_ref() else {
            return;
        };
        let api = self.api.clone();
        let token = credential.token.clone();
        let request = ActivityRequest::new(event_type, details);
        tokio::spawn(async move {
            let event_type = request.event_type.clone();
            if let Err(err) = api.log_activity(token, request).await {
                debug!(event_type = %event_type, error = %err, "activity log dropped");
            }
        });
    }
}

async fn server_heartbeat(
    api: Arc<dyn ServerApi>,
    token: String,
    period: Duration,
    mut shutdown: Shutdown,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(err) = api.heartbeat(token.clone()).await {
                    warn!(error = %err, "server heartbeat failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::TokioClock,
        config::ClientConfig,
        dao::{
            memory::MemoryStorage,
            models::TabLockRecord,
            storage::{PROGRESS_KEY, TAB_LOCK_KEY, read_json, write_json},
        },
        dto::{gameplay::CodingPrompt, status::ServerSessionStatus},
        services::testing::{FakeServerApi, ScriptedTransport, ValidationMode},
        state::view::Banner,
    };

    fn tab(storage: &Arc<MemoryStorage>, api: &FakeServerApi) -> SessionController {
        SessionController::new(
            TabEnvironment {
                storage: storage.clone(),
                api: Arc::new(api.clone()),
                transport: Arc::new(ScriptedTransport::idle()),
                clock: Arc::new(TokioClock::new()),
            },
            ClientConfig::default().controller,
        )
    }

    fn neo(session_id: i64) -> Credential {
        Credential {
            username: "neo".into(),
            token: "token-neo".into(),
            session_id,
        }
    }

    fn saved(credential: &Credential, level: u32, screen: SavedScreen, index: usize) -> ProgressSnapshot {
        let mut snapshot = ProgressSnapshot::new(credential, 0);
        snapshot.intro_complete = true;
        snapshot.level = level;
        snapshot.screen = screen;
        snapshot.question_index = index;
        snapshot
    }

    fn seed(
        storage: &Arc<MemoryStorage>,
        api: &FakeServerApi,
        credential: &Credential,
        snapshot: Option<ProgressSnapshot>,
    ) {
        api.trust(credential);
        CredentialStore::new(storage.clone()).save(credential).unwrap();
        if let Some(snapshot) = snapshot {
            ProgressStore::new(storage.clone()).write(snapshot).unwrap();
        }
    }

    fn questions(ids: &[&str]) -> LevelContent {
        LevelContent::Questions {
            title: "Sprint".into(),
            questions: ids
                .iter()
                .map(|id| Question {
                    id: id.to_string(),
                    text: format!("question {id}"),
                    options: vec!["a".into(), "b".into()],
                })
                .collect(),
        }
    }

    fn stored(storage: &Arc<MemoryStorage>) -> Option<ProgressSnapshot> {
        read_json(storage.as_ref(), PROGRESS_KEY).unwrap()
    }

    fn observe(clock: &ObservationClock, phase: SessionPhase, session_id: i64) -> StatusObservation {
        StatusObservation {
            status: ServerSessionStatus::new(phase, 600, Some(session_id)),
            player_count: None,
            source: StatusSource::Push,
            ticket: clock.ticket(),
        }
    }

    fn question_position(view: &ViewState) -> (u32, usize, String) {
        match &view.screen {
            Screen::Playing(PlayScreen::Question {
                level,
                index,
                question,
                ..
            }) => (*level, *index, question.id.clone()),
            other => panic!("expected a question screen, got {other:?}"),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    /// Running session 7 with the player saved at level 2, question 1.
    async fn resumed_mid_level() -> (Arc<MemoryStorage>, FakeServerApi, SessionController) {
        let storage = Arc::new(MemoryStorage::new());
        let api = FakeServerApi::new();
        let credential = neo(7);
        seed(
            &storage,
            &api,
            &credential,
            Some(saved(&credential, 2, SavedScreen::Question, 1)),
        );
        api.set_status(SessionPhase::Running, 7);
        api.set_level(2, None, questions(&["q0", "q1", "q2"]));
        let mut controller = tab(&storage, &api);
        controller.start().await.unwrap();
        (storage, api, controller)
    }

    #[tokio::test(start_paused = true)]
    async fn second_tab_within_handoff_is_blocked() {
        let storage = Arc::new(MemoryStorage::new());
        let api = FakeServerApi::new();
        seed(&storage, &api, &neo(1), None);

        let mut first = tab(&storage, &api);
        first.start().await.unwrap();
        assert_eq!(first.current_view().screen, Screen::Waiting { paused: false });

        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut second = tab(&storage, &api);
        let started = Instant::now();
        second.start().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1_200));
        assert!(second.is_blocked());
        assert_eq!(second.current_view().screen, Screen::Blocked);
        assert!(matches!(second.enter_arena(0), Err(SessionError::Blocked)));
        assert!(matches!(second.logout().await, Err(SessionError::Blocked)));

        settle().await;
        assert_eq!(api.count("validate"), 1);
        assert_eq!(api.count("activity:tab_blocked"), 1);
        assert!(!first.is_blocked());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_reopens_the_saved_question() {
        let (_storage, api, controller) = resumed_mid_level().await;
        let view = controller.current_view();
        assert_eq!(question_position(&view), (2, 1, "q1".to_string()));
        assert_eq!(view.username.as_deref(), Some("neo"));
        assert_eq!(api.count("level:"), 1);
        assert_eq!(api.count("level:2:-"), 1);

        settle().await;
        assert_eq!(api.count("activity:session_resumed"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_snapshot_never_reenters_gameplay() {
        let storage = Arc::new(MemoryStorage::new());
        let api = FakeServerApi::new();
        let credential = neo(7);
        let mut done = saved(&credential, 3, SavedScreen::Coding, 0);
        done.completed = true;
        seed(&storage, &api, &credential, Some(done));
        api.set_status(SessionPhase::Running, 7);

        let mut controller = tab(&storage, &api);
        controller.start().await.unwrap();
        assert_eq!(controller.current_view().screen, Screen::Completed);
        assert_eq!(api.count("level:"), 0);
        assert!(matches!(
            controller.enter_arena(1),
            Err(SessionError::InvalidState(_))
        ));

        settle().await;
        assert_eq!(api.count("heartbeat"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn intro_plays_before_the_first_level() {
        let storage = Arc::new(MemoryStorage::new());
        let api = FakeServerApi::new();
        seed(&storage, &api, &neo(1), None);
        api.set_status(SessionPhase::Running, 1);
        api.set_level(0, None, questions(&["warmup"]));

        let mut controller = tab(&storage, &api);
        controller.start().await.unwrap();
        assert_eq!(controller.current_view().screen, Screen::Intro);
        let snapshot = stored(&storage).unwrap();
        assert_eq!(snapshot.screen, SavedScreen::Intro);
        assert!(!snapshot.intro_complete);
        assert!(matches!(
            controller.load_level(0, None).await,
            Err(SessionError::InvalidState(_))
        ));

        controller.complete_intro().await.unwrap();
        assert_eq!(
            question_position(&controller.current_view()),
            (0, 0, "warmup".to_string())
        );
        let snapshot = stored(&storage).unwrap();
        assert!(snapshot.intro_complete);
        assert_eq!(snapshot.screen, SavedScreen::Question);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_and_older_statuses_change_nothing() {
        let (_storage, api, mut controller) = resumed_mid_level().await;
        let clock = controller.observation_clock();
        let before = controller.current_view();

        let tx = controller.event_sender();
        tx.send(SyncEvent::Status(observe(&clock, SessionPhase::Running, 7)))
            .unwrap();
        tx.send(SyncEvent::Status(observe(&clock, SessionPhase::Running, 7)))
            .unwrap();
        controller.sync_pending().await.unwrap();
        assert_eq!(
            controller
                .apply_server_status(observe(&clock, SessionPhase::Running, 7))
                .await
                .unwrap(),
            StatusChange::Unchanged
        );

        let older = StatusObservation {
            status: ServerSessionStatus::new(SessionPhase::Paused, 600, Some(7)),
            player_count: None,
            source: StatusSource::Poll,
            ticket: 1,
        };
        assert_eq!(
            controller.apply_server_status(older).await.unwrap(),
            StatusChange::Stale
        );
        assert_eq!(controller.current_view().screen, before.screen);
        assert_eq!(api.count("level:"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_credential_returns_to_login() {
        let storage = Arc::new(MemoryStorage::new());
        let api = FakeServerApi::new();
        let credential = neo(1);
        seed(
            &storage,
            &api,
            &credential,
            Some(saved(&credential, 1, SavedScreen::Arena, 0)),
        );
        api.revoke_all();

        let mut controller = tab(&storage, &api);
        controller.start().await.unwrap();
        assert_eq!(controller.current_view(), ViewState::default());
        assert!(controller.credential().is_none());
        assert!(CredentialStore::new(storage.clone()).load().unwrap().is_none());
        assert!(stored(&storage).is_none());
        assert!(storage.get(TAB_LOCK_KEY).unwrap().is_some());

        settle().await;
        assert_eq!(api.count("status"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_render_keeps_the_snapshot() {
        let (storage, api, mut controller) = resumed_mid_level().await;
        let clock = controller.observation_clock();
        let before = stored(&storage).unwrap();

        api.set_status(SessionPhase::Paused, 7);
        let change = controller
            .apply_server_status(observe(&clock, SessionPhase::Paused, 7))
            .await
            .unwrap();
        assert!(change.is_transition());
        assert_eq!(controller.current_view().screen, Screen::Waiting { paused: true });
        assert_eq!(stored(&storage).unwrap(), before);
        assert!(matches!(
            controller.submit_answer("a").await,
            Err(SessionError::SessionInactive)
        ));

        api.set_status(SessionPhase::Running, 7);
        controller
            .apply_server_status(observe(&clock, SessionPhase::Running, 7))
            .await
            .unwrap();
        assert_eq!(
            question_position(&controller.current_view()),
            (2, 1, "q1".to_string())
        );
        assert_eq!(api.count("level:2:-"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn status_change_mid_submission_aborts_it() {
        let (storage, api, mut controller) = resumed_mid_level().await;
        api.set_answer("q1", "b");
        api.set_answer_delay(Duration::from_secs(2));
        let tx = controller.event_sender();
        let clock = controller.observation_clock();

        let (outcome, ()) = tokio::join!(controller.submit_answer("b"), async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            tx.send(SyncEvent::Status(observe(&clock, SessionPhase::Paused, 7)))
                .unwrap();
        });
        assert_eq!(outcome.unwrap(), SubmitOutcome::Aborted);

        let view = controller.current_view();
        assert_eq!(view.screen, Screen::Waiting { paused: true });
        assert_eq!(view.score, 0);
        assert_eq!(stored(&storage).unwrap().question_index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_validation_failure_retries_on_next_status() {
        let storage = Arc::new(MemoryStorage::new());
        let api = FakeServerApi::new();
        seed(&storage, &api, &neo(1), None);
        api.set_status(SessionPhase::Running, 1);
        api.set_validation(ValidationMode::Offline);

        let mut controller = tab(&storage, &api);
        controller.start().await.unwrap();
        assert_eq!(controller.current_view().screen, Screen::Waiting { paused: false });
        assert!(CredentialStore::new(storage.clone()).load().unwrap().is_some());

        api.set_validation(ValidationMode::Normal);
        settle().await;
        controller.sync_pending().await.unwrap();
        assert_eq!(controller.current_view().screen, Screen::Intro);
        assert_eq!(api.count("validate"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_releases_the_lock_and_register_reclaims_it() {
        let storage = Arc::new(MemoryStorage::new());
        let api = FakeServerApi::new();
        seed(&storage, &api, &neo(1), None);

        let mut controller = tab(&storage, &api);
        controller.start().await.unwrap();
        controller.logout().await.unwrap();
        assert_eq!(controller.current_view(), ViewState::default());
        assert!(storage.get(TAB_LOCK_KEY).unwrap().is_none());
        assert!(CredentialStore::new(storage.clone()).load().unwrap().is_none());

        let polls = api.count("status");
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.count("status"), polls);

        assert!(matches!(
            controller.register("x").await,
            Err(SessionError::InvalidInput(_))
        ));
        controller.register("trinity").await.unwrap();
        assert!(storage.get(TAB_LOCK_KEY).unwrap().is_some());
        let view = controller.current_view();
        assert_eq!(view.username.as_deref(), Some("trinity"));
        assert_eq!(view.screen, Screen::Waiting { paused: false });
        let saved = CredentialStore::new(storage.clone()).load().unwrap().unwrap();
        assert_eq!(saved.username, "trinity");
    }

    #[tokio::test(start_paused = true)]
    async fn takeover_blocks_this_tab() {
        let storage = Arc::new(MemoryStorage::new());
        let api = FakeServerApi::new();
        seed(&storage, &api, &neo(1), None);
        let mut controller = tab(&storage, &api);
        controller.start().await.unwrap();

        let intruder = TabLockRecord {
            owner_id: "intruder".into(),
            timestamp: TokioClock::new().now_ms(),
        };
        write_json(storage.as_ref(), TAB_LOCK_KEY, &intruder).unwrap();
        settle().await;
        controller.sync_pending().await.unwrap();

        assert_eq!(controller.current_view().screen, Screen::Blocked);
        let lock: TabLockRecord = read_json(storage.as_ref(), TAB_LOCK_KEY).unwrap().unwrap();
        assert_eq!(lock.owner_id, "intruder");
        assert!(matches!(
            controller.submit_answer("a").await,
            Err(SessionError::Blocked)
        ));

        settle().await;
        assert_eq!(api.count("activity:leadership_lost"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn most_severe_channel_drives_the_banner() {
        let storage = Arc::new(MemoryStorage::new());
        let api = FakeServerApi::new();
        seed(&storage, &api, &neo(1), None);
        let mut controller = tab(&storage, &api);
        controller.start().await.unwrap();
        let tx = controller.event_sender();

        tx.send(SyncEvent::Health {
            channel: SyncChannel::Push,
            level: Degradation::Unstable,
        })
        .unwrap();
        controller.sync_pending().await.unwrap();
        assert_eq!(controller.current_view().banner, Some(Banner::ConnectionUnstable));

        tx.send(SyncEvent::Health {
            channel: SyncChannel::Poll,
            level: Degradation::Failsafe,
        })
        .unwrap();
        tx.send(SyncEvent::Health {
            channel: SyncChannel::Push,
            level: Degradation::Healthy,
        })
        .unwrap();
        controller.sync_pending().await.unwrap();
        assert_eq!(controller.current_view().banner, Some(Banner::AutoSync));

        settle().await;
        assert_eq!(api.count("activity:poll_failsafe"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn answers_advance_through_the_level_and_arena() {
        let storage = Arc::new(MemoryStorage::new());
        let api = FakeServerApi::new();
        let credential = neo(1);
        seed(
            &storage,
            &api,
            &credential,
            Some(saved(&credential, 0, SavedScreen::Question, 0)),
        );
        api.set_status(SessionPhase::Running, 1);
        api.set_level(0, None, questions(&["q0", "q1"]));
        api.set_answer("q0", "a");
        api.set_answer("q1", "b");
        api.set_level(
            1,
            None,
            LevelContent::ChoosePath {
                title: "Fork".into(),
                message: "Choose path".into(),
                paths: vec!["easy".into(), "hard".into()],
            },
        );
        api.set_level(1, Some(HIDDEN_PATH), questions(&["k0"]));

        let mut controller = tab(&storage, &api);
        controller.start().await.unwrap();

        assert_eq!(
            controller.submit_answer("b").await.unwrap(),
            SubmitOutcome::Incorrect
        );
        assert_eq!(question_position(&controller.current_view()).1, 0);
        assert_eq!(
            controller.submit_answer("a").await.unwrap(),
            SubmitOutcome::Correct { score: 10 }
        );
        assert_eq!(stored(&storage).unwrap().question_index, 1);
        assert_eq!(
            controller.submit_answer("b").await.unwrap(),
            SubmitOutcome::Correct { score: 20 }
        );
        assert_eq!(
            controller.current_view().screen,
            Screen::Playing(PlayScreen::Arena { level: 1 })
        );
        let snapshot = stored(&storage).unwrap();
        assert_eq!((snapshot.screen, snapshot.level), (SavedScreen::Arena, 1));
        assert_eq!(snapshot.score, 20);

        assert!(matches!(
            controller.choose_path("easy").await,
            Err(SessionError::InvalidState(_))
        ));
        controller.open_level().await.unwrap();
        assert!(matches!(
            controller.current_view().screen,
            Screen::Playing(PlayScreen::PathChoice { level: 1, .. })
        ));
        assert!(matches!(
            controller.choose_path("nope").await,
            Err(SessionError::InvalidInput(_))
        ));

        controller.choose_path(HIDDEN_PATH).await.unwrap();
        assert_eq!(
            question_position(&controller.current_view()),
            (1, 0, "k0".to_string())
        );
        assert_eq!(
            stored(&storage).unwrap().path_choice.as_deref(),
            Some(HIDDEN_PATH)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn solving_the_code_challenge_completes_the_mission() {
        let storage = Arc::new(MemoryStorage::new());
        let api = FakeServerApi::new();
        let credential = neo(1);
        seed(
            &storage,
            &api,
            &credential,
            Some(saved(&credential, 3, SavedScreen::Coding, 0)),
        );
        api.set_status(SessionPhase::Running, 1);
        api.set_level(
            3,
            None,
            LevelContent::Coding {
                title: "Final".into(),
                question: CodingPrompt {
                    text: "Print 42".into(),
                    template: "def solve():".into(),
                },
            },
        );
        api.set_code_solution("print(42)");

        let mut controller = tab(&storage, &api);
        controller.start().await.unwrap();
        assert!(matches!(
            controller.current_view().screen,
            Screen::Playing(PlayScreen::Coding { level: 3, .. })
        ));

        assert_eq!(
            controller.submit_code("print(41)").await.unwrap(),
            CodeOutcome::Wrong
        );
        assert_eq!(
            controller.submit_code("print(42)").await.unwrap(),
            CodeOutcome::Completed { score: 100 }
        );
        assert_eq!(controller.current_view().screen, Screen::Completed);
        assert!(stored(&storage).unwrap().completed);
        assert!(matches!(
            controller.submit_answer("a").await,
            Err(SessionError::InvalidState(_))
        ));

        let clock = controller.observation_clock();
        controller
            .apply_server_status(observe(&clock, SessionPhase::Paused, 1))
            .await
            .unwrap();
        controller
            .apply_server_status(observe(&clock, SessionPhase::Running, 1))
            .await
            .unwrap();
        assert_eq!(controller.current_view().screen, Screen::Completed);
        assert_eq!(api.count("level:"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn server_heartbeat_runs_only_while_running() {
        let storage = Arc::new(MemoryStorage::new());
        let api = FakeServerApi::new();
        let credential = neo(1);
        seed(
            &storage,
            &api,
            &credential,
            Some(saved(&credential, 0, SavedScreen::Arena, 0)),
        );
        api.set_status(SessionPhase::Running, 1);

        let mut controller = tab(&storage, &api);
        controller.start().await.unwrap();
        assert_eq!(
            controller.current_view().screen,
            Screen::Playing(PlayScreen::Arena { level: 0 })
        );

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(api.count("heartbeat"), 2);

        api.set_status(SessionPhase::Paused, 1);
        let clock = controller.observation_clock();
        controller
            .apply_server_status(observe(&clock, SessionPhase::Paused, 1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.count("heartbeat"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hiding_the_tab_is_reported_once() {
        let storage = Arc::new(MemoryStorage::new());
        let api = FakeServerApi::new();
        seed(&storage, &api, &neo(1), None);
        let mut controller = tab(&storage, &api);
        controller.start().await.unwrap();

        controller.set_visibility(Visibility::Hidden);
        controller.set_visibility(Visibility::Hidden);
        controller.set_visibility(Visibility::Visible);
        settle().await;
        assert_eq!(api.count("activity:visibility_hidden"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_level_content_is_retried_on_next_status() {
        let (storage, api, mut controller) = resumed_mid_level().await;
        let clock = controller.observation_clock();

        api.set_status(SessionPhase::Paused, 7);
        controller
            .apply_server_status(observe(&clock, SessionPhase::Paused, 7))
            .await
            .unwrap();

        api.set_status(SessionPhase::Running, 7);
        api.fail_levels(1);
        let change = controller
            .apply_server_status(observe(&clock, SessionPhase::Running, 7))
            .await
            .unwrap();
        assert!(change.is_transition());
        assert_eq!(controller.current_view().screen, Screen::Waiting { paused: false });
        assert_eq!(stored(&storage).unwrap().question_index, 1);

        assert_eq!(
            controller
                .apply_server_status(observe(&clock, SessionPhase::Running, 7))
                .await
                .unwrap(),
            StatusChange::Unchanged
        );
        assert_eq!(
            question_position(&controller.current_view()),
            (2, 1, "q1".to_string())
        );

        controller
            .apply_server_status(observe(&clock, SessionPhase::Running, 7))
            .await
            .unwrap();
        assert_eq!(api.count("level:2:-"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn boot_survives_unreachable_level_content() {
        let storage = Arc::new(MemoryStorage::new());
        let api = FakeServerApi::new();
        let credential = neo(7);
        seed(
            &storage,
            &api,
            &credential,
            Some(saved(&credential, 2, SavedScreen::Question, 1)),
        );
        api.set_status(SessionPhase::Running, 7);
        api.set_level(2, None, questions(&["q0", "q1", "q2"]));
        api.fail_levels(1);

        let mut controller = tab(&storage, &api);
        controller.start().await.unwrap();
        let view = controller.current_view();
        assert_eq!(view.screen, Screen::Waiting { paused: false });
        assert_eq!(view.username.as_deref(), Some("neo"));
        assert!(controller.credential().is_some());

        let clock = controller.observation_clock();
        controller
            .apply_server_status(observe(&clock, SessionPhase::Running, 7))
            .await
            .unwrap();
        assert_eq!(
            question_position(&controller.current_view()),
            (2, 1, "q1".to_string())
        );

        controller.teardown().await;
        assert!(storage.get(TAB_LOCK_KEY).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn revoked_token_mid_game_signs_out() {
        let (storage, api, mut controller) = resumed_mid_level().await;
        api.revoke_all();

        assert!(matches!(
            controller.submit_answer("a").await,
            Err(SessionError::Unauthorized)
        ));
        assert_eq!(controller.current_view(), ViewState::default());
        assert!(controller.credential().is_none());
        assert!(CredentialStore::new(storage.clone()).load().unwrap().is_none());
        assert!(stored(&storage).is_none());
        assert!(storage.get(TAB_LOCK_KEY).unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn refused_submission_refreshes_status() {
        let (_storage, api, mut controller) = resumed_mid_level().await;
        settle().await;
        let polls = api.count("status");

        api.set_status(SessionPhase::Paused, 7);
        assert!(matches!(
            controller.submit_answer("a").await,
            Err(SessionError::SessionInactive)
        ));
        assert!(controller.credential().is_some());

        settle().await;
        assert_eq!(api.count("status"), polls + 1);
        controller.sync_pending().await.unwrap();
        assert_eq!(controller.current_view().screen, Screen::Waiting { paused: true });
    }
}
