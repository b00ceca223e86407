//! In-process fakes for the server and the push transport.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::{BoxFuture, pending};
use tokio::{sync::mpsc, time::Instant};
use tokio_tungstenite::tungstenite;

use crate::{
    dao::models::Credential,
    dto::{
        auth::{Admission, RegisterRequest},
        gameplay::{
            ActivityRequest, AnswerResponse, AnswerStatus, CodeResponse, CodeStatus, LevelContent,
            SubmitAnswerRequest,
        },
        status::{ServerSessionStatus, SessionPhase, StatusResponse},
    },
    services::{
        api::{ApiError, ApiResult, ServerApi},
        transport::{PushChannel, PushTransport, TransportError},
    },
};

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Normal,
    Offline,
}

struct FakeState {
    status: ServerSessionStatus,
    player_count: u32,
    status_delay: Duration,
    status_failing: bool,
    validation: ValidationMode,
    tokens: HashMap<String, Credential>,
    scores: HashMap<String, i64>,
    issued: u32,
    levels: HashMap<(u32, Option<String>), LevelContent>,
    level_failures: u32,
    answers: HashMap<String, String>,
    answered: HashSet<(String, String)>,
    answer_delay: Duration,
    code_solution: String,
    calls: Vec<String>,
}

/// Scriptable in-memory game server.
#[derive(Clone)]
pub struct FakeServerApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeServerApi {
    /// Server with session 1 waiting to start.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                status: ServerSessionStatus::new(SessionPhase::Waiting, 1_800, Some(1)),
                player_count: 0,
                status_delay: Duration::ZERO,
                status_failing: false,
                validation: ValidationMode::Normal,
                tokens: HashMap::new(),
                scores: HashMap::new(),
                issued: 0,
                levels: HashMap::new(),
                level_failures: 0,
                answers: HashMap::new(),
                answered: HashSet::new(),
                answer_delay: Duration::ZERO,
                code_solution: String::new(),
                calls: Vec::new(),
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_status(&self, phase: SessionPhase, session_id: i64) {
        self.with(|state| {
            state.status.status = phase;
            state.status.session_id = Some(session_id);
        });
    }

    pub fn set_status_delay(&self, delay: Duration) {
        self.with(|state| state.status_delay = delay);
    }

    pub fn fail_status(&self, failing: bool) {
        self.with(|state| state.status_failing = failing);
    }

    pub fn set_validation(&self, mode: ValidationMode) {
        self.with(|state| state.validation = mode);
    }

    /// Accept `credential.token` on validation, as if issued earlier.
    pub fn trust(&self, credential: &Credential) {
        self.with(|state| {
            state
                .tokens
                .insert(credential.token.clone(), credential.clone());
        });
    }

    pub fn revoke_all(&self) {
        self.with(|state| state.tokens.clear());
    }

    pub fn set_level(&self, level: u32, path: Option<&str>, content: LevelContent) {
        self.with(|state| {
            state
                .levels
                .insert((level, path.map(str::to_string)), content);
        });
    }

    /// Make the next `times` level content requests fail as unreachable.
    pub fn fail_levels(&self, times: u32) {
        self.with(|state| state.level_failures = times);
    }

    pub fn set_answer(&self, question_id: &str, answer: &str) {
        self.with(|state| {
            state
                .answers
                .insert(question_id.to_string(), answer.to_string());
        });
    }

    pub fn set_answer_delay(&self, delay: Duration) {
        self.with(|state| state.answer_delay = delay);
    }

    pub fn set_code_solution(&self, code: &str) {
        self.with(|state| state.code_solution = code.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|state| state.calls.clone())
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.with(|state| {
            state
                .calls
                .iter()
                .filter(|call| call.starts_with(prefix))
                .count()
        })
    }

    fn record(&self, call: String) {
        self.with(|state| state.calls.push(call));
    }

    fn authorize(&self, token: &str) -> ApiResult<Credential> {
        self.with(|state| state.tokens.get(token).cloned())
            .ok_or_else(|| ApiError::Unauthorized {
                detail: "Invalid token".into(),
            })
    }
}

impl Default for FakeServerApi {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerApi for FakeServerApi {
    fn register(&self, request: RegisterRequest) -> BoxFuture<'static, ApiResult<Admission>> {
        let api = self.clone();
        Box::pin(async move {
            api.record(format!("register:{}", request.username));
            Ok(api.with(|state| {
                state.issued += 1;
                let session_id = state.status.session_id.unwrap_or(1);
                let credential = Credential {
                    username: request.username.clone(),
                    token: format!("token-{}-{}", request.username, state.issued),
                    session_id,
                };
                state
                    .tokens
                    .insert(credential.token.clone(), credential.clone());
                Admission {
                    credential,
                    score: 0,
                    status: state.status.clone(),
                }
            }))
        })
    }

    fn validate(&self, token: String) -> BoxFuture<'static, ApiResult<Admission>> {
        let api = self.clone();
        Box::pin(async move {
            api.record("validate".into());
            if api.with(|state| state.validation) == ValidationMode::Offline {
                return Err(ApiError::transport(
                    "validate",
                    io::Error::from(io::ErrorKind::ConnectionRefused),
                ));
            }
            let credential = api.authorize(&token)?;
            Ok(api.with(|state| Admission {
                score: state.scores.get(&credential.token).copied().unwrap_or(0),
                status: state.status.clone(),
                credential,
            }))
        })
    }

    fn status(&self) -> BoxFuture<'static, ApiResult<StatusResponse>> {
        let api = self.clone();
        Box::pin(async move {
            api.record("status".into());
            let delay = api.with(|state| state.status_delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            api.with(|state| {
                if state.status_failing {
                    return Err(ApiError::Status {
                        path: "/api/game_status".into(),
                        status: 503,
                        detail: "unavailable".into(),
                    });
                }
                Ok(StatusResponse {
                    session: state.status.clone(),
                    player_count: state.player_count,
                    name: None,
                })
            })
        })
    }

    fn level_content(
        &self,
        level: u32,
        path: Option<String>,
    ) -> BoxFuture<'static, ApiResult<LevelContent>> {
        let api = self.clone();
        Box::pin(async move {
            api.record(format!("level:{level}:{}", path.as_deref().unwrap_or("-")));
            let failing = api.with(|state| {
                let failing = state.level_failures > 0;
                state.level_failures = state.level_failures.saturating_sub(1);
                failing
            });
            if failing {
                return Err(ApiError::transport(
                    "level content",
                    io::Error::from(io::ErrorKind::ConnectionReset),
                ));
            }
            api.with(|state| state.levels.get(&(level, path)).cloned())
                .ok_or_else(|| ApiError::NotFound {
                    detail: "Level not found".into(),
                })
        })
    }

    fn submit_answer(
        &self,
        token: String,
        request: SubmitAnswerRequest,
    ) -> BoxFuture<'static, ApiResult<AnswerResponse>> {
        let api = self.clone();
        Box::pin(async move {
            api.record(format!("answer:{}:{}", request.question_id, request.answer));
            let credential = api.authorize(&token)?;
            let delay = api.with(|state| state.answer_delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            api.with(|state| {
                if state.status.status != SessionPhase::Running {
                    return Err(ApiError::Forbidden {
                        detail: "Session is not currently running".into(),
                    });
                }
                let key = (credential.username.clone(), request.question_id.clone());
                let score = state.scores.entry(token.clone()).or_insert(0);
                if state.answered.contains(&key) {
                    return Ok(AnswerResponse {
                        status: AnswerStatus::AlreadyAnswered,
                        new_score: *score,
                    });
                }
                let expected = state.answers.get(&request.question_id);
                if expected.is_some_and(|expected| expected == &request.answer) {
                    *score += 10;
                    let new_score = *score;
                    state.answered.insert(key);
                    Ok(AnswerResponse {
                        status: AnswerStatus::Correct,
                        new_score,
                    })
                } else {
                    Ok(AnswerResponse {
                        status: AnswerStatus::Incorrect,
                        new_score: *score,
                    })
                }
            })
        })
    }

    fn submit_code(&self, token: String, code: String) -> BoxFuture<'static, ApiResult<CodeResponse>> {
        let api = self.clone();
        Box::pin(async move {
            api.record("code".into());
            api.authorize(&token)?;
            api.with(|state| {
                if state.status.status != SessionPhase::Running {
                    return Err(ApiError::Forbidden {
                        detail: "Session is not currently running".into(),
                    });
                }
                let score = state.scores.entry(token.clone()).or_insert(0);
                if code == state.code_solution {
                    *score += 100;
                    Ok(CodeResponse {
                        status: CodeStatus::Correct,
                        new_score: Some(*score),
                    })
                } else {
                    Ok(CodeResponse {
                        status: CodeStatus::Wrong,
                        new_score: Some(*score),
                    })
                }
            })
        })
    }

    fn heartbeat(&self, token: String) -> BoxFuture<'static, ApiResult<()>> {
        let api = self.clone();
        Box::pin(async move {
            api.record("heartbeat".into());
            api.authorize(&token).map(|_| ())
        })
    }

    fn log_activity(
        &self,
        _token: String,
        request: ActivityRequest,
    ) -> BoxFuture<'static, ApiResult<()>> {
        let api = self.clone();
        Box::pin(async move {
            api.record(format!("activity:{}", request.event_type));
            Ok(())
        })
    }
}

enum Step {
    Refuse,
    Accept(mpsc::UnboundedReceiver<Option<String>>),
}

/// Push transport whose connections follow a queued script.
///
/// Each accepted connection is fed through the returned sender: `Some(text)`
/// delivers a frame, `None` makes the server close the channel.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    idle_when_exhausted: bool,
    connects: Mutex<Vec<Instant>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    /// Refuses every connection not explicitly scripted.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Accepts unscripted connections and keeps them silently open.
    pub fn idle() -> Self {
        Self::build(true)
    }

    fn build(idle_when_exhausted: bool) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            idle_when_exhausted,
            connects: Mutex::new(Vec::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn accept(&self) -> mpsc::UnboundedSender<Option<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.steps.lock().unwrap().push_back(Step::Accept(rx));
        tx
    }

    pub fn refuse(&self, times: usize) {
        let mut steps = self.steps.lock().unwrap();
        for _ in 0..times {
            steps.push_back(Step::Refuse);
        }
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closed_channels(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PushTransport for ScriptedTransport {
    fn connect(&self) -> BoxFuture<'static, Result<Box<dyn PushChannel>, TransportError>> {
        self.connects.lock().unwrap().push(Instant::now());
        let step = self.steps.lock().unwrap().pop_front();
        let channel = match step {
            Some(Step::Accept(feed)) => Some(Some(feed)),
            Some(Step::Refuse) => None,
            None if self.idle_when_exhausted => Some(None),
            None => None,
        };
        let sent = self.sent.clone();
        let closed = self.closed.clone();
        Box::pin(async move {
            match channel {
                Some(feed) => Ok(Box::new(ScriptedChannel { feed, sent, closed }) as Box<dyn PushChannel>),
                None => Err(TransportError::Connect {
                    url: "scripted://live".into(),
                    source: tungstenite::Error::Io(io::Error::from(io::ErrorKind::ConnectionRefused)),
                }),
            }
        })
    }
}

struct ScriptedChannel {
    feed: Option<mpsc::UnboundedReceiver<Option<String>>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
}

impl PushChannel for ScriptedChannel {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>> {
        self.sent.lock().unwrap().push(text);
        Box::pin(async { Ok(()) })
    }

    fn next_text(&mut self) -> BoxFuture<'_, Result<Option<String>, TransportError>> {
        Box::pin(async move {
            match self.feed.as_mut() {
                Some(feed) => Ok(feed.recv().await.flatten()),
                None => pending().await,
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}
