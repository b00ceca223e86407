//! Client configuration loading: server location, local storage and timing knobs.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    services::{
        backoff::{BackoffPolicy, Thresholds},
        connection::ConnectionConfig,
        polling::PollingConfig,
        tab_arbiter::ArbiterConfig,
    },
    state::ControllerConfig,
};

/// Default location on disk where the client looks for its JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/client.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUESTARENA_CLIENT_CONFIG";
/// Environment variable that overrides the configured server URL.
const SERVER_URL_ENV: &str = "QUESTARENA_SERVER_URL";
/// Environment variable that overrides the configured storage directory.
const STORAGE_DIR_ENV: &str = "QUESTARENA_STORAGE_DIR";

const DEFAULT_SERVER_URL: &str = "http://localhost:8000";
const DEFAULT_STORAGE_DIR: &str = ".questarena";

#[derive(Debug, Clone, PartialEq)]
/// Immutable runtime configuration of one client process.
pub struct ClientConfig {
    /// Base URL of the game server; the push channel URL is derived from it.
    pub server_url: String,
    /// Directory backing the shared storage domain.
    pub storage_dir: PathBuf,
    /// Timeout applied to every HTTP request.
    pub request_timeout: Duration,
    /// Timing of every background component.
    pub controller: ControllerConfig,
}

impl ClientConfig {
    /// Load the configuration from disk, falling back to built-in defaults,
    /// then apply environment overrides.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    info!(path = %path.display(), "loaded client config");
                    raw.into()
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };
        config.with_overrides(env_override(SERVER_URL_ENV), env_override(STORAGE_DIR_ENV))
    }

    fn with_overrides(mut self, server_url: Option<String>, storage_dir: Option<String>) -> Self {
        if let Some(server_url) = server_url {
            self.server_url = server_url;
        }
        if let Some(storage_dir) = storage_dir {
            self.storage_dir = PathBuf::from(storage_dir);
        }
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file. Durations are in milliseconds.
struct RawConfig {
    server_url: String,
    storage_dir: String,
    request_timeout_ms: u64,
    lock_stale_after_ms: u64,
    lock_handoff_ms: u64,
    lock_heartbeat_ms: u64,
    reconnect_base_ms: u64,
    reconnect_max_ms: u64,
    reconnect_jitter_ms: u64,
    warn_threshold: u32,
    failsafe_threshold: u32,
    poll_foreground_ms: u64,
    poll_background_ms: u64,
    server_heartbeat_ms: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            storage_dir: DEFAULT_STORAGE_DIR.into(),
            request_timeout_ms: 10_000,
            lock_stale_after_ms: 15_000,
            lock_handoff_ms: 1_200,
            lock_heartbeat_ms: 2_000,
            reconnect_base_ms: 1_500,
            reconnect_max_ms: 30_000,
            reconnect_jitter_ms: 500,
            warn_threshold: 4,
            failsafe_threshold: 12,
            poll_foreground_ms: 10_000,
            poll_background_ms: 20_000,
            server_heartbeat_ms: 15_000,
        }
    }
}

impl From<RawConfig> for ClientConfig {
    fn from(raw: RawConfig) -> Self {
        let thresholds = Thresholds {
            warn: raw.warn_threshold,
            failsafe: raw.failsafe_threshold.max(raw.warn_threshold),
        };
        Self {
            server_url: raw.server_url,
            storage_dir: PathBuf::from(raw.storage_dir),
            request_timeout: Duration::from_millis(raw.request_timeout_ms),
            controller: ControllerConfig {
                arbiter: ArbiterConfig {
                    stale_after: Duration::from_millis(raw.lock_stale_after_ms),
                    handoff: Duration::from_millis(raw.lock_handoff_ms),
                    heartbeat: Duration::from_millis(raw.lock_heartbeat_ms),
                },
                connection: ConnectionConfig {
                    backoff: BackoffPolicy {
                        base: Duration::from_millis(raw.reconnect_base_ms),
                        max: Duration::from_millis(raw.reconnect_max_ms),
                        max_jitter: Duration::from_millis(raw.reconnect_jitter_ms),
                    },
                    thresholds,
                },
                polling: PollingConfig {
                    foreground: Duration::from_millis(raw.poll_foreground_ms),
                    background: Duration::from_millis(raw.poll_background_ms),
                    thresholds,
                },
                server_heartbeat: Duration::from_millis(raw.server_heartbeat_ms),
            },
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env_override(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn env_override(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}
