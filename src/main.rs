//! Headless Quest Arena client: one tab, driven from the terminal.

use std::{env, sync::Arc};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::{StreamExt, wrappers::WatchStream};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use questarena_client::{
    clock::SystemClock,
    config::ClientConfig,
    dao::file::FileStorage,
    error::SessionError,
    services::{http_api::HttpServerApi, polling::Visibility, transport::WsTransport},
    state::{
        SessionController, TabEnvironment,
        view::{Banner, ViewState},
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ClientConfig::load();
    let storage = FileStorage::open(&config.storage_dir).context("opening storage directory")?;
    let api = HttpServerApi::new(&config.server_url, config.request_timeout)
        .context("building HTTP client")?;
    let transport =
        WsTransport::from_server_url(&config.server_url).context("deriving push channel URL")?;
    info!(
        server = %config.server_url,
        storage = %config.storage_dir.display(),
        "starting client"
    );

    let mut controller = SessionController::new(
        TabEnvironment {
            storage: Arc::new(storage),
            api: Arc::new(api),
            transport: Arc::new(transport),
            clock: Arc::new(SystemClock),
        },
        config.controller,
    );
    tokio::spawn(log_views(WatchStream::new(controller.view())));

    if let Err(err) = controller.start().await {
        error!(error = %err, "failed to start session");
        controller.teardown().await;
        return Err(anyhow::Error::new(err).context("starting session"));
    }
    if !controller.is_blocked() && controller.credential().is_none() {
        match env::args().nth(1) {
            Some(username) => {
                if let Err(err) = controller.register(&username).await {
                    error!(error = %err, "registration failed");
                }
            }
            None => warn!("not signed in; enter `register <name>`"),
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = controller.next_event() => {
                let Some(event) = event else { break };
                if let Err(err) = controller.handle_event(event).await {
                    warn!(error = %err, "failed to apply sync event");
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let command = line.trim();
                    if let Err(err) = run_command(&mut controller, command).await {
                        warn!(error = %err, command, "command failed");
                    }
                }
                Ok(None) => stdin_open = false,
                Err(err) => {
                    warn!(error = %err, "stdin closed");
                    stdin_open = false;
                }
            },
        }
    }

    controller.teardown().await;
    Ok(())
}

/// Apply one terminal command to the controller.
async fn run_command(controller: &mut SessionController, line: &str) -> Result<(), SessionError> {
    let (command, argument) = line
        .split_once(' ')
        .map_or((line, ""), |(command, argument)| (command, argument.trim()));
    match command {
        "" => {}
        "register" => controller.register(argument).await?,
        "intro" => controller.complete_intro().await?,
        "level" => {
            let (level, path) = argument
                .split_once(' ')
                .map_or((argument, None), |(level, path)| (level, Some(path.trim())));
            controller.load_level(parse_level(level)?, path).await?
        }
        "path" => controller.choose_path(argument).await?,
        "arena" => controller.enter_arena(parse_level(argument)?)?,
        "open" => controller.open_level().await?,
        "answer" => {
            let outcome = controller.submit_answer(argument).await?;
            info!(?outcome, "answer submitted");
        }
        "code" => {
            let outcome = controller.submit_code(argument).await?;
            info!(?outcome, "code submitted");
        }
        "hide" => controller.set_visibility(Visibility::Hidden),
        "show" => controller.set_visibility(Visibility::Visible),
        "logout" => controller.logout().await?,
        other => warn!(command = other, "unknown command"),
    }
    Ok(())
}

fn parse_level(raw: &str) -> Result<u32, SessionError> {
    raw.parse()
        .map_err(|_| SessionError::InvalidInput(format!("`{raw}` is not a level number")))
}

/// Log every rendered view so the terminal mirrors what a UI would draw.
async fn log_views(mut views: WatchStream<ViewState>) {
    while let Some(view) = views.next().await {
        info!(
            screen = ?view.screen,
            banner = ?view.banner.map(Banner::message),
            user = ?view.username,
            score = view.score,
            remaining_seconds = view.remaining_seconds,
            players = ?view.player_count,
            "view updated"
        );
    }
}

/// Configure tracing subscribers; `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
