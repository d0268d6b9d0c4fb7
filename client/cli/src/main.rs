//! Atelier - terminal client for a streaming creative studio backend
//!
//! Reads lines from stdin and renders the response stream as it drips in.
//! Progress of background generation jobs arrives over a separate socket
//! and is folded into the same transcript.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a local backend
//! atelier
//!
//! # Another backend, resuming a session
//! atelier --api-url https://studio.example.com --session 3f2a...
//!
//! # Pipe-friendly output (no pacing)
//! echo "draw a cat" | atelier --instant
//!
//! # Verbose logging
//! RUST_LOG=debug atelier
//! ```
//!
//! Type `/help` for the command list.

mod command;
mod render;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use atelier_core::network::probe_health;
use atelier_core::{
    load_config_from_path, ConfigOverrides, EngineParts, EngineSettings, FileStore,
    HttpChatBackend, ImageAttachment, SessionController, SessionId, SubmitError,
    WebSocketConnector,
};

use command::{Command, HELP};
use render::Renderer;

/// Atelier - streaming chat client for the creative studio
#[derive(Parser, Debug)]
#[command(name = "atelier")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Backend base URL
    #[arg(short = 'u', long, env = "ATELIER_API_URL", value_name = "URL")]
    api_url: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "ATELIER_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory for drafts and the offline queue
    #[arg(long, env = "ATELIER_STATE_DIR", value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// Session to open (a new one if omitted)
    #[arg(short = 's', long, value_name = "ID")]
    session: Option<String>,

    /// Render responses without typing pacing
    #[arg(long)]
    instant: bool,

    /// Show progress channel state changes
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "ATELIER_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so they never interleave with the transcript.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("atelier_cli={level},atelier_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn write_out(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config_path = args.config.clone().or_else(atelier_core::default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    ConfigOverrides {
        api_url: args.api_url.clone(),
        state_dir: args.state_dir.clone(),
        instant_drip: args.instant,
    }
    .apply(&mut config)
    .context("Invalid command-line override")?;

    info!(
        api_url = %config.api_url,
        state_dir = %config.state_dir.display(),
        source = ?config.source(),
        "Atelier starting"
    );

    let backend = Arc::new(
        HttpChatBackend::new(&config.api_url, config.request_timeout)
            .context("Failed to build HTTP client")?,
    );
    let monitor = atelier_core::NetworkMonitor::default();
    let (mut controller, mut feeds) = SessionController::new(EngineParts {
        backend: backend.clone(),
        connector: Arc::new(WebSocketConnector::new()),
        store: Arc::new(FileStore::new(config.state_dir.clone())),
        monitor: monitor.clone(),
        settings: EngineSettings {
            api_url: config.api_url.clone(),
            progress: config.progress.clone(),
            drip: config.drip.clone(),
            draft_debounce: config.draft_debounce,
        },
    });

    let shutdown = CancellationToken::new();
    let probe = tokio::spawn(probe_health(
        backend,
        monitor.clone(),
        config.health_interval,
        shutdown.clone(),
    ));
    let mut online = monitor.subscribe();

    let session = args.session.map_or_else(SessionId::new, SessionId::from);
    controller.activate_session(session).await;

    let mut renderer = Renderer::new(args.verbose);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            Some(update) = feeds.updates.recv() => {
                if let Some(text) = renderer.render(&update) {
                    write_out(&text);
                }
            }
            Some(notice) = feeds.notices.recv() => {
                controller.handle_progress_notice(notice);
            }
            Ok(()) = online.changed() => {
                let is_online = *online.borrow_and_update();
                if is_online {
                    if let Err(e) = controller.set_online(true).await {
                        warn!(error = %e, "Failed to restore offline queue");
                    }
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_line(&mut controller, &line).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        // Let a piped request finish before exiting
                        stdin_open = false;
                        controller.wait_idle().await;
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    // Flush whatever the last request rendered
    while let Ok(update) = feeds.updates.try_recv() {
        if let Some(text) = renderer.render(&update) {
            write_out(&text);
        }
    }

    shutdown.cancel();
    let _ = probe.await;
    controller.shutdown().await;
    Ok(())
}

/// Apply one input line; returns `false` to quit
async fn handle_line(controller: &mut SessionController, line: &str) -> bool {
    let command = match command::parse(line) {
        None => return true,
        Some(Ok(command)) => command,
        Some(Err(e)) => {
            write_out(&format!("-- {e}\n"));
            return true;
        }
    };

    match command {
        Command::Say(text) => {
            if controller.is_busy() {
                // Keep the draft; the controller reports the busy state
                let _ = controller.submit();
                return true;
            }
            controller.set_draft(text);
            submit(controller);
        }
        Command::Send => submit(controller),
        Command::Session(id) => {
            let session = id.map_or_else(SessionId::new, SessionId::from);
            controller.activate_session(session).await;
        }
        Command::Stop => controller.stop(),
        Command::Video(url) => controller.set_video(url),
        Command::Audio { url, label } => controller.set_audio(url, label),
        Command::Image(path) => match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let name = path
                    .file_name()
                    .map_or_else(|| "image".to_string(), |n| n.to_string_lossy().into_owned());
                controller.attach_image(ImageAttachment::new(name, bytes));
                write_out(&format!(
                    "-- {} image(s) attached\n",
                    controller.attached_images()
                ));
            }
            Err(e) => write_out(&format!("-- cannot read {}: {e}\n", path.display())),
        },
        Command::Draft => {
            let compose = controller.compose();
            write_out(&format!("-- draft: {}\n", compose.draft_text));
        }
        Command::Offline => {
            let _ = controller.set_online(false).await;
        }
        Command::Online => {
            if let Err(e) = controller.set_online(true).await {
                write_out(&format!("-- {e}\n"));
            }
        }
        Command::Help => write_out(&format!("{HELP}\n")),
        Command::Quit => return false,
    }
    true
}

fn submit(controller: &mut SessionController) {
    match controller.submit() {
        Ok(()) | Err(SubmitError::Busy) => {}
        Err(e) => write_out(&format!("-- {e}\n")),
    }
}
