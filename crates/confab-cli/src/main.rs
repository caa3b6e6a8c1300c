//! confab terminal client — drives one voice/text session from stdin.
//!
//! Starts a session against the configured gateway, prints transcript
//! turns as they arrive, and accepts slash commands for microphone and
//! avatar control. Shuts down gracefully on SIGTERM/SIGINT with explicit
//! capture stop, avatar disconnect, and channel close.

mod config;

use confab_session::{AgentProfile, ApiClient, Role, Session, SessionEvent};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CONFAB_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("confab.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the client cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let profile = AgentProfile::new(
        &config.agent.agent_id,
        &config.agent.model,
        &config.agent.instructions,
    );
    let api = ApiClient::new(&config.gateway.base_url)
        .expect("failed to build http client — check gateway.base_url in config");

    let builder = Session::builder(profile, api);
    #[cfg(feature = "device-capture")]
    let builder = builder.capture_source(Box::new(confab_media::DeviceCaptureSource::new()));
    let session = Arc::new(builder.build());

    let printer = tokio::spawn(print_events(session.subscribe()));

    let session_id = match session.start().await {
        Ok(id) => id,
        Err(err) => {
            tracing::error!(error = %err, "failed to start session");
            eprintln!("could not start a session: {err}");
            printer.abort();
            return;
        }
    };
    println!("session {session_id} connected to {}", config.gateway.base_url);
    println!("type a message and press enter, or: /mic on|off, /avatar on|off, /history, /clear, /quit");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if handle_command(&session, line.trim()).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "stdin read failed");
                    break;
                }
            },
            () = &mut shutdown => break,
        }
    }

    // Explicit teardown order: channel close does not cascade into the
    // capture pipeline or the avatar connection.
    session.stop_capture().await;
    session.disconnect_avatar().await;
    session.close().await;
    printer.abort();
    println!("session ended");
}

/// Handles one line of input. Returns true when the client should quit.
async fn handle_command(session: &Session, line: &str) -> bool {
    match line {
        "" => {}
        "/quit" | "q" => return true,
        "/mic on" => {
            if let Err(err) = session.start_capture().await {
                eprintln!("microphone unavailable: {err}");
            } else {
                println!("microphone live — /mic off commits the utterance");
            }
        }
        "/mic off" => session.stop_capture().await,
        "/avatar on" => {
            if let Err(err) = session.connect_avatar().await {
                eprintln!("avatar connect failed: {err}");
            }
        }
        "/avatar off" => session.disconnect_avatar().await,
        "/history" => {
            for turn in session.history().await {
                println!("{} {}", role_label(turn.role), turn.text);
            }
        }
        "/clear" => {
            session.clear_history().await;
            println!("history cleared");
        }
        text => {
            if let Err(err) = session.send_text(text).await {
                eprintln!("could not send message: {err}");
            }
        }
    }
    false
}

/// Renders session notifications to the terminal until the stream closes.
async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => render_event(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event printer lagged behind the session");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn render_event(event: SessionEvent) {
    match event {
        SessionEvent::TurnCompleted(turn) => {
            // Overwrite any partially streamed line before the final text.
            print!("\r\x1b[K");
            println!("{} {}", role_label(turn.role), turn.text);
        }
        SessionEvent::StreamingUpdated { text } => {
            print!("\r\x1b[K[assistant] {text}");
            let _ = io::stdout().flush();
        }
        SessionEvent::StreamingCleared => {}
        SessionEvent::ChannelState(state) => {
            tracing::info!(state = ?state, "channel state changed");
        }
        SessionEvent::AvatarState(state) => {
            println!("avatar: {state:?}");
        }
        SessionEvent::ServerError { detail } => {
            eprintln!("server error: {detail}");
        }
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "[you]",
        Role::Assistant => "[assistant]",
    }
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, shutting down"); }
        () = terminate => { tracing::info!("received SIGTERM, shutting down"); }
    }
}
