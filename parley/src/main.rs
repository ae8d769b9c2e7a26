//! Parley: terminal chat client.
//!
//! Reads lines from stdin and prints the conversation as it changes.
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/parley/config.toml`).
//!
//! ```bash
//! # Connect to a local server
//! cargo run --bin parley
//!
//! # Open an existing conversation on another server
//! cargo run --bin parley -- --server-url http://chat.example.com --conversation 4
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use parley::api::http::HttpChatApi;
use parley::config::{CliArgs, ClientConfig};
use parley::session::ChatSession;
use parley::sync::{PollOutcome, SendError, SendOutcome};
use parley::ui::{Command, HELP, Transcript, format_conversation};

/// Conversations shown by `/list`.
const LIST_PAGE: usize = 20;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file; stdout belongs to the transcript.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(server_url = %config.server_url, "parley starting");

    let api = match HttpChatApi::new(&config.server_url, config.request_timeout) {
        Ok(api) => api,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let session = Arc::new(ChatSession::new(api, &config.session_settings()));

    if let Some(id) = cli.conversation {
        match session.open_conversation(id).await {
            Ok(conversation) => println!("opened {}", describe(&conversation)),
            Err(e) => eprintln!("could not open conversation {id}: {e}"),
        }
    } else {
        println!("no conversation open; /new to start one, /help for commands");
    }

    let renderer = tokio::spawn(render_loop(
        Arc::clone(&session),
        Transcript::new(config.timestamp_format.clone(), config.show_status),
    ));

    run_input(&session, &config).await;

    session.close();
    renderer.abort();
    tracing::info!("parley exiting");
    ExitCode::SUCCESS
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("parley.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Prints new transcript lines whenever the session publishes a version.
async fn render_loop(session: Arc<ChatSession<HttpChatApi>>, mut transcript: Transcript) {
    let mut versions = session.subscribe();
    loop {
        for line in transcript.render(&session.snapshot()) {
            println!("{line}");
        }
        if versions.changed().await.is_err() {
            break;
        }
    }
}

/// Reads commands from stdin until `/quit` or end of input.
async fn run_input(session: &Arc<ChatSession<HttpChatApi>>, config: &ClientConfig) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        let Some(command) = Command::parse(&line) else {
            continue;
        };

        match command {
            Command::Send(text) => send(session, &text),
            Command::New(title) => match session.start_conversation(title.as_deref()).await {
                Ok(conversation) => println!("created {}", describe(&conversation)),
                Err(e) => eprintln!("could not create conversation: {e}"),
            },
            Command::List => match session.list_conversations(LIST_PAGE, 0).await {
                Ok(page) if page.results.is_empty() => println!("no conversations yet"),
                Ok(page) => {
                    for conversation in &page.results {
                        println!("{}", format_conversation(conversation, &config.timestamp_format));
                    }
                    if page.count > page.results.len() {
                        println!("({} of {})", page.results.len(), page.count);
                    }
                }
                Err(e) => eprintln!("could not list conversations: {e}"),
            },
            Command::Title(title) => match session.rename_conversation(title.as_deref()).await {
                Ok(Some(conversation)) => println!("renamed {}", describe(&conversation)),
                Ok(None) => eprintln!("no conversation open"),
                Err(e) => eprintln!("could not rename conversation: {e}"),
            },
            Command::Open(id) => match session.open_conversation(id).await {
                Ok(conversation) => println!("opened {}", describe(&conversation)),
                Err(e) => eprintln!("could not open conversation {id}: {e}"),
            },
            Command::Refresh => match session.refresh().await {
                PollOutcome::Idle => println!("no conversation open"),
                PollOutcome::Failed => eprintln!("refresh failed; will retry on the next poll"),
                PollOutcome::Applied(_) | PollOutcome::Skipped => {}
            },
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
            Command::Invalid(reason) => eprintln!("{reason}"),
        }
    }
}

/// Shows `text` as pending right away and delivers it in the background.
fn send(session: &ChatSession<HttpChatApi>, text: &str) {
    let handle = match session.submit(text) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("not sent: {e}");
            return;
        }
    };
    tokio::spawn(async move {
        match handle.deliver().await {
            Ok(SendOutcome::Delivered { .. } | SendOutcome::Discarded) => {}
            Err(SendError::Api(e)) => eprintln!("send failed: {e}"),
            Err(e) => eprintln!("not sent: {e}"),
        }
    });
}

fn describe(conversation: &parley_proto::conversation::Conversation) -> String {
    let title = conversation.title.as_deref().unwrap_or("(untitled)");
    format!("conversation #{}: {title}", conversation.id)
}
