#![deny(clippy::all)]

mod audio;
mod backend;
mod chat;
mod error;
mod identity;
mod poller;
mod recorder;
mod session;

use chat::Feedback;
use session::{Session, SessionSnapshot};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use url::Url;

/// Application configuration
#[derive(serde::Deserialize)]
struct Config {
    backend: BackendConfig,
}

#[derive(serde::Deserialize)]
struct BackendConfig {
    url: String,
}

/// Load configuration from embedded config.toml
fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    const CONFIG_TOML: &str = include_str!("../config.toml");
    let config: Config = toml::from_str(CONFIG_TOML)?;
    Ok(config)
}

/// Resolve the backend URL: environment wins over the embedded default.
fn backend_url(config: &Config) -> Result<Url, url::ParseError> {
    let raw = std::env::var("VIDQA_BACKEND_URL").unwrap_or_else(|_| config.backend.url.clone());
    Url::parse(&raw)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for structured logging
    tracing_subscriber::fmt::init();

    // A .env file may carry VIDQA_BACKEND_URL
    dotenvy::dotenv().ok();

    let config = load_config()?;
    let url = backend_url(&config)?;
    info!("Using backend at {}", url);

    let client_id = identity::client_id()?.to_string();
    info!("Client id: {}", client_id);

    let backend = Arc::new(backend::HttpBackend::new(&url)?);
    let mut session = Session::new(backend, client_id);

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !run_command(&mut session, line.trim()).await {
                    break;
                }
            }
            event = session.next_event() => {
                session.handle_event(event).await;
                render(&session.snapshot());
            }
        }
    }

    Ok(())
}

/// Execute one input line. Returns false when the user quits.
async fn run_command(session: &mut Session, line: &str) -> bool {
    let (command, rest) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "/quit" => return false,
        "/help" => print_help(),
        "/show" => render(&session.snapshot()),
        "/transcript" => match session.snapshot().transcription {
            Some(text) => println!("{}", text),
            None => println!("No transcript yet."),
        },
        "/ask" => {
            if rest.is_empty() {
                println!("Usage: /ask <question>");
            } else if let Err(e) = session.ask(rest) {
                println!("Error: {}", e);
            }
        }
        "/rec" => {
            session.start_recording();
            if session.is_recording() {
                println!("Recording... use /stop to send.");
            } else {
                render(&session.snapshot());
            }
        }
        "/stop" => {
            session.stop_recording().await;
            render(&session.snapshot());
        }
        "/edit" => match rest.split_once(' ') {
            Some((index, text)) => with_index(index, |i| session.edit_question(i, text.trim())),
            None => println!("Usage: /edit <turn> <new text>"),
        },
        "/retry" => with_index(rest, |i| session.retry_question(i)),
        "/rm" => with_index(rest, |i| session.remove_turn(i)),
        "/fb" => match rest.split_once(' ') {
            Some((index, "up")) => with_index(index, |i| session.set_feedback(i, Feedback::Positive)),
            Some((index, "down")) => {
                with_index(index, |i| session.set_feedback(i, Feedback::Negative))
            }
            _ => println!("Usage: /fb <turn> up|down"),
        },
        _ if command.starts_with('/') => println!("Unknown command; /help lists them."),
        // Anything else is a video URL
        _ => {
            session.submit_video(line).await;
            render(&session.snapshot());
        }
    }

    true
}

/// Parse a turn index and run a session operation with it.
fn with_index<F>(raw: &str, op: F)
where
    F: FnOnce(usize) -> Result<(), chat::ChatError>,
{
    match raw.parse::<usize>() {
        Ok(index) => {
            if let Err(e) = op(index) {
                println!("Error: {}", e);
            }
        }
        Err(_) => println!("Expected a turn number, got {:?}", raw),
    }
}

fn render(snapshot: &SessionSnapshot) {
    if !snapshot.status.is_empty() {
        println!("Status: {}", snapshot.status);
    }
    if let Some(summary) = &snapshot.summary {
        println!("--- Summary ---\n{}\n---------------", summary);
    }
    for (index, turn) in snapshot.turns.iter().enumerate() {
        let marker = match turn.kind {
            chat::TurnKind::Question => "you",
            chat::TurnKind::Answer => "bot",
        };
        let mut line = format!(
            "[{}] {} {} {}",
            index,
            turn.at.format("%H:%M"),
            marker,
            turn.content
        );
        if turn.error {
            line.push_str("  (failed - /retry to try again)");
        }
        if let Some(feedback) = turn.feedback {
            line.push_str(match feedback {
                Feedback::Positive => "  [+1]",
                Feedback::Negative => "  [-1]",
            });
        }
        println!("{}", line);
    }
    if snapshot.recording {
        println!("(recording)");
    }
}

fn print_help() {
    println!("Paste a video URL to transcribe it, then:");
    println!("  /ask <question>      ask about the video");
    println!("  /rec, /stop          record a voice question");
    println!("  /edit <turn> <text>  rewrite a question (discards later turns)");
    println!("  /retry <turn>        resend a question");
    println!("  /rm <turn>           delete a turn");
    println!("  /fb <turn> up|down   rate an answer");
    println!("  /show, /transcript, /help, /quit");
}
