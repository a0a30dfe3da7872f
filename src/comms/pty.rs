//! PTY (console) channel: reads lines from stdin, prints replies to stdout.
//!
//! Console commands:
//!
//! ```text
//! [VOICE] <text>            mark the message as voice-transcribed
//! /image <path|url> <text>  attach an image to the message
//! /clear                    forget the conversation so far
//! /help                     show this list
//! /quit                     leave the console
//! ```
//!
//! Runs until the `shutdown` token is cancelled (Ctrl-C) or stdin closes.

use std::io::Write as _;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::CommsState;
use crate::error::AppError;
use crate::runtime::{Component, ComponentFuture};
use crate::triage::utterance::{Exchange, ImageRef, Utterance};

const HELP: &str = "\
Describe your symptoms and press Enter.
  [VOICE] <text>            treat the message as voice-transcribed
  /image <path|url> <text>  attach an image (file path or http(s) URL)
  /clear                    start a new conversation
  /help                     show this help
  /quit                     exit";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Message(Utterance),
    Clear,
    Help,
    Quit,
    /// A command that could not be parsed; carries the usage hint.
    Invalid(String),
}

pub fn parse_line(line: &str) -> ConsoleInput {
    let line = line.trim();
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (line, ""),
    };
    match command {
        "/clear" => ConsoleInput::Clear,
        "/help" => ConsoleInput::Help,
        "/quit" | "/exit" => ConsoleInput::Quit,
        "/image" => {
            if rest.is_empty() {
                return ConsoleInput::Invalid("usage: /image <path|url> <description>".into());
            }
            let (image, text) = match rest.split_once(char::is_whitespace) {
                Some((image, text)) => (image, text),
                None => (rest, ""),
            };
            ConsoleInput::Message(Utterance::new(text).with_image(ImageRef::parse(image)))
        }
        cmd if cmd.starts_with('/') => ConsoleInput::Invalid(format!("unknown command {cmd}, try /help")),
        _ => ConsoleInput::Message(Utterance::new(line)),
    }
}

/// Append `exchange`, keeping only the most recent `window` entries.
pub fn remember(history: &mut Vec<Exchange>, exchange: Exchange, window: usize) {
    history.push(exchange);
    let excess = history.len().saturating_sub(window);
    history.drain(..excess);
}

pub struct PtyChannel {
    channel_id: String,
    state: Arc<CommsState>,
}

impl PtyChannel {
    pub fn new(channel_id: impl Into<String>, state: Arc<CommsState>) -> Self {
        Self { channel_id: channel_id.into(), state }
    }
}

impl Component for PtyChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_pty(self.channel_id, self.state, shutdown))
    }
}

async fn run_pty(
    channel_id: String,
    state: Arc<CommsState>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    info!(%channel_id, "pty channel started");
    println!("─────────────────────────────────────────");
    println!(" Symptom triage console  (/help, Ctrl-C to quit)");
    println!(" This assistant does not replace a doctor.");
    println!("─────────────────────────────────────────");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let window = state.context().dispatcher.history_turns();
    let mut history: Vec<Exchange> = Vec::with_capacity(window + 1);

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                println!("\n[pty] shutdown signal received, closing console");
                info!("pty channel shutting down");
                break;
            }

            line = lines.next_line() => {
                let input = match line {
                    Err(e) => {
                        warn!("pty read error: {e}");
                        break;
                    }
                    Ok(None) => {
                        info!("pty stdin closed");
                        break;
                    }
                    Ok(Some(input)) if input.trim().is_empty() => continue,
                    Ok(Some(input)) => input,
                };

                debug!(input = %input, "pty received line");
                match parse_line(&input) {
                    ConsoleInput::Help => println!("{HELP}"),
                    ConsoleInput::Invalid(hint) => println!("{hint}"),
                    ConsoleInput::Clear => {
                        history.clear();
                        println!("(conversation cleared)");
                    }
                    ConsoleInput::Quit => {
                        shutdown.cancel();
                        break;
                    }
                    ConsoleInput::Message(utterance) => {
                        let reply = state.handle_turn(&channel_id, &utterance, &history).await;
                        println!("{}", reply.text);
                        if reply.emergency {
                            println!("!! Seek medical attention promptly.");
                        }
                        let exchange = Exchange {
                            user: utterance.text().to_string(),
                            assistant: reply.text,
                        };
                        remember(&mut history, exchange, window);
                    }
                }
            }
        }
    }

    Ok(())
}
