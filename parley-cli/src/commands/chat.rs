//! Interactive conversation.
//!
//! Lines are sent as user messages; lines starting with `/` are commands.
//! Finalized messages from the other side are printed by a background task,
//! in history order, whichever mode produced them.

use anyhow::Result;
use futures::StreamExt;
use parley_client::{ConversationConfig, MessageStream, SendReceipt};
use parley_core::{ConversationEvent, ConversationMode};
use parley_types::{Message, Role};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::Session;

/// One line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Text to send.
    Say(String),
    /// Switch modes.
    Switch(ConversationMode),
    /// Print the history.
    History,
    /// Cut the assistant off.
    Interrupt,
    /// End the user's turn.
    EndTurn,
    /// Mute or unmute capture.
    Mute(bool),
    /// Forget the history.
    Clear,
    /// Print the command list.
    Help,
    /// Leave.
    Quit,
    /// Blank line.
    Empty,
    /// A `/` command we don't know.
    Unknown(String),
}

/// Parse one line of input.
pub fn parse_line(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Say(line.to_string());
    };
    match command.trim() {
        "audio" => Input::Switch(ConversationMode::Audio),
        "text" => Input::Switch(ConversationMode::Text),
        "history" => Input::History,
        "interrupt" => Input::Interrupt,
        "end" => Input::EndTurn,
        "mute" => Input::Mute(true),
        "unmute" => Input::Mute(false),
        "clear" => Input::Clear,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => Input::Unknown(other.to_string()),
    }
}

const HELP: &str = "\
Commands:
  /audio      switch to audio mode
  /text       switch to text mode
  /history    print the conversation so far
  /interrupt  stop the assistant (audio)
  /end        end your turn (audio, manual turns)
  /mute       mute the microphone (audio)
  /unmute     unmute the microphone (audio)
  /clear      forget the conversation
  /quit       leave";

/// Run the REPL until `/quit` or end of input.
pub async fn run(config: ConversationConfig, mock: bool) -> Result<()> {
    let session = Session::start(config, mock).await?;
    let chat = &session.chat;
    println!(
        "Conversation {} ({} mode). Type /help for commands.",
        chat.id(),
        chat.mode()
    );

    let mut printer = spawn_printer(chat.subscribe_messages().await);
    let notices = tokio::spawn(log_events(chat.events()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let result = match parse_line(&line) {
            Input::Empty => Ok(()),
            Input::Quit => break,
            Input::Help => {
                println!("{HELP}");
                Ok(())
            }
            Input::Unknown(command) => {
                println!("Unknown command /{command}. Type /help for commands.");
                Ok(())
            }
            Input::Say(text) => session.send(&text).await.map(|receipt| match receipt {
                SendReceipt::Queued(id) => tracing::debug!("Queued {}", id),
                SendReceipt::ReplyNotRequested { reason, .. } => {
                    println!("Message kept, but no reply was requested: {reason}")
                }
                SendReceipt::Replied(_) => {}
            }),
            Input::Switch(mode) => chat.switch_mode(mode).await.map_err(Into::into),
            Input::History => {
                for message in chat.messages().await {
                    print_message(&message);
                }
                Ok(())
            }
            Input::Interrupt => chat.interrupt().await.map_err(Into::into),
            Input::EndTurn => chat.end_user_turn().await.map_err(Into::into),
            Input::Mute(muted) => chat.set_muted(muted).await.map_err(Into::into),
            Input::Clear => {
                chat.clear_history().await;
                printer.abort();
                printer = spawn_printer(chat.subscribe_messages().await);
                println!("History cleared.");
                Ok(())
            }
        };
        if let Err(e) = result {
            println!("error: {e:#}");
        }
    }

    printer.abort();
    notices.abort();
    chat.shutdown().await;
    Ok(())
}

fn spawn_printer(mut messages: MessageStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = messages.next().await {
            if message.role != Role::User {
                print_message(&message);
            }
        }
    })
}

fn print_message(message: &Message) {
    println!("{}> {}", message.role, message.text_or_empty());
}

async fn log_events(mut events: broadcast::Receiver<ConversationEvent>) {
    loop {
        match events.recv().await {
            Ok(ConversationEvent::ModeSwitched { to, .. }) => tracing::info!("Now in {} mode", to),
            Ok(ConversationEvent::ConnectionStatusChanged { connected: false }) => {
                tracing::warn!("Connection lost")
            }
            Ok(ConversationEvent::Error { message }) => tracing::warn!("{}", message),
            Ok(ConversationEvent::TranscriptFailed { id }) => {
                tracing::warn!("No transcript for {}", id)
            }
            Ok(event) => tracing::debug!("{:?}", event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!("Skipped {} events", n)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_sent() {
        assert_eq!(parse_line("  hello there "), Input::Say("hello there".into()));
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse_line("   "), Input::Empty);
    }

    #[test]
    fn slash_commands_are_recognized() {
        assert_eq!(parse_line("/audio"), Input::Switch(ConversationMode::Audio));
        assert_eq!(parse_line("/text"), Input::Switch(ConversationMode::Text));
        assert_eq!(parse_line("/mute"), Input::Mute(true));
        assert_eq!(parse_line("/unmute"), Input::Mute(false));
        assert_eq!(parse_line("/exit"), Input::Quit);
        assert_eq!(parse_line("/end"), Input::EndTurn);
    }

    #[test]
    fn unknown_commands_are_reported() {
        assert_eq!(parse_line("/dance"), Input::Unknown("dance".into()));
    }
}
