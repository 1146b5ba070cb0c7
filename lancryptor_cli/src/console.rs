//! Terminal rendering of core events and parsing of typed input.

use lancryptor_core::confirm::ConfirmationRequest;
use lancryptor_core::{AppCommand, AppEvent};
use std::collections::VecDeque;
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use tokio::sync::mpsc;

/// Print one event as `[TAG] message`
pub fn print_event(tag: &str, event: &AppEvent) {
    match event {
        AppEvent::Status(msg) => println!("[{}] {}", tag, msg),
        AppEvent::Error(msg) => eprintln!("[{}] {}", tag, msg),
        AppEvent::TransferProgress {
            progress,
            speed,
            is_sending,
            ..
        } => println!("{}", progress_line(*progress, speed, *is_sending)),
        AppEvent::ConfirmationRequested(request) => print_prompt(request),
        AppEvent::TransferCompleted(name) => tracing::debug!("Transfer of {} completed", name),
        AppEvent::ReceiverStarted { port } => tracing::debug!("Receiver started on port {}", port),
        AppEvent::ReceiverStopped => tracing::debug!("Receiver stopped"),
    }
}

pub fn progress_line(progress: f32, speed: &str, is_sending: bool) -> String {
    let tag = if is_sending { "SEND" } else { "RECV" };
    format!("[{}] Progress: {:.2}% ({})", tag, progress, speed)
}

pub fn print_prompt(request: &ConfirmationRequest) {
    println!();
    println!("Incoming connection request from {}.", request.peer);
    println!("Receiver public key hash (compare with the sender's screen):");
    println!("  {}", request.fingerprint);
    println!("Accept connection? [y/n]: ");
}

/// `y`/`yes` or `n`/`no`, case-insensitive
pub fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Confirmation requests in arrival order; the terminal answers the oldest first
#[derive(Default)]
pub struct PromptQueue {
    pending: VecDeque<ConfirmationRequest>,
}

impl PromptQueue {
    /// Queue a request, printing its prompt if nothing else is being asked
    pub fn push(&mut self, request: ConfirmationRequest) {
        if self.pending.is_empty() {
            print_prompt(&request);
        } else {
            println!(
                "[RECV] Another connection from {} is waiting for confirmation.",
                request.peer
            );
        }
        self.pending.push_back(request);
    }

    /// Take the request the current answer belongs to, and show the next prompt
    pub fn answer(&mut self) -> Option<ConfirmationRequest> {
        let answered = self.pending.pop_front()?;
        if let Some(next) = self.pending.front() {
            print_prompt(next);
        }
        Some(answered)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop every queued request; the receiver withdraws them when it stops.
    /// Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

/// Forward stdin lines into a channel so they can be `select!`ed against events.
///
/// Reads on a plain OS thread: a blocked stdin read would otherwise hold up
/// runtime shutdown until the user presses enter.
pub fn spawn_stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// One line typed in interactive mode
#[derive(Debug, PartialEq)]
pub enum Input {
    Command(AppCommand),
    Answer(bool),
    Help,
    Quit,
    Empty,
}

pub const HELP: &str = "\
Commands:
  send <ip[:port]> <file>   send a file
  receive                   start listening for files
  stop                      stop listening
  cancel                    abort sends in progress
  y / n                     answer the oldest confirmation request
  help                      show this text
  quit                      exit";

pub fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    if let Some(accepted) = parse_answer(line) {
        return Ok(Input::Answer(accepted));
    }

    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    match word.to_ascii_lowercase().as_str() {
        "send" => {
            let rest = rest.trim();
            let (ip, file) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: send <ip[:port]> <file>".to_string())?;
            let file = file.trim().trim_matches('"');
            if file.is_empty() {
                return Err("usage: send <ip[:port]> <file>".to_string());
            }
            Ok(Input::Command(AppCommand::SendFile {
                target_ip: ip.to_string(),
                file: PathBuf::from(file),
            }))
        }
        "receive" => Ok(Input::Command(AppCommand::StartReceiver)),
        "stop" => Ok(Input::Command(AppCommand::StopReceiver)),
        "cancel" => Ok(Input::Command(AppCommand::CancelTransfer)),
        "help" | "?" => Ok(Input::Help),
        "quit" | "exit" | "q" => Ok(Input::Quit),
        other => Err(format!("unknown command '{}', type 'help'", other)),
    }
}
