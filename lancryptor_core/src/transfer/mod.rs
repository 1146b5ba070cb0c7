//! Encrypted single-file transfer over TCP.
//!
//! This module provides:
//! - Wire framing for the handshake and the transfer envelope
//! - The sending side: fetch the peer key, wait for approval, stream ciphertext
//! - The receiving side: serve our key, ask a human, decrypt, verify, extract
//! - An accept loop that runs one handler task per inbound connection

pub mod codec;
pub mod constants;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod utils;

use std::path::PathBuf;

// Re-export public API
pub use constants::TRANSFER_PORT;
pub use receiver::handle_connection;
pub use sender::{SendContext, parse_target, send_and_report, send_file};
pub use server::{Acceptor, ReceiverContext, ReceiverHandle};

/// How a send ended when nothing went wrong at the I/O or crypto level
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent,
    RejectedByPeer,
    Cancelled,
}

impl SendOutcome {
    pub fn status_message(&self) -> String {
        match self {
            SendOutcome::Sent => "File sent successfully".to_string(),
            SendOutcome::RejectedByPeer => "Receiver rejected the connection.".to_string(),
            SendOutcome::Cancelled => "Transfer stopped by user.".to_string(),
        }
    }
}

/// How one inbound connection ended
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveOutcome {
    Received { file_name: String, path: PathBuf },
    Rejected,
    /// Wrong or missing handshake token; nothing was sent back
    ProtocolMismatch,
    IntegrityFailed,
    Cancelled,
}

impl ReceiveOutcome {
    /// Status line for the user, or `None` for outcomes that are only logged
    pub fn status_message(&self) -> Option<String> {
        match self {
            ReceiveOutcome::Received { file_name, .. } => {
                Some(format!("File received: {}", file_name))
            }
            ReceiveOutcome::Rejected => Some("Connection rejected by user.".to_string()),
            ReceiveOutcome::ProtocolMismatch => None,
            ReceiveOutcome::IntegrityFailed => Some("File integrity check failed!".to_string()),
            ReceiveOutcome::Cancelled => Some("Transfer stopped by user.".to_string()),
        }
    }
}
