use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a single send or a single inbound connection.
///
/// Expected protocol outcomes (peer rejected, integrity mismatch, stop requested)
/// are not errors; see [`crate::transfer::SendOutcome`] and
/// [`crate::transfer::ReceiveOutcome`].
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("key file missing: {}", .0.display())]
    KeyFileMissing(PathBuf),

    #[error("key file malformed: {}: {}", .0.display(), .1)]
    KeyFileMalformed(PathBuf, String),

    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    #[error("timed out while {0}")]
    Timeout(&'static str),

    #[error("connection lost")]
    ConnectionLost,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// The one-line status shown to the user when a transfer ends with this error.
    pub fn user_message(&self) -> String {
        match self {
            TransferError::FileNotFound(_) => "❌ File not found".to_string(),
            TransferError::KeyFileMissing(_) => "❌ Key file not found".to_string(),
            TransferError::KeyFileMalformed(path, _) => {
                format!("❌ Key file is corrupted: {}", path.display())
            }
            TransferError::ConnectionRefused(_) => {
                "❌ Connection refused. Is receiver running?".to_string()
            }
            TransferError::Timeout(_) => "❌ Timeout. No response from peer.".to_string(),
            TransferError::ConnectionLost => "❌ Connection error: connection lost".to_string(),
            TransferError::Integrity(_) => "File integrity check failed!".to_string(),
            other => format!("❌ Unexpected error: {}", other),
        }
    }
}

impl From<zip::result::ZipError> for TransferError {
    fn from(e: zip::result::ZipError) -> Self {
        TransferError::Archive(e.to_string())
    }
}

impl From<rsa::Error> for TransferError {
    fn from(e: rsa::Error) -> Self {
        TransferError::Crypto(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
