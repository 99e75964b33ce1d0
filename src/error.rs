//! Core error taxonomy (§7). Protocol-level retries never surface as
//! errors — only the terminal outcomes listed here propagate to the
//! session driver, which performs the associated cleanup action.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("file not found")]
    FileNotFound,

    #[error("insufficient disk space for incoming file")]
    InsufficientSpace,

    #[error("integrity digest mismatch after transfer")]
    InvalidHash,

    #[error("connection aborted: {0}")]
    ConnectionAborted(&'static str),

    #[error("malformed frame")]
    MalformedFrame,

    #[error("transfer cancelled by user")]
    UserInterrupt,

    #[error("peer reported an error (sub-code {0:?})")]
    PeerError(Option<u8>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError {
    /// Exit code convention documented in SPEC_FULL.md §6 CLI surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProtocolError::FileNotFound => 1,
            ProtocolError::InsufficientSpace => 2,
            ProtocolError::InvalidHash => 3,
            ProtocolError::ConnectionAborted(_) => 4,
            ProtocolError::UserInterrupt => 5,
            ProtocolError::MalformedFrame | ProtocolError::PeerError(_) | ProtocolError::Io(_) => 70,
        }
    }
}
