//! Error types shared by the channel, client and server.

use std::io;

/// Errors produced by the framed message channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode envelope: {0}")]
    Encode(bincode::Error),

    #[error("failed to decode envelope: {0}")]
    Decode(bincode::Error),

    #[error("Message too large: {len} bytes (max {max})")]
    FrameTooLarge { len: u64, max: usize },

    #[error("connection closed by peer")]
    Closed,
}

/// Errors produced while driving a PUT or GET exchange.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer answered with a negative response.
    #[error("rejected by peer: {0}")]
    Rejected(String),

    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("not enough disk space: need {needed} bytes, have {available}")]
    InsufficientSpace { needed: u64, available: u64 },

    #[error("stream ended early: copied {copied}/{expected} bytes")]
    ShortCopy { expected: u64, copied: u64 },

    #[error("unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },

    /// A previous exchange was abandoned mid-protocol; the stream position is unknown.
    #[error("connection is out of sync after an aborted transfer")]
    ConnectionPoisoned,
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;
