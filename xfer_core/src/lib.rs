use std::net::SocketAddr;

pub mod config;
pub mod error;
pub mod transfer;

pub use error::{ChannelError, TransferError};

/// Report from the server to whoever is watching it (CLI log, tests)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    ConnectionAccepted {
        peer: SocketAddr,
    },
    ConnectionClosed {
        peer: SocketAddr,
    },

    /// A PUT ran to completion. `verified == false` means the file was deleted.
    StorageCompleted {
        file_name: String,
        size: u64,
        verified: bool,
    },
    /// A PUT was refused before any file content was read
    StorageRejected {
        file_name: String,
        reason: String,
    },

    RetrievalCompleted {
        file_name: String,
        size: u64,
    },
    RetrievalRejected {
        file_name: String,
        reason: String,
    },

    Error(String),
}
