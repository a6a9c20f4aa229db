//! Checksum-verified single-file transfer over one TCP connection.
//!
//! This module provides:
//! - A framed message channel sharing its stream with raw bulk bytes
//! - A streaming checksum copier with a fixed-size buffer
//! - A best-effort free-space guard
//! - The client PUT/GET state machine and the server dispatch loop

pub mod channel;
pub mod checksum;
pub mod client;
pub mod constants;
pub mod disk;
pub mod protocol;
pub mod server;
pub mod utils;

// Re-export public API
pub use channel::MessageChannel;
pub use checksum::{Checksum, ChecksumCopier, verify_checksum};
pub use client::{Client, GetOutcome, PutOutcome};
pub use constants::{BUFFER_SIZE, TRANSFER_PORT};
pub use disk::{FixedSpaceProbe, FsSpaceProbe, SpaceProbe, has_space};
pub use protocol::{Envelope, Response};
pub use server::{ServerConfig, handle_connection, run_server};
