/// Default TCP port for the transfer server
pub const TRANSFER_PORT: u16 = 9000;

/// Buffer size for the framed channel and bulk copies (1MB)
pub const BUFFER_SIZE: usize = 1024 * 1024;

/// Length of the frame prefix (u64, little-endian)
pub const FRAME_HEADER_LEN: usize = 8;

/// Maximum size of a single framed envelope (64KB).
/// Envelopes only carry control data; file content never goes through a frame.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Maximum allowed filename length in bytes
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Wire protocol revision. Bump together with any new `Envelope` variant.
pub const PROTOCOL_VERSION: u32 = 1;
