use serde::{Deserialize, Serialize};

/// Generic acknowledgment carried by several envelopes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    /// Human-readable, for diagnostics only
    pub message: String,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Every message exchanged between client and server.
///
/// Adding a variant changes the wire format; bump `PROTOCOL_VERSION` with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    /// PUT announcement. Exactly `size` raw bytes follow once the server answers ready.
    StorageRequest { file_name: String, size: u64 },
    /// GET request
    RetrievalRequest { file_name: String },
    Response(Response),
    /// GET acceptance. Exactly `size` raw bytes follow when `response.ok`.
    RetrievalResponse { response: Response, size: u64 },
    /// Digest computed by whichever side sent the preceding bulk bytes
    ChecksumVerification { checksum: Vec<u8> },
}

impl Envelope {
    /// Variant name, for logs and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::StorageRequest { .. } => "StorageRequest",
            Envelope::RetrievalRequest { .. } => "RetrievalRequest",
            Envelope::Response(_) => "Response",
            Envelope::RetrievalResponse { .. } => "RetrievalResponse",
            Envelope::ChecksumVerification { .. } => "ChecksumVerification",
        }
    }
}
