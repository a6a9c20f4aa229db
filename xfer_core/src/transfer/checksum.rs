use blake3::Hasher;
use std::fmt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::constants::BUFFER_SIZE;
use crate::error::{Result, TransferError};

/// Length of a BLAKE3 digest in bytes
pub const CHECKSUM_LEN: usize = blake3::OUT_LEN;

/// Integrity digest of transferred content
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; CHECKSUM_LEN]);

impl Checksum {
    pub fn as_bytes(&self) -> &[u8; CHECKSUM_LEN] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<blake3::Hash> for Checksum {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Copies an exact byte count between streams while hashing it.
///
/// The buffer is allocated once and reused for every copy, so memory use
/// does not depend on file size.
pub struct ChecksumCopier {
    buffer: Vec<u8>,
}

impl Default for ChecksumCopier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChecksumCopier {
    pub fn new() -> Self {
        Self::with_buffer_size(BUFFER_SIZE)
    }

    pub fn with_buffer_size(size: usize) -> Self {
        Self {
            buffer: vec![0u8; size.max(1)],
        }
    }

    /// Copy exactly `len` bytes from `src` to `dst`, returning the digest of those bytes.
    ///
    /// `dst` is not flushed. EOF on `src` before `len` bytes is `TransferError::ShortCopy`.
    pub async fn copy<R, W>(&mut self, src: &mut R, dst: &mut W, len: u64) -> Result<Checksum>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut hasher = Hasher::new();
        let mut remaining = len;

        while remaining > 0 {
            let to_read = remaining.min(self.buffer.len() as u64) as usize;
            let n = src.read(&mut self.buffer[..to_read]).await?;
            if n == 0 {
                return Err(TransferError::ShortCopy {
                    expected: len,
                    copied: len - remaining,
                });
            }
            hasher.update(&self.buffer[..n]);
            dst.write_all(&self.buffer[..n]).await?;
            remaining -= n as u64;
        }

        Ok(hasher.finalize().into())
    }
}

/// Compare the sender's declared digest with the locally computed one
pub fn verify_checksum(source: &[u8], received: &Checksum) -> bool {
    debug!("Source checksum:   {}", hex::encode(source));
    debug!("Received checksum: {}", received);
    let matches = source == received.as_bytes().as_slice();
    if !matches {
        warn!(
            "Checksums DO NOT match: source {}, received {}",
            hex::encode(source),
            received
        );
    }
    matches
}

/// Compute the digest of a whole file
pub async fn checksum_file(path: &Path) -> Result<Checksum> {
    let mut file = File::open(path).await?;
    let mut hasher = Hasher::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize().into())
}

/// Digest of an in-memory buffer
pub fn checksum_bytes(data: &[u8]) -> Checksum {
    blake3::hash(data).into()
}
