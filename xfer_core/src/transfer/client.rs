//! Client side of the PUT/GET exchanges.
//!
//! One `Client` owns one connection and runs exchanges strictly one after
//! another. If an exchange is abandoned after the peer has started a bulk
//! phase, the stream position is unknown and the client refuses further work.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

use super::channel::MessageChannel;
use super::checksum::{Checksum, ChecksumCopier, verify_checksum};
use super::disk::{FsSpaceProbe, SpaceProbe};
use super::protocol::Envelope;
use super::utils::{bare_file_name, open_exclusive, remove_quietly};
use crate::error::{Result, TransferError};

/// Result of a successful PUT
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub file_name: String,
    pub size: u64,
    /// Digest of the bytes read from the local file
    pub checksum: Checksum,
    pub elapsed: Duration,
}

/// Result of a completed GET. `verified == false` means the digests differed;
/// the file is kept at `path` for the caller to inspect or delete.
#[derive(Debug, Clone)]
pub struct GetOutcome {
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub verified: bool,
    pub source_checksum: Vec<u8>,
    pub received_checksum: Checksum,
    pub elapsed: Duration,
}

pub struct Client<S = TcpStream> {
    channel: MessageChannel<S>,
    copier: ChecksumCopier,
    space_probe: Arc<dyn SpaceProbe>,
    poisoned: bool,
}

impl Client<TcpStream> {
    /// Connect to a transfer server
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite> Client<S> {
    pub fn new(stream: S) -> Self {
        Self {
            channel: MessageChannel::new(stream),
            copier: ChecksumCopier::new(),
            space_probe: Arc::new(FsSpaceProbe),
            poisoned: false,
        }
    }

    /// Replace the free-space source used before accepting a download
    pub fn with_space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space_probe = probe;
        self
    }

    pub fn with_copier(mut self, copier: ChecksumCopier) -> Self {
        self.copier = copier;
        self
    }

    /// False once an exchange was abandoned mid-protocol
    pub fn is_usable(&self) -> bool {
        !self.poisoned
    }

    /// Upload a local file. Only its bare name is sent to the server.
    pub async fn put(&mut self, path: &Path) -> Result<PutOutcome> {
        self.ensure_usable()?;
        let start = Instant::now();

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidFileName(path.display().to_string()))?
            .to_string();
        let mut file = File::open(path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(TransferError::NotAFile(path.display().to_string()));
        }
        let size = metadata.len();

        info!("PUT {} ({} bytes)", file_name, size);
        let result = self.put_exchange(&mut file, &file_name, size).await;
        let checksum = self.track(result)?;

        Ok(PutOutcome {
            file_name,
            size,
            checksum,
            elapsed: start.elapsed(),
        })
    }

    async fn put_exchange(
        &mut self,
        file: &mut File,
        file_name: &str,
        size: u64,
    ) -> Result<Checksum> {
        self.channel
            .send(&Envelope::StorageRequest {
                file_name: file_name.to_string(),
                size,
            })
            .await?;

        let ready = self.channel.receive_response().await?;
        if !ready.ok {
            warn!("Server refused {}: {}", file_name, ready.message);
            return Err(TransferError::Rejected(ready.message));
        }
        debug!("Server ready: {}", ready.message);

        let checksum = self
            .copier
            .copy(file, self.channel.raw_writer(), size)
            .await?;
        self.channel.flush().await?;

        self.channel
            .send(&Envelope::ChecksumVerification {
                checksum: checksum.to_vec(),
            })
            .await?;

        let result = self.channel.receive_response().await?;
        if !result.ok {
            warn!("Storage of {} failed: {}", file_name, result.message);
            return Err(TransferError::Rejected(result.message));
        }

        info!("Storage complete: {}", result.message);
        Ok(checksum)
    }

    /// Download `file_name` into `dest_dir`. The local file must not exist yet.
    pub async fn get(&mut self, file_name: &str, dest_dir: &Path) -> Result<GetOutcome> {
        self.ensure_usable()?;
        let start = Instant::now();
        let file_name = bare_file_name(file_name)?;

        info!("GET {}", file_name);
        let result = self.get_exchange(&file_name, dest_dir).await;
        let (path, size, source_checksum, received_checksum) = self.track(result)?;

        let verified = verify_checksum(&source_checksum, &received_checksum);
        if verified {
            info!("Successfully retrieved {} ({} bytes)", file_name, size);
        } else {
            warn!(
                "FAILED to verify {}: checksum mismatch, file kept at {}",
                file_name,
                path.display()
            );
        }

        Ok(GetOutcome {
            file_name,
            path,
            size,
            verified,
            source_checksum,
            received_checksum,
            elapsed: start.elapsed(),
        })
    }

    async fn get_exchange(
        &mut self,
        file_name: &str,
        dest_dir: &Path,
    ) -> Result<(PathBuf, u64, Vec<u8>, Checksum)> {
        self.channel
            .send(&Envelope::RetrievalRequest {
                file_name: file_name.to_string(),
            })
            .await?;

        let (response, size) = match self.channel.receive().await? {
            Envelope::RetrievalResponse { response, size } => (response, size),
            other => {
                return Err(TransferError::UnexpectedMessage {
                    expected: "RetrievalResponse",
                    got: other.kind(),
                });
            }
        };
        if !response.ok {
            warn!("Server refused {}: {}", file_name, response.message);
            return Err(TransferError::Rejected(response.message));
        }
        debug!("Server sending {} bytes: {}", size, response.message);

        // From here on the server is streaming; any early return leaves the
        // remaining bytes unread.
        match self.space_probe.available_space(dest_dir) {
            Some(available) if available < size => {
                warn!(
                    "Not enough disk space for {}: need {}, have {}",
                    file_name, size, available
                );
                return Err(TransferError::InsufficientSpace {
                    needed: size,
                    available,
                });
            }
            _ => {}
        }

        let path = dest_dir.join(file_name);
        let mut file = open_exclusive(&path).await?;

        let copied = self
            .copier
            .copy(self.channel.raw_reader(), &mut file, size)
            .await;
        let received = match copied {
            Ok(checksum) => checksum,
            Err(e) => {
                drop(file);
                remove_quietly(&path).await;
                return Err(e);
            }
        };
        file.flush().await?;
        drop(file);

        let source = self.channel.receive_checksum().await?;
        Ok((path, size, source, received))
    }

    /// Close the write side; the server ends the session on EOF
    pub async fn close(mut self) -> Result<()> {
        self.channel.shutdown().await?;
        Ok(())
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(TransferError::ConnectionPoisoned);
        }
        Ok(())
    }

    /// A plain rejection leaves the stream in sync; anything else does not
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if !matches!(e, TransferError::Rejected(_)) {
                self.poisoned = true;
            }
        }
        result
    }
}
