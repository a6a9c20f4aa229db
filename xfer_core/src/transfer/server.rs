use crate::TransferEvent;
use crate::error::{ChannelError, Result, TransferError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::channel::MessageChannel;
use super::checksum::{ChecksumCopier, verify_checksum};
use super::constants::PROTOCOL_VERSION;
use super::disk::{FsSpaceProbe, SpaceProbe};
use super::protocol::{Envelope, Response};
use super::utils::{bare_file_name, open_exclusive, remove_quietly};

/// Where the server keeps files and how it checks free space
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub root_dir: PathBuf,
    pub space_probe: Arc<dyn SpaceProbe>,
}

impl ServerConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            space_probe: Arc::new(FsSpaceProbe),
        }
    }

    pub fn with_space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space_probe = probe;
        self
    }
}

/// Accept connections until `shutdown` fires, one task per connection
pub async fn run_server(
    listener: TcpListener,
    config: ServerConfig,
    event_tx: mpsc::Sender<TransferEvent>,
    shutdown: CancellationToken,
) -> Result<()> {
    tokio::fs::create_dir_all(&config.root_dir).await?;
    let config = Arc::new(config);
    info!(
        "Serving {} on {} (protocol v{})",
        config.root_dir.display(),
        listener.local_addr()?,
        PROTOCOL_VERSION
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Server shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let config = config.clone();
                    let event_tx = event_tx.clone();

                    tokio::spawn(async move {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("set_nodelay failed: {}", e);
                        }
                        handle_connection(stream, peer, config, event_tx)
                            .instrument(info_span!("conn", %peer))
                            .await;
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                    let _ = event_tx
                        .send(TransferEvent::Error(format!("Accept error: {}", e)))
                        .await;
                }
            }
        }
    }

    Ok(())
}

/// Serve requests on one connection until the peer leaves or breaks protocol
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    event_tx: mpsc::Sender<TransferEvent>,
) where
    S: AsyncRead + AsyncWrite,
{
    info!("Accepted connection");
    let _ = event_tx
        .send(TransferEvent::ConnectionAccepted { peer })
        .await;

    let mut channel = MessageChannel::new(stream);
    let mut copier = ChecksumCopier::new();

    loop {
        let envelope = match channel.receive().await {
            Ok(envelope) => envelope,
            Err(ChannelError::Closed) => {
                debug!("Peer closed the connection");
                break;
            }
            Err(e) => {
                warn!("Failed to read request: {}", e);
                let _ = event_tx
                    .send(TransferEvent::Error(format!(
                        "Bad request from {}: {}",
                        peer, e
                    )))
                    .await;
                break;
            }
        };

        let result = match envelope {
            Envelope::StorageRequest { file_name, size } => {
                handle_storage(&mut channel, &mut copier, &config, &event_tx, file_name, size)
                    .await
            }
            Envelope::RetrievalRequest { file_name } => {
                handle_retrieval(&mut channel, &mut copier, &config, &event_tx, file_name).await
            }
            other @ (Envelope::Response(_)
            | Envelope::RetrievalResponse { .. }
            | Envelope::ChecksumVerification { .. }) => Err(TransferError::UnexpectedMessage {
                expected: "StorageRequest or RetrievalRequest",
                got: other.kind(),
            }),
        };

        if let Err(e) = result {
            error!("Closing connection: {}", e);
            let _ = event_tx
                .send(TransferEvent::Error(format!(
                    "Connection {} closed: {}",
                    peer, e
                )))
                .await;
            break;
        }
    }

    if let Err(e) = channel.shutdown().await {
        debug!("Shutdown error: {}", e);
    }
    let _ = event_tx
        .send(TransferEvent::ConnectionClosed { peer })
        .await;
}

/// PUT, receiving side. `Ok` means the connection is still in sync.
async fn handle_storage<S: AsyncRead + AsyncWrite>(
    channel: &mut MessageChannel<S>,
    copier: &mut ChecksumCopier,
    config: &ServerConfig,
    event_tx: &mpsc::Sender<TransferEvent>,
    file_name: String,
    size: u64,
) -> Result<()> {
    info!("Attempting to store {} ({} bytes)", file_name, size);

    let name = match bare_file_name(&file_name) {
        Ok(name) => name,
        Err(e) => return reject_storage(channel, event_tx, file_name, e.to_string()).await,
    };
    let path = config.root_dir.join(&name);

    let mut file = match open_exclusive(&path).await {
        Ok(file) => file,
        Err(e) => return reject_storage(channel, event_tx, name, e.to_string()).await,
    };

    if !config.space_probe.has_space(&config.root_dir, size) {
        drop(file);
        remove_quietly(&path).await;
        return reject_storage(channel, event_tx, name, "insufficient space".to_string()).await;
    }

    channel.send(&Envelope::Response(Response::ok("ready"))).await?;

    let received = async {
        let checksum = copier.copy(channel.raw_reader(), &mut file, size).await?;
        file.flush().await?;
        Ok::<_, TransferError>(checksum)
    }
    .await;
    drop(file);

    let received = match received {
        Ok(checksum) => checksum,
        Err(e) => {
            remove_quietly(&path).await;
            return Err(e);
        }
    };

    let source = match channel.receive_checksum().await {
        Ok(checksum) => checksum,
        Err(e) => {
            remove_quietly(&path).await;
            return Err(e);
        }
    };

    let verified = verify_checksum(&source, &received);
    if verified {
        info!("Stored {} ({} bytes)", name, size);
        channel
            .send(&Envelope::Response(Response::ok("File stored successfully")))
            .await?;
    } else {
        warn!("FAILED to store {}: checksum mismatch", name);
        remove_quietly(&path).await;
        channel
            .send(&Envelope::Response(Response::error("checksum mismatch")))
            .await?;
    }

    let _ = event_tx
        .send(TransferEvent::StorageCompleted {
            file_name: name,
            size,
            verified,
        })
        .await;
    Ok(())
}

async fn reject_storage<S: AsyncRead + AsyncWrite>(
    channel: &mut MessageChannel<S>,
    event_tx: &mpsc::Sender<TransferEvent>,
    file_name: String,
    reason: String,
) -> Result<()> {
    warn!("Rejected storage of {}: {}", file_name, reason);
    channel
        .send(&Envelope::Response(Response::error(reason.clone())))
        .await?;
    let _ = event_tx
        .send(TransferEvent::StorageRejected { file_name, reason })
        .await;
    Ok(())
}

/// GET, sending side
async fn handle_retrieval<S: AsyncRead + AsyncWrite>(
    channel: &mut MessageChannel<S>,
    copier: &mut ChecksumCopier,
    config: &ServerConfig,
    event_tx: &mpsc::Sender<TransferEvent>,
    file_name: String,
) -> Result<()> {
    info!("Attempting to retrieve {}", file_name);

    let name = match bare_file_name(&file_name) {
        Ok(name) => name,
        Err(e) => return reject_retrieval(channel, event_tx, file_name, e.to_string()).await,
    };
    let path = config.root_dir.join(&name);

    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => return reject_retrieval(channel, event_tx, name, e.to_string()).await,
    };
    let size = match file.metadata().await {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        Ok(_) => {
            return reject_retrieval(channel, event_tx, name, "not a regular file".to_string())
                .await;
        }
        Err(e) => return reject_retrieval(channel, event_tx, name, e.to_string()).await,
    };

    channel
        .send(&Envelope::RetrievalResponse {
            response: Response::ok("Ready to send"),
            size,
        })
        .await?;

    let checksum = copier.copy(&mut file, channel.raw_writer(), size).await?;
    channel.flush().await?;
    channel
        .send(&Envelope::ChecksumVerification {
            checksum: checksum.to_vec(),
        })
        .await?;

    info!("Sent {} ({} bytes, checksum {})", name, size, checksum);
    let _ = event_tx
        .send(TransferEvent::RetrievalCompleted {
            file_name: name,
            size,
        })
        .await;
    Ok(())
}

async fn reject_retrieval<S: AsyncRead + AsyncWrite>(
    channel: &mut MessageChannel<S>,
    event_tx: &mpsc::Sender<TransferEvent>,
    file_name: String,
    reason: String,
) -> Result<()> {
    warn!("Rejected retrieval of {}: {}", file_name, reason);
    channel
        .send(&Envelope::RetrievalResponse {
            response: Response::error(reason.clone()),
            size: 0,
        })
        .await?;
    let _ = event_tx
        .send(TransferEvent::RetrievalRejected { file_name, reason })
        .await;
    Ok(())
}
