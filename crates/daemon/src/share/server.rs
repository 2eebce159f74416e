//! One-shot TCP listener serving a single shared file.
//!
//! A transfer moves through `BOUND → CONNECTED → STREAMING → CLOSED` and
//! never returns to `BOUND`: the listening socket is closed as soon as the
//! first `accept` returns, so no second peer can reach the port even if the
//! first transfer fails.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use protocol::header::encode_header;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::{file_name_of, ShareRegistry};
use super::ShareError;

/// Default chunk size for streaming files (64KB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// How a share's single session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The whole file was sent.
    Completed { peer: SocketAddr, bytes: u64 },
    /// A peer connected but the port had no live share.
    NoShare { peer: SocketAddr },
    /// The session ended early on a disk or socket error.
    Failed {
        peer: SocketAddr,
        bytes: u64,
        reason: String,
    },
    /// The listener failed while waiting for a peer.
    AcceptFailed { reason: String },
    /// No peer connected within the accept timeout.
    TimedOut,
    /// The share was cancelled before a peer connected.
    Cancelled,
}

impl TransferOutcome {
    /// Returns true if the file was fully delivered.
    pub fn is_completed(&self) -> bool {
        matches!(self, TransferOutcome::Completed { .. })
    }
}

/// Serves shared files on their one-shot ports.
#[derive(Clone)]
pub struct TransferServer {
    /// Registry the served ports are resolved against.
    registry: Arc<ShareRegistry>,
    /// Address listeners bind to.
    bind_ip: IpAddr,
    /// Streaming chunk size.
    chunk_size: usize,
    /// How long a listener waits for its peer.
    accept_timeout: Option<Duration>,
}

impl TransferServer {
    /// Create a transfer server with no accept timeout.
    pub fn new(registry: Arc<ShareRegistry>) -> Self {
        Self {
            registry,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            chunk_size: DEFAULT_CHUNK_SIZE,
            accept_timeout: None,
        }
    }

    /// Set the address listeners bind to.
    pub fn with_bind_ip(mut self, bind_ip: IpAddr) -> Self {
        self.bind_ip = bind_ip;
        self
    }

    /// Set the streaming chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Set the accept timeout (`None` waits forever).
    pub fn with_accept_timeout(mut self, accept_timeout: Option<Duration>) -> Self {
        self.accept_timeout = accept_timeout;
        self
    }

    /// The registry this server resolves ports against.
    pub fn registry(&self) -> &Arc<ShareRegistry> {
        &self.registry
    }

    /// Bind the listener for `port` without accepting yet.
    ///
    /// A bind failure leaves the registry entry in place; the caller decides
    /// whether to release it.
    pub async fn bind(&self, port: u16) -> Result<PendingTransfer, ShareError> {
        let addr = SocketAddr::new(self.bind_ip, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ShareError::Bind { port, source })?;

        debug!(port, "Share listener bound");

        Ok(PendingTransfer {
            port,
            listener,
            server: self.clone(),
        })
    }

    /// Bind `port`, serve its file to the first peer, then release the share.
    pub async fn serve(
        &self,
        port: u16,
        cancel: CancellationToken,
    ) -> Result<TransferOutcome, ShareError> {
        let pending = self.bind(port).await?;
        Ok(pending.run(cancel).await)
    }
}

/// A bound share listener waiting for its single peer.
pub struct PendingTransfer {
    port: u16,
    listener: TcpListener,
    server: TransferServer,
}

/// Result of waiting for the first peer.
enum Accepted {
    Peer(io::Result<(TcpStream, SocketAddr)>),
    TimedOut,
    Cancelled,
}

impl PendingTransfer {
    /// The bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The local address of the listener.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept one peer, stream the share to it and release the port.
    ///
    /// Transport errors end the session and are reported in the outcome;
    /// they are never propagated.
    pub async fn run(self, cancel: CancellationToken) -> TransferOutcome {
        let PendingTransfer {
            port,
            listener,
            server,
        } = self;

        let accepted = {
            let accept = async {
                match server.accept_timeout {
                    Some(limit) => match tokio::time::timeout(limit, listener.accept()).await {
                        Ok(result) => Accepted::Peer(result),
                        Err(_) => Accepted::TimedOut,
                    },
                    None => Accepted::Peer(listener.accept().await),
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Accepted::Cancelled,
                accepted = accept => accepted,
            }
        };

        // One peer per share: stop listening before any byte is sent.
        drop(listener);

        let outcome = match accepted {
            Accepted::Cancelled => {
                info!(port, "Share cancelled before a peer connected");
                TransferOutcome::Cancelled
            }
            Accepted::TimedOut => {
                info!(port, "No peer connected before the accept timeout");
                TransferOutcome::TimedOut
            }
            Accepted::Peer(Err(e)) => {
                warn!(port, error = %e, "Failed to accept peer");
                TransferOutcome::AcceptFailed {
                    reason: e.to_string(),
                }
            }
            Accepted::Peer(Ok((stream, peer))) => {
                info!(port, %peer, "Peer connected to share");

                let entry = match server.registry.lookup(port) {
                    Ok(Some(entry)) => entry,
                    Ok(None) => {
                        warn!(port, %peer, "No share registered on port, closing connection");
                        return TransferOutcome::NoShare { peer };
                    }
                    Err(e) => {
                        warn!(port, %peer, error = %e, "Failed to look up share");
                        return TransferOutcome::Failed {
                            peer,
                            bytes: 0,
                            reason: e.to_string(),
                        };
                    }
                };

                let mut sent = 0u64;
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(io::Error::new(
                        io::ErrorKind::Interrupted,
                        "transfer cancelled",
                    )),
                    result = stream_file(stream, &entry.file_path, server.chunk_size, &mut sent) => result,
                };

                match result {
                    Ok(()) => {
                        info!(port, %peer, bytes = sent, file = %entry.file_name(), "Share delivered");
                        TransferOutcome::Completed { peer, bytes: sent }
                    }
                    Err(e) => {
                        warn!(port, %peer, bytes = sent, error = %e, "Share transfer failed");
                        TransferOutcome::Failed {
                            peer,
                            bytes: sent,
                            reason: e.to_string(),
                        }
                    }
                }
            }
        };

        if let Err(e) = server.registry.release(port) {
            warn!(port, error = %e, "Failed to release share");
        }

        outcome
    }
}

/// Write the download header followed by the raw file bytes, then close.
async fn stream_file(
    mut stream: TcpStream,
    path: &Path,
    chunk_size: usize,
    sent: &mut u64,
) -> io::Result<()> {
    let mut file = File::open(path).await?;

    stream.write_all(&encode_header(&file_name_of(path))).await?;

    let mut buffer = vec![0u8; chunk_size];
    loop {
        let bytes_read = file.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        stream.write_all(&buffer[..bytes_read]).await?;
        *sent += bytes_read as u64;
    }

    stream.flush().await?;
    stream.shutdown().await?;
    Ok(())
}
