//! Upload listener.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::request::{read_request, HttpError};
use super::response::Response;
use super::router::UploadRouter;

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Default time a client gets to send a complete request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MSG_TIMEOUT: &str = "Request timed out";

/// Accepts upload connections and hands each to a bounded worker.
pub struct HttpServer {
    listener: TcpListener,
    workers: Arc<Semaphore>,
    max_body_size: u64,
    request_timeout: Duration,
}

impl HttpServer {
    /// Bind the listener.
    ///
    /// At most `workers` connections are handled at once; further
    /// connections wait in the accept backlog.
    pub async fn bind(addr: SocketAddr, workers: usize, max_body_size: u64) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            max_body_size,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Set how long a client may take to send its request.
    ///
    /// A connection that misses the deadline gets a 408 and gives its
    /// worker back.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections until `shutdown` is cancelled.
    ///
    /// Connections are spawned on `tasks`, so waiting on the tracker also
    /// waits for requests still in flight. Requests not fully read when
    /// `shutdown` fires are dropped.
    pub async fn run(
        self,
        router: Arc<UploadRouter>,
        tasks: TaskTracker,
        shutdown: CancellationToken,
    ) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "Upload listener started");
        }

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&self.workers).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept upload connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            let connection = Connection {
                stream,
                peer,
                max_body_size: self.max_body_size,
                request_timeout: self.request_timeout,
            };
            let router = Arc::clone(&router);
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                let _permit = permit;
                connection.handle(&router, &shutdown).await;
            });
        }

        info!("Upload listener stopped");
    }
}

/// One accepted upload connection.
struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    max_body_size: u64,
    request_timeout: Duration,
}

impl Connection {
    async fn handle(mut self, router: &UploadRouter, shutdown: &CancellationToken) {
        let peer = self.peer;
        let reading = tokio::time::timeout(
            self.request_timeout,
            read_request(&mut self.stream, self.max_body_size),
        );

        let read = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(%peer, "Dropping unread request on shutdown");
                return;
            }
            read = reading => read,
        };

        let response = match read {
            Err(_) => {
                debug!(%peer, timeout = ?self.request_timeout, "Request not received in time");
                Response::error(408, MSG_TIMEOUT)
            }
            Ok(Ok(Some(request))) => {
                debug!(%peer, method = %request.method, path = %request.path, "Request");
                router.handle(request).await
            }
            Ok(Ok(None)) => return,
            Ok(Err(HttpError::Io(e))) => {
                debug!(%peer, error = %e, "Connection dropped while reading request");
                return;
            }
            Ok(Err(e)) => {
                debug!(%peer, error = %e, "Rejected request");
                Response::error(e.status(), e.to_string())
            }
        };

        debug!(%peer, status = response.status(), "Response");

        if let Err(e) = self.stream.write_all(&response.to_bytes()).await {
            debug!(%peer, error = %e, "Failed to write response");
            return;
        }
        let _ = self.stream.shutdown().await;
    }
}
