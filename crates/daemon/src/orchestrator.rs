//! Relay orchestrator wiring the upload front to one-shot shares.
//!
//! [`Relay`] owns the share registry, the staging area and the upload
//! listener. Every share, whether it came from an HTTP upload or from
//! [`Relay::share_file`], goes through a [`ShareLauncher`], which binds the
//! share port before returning so the port is connectable as soon as the
//! caller learns it.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::http::{HttpServer, UploadRouter};
use crate::share::registry::file_name_of;
use crate::share::{RandomPortAllocator, ShareError, ShareRegistry, TransferOutcome, TransferServer};
use crate::staging::UploadStore;

/// Times a launch draws a new port after the drawn one turned out to be
/// taken by another process.
const BIND_RETRIES: usize = 8;

/// Relay state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Initial state, not started.
    Stopped,
    /// Binding the upload listener.
    Starting,
    /// Accepting uploads.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Relay state changed.
    StateChanged(RelayState),
    /// A file is waiting for its downloader.
    ShareOffered { port: u16, file_name: String },
    /// A share ended and its port was released.
    ShareFinished { port: u16, outcome: TransferOutcome },
    /// Error occurred.
    Error { message: String },
}

/// Handle to a launched share.
#[derive(Debug, Clone)]
pub struct ShareHandle {
    port: u16,
    cancel: CancellationToken,
}

impl ShareHandle {
    /// Port the file is served on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Withdraw the share if no downloader has finished it yet.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Offers files and spawns their one-shot transfer tasks.
#[derive(Clone)]
pub struct ShareLauncher {
    server: TransferServer,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    events: broadcast::Sender<RelayEvent>,
    /// Store whose files are deleted once their share ends.
    cleanup: Option<UploadStore>,
}

impl ShareLauncher {
    /// Create a launcher. Shares end when `shutdown` is cancelled.
    pub fn new(
        server: TransferServer,
        shutdown: CancellationToken,
        tasks: TaskTracker,
        events: broadcast::Sender<RelayEvent>,
    ) -> Self {
        Self {
            server,
            shutdown,
            tasks,
            events,
            cleanup: None,
        }
    }

    /// Delete each shared file from `store` after its share ends.
    pub fn with_cleanup(mut self, store: UploadStore) -> Self {
        self.cleanup = Some(store);
        self
    }

    /// Offer `path` on a fresh port, bind it, and serve it in the background.
    pub async fn launch(&self, path: &Path) -> Result<ShareHandle, ShareError> {
        if self.shutdown.is_cancelled() {
            return Err(ShareError::ShuttingDown);
        }

        let registry = self.server.registry();

        for _ in 0..BIND_RETRIES {
            let port = registry.offer(path)?;

            let pending = match self.server.bind(port).await {
                Ok(pending) => pending,
                Err(e) => {
                    registry.release(port)?;
                    if e.is_addr_in_use() {
                        debug!(port, "Share port taken by another process, drawing again");
                        continue;
                    }
                    let _ = self.events.send(RelayEvent::Error {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            };

            let cancel = self.shutdown.child_token();
            let handle = ShareHandle {
                port,
                cancel: cancel.clone(),
            };

            let _ = self.events.send(RelayEvent::ShareOffered {
                port,
                file_name: file_name_of(path),
            });

            let events = self.events.clone();
            let cleanup = self.cleanup.clone();
            let path = path.to_path_buf();
            self.tasks.spawn(async move {
                let outcome = pending.run(cancel).await;
                debug!(port, ?outcome, "Share ended");

                if let Some(store) = cleanup {
                    store.remove(&path).await;
                }
                let _ = events.send(RelayEvent::ShareFinished { port, outcome });
            });

            return Ok(handle);
        }

        Err(ShareError::Capacity {
            attempts: BIND_RETRIES,
            live: registry.len(),
        })
    }
}

/// The file relay: upload listener plus one-shot shares.
pub struct Relay {
    /// Configuration.
    config: Config,
    /// Live shares.
    registry: Arc<ShareRegistry>,
    /// Staging area for uploads.
    store: UploadStore,
    /// Launcher for shares of local files (never deletes them).
    launcher: ShareLauncher,
    /// Current state.
    state: Arc<RwLock<RelayState>>,
    /// Bound address of the upload listener.
    local_addr: Option<SocketAddr>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Listener and transfer tasks.
    tasks: TaskTracker,
    /// Event sender.
    event_tx: broadcast::Sender<RelayEvent>,
}

impl Relay {
    /// Creates a relay from a configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let allocator =
            RandomPortAllocator::new(config.share.port_range_start..config.share.port_range_end);
        let registry = Arc::new(ShareRegistry::with_allocator(
            allocator,
            config.share.max_attempts,
        ));

        let server = TransferServer::new(Arc::clone(&registry))
            .with_bind_ip(config.share.bind_addr)
            .with_chunk_size(config.share.chunk_size)
            .with_accept_timeout(config.share.accept_timeout());

        let shutdown_token = CancellationToken::new();
        let tasks = TaskTracker::new();
        let (event_tx, _) = broadcast::channel(256);

        let launcher = ShareLauncher::new(
            server,
            shutdown_token.clone(),
            tasks.clone(),
            event_tx.clone(),
        );
        let store = UploadStore::new(&config.daemon.upload_dir);

        Ok(Self {
            config,
            registry,
            store,
            launcher,
            state: Arc::new(RwLock::new(RelayState::Stopped)),
            local_addr: None,
            shutdown_token,
            tasks,
            event_tx,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> RelayState {
        *self.state.read().await
    }

    /// Returns a receiver for relay events.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.event_tx.subscribe()
    }

    /// Starts the upload listener.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != RelayState::Stopped {
                anyhow::bail!("Relay is already running");
            }
            if self.shutdown_token.is_cancelled() {
                anyhow::bail!("Relay has been stopped and cannot be restarted");
            }
            *state = RelayState::Starting;
        }
        self.emit_event(RelayEvent::StateChanged(RelayState::Starting));

        info!("Starting relay...");

        let server = match self.bind_listener().await {
            Ok(server) => server,
            Err(e) => {
                *self.state.write().await = RelayState::Stopped;
                self.emit_event(RelayEvent::Error {
                    message: format!("{e:#}"),
                });
                self.emit_event(RelayEvent::StateChanged(RelayState::Stopped));
                return Err(e);
            }
        };

        let addr = server.local_addr().context("Failed to read listener address")?;
        self.local_addr = Some(addr);

        let mut launcher = self.launcher.clone();
        if self.config.share.remove_after_transfer {
            launcher = launcher.with_cleanup(self.store.clone());
        }
        let router = Arc::new(UploadRouter::new(self.store.clone(), launcher));
        self.tasks.spawn(server.run(
            router,
            self.tasks.clone(),
            self.shutdown_token.child_token(),
        ));

        *self.state.write().await = RelayState::Running;
        self.emit_event(RelayEvent::StateChanged(RelayState::Running));

        info!(%addr, "Relay running");
        Ok(())
    }

    async fn bind_listener(&self) -> Result<HttpServer> {
        tokio::fs::create_dir_all(self.store.root())
            .await
            .with_context(|| {
                format!(
                    "Failed to create upload directory {}",
                    self.store.root().display()
                )
            })?;

        let addr = SocketAddr::new(self.config.http.bind_addr, self.config.http.port);
        let server =
            HttpServer::bind(addr, self.config.http.workers, self.config.http.max_body_size)
                .await
                .with_context(|| format!("Failed to bind upload listener on {addr}"))?;
        Ok(server.with_request_timeout(self.config.http.request_timeout()))
    }

    /// Share a local file on a fresh one-shot port.
    ///
    /// The file is left in place after the transfer.
    pub async fn share_file(&self, path: impl AsRef<Path>) -> Result<u16> {
        let path = path.as_ref();

        if self.shutdown_token.is_cancelled() {
            anyhow::bail!("Relay has been stopped");
        }

        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if !metadata.is_file() {
            anyhow::bail!("{} is not a regular file", path.display());
        }
        let path = tokio::fs::canonicalize(path)
            .await
            .with_context(|| format!("Failed to resolve {}", path.display()))?;

        let handle = self
            .launcher
            .launch(&path)
            .await
            .with_context(|| format!("Failed to share {}", path.display()))?;

        Ok(handle.port())
    }

    /// Stops the relay, cancelling shares that have not finished.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            match *state {
                RelayState::ShuttingDown => anyhow::bail!("Relay is already shutting down"),
                RelayState::Stopped if self.shutdown_token.is_cancelled() => return Ok(()),
                _ => {}
            }
            *state = RelayState::ShuttingDown;
        }
        self.emit_event(RelayEvent::StateChanged(RelayState::ShuttingDown));

        info!("Stopping relay...");

        self.shutdown_token.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        let leftover = self.registry.len();
        if leftover > 0 {
            warn!(leftover, "Shares still registered after shutdown");
        }

        *self.state.write().await = RelayState::Stopped;
        self.emit_event(RelayEvent::StateChanged(RelayState::Stopped));

        info!("Relay stopped");
        Ok(())
    }

    /// Emits a relay event.
    fn emit_event(&self, event: RelayEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the share registry.
    pub fn registry(&self) -> &Arc<ShareRegistry> {
        &self.registry
    }

    /// Returns the upload listener's address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}
