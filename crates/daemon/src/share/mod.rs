//! One-shot file shares.
//!
//! A share maps a TCP port to a staged file. The port is handed out by
//! [`ShareRegistry::offer`], and a [`TransferServer`] binds it, serves the
//! file to the first peer that connects, then tears the listener down and
//! releases the registry entry.
//!
//! ```text
//! offer(path) ──► port ──► TransferServer::serve(port)
//!                           BOUND → CONNECTED → STREAMING → CLOSED
//!                                                             │
//!                                         registry.release(port)
//! ```

pub mod allocator;
pub mod registry;
pub mod server;

pub use allocator::{PortAllocator, RandomPortAllocator, DYNAMIC_PORT_END, DYNAMIC_PORT_START};
pub use registry::{ShareEntry, ShareRegistry, DEFAULT_MAX_ATTEMPTS};
pub use server::{PendingTransfer, TransferOutcome, TransferServer, DEFAULT_CHUNK_SIZE};

use thiserror::Error;

/// Errors surfaced synchronously by share operations.
///
/// Transport failures during a download are not errors here: they end the
/// session and are reported as a [`TransferOutcome`].
#[derive(Debug, Error)]
pub enum ShareError {
    /// No free port could be found for a new share.
    #[error("no free share port after {attempts} attempts ({live} shares live)")]
    Capacity { attempts: usize, live: usize },

    /// The transfer listener could not bind its port.
    #[error("failed to bind share port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The relay is stopping and takes no new shares.
    #[error("relay is shutting down")]
    ShuttingDown,

    /// Lock poisoned during operation.
    #[error("lock poisoned: {context}")]
    LockPoisoned { context: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShareError {
    /// Whether this is a bind failure caused by the port already being taken.
    pub fn is_addr_in_use(&self) -> bool {
        matches!(
            self,
            ShareError::Bind { source, .. } if source.kind() == std::io::ErrorKind::AddrInUse
        )
    }
}
