//! Port-to-file registry for live shares.
//!
//! Every entry is inserted once by [`ShareRegistry::offer`], read by the
//! transfer task that owns the port, then forgotten via
//! [`ShareRegistry::release`]. All access goes through a single mutex so the
//! contains-check and insert of an offer are one critical section.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use super::allocator::{PortAllocator, RandomPortAllocator};
use super::ShareError;

/// Default number of candidate draws before an offer gives up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 1024;

/// A live share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareEntry {
    /// Port the file is offered on.
    pub port: u16,
    /// Path of the staged file.
    pub file_path: PathBuf,
    /// When the share was offered.
    pub created_at: SystemTime,
}

impl ShareEntry {
    /// Base name announced to the downloader.
    pub fn file_name(&self) -> String {
        file_name_of(&self.file_path)
    }
}

/// Base name of a path, falling back to the whole path when it has none.
pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Registry of live shares, keyed by port.
pub struct ShareRegistry {
    /// Live shares by port.
    shares: Mutex<HashMap<u16, ShareEntry>>,
    /// Candidate port source.
    allocator: Box<dyn PortAllocator>,
    /// Draws per offer before reporting a capacity error.
    max_attempts: usize,
}

impl ShareRegistry {
    /// Create a registry drawing from the dynamic port range.
    pub fn new() -> Self {
        Self::with_allocator(RandomPortAllocator::default(), DEFAULT_MAX_ATTEMPTS)
    }

    /// Create a registry with a custom allocator and attempt limit.
    pub fn with_allocator(allocator: impl PortAllocator + 'static, max_attempts: usize) -> Self {
        Self {
            shares: Mutex::new(HashMap::new()),
            allocator: Box::new(allocator),
            max_attempts,
        }
    }

    /// Register `file_path` under a port that is not currently live.
    ///
    /// Each call mints a new port, even when the same path is already shared.
    pub fn offer(&self, file_path: impl Into<PathBuf>) -> Result<u16, ShareError> {
        let file_path = file_path.into();

        let mut shares = self.shares.lock().map_err(|_| ShareError::LockPoisoned {
            context: "shares lock during offer".to_string(),
        })?;

        let live = shares.len();
        if live >= self.allocator.capacity() {
            return Err(ShareError::Capacity { attempts: 0, live });
        }

        for _ in 0..self.max_attempts {
            let port = self.allocator.candidate();
            if let Entry::Vacant(slot) = shares.entry(port) {
                info!(port, path = ?file_path, "Offered share");
                slot.insert(ShareEntry {
                    port,
                    file_path,
                    created_at: SystemTime::now(),
                });
                return Ok(port);
            }
        }

        Err(ShareError::Capacity {
            attempts: self.max_attempts,
            live,
        })
    }

    /// Look up the live share on `port`.
    pub fn lookup(&self, port: u16) -> Result<Option<ShareEntry>, ShareError> {
        let shares = self.shares.lock().map_err(|_| ShareError::LockPoisoned {
            context: "shares lock during lookup".to_string(),
        })?;
        Ok(shares.get(&port).cloned())
    }

    /// Forget the share on `port`, making the port available to new offers.
    ///
    /// Returns the removed entry, or `None` if the port was not live.
    pub fn release(&self, port: u16) -> Result<Option<ShareEntry>, ShareError> {
        let mut shares = self.shares.lock().map_err(|_| ShareError::LockPoisoned {
            context: "shares lock during release".to_string(),
        })?;

        let entry = shares.remove(&port);
        if entry.is_some() {
            debug!(port, "Released share");
        }

        Ok(entry)
    }

    /// Checks if a share is live on `port`.
    ///
    /// Reports `false` if the lock is poisoned.
    pub fn contains(&self, port: u16) -> bool {
        match self.shares.lock() {
            Ok(shares) => shares.contains_key(&port),
            Err(_) => {
                warn!(port, "Shares lock poisoned, reporting port as not live");
                false
            }
        }
    }

    /// Returns the number of live shares, or 0 if the lock is poisoned.
    pub fn len(&self) -> usize {
        match self.shares.lock() {
            Ok(shares) => shares.len(),
            Err(_) => {
                warn!("Shares lock poisoned, reporting no live shares");
                0
            }
        }
    }

    /// Returns true if no share is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all live shares, ordered by port.
    pub fn entries(&self) -> Vec<ShareEntry> {
        let mut entries: Vec<_> = match self.shares.lock() {
            Ok(shares) => shares.values().cloned().collect(),
            Err(_) => {
                warn!("Shares lock poisoned, returning no entries");
                Vec::new()
            }
        };
        entries.sort_by_key(|entry| entry.port);
        entries
    }
}

#[cfg(test)]
impl ShareRegistry {
    /// Poison the shares lock by panicking while holding it.
    pub(crate) fn poison(&self) {
        let _ = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _guard = self.shares.lock();
                    panic!("panicked while holding the shares lock");
                })
                .join()
        });
    }
}

impl Default for ShareRegistry {
    fn default() -> Self {
        Self::new()
    }
}
