//! Staging of uploaded files before they are shared.
//!
//! Each upload is written to its own directory, `root/<uuid>/<name>`, so the
//! staged file keeps the name the client sent. That base name is what the
//! downloader later sees in the `Filename:` header.

use std::path::{Path, PathBuf};

use protocol::multipart::MultipartPart;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// Name used when an upload's filename is unusable on disk.
pub const FALLBACK_FILENAME: &str = "unnamed.file";

/// Errors that can occur while staging an upload.
#[derive(Debug, Error)]
pub enum StagingError {
    /// The upload directory could not be created.
    #[error("failed to create staging directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The upload content could not be written.
    #[error("failed to write staged file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A file written to the staging area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Location of the staged file.
    pub path: PathBuf,
    /// Name the file is stored (and announced) under.
    pub filename: String,
    /// Content type declared by the uploader.
    pub content_type: String,
    /// Size in bytes.
    pub size: u64,
}

/// Writes uploaded parts under a root directory.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The staging root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist one extracted part.
    pub async fn stage(&self, part: &MultipartPart) -> Result<StagedFile, StagingError> {
        let dir = self.root.join(Uuid::new_v4().to_string());
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| StagingError::CreateDir {
                path: dir.clone(),
                source,
            })?;

        let filename = sanitize_filename(&part.filename);
        let path = dir.join(&filename);

        if let Err(source) = fs::write(&path, &part.content).await {
            discard_dir(&dir).await;
            return Err(StagingError::Write { path, source });
        }

        debug!(path = ?path, size = part.content.len(), "Staged upload");

        Ok(StagedFile {
            path,
            filename,
            content_type: part.content_type.clone(),
            size: part.content.len() as u64,
        })
    }

    /// Delete a staged file and its per-upload directory.
    ///
    /// Failures are logged, not returned.
    pub async fn remove(&self, staged_path: &Path) {
        if let Err(e) = fs::remove_file(staged_path).await {
            warn!(path = ?staged_path, error = %e, "Failed to remove staged file");
            return;
        }

        // Only remove directories we created under the root.
        if let Some(dir) = staged_path.parent() {
            if dir != self.root && dir.starts_with(&self.root) {
                if let Err(e) = fs::remove_dir(dir).await {
                    warn!(path = ?dir, error = %e, "Failed to remove staging directory");
                }
            }
        }
    }
}

/// Best-effort removal of a per-upload directory whose file never landed.
async fn discard_dir(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = ?dir, error = %e, "Failed to remove staging directory");
        }
    }
}

/// Reduce an uploaded filename to a safe single path component.
///
/// Directory parts (either separator style) and control characters are
/// dropped; names that end up empty or are `.`/`..` become
/// [`FALLBACK_FILENAME`].
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned.to_string()
    }
}
