//! Request routing and the upload handler.

use protocol::multipart::{boundary_from_content_type, extract};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::request::Request;
use super::response::Response;
use crate::orchestrator::{ShareHandle, ShareLauncher};
use crate::share::ShareError;
use crate::staging::UploadStore;

const UPLOAD_PATH: &str = "/upload";

const MSG_BAD_CONTENT_TYPE: &str = "Invalid request. Content-Type must be multipart/form-data.";
const MSG_NO_FILES: &str = "File upload failed. No files found in request.";
const MSG_METHOD: &str = "Only POST requests are supported.";
const MSG_NOT_FOUND: &str = "NOT FOUND";
const MSG_STAGE_FAILED: &str = "Failed to store upload.";

/// One shared file in an upload response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    /// Name the downloader will receive.
    pub filename: String,
    /// Content type declared by the uploader.
    pub content_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Port the file can be fetched from, once.
    pub port: u16,
}

/// Body of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Port of the first file.
    pub port: u16,
    /// Every file in the request, in body order.
    pub files: Vec<UploadedFile>,
}

/// Dispatches requests to handlers.
pub struct UploadRouter {
    store: UploadStore,
    launcher: ShareLauncher,
}

impl UploadRouter {
    /// Create a router staging into `store` and sharing through `launcher`.
    pub fn new(store: UploadStore, launcher: ShareLauncher) -> Self {
        Self { store, launcher }
    }

    /// Produce the response for `request`.
    pub async fn handle(&self, request: Request) -> Response {
        if request.method == "OPTIONS" {
            return Response::empty(204);
        }

        if request.path != UPLOAD_PATH {
            return Response::error(404, MSG_NOT_FOUND);
        }

        if request.method != "POST" {
            return Response::error(405, MSG_METHOD);
        }

        self.upload(&request).await
    }

    async fn upload(&self, request: &Request) -> Response {
        let content_type = request.header("Content-Type").unwrap_or_default();
        let boundary = match boundary_from_content_type(content_type) {
            Ok(boundary) => boundary,
            Err(e) => {
                debug!(error = %e, "Rejected upload content type");
                return Response::error(400, MSG_BAD_CONTENT_TYPE);
            }
        };

        let parts = extract(&request.body, &boundary);
        if parts.is_empty() {
            return Response::error(400, MSG_NO_FILES);
        }

        let mut launched: Vec<ShareHandle> = Vec::with_capacity(parts.len());
        let mut files = Vec::with_capacity(parts.len());

        for part in &parts {
            let staged = match self.store.stage(part).await {
                Ok(staged) => staged,
                Err(e) => {
                    warn!(error = %e, "Failed to stage upload");
                    abort(&launched);
                    return Response::error(500, MSG_STAGE_FAILED);
                }
            };

            let handle = match self.launcher.launch(&staged.path).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(error = %e, "Failed to share upload");
                    self.store.remove(&staged.path).await;
                    abort(&launched);
                    let status = match e {
                        ShareError::Capacity { .. } | ShareError::ShuttingDown => 503,
                        _ => 500,
                    };
                    return Response::error(status, e.to_string());
                }
            };

            info!(
                filename = %staged.filename,
                size = staged.size,
                port = handle.port(),
                "Upload shared"
            );

            files.push(UploadedFile {
                filename: staged.filename,
                content_type: staged.content_type,
                size: staged.size,
                port: handle.port(),
            });
            launched.push(handle);
        }

        let body = UploadResponse {
            port: files[0].port,
            files,
        };
        Response::json(200, &body)
    }
}

/// Withdraw shares already launched for a request that failed part-way.
fn abort(launched: &[ShareHandle]) {
    for handle in launched {
        handle.cancel();
    }
}
