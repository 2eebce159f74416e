//! # ZipDrop Relay Library
//!
//! Upload a file over HTTP, get back a port, and let exactly one downloader
//! fetch it from that port over plain TCP.
//!
//! ## Overview
//!
//! - **Upload Front**: a small HTTP/1.1 listener accepting
//!   `multipart/form-data` uploads on `/upload`
//! - **Staging**: uploaded parts written to disk under their original names
//! - **One-Shot Shares**: each file gets its own port from the dynamic range,
//!   served once with a `Filename:` header, then released
//! - **Fetch Client**: the matching downloader
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                            Relay                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │  HttpServer  │──►│ UploadRouter │──►│   UploadStore    │  │
//! │  └──────────────┘   └──────┬───────┘   └──────────────────┘  │
//! │                            │                                 │
//! │                     ┌──────▼───────┐   ┌──────────────────┐  │
//! │                     │ShareLauncher │──►│  ShareRegistry   │  │
//! │                     └──────┬───────┘   └──────────────────┘  │
//! │                            │                                 │
//! │                     ┌──────▼───────┐                         │
//! │                     │TransferServer│  one task per port      │
//! │                     └──────────────┘                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, Relay};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let mut relay = Relay::new(config)?;
//!     relay.start().await?;
//!
//!     // Uploads are now accepted on /upload
//!
//!     relay.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`http`]: Upload listener and routing
//! - [`staging`]: Upload staging area
//! - [`share`]: Port registry and one-shot transfer server
//! - [`client`]: Share downloader
//! - [`orchestrator`]: Relay coordinator

pub mod client;
pub mod config;
pub mod http;
pub mod orchestrator;
pub mod share;
pub mod staging;

// Re-export protocol for convenience
pub use protocol;

pub use client::{fetch, fetch_to_writer, FetchError, FetchedFile};
pub use config::Config;
pub use http::{HttpServer, UploadResponse, UploadRouter, UploadedFile};
pub use orchestrator::{Relay, RelayEvent, RelayState, ShareHandle, ShareLauncher};
pub use share::{ShareEntry, ShareError, ShareRegistry, TransferOutcome, TransferServer};
pub use staging::{sanitize_filename, StagedFile, StagingError, UploadStore};
