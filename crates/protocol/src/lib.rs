//! # ZipDrop Protocol Library
//!
//! Wire formats shared by the ZipDrop relay and its downloaders.
//!
//! ## Overview
//!
//! - **Multipart Extraction**: pull file payloads out of a `multipart/form-data`
//!   body without a MIME library, operating on raw bytes
//! - **Download Header**: the single `Filename: <name>\n` line that precedes a
//!   shared file on its one-shot TCP port
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::multipart::{boundary_from_content_type, extract};
//! use protocol::header::{decode_header, encode_header};
//!
//! let boundary = boundary_from_content_type("multipart/form-data; boundary=XYZ").unwrap();
//! let body = b"--XYZ\r\n\
//!     Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
//!     Content-Type: text/plain\r\n\r\n\
//!     hello\r\n--XYZ--\r\n";
//!
//! let parts = extract(body, &boundary);
//! assert_eq!(parts[0].filename, "a.txt");
//!
//! let header = encode_header(&parts[0].filename);
//! let (name, _) = decode_header(&header).unwrap().unwrap();
//! assert_eq!(name, "a.txt");
//! ```
//!
//! ## Modules
//!
//! - [`multipart`]: Multipart body extraction and boundary negotiation
//! - [`header`]: Download header codec
//! - [`error`]: Error types

pub mod error;
pub mod header;
pub mod multipart;

pub use error::{ProtocolError, Result};
pub use header::{decode_header, encode_header, FILENAME_PREFIX, MAX_HEADER_LEN};
pub use multipart::{
    boundary_from_content_type, extract, find_subsequence, MultipartPart, DEFAULT_CONTENT_TYPE,
    MAX_BOUNDARY_LEN,
};
