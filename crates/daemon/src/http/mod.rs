//! Minimal HTTP/1.1 front for uploads.
//!
//! The relay only needs one endpoint, so this speaks just enough HTTP to
//! accept it: one request per connection read under a deadline, bodies
//! framed by `Content-Length`, and permissive CORS headers on every response.
//!
//! ## Routes
//!
//! | Method    | Path      | Result                                   |
//! |-----------|-----------|------------------------------------------|
//! | `OPTIONS` | any       | `204` preflight                          |
//! | `POST`    | `/upload` | stage + share every file, `200` JSON     |
//! | other     | `/upload` | `405`                                    |
//! | any       | other     | `404`                                    |

mod request;
mod response;
mod router;
mod server;

pub use request::{read_request, HttpError, Request, MAX_HEADER_BYTES};
pub use response::{Response, CORS_HEADERS};
pub use router::{UploadResponse, UploadRouter, UploadedFile};
pub use server::{HttpServer, DEFAULT_REQUEST_TIMEOUT};
