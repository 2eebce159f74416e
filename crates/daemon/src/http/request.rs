//! Request parsing.

use std::io;

use protocol::multipart::find_subsequence;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on the request line plus headers.
pub const MAX_HEADER_BYTES: usize = 16 * 1024;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 8 * 1024;

/// Errors produced while reading a request.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request line or headers could not be parsed.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The request head did not fit in [`MAX_HEADER_BYTES`].
    #[error("request headers exceed {max} bytes")]
    HeadersTooLarge { max: usize },

    /// The declared body exceeds the configured limit.
    #[error("request body of {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { size: u64, limit: u64 },

    /// A body was sent without a usable `Content-Length`.
    #[error("Content-Length required")]
    LengthRequired,

    /// Socket error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl HttpError {
    /// Status code reported to the client for this error.
    pub fn status(&self) -> u16 {
        match self {
            HttpError::Malformed(_) => 400,
            HttpError::HeadersTooLarge { .. } => 431,
            HttpError::BodyTooLarge { .. } => 413,
            HttpError::LengthRequired => 411,
            HttpError::Io(_) => 500,
        }
    }
}

/// A fully read HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method, as sent.
    pub method: String,
    /// Request path without the query string.
    pub path: String,
    /// Header fields in arrival order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

impl Request {
    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Read one request from `stream`.
///
/// Returns `Ok(None)` if the peer closed the connection without sending
/// anything. Answers `Expect: 100-continue` before reading the body.
pub async fn read_request<S>(stream: &mut S, max_body_size: u64) -> Result<Option<Request>, HttpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    let head_end = loop {
        if let Some(pos) = find_subsequence(&buf, HEAD_TERMINATOR, 0) {
            break pos;
        }
        if buf.len() >= MAX_HEADER_BYTES {
            return Err(HttpError::HeadersTooLarge {
                max: MAX_HEADER_BYTES,
            });
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(HttpError::Malformed(
                "connection closed before end of headers".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    if head_end + HEAD_TERMINATOR.len() > MAX_HEADER_BYTES {
        return Err(HttpError::HeadersTooLarge {
            max: MAX_HEADER_BYTES,
        });
    }

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let (method, path, headers) = parse_head(&head)?;
    let mut request = Request {
        method,
        path,
        headers,
        body: Vec::new(),
    };

    if request.header("Transfer-Encoding").is_some() {
        return Err(HttpError::LengthRequired);
    }

    let length = match request.header("Content-Length") {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| HttpError::Malformed(format!("invalid Content-Length: {value}")))?,
        None if request.method == "POST" || request.method == "PUT" => {
            return Err(HttpError::LengthRequired);
        }
        None => 0,
    };

    if length > max_body_size {
        return Err(HttpError::BodyTooLarge {
            size: length,
            limit: max_body_size,
        });
    }

    let expects_continue = request
        .header("Expect")
        .is_some_and(|value| value.eq_ignore_ascii_case("100-continue"));
    if expects_continue && length > 0 {
        stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
        stream.flush().await?;
    }

    // Anything after the declared length is ignored; one request per connection.
    let length = length as usize;
    let mut body = buf.split_off(head_end + HEAD_TERMINATOR.len());
    if body.len() > length {
        body.truncate(length);
    } else if body.len() < length {
        let already = body.len();
        body.resize(length, 0);
        stream.read_exact(&mut body[already..]).await?;
    }

    request.body = body;
    Ok(Some(request))
}

type Head = (String, String, Vec<(String, String)>);

fn parse_head(head: &str) -> Result<Head, HttpError> {
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();

    let mut fields = request_line.split_whitespace();
    let (method, target, version) = match (fields.next(), fields.next(), fields.next()) {
        (Some(m), Some(t), Some(v)) => (m, t, v),
        _ => {
            return Err(HttpError::Malformed(format!(
                "invalid request line: {request_line}"
            )))
        }
    };
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::Malformed(format!("unsupported version: {version}")));
    }

    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::Malformed(format!("invalid header line: {line}")))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok((method.to_string(), path, headers))
}
