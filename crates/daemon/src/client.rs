//! Downloader for one-shot shares.
//!
//! Connects to a share port, reads the `Filename:` header line, then
//! treats every remaining byte up to end-of-stream as file content.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use protocol::header::decode_header;
use protocol::ProtocolError;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use crate::staging::sanitize_filename;

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK: usize = 4096;

/// Errors that can occur while fetching a share.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The share port could not be reached.
    #[error("failed to connect to share: {0}")]
    Connect(#[source] io::Error),

    /// The connection attempt timed out.
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    /// The stream ended before a complete header line arrived.
    #[error("connection closed before the filename header")]
    MissingHeader,

    /// The header line was invalid.
    #[error("invalid header: {0}")]
    Protocol(#[from] ProtocolError),

    /// Socket or disk error while receiving content.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A file received from a share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    /// Name announced by the sender.
    pub filename: String,
    /// Where the content was written.
    pub path: PathBuf,
    /// Number of content bytes received.
    pub bytes: u64,
}

/// Download a share into `output_dir`, named after the announced filename.
///
/// The announced name is reduced to a single path component before use.
pub async fn fetch<A: ToSocketAddrs>(addr: A, output_dir: &Path) -> Result<FetchedFile, FetchError> {
    let mut stream = connect(addr).await?;
    let (filename, leftover) = read_header(&mut stream).await?;

    let path = output_dir.join(sanitize_filename(&filename));
    let mut file = File::create(&path).await?;
    let bytes = copy_content(&leftover, &mut stream, &mut file).await?;

    info!(filename = %filename, path = ?path, bytes, "Fetched share");

    Ok(FetchedFile {
        filename,
        path,
        bytes,
    })
}

/// Read a share from `reader` into `writer`.
///
/// Returns the announced filename and the number of content bytes written.
pub async fn fetch_to_writer<R, W>(reader: &mut R, writer: &mut W) -> Result<(String, u64), FetchError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (filename, leftover) = read_header(reader).await?;
    let bytes = copy_content(&leftover, reader, writer).await?;
    Ok((filename, bytes))
}

async fn connect<A: ToSocketAddrs>(addr: A) -> Result<TcpStream, FetchError> {
    tokio::time::timeout(DEFAULT_CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| FetchError::Timeout(DEFAULT_CONNECT_TIMEOUT))?
        .map_err(FetchError::Connect)
}

/// Read until the header line is complete.
///
/// Returns the filename and any content bytes read past the header.
async fn read_header<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(String, Vec<u8>), FetchError> {
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        if let Some((filename, consumed)) = decode_header(&buf)? {
            debug!(filename = %filename, "Received header");
            return Ok((filename, buf.split_off(consumed)));
        }

        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(FetchError::MissingHeader);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn copy_content<R, W>(leftover: &[u8], reader: &mut R, writer: &mut W) -> Result<u64, FetchError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(leftover).await?;
    let rest = tokio::io::copy(reader, writer).await?;
    writer.flush().await?;
    Ok(leftover.len() as u64 + rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::header::encode_header;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    fn framed(name: &str, content: &[u8]) -> Vec<u8> {
        let mut data = encode_header(name);
        data.extend_from_slice(content);
        data
    }

    #[tokio::test]
    async fn test_fetch_to_writer() {
        let data = framed("a.txt", b"hello\nworld");
        let mut reader = &data[..];
        let mut out = Vec::new();

        let (name, bytes) = fetch_to_writer(&mut reader, &mut out).await.unwrap();

        assert_eq!(name, "a.txt");
        assert_eq!(bytes, 11);
        assert_eq!(out, b"hello\nworld");
    }

    #[tokio::test]
    async fn test_fetch_to_writer_empty_content() {
        let data = framed("empty.txt", b"");
        let mut reader = &data[..];
        let mut out = Vec::new();

        let (name, bytes) = fetch_to_writer(&mut reader, &mut out).await.unwrap();

        assert_eq!(name, "empty.txt");
        assert_eq!(bytes, 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_header_split_across_reads() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tokio::spawn(async move {
            tx.write_all(b"Filen").await.unwrap();
            tx.flush().await.unwrap();
            tokio::task::yield_now().await;
            tx.write_all(b"ame: slow.bin\n\x00\x01").await.unwrap();
        });

        let mut out = Vec::new();
        let (name, bytes) = fetch_to_writer(&mut rx, &mut out).await.unwrap();

        assert_eq!(name, "slow.bin");
        assert_eq!(bytes, 2);
        assert_eq!(out, [0x00, 0x01]);
    }

    #[tokio::test]
    async fn test_missing_header() {
        let mut reader = &b"Filename: cut-off"[..];
        let mut out = Vec::new();

        let result = fetch_to_writer(&mut reader, &mut out).await;
        assert!(matches!(result, Err(FetchError::MissingHeader)));
    }

    #[tokio::test]
    async fn test_bad_header() {
        let mut reader = &b"Name: x\ncontent"[..];
        let mut out = Vec::new();

        let result = fetch_to_writer(&mut reader, &mut out).await;
        assert!(matches!(result, Err(FetchError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_fetch_writes_into_output_dir() {
        let temp_dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&framed("../../evil.txt", b"payload")).await.unwrap();
        });

        let fetched = fetch(addr, temp_dir.path()).await.unwrap();

        assert_eq!(fetched.filename, "../../evil.txt");
        assert_eq!(fetched.path, temp_dir.path().join("evil.txt"));
        assert_eq!(fetched.bytes, 7);
        assert_eq!(std::fs::read(&fetched.path).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let temp_dir = TempDir::new().unwrap();
        let result = fetch(addr, temp_dir.path()).await;
        assert!(matches!(result, Err(FetchError::Connect(_))));
    }
}
