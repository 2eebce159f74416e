//! Download header sent ahead of a shared file.
//!
//! # Wire Format
//!
//! A downloader connects to the share port over plain TCP and receives:
//!
//! ```text
//! Filename: <name>\n
//! <raw file bytes until the server closes the connection>
//! ```
//!
//! There is no length prefix and no handshake; connection close marks the
//! end of the file.

use crate::error::{ProtocolError, Result};

/// Prefix of the header line.
pub const FILENAME_PREFIX: &str = "Filename: ";

/// Maximum header line length, including the terminating newline.
pub const MAX_HEADER_LEN: usize = 4096;

/// Encode the header line for a file called `name`.
pub fn encode_header(name: &str) -> Vec<u8> {
    let mut header = Vec::with_capacity(FILENAME_PREFIX.len() + name.len() + 1);
    header.extend_from_slice(FILENAME_PREFIX.as_bytes());
    header.extend_from_slice(name.as_bytes());
    header.push(b'\n');
    header
}

/// Try to decode the header from the start of `data`.
///
/// Returns `Ok(None)` if the newline has not arrived yet, otherwise the
/// filename and the number of bytes consumed. Everything after the consumed
/// bytes is file content.
pub fn decode_header(data: &[u8]) -> Result<Option<(String, usize)>> {
    let Some(newline) = data.iter().take(MAX_HEADER_LEN).position(|b| *b == b'\n') else {
        if data.len() >= MAX_HEADER_LEN {
            return Err(ProtocolError::HeaderTooLong {
                max: MAX_HEADER_LEN,
            });
        }
        return Ok(None);
    };

    let line = &data[..newline];
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let name = line
        .strip_prefix(FILENAME_PREFIX.as_bytes())
        .ok_or_else(|| {
            ProtocolError::InvalidHeader(format!(
                "expected line starting with {:?}",
                FILENAME_PREFIX
            ))
        })?;

    let name = std::str::from_utf8(name)
        .map_err(|e| ProtocolError::InvalidHeader(format!("filename is not valid UTF-8: {}", e)))?;

    if name.is_empty() {
        return Err(ProtocolError::InvalidHeader("empty filename".to_string()));
    }

    Ok(Some((name.to_string(), newline + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_header() {
        assert_eq!(encode_header("x"), b"Filename: x\n");
    }

    #[test]
    fn test_decode_header_with_trailing_content() {
        let mut data = encode_header("report.pdf");
        data.extend_from_slice(&[0x00, 0xFF]);

        let (name, consumed) = decode_header(&data).unwrap().unwrap();

        assert_eq!(name, "report.pdf");
        assert_eq!(&data[consumed..], &[0x00, 0xFF]);
    }

    #[test]
    fn test_decode_header_partial() {
        assert_eq!(decode_header(b"Filename: rep").unwrap(), None);
        assert_eq!(decode_header(b"").unwrap(), None);
    }

    #[test]
    fn test_decode_header_tolerates_crlf() {
        let (name, consumed) = decode_header(b"Filename: a.txt\r\nbody").unwrap().unwrap();
        assert_eq!(name, "a.txt");
        assert_eq!(consumed, 17);
    }

    #[test]
    fn test_decode_header_wrong_prefix() {
        assert!(matches!(
            decode_header(b"HTTP/1.1 200 OK\n"),
            Err(ProtocolError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_decode_header_empty_name() {
        assert!(matches!(
            decode_header(b"Filename: \n"),
            Err(ProtocolError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_decode_header_invalid_utf8() {
        assert!(matches!(
            decode_header(b"Filename: \xFF\xFE\n"),
            Err(ProtocolError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_decode_header_too_long() {
        let data = vec![b'a'; MAX_HEADER_LEN + 10];
        assert_eq!(
            decode_header(&data),
            Err(ProtocolError::HeaderTooLong { max: MAX_HEADER_LEN })
        );
    }

    #[test]
    fn test_decode_header_utf8_name() {
        let data = encode_header("日本語.txt");
        let (name, consumed) = decode_header(&data).unwrap().unwrap();
        assert_eq!(name, "日本語.txt");
        assert_eq!(consumed, data.len());
    }
}
