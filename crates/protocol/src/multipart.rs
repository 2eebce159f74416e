//! Byte-level extraction of file parts from `multipart/form-data` bodies.
//!
//! # Body Layout
//!
//! ```text
//! [preamble CRLF] --boundary CRLF
//! headers CRLF CRLF
//! content
//! CRLF --boundary CRLF
//! headers CRLF CRLF
//! content
//! CRLF --boundary-- [epilogue]
//! ```
//!
//! All delimiter searches run on raw bytes. Only the header block of a part
//! is ever decoded as text, so binary file content passes through untouched.
//!
//! Extraction is infallible: a part without a header/body separator, or
//! without a `filename="..."` attribute, is skipped and scanning resumes at
//! the next delimiter.

use crate::error::{ProtocolError, Result};

/// Content type reported for parts that carry no `Content-Type` header.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Maximum boundary length permitted by RFC 2046.
pub const MAX_BOUNDARY_LEN: usize = 70;

const CRLF: &[u8] = b"\r\n";

/// Separator between a part's headers and its content.
const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Marker preceding a quoted filename inside a header line (matched case-insensitively).
const FILENAME_MARKER: &str = "filename=\"";

/// A file payload extracted from a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPart {
    /// Filename as sent by the client. Never empty.
    pub filename: String,
    /// Declared content type, or [`DEFAULT_CONTENT_TYPE`].
    pub content_type: String,
    /// Raw content bytes, exactly as they appeared on the wire.
    pub content: Vec<u8>,
}

/// Find the first occurrence of `needle` in `haystack` at or after `from`.
pub fn find_subsequence(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    if needle.is_empty() {
        return Some(from);
    }

    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

/// Extract every file part from `body`, in order of appearance.
///
/// Form fields without a filename and malformed parts are skipped. An empty
/// result means the request contained no files.
pub fn extract(body: &[u8], boundary: &str) -> Vec<MultipartPart> {
    let mut parts = Vec::new();
    if boundary.is_empty() {
        return parts;
    }

    let dash_boundary = format!("--{boundary}").into_bytes();
    let delimiter = [CRLF, dash_boundary.as_slice()].concat();

    // The first delimiter may open the body directly or follow a preamble.
    let mut cursor = if body.starts_with(&dash_boundary) {
        dash_boundary.len()
    } else {
        match find_subsequence(body, &delimiter, 0) {
            Some(pos) => pos + delimiter.len(),
            None => return parts,
        }
    };

    loop {
        let rest = &body[cursor..];

        // "--boundary--" closes the body.
        if rest.starts_with(b"--") {
            break;
        }

        let start = cursor + skip_delimiter_line(rest);

        // A part without a closing delimiter is truncated; nothing follows it.
        let Some(end) = find_subsequence(body, &delimiter, start) else {
            break;
        };

        if let Some(part) = parse_part(&body[start..end]) {
            parts.push(part);
        }

        cursor = end + delimiter.len();
    }

    parts
}

/// Number of bytes between the end of a delimiter and the start of the part:
/// optional transport padding followed by CRLF.
fn skip_delimiter_line(rest: &[u8]) -> usize {
    let padding = rest
        .iter()
        .take_while(|b| **b == b' ' || **b == b'\t')
        .count();

    if rest[padding..].starts_with(CRLF) {
        padding + CRLF.len()
    } else {
        padding
    }
}

/// Parse one part (headers, separator and content, delimiters excluded).
fn parse_part(raw: &[u8]) -> Option<MultipartPart> {
    let separator = find_subsequence(raw, HEADER_SEPARATOR, 0)?;
    let headers = String::from_utf8_lossy(&raw[..separator]);

    let mut filename = None;
    let mut content_type = None;

    for line in headers.split("\r\n") {
        if filename.is_none() {
            filename = quoted_filename(line);
        }
        if let Some(value) = header_value(line, "content-type") {
            let value = value.trim();
            if !value.is_empty() {
                content_type = Some(value.to_string());
            }
        }
    }

    Some(MultipartPart {
        filename: filename?,
        content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        content: raw[separator + HEADER_SEPARATOR.len()..].to_vec(),
    })
}

/// Value of the first `filename="..."` attribute in a header line.
fn quoted_filename(line: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets valid for the original line.
    let start = line.to_ascii_lowercase().find(FILENAME_MARKER)? + FILENAME_MARKER.len();
    let len = line[start..].find('"')?;

    let name = &line[start..start + len];
    (!name.is_empty()).then(|| name.to_string())
}

/// Value of a header line if its name matches `name` case-insensitively.
fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    key.trim().eq_ignore_ascii_case(name).then_some(value)
}

/// Extract the boundary from a request `Content-Type` value.
///
/// Accepts quoted or bare boundaries and ignores any parameters before or
/// after `boundary=`.
pub fn boundary_from_content_type(value: &str) -> Result<String> {
    let mut params = value.split(';');
    let media_type = params.next().unwrap_or_default().trim();

    if !media_type.eq_ignore_ascii_case("multipart/form-data") {
        return Err(ProtocolError::UnsupportedContentType(media_type.to_string()));
    }

    for param in params {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("boundary") {
            continue;
        }

        let raw = raw.trim();
        let boundary = raw
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(raw);

        if boundary.is_empty() {
            return Err(ProtocolError::MissingBoundary);
        }
        if boundary.len() > MAX_BOUNDARY_LEN {
            return Err(ProtocolError::BoundaryTooLong {
                len: boundary.len(),
                max: MAX_BOUNDARY_LEN,
            });
        }

        return Ok(boundary.to_string());
    }

    Err(ProtocolError::MissingBoundary)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a well-formed body from `(headers, content)` pairs.
    fn build_body(boundary: &str, parts: &[(&str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (headers, content) in parts {
            body.extend_from_slice(format!("--{boundary}\r\n{headers}\r\n\r\n").as_bytes());
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        body
    }

    fn file_headers(name: &str, content_type: &str) -> String {
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: {content_type}"
        )
    }

    #[test]
    fn test_find_subsequence() {
        assert_eq!(find_subsequence(b"abcabc", b"bc", 0), Some(1));
        assert_eq!(find_subsequence(b"abcabc", b"bc", 2), Some(4));
        assert_eq!(find_subsequence(b"abcabc", b"xy", 0), None);
        assert_eq!(find_subsequence(b"ab", b"abc", 0), None);
        assert_eq!(find_subsequence(b"abc", b"c", 3), None);
        assert_eq!(find_subsequence(b"abc", b"c", 10), None);
    }

    #[test]
    fn test_extract_single_text_part() {
        let body = build_body("XYZ", &[(&file_headers("a.txt", "text/plain"), b"hello")]);

        let parts = extract(&body, "XYZ");

        assert_eq!(
            parts,
            vec![MultipartPart {
                filename: "a.txt".to_string(),
                content_type: "text/plain".to_string(),
                content: b"hello".to_vec(),
            }]
        );
    }

    #[test]
    fn test_extract_two_parts_preserves_binary() {
        let body = build_body(
            "XYZ",
            &[
                (&file_headers("a.txt", "text/plain"), b"hello"),
                (
                    &file_headers("b.bin", "application/octet-stream"),
                    &[0x00, 0xFF, 0x10],
                ),
            ],
        );

        let parts = extract(&body, "XYZ");

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].filename, "a.txt");
        assert_eq!(parts[0].content, b"hello");
        assert_eq!(parts[1].filename, "b.bin");
        assert_eq!(parts[1].content, vec![0x00, 0xFF, 0x10]);
    }

    #[test]
    fn test_extract_no_filename_yields_nothing() {
        let body = build_body(
            "XYZ",
            &[
                ("Content-Disposition: form-data; name=\"title\"", b"my upload"),
                ("Content-Disposition: form-data; name=\"tags\"", b"a,b"),
            ],
        );

        assert!(extract(&body, "XYZ").is_empty());
    }

    #[test]
    fn test_extract_skips_form_fields_between_files() {
        let body = build_body(
            "sep",
            &[
                (&file_headers("one.txt", "text/plain"), b"1"),
                ("Content-Disposition: form-data; name=\"comment\"", b"ignored"),
                (&file_headers("two.txt", "text/plain"), b"2"),
            ],
        );

        let names: Vec<_> = extract(&body, "sep")
            .into_iter()
            .map(|p| p.filename)
            .collect();
        assert_eq!(names, vec!["one.txt", "two.txt"]);
    }

    #[test]
    fn test_extract_default_content_type() {
        let body = build_body(
            "XYZ",
            &[(
                "Content-Disposition: form-data; name=\"file\"; filename=\"raw\"",
                b"data",
            )],
        );

        let parts = extract(&body, "XYZ");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content_type, DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_extract_trims_content_type() {
        let body = build_body(
            "XYZ",
            &[(
                "Content-Disposition: form-data; filename=\"a.csv\"\r\ncontent-type:   text/csv  ",
                b"x,y",
            )],
        );

        assert_eq!(extract(&body, "XYZ")[0].content_type, "text/csv");
    }

    #[test]
    fn test_extract_empty_filename_is_skipped() {
        let body = build_body(
            "XYZ",
            &[("Content-Disposition: form-data; name=\"file\"; filename=\"\"", b"")],
        );

        assert!(extract(&body, "XYZ").is_empty());
    }

    #[test]
    fn test_extract_skips_part_without_separator() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--B\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; filename=\"good1\"\r\n\r\nfirst\r\n");
        body.extend_from_slice(b"--B\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; filename=\"broken\"\r\n");
        body.extend_from_slice(b"--B\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; filename=\"good2\"\r\n\r\nsecond\r\n");
        body.extend_from_slice(b"--B--\r\n");

        let parts = extract(&body, "B");

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].filename, "good1");
        assert_eq!(parts[0].content, b"first");
        assert_eq!(parts[1].filename, "good2");
        assert_eq!(parts[1].content, b"second");
    }

    #[test]
    fn test_extract_drops_unterminated_trailing_part() {
        let mut body = build_body("B", &[(&file_headers("kept.txt", "text/plain"), b"ok")]);
        // Replace the close delimiter with an unterminated part.
        body.truncate(body.len() - b"--B--\r\n".len());
        body.extend_from_slice(b"--B\r\nContent-Disposition: form-data; filename=\"cut.txt\"\r\n\r\npartial");

        let parts = extract(&body, "B");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].filename, "kept.txt");
    }

    #[test]
    fn test_extract_with_preamble_and_epilogue() {
        let mut body = b"This is the preamble.\r\n".to_vec();
        body.extend_from_slice(&build_body(
            "XYZ",
            &[(&file_headers("a.txt", "text/plain"), b"hello")],
        ));
        body.extend_from_slice(b"epilogue text");

        let parts = extract(&body, "XYZ");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content, b"hello");
    }

    #[test]
    fn test_extract_tolerates_transport_padding() {
        let body = b"--B  \r\nContent-Disposition: form-data; filename=\"p.txt\"\r\n\r\npadded\r\n--B--".to_vec();

        let parts = extract(&body, "B");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content, b"padded");
    }

    #[test]
    fn test_extract_content_containing_crlf_sequences() {
        let content = b"line1\r\n\r\nline2\r\n--not-the-boundary\r\n";
        let body = build_body("XYZ", &[(&file_headers("t.txt", "text/plain"), content)]);

        let parts = extract(&body, "XYZ");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content, content);
    }

    #[test]
    fn test_extract_every_byte_value_survives() {
        let content: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let body = build_body(
            "----WebKitFormBoundary7MA4YWxkTrZu0gW",
            &[(&file_headers("all.bin", "application/octet-stream"), &content)],
        );

        let parts = extract(&body, "----WebKitFormBoundary7MA4YWxkTrZu0gW");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content, content);
    }

    #[test]
    fn test_extract_empty_content() {
        let body = build_body("XYZ", &[(&file_headers("empty.txt", "text/plain"), b"")]);

        let parts = extract(&body, "XYZ");
        assert_eq!(parts.len(), 1);
        assert!(parts[0].content.is_empty());
    }

    #[test]
    fn test_extract_utf8_filename() {
        let body = build_body("XYZ", &[(&file_headers("résumé.pdf", "application/pdf"), b"%PDF")]);

        assert_eq!(extract(&body, "XYZ")[0].filename, "résumé.pdf");
    }

    #[test]
    fn test_extract_wrong_boundary_or_empty_body() {
        let body = build_body("XYZ", &[(&file_headers("a.txt", "text/plain"), b"hello")]);

        assert!(extract(&body, "OTHER").is_empty());
        assert!(extract(&body, "").is_empty());
        assert!(extract(b"", "XYZ").is_empty());
    }

    #[test]
    fn test_boundary_bare() {
        let boundary =
            boundary_from_content_type("multipart/form-data; boundary=----abc123").unwrap();
        assert_eq!(boundary, "----abc123");
    }

    #[test]
    fn test_boundary_quoted_with_trailing_params() {
        let boundary = boundary_from_content_type(
            "Multipart/Form-Data; charset=utf-8; BOUNDARY=\"xyz 42\"; foo=bar",
        )
        .unwrap();
        assert_eq!(boundary, "xyz 42");
    }

    #[test]
    fn test_boundary_rejects_other_media_types() {
        assert_eq!(
            boundary_from_content_type("application/json"),
            Err(ProtocolError::UnsupportedContentType(
                "application/json".to_string()
            ))
        );
    }

    #[test]
    fn test_boundary_missing_or_empty() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data"),
            Err(ProtocolError::MissingBoundary)
        );
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=\"\""),
            Err(ProtocolError::MissingBoundary)
        );
    }

    #[test]
    fn test_boundary_too_long() {
        let value = format!("multipart/form-data; boundary={}", "a".repeat(71));
        assert!(matches!(
            boundary_from_content_type(&value),
            Err(ProtocolError::BoundaryTooLong { len: 71, .. })
        ));
    }
}
