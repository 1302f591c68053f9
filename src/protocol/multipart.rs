//! Multipart part encoding and decoding
//!
//! [`encode_part`] builds one complete part in a single buffer so the session
//! can hand it to the output with one write call. [`decode_part`] is the
//! incremental inverse used by clients: it returns `Ok(None)` until a whole
//! part is buffered.

use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, PRAGMA};
use axum::http::{HeaderMap, HeaderValue};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::{CRLF, FRAME_CONTENT_TYPE, MULTIPART_MIXED_REPLACE};
use crate::error::{ConfigError, ProtocolError};

/// Upper bound on the header block of a single part when decoding
const MAX_PART_HEADER_SIZE: usize = 4096;

/// Response `Content-Type` for a stream using `boundary`
pub fn content_type(boundary: &str) -> String {
    format!("{}; boundary={}", MULTIPART_MIXED_REPLACE, boundary)
}

/// Response headers sent once before the first part
pub fn stream_headers(boundary: &str) -> Result<HeaderMap, ConfigError> {
    let content_type = HeaderValue::from_str(&content_type(boundary))
        .map_err(|_| ConfigError::InvalidBoundary(boundary.to_string()))?;

    let mut headers = HeaderMap::with_capacity(4);
    headers.insert(CONTENT_TYPE, content_type);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    Ok(headers)
}

/// Encode one frame as a multipart part
pub fn encode_part(boundary: &str, frame: &[u8]) -> Bytes {
    let length = frame.len().to_string();
    let mut buf = BytesMut::with_capacity(
        boundary.len() + length.len() + frame.len() + FRAME_CONTENT_TYPE.len() + 48,
    );

    buf.put_slice(b"--");
    buf.put_slice(boundary.as_bytes());
    buf.put_slice(CRLF);

    buf.put_slice(b"Content-Type: ");
    buf.put_slice(FRAME_CONTENT_TYPE.as_bytes());
    buf.put_slice(CRLF);

    buf.put_slice(b"Content-Length: ");
    buf.put_slice(length.as_bytes());
    buf.put_slice(CRLF);

    buf.put_slice(CRLF);
    buf.put_slice(frame);
    buf.put_slice(CRLF);

    buf.freeze()
}

/// Decode the next part from `buf`
///
/// On success the part is consumed from `buf` and its body returned. If `buf`
/// does not yet hold a complete part, nothing is consumed and `Ok(None)` is
/// returned.
pub fn decode_part(buf: &mut Bytes, boundary: &str) -> Result<Option<Bytes>, ProtocolError> {
    let delimiter_len = 2 + boundary.len() + CRLF.len();
    if buf.len() < delimiter_len {
        // Reject early if what we have already disagrees with the delimiter
        let expected = format!("--{}\r\n", boundary);
        if !expected.as_bytes().starts_with(&buf[..]) {
            return Err(ProtocolError::MissingBoundary);
        }
        return Ok(None);
    }

    if &buf[..2] != b"--"
        || &buf[2..2 + boundary.len()] != boundary.as_bytes()
        || &buf[2 + boundary.len()..delimiter_len] != CRLF
    {
        return Err(ProtocolError::MissingBoundary);
    }

    let header_end = match find_header_end(&buf[delimiter_len..]) {
        Some(pos) => delimiter_len + pos,
        None => {
            if buf.len() - delimiter_len > MAX_PART_HEADER_SIZE {
                return Err(ProtocolError::InvalidHeader("header block too large".into()));
            }
            return Ok(None);
        }
    };

    let content_length = parse_content_length(&buf[delimiter_len..header_end])?;

    // Header block ends with an empty line
    let body_start = header_end + 4;
    let part_end = body_start
        .checked_add(content_length)
        .and_then(|end| end.checked_add(CRLF.len()))
        .ok_or_else(|| {
            ProtocolError::InvalidHeader(format!("Content-Length: {}", content_length))
        })?;
    if buf.len() < part_end {
        return Ok(None);
    }
    let body_end = part_end - CRLF.len();
    if &buf[body_end..part_end] != CRLF {
        return Err(ProtocolError::MissingTrailer);
    }

    buf.advance(body_start);
    let body = buf.split_to(content_length);
    buf.advance(CRLF.len());

    Ok(Some(body))
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_content_length(headers: &[u8]) -> Result<usize, ProtocolError> {
    let text = std::str::from_utf8(headers)
        .map_err(|_| ProtocolError::InvalidHeader("non UTF-8 header".into()))?;

    for line in text.split("\r\n") {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::InvalidHeader(line.to_string()))?;

        if name.trim().eq_ignore_ascii_case("content-length") {
            return value
                .trim()
                .parse::<usize>()
                .map_err(|_| ProtocolError::InvalidHeader(line.to_string()));
        }
    }

    Err(ProtocolError::MissingContentLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_part_layout() {
        let part = encode_part("frame", b"\xFF\xD8\xFF");

        let mut expected = Vec::new();
        expected.extend_from_slice(b"--frame\r\n");
        expected.extend_from_slice(b"Content-Type: image/jpeg\r\n");
        expected.extend_from_slice(b"Content-Length: 3\r\n");
        expected.extend_from_slice(b"\r\n");
        expected.extend_from_slice(b"\xFF\xD8\xFF");
        expected.extend_from_slice(b"\r\n");

        assert_eq!(&part[..], &expected[..]);
    }

    #[test]
    fn test_encode_empty_frame() {
        let part = encode_part("b", b"");
        assert_eq!(
            &part[..],
            b"--b\r\nContent-Type: image/jpeg\r\nContent-Length: 0\r\n\r\n\r\n"
        );
    }

    #[test]
    fn test_frame_content_is_not_escaped() {
        // Frame bytes containing the delimiter go out untouched
        let part = encode_part("x", b"--x\r\n");
        assert!(part.ends_with(b"\r\n\r\n--x\r\n\r\n"));
    }

    #[test]
    fn test_content_type() {
        assert_eq!(
            content_type("mjpeg-frame-boundary"),
            "multipart/x-mixed-replace; boundary=mjpeg-frame-boundary"
        );
    }

    #[test]
    fn test_stream_headers() {
        let headers = stream_headers("abc").unwrap();
        assert_eq!(headers.len(), 4);
        assert_eq!(
            headers[CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=abc"
        );
        assert_eq!(headers[CACHE_CONTROL], "no-cache");
        assert_eq!(headers[CONNECTION], "close");
        assert_eq!(headers[PRAGMA], "no-cache");
    }

    #[test]
    fn test_stream_headers_reject_unencodable_boundary() {
        assert!(matches!(
            stream_headers("a\nb"),
            Err(ConfigError::InvalidBoundary(_))
        ));
    }

    #[test]
    fn test_decode_consecutive_parts() {
        let mut stream = BytesMut::new();
        stream.put(encode_part("b", b"first"));
        stream.put(encode_part("b", b"second frame"));
        let mut buf = stream.freeze();

        let first = decode_part(&mut buf, "b").unwrap().unwrap();
        assert_eq!(&first[..], b"first");

        let second = decode_part(&mut buf, "b").unwrap().unwrap();
        assert_eq!(&second[..], b"second frame");

        assert!(buf.is_empty());
        assert!(decode_part(&mut buf, "b").unwrap().is_none());
    }

    #[test]
    fn test_decode_incomplete_part() {
        let part = encode_part("b", b"0123456789");

        for cut in [1, 4, 20, part.len() - 1] {
            let mut partial = part.slice(..cut);
            let result = decode_part(&mut partial, "b").unwrap();
            assert!(result.is_none(), "cut at {}", cut);
            assert_eq!(partial.len(), cut, "nothing consumed at {}", cut);
        }
    }

    #[test]
    fn test_decode_wrong_boundary() {
        let mut buf = encode_part("one", b"data");
        assert_eq!(
            decode_part(&mut buf, "two"),
            Err(ProtocolError::MissingBoundary)
        );
    }

    #[test]
    fn test_decode_missing_content_length() {
        let mut buf = Bytes::from_static(b"--b\r\nContent-Type: image/jpeg\r\n\r\nabc\r\n");
        assert_eq!(
            decode_part(&mut buf, "b"),
            Err(ProtocolError::MissingContentLength)
        );
    }

    #[test]
    fn test_decode_bad_trailer() {
        let mut buf = Bytes::from_static(b"--b\r\nContent-Length: 3\r\n\r\nabcXX");
        assert_eq!(decode_part(&mut buf, "b"), Err(ProtocolError::MissingTrailer));
    }

    #[test]
    fn test_decode_huge_content_length() {
        let mut buf = Bytes::from_static(
            b"--b\r\nContent-Length: 18446744073709551615\r\n\r\nabc\r\n",
        );
        let result = decode_part(&mut buf, "b");
        assert!(
            matches!(result, Err(ProtocolError::InvalidHeader(_))),
            "got {:?}",
            result
        );
    }

    #[test]
    fn test_decode_case_insensitive_header() {
        let mut buf = Bytes::from_static(b"--b\r\ncontent-length: 2\r\n\r\nok\r\n");
        let body = decode_part(&mut buf, "b").unwrap().unwrap();
        assert_eq!(&body[..], b"ok");
    }
}
