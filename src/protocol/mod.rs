//! MJPEG wire protocol
//!
//! An MJPEG stream is a single HTTP response whose body is an endless
//! `multipart/x-mixed-replace` document. Each part carries one JPEG frame and
//! replaces the previous one on the client:
//!
//! ```text
//! --{boundary}\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: {len}\r\n
//! \r\n
//! {frame bytes}\r\n
//! ```
//!
//! No closing boundary is ever sent; the stream ends when the connection
//! closes.

pub mod multipart;

pub use multipart::{content_type, decode_part, encode_part, stream_headers};

/// Constants shared by the encoder and the HTTP layer
pub mod constants {
    /// Boundary used when none is configured
    pub const DEFAULT_BOUNDARY: &str = "mjpeg-frame-boundary";

    /// Longest boundary allowed by RFC 2046
    pub const MAX_BOUNDARY_LEN: usize = 70;

    /// Content type of every part
    pub const FRAME_CONTENT_TYPE: &str = "image/jpeg";

    /// Response content type prefix
    pub const MULTIPART_MIXED_REPLACE: &str = "multipart/x-mixed-replace";

    pub const CRLF: &[u8] = b"\r\n";
}
