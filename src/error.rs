//! Error types
//!
//! Every error is `Clone` so it can travel inside [`StreamEvent`]s to any
//! number of observers. I/O errors are shared behind an `Arc` for that reason.
//!
//! [`StreamEvent`]: crate::session::StreamEvent

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Clone)]
pub enum Error {
    /// Output or socket I/O failure
    Io(Arc<io::Error>),
    /// Frame listing or reading failure
    Source(SourceError),
    /// Invalid stream or server configuration
    Config(ConfigError),
    /// Malformed multipart data
    Protocol(ProtocolError),
}

impl Error {
    /// HTTP status this error maps to
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Source(e) => e.status_code(),
            Error::Protocol(_) => StatusCode::BAD_REQUEST,
            Error::Io(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Source(e) => write!(f, "Frame source error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e.as_ref()),
            Error::Source(e) => Some(e),
            Error::Config(e) => Some(e),
            Error::Protocol(e) => Some(e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<SourceError> for Error {
    fn from(e: SourceError) -> Self {
        Error::Source(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

/// Frame source errors
#[derive(Debug, Clone)]
pub enum SourceError {
    /// Directory missing or not listable
    DirectoryRead {
        path: PathBuf,
        source: Arc<io::Error>,
    },
    /// Directory listed fine but holds no frames
    EmptyFrameSet { path: PathBuf },
    /// A single frame could not be read
    FrameRead {
        path: PathBuf,
        source: Arc<io::Error>,
    },
}

impl SourceError {
    pub fn directory_read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SourceError::DirectoryRead {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn frame_read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SourceError::FrameRead {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Startup failures are 404s, mid-stream read failures are 500s
    pub fn status_code(&self) -> StatusCode {
        match self {
            SourceError::DirectoryRead { .. } | SourceError::EmptyFrameSet { .. } => {
                StatusCode::NOT_FOUND
            }
            SourceError::FrameRead { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::DirectoryRead { path, source } => {
                write!(f, "cannot list {}: {}", path.display(), source)
            }
            SourceError::EmptyFrameSet { path } => {
                write!(f, "no frame images found in {}", path.display())
            }
            SourceError::FrameRead { path, source } => {
                write!(f, "cannot read frame {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::DirectoryRead { source, .. } | SourceError::FrameRead { source, .. } => {
                Some(source.as_ref())
            }
            SourceError::EmptyFrameSet { .. } => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Frame rate must be finite and positive
    InvalidFrameRate(f64),
    /// Boundary token is empty
    EmptyBoundary,
    /// Boundary token is too long or contains forbidden characters
    InvalidBoundary(String),
    /// Unrecognized direction name
    InvalidDirection(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidFrameRate(rate) => write!(f, "invalid frame rate: {}", rate),
            ConfigError::EmptyBoundary => write!(f, "boundary must not be empty"),
            ConfigError::InvalidBoundary(b) => write!(f, "invalid boundary: {:?}", b),
            ConfigError::InvalidDirection(d) => {
                write!(f, "invalid direction {:?}, expected forward or reverse", d)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Wire-level errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Part did not start with `--{boundary}`
    MissingBoundary,
    /// Header line could not be parsed
    InvalidHeader(String),
    /// Part headers carried no usable Content-Length
    MissingContentLength,
    /// Part body was not followed by CRLF
    MissingTrailer,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::MissingBoundary => write!(f, "part does not start with boundary"),
            ProtocolError::InvalidHeader(h) => write!(f, "invalid part header: {:?}", h),
            ProtocolError::MissingContentLength => write!(f, "part has no Content-Length"),
            ProtocolError::MissingTrailer => write!(f, "part body not terminated by CRLF"),
        }
    }
}

impl std::error::Error for ProtocolError {}
