//! Frame sources
//!
//! A frame source lists the frame identifiers found in a directory and reads
//! their bytes on demand. Sources are stateless and shared by every session
//! behind an `Arc`, so implementations take `&self` only.

pub mod directory;

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::{ConfigError, SourceError};

pub use directory::DirectorySource;

/// Listing order for frame identifiers
///
/// `Forward` plays the listing in *descending* lexicographic order, `Reverse`
/// in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    /// Sort identifiers in place according to this direction
    pub fn sort(&self, names: &mut [String]) {
        match self {
            Direction::Forward => names.sort_unstable_by(|a, b| b.cmp(a)),
            Direction::Reverse => names.sort_unstable(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(Direction::Forward),
            "reverse" => Ok(Direction::Reverse),
            _ => Err(ConfigError::InvalidDirection(s.to_string())),
        }
    }
}

/// Supplies frame listings and frame bytes to a session
pub trait FrameSource: Send + Sync + 'static {
    /// List frame identifiers in `directory`, ordered by `direction`
    fn list_frames(
        &self,
        directory: &Path,
        direction: Direction,
    ) -> impl Future<Output = Result<Vec<String>, SourceError>> + Send;

    /// Read the bytes of one frame
    fn read_frame(
        &self,
        directory: &Path,
        identifier: &str,
    ) -> impl Future<Output = Result<Bytes, SourceError>> + Send;
}
