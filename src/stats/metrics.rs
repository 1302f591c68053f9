//! Statistics snapshots for MJPEG sessions

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::session::config::StreamConfig;
use crate::session::state::{EndReason, SessionPhase};

/// Point-in-time view of a session, attached to every lifecycle event
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Session ID assigned by the host (0 when unset)
    pub session_id: u64,
    /// Options the session runs with
    pub config: StreamConfig,
    /// Frame directory
    pub directory: PathBuf,
    /// Lifecycle phase at snapshot time
    pub phase: SessionPhase,
    /// Number of frames in the listing, once listed
    pub frames_available: Option<usize>,
    /// Frames sent so far
    pub frame_count: u64,
    /// Frame bytes sent so far (multipart framing excluded)
    pub content_bytes: u64,
    /// Wall-clock time the first frame was scheduled
    pub stream_start: Option<SystemTime>,
    /// Wall-clock time the session ended
    pub stream_end: Option<SystemTime>,
    /// Time between start and end, or start and now while running
    pub elapsed: Duration,
    /// Why the session ended
    pub end_reason: Option<EndReason>,
}

impl StreamInfo {
    /// Elapsed streaming time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed.as_millis()
    }

    /// Achieved frames per second
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frame_count as f64 / secs
        } else {
            0.0
        }
    }
}

/// Per-frame record carried by `frame` events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    /// Frame identifier (file name)
    pub identifier: String,
    /// Cursor position the frame was read from
    pub frame_index: usize,
    /// Frames sent including this one
    pub frame_count: u64,
    /// Frame size in bytes
    pub size: usize,
}
