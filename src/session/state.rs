//! Session state machine
//!
//! Tracks one MJPEG session from construction to its terminal state. The
//! state is plain data; the async driver in [`super::stream`] decides when
//! each transition happens.

use std::path::PathBuf;
use std::time::{Instant, SystemTime};

use super::config::StreamConfig;
use crate::stats::{FrameInfo, StreamInfo};

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Constructed, `stream` not called yet
    Idle,
    /// Frame listing in progress
    Starting,
    /// Headers written, frames flowing
    Running,
    /// Terminal
    Ended,
}

/// Why a session reached [`SessionPhase::Ended`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Every frame was sent once and looping is off
    Completed,
    /// Ended through the handle, usually a client disconnect
    Cancelled,
    /// The configured time limit elapsed
    TimeLimit,
    /// An error ended the session
    Failed,
}

/// Complete session state
#[derive(Debug)]
pub struct SessionState {
    /// Session ID
    pub id: u64,

    /// Frame directory
    pub directory: PathBuf,

    /// Options, fixed for the life of the session
    pub config: StreamConfig,

    /// Current phase
    pub phase: SessionPhase,

    /// Frame identifiers in play order, fixed once listed
    files: Vec<String>,

    /// Number of ticks that consumed a frame slot (sent or skipped)
    position: u64,

    /// Frames sent
    pub frame_count: u64,

    /// Frame bytes sent
    pub content_bytes: u64,

    /// Start stamps (wall clock for reporting, monotonic for elapsed time)
    started_at: Option<(SystemTime, Instant)>,

    /// End stamps
    ended_at: Option<(SystemTime, Instant)>,

    /// Set once when the session ends
    pub end_reason: Option<EndReason>,
}

impl SessionState {
    /// Create a new idle session state
    pub fn new(id: u64, directory: PathBuf, config: StreamConfig) -> Self {
        Self {
            id,
            directory,
            config,
            phase: SessionPhase::Idle,
            files: Vec::new(),
            position: 0,
            frame_count: 0,
            content_bytes: 0,
            started_at: None,
            ended_at: None,
            end_reason: None,
        }
    }

    /// Leave Idle; returns false if `stream` was already called
    pub fn begin(&mut self) -> bool {
        if self.phase == SessionPhase::Idle {
            self.phase = SessionPhase::Starting;
            true
        } else {
            false
        }
    }

    /// Enter Running with a non-empty listing
    pub fn start(&mut self, files: Vec<String>) {
        debug_assert!(!files.is_empty(), "running session needs frames");
        if self.phase == SessionPhase::Starting {
            self.files = files;
            self.phase = SessionPhase::Running;
            self.started_at = Some((SystemTime::now(), Instant::now()));
        }
    }

    /// Number of listed frames, once listed
    pub fn frames_available(&self) -> Option<usize> {
        if self.files.is_empty() {
            None
        } else {
            Some(self.files.len())
        }
    }

    /// Cursor into the listing
    pub fn frame_index(&self) -> usize {
        if self.files.is_empty() {
            0
        } else {
            (self.position % self.files.len() as u64) as usize
        }
    }

    /// Identifier of the frame the next tick reads
    pub fn current_frame(&self) -> Option<&str> {
        self.files.get(self.frame_index()).map(String::as_str)
    }

    /// Record a sent frame and advance the cursor
    pub fn record_frame(&mut self, size: usize) -> FrameInfo {
        let frame_index = self.frame_index();
        let identifier = self.files.get(frame_index).cloned().unwrap_or_default();

        self.frame_count += 1;
        self.content_bytes += size as u64;
        self.position += 1;

        FrameInfo {
            identifier,
            frame_index,
            frame_count: self.frame_count,
            size,
        }
    }

    /// Advance the cursor past an unreadable frame without counting it
    pub fn skip_frame(&mut self) {
        self.position += 1;
    }

    /// True once the cursor has wrapped back to the first frame
    pub fn pass_complete(&self) -> bool {
        self.position > 0 && self.frame_index() == 0
    }

    /// Move to Ended; returns false if already there
    pub fn finish(&mut self, reason: EndReason) -> bool {
        if self.phase == SessionPhase::Ended {
            return false;
        }

        self.phase = SessionPhase::Ended;
        self.end_reason = Some(reason);
        self.ended_at = Some((SystemTime::now(), Instant::now()));
        true
    }

    /// Take a statistics snapshot
    pub fn info(&self) -> StreamInfo {
        let elapsed = match (self.started_at, self.ended_at) {
            (Some((_, start)), Some((_, end))) => end.saturating_duration_since(start),
            (Some((_, start)), None) => start.elapsed(),
            _ => Default::default(),
        };

        StreamInfo {
            session_id: self.id,
            config: self.config.clone(),
            directory: self.directory.clone(),
            phase: self.phase,
            frames_available: self.frames_available(),
            frame_count: self.frame_count,
            content_bytes: self.content_bytes,
            stream_start: self.started_at.map(|(wall, _)| wall),
            stream_end: self.ended_at.map(|(wall, _)| wall),
            elapsed,
            end_reason: self.end_reason,
        }
    }
}
