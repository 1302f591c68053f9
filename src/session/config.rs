//! Stream configuration

use std::time::Duration;

use crate::error::ConfigError;
use crate::protocol::constants::{DEFAULT_BOUNDARY, MAX_BOUNDARY_LEN};
use crate::source::Direction;

/// What a session does when a frame cannot be read mid-stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadErrorPolicy {
    /// Report the error and stop ticking; the session stays running until
    /// cancelled or the time limit fires
    Stall,
    /// Report the error, move past the frame and keep the schedule
    Skip,
    /// Report the error and end the session with it
    #[default]
    End,
}

/// Per-session streaming options
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Frames per second
    pub frame_rate: f64,

    /// Multipart boundary token
    pub boundary: String,

    /// Maximum session duration (zero = unbounded)
    pub time_limit: Duration,

    /// Start over from the first frame after the last one
    pub loop_frames: bool,

    /// Ordering of the frame listing
    pub direction: Direction,

    /// Mid-stream frame read failure handling
    pub on_read_error: ReadErrorPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_rate: 10.0,
            boundary: DEFAULT_BOUNDARY.to_string(),
            time_limit: Duration::ZERO, // Unbounded
            loop_frames: true,
            direction: Direction::Forward,
            on_read_error: ReadErrorPolicy::End,
        }
    }
}

impl StreamConfig {
    /// Set the frame rate
    pub fn frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = fps;
        self
    }

    /// Set the multipart boundary
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = boundary.into();
        self
    }

    /// Set the session time limit
    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    /// Enable or disable looping
    pub fn loop_frames(mut self, enabled: bool) -> Self {
        self.loop_frames = enabled;
        self
    }

    /// Set the listing direction
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Set the read failure policy
    pub fn on_read_error(mut self, policy: ReadErrorPolicy) -> Self {
        self.on_read_error = policy;
        self
    }

    /// Delay between the end of one tick and the start of the next
    pub fn frame_delay(&self) -> Duration {
        Duration::from_nanos((1_000_000_000.0 / self.frame_rate).round() as u64)
    }

    /// Time limit as an option, `None` when unbounded
    pub fn deadline(&self) -> Option<Duration> {
        if self.time_limit.is_zero() {
            None
        } else {
            Some(self.time_limit)
        }
    }

    /// Check the options before a session starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(ConfigError::InvalidFrameRate(self.frame_rate));
        }

        if self.boundary.is_empty() {
            return Err(ConfigError::EmptyBoundary);
        }

        let bad_char = !self.boundary.chars().all(|c| c.is_ascii_graphic());
        if self.boundary.len() > MAX_BOUNDARY_LEN || bad_char {
            return Err(ConfigError::InvalidBoundary(self.boundary.clone()));
        }

        Ok(())
    }
}
