//! MJPEG streaming sessions
//!
//! One [`MjpegStream`] serves one client connection. It lists the frame
//! directory once, then sends one multipart part per tick at the configured
//! frame rate until the frames run out (no looping), the time limit passes,
//! the host cancels it through a [`StreamHandle`], or an error ends it.

pub mod config;
pub mod events;
pub mod state;
pub mod stream;

pub use config::{ReadErrorPolicy, StreamConfig};
pub use events::{ChannelSink, EventSink, NullSink, StreamEvent, TracingSink};
pub use state::{EndReason, SessionPhase, SessionState};
pub use stream::{MjpegStream, StreamHandle};
