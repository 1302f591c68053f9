//! MJPEG push streaming
//!
//! Serves a directory of still images as a `multipart/x-mixed-replace`
//! stream, the format browsers render as live video in a plain `<img>` tag.
//!
//! ```no_run
//! use mjpeg_stream::{MjpegStream, StreamConfig, WriterOutput};
//!
//! # async fn example() -> mjpeg_stream::error::Result<()> {
//! let file = tokio::fs::File::create("capture.mjpeg").await?;
//!
//! let config = StreamConfig::default().frame_rate(25.0);
//! let session = MjpegStream::new("./frames", config);
//! let info = session.stream(WriterOutput::new(file)).await;
//! println!("sent {} frames at {:.1} fps", info.frame_count, info.fps());
//! # Ok(())
//! # }
//! ```
//!
//! To serve over HTTP, answer a request with [`http::body_channel`] or use
//! the ready-made [`server::MjpegServer`].

pub mod error;
pub mod http;
pub mod protocol;
pub mod server;
pub mod session;
pub mod source;
pub mod stats;

pub use error::{Error, Result};
pub use http::{body_channel, BodyOutput, StreamOutput, WriterOutput};
pub use server::{MjpegServer, ServerConfig};
pub use session::{
    EndReason, EventSink, MjpegStream, ReadErrorPolicy, SessionPhase, StreamConfig, StreamEvent,
    StreamHandle,
};
pub use source::{Direction, DirectorySource, FrameSource};
pub use stats::{FrameInfo, StreamInfo};
