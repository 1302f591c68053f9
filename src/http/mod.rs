//! Session outputs
//!
//! A session writes through a [`StreamOutput`]. [`BodyOutput`] turns it into
//! an axum streaming response; [`WriterOutput`] sends the bare multipart body
//! to any tokio writer.

pub mod body;
pub mod output;

pub use body::{body_channel, BodyOutput, ConnectionGuard, FrameBody, PendingResponse};
pub use output::{ResponseHead, StreamOutput, WriterOutput};
