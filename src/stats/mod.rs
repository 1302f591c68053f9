//! Session statistics

pub mod metrics;

pub use metrics::{FrameInfo, StreamInfo};
