//! Lifecycle events
//!
//! Sessions report `start`, `frame`, `error` and `end` to an [`EventSink`]
//! injected at construction. Delivery is fire-and-forget: a sink is called
//! inline from the session task and must return promptly. Sinks that need to
//! do real work should hand the event off, as [`ChannelSink`] does.

use tokio::sync::mpsc;

use crate::error::Error;
use crate::stats::{FrameInfo, StreamInfo};

/// A lifecycle milestone with its statistics snapshot
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Headers written, first frame about to be sent
    Start(StreamInfo),

    /// A frame was written
    Frame { info: StreamInfo, frame: FrameInfo },

    /// Something failed; fatal errors are always followed by `End`
    Error { info: StreamInfo, error: Error },

    /// Session reached its terminal state
    End(StreamInfo),
}

impl StreamEvent {
    /// Snapshot carried by this event
    pub fn info(&self) -> &StreamInfo {
        match self {
            StreamEvent::Start(info) | StreamEvent::End(info) => info,
            StreamEvent::Frame { info, .. } | StreamEvent::Error { info, .. } => info,
        }
    }

    /// Short event name
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Start(_) => "start",
            StreamEvent::Frame { .. } => "frame",
            StreamEvent::Error { .. } => "error",
            StreamEvent::End(_) => "end",
        }
    }
}

/// Observer for session lifecycle events
pub trait EventSink: Send + Sync + 'static {
    /// Called inline by the session; must not block
    fn on_event(&self, event: &StreamEvent);
}

impl<F> EventSink for F
where
    F: Fn(&StreamEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: &StreamEvent) {
        self(event)
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&self, _event: &StreamEvent) {}
}

/// Logs events through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, event: &StreamEvent) {
        let info = event.info();
        match event {
            StreamEvent::Start(_) => {
                tracing::info!(
                    session_id = info.session_id,
                    directory = %info.directory.display(),
                    frames = info.frames_available.unwrap_or(0),
                    "MJPEG stream started"
                );
            }
            StreamEvent::Frame { frame, .. } => {
                tracing::trace!(
                    session_id = info.session_id,
                    frame = %frame.identifier,
                    frame_index = frame.frame_index,
                    frame_count = frame.frame_count,
                    size = frame.size,
                    "Frame sent"
                );
            }
            StreamEvent::Error { error, .. } => {
                tracing::warn!(
                    session_id = info.session_id,
                    status = error.status_code().as_u16(),
                    error = %error,
                    "MJPEG stream error"
                );
            }
            StreamEvent::End(_) => {
                tracing::info!(
                    session_id = info.session_id,
                    reason = ?info.end_reason,
                    frames = info.frame_count,
                    bytes = info.content_bytes,
                    elapsed_ms = info.elapsed_ms() as u64,
                    fps = info.fps(),
                    "MJPEG stream ended"
                );
            }
        }
    }
}

/// Forwards owned events over a bounded channel
///
/// Uses `try_send`, so a full or closed channel drops the event instead of
/// stalling the session.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver for its events
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: &StreamEvent) {
        if let Err(e) = self.tx.try_send(event.clone()) {
            tracing::trace!(
                session_id = event.info().session_id,
                event = event.name(),
                error = %e,
                "Dropped stream event"
            );
        }
    }
}
