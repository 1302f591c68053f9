//! Streaming axum responses
//!
//! [`body_channel`] splits a response into the session side, a
//! [`BodyOutput`], and the handler side, a [`PendingResponse`]. The handler
//! awaits the session's answer: either the stream head, after which parts
//! flow through a [`FrameBody`], or a bare error status.
//!
//! Dropping the body (hyper does this when the client goes away) drops its
//! [`ConnectionGuard`], which cancels the session.

use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit};
use tokio_stream::Stream;

use super::output::{ResponseHead, StreamOutput};
use crate::session::StreamHandle;

/// The session's answer to the handler
#[derive(Debug)]
enum Reply {
    Stream(ResponseHead),
    Status(StatusCode),
}

/// Create a connected output and pending response
///
/// `buffer` is the number of encoded parts that may queue up behind a slow
/// client before the session's writes start waiting.
pub fn body_channel(buffer: usize) -> (BodyOutput, PendingResponse) {
    let (reply_tx, reply_rx) = oneshot::channel();
    let (frames_tx, frames_rx) = mpsc::channel(buffer.max(1));

    let output = BodyOutput {
        reply: Some(reply_tx),
        frames: Some(frames_tx),
        pending_status: None,
    };
    let pending = PendingResponse {
        reply: reply_rx,
        frames: frames_rx,
    };
    (output, pending)
}

/// Session side of a streaming response
#[derive(Debug)]
pub struct BodyOutput {
    reply: Option<oneshot::Sender<Reply>>,
    frames: Option<mpsc::Sender<Bytes>>,
    pending_status: Option<StatusCode>,
}

fn disconnected() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected")
}

impl StreamOutput for BodyOutput {
    async fn write_head(&mut self, head: ResponseHead) -> io::Result<()> {
        if self.frames.is_none() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "output closed"));
        }
        let reply = self.reply.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "response head already sent")
        })?;

        reply.send(Reply::Stream(head)).map_err(|_| disconnected())
    }

    async fn write(&mut self, data: Bytes) -> io::Result<()> {
        if self.reply.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "body written before response head",
            ));
        }
        let frames = self
            .frames
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "output closed"))?;

        frames.send(data).await.map_err(|_| disconnected())
    }

    fn set_status(&mut self, status: StatusCode) {
        if self.reply.is_none() {
            tracing::trace!(status = status.as_u16(), "Status ignored, head already sent");
            return;
        }
        self.pending_status = Some(status);
    }

    async fn close(&mut self) -> io::Result<()> {
        // Ending before the head: answer with the error status, or 503 when
        // the session was stopped without one
        if let Some(reply) = self.reply.take() {
            let status = self
                .pending_status
                .unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
            let _ = reply.send(Reply::Status(status));
        }

        // Dropping the sender ends the body
        self.frames = None;
        Ok(())
    }
}

/// Handler side of a streaming response
#[derive(Debug)]
pub struct PendingResponse {
    reply: oneshot::Receiver<Reply>,
    frames: mpsc::Receiver<Bytes>,
}

impl PendingResponse {
    /// Wait for the session to answer and build the response
    pub async fn response(self, guard: ConnectionGuard) -> Response {
        match self.reply.await {
            Ok(Reply::Stream(head)) => {
                let (parts, ()) = head.into_parts();
                let body = FrameBody {
                    frames: self.frames,
                    _guard: guard,
                };
                Response::from_parts(parts, Body::from_stream(body))
            }
            Ok(Reply::Status(status)) => status.into_response(),
            // Session task went away without closing its output
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

/// Ties a session and its connection slot to the life of a response
#[derive(Debug)]
pub struct ConnectionGuard {
    handle: StreamHandle,
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConnectionGuard {
    pub fn new(handle: StreamHandle, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            handle,
            _permit: permit,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

/// Response body yielding one encoded part per item
#[derive(Debug)]
pub struct FrameBody {
    frames: mpsc::Receiver<Bytes>,
    _guard: ConnectionGuard,
}

impl Stream for FrameBody {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.poll_recv(cx).map(|part| part.map(Ok))
    }
}
