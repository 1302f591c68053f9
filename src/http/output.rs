//! Stream outputs
//!
//! [`StreamOutput`] is everything a session needs from its connection: one
//! response head, body writes, an error status for streams that fail before
//! the head goes out, and close.

use std::future::Future;
use std::io;

use axum::http::{Response, StatusCode};
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Status and headers of a stream response
pub type ResponseHead = Response<()>;

/// Writable side of one client connection
pub trait StreamOutput: Send {
    /// Send the response head; only valid once, before any body bytes
    fn write_head(&mut self, head: ResponseHead) -> impl Future<Output = io::Result<()>> + Send;

    /// Write body bytes
    fn write(&mut self, data: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// Record an error status; only takes effect if the head is not sent yet
    fn set_status(&mut self, status: StatusCode);

    /// Flush and close the connection
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Writes the multipart body to a tokio `AsyncWrite`
///
/// For files and pipes, where no HTTP response head belongs: the head and
/// any error status are accepted but only the parts reach the writer. The
/// result plays with `ffplay -f mpjpeg`.
#[derive(Debug)]
pub struct WriterOutput<W> {
    writer: W,
    head_sent: bool,
    closed: bool,
}

impl<W> WriterOutput<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            head_sent: false,
            closed: false,
        }
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "output closed"))
        } else {
            Ok(())
        }
    }
}

impl<W> StreamOutput for WriterOutput<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_head(&mut self, head: ResponseHead) -> io::Result<()> {
        self.ensure_open()?;
        if self.head_sent {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "response head already sent",
            ));
        }

        tracing::trace!(status = head.status().as_u16(), "Stream head accepted");
        self.head_sent = true;
        Ok(())
    }

    async fn write(&mut self, data: Bytes) -> io::Result<()> {
        self.ensure_open()?;
        if !self.head_sent {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "body written before response head",
            ));
        }

        self.writer.write_all(&data).await
    }

    fn set_status(&mut self, status: StatusCode) {
        tracing::trace!(status = status.as_u16(), "Status not written to a bare writer");
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.writer.flush().await?;
        self.writer.shutdown().await
    }
}
