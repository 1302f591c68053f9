//! Per-connection MJPEG session
//!
//! [`MjpegStream::stream`] drives one session from listing to its terminal
//! state:
//!
//! ```text
//!   Idle ──stream()──► Starting ──listing ok──► Running ──┐
//!                         │                        ▲     │ tick: read → encode → write
//!                         │ listing failed/empty   └─────┘ wait 1000/fps ms
//!                         ▼                              │
//!                       Ended ◄──── completed / cancelled / time limit / error
//! ```
//!
//! Every await point (listing, frame read, write, inter-frame wait) races the
//! cancel flag and the time-limit deadline, so a [`StreamHandle`] can stop the
//! session no matter where it is suspended.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::config::{ReadErrorPolicy, StreamConfig};
use super::events::{EventSink, NullSink, StreamEvent};
use super::state::{EndReason, SessionPhase, SessionState};
use crate::error::{Error, SourceError};
use crate::http::{ResponseHead, StreamOutput};
use crate::protocol::{encode_part, stream_headers};
use crate::source::{DirectorySource, FrameSource};
use crate::stats::StreamInfo;

/// How long closing the output may take before it is abandoned
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared between a session and its handles
#[derive(Debug)]
struct Control {
    cancel: watch::Sender<bool>,
    phase: watch::Sender<SessionPhase>,
}

/// Cancellation hook for a session
///
/// Obtain one with [`MjpegStream::handle`] before streaming and wire the
/// connection's disconnect to [`StreamHandle::end`].
#[derive(Debug, Clone)]
pub struct StreamHandle {
    control: Arc<Control>,
}

impl StreamHandle {
    /// End the session and wait until it has fully stopped
    ///
    /// Once this returns the session has closed its output and will not write
    /// again. No-op on a session that has not started or already ended.
    pub async fn end(&self) {
        let mut phase = self.control.phase.subscribe();
        if !self.cancel() {
            return;
        }
        let _ = phase.wait_for(|p| *p == SessionPhase::Ended).await;
    }

    /// Request the session to end without waiting
    ///
    /// Returns false if there was nothing to cancel.
    pub fn cancel(&self) -> bool {
        let phase = *self.control.phase.borrow();
        match phase {
            SessionPhase::Idle | SessionPhase::Ended => false,
            SessionPhase::Starting | SessionPhase::Running => {
                self.control.cancel.send_replace(true);
                true
            }
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        *self.control.phase.borrow()
    }

    /// Wait until `stream` has been called
    pub async fn started(&self) {
        let mut phase = self.control.phase.subscribe();
        let _ = phase.wait_for(|p| *p != SessionPhase::Idle).await;
    }

    /// Wait until the session has ended
    pub async fn ended(&self) {
        let mut phase = self.control.phase.subscribe();
        let _ = phase.wait_for(|p| *p == SessionPhase::Ended).await;
    }
}

/// Outcome of an await that raced cancellation and the deadline
enum Wake<T> {
    Ready(T),
    Stop(EndReason),
}

/// One MJPEG session over a directory of frames
pub struct MjpegStream<S = DirectorySource> {
    state: Mutex<SessionState>,
    config: StreamConfig,
    directory: PathBuf,
    source: Arc<S>,
    events: Arc<dyn EventSink>,
    control: Arc<Control>,
}

impl MjpegStream<DirectorySource> {
    /// Create a session reading frames from `directory` on disk
    pub fn new(directory: impl Into<PathBuf>, config: StreamConfig) -> Self {
        Self::with_source(directory, config, DirectorySource)
    }
}

impl<S: FrameSource> MjpegStream<S> {
    /// Create a session over a custom frame source
    pub fn with_source(directory: impl Into<PathBuf>, config: StreamConfig, source: S) -> Self {
        Self::with_shared_source(directory, config, Arc::new(source))
    }

    /// Create a session over a frame source shared with other sessions
    pub fn with_shared_source(
        directory: impl Into<PathBuf>,
        config: StreamConfig,
        source: Arc<S>,
    ) -> Self {
        let directory = directory.into();
        let (cancel, _) = watch::channel(false);
        let (phase, _) = watch::channel(SessionPhase::Idle);

        Self {
            state: Mutex::new(SessionState::new(0, directory.clone(), config.clone())),
            config,
            directory,
            source,
            events: Arc::new(NullSink),
            control: Arc::new(Control { cancel, phase }),
        }
    }

    /// Set the session ID reported in snapshots and logs
    pub fn with_id(self, id: u64) -> Self {
        self.lock().id = id;
        self
    }

    /// Set the event observer
    pub fn with_events(self, sink: impl EventSink) -> Self {
        self.with_shared_events(Arc::new(sink))
    }

    /// Set an event observer shared with other sessions
    pub fn with_shared_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Cancellation handle for this session
    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            control: Arc::clone(&self.control),
        }
    }

    /// Statistics snapshot
    pub fn info(&self) -> StreamInfo {
        self.lock().info()
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Stream frames to `output` until a terminal condition
    ///
    /// Returns the final snapshot. A session streams at most once; calling
    /// this again returns the current snapshot and leaves `output` untouched.
    pub async fn stream<O: StreamOutput>(&self, mut output: O) -> StreamInfo {
        let (began, id) = {
            let mut state = self.lock();
            (state.begin(), state.id)
        };
        if !began {
            tracing::warn!(session_id = id, "Session already streamed, ignoring");
            return self.info();
        }
        self.control.phase.send_replace(SessionPhase::Starting);
        let _guard = EndGuard { stream: self };

        tracing::debug!(
            session_id = id,
            directory = %self.directory.display(),
            frame_rate = self.config.frame_rate,
            "Starting MJPEG session"
        );

        if let Err(e) = self.config.validate() {
            return self.finish(&mut output, EndReason::Failed, Some(e.into())).await;
        }

        let mut cancel = self.control.cancel.subscribe();
        let deadline = self.config.deadline().map(|limit| Instant::now() + limit);

        let listing = race(
            self.source.list_frames(&self.directory, self.config.direction),
            &mut cancel,
            deadline,
        )
        .await;

        let files = match listing {
            Wake::Stop(reason) => return self.finish(&mut output, reason, None).await,
            Wake::Ready(Err(e)) => {
                return self
                    .finish(&mut output, EndReason::Failed, Some(e.into()))
                    .await
            }
            Wake::Ready(Ok(files)) if files.is_empty() => {
                let error = SourceError::EmptyFrameSet {
                    path: self.directory.clone(),
                };
                return self
                    .finish(&mut output, EndReason::Failed, Some(error.into()))
                    .await;
            }
            Wake::Ready(Ok(files)) => files,
        };

        let headers = match stream_headers(&self.config.boundary) {
            Ok(headers) => headers,
            Err(e) => {
                return self
                    .finish(&mut output, EndReason::Failed, Some(e.into()))
                    .await
            }
        };

        let frames = files.len();
        self.lock().start(files);
        self.control.phase.send_replace(SessionPhase::Running);

        let mut head = ResponseHead::new(());
        *head.headers_mut() = headers;
        match race(output.write_head(head), &mut cancel, deadline).await {
            Wake::Stop(reason) => return self.finish(&mut output, reason, None).await,
            Wake::Ready(Err(e)) if is_disconnect(&e) => {
                tracing::debug!(session_id = id, error = %e, "Client gone before head");
                return self.finish(&mut output, EndReason::Cancelled, None).await;
            }
            Wake::Ready(Err(e)) => {
                return self
                    .finish(&mut output, EndReason::Failed, Some(e.into()))
                    .await
            }
            Wake::Ready(Ok(())) => {}
        }

        tracing::debug!(session_id = id, frames = frames, "MJPEG session running");
        self.emit(StreamEvent::Start);

        let delay = self.config.frame_delay();
        loop {
            let identifier = self.lock().current_frame().map(str::to_owned);
            let Some(identifier) = identifier else {
                return self.finish(&mut output, EndReason::Completed, None).await;
            };

            let read = race(
                self.source.read_frame(&self.directory, &identifier),
                &mut cancel,
                deadline,
            )
            .await;

            let data = match read {
                Wake::Stop(reason) => return self.finish(&mut output, reason, None).await,
                Wake::Ready(Ok(data)) => data,
                Wake::Ready(Err(e)) => {
                    tracing::warn!(
                        session_id = id,
                        frame = %identifier,
                        error = %e,
                        policy = ?self.config.on_read_error,
                        "Failed to read frame"
                    );
                    let error = Error::from(e);

                    match self.config.on_read_error {
                        ReadErrorPolicy::End => {
                            return self
                                .finish(&mut output, EndReason::Failed, Some(error))
                                .await;
                        }
                        ReadErrorPolicy::Stall => {
                            self.emit(|info| StreamEvent::Error { info, error });
                            let reason =
                                match race(std::future::pending::<Infallible>(), &mut cancel, deadline)
                                    .await
                                {
                                    Wake::Stop(reason) => reason,
                                    Wake::Ready(never) => match never {},
                                };
                            return self.finish(&mut output, reason, None).await;
                        }
                        ReadErrorPolicy::Skip => {
                            self.emit(|info| StreamEvent::Error { info, error });
                            let done = {
                                let mut state = self.lock();
                                state.skip_frame();
                                state.pass_complete() && !self.config.loop_frames
                            };
                            if done {
                                return self.finish(&mut output, EndReason::Completed, None).await;
                            }
                            if let Wake::Stop(reason) =
                                race(tokio::time::sleep(delay), &mut cancel, deadline).await
                            {
                                return self.finish(&mut output, reason, None).await;
                            }
                            continue;
                        }
                    }
                }
            };

            let part = encode_part(&self.config.boundary, &data);
            match race(output.write(part), &mut cancel, deadline).await {
                Wake::Stop(reason) => return self.finish(&mut output, reason, None).await,
                Wake::Ready(Err(e)) if is_disconnect(&e) => {
                    tracing::debug!(session_id = id, error = %e, "Client disconnected");
                    return self.finish(&mut output, EndReason::Cancelled, None).await;
                }
                Wake::Ready(Err(e)) => {
                    tracing::debug!(session_id = id, error = %e, "Output write failed");
                    return self
                        .finish(&mut output, EndReason::Failed, Some(e.into()))
                        .await;
                }
                Wake::Ready(Ok(())) => {}
            }

            let (frame, done) = {
                let mut state = self.lock();
                let frame = state.record_frame(data.len());
                (frame, state.pass_complete() && !self.config.loop_frames)
            };
            self.emit(|info| StreamEvent::Frame { info, frame });

            if done {
                return self.finish(&mut output, EndReason::Completed, None).await;
            }

            if let Wake::Stop(reason) = race(tokio::time::sleep(delay), &mut cancel, deadline).await
            {
                return self.finish(&mut output, reason, None).await;
            }
        }
    }

    /// Terminal transition: report, close, stamp, notify
    async fn finish<O: StreamOutput>(
        &self,
        output: &mut O,
        reason: EndReason,
        error: Option<Error>,
    ) -> StreamInfo {
        let id = self.lock().id;

        if let Some(error) = error {
            output.set_status(error.status_code());
            tracing::debug!(
                session_id = id,
                status = error.status_code().as_u16(),
                error = %error,
                "MJPEG session failed"
            );
            self.emit(|info| StreamEvent::Error { info, error });
        }

        match tokio::time::timeout(CLOSE_TIMEOUT, output.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(session_id = id, error = %e, "Failed to close output"),
            Err(_) => tracing::debug!(session_id = id, "Timed out closing output"),
        }

        let info = {
            let mut state = self.lock();
            state.finish(reason);
            state.info()
        };
        self.control.phase.send_replace(SessionPhase::Ended);

        tracing::debug!(
            session_id = id,
            reason = ?reason,
            frames = info.frame_count,
            bytes = info.content_bytes,
            elapsed_ms = info.elapsed_ms() as u64,
            "MJPEG session ended"
        );

        self.events.on_event(&StreamEvent::End(info.clone()));
        info
    }

    /// Notify the sink; the state lock is released before the call
    fn emit(&self, event: impl FnOnce(StreamInfo) -> StreamEvent) {
        let info = self.info();
        self.events.on_event(&event(info));
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks the session ended if the `stream` future is dropped early, so
/// handles waiting in [`StreamHandle::end`] are released
struct EndGuard<'a, S: FrameSource> {
    stream: &'a MjpegStream<S>,
}

impl<S: FrameSource> Drop for EndGuard<'_, S> {
    fn drop(&mut self) {
        let mut state = self.stream.lock();
        if state.finish(EndReason::Cancelled) {
            tracing::debug!(session_id = state.id, "MJPEG session dropped mid-stream");
        }
        drop(state);
        self.stream.control.phase.send_replace(SessionPhase::Ended);
    }
}

/// A peer hanging up shows up as one of these on write
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

/// Await `fut` unless the session is cancelled or its deadline passes first
async fn race<F: Future>(
    fut: F,
    cancel: &mut watch::Receiver<bool>,
    deadline: Option<Instant>,
) -> Wake<F::Output> {
    tokio::select! {
        biased;
        _ = cancelled(cancel) => Wake::Stop(EndReason::Cancelled),
        _ = expired(deadline) => Wake::Stop(EndReason::TimeLimit),
        out = fut => Wake::Ready(out),
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        // Sender lives as long as the session
        std::future::pending::<()>().await;
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
