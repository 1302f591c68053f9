//! MJPEG server listener
//!
//! Serves the frame directory over HTTP with axum. Every `GET` gets its own
//! session, spawned onto its own task and wired to the response body.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::serve::ListenerExt;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};

use crate::error::Result;
use crate::http::{body_channel, ConnectionGuard};
use crate::server::config::ServerConfig;
use crate::session::{EventSink, MjpegStream, NullSink};
use crate::source::DirectorySource;

/// Encoded parts queued per connection ahead of the socket
const FRAME_BUFFER: usize = 2;

/// Shared by every request handler
#[derive(Clone)]
struct AppState {
    config: Arc<ServerConfig>,
    events: Arc<dyn EventSink>,
    source: Arc<DirectorySource>,
    next_session_id: Arc<AtomicU64>,
    connection_semaphore: Option<Arc<Semaphore>>,
    shutdown: watch::Receiver<bool>,
}

/// MJPEG server
pub struct MjpegServer {
    state: AppState,
    shutdown: Arc<watch::Sender<bool>>,
}

impl MjpegServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };
        let (shutdown, stop) = watch::channel(false);

        Self {
            state: AppState {
                config: Arc::new(config),
                events: Arc::new(NullSink),
                source: Arc::new(DirectorySource),
                next_session_id: Arc::new(AtomicU64::new(1)),
                connection_semaphore,
                shutdown: stop,
            },
            shutdown: Arc::new(shutdown),
        }
    }

    /// Set the observer shared by every session
    pub fn with_events(mut self, sink: impl EventSink) -> Self {
        self.state.events = Arc::new(sink);
        self
    }

    /// Router answering every `GET` path with a stream
    ///
    /// Mount it into a larger axum app, or let [`MjpegServer::run`] serve it.
    /// Other methods get `405 Method Not Allowed`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(stream_frames))
            .route("/{*path}", get(stream_frames))
            .with_state(self.state.clone())
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    ///
    /// When `shutdown` resolves, running streams are ended and the server
    /// returns once their connections have closed.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        tracing::info!(
            addr = %self.state.config.bind_addr,
            directory = %self.state.config.directory.display(),
            "MJPEG server listening"
        );

        self.serve_until(listener, shutdown).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.serve_until(listener, std::future::pending()).await
    }

    /// Serve from a bound listener until `shutdown` resolves
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let nodelay = self.state.config.tcp_nodelay;
        let listener = listener.tap_io(move |socket| {
            if nodelay {
                if let Err(e) = socket.set_nodelay(true) {
                    tracing::error!(error = %e, "Failed to configure socket");
                }
            }
        });

        let stop = Arc::clone(&self.shutdown);
        let signal = async move {
            shutdown.await;
            tracing::info!("Shutdown signal received");
            // Looping streams never finish on their own
            stop.send_replace(true);
        };

        axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await?;
        Ok(())
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.state.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// Start a session for this request and answer with its stream
async fn stream_frames(State(state): State<AppState>) -> Response {
    // Check connection limit; the permit lives as long as the response body
    let permit = match &state.connection_semaphore {
        Some(sem) => match Arc::clone(sem).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!("Connection rejected: limit reached");
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
        },
        None => None,
    };

    let session_id = state.next_session_id.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(session_id = session_id, "New stream request");

    let session = MjpegStream::with_shared_source(
        &state.config.directory,
        state.config.stream.clone(),
        Arc::clone(&state.source),
    )
    .with_id(session_id)
    .with_shared_events(Arc::clone(&state.events));

    let handle = session.handle();
    let stop_handle = handle.clone();
    let mut shutdown = state.shutdown.clone();
    let (output, pending) = body_channel(FRAME_BUFFER);

    tokio::spawn(async move {
        let stream = session.stream(output);
        tokio::pin!(stream);

        // Polling the stream first moves it out of Idle, so cancel lands
        let info = tokio::select! {
            biased;
            info = &mut stream => info,
            _ = stopped(&mut shutdown) => {
                stop_handle.cancel();
                stream.await
            }
        };

        tracing::debug!(
            session_id = session_id,
            reason = ?info.end_reason,
            frames = info.frame_count,
            fps = info.fps(),
            "Stream finished"
        );
    });

    pending.response(ConnectionGuard::new(handle, permit)).await
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        // Server dropped without shutting down
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use crate::protocol::decode_part;
    use crate::session::{ChannelSink, EndReason, StreamConfig, StreamEvent};

    async fn start_server(server: MjpegServer) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.serve(listener).await });
        addr
    }

    async fn request(addr: SocketAddr, raw: &[u8]) -> Vec<u8> {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(raw).await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        response
    }

    /// Lowercased head and raw body; HTTP/1.0 requests get an unchunked body
    fn split_head(response: &[u8]) -> (String, Bytes) {
        let end = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response head");
        let head = String::from_utf8(response[..end].to_vec())
            .unwrap()
            .to_ascii_lowercase();
        (head, Bytes::copy_from_slice(&response[end + 4..]))
    }

    fn status_line(response: &[u8]) -> String {
        let end = response
            .windows(2)
            .position(|w| w == b"\r\n")
            .unwrap_or(response.len());
        String::from_utf8_lossy(&response[..end]).into_owned()
    }

    async fn next_end(events: &mut tokio::sync::mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                let done = matches!(event, StreamEvent::End(_));
                seen.push(event);
                if done {
                    return;
                }
            }
            panic!("event channel closed");
        })
        .await
        .expect("session should end");
        seen
    }

    #[tokio::test]
    async fn test_streams_directory_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"abc").unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"bcdef").unwrap();

        let config = ServerConfig::new(dir.path()).stream(
            StreamConfig::default()
                .frame_rate(100.0)
                .loop_frames(false)
                .boundary("test"),
        );
        let addr = start_server(MjpegServer::new(config)).await;

        let response = request(addr, b"GET /stream HTTP/1.0\r\nHost: x\r\n\r\n").await;
        let (head, mut body) = split_head(&response);

        assert!(head.contains(" 200 ok"), "{}", head);
        assert!(head.contains("content-type: multipart/x-mixed-replace; boundary=test"));
        assert!(head.contains("cache-control: no-cache"));
        assert!(head.contains("pragma: no-cache"));

        let first = decode_part(&mut body, "test").unwrap().unwrap();
        let second = decode_part(&mut body, "test").unwrap().unwrap();
        assert_eq!(&first[..], b"bcdef");
        assert_eq!(&second[..], b"abc");
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_empty_directory_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_server(MjpegServer::new(ServerConfig::new(dir.path()))).await;

        let response = request(addr, b"GET / HTTP/1.0\r\n\r\n").await;
        let (head, body) = split_head(&response);

        assert!(head.contains(" 404 not found"), "{}", head);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_non_get_is_405() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_server(MjpegServer::new(ServerConfig::new(dir.path()))).await;

        let response = request(addr, b"POST / HTTP/1.0\r\nContent-Length: 0\r\n\r\n").await;
        assert!(status_line(&response).contains(" 405 "), "{}", status_line(&response));
    }

    #[tokio::test]
    async fn test_malformed_request_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_server(MjpegServer::new(ServerConfig::new(dir.path()))).await;

        let response = request(addr, b"NONSENSE\r\n\r\n").await;
        assert!(status_line(&response).contains(" 400 "), "{}", status_line(&response));
    }

    #[tokio::test]
    async fn test_client_disconnect_cancels_session() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"frame").unwrap();

        let (sink, mut events) = ChannelSink::new(4096);
        let server = MjpegServer::new(
            ServerConfig::new(dir.path()).stream(StreamConfig::default().frame_rate(200.0)),
        )
        .with_events(sink);
        let addr = start_server(server).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        let mut buf = [0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        assert!(n > 0);
        drop(client);

        let seen = next_end(&mut events).await;
        assert!(!seen.iter().any(|e| matches!(e, StreamEvent::Error { .. })));
        match seen.last() {
            Some(StreamEvent::End(info)) => {
                assert_eq!(info.end_reason, Some(EndReason::Cancelled));
            }
            other => panic!("expected end event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_limit_rejects_with_503() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"frame").unwrap();

        let config = ServerConfig::new(dir.path())
            .max_connections(1)
            .stream(StreamConfig::default().frame_rate(100.0));
        let addr = start_server(MjpegServer::new(config)).await;

        // First client holds the only slot while it streams
        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        let mut buf = [0u8; 256];
        assert!(first.read(&mut buf).await.unwrap() > 0);

        let response = request(addr, b"GET / HTTP/1.0\r\n\r\n").await;
        assert!(status_line(&response).contains(" 503 "), "{}", status_line(&response));
    }

    #[tokio::test]
    async fn test_shutdown_ends_running_streams() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"frame").unwrap();

        let (sink, mut events) = ChannelSink::new(4096);
        let server = MjpegServer::new(
            ServerConfig::new(dir.path()).stream(StreamConfig::default().frame_rate(100.0)),
        )
        .with_events(sink);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let serving = tokio::spawn(async move {
            server
                .serve_until(listener, async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        let mut buf = [0u8; 256];
        assert!(client.read(&mut buf).await.unwrap() > 0);

        stop_tx.send(()).unwrap();

        let seen = next_end(&mut events).await;
        match seen.last() {
            Some(StreamEvent::End(info)) => {
                assert_eq!(info.end_reason, Some(EndReason::Cancelled));
            }
            other => panic!("expected end event, got {:?}", other),
        }

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut rest))
            .await
            .expect("client should see EOF")
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .expect("server should stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
