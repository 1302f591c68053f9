//! End-to-end sessions over real directories and in-memory connections

use std::path::Path;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, DuplexStream};

use mjpeg_stream::protocol::decode_part;
use mjpeg_stream::session::ChannelSink;
use mjpeg_stream::{
    Direction, EndReason, MjpegStream, SessionPhase, StreamConfig, StreamEvent, StreamInfo,
    WriterOutput,
};

fn write_frames(dir: &Path, frames: &[(&str, &[u8])]) {
    for (name, data) in frames {
        std::fs::write(dir.join(name), data).unwrap();
    }
}

/// Run a session into one end of a pipe and collect the body the client saw
async fn run(session: MjpegStream) -> (StreamInfo, Vec<u8>) {
    let (server, mut client): (DuplexStream, DuplexStream) = tokio::io::duplex(1 << 20);

    let reader = tokio::spawn(async move {
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        received
    });

    let info = session.stream(WriterOutput::new(server)).await;
    (info, reader.await.unwrap())
}

fn parts(body: Vec<u8>, boundary: &str) -> Vec<Bytes> {
    let mut body = Bytes::from(body);
    let mut out = Vec::new();
    while let Some(part) = decode_part(&mut body, boundary).unwrap() {
        out.push(part);
    }
    assert!(body.is_empty(), "trailing bytes after last part");
    out
}

#[tokio::test]
async fn test_single_pass_over_directory() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), &[("a.jpg", b"abc"), ("b.jpg", b"bcdef")]);

    let config = StreamConfig::default().frame_rate(100.0).loop_frames(false);
    let (info, response) = run(MjpegStream::new(dir.path(), config)).await;

    assert_eq!(info.end_reason, Some(EndReason::Completed));
    assert_eq!(info.phase, SessionPhase::Ended);
    assert_eq!(info.frame_count, 2);
    assert_eq!(info.content_bytes, 8);
    assert!(info.stream_start.is_some());
    assert!(info.stream_end.is_some());

    assert!(response.starts_with(b"--mjpeg-frame-boundary\r\nContent-Type: image/jpeg\r\n"));
    let frames = parts(response, "mjpeg-frame-boundary");
    assert_eq!(frames, vec![Bytes::from("bcdef"), Bytes::from("abc")]);
}

#[tokio::test]
async fn test_reverse_direction_plays_ascending() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), &[("1.jpg", b"one"), ("2.jpg", b"two"), ("3.jpg", b"three")]);

    let config = StreamConfig::default()
        .frame_rate(200.0)
        .loop_frames(false)
        .boundary("frames")
        .direction(Direction::Reverse);
    let (_, response) = run(MjpegStream::new(dir.path(), config)).await;

    let frames = parts(response, "frames");
    assert_eq!(
        frames,
        vec![Bytes::from("one"), Bytes::from("two"), Bytes::from("three")]
    );
}

#[tokio::test]
async fn test_subdirectories_are_not_frames() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), &[("a.jpg", b"a")]);
    std::fs::create_dir(dir.path().join("z-thumbs")).unwrap();

    let config = StreamConfig::default().frame_rate(200.0).loop_frames(false);
    let (info, _) = run(MjpegStream::new(dir.path(), config)).await;

    assert_eq!(info.frames_available, Some(1));
    assert_eq!(info.frame_count, 1);
}

#[tokio::test]
async fn test_missing_directory_is_404_with_empty_body() {
    let dir = tempfile::tempdir().unwrap();
    let (sink, mut events) = ChannelSink::new(16);

    let session = MjpegStream::new(dir.path().join("nope"), StreamConfig::default()).with_events(sink);
    let (info, response) = run(session).await;

    assert_eq!(info.end_reason, Some(EndReason::Failed));
    assert!(response.is_empty());

    match events.recv().await {
        Some(StreamEvent::Error { error, .. }) => {
            assert_eq!(error.status_code(), StatusCode::NOT_FOUND)
        }
        other => panic!("expected error event, got {:?}", other),
    }
    assert!(matches!(events.recv().await, Some(StreamEvent::End(_))));
}

#[tokio::test]
async fn test_looping_until_time_limit() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), &[("a.jpg", b"a"), ("b.jpg", b"b")]);

    let config = StreamConfig::default()
        .frame_rate(100.0)
        .time_limit(Duration::from_millis(120));
    let started = Instant::now();
    let (info, response) = run(MjpegStream::new(dir.path(), config)).await;

    assert!(started.elapsed() >= Duration::from_millis(120));
    assert_eq!(info.end_reason, Some(EndReason::TimeLimit));
    // More frames than files means the listing wrapped around
    assert!(info.frame_count > 2);

    let frames = parts(response, "mjpeg-frame-boundary");
    assert_eq!(frames.len() as u64, info.frame_count);
    assert_eq!(frames[0], Bytes::from("b"));
    assert_eq!(frames[1], Bytes::from("a"));
    assert_eq!(frames[2], Bytes::from("b"));
}

#[tokio::test]
async fn test_achieved_rate_tracks_configured_rate() {
    let dir = tempfile::tempdir().unwrap();
    let names: Vec<String> = (0..10).map(|i| format!("{:02}.jpg", i)).collect();
    for name in &names {
        std::fs::write(dir.path().join(name), b"frame").unwrap();
    }

    let config = StreamConfig::default().frame_rate(50.0).loop_frames(false);
    let (info, _) = run(MjpegStream::new(dir.path(), config)).await;

    assert_eq!(info.frame_count, 10);
    // Nine 20 ms waits at minimum; scheduling only slows it down
    assert!(info.elapsed >= Duration::from_millis(180));
    assert!(info.fps() > 10.0 && info.fps() <= 60.0, "fps {}", info.fps());
}

#[tokio::test]
async fn test_handle_end_stops_stream() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), &[("a.jpg", b"frame")]);

    let session = std::sync::Arc::new(MjpegStream::new(
        dir.path(),
        StreamConfig::default().frame_rate(100.0),
    ));
    let handle = session.handle();

    let (server, mut client) = tokio::io::duplex(1 << 20);
    let task = {
        let session = std::sync::Arc::clone(&session);
        tokio::spawn(async move { session.stream(WriterOutput::new(server)).await })
    };

    handle.started().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.end().await;
    assert_eq!(handle.phase(), SessionPhase::Ended);

    let info = task.await.unwrap();
    assert_eq!(info.end_reason, Some(EndReason::Cancelled));

    // The output was closed, so the client sees EOF after the last part
    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    assert_eq!(
        parts(received, "mjpeg-frame-boundary").len() as u64,
        info.frame_count
    );
}
