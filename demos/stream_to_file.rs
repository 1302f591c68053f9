//! Capture one pass of an MJPEG stream to a file
//!
//! Run with: cargo run --example stream_to_file -- FRAME_DIR OUTPUT_FILE [FPS]
//!
//! Writes the multipart body an HTTP client would receive for a single
//! non-looping pass over the directory. Handy for checking frame order and
//! framing without a browser; `ffplay -f mpjpeg OUTPUT_FILE` plays it back.
//!
//! Ctrl+C ends the capture early through the session handle.

use std::path::PathBuf;

use mjpeg_stream::session::ChannelSink;
use mjpeg_stream::{MjpegStream, StreamConfig, StreamEvent, WriterOutput};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_stream=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: stream_to_file FRAME_DIR OUTPUT_FILE [FPS]");
        std::process::exit(1);
    }

    let directory = PathBuf::from(&args[1]);
    let output_path = PathBuf::from(&args[2]);
    let fps: f64 = match args.get(3) {
        Some(fps) => fps.parse()?,
        None => 30.0,
    };

    let config = StreamConfig::default().frame_rate(fps).loop_frames(false);
    config.validate()?;

    let (sink, mut events) = ChannelSink::new(256);
    let session = MjpegStream::new(&directory, config).with_events(sink);

    // Print events as they arrive
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Start(info) => {
                    println!("Streaming {} frames", info.frames_available.unwrap_or(0));
                }
                StreamEvent::Frame { frame, .. } => {
                    println!(
                        "  #{:<5} {:<32} {:>8} bytes",
                        frame.frame_count, frame.identifier, frame.size
                    );
                }
                StreamEvent::Error { error, .. } => {
                    eprintln!("Error ({}): {}", error.status_code(), error);
                }
                StreamEvent::End(info) => {
                    println!(
                        "Done: {} frames, {} bytes, {:.2} fps",
                        info.frame_count,
                        info.content_bytes,
                        info.fps()
                    );
                    break;
                }
            }
        }
    });

    let handle = session.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.end().await;
        }
    });

    let file = tokio::fs::File::create(&output_path).await?;
    let info = session.stream(WriterOutput::new(file)).await;

    // Closes the event channel so the printer drains and exits
    drop(session);
    let _ = printer.await;

    println!(
        "Wrote {} ({:?})",
        output_path.display(),
        info.end_reason.unwrap_or(mjpeg_stream::EndReason::Completed)
    );

    Ok(())
}
