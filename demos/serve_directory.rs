//! Serve a directory of JPEG frames as an MJPEG stream
//!
//! Run with: cargo run --example serve_directory -- FRAME_DIR [BIND_ADDR] [FPS]
//!
//! Examples:
//!   cargo run --example serve_directory -- ./frames                     # 0.0.0.0:8080, 10 fps
//!   cargo run --example serve_directory -- ./frames localhost           # 127.0.0.1:8080
//!   cargo run --example serve_directory -- ./frames 127.0.0.1:9000 25   # 25 fps
//!
//! ## Watching
//!
//! Any browser renders the stream in an `<img>` tag or directly:
//!   http://localhost:8080/
//!
//! With ffplay:
//!   ffplay -f mjpeg http://localhost:8080/
//!
//! Frames play in descending file-name order by default; set
//! `MJPEG_DIRECTION=reverse` for ascending order.

use std::net::SocketAddr;
use std::path::PathBuf;

use mjpeg_stream::session::{StreamEvent, TracingSink};
use mjpeg_stream::{Direction, EventSink, MjpegServer, ServerConfig, StreamConfig};

/// Logs lifecycle events and prints a summary line per finished session
struct SummarySink {
    log: TracingSink,
}

impl EventSink for SummarySink {
    fn on_event(&self, event: &StreamEvent) {
        self.log.on_event(event);

        if let StreamEvent::End(info) = event {
            println!(
                "[{}] {} frames, {} bytes in {} ms ({:.2} fps), reason {:?}",
                info.session_id,
                info.frame_count,
                info.content_bytes,
                info.elapsed_ms(),
                info.fps(),
                info.end_reason,
            );
        }
    }
}

/// Parse bind address from command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:8080
/// - "localhost:9000" -> 127.0.0.1:9000
/// - "127.0.0.1" -> 127.0.0.1:8080
/// - "0.0.0.0:9000" -> 0.0.0.0:9000
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 8080;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: serve_directory FRAME_DIR [BIND_ADDR] [FPS]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  FRAME_DIR    Directory of JPEG frames");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:8080)");
    eprintln!("  FPS          Frames per second (default: 10)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_stream=debug".parse()?)
                .add_directive("serve_directory=debug".parse()?),
        )
        .init();

    let directory = PathBuf::from(&args[1]);

    let mut config = ServerConfig::new(&directory);
    if let Some(addr) = args.get(2) {
        match parse_bind_addr(addr) {
            Ok(addr) => config = config.bind(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
    }

    let mut stream = StreamConfig::default();
    if let Some(fps) = args.get(3) {
        stream = stream.frame_rate(fps.parse()?);
    }
    if let Ok(direction) = std::env::var("MJPEG_DIRECTION") {
        stream = stream.direction(direction.parse::<Direction>()?);
    }
    stream.validate()?;
    let config = config.stream(stream);

    println!("Serving {} on http://{}/", directory.display(), config.bind_addr);
    println!(
        "{} fps, boundary '{}', direction {}",
        config.stream.frame_rate, config.stream.boundary, config.stream.direction
    );
    println!();

    let server = MjpegServer::new(config).with_events(SummarySink { log: TracingSink });

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        println!("\nShutting down...");
    };
    if let Err(e) = server.run_until(shutdown).await {
        eprintln!("Server error: {}", e);
    }

    Ok(())
}
