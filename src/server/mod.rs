//! Standalone MJPEG server
//!
//! An axum host for when there is no other HTTP framework around: every
//! `GET` gets its own session over the configured frame directory. Hosts that
//! already run axum can mount [`MjpegServer::router`] instead.

pub mod config;
pub mod listener;

pub use config::ServerConfig;
pub use listener::MjpegServer;
