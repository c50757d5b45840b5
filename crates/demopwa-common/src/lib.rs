//! # DemoPWA Common
//!
//! Logging configuration shared by the service worker crate and its tools.
//!
//! ## Features
//!
//! - Pretty, compact and JSON output via `tracing-subscriber`
//! - `RUST_LOG` / custom filter support
//! - Debug, trace and production presets

pub mod logging;

pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat, UnknownLogFormat};
