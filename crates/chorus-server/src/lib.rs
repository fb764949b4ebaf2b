//! # chorus-server
//!
//! HTTP and WebSocket front end for the Chorus hub.
//!
//! The binary in `main.rs` is a thin wrapper; everything it runs lives here
//! so integration tests can serve the same router on an ephemeral port.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{build_router, run_server, AppState};
