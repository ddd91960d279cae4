//! # murmur-server
//!
//! WebSocket front end for the Murmur chat relay. Wires the router from
//! `murmur-core` to client connections, plus configuration and metrics.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{app, run_server, serve, AppState};
