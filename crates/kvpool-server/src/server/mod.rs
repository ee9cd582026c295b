//! Server-side building blocks for `kvpool-server`.
//!
//! ## Structure
//!
//! - [`config`] - CLI and environment configuration.
//! - [`connection`] - accept loop and per-connection request/response routing.
//! - [`telemetry`] - console log subscriber.

pub mod config;
pub mod connection;
pub mod telemetry;
