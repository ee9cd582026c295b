//! Error types for the dispatch engine.
//!
//! This module defines the central `Error` enum, which captures every
//! reportable failure of the master/worker pool. Worker and master operations
//! return a plain [`Result`]; the connection layer decides how to surface a
//! failure to its own caller (typically by closing the connection).
//!
//! ## Error Cases
//! - `InvalidConfig`: The pool was configured with unusable values.
//! - `InvalidState`: A lifecycle operation was called out of order.
//! - `WorkerSpawn`: The OS refused to spawn a worker thread.
//! - `WorkerPanicked`: A worker thread panicked before it could be joined.
//! - `SignalClosed`: A wake-up was sent to a loop that no longer exists.
//! - `ServiceShutdown`: A request arrived after the pool was stopped.

use crate::worker::WorkerId;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the dispatch engine.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The pool configuration was rejected.
    #[error("Invalid config: {reason}")]
    InvalidConfig { reason: String },

    /// A lifecycle operation was invoked in the wrong state (e.g. starting a
    /// pool twice, starting an unbound worker).
    #[error("Invalid state: {context}")]
    InvalidState { context: String },

    /// Spawning the dedicated thread for a worker failed.
    #[error("Failed to spawn {worker}: {source}")]
    WorkerSpawn {
        worker: WorkerId,
        #[source]
        source: std::io::Error,
    },

    /// The worker thread panicked; its in-flight request is lost.
    #[error("{worker} panicked")]
    WorkerPanicked { worker: WorkerId },

    /// The receiving side of an async signal has been dropped.
    #[error("Signal error: {context}")]
    SignalClosed { context: String },

    /// The pool is stopped and no longer accepts requests.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

/// Logs an unrecoverable initialization failure and aborts the process.
///
/// Worker pools are fixed-size and built at startup, so there is no partial
/// initialization to recover into.
#[cold]
pub(crate) fn fatal(_context: &str) -> ! {
    #[cfg(feature = "tracing")]
    tracing::error!("fatal: {_context}");
    std::process::abort()
}
