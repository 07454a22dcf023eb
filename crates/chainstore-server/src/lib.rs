//! # chainstore-server: TCP RPC plumbing
//!
//! Every chainstore endpoint — the control plane and each store process —
//! is one of these servers: a blocking TCP listener feeding accepted
//! connections into a bounded inbox, drained by a fixed pool of worker
//! threads. Connections are short-lived: one framed request, one framed
//! response, close.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  chainstore-server                    │
//! │  ┌──────────┐   ┌───────────────┐   ┌─────────────┐  │
//! │  │ Listener │ → │ BoundedQueue  │ → │ worker pool │  │
//! │  │  (TCP)   │   │ (backpressure)│   │ (→ Handler) │  │
//! │  └──────────┘   └───────────────┘   └─────────────┘  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Handlers may block — a replicated write sleeps its test delay and waits
//! on its successor inside the handler — so concurrency is worker-count,
//! not event-loop, driven.

mod bounded_queue;
mod server;

pub use bounded_queue::{BoundedQueue, PushResult};
pub use server::{Handler, Server, ServerConfig, ShutdownHandle};

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur during server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Bind failed.
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: String,
        source: std::io::Error,
    },
}
