//! # chainstore-wire: Binary wire protocol for chainstore
//!
//! Every RPC in the system is a single request/response exchange over a
//! short-lived TCP connection. Messages are `postcard`-serialized payloads
//! carried in length-prefixed frames:
//!
//! ```text
//! ┌──────────────┬──────────────────────────┐
//! │ length (u32) │ postcard payload (bytes) │
//! └──────────────┴──────────────────────────┘
//! ```
//!
//! The payload enums are closed: [`RequestPayload`] and [`ResponsePayload`]
//! enumerate the full RPC surface between nodes, the control plane, and
//! store processes.

mod frame;
mod message;

pub use frame::{FRAME_HEADER_SIZE, Frame, MAX_FRAME_SIZE};
pub use message::{
    ErrorCode, ErrorResponse, Request, RequestId, RequestPayload, Response, ResponsePayload,
};

use thiserror::Error;

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame length prefix exceeds the maximum frame size.
    #[error("frame of {0} bytes exceeds maximum of {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Payload (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// The peer answered a request with a different message kind than the
    /// exchange expects.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(&'static str),
}
