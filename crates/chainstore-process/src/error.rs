//! Process error types.

use chainstore_client::ClientError;
use chainstore_types::{ProcessName, Role};
use thiserror::Error;

/// Result type for process operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Errors that can occur in the replication state machine.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process has been removed from the chain and refuses
    /// replication traffic.
    #[error("process is disabled")]
    Disabled,

    /// The process has been cleared; its endpoint is stopping.
    #[error("process is inactive")]
    Inactive,

    /// Replication traffic before the process joined a chain.
    #[error("process is not part of an active chain")]
    NotActive,

    /// A previous `Initialize` carried an invalid topology; the process
    /// stays inert until re-initialized correctly.
    #[error("process refused traffic after topology misinitialization")]
    Faulted,

    /// The request named a different process than the one serving it.
    #[error("request addressed to {requested}, served by {actual}")]
    WrongProcess {
        requested: ProcessName,
        actual: ProcessName,
    },

    /// Role/neighbor shape mismatch at `Initialize`.
    #[error("invalid topology for role {role}: {reason}")]
    InvalidTopology { role: Role, reason: &'static str },

    /// A non-tail process has nowhere to forward a write.
    #[error("no successor to forward write to")]
    NoSuccessor,

    /// A dirty key cannot be resolved without a tail to consult.
    #[error("no tail to consult for dirty key {0:?}")]
    NoTail(String),

    /// A downstream hop failed; any dirty state stays behind.
    #[error("downstream call failed: {0}")]
    Downstream(#[from] ClientError),

    /// The reconciliation gap is wider than the write log.
    #[error("deviation {deviation} exceeds replayable log length {log_len}")]
    DeviationOutOfRange { deviation: u64, log_len: usize },

    /// A control-plane-only request hit a process endpoint.
    #[error("{0} is not a process operation")]
    UnsupportedOperation(&'static str),
}
