//! Control plane error types.

use chainstore_client::ClientError;
use chainstore_types::ProcessName;
use thiserror::Error;

/// Result type for control plane operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in the control plane.
///
/// All of these are soft: they fail the one request that triggered them
/// and leave the control plane running.
#[derive(Debug, Error)]
pub enum ControlError {
    /// `AddProcess` after the chain was created.
    #[error("registration is closed once a chain exists")]
    RegistrationClosed,

    /// `AddProcess` with a name already on the roster.
    #[error("process {0} is already registered")]
    DuplicateName(ProcessName),

    /// `CreateChain` needs at least two registered processes.
    #[error("at least 2 processes are required to create a chain, have {0}")]
    TooFewProcesses(usize),

    /// Chain-dependent operation before `CreateChain`.
    #[error("no chain has been created yet")]
    NoChain,

    /// `RemoveHead` on a chain that is already at minimum length.
    #[error("chain of {0} cannot lose its head")]
    ChainTooShort(usize),

    /// `RestoreHead` with nothing detached.
    #[error("no detached head to restore")]
    NoDetachedHead,

    /// A topology RPC to a process failed.
    #[error("downstream call failed: {0}")]
    Downstream(#[from] ClientError),

    /// A control-only request arrived somewhere it does not belong.
    #[error("{0} is not a control plane operation")]
    UnsupportedOperation(&'static str),
}
