//! # chainstore-node: Host container for store processes
//!
//! A node spawns and supervises local store processes (each with its own
//! RPC endpoint on a port derived from the node's base address), forwards
//! operator commands to the control plane, and routes client writes to the
//! current head and client reads to its local processes. It holds no
//! replication state of its own.
//!
//! The interactive operator shell lives in [`shell`]; the supervision and
//! routing logic in [`NodeSupervisor`].

pub mod shell;
mod supervisor;

pub use supervisor::{LocalProcess, NodeSupervisor};

use chainstore_client::ClientError;
use chainstore_types::AddressError;
use chainstore_server::ServerError;
use thiserror::Error;

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors that can occur in the node supervisor.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Processes exist already; the roster cannot be grown in place.
    #[error(
        "processes have already been created; clear the chain before creating a different set"
    )]
    ProcessesExist,

    /// An operation needed local processes before any were created.
    #[error("no local processes; create them with Local-store-ps first")]
    NoProcesses,

    /// `Data-status` named a process this node does not host.
    #[error("no local process named {0}")]
    UnknownProcess(String),

    /// The node's base address cannot yield process endpoints.
    #[error("bad node address: {0}")]
    Address(#[from] AddressError),

    /// A process endpoint failed to start.
    #[error("failed to start process endpoint: {0}")]
    Server(#[from] ServerError),

    /// A call to the control plane or a process failed.
    #[error(transparent)]
    Client(#[from] ClientError),
}
