//! # chainstore-process: The replicated store unit
//!
//! A process is one slot in the chain: an in-memory key→value store, a
//! role, neighbor addresses, and a bounded write log. Writes arrive at the
//! head and travel hop-by-hop to the tail; each hop stores the key dirty,
//! forwards synchronously, and marks it clean once the whole downstream
//! suffix has acknowledged. Reads answer locally when clean and consult
//! the tail when dirty.
//!
//! [`ProcessState`] is the state machine proper — no I/O, fully covered by
//! unit tests. [`ProcessService`] wraps it in a mutex, serves the RPC
//! surface, and performs the outbound hops with the lock released.

mod error;
mod state;
mod service;

pub use error::{ProcessError, ProcessResult};
pub use state::{ProcessState, ReadOutcome, Slot, Topology};
pub use service::ProcessService;

/// Default worker-pool size for a process endpoint.
pub const DEFAULT_PROCESS_WORKERS: usize = 2;
