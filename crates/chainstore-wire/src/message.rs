//! RPC request and response envelopes.
//!
//! The payload enums cover the full RPC surface:
//!
//! ## Node → Control plane
//! - [`RequestPayload::AddProcess`] - register a store process
//! - [`RequestPayload::CreateChain`] - shuffle the roster into a chain
//! - [`RequestPayload::ListChain`] - human-readable chain listing
//! - [`RequestPayload::GetHead`] - current head entry
//! - [`RequestPayload::RemoveHead`] - detach the head
//! - [`RequestPayload::RestoreHead`] - restore the most recent detached head
//! - [`RequestPayload::Clear`] - tear everything down (also Control → Process)
//!
//! ## Control plane → Process
//! - [`RequestPayload::Initialize`] - set topology and role
//! - [`RequestPayload::SetRole`] / [`RequestPayload::SetPredecessor`]
//! - [`RequestPayload::GetDeviation`] - read the write counter
//! - [`RequestPayload::Reconcile`] - replay missed writes to a target
//!
//! ## Client / Process → Process
//! - [`RequestPayload::Write`] - replicated write (head entry, hop-by-hop)
//! - [`RequestPayload::Read`] - read, routed to the tail when dirty
//! - [`RequestPayload::ListBooks`] / [`RequestPayload::DataStatus`]
//! - [`RequestPayload::RawWrite`] - reconciliation-only direct store

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use chainstore_types::{Address, ProcessEntry, ProcessName, Role, Tag};

use crate::WireResult;
use crate::frame::Frame;

/// Correlates a response with its request on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct RequestId(pub u64);

/// A request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub payload: RequestPayload,
}

impl Request {
    pub fn new(id: RequestId, payload: RequestPayload) -> Self {
        Self { id, payload }
    }

    /// Decodes a request from a frame payload.
    pub fn from_frame(frame: &Frame) -> WireResult<Self> {
        Ok(postcard::from_bytes(frame.payload())?)
    }

    /// Encodes this request into a frame.
    pub fn to_frame(&self) -> WireResult<Frame> {
        let bytes = postcard::to_allocvec(self)?;
        Ok(Frame::new(Bytes::from(bytes)))
    }
}

/// All request payloads in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestPayload {
    /// Register a process with the control plane.
    AddProcess { name: ProcessName, address: Address },

    /// Shuffle the roster into a chain and initialize every member.
    CreateChain,

    /// Render the chain as `"H (Head) -> … -> T (Tail)"`.
    ListChain,

    /// Tear down the chain, detached heads included. Sent by operators to
    /// the control plane and broadcast by the control plane to processes.
    Clear,

    /// Return the current head's entry.
    GetHead,

    /// Detach the head from the chain.
    RemoveHead,

    /// Restore the most recently detached head, reconciling its misses.
    RestoreHead,

    /// Set a process's topology fields and role.
    Initialize {
        process: ProcessName,
        predecessor: Option<Address>,
        successor: Option<Address>,
        head: Option<Address>,
        tail: Option<Address>,
        role: Role,
    },

    /// Change a process's role in place.
    SetRole { process: ProcessName, role: Role },

    /// Change a process's predecessor address; `None` clears it.
    SetPredecessor {
        process: ProcessName,
        predecessor: Option<Address>,
    },

    /// Read a process's write counter (its numerical deviation).
    GetDeviation { process: ProcessName },

    /// Ask `source` to replay its write-log suffix to `target`.
    Reconcile {
        source: ProcessName,
        target: ProcessName,
        target_address: Address,
    },

    /// Replicated write. `delay_secs` is a propagated per-hop pause used
    /// to widen replication windows in tests.
    Write {
        key: String,
        value: f64,
        delay_secs: u32,
    },

    /// Read one key.
    Read { key: String },

    /// Read every key this process can answer for.
    ListBooks,

    /// Report the clean/dirty tag of every locally stored key.
    DataStatus,

    /// Direct store used by reconciliation; bypasses replication.
    RawWrite {
        process: ProcessName,
        key: String,
        value: f64,
    },
}

impl RequestPayload {
    /// Short operation name for logs.
    pub fn op(&self) -> &'static str {
        match self {
            RequestPayload::AddProcess { .. } => "add_process",
            RequestPayload::CreateChain => "create_chain",
            RequestPayload::ListChain => "list_chain",
            RequestPayload::Clear => "clear",
            RequestPayload::GetHead => "get_head",
            RequestPayload::RemoveHead => "remove_head",
            RequestPayload::RestoreHead => "restore_head",
            RequestPayload::Initialize { .. } => "initialize",
            RequestPayload::SetRole { .. } => "set_role",
            RequestPayload::SetPredecessor { .. } => "set_predecessor",
            RequestPayload::GetDeviation { .. } => "get_deviation",
            RequestPayload::Reconcile { .. } => "reconcile",
            RequestPayload::Write { .. } => "write",
            RequestPayload::Read { .. } => "read",
            RequestPayload::ListBooks => "list_books",
            RequestPayload::DataStatus => "data_status",
            RequestPayload::RawWrite { .. } => "raw_write",
        }
    }
}

/// A response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: RequestId,
    pub payload: ResponsePayload,
}

impl Response {
    pub fn new(id: RequestId, payload: ResponsePayload) -> Self {
        Self { id, payload }
    }

    /// Builds an error response.
    pub fn error(id: RequestId, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id,
            payload: ResponsePayload::Error(ErrorResponse {
                code,
                message: message.into(),
            }),
        }
    }

    /// Decodes a response from a frame payload.
    pub fn from_frame(frame: &Frame) -> WireResult<Self> {
        Ok(postcard::from_bytes(frame.payload())?)
    }

    /// Encodes this response into a frame.
    pub fn to_frame(&self) -> WireResult<Frame> {
        let bytes = postcard::to_allocvec(self)?;
        Ok(Frame::new(Bytes::from(bytes)))
    }
}

/// All response payloads in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// Operation succeeded with nothing to report.
    Ack,

    /// The chain ordering, head first.
    Chain(Vec<ProcessEntry>),

    /// Human-readable chain listing.
    ChainListing(String),

    /// The head's entry.
    Head(ProcessEntry),

    /// A process's write counter.
    Deviation(u64),

    /// Result of a read. `found` is authoritative; `value` carries a fixed
    /// sentinel when the key is absent.
    ReadResult { value: f64, found: bool },

    /// Key → value listing.
    Books(BTreeMap<String, f64>),

    /// Key → clean/dirty tag listing.
    Status(BTreeMap<String, Tag>),

    /// Operation failed.
    Error(ErrorResponse),
}

/// Machine-readable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed or misdirected request.
    InvalidRequest,
    /// Operation not legal in the current state.
    InvalidState,
    /// The process is disabled and refuses replication traffic.
    Disabled,
    /// A downstream peer could not be reached or answered with an error.
    Unavailable,
    /// Reconciliation deviation exceeds the write-log capacity.
    OutOfRange,
    /// Anything else.
    Internal,
}

/// Failure payload carried in [`ResponsePayload::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn request_roundtrips_through_frame() {
        let request = Request::new(
            RequestId(7),
            RequestPayload::Write {
                key: "dune".to_string(),
                value: 19.99,
                delay_secs: 0,
            },
        );

        let mut buf = BytesMut::new();
        request.to_frame().unwrap().encode(&mut buf);
        let frame = Frame::decode(&mut buf).unwrap().unwrap();
        let decoded = Request::from_frame(&frame).unwrap();

        assert_eq!(decoded, request);
    }

    #[test]
    fn role_encodes_as_contract_integer() {
        // The role field must serialize as its fixed wire integer, not as
        // an enum discriminant postcard picks on its own.
        let bytes = postcard::to_allocvec(&Role::Disabled).unwrap();
        assert_eq!(bytes, vec![4]);

        let bytes = postcard::to_allocvec(&Role::None).unwrap();
        assert_eq!(bytes, vec![1]);
    }

    #[test]
    fn error_response_construction() {
        let response = Response::error(RequestId(3), ErrorCode::InvalidState, "no chain yet");
        match response.payload {
            ResponsePayload::Error(ref e) => {
                assert_eq!(e.code, ErrorCode::InvalidState);
                assert_eq!(e.message, "no chain yet");
            }
            _ => panic!("expected error payload"),
        }
    }

    #[test]
    fn status_tags_serialize_lowercase() {
        // Tag rides in DataStatus responses; operators see the strings.
        assert_eq!(Tag::Clean.to_string(), "clean");
        assert_eq!(Tag::Dirty.to_string(), "dirty");
    }
}
