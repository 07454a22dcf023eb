//! # chainstore-client: Blocking RPC client
//!
//! One request, one response, one connection: every call opens a fresh TCP
//! stream to the target address, writes a single framed request, waits for
//! the framed response, and closes the stream. There are no retries —
//! replication gives each write exactly one attempt per hop, and a failed
//! hop is surfaced to the caller.
//!
//! [`ControlClient`] and [`ProcessClient`] wrap the raw exchange with the
//! typed RPC surfaces of the control plane and of store processes.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;

use chainstore_types::{Address, ProcessEntry, ProcessName, Role, Tag};
use chainstore_wire::{
    ErrorResponse, Frame, Request, RequestId, RequestPayload, Response, ResponsePayload, WireError,
};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur during a client call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O failure while connecting or exchanging frames.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or serialization failure.
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// The peer reported a failure.
    #[error("remote error ({:?}): {}", .0.code, .0.message)]
    Remote(ErrorResponse),

    /// The peer closed the connection before a full response arrived.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// The response's correlation id does not match the request's.
    #[error("response id does not match request id")]
    MismatchedRequestId,

    /// The response payload kind does not fit the request.
    #[error("unexpected response payload for {0}")]
    UnexpectedResponse(&'static str),
}

impl ClientError {
    /// Returns the remote error payload, if this is a remote failure.
    pub fn remote(&self) -> Option<&ErrorResponse> {
        match self {
            ClientError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> RequestId {
    RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
}

/// Performs one framed request/response exchange with `address`.
///
/// `timeout` bounds the connect and each socket read/write; `None` blocks
/// indefinitely, which is the replication default — a stuck downstream hop
/// stalls its caller rather than spuriously failing the write.
pub fn call(
    address: &Address,
    payload: RequestPayload,
    timeout: Option<Duration>,
) -> ClientResult<Response> {
    let request = Request::new(next_request_id(), payload);
    tracing::debug!(peer = %address, op = request.payload.op(), "rpc call");

    let mut stream = connect(address, timeout)?;
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;

    let mut buf = BytesMut::new();
    request.to_frame()?.encode(&mut buf);
    stream.write_all(&buf)?;

    let mut read_buf = BytesMut::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(frame) = Frame::decode(&mut read_buf)? {
            let response = Response::from_frame(&frame)?;
            if response.id != request.id {
                return Err(ClientError::MismatchedRequestId);
            }
            return Ok(response);
        }
        match stream.read(&mut chunk)? {
            0 => return Err(ClientError::ConnectionClosed),
            n => read_buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn connect(address: &Address, timeout: Option<Duration>) -> ClientResult<TcpStream> {
    match timeout {
        None => Ok(TcpStream::connect(address.as_str())?),
        Some(t) => {
            let mut last_err = None;
            for addr in address.as_str().to_socket_addrs()? {
                match TcpStream::connect_timeout(&addr, t) {
                    Ok(stream) => return Ok(stream),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(last_err
                .unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "address resolved to nothing")
                })
                .into())
        }
    }
}

fn expect_ack(response: Response, op: &'static str) -> ClientResult<()> {
    match response.payload {
        ResponsePayload::Ack => Ok(()),
        ResponsePayload::Error(e) => Err(ClientError::Remote(e)),
        _ => Err(ClientError::UnexpectedResponse(op)),
    }
}

// ============================================================================
// Control plane surface
// ============================================================================

/// Typed client for the control plane.
#[derive(Debug, Clone)]
pub struct ControlClient {
    address: Address,
    timeout: Option<Duration>,
}

impl ControlClient {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            timeout: None,
        }
    }

    /// Bounds connect and socket operations for every call on this client.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn add_process(&self, name: ProcessName, address: Address) -> ClientResult<()> {
        let response = call(
            &self.address,
            RequestPayload::AddProcess { name, address },
            self.timeout,
        )?;
        expect_ack(response, "add_process")
    }

    pub fn create_chain(&self) -> ClientResult<Vec<ProcessEntry>> {
        let response = call(&self.address, RequestPayload::CreateChain, self.timeout)?;
        match response.payload {
            ResponsePayload::Chain(chain) => Ok(chain),
            ResponsePayload::Error(e) => Err(ClientError::Remote(e)),
            _ => Err(ClientError::UnexpectedResponse("create_chain")),
        }
    }

    pub fn list_chain(&self) -> ClientResult<String> {
        let response = call(&self.address, RequestPayload::ListChain, self.timeout)?;
        match response.payload {
            ResponsePayload::ChainListing(listing) => Ok(listing),
            ResponsePayload::Error(e) => Err(ClientError::Remote(e)),
            _ => Err(ClientError::UnexpectedResponse("list_chain")),
        }
    }

    pub fn clear(&self) -> ClientResult<()> {
        let response = call(&self.address, RequestPayload::Clear, self.timeout)?;
        expect_ack(response, "clear")
    }

    pub fn get_head(&self) -> ClientResult<ProcessEntry> {
        let response = call(&self.address, RequestPayload::GetHead, self.timeout)?;
        match response.payload {
            ResponsePayload::Head(entry) => Ok(entry),
            ResponsePayload::Error(e) => Err(ClientError::Remote(e)),
            _ => Err(ClientError::UnexpectedResponse("get_head")),
        }
    }

    pub fn remove_head(&self) -> ClientResult<()> {
        let response = call(&self.address, RequestPayload::RemoveHead, self.timeout)?;
        expect_ack(response, "remove_head")
    }

    pub fn restore_head(&self) -> ClientResult<()> {
        let response = call(&self.address, RequestPayload::RestoreHead, self.timeout)?;
        expect_ack(response, "restore_head")
    }
}

// ============================================================================
// Process surface
// ============================================================================

/// Typed client for a store process endpoint.
#[derive(Debug, Clone)]
pub struct ProcessClient {
    address: Address,
    timeout: Option<Duration>,
}

impl ProcessClient {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            timeout: None,
        }
    }

    /// Bounds connect and socket operations for every call on this client.
    ///
    /// Replication hops deliberately do not set this: a write with a test
    /// delay sleeps at every hop, and an intermediate deadline would fail
    /// writes the protocol considers merely slow.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn initialize(
        &self,
        process: ProcessName,
        predecessor: Option<Address>,
        successor: Option<Address>,
        head: Option<Address>,
        tail: Option<Address>,
        role: Role,
    ) -> ClientResult<()> {
        let response = call(
            &self.address,
            RequestPayload::Initialize {
                process,
                predecessor,
                successor,
                head,
                tail,
                role,
            },
            self.timeout,
        )?;
        expect_ack(response, "initialize")
    }

    pub fn set_role(&self, process: ProcessName, role: Role) -> ClientResult<()> {
        let response = call(
            &self.address,
            RequestPayload::SetRole { process, role },
            self.timeout,
        )?;
        expect_ack(response, "set_role")
    }

    pub fn set_predecessor(
        &self,
        process: ProcessName,
        predecessor: Option<Address>,
    ) -> ClientResult<()> {
        let response = call(
            &self.address,
            RequestPayload::SetPredecessor {
                process,
                predecessor,
            },
            self.timeout,
        )?;
        expect_ack(response, "set_predecessor")
    }

    pub fn get_deviation(&self, process: ProcessName) -> ClientResult<u64> {
        let response = call(
            &self.address,
            RequestPayload::GetDeviation { process },
            self.timeout,
        )?;
        match response.payload {
            ResponsePayload::Deviation(deviation) => Ok(deviation),
            ResponsePayload::Error(e) => Err(ClientError::Remote(e)),
            _ => Err(ClientError::UnexpectedResponse("get_deviation")),
        }
    }

    pub fn reconcile(
        &self,
        source: ProcessName,
        target: ProcessName,
        target_address: Address,
    ) -> ClientResult<()> {
        let response = call(
            &self.address,
            RequestPayload::Reconcile {
                source,
                target,
                target_address,
            },
            self.timeout,
        )?;
        expect_ack(response, "reconcile")
    }

    pub fn write(&self, key: impl Into<String>, value: f64, delay_secs: u32) -> ClientResult<()> {
        let response = call(
            &self.address,
            RequestPayload::Write {
                key: key.into(),
                value,
                delay_secs,
            },
            self.timeout,
        )?;
        expect_ack(response, "write")
    }

    pub fn read(&self, key: impl Into<String>) -> ClientResult<(f64, bool)> {
        let response = call(
            &self.address,
            RequestPayload::Read { key: key.into() },
            self.timeout,
        )?;
        match response.payload {
            ResponsePayload::ReadResult { value, found } => Ok((value, found)),
            ResponsePayload::Error(e) => Err(ClientError::Remote(e)),
            _ => Err(ClientError::UnexpectedResponse("read")),
        }
    }

    pub fn list_books(&self) -> ClientResult<BTreeMap<String, f64>> {
        let response = call(&self.address, RequestPayload::ListBooks, self.timeout)?;
        match response.payload {
            ResponsePayload::Books(books) => Ok(books),
            ResponsePayload::Error(e) => Err(ClientError::Remote(e)),
            _ => Err(ClientError::UnexpectedResponse("list_books")),
        }
    }

    pub fn data_status(&self) -> ClientResult<BTreeMap<String, Tag>> {
        let response = call(&self.address, RequestPayload::DataStatus, self.timeout)?;
        match response.payload {
            ResponsePayload::Status(status) => Ok(status),
            ResponsePayload::Error(e) => Err(ClientError::Remote(e)),
            _ => Err(ClientError::UnexpectedResponse("data_status")),
        }
    }

    pub fn raw_write(
        &self,
        process: ProcessName,
        key: impl Into<String>,
        value: f64,
    ) -> ClientResult<()> {
        let response = call(
            &self.address,
            RequestPayload::RawWrite {
                process,
                key: key.into(),
                value,
            },
            self.timeout,
        )?;
        expect_ack(response, "raw_write")
    }

    pub fn clear(&self) -> ClientResult<()> {
        let response = call(&self.address, RequestPayload::Clear, self.timeout)?;
        expect_ack(response, "clear")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainstore_wire::ErrorCode;
    use std::net::TcpListener;
    use std::thread;

    /// Answers exactly one connection with the response produced by `f`.
    fn one_shot_server(
        f: impl FnOnce(Request) -> Response + Send + 'static,
    ) -> (Address, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = Address::new(listener.local_addr().unwrap().to_string());

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = BytesMut::new();
            let mut chunk = [0u8; 1024];
            let frame = loop {
                if let Some(frame) = Frame::decode(&mut buf).unwrap() {
                    break frame;
                }
                let n = stream.read(&mut chunk).unwrap();
                buf.extend_from_slice(&chunk[..n]);
            };
            let request = Request::from_frame(&frame).unwrap();

            let mut out = BytesMut::new();
            f(request).to_frame().unwrap().encode(&mut out);
            stream.write_all(&out).unwrap();
        });

        (address, handle)
    }

    #[test]
    fn call_roundtrip() {
        let (address, handle) = one_shot_server(|request| {
            assert!(matches!(request.payload, RequestPayload::ListChain));
            Response::new(
                request.id,
                ResponsePayload::ChainListing("A (Head) -> B (Tail)".to_string()),
            )
        });

        let listing = ControlClient::new(address).list_chain().unwrap();
        assert_eq!(listing, "A (Head) -> B (Tail)");
        handle.join().unwrap();
    }

    #[test]
    fn remote_error_is_surfaced() {
        let (address, handle) = one_shot_server(|request| {
            Response::error(request.id, ErrorCode::InvalidState, "no chain yet")
        });

        let err = ControlClient::new(address).list_chain().unwrap_err();
        let remote = err.remote().expect("expected a remote error");
        assert_eq!(remote.code, ErrorCode::InvalidState);
        handle.join().unwrap();
    }

    #[test]
    fn mismatched_id_is_rejected() {
        let (address, handle) = one_shot_server(|request| {
            Response::new(RequestId(request.id.0 + 1), ResponsePayload::Ack)
        });

        let err = ControlClient::new(address).clear().unwrap_err();
        assert!(matches!(err, ClientError::MismatchedRequestId));
        handle.join().unwrap();
    }

    #[test]
    fn connection_refused_is_io() {
        // Port 1 is essentially never listening on loopback.
        let client = ControlClient::new(Address::new("127.0.0.1:1"))
            .with_timeout(Duration::from_millis(200));
        assert!(matches!(client.clear(), Err(ClientError::Io(_))));
    }
}
