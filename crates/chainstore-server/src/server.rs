//! Listener, worker pool, and shutdown plumbing.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use bytes::BytesMut;

use chainstore_types::Address;
use chainstore_wire::{Frame, Request, Response};

use crate::bounded_queue::{BoundedQueue, PushResult};
use crate::{ServerError, ServerResult};

/// How long an idle worker sleeps between inbox polls.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Per-connection socket deadline for reading the request and writing the
/// response. Bounds a stalled peer; handlers themselves are unbounded.
const SOCKET_DEADLINE: Duration = Duration::from_secs(10);

/// Routes one decoded request to a response.
///
/// Handlers run on worker threads and may block (replication hops do).
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> Response;
}

/// Configuration for one RPC endpoint.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_address: Address,
    /// Thread-name prefix, visible in stack dumps.
    pub name: String,
    /// Worker pool size.
    pub workers: usize,
    /// Capacity of the accepted-connection inbox.
    pub queue_capacity: usize,
}

impl ServerConfig {
    pub fn new(bind_address: impl Into<Address>) -> Self {
        Self {
            bind_address: bind_address.into(),
            name: "chainstore".to_string(),
            workers: 2,
            queue_capacity: 64,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// Stops a running server's listener and drains its workers.
///
/// Cloneable so the owning service can stop its own endpoint (a process
/// does exactly that when it is cleared).
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    address: Address,
}

impl ShutdownHandle {
    /// Signals shutdown. Idempotent; safe to call from a handler.
    pub fn shutdown(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            // The listener blocks in accept(); poke it awake so it can
            // observe the flag.
            let _ = TcpStream::connect(self.address.as_str());
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A running RPC endpoint.
pub struct Server {
    local_address: Address,
    shutdown: ShutdownHandle,
    accept_handle: Option<thread::JoinHandle<()>>,
    worker_handles: Vec<thread::JoinHandle<()>>,
}

impl Server {
    /// Binds the listener and starts the accept and worker threads.
    ///
    /// Binding to port 0 picks a free port; read it back with
    /// [`Server::local_address`].
    pub fn start(config: ServerConfig, handler: Arc<dyn Handler>) -> ServerResult<Self> {
        let listener =
            TcpListener::bind(config.bind_address.as_str()).map_err(|source| {
                ServerError::BindFailed {
                    addr: config.bind_address.to_string(),
                    source,
                }
            })?;
        let local_address = Address::new(listener.local_addr()?.to_string());

        let flag = Arc::new(AtomicBool::new(false));
        let shutdown = ShutdownHandle {
            flag: Arc::clone(&flag),
            address: local_address.clone(),
        };

        let inbox: Arc<BoundedQueue<TcpStream>> = Arc::new(BoundedQueue::new(config.queue_capacity));

        let mut worker_handles = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let inbox = Arc::clone(&inbox);
            let handler = Arc::clone(&handler);
            let flag = Arc::clone(&flag);
            let handle = thread::Builder::new()
                .name(format!("{}-wkr-{worker_id}", config.name))
                .spawn(move || worker_loop(&inbox, handler.as_ref(), &flag))?;
            worker_handles.push(handle);
        }

        let accept_handle = {
            let flag = Arc::clone(&flag);
            let name = config.name.clone();
            thread::Builder::new()
                .name(format!("{name}-accept"))
                .spawn(move || accept_loop(&listener, &inbox, &flag))?
        };

        tracing::info!(address = %local_address, workers = config.workers, "endpoint listening");

        Ok(Self {
            local_address,
            shutdown,
            accept_handle: Some(accept_handle),
            worker_handles,
        })
    }

    /// The bound address, with any port-0 request resolved.
    pub fn local_address(&self) -> &Address {
        &self.local_address
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Signals shutdown and waits for the accept and worker threads.
    pub fn stop(mut self) {
        self.shutdown.shutdown();
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Blocks until the server is shut down from elsewhere.
    pub fn join(mut self) {
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn accept_loop(listener: &TcpListener, inbox: &BoundedQueue<TcpStream>, flag: &AtomicBool) {
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                if flag.load(Ordering::SeqCst) {
                    // The shutdown wake-up connection (or a late client).
                    break;
                }
                if let PushResult::Backpressure(stream) = inbox.try_push(stream) {
                    tracing::warn!("connection inbox full, shedding connection");
                    drop(stream);
                }
            }
            Err(e) => {
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }
}

fn worker_loop(inbox: &BoundedQueue<TcpStream>, handler: &dyn Handler, flag: &AtomicBool) {
    loop {
        match inbox.try_pop() {
            Some(stream) => {
                if let Err(e) = serve_connection(stream, handler) {
                    tracing::debug!(error = %e, "connection ended with error");
                }
            }
            None => {
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

/// One request/response exchange, then the connection is dropped.
fn serve_connection(mut stream: TcpStream, handler: &dyn Handler) -> std::io::Result<()> {
    stream.set_read_timeout(Some(SOCKET_DEADLINE))?;
    stream.set_write_timeout(Some(SOCKET_DEADLINE))?;

    let mut buf = BytesMut::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let request = loop {
        match Frame::decode(&mut buf) {
            Ok(Some(frame)) => match Request::from_frame(&frame) {
                Ok(request) => break request,
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable request, dropping connection");
                    return Ok(());
                }
            },
            Ok(None) => match stream.read(&mut chunk)? {
                0 => return Ok(()), // peer went away before sending a full frame
                n => buf.extend_from_slice(&chunk[..n]),
            },
            Err(e) => {
                tracing::warn!(error = %e, "bad frame, dropping connection");
                return Ok(());
            }
        }
    };

    let response = handler.handle(request);

    let mut out = BytesMut::new();
    match response.to_frame() {
        Ok(frame) => frame.encode(&mut out),
        Err(e) => {
            tracing::error!(error = %e, "response serialization failed");
            return Ok(());
        }
    }
    stream.write_all(&out)
}
