//! RPC service wrapping the state machine.
//!
//! One mutex guards the whole state. The lock is held across local
//! mutation and released across every outbound hop — a forward to the
//! successor, a dirty read against the tail, a reconciliation replay —
//! then reacquired to apply the result. The chain is acyclic, so a hop
//! never re-enters its own caller's lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::Duration;

use tracing::instrument;

use chainstore_client::ProcessClient;
use chainstore_server::{Handler, Server, ServerConfig, ServerResult, ShutdownHandle};
use chainstore_types::{Address, NOT_FOUND_VALUE, ProcessName, Role};
use chainstore_wire::{ErrorCode, Request, RequestPayload, Response, ResponsePayload};

use crate::state::{ProcessState, ReadOutcome, Topology};
use crate::{ProcessError, ProcessResult};

/// A store process: state machine plus RPC surface.
pub struct ProcessService {
    state: Mutex<ProcessState>,
    shutdown: OnceLock<ShutdownHandle>,
}

impl ProcessService {
    pub fn new(name: ProcessName, control_address: Address) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ProcessState::new(name, control_address)),
            shutdown: OnceLock::new(),
        })
    }

    /// Starts this process's RPC endpoint and wires `Clear` to its
    /// shutdown handle.
    pub fn serve(self: &Arc<Self>, config: ServerConfig) -> ServerResult<Server> {
        let server = Server::start(config, Arc::clone(self) as Arc<dyn Handler>)?;
        let _ = self.shutdown.set(server.shutdown_handle());
        Ok(server)
    }

    /// A mutex poisoned by a panicking worker still holds consistent
    /// state; keep serving rather than wedging the whole process.
    fn lock(&self) -> MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn name(&self) -> ProcessName {
        self.lock().name().clone()
    }

    #[instrument(skip_all, fields(process = %self.name(), op = payload.op()))]
    fn dispatch(&self, payload: RequestPayload) -> ProcessResult<ResponsePayload> {
        match payload {
            RequestPayload::Initialize {
                process,
                predecessor,
                successor,
                head,
                tail,
                role,
            } => {
                let mut state = self.lock();
                state.ensure_named(&process)?;
                state.initialize(Topology {
                    predecessor,
                    successor,
                    head,
                    tail,
                    role,
                })?;
                tracing::info!(role = %role, "initialized into chain");
                Ok(ResponsePayload::Ack)
            }

            RequestPayload::SetRole { process, role } => {
                let mut state = self.lock();
                state.ensure_named(&process)?;
                state.set_role(role)?;
                tracing::info!(role = %role, "role changed");
                Ok(ResponsePayload::Ack)
            }

            RequestPayload::SetPredecessor {
                process,
                predecessor,
            } => {
                let mut state = self.lock();
                state.ensure_named(&process)?;
                state.set_predecessor(predecessor)?;
                Ok(ResponsePayload::Ack)
            }

            RequestPayload::GetDeviation { process } => {
                let state = self.lock();
                state.ensure_named(&process)?;
                Ok(ResponsePayload::Deviation(state.deviation()))
            }

            RequestPayload::Write {
                key,
                value,
                delay_secs,
            } => {
                self.replicated_write(&key, value, delay_secs)?;
                Ok(ResponsePayload::Ack)
            }

            RequestPayload::Read { key } => {
                let (value, found) = self.routed_read(&key)?;
                Ok(ResponsePayload::ReadResult { value, found })
            }

            RequestPayload::ListBooks => Ok(ResponsePayload::Books(self.list_books()?)),

            RequestPayload::DataStatus => {
                let state = self.lock();
                match state.lifecycle() {
                    chainstore_types::Lifecycle::Inactive => Err(ProcessError::Inactive),
                    chainstore_types::Lifecycle::Initialized => Err(ProcessError::NotActive),
                    chainstore_types::Lifecycle::ChainActive => {
                        Ok(ResponsePayload::Status(state.data_status()))
                    }
                }
            }

            RequestPayload::Reconcile {
                source,
                target,
                target_address,
            } => {
                self.reconcile(&source, target, target_address)?;
                Ok(ResponsePayload::Ack)
            }

            RequestPayload::RawWrite {
                process,
                key,
                value,
            } => {
                let mut state = self.lock();
                state.ensure_named(&process)?;
                state.ensure_replication_allowed()?;
                state.raw_store(&key, value);
                Ok(ResponsePayload::Ack)
            }

            RequestPayload::Clear => {
                {
                    let mut state = self.lock();
                    state.clear();
                }
                tracing::info!("cleared; stopping endpoint");
                if let Some(handle) = self.shutdown.get() {
                    handle.shutdown();
                }
                Ok(ResponsePayload::Ack)
            }

            other => Err(ProcessError::UnsupportedOperation(other.op())),
        }
    }

    /// The write hop. Sleeps the propagated delay, stages the key dirty,
    /// forwards to the successor with the lock released, and commits once
    /// the entire downstream suffix has acknowledged. The tail commits
    /// directly. A failed forward leaves the key dirty and the write
    /// failed end-to-end.
    fn replicated_write(&self, key: &str, value: f64, delay_secs: u32) -> ProcessResult<()> {
        if delay_secs > 0 {
            thread::sleep(Duration::from_secs(u64::from(delay_secs)));
        }

        let successor = {
            let mut state = self.lock();
            state.ensure_replication_allowed()?;
            // The role snapshot decides the path; a concurrent role change
            // does not reroute a write already past this point.
            if state.role() == Some(Role::Tail) {
                state.commit(key, value);
                tracing::debug!(key, value, "committed at tail");
                return Ok(());
            }
            state.stage_dirty(key, value);
            state.successor().cloned().ok_or(ProcessError::NoSuccessor)?
        };

        let forward = ProcessClient::new(successor).write(key, value, delay_secs);
        match forward {
            Ok(()) => {
                let mut state = self.lock();
                state.commit(key, value);
                tracing::debug!(key, value, "forward acknowledged");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "forward failed, key left dirty");
                Err(e.into())
            }
        }
    }

    /// Local read for clean keys; dirty keys are relayed to the tail.
    fn routed_read(&self, key: &str) -> ProcessResult<(f64, bool)> {
        let tail = {
            let state = self.lock();
            state.ensure_replication_allowed()?;
            match state.read_local(key) {
                ReadOutcome::Missing => return Ok((NOT_FOUND_VALUE, false)),
                ReadOutcome::Clean(value) => return Ok((value, true)),
                ReadOutcome::Dirty => state
                    .tail()
                    .cloned()
                    .ok_or_else(|| ProcessError::NoTail(key.to_string()))?,
            }
        };

        tracing::debug!(key, tail = %tail, "dirty key, consulting tail");
        Ok(ProcessClient::new(tail).read(key)?)
    }

    /// The tail lists its store outright; everyone else answers clean keys
    /// locally and fetches dirty ones from the tail, dropping keys the
    /// tail does not have.
    fn list_books(&self) -> ProcessResult<BTreeMap<String, f64>> {
        let (snapshot, tail) = {
            let state = self.lock();
            state.ensure_replication_allowed()?;
            if state.role() == Some(Role::Tail) {
                return Ok(state.books_unconditional());
            }
            (state.books_snapshot(), state.tail().cloned())
        };

        let tail_client = tail.map(ProcessClient::new);
        let mut books = BTreeMap::new();
        for (key, value, tag) in snapshot {
            match tag {
                chainstore_types::Tag::Clean => {
                    books.insert(key, value);
                }
                chainstore_types::Tag::Dirty => {
                    let client = tail_client
                        .as_ref()
                        .ok_or_else(|| ProcessError::NoTail(key.clone()))?;
                    let (tail_value, found) = client.read(&key)?;
                    if found {
                        books.insert(key, tail_value);
                    }
                }
            }
        }
        Ok(books)
    }

    /// Replays the write-log suffix a reconciliation target is missing.
    ///
    /// The deviation is measured against the target's live counter, so the
    /// replay is computed here rather than by the control plane.
    fn reconcile(
        &self,
        source: &ProcessName,
        target: ProcessName,
        target_address: Address,
    ) -> ProcessResult<()> {
        {
            let state = self.lock();
            state.ensure_named(source)?;
            state.ensure_replication_allowed()?;
        }

        let client = ProcessClient::new(target_address);
        let target_counter = client.get_deviation(target.clone())?;

        let plan = {
            let state = self.lock();
            state.replay_suffix(target_counter)?
        };

        tracing::info!(
            target = %target,
            replay = plan.len(),
            "reconciling detached process"
        );
        for (key, value) in plan {
            client.raw_write(target.clone(), &key, value)?;
        }
        Ok(())
    }
}

impl Handler for ProcessService {
    fn handle(&self, request: Request) -> Response {
        let id = request.id;
        match self.dispatch(request.payload) {
            Ok(payload) => Response::new(id, payload),
            Err(e) => {
                tracing::warn!(error = %e, "request failed");
                Response::error(id, error_code(&e), e.to_string())
            }
        }
    }
}

fn error_code(error: &ProcessError) -> ErrorCode {
    match error {
        ProcessError::Disabled => ErrorCode::Disabled,
        ProcessError::Inactive
        | ProcessError::NotActive
        | ProcessError::Faulted
        | ProcessError::NoSuccessor
        | ProcessError::NoTail(_) => ErrorCode::InvalidState,
        ProcessError::WrongProcess { .. }
        | ProcessError::InvalidTopology { .. }
        | ProcessError::UnsupportedOperation(_) => ErrorCode::InvalidRequest,
        ProcessError::Downstream(_) => ErrorCode::Unavailable,
        ProcessError::DeviationOutOfRange { .. } => ErrorCode::OutOfRange,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainstore_client::ClientError;
    use chainstore_server::ServerConfig;
    use chainstore_types::Tag;
    use chainstore_wire::ErrorCode;

    struct TestProcess {
        service: Arc<ProcessService>,
        server: Server,
        client: ProcessClient,
        name: ProcessName,
    }

    fn spawn_process(name: &str) -> TestProcess {
        let name = ProcessName::from(name);
        let service = ProcessService::new(name.clone(), Address::from("127.0.0.1:50050"));
        let server = service
            .serve(ServerConfig::new("127.0.0.1:0").with_workers(2))
            .unwrap();
        let client = ProcessClient::new(server.local_address().clone());
        TestProcess {
            service,
            server,
            client,
            name,
        }
    }

    impl TestProcess {
        fn address(&self) -> Address {
            self.server.local_address().clone()
        }
    }

    /// Wires head → tail and returns the pair.
    fn spawn_pair() -> (TestProcess, TestProcess) {
        let head = spawn_process("ps0");
        let tail = spawn_process("ps1");

        tail.client
            .initialize(
                tail.name.clone(),
                Some(head.address()),
                None,
                Some(head.address()),
                None,
                Role::Tail,
            )
            .unwrap();
        head.client
            .initialize(
                head.name.clone(),
                None,
                Some(tail.address()),
                None,
                Some(tail.address()),
                Role::Head,
            )
            .unwrap();

        (head, tail)
    }

    #[test]
    fn write_replicates_and_reads_clean() {
        let (head, tail) = spawn_pair();

        head.client.write("dune", 19.99, 0).unwrap();

        assert_eq!(head.client.read("dune").unwrap(), (19.99, true));
        assert_eq!(tail.client.read("dune").unwrap(), (19.99, true));

        // Clean at both ends after the full ack.
        assert_eq!(head.client.data_status().unwrap()["dune"], Tag::Clean);
        assert_eq!(tail.client.data_status().unwrap()["dune"], Tag::Clean);

        // One committed write on each hop.
        assert_eq!(head.client.get_deviation(head.name.clone()).unwrap(), 1);
        assert_eq!(tail.client.get_deviation(tail.name.clone()).unwrap(), 1);
    }

    #[test]
    fn missing_key_returns_sentinel() {
        let (head, _tail) = spawn_pair();
        assert_eq!(head.client.read("nope").unwrap(), (NOT_FOUND_VALUE, false));
    }

    #[test]
    fn failed_forward_leaves_dirty_and_routes_reads_to_tail() {
        // Head whose successor is unreachable but whose tail pointer is a
        // live process that already committed the key.
        let head = spawn_process("ps0");
        let tail = spawn_process("ps1");

        tail.client
            .initialize(
                tail.name.clone(),
                Some(head.address()),
                None,
                Some(head.address()),
                None,
                Role::Tail,
            )
            .unwrap();
        tail.client.write("dune", 19.99, 0).unwrap();

        head.client
            .initialize(
                head.name.clone(),
                None,
                Some(Address::from("127.0.0.1:1")), // nothing listens here
                None,
                Some(tail.address()),
                Role::Head,
            )
            .unwrap();

        // The forward fails end-to-end and the key stays dirty.
        let err = head.client.write("dune", 19.99, 0).unwrap_err();
        let remote = err.remote().expect("expected a remote error");
        assert_eq!(remote.code, ErrorCode::Unavailable);
        assert_eq!(head.client.data_status().unwrap()["dune"], Tag::Dirty);

        // The dirty key is never resolved locally: the read relays the
        // tail's committed value.
        assert_eq!(head.client.read("dune").unwrap(), (19.99, true));
        // And a dirty key the tail has never seen relays not-found.
        let _ = head.client.write("arrakis", 5.0, 0);
        assert_eq!(
            head.client.read("arrakis").unwrap(),
            (NOT_FOUND_VALUE, false)
        );

        head.server.stop();
        tail.server.stop();
    }

    #[test]
    fn list_books_merges_tail_answers() {
        let head = spawn_process("ps0");
        let tail = spawn_process("ps1");

        tail.client
            .initialize(
                tail.name.clone(),
                Some(head.address()),
                None,
                Some(head.address()),
                None,
                Role::Tail,
            )
            .unwrap();
        tail.client.write("dune", 21.0, 0).unwrap();

        head.client
            .initialize(
                head.name.clone(),
                None,
                Some(Address::from("127.0.0.1:1")),
                None,
                Some(tail.address()),
                Role::Head,
            )
            .unwrap();

        // Dirty at the head with a stale value; the listing must prefer
        // the tail's committed one and drop keys the tail lacks.
        let _ = head.client.write("dune", 19.99, 0);
        let _ = head.client.write("unknown", 1.0, 0);

        let books = head.client.list_books().unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books["dune"], 21.0);

        let tail_books = tail.client.list_books().unwrap();
        assert_eq!(tail_books["dune"], 21.0);

        head.server.stop();
        tail.server.stop();
    }

    #[test]
    fn replication_refused_before_initialize() {
        let p = spawn_process("ps0");
        let err = p.client.write("dune", 1.0, 0).unwrap_err();
        assert_eq!(err.remote().unwrap().code, ErrorCode::InvalidState);
        p.server.stop();
    }

    #[test]
    fn disabled_refuses_writes() {
        let (head, tail) = spawn_pair();
        head.client
            .set_role(head.name.clone(), Role::Disabled)
            .unwrap();

        let err = head.client.write("dune", 1.0, 0).unwrap_err();
        assert_eq!(err.remote().unwrap().code, ErrorCode::Disabled);

        // Deviation queries still answer while disabled; RestoreHead
        // depends on them.
        assert_eq!(head.client.get_deviation(head.name.clone()).unwrap(), 0);

        head.server.stop();
        tail.server.stop();
    }

    #[test]
    fn reconcile_replays_missed_writes() {
        let (head, tail) = spawn_pair();

        // Three commits the "detached" process never saw.
        head.client.write("a", 1.0, 0).unwrap();
        head.client.write("b", 2.0, 0).unwrap();
        head.client.write("c", 3.0, 0).unwrap();

        let detached = spawn_process("ps2");
        detached
            .client
            .initialize(
                detached.name.clone(),
                None,
                Some(head.address()),
                None,
                Some(tail.address()),
                Role::Head,
            )
            .unwrap();

        head.client
            .reconcile(head.name.clone(), detached.name.clone(), detached.address())
            .unwrap();

        for (key, value) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
            assert_eq!(detached.client.read(key).unwrap(), (value, true));
            assert_eq!(detached.client.data_status().unwrap()[key], Tag::Clean);
        }
        // Raw replay leaves the target's own counter untouched.
        assert_eq!(
            detached
                .client
                .get_deviation(detached.name.clone())
                .unwrap(),
            0
        );

        head.server.stop();
        tail.server.stop();
        detached.server.stop();
    }

    #[test]
    fn reconcile_refused_beyond_log() {
        let (head, tail) = spawn_pair();
        for i in 0..7 {
            head.client.write(&format!("k{i}"), f64::from(i), 0).unwrap();
        }

        let detached = spawn_process("ps2");
        detached
            .client
            .initialize(
                detached.name.clone(),
                None,
                Some(head.address()),
                None,
                Some(tail.address()),
                Role::Head,
            )
            .unwrap();

        let err = head
            .client
            .reconcile(head.name.clone(), detached.name.clone(), detached.address())
            .unwrap_err();
        assert_eq!(err.remote().unwrap().code, ErrorCode::OutOfRange);

        head.server.stop();
        tail.server.stop();
        detached.server.stop();
    }

    #[test]
    fn clear_stops_the_endpoint() {
        let (head, tail) = spawn_pair();
        let address = head.address();

        head.client.clear().unwrap();
        assert_eq!(head.service.lock().lifecycle(), chainstore_types::Lifecycle::Inactive);

        head.server.join();
        let late = ProcessClient::new(address).with_timeout(Duration::from_millis(300));
        assert!(matches!(
            late.read("dune"),
            Err(ClientError::Io(_) | ClientError::ConnectionClosed)
        ));

        tail.server.stop();
    }

    #[test]
    fn request_for_other_process_rejected() {
        let p = spawn_process("ps0");
        let err = p
            .client
            .get_deviation(ProcessName::from("ps9"))
            .unwrap_err();
        assert_eq!(err.remote().unwrap().code, ErrorCode::InvalidRequest);
        p.server.stop();
    }
}
