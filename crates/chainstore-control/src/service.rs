//! RPC service driving the control plane.
//!
//! The plane sits behind one mutex held for the whole of each operation,
//! topology fan-out included. Control traffic is rare and operator-driven;
//! atomicity of a reshape matters more than overlap. Processes never call
//! back into the control plane, so holding the lock across the fan-out
//! cannot deadlock.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::instrument;

use chainstore_client::ProcessClient;
use chainstore_server::{Handler, Server, ServerConfig, ServerResult};
use chainstore_types::{ControlState, Role};
use chainstore_wire::{ErrorCode, Request, RequestPayload, Response, ResponsePayload};

use crate::plane::ControlPlane;
use crate::{ControlError, ControlResult};

/// The control plane behind its RPC surface.
#[derive(Default)]
pub struct ControlService {
    plane: Mutex<ControlPlane>,
}

impl ControlService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Starts the control plane endpoint.
    pub fn serve(self: &Arc<Self>, config: ServerConfig) -> ServerResult<Server> {
        Server::start(config, Arc::clone(self) as Arc<dyn Handler>)
    }

    fn lock(&self) -> MutexGuard<'_, ControlPlane> {
        self.plane
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[instrument(skip_all, fields(op = payload.op()))]
    fn dispatch(&self, payload: RequestPayload) -> ControlResult<ResponsePayload> {
        let mut plane = self.lock();
        match payload {
            RequestPayload::AddProcess { name, address } => {
                plane.add_process(name.clone(), address.clone())?;
                tracing::info!(process = %name, %address, "process registered");
                Ok(ResponsePayload::Ack)
            }

            RequestPayload::CreateChain => {
                let already_created = plane.state() == ControlState::ChainCreated;
                let chain = plane.create_chain(&mut rand::thread_rng())?;
                if !already_created {
                    for assignment in plane.assignments() {
                        let client = ProcessClient::new(assignment.process.address.clone());
                        if let Err(e) = client.initialize(
                            assignment.process.name.clone(),
                            assignment.predecessor,
                            assignment.successor,
                            assignment.head,
                            assignment.tail,
                            assignment.role,
                        ) {
                            tracing::warn!(
                                process = %assignment.process.name,
                                error = %e,
                                "initialize failed, process will refuse traffic"
                            );
                        }
                    }
                    tracing::info!(length = chain.len(), "chain created");
                }
                Ok(ResponsePayload::Chain(chain))
            }

            RequestPayload::ListChain => Ok(ResponsePayload::ChainListing(plane.list_chain()?)),

            RequestPayload::GetHead => Ok(ResponsePayload::Head(plane.head()?.clone())),

            RequestPayload::RemoveHead => {
                let (removed, new_front) = plane.detach_head()?;
                tracing::info!(removed = %removed.name, new_head = %new_front.name, "head detached");

                ProcessClient::new(removed.address)
                    .set_role(removed.name, Role::Disabled)?;
                let front_client = ProcessClient::new(new_front.address);
                front_client.set_role(new_front.name.clone(), Role::Head)?;
                front_client.set_predecessor(new_front.name, None)?;
                Ok(ResponsePayload::Ack)
            }

            RequestPayload::RestoreHead => {
                self.restore_head(&mut plane)?;
                Ok(ResponsePayload::Ack)
            }

            RequestPayload::Clear => {
                for target in plane.clear_targets() {
                    if let Err(e) = ProcessClient::new(target.address).clear() {
                        tracing::warn!(process = %target.name, error = %e, "clear did not reach process");
                    }
                }
                plane.reset();
                tracing::info!("control plane reset");
                Ok(ResponsePayload::Ack)
            }

            other => Err(ControlError::UnsupportedOperation(other.op())),
        }
    }

    /// Restores the most recently detached head, or drops it for good when
    /// its divergence outgrew the write log.
    fn restore_head(&self, plane: &mut ControlPlane) -> ControlResult<()> {
        let detached = plane.pop_detached()?;
        let head = plane.head()?.clone();

        let detached_client = ProcessClient::new(detached.address.clone());
        let detached_counter = match detached_client.get_deviation(detached.name.clone()) {
            Ok(counter) => counter,
            Err(e) => {
                // Unreachable detached head: abandon this attempt, keep the
                // entry so the operator can retry.
                plane.push_detached(detached);
                return Err(e.into());
            }
        };
        let head_counter = match ProcessClient::new(head.address.clone())
            .get_deviation(head.name.clone())
        {
            Ok(counter) => counter,
            Err(e) => {
                plane.push_detached(detached);
                return Err(e.into());
            }
        };

        if !ControlPlane::restorable(head_counter, detached_counter) {
            tracing::warn!(
                detached = %detached.name,
                detached_counter,
                head_counter,
                "divergence beyond the write log, dropping detached head for good"
            );
            // Its endpoint would otherwise linger with no way back into
            // any chain.
            if let Err(e) = detached_client.clear() {
                tracing::debug!(process = %detached.name, error = %e, "clear of dropped head failed");
            }
            return Ok(());
        }

        let (assignment, demoted) = plane.reinstate_head(detached.clone());
        detached_client.initialize(
            assignment.process.name,
            assignment.predecessor,
            assignment.successor,
            assignment.head,
            assignment.tail,
            assignment.role,
        )?;

        let demoted_client = ProcessClient::new(demoted.address.clone());
        demoted_client.set_role(demoted.name.clone(), Role::None)?;
        demoted_client.set_predecessor(demoted.name.clone(), Some(detached.address.clone()))?;
        demoted_client.reconcile(demoted.name, detached.name.clone(), detached.address)?;

        tracing::info!(restored = %detached.name, "head restored and reconciled");
        Ok(())
    }
}

impl Handler for ControlService {
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

fn error_code(error: &ControlError) -> ErrorCode {
    match error {
        ControlError::RegistrationClosed
        | ControlError::TooFewProcesses(_)
        | ControlError::NoChain
        | ControlError::ChainTooShort(_)
        | ControlError::NoDetachedHead => ErrorCode::InvalidState,
        ControlError::DuplicateName(_) | ControlError::UnsupportedOperation(_) => {
            ErrorCode::InvalidRequest
        }
        ControlError::Downstream(_) => ErrorCode::Unavailable,
    }
}
