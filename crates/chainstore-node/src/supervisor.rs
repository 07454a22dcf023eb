//! Local process supervision and command routing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chainstore_client::{ControlClient, ProcessClient};
use chainstore_process::{DEFAULT_PROCESS_WORKERS, ProcessService};
use chainstore_server::{Server, ServerConfig};
use chainstore_types::{Address, ProcessEntry, ProcessName, Tag};

use crate::{NodeError, NodeResult};

/// One store process hosted by this node.
pub struct LocalProcess {
    pub name: ProcessName,
    pub address: Address,
    server: Server,
}

impl LocalProcess {
    pub fn client(&self) -> ProcessClient {
        ProcessClient::new(self.address.clone())
    }
}

/// Spawns and supervises local store processes and forwards operator
/// commands to the control plane.
pub struct NodeSupervisor {
    name: String,
    /// Base endpoint; process `i` serves on `host:(port + i + 1)`.
    address: Address,
    control: ControlClient,
    processes: Vec<LocalProcess>,
    /// Rotates client reads across local processes.
    read_cursor: AtomicUsize,
}

impl NodeSupervisor {
    pub fn new(name: impl Into<String>, address: Address, control_address: Address) -> Self {
        Self {
            name: name.into(),
            address,
            control: ControlClient::new(control_address),
            processes: Vec::new(),
            read_cursor: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn processes(&self) -> &[LocalProcess] {
        &self.processes
    }

    /// Creates `count` local store processes and registers each with the
    /// control plane under a generated `<node>-ps<i>` name.
    pub fn local_store_ps(&mut self, count: usize) -> NodeResult<()> {
        if !self.processes.is_empty() {
            return Err(NodeError::ProcessesExist);
        }

        for i in 0..count {
            let name = ProcessName::new(format!("{}-ps{i}", self.name));
            let bind_address = self.address.with_port_offset(i as u16 + 1)?;

            let service = ProcessService::new(name.clone(), self.control.address().clone());
            let server = service.serve(
                ServerConfig::new(bind_address)
                    .with_name(name.as_str())
                    .with_workers(DEFAULT_PROCESS_WORKERS),
            )?;
            let address = server.local_address().clone();

            self.control.add_process(name.clone(), address.clone())?;
            tracing::info!(process = %name, %address, "local process started");

            self.processes.push(LocalProcess {
                name,
                address,
                server,
            });
        }
        Ok(())
    }

    pub fn create_chain(&self) -> NodeResult<Vec<ProcessEntry>> {
        Ok(self.control.create_chain()?)
    }

    pub fn list_chain(&self) -> NodeResult<String> {
        Ok(self.control.list_chain()?)
    }

    /// Tears down the chain everywhere, then reaps the local endpoints so
    /// a fresh roster can be created.
    pub fn clear(&mut self) -> NodeResult<()> {
        self.control.clear()?;
        for process in self.processes.drain(..) {
            // The control plane's broadcast already stopped chained
            // processes; stopping again only joins their threads. This
            // also covers processes that never made it into a chain.
            process.server.stop();
        }
        Ok(())
    }

    pub fn remove_head(&self) -> NodeResult<()> {
        Ok(self.control.remove_head()?)
    }

    pub fn restore_head(&self) -> NodeResult<()> {
        Ok(self.control.restore_head()?)
    }

    /// Client write: enters the chain at the current head.
    pub fn write(&self, key: &str, value: f64, delay_secs: u32) -> NodeResult<()> {
        let head = self.control.get_head()?;
        Ok(ProcessClient::new(head.address).write(key, value, delay_secs)?)
    }

    /// Client read: any local process will do; dirty keys route to the
    /// tail on their own.
    pub fn read(&self, key: &str) -> NodeResult<(f64, bool)> {
        Ok(self.any_process()?.client().read(key)?)
    }

    pub fn list_books(&self) -> NodeResult<BTreeMap<String, f64>> {
        Ok(self.any_process()?.client().list_books()?)
    }

    pub fn data_status(&self, process_id: &str) -> NodeResult<BTreeMap<String, Tag>> {
        let process = self
            .processes
            .iter()
            .find(|p| p.name.as_str() == process_id)
            .ok_or_else(|| NodeError::UnknownProcess(process_id.to_string()))?;
        Ok(process.client().data_status()?)
    }

    fn any_process(&self) -> NodeResult<&LocalProcess> {
        if self.processes.is_empty() {
            return Err(NodeError::NoProcesses);
        }
        let index = self.read_cursor.fetch_add(1, Ordering::Relaxed) % self.processes.len();
        Ok(&self.processes[index])
    }
}
