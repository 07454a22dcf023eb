//! The replication state machine, free of I/O.

use std::collections::{BTreeMap, HashMap};

use chainstore_types::{Address, Lifecycle, ProcessName, Role, Tag, WriteLog};

use crate::{ProcessError, ProcessResult};

/// Neighbor addresses and role delivered by `Initialize`.
#[derive(Debug, Clone)]
pub struct Topology {
    pub predecessor: Option<Address>,
    pub successor: Option<Address>,
    pub head: Option<Address>,
    pub tail: Option<Address>,
    pub role: Role,
}

/// One stored value and its replication tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    pub value: f64,
    pub tag: Tag,
}

/// What a local lookup found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadOutcome {
    /// Key absent; answer with the not-found sentinel.
    Missing,
    /// Key fully replicated; answer locally.
    Clean(f64),
    /// Key still in flight; only the tail may answer.
    Dirty,
}

/// State of one store process.
///
/// All mutation goes through methods that enforce the lifecycle and role
/// preconditions; the service layer holds this behind a mutex and releases
/// the lock only across outbound RPCs.
#[derive(Debug)]
pub struct ProcessState {
    name: ProcessName,
    control_address: Address,
    lifecycle: Lifecycle,
    /// Set when an `Initialize` carried an invalid topology; replication
    /// traffic is refused until a valid re-initialization.
    faulted: bool,
    role: Option<Role>,
    predecessor: Option<Address>,
    successor: Option<Address>,
    head: Option<Address>,
    tail: Option<Address>,
    store: HashMap<String, Slot>,
    write_log: WriteLog,
    write_counter: u64,
}

impl ProcessState {
    pub fn new(name: ProcessName, control_address: Address) -> Self {
        Self {
            name,
            control_address,
            lifecycle: Lifecycle::Initialized,
            faulted: false,
            role: None,
            predecessor: None,
            successor: None,
            head: None,
            tail: None,
            store: HashMap::new(),
            write_log: WriteLog::new(),
            write_counter: 0,
        }
    }

    pub fn name(&self) -> &ProcessName {
        &self.name
    }

    pub fn control_address(&self) -> &Address {
        &self.control_address
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn successor(&self) -> Option<&Address> {
        self.successor.as_ref()
    }

    pub fn tail(&self) -> Option<&Address> {
        self.tail.as_ref()
    }

    pub fn predecessor(&self) -> Option<&Address> {
        self.predecessor.as_ref()
    }

    pub fn head(&self) -> Option<&Address> {
        self.head.as_ref()
    }

    // ------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------

    /// Applies an `Initialize`, overwriting any previous topology.
    ///
    /// Role/neighbor shape is validated first: a head has no predecessor
    /// but a successor and a tail pointer, a tail is the mirror image, an
    /// interior process has all three. An invalid shape faults the process
    /// until a later `Initialize` passes validation.
    pub fn initialize(&mut self, topology: Topology) -> ProcessResult<()> {
        if self.lifecycle == Lifecycle::Inactive {
            return Err(ProcessError::Inactive);
        }

        if let Err(e) = validate_topology(&topology) {
            self.faulted = true;
            return Err(e);
        }

        self.predecessor = topology.predecessor;
        self.successor = topology.successor;
        self.head = topology.head;
        self.tail = topology.tail;
        self.role = Some(topology.role);
        self.lifecycle = Lifecycle::ChainActive;
        self.faulted = false;
        Ok(())
    }

    pub fn set_role(&mut self, role: Role) -> ProcessResult<()> {
        if self.lifecycle == Lifecycle::Inactive {
            return Err(ProcessError::Inactive);
        }
        self.role = Some(role);
        Ok(())
    }

    pub fn set_predecessor(&mut self, predecessor: Option<Address>) -> ProcessResult<()> {
        if self.lifecycle == Lifecycle::Inactive {
            return Err(ProcessError::Inactive);
        }
        self.predecessor = predecessor;
        Ok(())
    }

    /// Confirms a request aimed at `requested` belongs on this process.
    pub fn ensure_named(&self, requested: &ProcessName) -> ProcessResult<()> {
        if *requested == self.name {
            Ok(())
        } else {
            Err(ProcessError::WrongProcess {
                requested: requested.clone(),
                actual: self.name.clone(),
            })
        }
    }

    /// Gate for replication traffic: Write, Read, ListBooks, DataStatus,
    /// Reconcile, RawWrite.
    pub fn ensure_replication_allowed(&self) -> ProcessResult<()> {
        match self.lifecycle {
            Lifecycle::Inactive => Err(ProcessError::Inactive),
            Lifecycle::Initialized => Err(ProcessError::NotActive),
            Lifecycle::ChainActive => {
                if self.faulted {
                    return Err(ProcessError::Faulted);
                }
                match self.role {
                    Some(Role::Disabled) => Err(ProcessError::Disabled),
                    Some(_) => Ok(()),
                    None => Err(ProcessError::NotActive),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Store
    // ------------------------------------------------------------------

    /// Stores a key dirty ahead of forwarding it downstream.
    pub fn stage_dirty(&mut self, key: &str, value: f64) {
        self.store.insert(
            key.to_string(),
            Slot {
                value,
                tag: Tag::Dirty,
            },
        );
    }

    /// Commits a write: clean tag, counter bump, log append.
    ///
    /// Runs on the tail when it applies a write, and on every other
    /// process once its successor has acknowledged the forward. The tail
    /// path is a forward-to-self for counter purposes, which keeps
    /// counters equal along a quiescent chain.
    pub fn commit(&mut self, key: &str, value: f64) {
        self.store.insert(
            key.to_string(),
            Slot {
                value,
                tag: Tag::Clean,
            },
        );
        self.write_counter += 1;
        self.write_log.push(key, value);
    }

    /// Reconciliation store: clean tag, no counter or log update.
    pub fn raw_store(&mut self, key: &str, value: f64) {
        self.store.insert(
            key.to_string(),
            Slot {
                value,
                tag: Tag::Clean,
            },
        );
    }

    pub fn read_local(&self, key: &str) -> ReadOutcome {
        match self.store.get(key) {
            None => ReadOutcome::Missing,
            Some(slot) if slot.tag == Tag::Clean => ReadOutcome::Clean(slot.value),
            Some(_) => ReadOutcome::Dirty,
        }
    }

    /// All stored pairs regardless of tag. Only the tail may answer with
    /// this directly.
    pub fn books_unconditional(&self) -> BTreeMap<String, f64> {
        self.store
            .iter()
            .map(|(key, slot)| (key.clone(), slot.value))
            .collect()
    }

    /// Snapshot of every key with its tag and locally stored value, for
    /// the non-tail listing path.
    pub fn books_snapshot(&self) -> Vec<(String, f64, Tag)> {
        self.store
            .iter()
            .map(|(key, slot)| (key.clone(), slot.value, slot.tag))
            .collect()
    }

    pub fn data_status(&self) -> BTreeMap<String, Tag> {
        self.store
            .iter()
            .map(|(key, slot)| (key.clone(), slot.tag))
            .collect()
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    pub fn deviation(&self) -> u64 {
        self.write_counter
    }

    /// Computes the write-log suffix a reconciliation target is missing.
    ///
    /// The gap must satisfy `0 ≤ deviation ≤ |write_log|`; anything wider
    /// cannot be replayed from a bounded log and is surfaced as a failure.
    /// The control plane's restore threshold normally filters such cases
    /// out before a Reconcile is issued.
    pub fn replay_suffix(&self, target_counter: u64) -> ProcessResult<Vec<(String, f64)>> {
        let log_len = self.write_log.len();
        let deviation = self
            .write_counter
            .checked_sub(target_counter)
            .ok_or(ProcessError::DeviationOutOfRange {
                deviation: target_counter - self.write_counter,
                log_len,
            })?;
        if deviation as usize > log_len {
            return Err(ProcessError::DeviationOutOfRange { deviation, log_len });
        }
        Ok(self.write_log.suffix(deviation as usize).to_vec())
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Clears all state and leaves the terminal lifecycle.
    pub fn clear(&mut self) {
        self.lifecycle = Lifecycle::Inactive;
        self.faulted = false;
        self.role = None;
        self.predecessor = None;
        self.successor = None;
        self.head = None;
        self.tail = None;
        self.store.clear();
        self.write_log.clear();
        self.write_counter = 0;
    }
}

fn validate_topology(topology: &Topology) -> ProcessResult<()> {
    let err = |reason| ProcessError::InvalidTopology {
        role: topology.role,
        reason,
    };

    match topology.role {
        Role::Head => {
            if topology.predecessor.is_some() {
                return Err(err("head must not have a predecessor"));
            }
            if topology.successor.is_none() {
                return Err(err("head requires a successor"));
            }
            if topology.tail.is_none() {
                return Err(err("head requires a tail pointer"));
            }
        }
        Role::Tail => {
            if topology.predecessor.is_none() {
                return Err(err("tail requires a predecessor"));
            }
            if topology.successor.is_some() {
                return Err(err("tail must not have a successor"));
            }
            if topology.tail.is_some() {
                return Err(err("tail must not have a tail pointer"));
            }
        }
        Role::None => {
            if topology.predecessor.is_none()
                || topology.successor.is_none()
                || topology.tail.is_none()
            {
                return Err(err("interior process requires predecessor, successor, and tail"));
            }
        }
        Role::Disabled => {
            return Err(err("disabled is not an initialization role"));
        }
    }
    Ok(())
}
