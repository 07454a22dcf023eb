//! The control plane state machine, free of I/O.

use rand::Rng;
use rand::seq::SliceRandom;

use chainstore_types::{
    Address, ControlState, ProcessEntry, ProcessName, Role, WRITE_LOG_CAPACITY,
};

use crate::{ControlError, ControlResult};

/// Widest counter divergence a detached head may carry and still be
/// restored. Equal to the write-log capacity: a wider gap cannot be
/// replayed from the log, so the head is dropped instead.
pub const MAX_RESTORE_DEVIATION: u64 = WRITE_LOG_CAPACITY as u64;

/// Topology handed to one process when a chain forms or a head returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitAssignment {
    pub process: ProcessEntry,
    pub predecessor: Option<Address>,
    pub successor: Option<Address>,
    pub head: Option<Address>,
    pub tail: Option<Address>,
    pub role: Role,
}

/// Roster, chain, and detached-head stack.
///
/// The detached heads form a stack because restoration always takes the
/// most recently removed head first; repeated detach/restore cycles then
/// rebuild the original chain prefix in order.
#[derive(Debug, Default)]
pub struct ControlPlane {
    state: ControlState,
    roster: Vec<ProcessEntry>,
    chain: Vec<ProcessEntry>,
    detached_heads: Vec<ProcessEntry>,
}

impl ControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn chain(&self) -> &[ProcessEntry] {
        &self.chain
    }

    pub fn detached_heads(&self) -> &[ProcessEntry] {
        &self.detached_heads
    }

    /// Registers a process. Only legal before the chain exists; names must
    /// be unique.
    pub fn add_process(&mut self, name: ProcessName, address: Address) -> ControlResult<()> {
        if self.state != ControlState::Initialized {
            return Err(ControlError::RegistrationClosed);
        }
        if self.roster.iter().any(|entry| entry.name == name) {
            return Err(ControlError::DuplicateName(name));
        }
        self.roster.push(ProcessEntry { name, address });
        Ok(())
    }

    /// Shuffles the roster into a chain and closes registration.
    ///
    /// The shuffle is the system's only load-distribution mechanism; it
    /// needs no reproducibility. Calling again once a chain exists is a
    /// no-op that returns the current ordering.
    pub fn create_chain<R: Rng>(&mut self, rng: &mut R) -> ControlResult<Vec<ProcessEntry>> {
        if self.state == ControlState::ChainCreated {
            return Ok(self.chain.clone());
        }
        if self.roster.len() < 2 {
            return Err(ControlError::TooFewProcesses(self.roster.len()));
        }

        let mut chain = self.roster.clone();
        chain.shuffle(rng);
        self.chain = chain;
        self.state = ControlState::ChainCreated;
        Ok(self.chain.clone())
    }

    /// Topology assignments for every chain member, head first.
    pub fn assignments(&self) -> Vec<InitAssignment> {
        let last = self.chain.len().saturating_sub(1);
        self.chain
            .iter()
            .enumerate()
            .map(|(i, entry)| InitAssignment {
                process: entry.clone(),
                predecessor: (i > 0).then(|| self.chain[i - 1].address.clone()),
                successor: (i < last).then(|| self.chain[i + 1].address.clone()),
                head: (i > 0).then(|| self.chain[0].address.clone()),
                tail: (i < last).then(|| self.chain[last].address.clone()),
                role: if i == 0 {
                    Role::Head
                } else if i == last {
                    Role::Tail
                } else {
                    Role::None
                },
            })
            .collect()
    }

    /// Renders `"H (Head) -> p1 -> … -> T (Tail)"`.
    pub fn list_chain(&self) -> ControlResult<String> {
        if self.state != ControlState::ChainCreated {
            return Err(ControlError::NoChain);
        }

        let interior = self.chain.len().saturating_sub(2);
        let mut parts = vec![format!("{} (Head)", self.chain[0].name)];
        for entry in self.chain.iter().skip(1).take(interior) {
            parts.push(entry.name.to_string());
        }
        parts.push(format!(
            "{} (Tail)",
            self.chain[self.chain.len() - 1].name
        ));
        Ok(parts.join(" -> "))
    }

    /// The current head entry.
    pub fn head(&self) -> ControlResult<&ProcessEntry> {
        if self.state != ControlState::ChainCreated {
            return Err(ControlError::NoChain);
        }
        self.chain.first().ok_or(ControlError::NoChain)
    }

    /// Pops the head onto the detached stack and returns the removed
    /// entry together with the new front.
    pub fn detach_head(&mut self) -> ControlResult<(ProcessEntry, ProcessEntry)> {
        if self.state != ControlState::ChainCreated {
            return Err(ControlError::NoChain);
        }
        if self.chain.len() < 2 {
            return Err(ControlError::ChainTooShort(self.chain.len()));
        }

        let removed = self.chain.remove(0);
        self.detached_heads.push(removed.clone());
        Ok((removed, self.chain[0].clone()))
    }

    /// Pops the most recently detached head.
    pub fn pop_detached(&mut self) -> ControlResult<ProcessEntry> {
        if self.state != ControlState::ChainCreated {
            return Err(ControlError::NoChain);
        }
        self.detached_heads.pop().ok_or(ControlError::NoDetachedHead)
    }

    /// Returns a popped entry to the detached stack, e.g. when its counter
    /// could not be queried and the restore attempt is abandoned.
    pub fn push_detached(&mut self, entry: ProcessEntry) {
        self.detached_heads.push(entry);
    }

    /// Whether a detached head within `deviation` of the live head can
    /// still be reconciled from the bounded write log.
    pub fn restorable(head_counter: u64, detached_counter: u64) -> bool {
        head_counter.abs_diff(detached_counter) <= MAX_RESTORE_DEVIATION
    }

    /// Reinserts a restored head at the front of the chain and returns its
    /// assignment plus the demoted previous front.
    pub fn reinstate_head(&mut self, entry: ProcessEntry) -> (InitAssignment, ProcessEntry) {
        self.chain.insert(0, entry.clone());
        let demoted = self.chain[1].clone();
        let last = self.chain.len() - 1;
        let assignment = InitAssignment {
            process: entry,
            predecessor: None,
            successor: Some(demoted.address.clone()),
            head: None,
            tail: Some(self.chain[last].address.clone()),
            role: Role::Head,
        };
        (assignment, demoted)
    }

    /// Everyone a `Clear` broadcast must reach: chain members plus
    /// detached heads.
    pub fn clear_targets(&self) -> Vec<ProcessEntry> {
        let mut targets = self.chain.clone();
        for entry in &self.detached_heads {
            if !targets.iter().any(|t| t.name == entry.name) {
                targets.push(entry.clone());
            }
        }
        targets
    }

    /// Drops everything and reopens registration.
    pub fn reset(&mut self) {
        self.state = ControlState::Initialized;
        self.roster.clear();
        self.chain.clear();
        self.detached_heads.clear();
    }
}
