//! # chainstore-types: Core types for chainstore
//!
//! This crate contains shared types used across the chainstore system:
//! - Identity types ([`ProcessName`], [`Address`])
//! - Chain membership ([`ProcessEntry`])
//! - Replication roles and state ([`Role`], [`Tag`], [`Lifecycle`], [`ControlState`])
//! - The bounded replay log ([`WriteLog`])

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capacity of each process's write log.
///
/// This bound doubles as the control plane's restore threshold: a detached
/// head whose counter diverges from the live head by more than this many
/// writes can no longer be reconciled from the log and is dropped.
pub const WRITE_LOG_CAPACITY: usize = 5;

/// Sentinel value returned for reads of absent keys.
///
/// Callers must branch on the `found` flag, never on this value.
pub const NOT_FOUND_VALUE: f64 = 0.1;

// ============================================================================
// Identity
// ============================================================================

/// Unique name of a store process, e.g. `Node1-ps0`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessName(String);

impl ProcessName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProcessName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ProcessName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Network address of a process or the control plane, in `host:port` form.
///
/// Processes refer to their neighbors exclusively by address, never by
/// handle; the chain is rewired by swapping addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the address into host and port.
    ///
    /// # Examples
    ///
    /// ```
    /// # use chainstore_types::Address;
    /// let addr = Address::new("127.0.0.1:5000");
    /// assert_eq!(addr.split().unwrap(), ("127.0.0.1".to_string(), 5000));
    /// ```
    pub fn split(&self) -> Result<(String, u16), AddressError> {
        let (host, port) = self
            .0
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingPort(self.0.clone()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressError::InvalidPort(self.0.clone()))?;
        Ok((host.to_string(), port))
    }

    /// Returns a sibling address on the same host with the port shifted
    /// by `offset`. Used to derive process endpoints from a node endpoint.
    pub fn with_port_offset(&self, offset: u16) -> Result<Address, AddressError> {
        let (host, port) = self.split()?;
        let port = port
            .checked_add(offset)
            .ok_or_else(|| AddressError::InvalidPort(self.0.clone()))?;
        Ok(Address::new(format!("{host}:{port}")))
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Malformed `host:port` address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address has no port: {0}")]
    MissingPort(String),

    #[error("address has an invalid port: {0}")]
    InvalidPort(String),
}

/// A registered process: its name and the address it serves on.
///
/// The control plane's roster, chain, and detached-head stack are all
/// sequences of these entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub name: ProcessName,
    pub address: Address,
}

impl ProcessEntry {
    pub fn new(name: impl Into<ProcessName>, address: impl Into<Address>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

// ============================================================================
// Roles and state machines
// ============================================================================

/// Position-derived role of a process within the chain.
///
/// The wire encoding is fixed: `None=1, Head=2, Tail=3, Disabled=4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Role {
    /// Interior process: has both neighbors, forwards writes.
    None = 1,
    /// First process: sole entry point for writes, no predecessor.
    Head = 2,
    /// Last process: commit point for writes, authority for dirty reads.
    Tail = 3,
    /// Removed from the chain; refuses all replication traffic.
    Disabled = 4,
}

impl From<Role> for u8 {
    fn from(role: Role) -> Self {
        role as u8
    }
}

impl TryFrom<u8> for Role {
    type Error = RoleError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Role::None),
            2 => Ok(Role::Head),
            3 => Ok(Role::Tail),
            4 => Ok(Role::Disabled),
            other => Err(RoleError::Unknown(other)),
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::None => "NONE",
            Role::Head => "HEAD",
            Role::Tail => "TAIL",
            Role::Disabled => "DISABLED",
        };
        write!(f, "{s}")
    }
}

/// Unknown role discriminant on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RoleError {
    #[error("unknown role encoding: {0}")]
    Unknown(u8),
}

/// Replication status of a stored key.
///
/// A key is clean once every successor through the tail has acknowledged
/// the same value; until then it is dirty and reads must consult the tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    Clean,
    Dirty,
}

impl Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Clean => write!(f, "clean"),
            Tag::Dirty => write!(f, "dirty"),
        }
    }
}

/// Lifecycle of a store process.
///
/// `Inactive` is terminal: the process's endpoint is stopped and it never
/// rejoins a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    Initialized,
    ChainActive,
    Inactive,
}

/// Control plane state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ControlState {
    /// Accepting registrations; no chain exists yet.
    #[default]
    Initialized,
    /// A chain has been created; registrations are closed.
    ChainCreated,
}

// ============================================================================
// Write log
// ============================================================================

/// Bounded log of the most recent writes a process has forwarded or
/// committed, oldest first.
///
/// Appends beyond [`WRITE_LOG_CAPACITY`] drop the oldest entry. Reconciling
/// a returning head replays a suffix of this log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteLog {
    entries: Vec<(String, f64)>,
}

impl WriteLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a write, evicting the oldest entry once the log is full.
    pub fn push(&mut self, key: impl Into<String>, value: f64) {
        if self.entries.len() == WRITE_LOG_CAPACITY {
            self.entries.remove(0);
        }
        self.entries.push((key.into(), value));
    }

    /// Returns the last `n` entries in application order.
    ///
    /// `n` larger than the log length returns the whole log.
    pub fn suffix(&self, n: usize) -> &[(String, f64)] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case(1, Some(Role::None))]
    #[test_case(2, Some(Role::Head))]
    #[test_case(3, Some(Role::Tail))]
    #[test_case(4, Some(Role::Disabled))]
    #[test_case(0, None)]
    #[test_case(5, None)]
    fn role_wire_encoding(encoded: u8, expected: Option<Role>) {
        assert_eq!(Role::try_from(encoded).ok(), expected);
        if let Some(role) = expected {
            assert_eq!(u8::from(role), encoded);
        }
    }

    #[test]
    fn address_split() {
        let addr = Address::new("localhost:5000");
        assert_eq!(addr.split().unwrap(), ("localhost".to_string(), 5000));

        assert!(Address::new("localhost").split().is_err());
        assert!(Address::new("localhost:notaport").split().is_err());
    }

    #[test]
    fn address_port_offset() {
        let node = Address::new("127.0.0.1:5000");
        assert_eq!(
            node.with_port_offset(3).unwrap(),
            Address::new("127.0.0.1:5003")
        );
    }

    #[test]
    fn write_log_keeps_newest() {
        let mut log = WriteLog::new();
        for i in 0..8 {
            log.push(format!("k{i}"), f64::from(i));
        }

        assert_eq!(log.len(), WRITE_LOG_CAPACITY);
        assert_eq!(log.suffix(1), &[("k7".to_string(), 7.0)]);
        assert_eq!(log.suffix(WRITE_LOG_CAPACITY)[0].0, "k3");
    }

    #[test]
    fn write_log_suffix_order() {
        let mut log = WriteLog::new();
        log.push("a", 1.0);
        log.push("b", 2.0);
        log.push("c", 3.0);

        let suffix = log.suffix(2);
        assert_eq!(suffix[0].0, "b");
        assert_eq!(suffix[1].0, "c");

        // Over-long suffix returns everything
        assert_eq!(log.suffix(10).len(), 3);
    }

    proptest! {
        #[test]
        fn write_log_never_exceeds_capacity(writes in prop::collection::vec((".*", prop::num::f64::NORMAL), 0..40)) {
            let mut log = WriteLog::new();
            for (key, value) in writes {
                log.push(key, value);
                prop_assert!(log.len() <= WRITE_LOG_CAPACITY);
            }
        }
    }
}
