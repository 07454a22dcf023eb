//! # chainstore-config: Configuration management
//!
//! Addresses come from three layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A `chainstore.toml` project file
//! 3. Environment variables — the deployment contract names
//!    `CONTROL_PANEL_IP` and `Node<i>_IP` (e.g. `Node1_IP`), each holding a
//!    `host:port` string
//!
//! A node's store processes do not appear here: process `i` of a node
//! listening on `host:port` derives its endpoint as `host:(port + i + 1)`.

mod loader;

pub use loader::ConfigLoader;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default control plane endpoint.
pub const DEFAULT_CONTROL_ADDRESS: &str = "127.0.0.1:50050";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainstoreConfig {
    /// Control plane settings.
    pub control: ControlSection,

    /// Node name → `host:port` endpoint.
    #[serde(default)]
    pub nodes: BTreeMap<String, String>,
}

/// Control plane settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSection {
    /// Address the control plane daemon binds and clients dial.
    pub address: String,
}

impl Default for ChainstoreConfig {
    fn default() -> Self {
        Self {
            control: ControlSection {
                address: DEFAULT_CONTROL_ADDRESS.to_string(),
            },
            nodes: BTreeMap::new(),
        }
    }
}

impl ChainstoreConfig {
    /// Looks up a node's configured endpoint.
    pub fn node_address(&self, name: &str) -> Option<&str> {
        self.nodes.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ChainstoreConfig::default();
        assert_eq!(config.control.address, DEFAULT_CONTROL_ADDRESS);
        assert!(config.nodes.is_empty());
    }

    #[test]
    fn node_lookup() {
        let mut config = ChainstoreConfig::default();
        config
            .nodes
            .insert("Node1".to_string(), "127.0.0.1:50060".to_string());

        assert_eq!(config.node_address("Node1"), Some("127.0.0.1:50060"));
        assert_eq!(config.node_address("Node9"), None);
    }
}
