//! Configuration loader with multi-source merging.

use crate::ChainstoreConfig;
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Name of the project configuration file.
const PROJECT_CONFIG_FILE: &str = "chainstore.toml";

/// Configuration loader with builder pattern.
pub struct ConfigLoader {
    project_dir: PathBuf,
}

impl ConfigLoader {
    /// Create a new config loader rooted at the current directory.
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Set the project directory.
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Load configuration from all sources with proper precedence.
    pub fn load(self) -> Result<ChainstoreConfig> {
        let mut builder = config::Config::builder();

        // 1. Built-in defaults
        let defaults = ChainstoreConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. Project config (chainstore.toml)
        let project_config_file = self.project_dir.join(PROJECT_CONFIG_FILE);
        if project_config_file.exists() {
            builder = builder.add_source(
                config::File::from(project_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        let config = builder.build().context("Failed to build configuration")?;
        let mut chainstore_config: ChainstoreConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // 3. Environment variables, the deployment contract names. These
        // don't follow a single prefix-separator scheme the `config` crate
        // can scan for, so they are applied on top explicitly.
        apply_env_overrides(&mut chainstore_config, env::vars());

        Ok(chainstore_config)
    }

    /// Load configuration or return defaults if loading fails.
    pub fn load_or_default(self) -> ChainstoreConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_env_overrides(
    config: &mut ChainstoreConfig,
    vars: impl IntoIterator<Item = (String, String)>,
) {
    for (key, value) in vars {
        if key == "CONTROL_PANEL_IP" {
            config.control.address = value;
            continue;
        }

        // Node1_IP, Node2_IP, ...
        let index = key
            .strip_prefix("Node")
            .and_then(|rest| rest.strip_suffix("_IP"));
        if let Some(index) = index {
            if index.parse::<u32>().is_ok() {
                config.nodes.insert(format!("Node{index}"), value);
            }
        }
    }
}
