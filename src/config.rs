use anyhow::{Context, Result};
use nostr_core::nostr_sdk::PublicKey;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::processor::ProcessorOptions;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_true")]
    pub verify_signatures: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_embedded_depth")]
    pub max_embedded_depth: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GraphConfig {
    /// Hex or npub of the user whose network is computed.
    pub root: Option<String>,
    #[serde(default = "default_max_hops")]
    pub max_hops: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_db_path(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            verify_signatures: true,
            queue_capacity: default_queue_capacity(),
            max_embedded_depth: default_max_embedded_depth(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            root: None,
            max_hops: default_max_hops(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_db_path() -> String {
    "~/.nosgraph/events.db".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_embedded_depth() -> u8 {
    2
}

fn default_max_hops() -> u8 {
    crate::social_graph::DEFAULT_MAX_HOPS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(path);
        let content = fs::read_to_string(expanded_path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse TOML config")
    }

    pub fn validate(&self) -> Result<()> {
        if self.graph.max_hops == 0 {
            anyhow::bail!("graph.max_hops must be at least 1");
        }

        if self.ingest.queue_capacity == 0 {
            anyhow::bail!("ingest.queue_capacity must be at least 1");
        }

        if self.store.backend == StoreBackend::Sqlite && self.store.path.trim().is_empty() {
            anyhow::bail!("store.path is required for the sqlite backend");
        }

        self.root_pubkey()?;
        Ok(())
    }

    pub fn expand_paths(&mut self) {
        self.store.path = shellexpand::tilde(&self.store.path).to_string();
    }

    /// The configured root as lowercase hex.
    pub fn root_pubkey(&self) -> Result<Option<String>> {
        self.graph
            .root
            .as_deref()
            .map(|root| parse_pubkey(root).with_context(|| format!("Invalid graph.root: {}", root)))
            .transpose()
    }

    pub fn processor_options(&self) -> ProcessorOptions {
        ProcessorOptions {
            verify_signatures: self.ingest.verify_signatures,
            max_embedded_depth: self.ingest.max_embedded_depth,
        }
    }
}

/// Accept a pubkey as hex or `npub`.
pub fn parse_pubkey(value: &str) -> Result<String> {
    let key = PublicKey::parse(value.trim())?;
    Ok(key.to_hex())
}
