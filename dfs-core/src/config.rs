use crate::error::{DfsError, DfsResult};
use crate::partition::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

pub type NodeId = u32;

/// Largest accepted chunk size; keeps a STORE frame well under the wire limit.
pub const MAX_CHUNK_SIZE: usize = 32 * 1024 * 1024;

fn default_replication_factor() -> usize {
    2
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_host() -> String {
    "localhost".to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NodeEntry {
    pub id: NodeId,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

impl NodeEntry {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClientConfig {
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub io_timeout_ms: u64,
    pub nodes: Vec<NodeEntry>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            replication_factor: default_replication_factor(),
            chunk_size: default_chunk_size(),
            connect_timeout_ms: default_timeout_ms(),
            io_timeout_ms: default_timeout_ms(),
            nodes: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> DfsResult<Self> {
        let f = File::open(path)
            .map_err(|e| DfsError::Config(format!("open {}: {}", path.display(), e)))?;
        let cfg: ClientConfig = serde_json::from_reader(f)
            .map_err(|e| DfsError::Config(format!("parse {}: {}", path.display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json(s: &str) -> DfsResult<Self> {
        let cfg: ClientConfig =
            serde_json::from_str(s).map_err(|e| DfsError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> DfsResult<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(DfsError::Config(format!(
                "chunk_size must be in 1..={}, got {}",
                MAX_CHUNK_SIZE, self.chunk_size
            )));
        }
        if self.replication_factor == 0 {
            return Err(DfsError::Config("replication_factor must be at least 1".into()));
        }
        let mut seen = HashSet::new();
        for n in &self.nodes {
            if !seen.insert(n.id) {
                return Err(DfsError::Config(format!("duplicate node id {}", n.id)));
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}
