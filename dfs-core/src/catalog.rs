use crate::chunk::{Digest, SequenceId};
use crate::config::NodeId;
use crate::error::{DfsError, DfsResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Where one chunk lives, in the order its replicas acknowledged.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChunkPlacement {
    pub digest: Digest,
    pub len: u32,
    pub nodes: Vec<NodeId>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileDescriptor {
    pub file_name: String,
    pub size: u64,
    pub chunks: BTreeMap<SequenceId, ChunkPlacement>,
}

impl FileDescriptor {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Chunks without a single acknowledged replica.
    pub fn unplaced(&self) -> Vec<SequenceId> {
        self.chunks.iter().filter(|(_, p)| p.nodes.is_empty()).map(|(s, _)| *s).collect()
    }

    pub fn is_durable(&self) -> bool {
        self.chunks.values().all(|p| !p.nodes.is_empty())
    }
}

/// Coordinator state written to disk between sessions.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Catalog {
    pub saved_utc: String,
    pub chunk_size: usize,
    pub files: BTreeMap<String, FileDescriptor>,
}

impl Catalog {
    pub fn load(path: &Path) -> DfsResult<Self> {
        let f = File::open(path)?;
        serde_json::from_reader(f)
            .map_err(|e| DfsError::Persistence(format!("read catalog {}: {}", path.display(), e)))
    }

    /// Replace the catalog at `path` atomically.
    pub fn save(&mut self, path: &Path) -> DfsResult<()> {
        self.saved_utc = chrono::Utc::now().to_rfc3339();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| DfsError::Persistence(format!("encode catalog: {e}")))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| DfsError::Io(e.error))?;
        Ok(())
    }
}
