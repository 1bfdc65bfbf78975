//! Coordinator: splits files, places replicas, and reads them back with
//! per-chunk fallback across replicas.
//!
//! Calls to storage nodes are issued one at a time. A failing replica is
//! logged and skipped; a file-level operation only fails when every replica
//! of some chunk fails.

use crate::catalog::{Catalog, ChunkPlacement, FileDescriptor};
use crate::chunk::{Chunk, SequenceId};
use crate::config::{ClientConfig, NodeEntry, NodeId};
use crate::error::{DfsError, DfsResult};
use crate::partition;
use crate::path_safety::{file_name_of, validate_file_name};
use crate::placement::replica_set;
use crate::transport::{self, NodeTransport, TcpTransport};
use crate::wire::{Request, Response};
use std::collections::{BTreeMap, HashMap};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    Unknown,
    Reachable,
    Unreachable,
}

#[derive(Clone, Debug)]
pub struct NodeRegistration {
    pub entry: NodeEntry,
    pub status: NodeStatus,
}

#[derive(Clone, Debug)]
pub struct UploadReport {
    pub file_name: String,
    pub size: u64,
    pub placements: BTreeMap<SequenceId, Vec<NodeId>>,
}

impl UploadReport {
    pub fn chunk_count(&self) -> usize {
        self.placements.len()
    }
}

#[derive(Clone, Debug, Default)]
pub struct DeleteReport {
    pub file_name: String,
    /// Nodes that acknowledged the delete.
    pub removed_from: Vec<NodeId>,
    /// Nodes that failed for a reason other than not holding the file.
    pub failed: Vec<NodeId>,
}

pub struct Coordinator {
    replication_factor: usize,
    chunk_size: usize,
    transport: Arc<dyn NodeTransport>,
    nodes: RwLock<Vec<NodeRegistration>>,
    files: RwLock<BTreeMap<String, FileDescriptor>>,
    file_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    catalog_path: Option<PathBuf>,
    // serializes snapshot-and-write so an older table never lands last
    catalog_lock: Mutex<()>,
}

impl Coordinator {
    pub fn new(cfg: &ClientConfig, transport: Arc<dyn NodeTransport>) -> DfsResult<Self> {
        cfg.validate()?;
        let nodes = cfg
            .nodes
            .iter()
            .map(|e| NodeRegistration { entry: e.clone(), status: NodeStatus::Unknown })
            .collect();
        Ok(Self {
            replication_factor: cfg.replication_factor,
            chunk_size: cfg.chunk_size,
            transport,
            nodes: RwLock::new(nodes),
            files: RwLock::new(BTreeMap::new()),
            file_locks: Mutex::new(HashMap::new()),
            catalog_path: None,
            catalog_lock: Mutex::new(()),
        })
    }

    pub fn from_config(cfg: &ClientConfig) -> DfsResult<Self> {
        Self::new(cfg, Arc::new(TcpTransport::from_config(cfg)))
    }

    /// Load descriptors from `path` if it exists and keep it updated after
    /// every upload and delete.
    pub fn with_catalog(mut self, path: &Path) -> DfsResult<Self> {
        if path.exists() {
            let catalog = Catalog::load(path)?;
            if catalog.chunk_size != 0 && catalog.chunk_size != self.chunk_size {
                tracing::warn!(
                    catalog = catalog.chunk_size,
                    config = self.chunk_size,
                    "catalog chunk size differs from config; existing files keep their layout"
                );
            }
            tracing::info!(files = catalog.files.len(), path = %path.display(), "catalog loaded");
            self.files = RwLock::new(catalog.files);
        }
        self.catalog_path = Some(path.to_path_buf());
        Ok(self)
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Add a node to the placement pool. Reachability is only learned on use.
    pub async fn register_node(&self, id: NodeId, host: impl Into<String>, port: u16) -> DfsResult<()> {
        let mut nodes = self.nodes.write().await;
        if nodes.iter().any(|n| n.entry.id == id) {
            return Err(DfsError::Config(format!("node {id} already registered")));
        }
        let entry = NodeEntry { id, host: host.into(), port };
        tracing::info!(node_id = id, addr = %entry.address(), "node registered");
        nodes.push(NodeRegistration { entry, status: NodeStatus::Unknown });
        Ok(())
    }

    pub async fn nodes(&self) -> Vec<NodeRegistration> {
        self.nodes.read().await.clone()
    }

    pub async fn list_files(&self) -> BTreeMap<String, usize> {
        self.files.read().await.iter().map(|(k, d)| (k.clone(), d.chunk_count())).collect()
    }

    pub async fn descriptor(&self, file_name: &str) -> Option<FileDescriptor> {
        self.files.read().await.get(file_name).cloned()
    }

    /// Split `path` and store every chunk on its replica set.
    ///
    /// The descriptor records exactly the nodes that acknowledged. It is kept
    /// even when some chunk got no acknowledgment, in which case the upload
    /// fails with [`DfsError::UploadIncomplete`]; nothing is rolled back.
    pub async fn upload(&self, path: &Path) -> DfsResult<UploadReport> {
        let file_name = file_name_of(path)?;
        let lock = self.file_lock(&file_name).await;
        let res = {
            let _held = lock.lock().await;
            self.upload_locked(path, file_name.clone()).await
        };
        self.release_file_lock(&file_name, lock).await;
        res
    }

    async fn upload_locked(&self, path: &Path, file_name: String) -> DfsResult<UploadReport> {
        let pool: Vec<NodeEntry> = self.nodes.read().await.iter().map(|n| n.entry.clone()).collect();
        if pool.is_empty() {
            return Err(DfsError::NoNodes);
        }

        let chunk_size = self.chunk_size;
        let src = path.to_path_buf();
        let chunks = tokio::task::spawn_blocking(move || partition::split_file(&src, chunk_size))
            .await
            .map_err(|e| DfsError::Io(std::io::Error::other(e)))??;
        tracing::info!(file = %file_name, chunks = chunks.len(), "uploading");

        let mut size = 0u64;
        let mut placed: BTreeMap<SequenceId, ChunkPlacement> = BTreeMap::new();
        for chunk in chunks {
            size += chunk.len() as u64;
            let mut acked = Vec::new();
            for idx in replica_set(chunk.seq, pool.len(), self.replication_factor) {
                let node = &pool[idx];
                let req = Request::Store {
                    file_name: file_name.clone(),
                    seq: chunk.seq,
                    payload: chunk.payload.clone(),
                    digest: chunk.digest,
                };
                match self.call(node, req).await {
                    Ok(Response::Stored) => {
                        tracing::debug!(file = %file_name, seq = chunk.seq, node_id = node.id, "chunk stored");
                        acked.push(node.id);
                    }
                    Ok(other) => tracing::warn!(
                        file = %file_name, seq = chunk.seq, node_id = node.id,
                        response = ?other, "unexpected response to store"
                    ),
                    Err(e) => tracing::warn!(
                        file = %file_name, seq = chunk.seq, node_id = node.id,
                        error = %e, "store failed"
                    ),
                }
            }
            placed.insert(
                chunk.seq,
                ChunkPlacement { digest: chunk.digest, len: chunk.len() as u32, nodes: acked },
            );
        }

        let descriptor = FileDescriptor { file_name: file_name.clone(), size, chunks: placed };
        let unplaced = descriptor.unplaced();
        let report = UploadReport {
            file_name: file_name.clone(),
            size,
            placements: descriptor.chunks.iter().map(|(s, p)| (*s, p.nodes.clone())).collect(),
        };
        self.files.write().await.insert(file_name.clone(), descriptor);
        self.save_catalog().await;

        if !unplaced.is_empty() {
            tracing::error!(file = %file_name, chunks = ?unplaced, "upload incomplete");
            return Err(DfsError::UploadIncomplete { file: file_name, chunks: unplaced });
        }
        tracing::info!(file = %file_name, bytes = size, "upload complete");
        Ok(report)
    }

    /// Fetch every chunk of `file_name`, verify it, and write the file to
    /// `dest` (or `dest/<file_name>` when `dest` is a directory). Nothing is
    /// created at the destination unless every chunk was recovered.
    pub async fn download(&self, file_name: &str, dest: &Path) -> DfsResult<PathBuf> {
        validate_file_name(file_name)?;
        self.ensure_known(file_name).await?;
        let lock = self.file_lock(file_name).await;
        let res = {
            let _held = lock.lock().await;
            self.download_locked(file_name, dest).await
        };
        self.release_file_lock(file_name, lock).await;
        res
    }

    async fn download_locked(&self, file_name: &str, dest: &Path) -> DfsResult<PathBuf> {
        let descriptor = self
            .files
            .read()
            .await
            .get(file_name)
            .cloned()
            .ok_or_else(|| DfsError::UnknownFile(file_name.to_string()))?;
        let pool: HashMap<NodeId, NodeEntry> = self
            .nodes
            .read()
            .await
            .iter()
            .map(|n| (n.entry.id, n.entry.clone()))
            .collect();

        tracing::info!(file = %file_name, chunks = descriptor.chunk_count(), "downloading");
        let mut fetched = Vec::with_capacity(descriptor.chunk_count());
        for (&seq, placement) in &descriptor.chunks {
            match self.fetch_chunk(file_name, seq, placement, &pool).await {
                Some(chunk) => fetched.push(chunk),
                None => {
                    tracing::error!(file = %file_name, seq, "no replica produced a verified chunk");
                    return Err(DfsError::ChunkUnavailable { file: file_name.to_string(), seq });
                }
            }
        }

        let target = if dest.is_dir() { dest.join(file_name) } else { dest.to_path_buf() };
        let count = descriptor.chunk_count() as u64;
        let out = target.clone();
        let written = tokio::task::spawn_blocking(move || write_atomically(&out, fetched, count))
            .await
            .map_err(|e| DfsError::Io(std::io::Error::other(e)))??;
        tracing::info!(file = %file_name, bytes = written, dest = %target.display(), "download complete");
        Ok(target)
    }

    async fn fetch_chunk(
        &self,
        file_name: &str,
        seq: SequenceId,
        placement: &ChunkPlacement,
        pool: &HashMap<NodeId, NodeEntry>,
    ) -> Option<Chunk> {
        for node_id in &placement.nodes {
            let Some(node) = pool.get(node_id) else {
                tracing::warn!(file = %file_name, seq, node_id, "replica on unregistered node skipped");
                continue;
            };
            let req = Request::Retrieve { file_name: file_name.to_string(), seq };
            match self.call(node, req).await {
                Ok(Response::Chunk { payload, digest }) => {
                    if partition::verify(&payload, &digest) && digest == placement.digest {
                        tracing::debug!(file = %file_name, seq, node_id, "chunk retrieved");
                        return Some(Chunk { seq, payload, digest });
                    }
                    tracing::warn!(file = %file_name, seq, node_id, "chunk failed integrity check");
                }
                Ok(other) => tracing::warn!(
                    file = %file_name, seq, node_id,
                    response = ?other, "unexpected response to retrieve"
                ),
                Err(e) => tracing::warn!(file = %file_name, seq, node_id, error = %e, "retrieve failed"),
            }
        }
        None
    }

    /// Ask every registered node to drop `file_name`, then forget it locally.
    /// Per-node failures are logged and reported but do not fail the delete.
    pub async fn delete(&self, file_name: &str) -> DfsResult<DeleteReport> {
        validate_file_name(file_name)?;
        self.ensure_known(file_name).await?;
        let lock = self.file_lock(file_name).await;
        let res = {
            let _held = lock.lock().await;
            self.delete_locked(file_name).await
        };
        self.release_file_lock(file_name, lock).await;
        res
    }

    async fn delete_locked(&self, file_name: &str) -> DfsResult<DeleteReport> {
        self.ensure_known(file_name).await?;
        let pool: Vec<NodeEntry> = self.nodes.read().await.iter().map(|n| n.entry.clone()).collect();
        let mut report = DeleteReport { file_name: file_name.to_string(), ..Default::default() };
        for node in &pool {
            let req = Request::Delete { file_name: file_name.to_string() };
            match self.call(node, req).await {
                Ok(Response::Deleted) => report.removed_from.push(node.id),
                Ok(other) => {
                    tracing::warn!(file = %file_name, node_id = node.id, response = ?other, "unexpected response to delete");
                    report.failed.push(node.id);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::warn!(file = %file_name, node_id = node.id, error = %e, "delete failed on node");
                    report.failed.push(node.id);
                }
            }
        }
        self.files.write().await.remove(file_name);
        self.save_catalog().await;
        tracing::info!(file = %file_name, nodes = report.removed_from.len(), failed = report.failed.len(), "file deleted");
        Ok(report)
    }

    /// Chunk inventory reported by one node.
    pub async fn node_inventory(&self, id: NodeId) -> DfsResult<BTreeMap<String, Vec<SequenceId>>> {
        let node = self
            .nodes
            .read()
            .await
            .iter()
            .find(|n| n.entry.id == id)
            .map(|n| n.entry.clone())
            .ok_or_else(|| DfsError::NotFound(format!("node {id}")))?;
        match self.call(&node, Request::List).await? {
            Response::Listing { files } => Ok(files),
            other => Err(DfsError::Protocol(format!("unexpected response to list: {other:?}"))),
        }
    }

    async fn call(&self, node: &NodeEntry, req: Request) -> DfsResult<Response> {
        let res = self.transport.call(node, req).await;
        let status = match &res {
            Err(DfsError::Network { .. }) => NodeStatus::Unreachable,
            _ => NodeStatus::Reachable,
        };
        self.set_status(node.id, status).await;
        transport::check(node.id, res?)
    }

    async fn set_status(&self, id: NodeId, status: NodeStatus) {
        let mut nodes = self.nodes.write().await;
        if let Some(n) = nodes.iter_mut().find(|n| n.entry.id == id) {
            if n.status != status {
                tracing::debug!(node_id = id, ?status, "node status changed");
            }
            n.status = status;
        }
    }

    async fn ensure_known(&self, file_name: &str) -> DfsResult<()> {
        if self.files.read().await.contains_key(file_name) {
            Ok(())
        } else {
            Err(DfsError::UnknownFile(file_name.to_string()))
        }
    }

    async fn file_lock(&self, file_name: &str) -> Arc<Mutex<()>> {
        self.file_locks.lock().await.entry(file_name.to_string()).or_default().clone()
    }

    /// Drop the per-name lock once the name has no descriptor and nobody else
    /// holds or waits on it. Names with a descriptor keep their entry.
    async fn release_file_lock(&self, file_name: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.file_locks.lock().await;
        if self.files.read().await.contains_key(file_name) {
            return;
        }
        let ours = locks.get(file_name).is_some_and(|held| Arc::ptr_eq(held, &lock));
        // one reference in the map, one in `lock`
        if ours && Arc::strong_count(&lock) == 2 {
            locks.remove(file_name);
        }
    }

    async fn save_catalog(&self) {
        let Some(path) = self.catalog_path.clone() else { return };
        let _guard = self.catalog_lock.lock().await;
        let mut catalog = Catalog {
            saved_utc: String::new(),
            chunk_size: self.chunk_size,
            files: self.files.read().await.clone(),
        };
        let res = tokio::task::spawn_blocking(move || {
            let res = catalog.save(&path);
            (path, res)
        })
        .await;
        match res {
            Ok((_, Ok(()))) => {}
            Ok((path, Err(e))) => tracing::warn!(path = %path.display(), error = %e, "catalog not saved"),
            Err(e) => tracing::warn!(error = %e, "catalog save task failed"),
        }
    }
}

fn write_atomically(target: &Path, chunks: Vec<Chunk>, count: u64) -> DfsResult<u64> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    let mut w = BufWriter::new(tmp);
    let written = partition::reassemble_exact(chunks, count, &mut w)?;
    let tmp = w.into_inner().map_err(|e| DfsError::Io(e.into_error()))?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| DfsError::Io(e.error))?;
    Ok(written)
}
