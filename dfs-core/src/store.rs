//! Disk-backed chunk store owned by one storage node.
//!
//! Layout under the storage root:
//! `.lock` (advisory exclusive lock), `index.dfsi` (index snapshot) and one
//! directory per file name holding `chunk-NNNNNN.dat` payloads.

use crate::chunk::{Chunk, Digest, SequenceId};
use crate::error::{DfsError, DfsResult};
use crate::index::{self, ChunkIndex, IndexEntry, IndexLimits, IndexRecord};
use crate::path_safety::{file_dir, validate_file_name};
use anyhow::Context;
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use walkdir::WalkDir;

const LOCK_FILE: &str = ".lock";
const TMP_SUFFIX: &str = ".tmp";

#[derive(Clone, Debug)]
pub struct StoreOptions {
    pub persist_index: bool,
    pub shards: usize,
    pub limits: IndexLimits,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { persist_index: true, shards: index::DEFAULT_SHARDS, limits: IndexLimits::default() }
    }
}

pub fn chunk_file_name(seq: SequenceId) -> String {
    format!("chunk-{:06}.dat", seq)
}

pub fn parse_chunk_file_name(name: &str) -> Option<SequenceId> {
    let digits = name.strip_prefix("chunk-")?.strip_suffix(".dat")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub struct ChunkStore {
    root: PathBuf,
    index: ChunkIndex,
    opts: StoreOptions,
    // mutation counter; a snapshot taken after reading it covers every
    // mutation up to that value
    changes: AtomicU64,
    // generation covered by the last snapshot written
    persist_lock: Mutex<u64>,
    snapshots: AtomicU64,
    // held for the lifetime of the store; released when the file is closed
    _lock: File,
}

impl ChunkStore {
    pub async fn open(root: &Path, opts: StoreOptions) -> DfsResult<Self> {
        std::fs::create_dir_all(root)?;
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;
        lock.try_lock_exclusive().map_err(|e| {
            DfsError::Persistence(format!("storage dir {:?} is in use: {}", root, e))
        })?;

        let root = root.to_path_buf();
        let records = {
            let root = root.clone();
            let opts = opts.clone();
            tokio::task::spawn_blocking(move || recover(&root, &opts))
                .await
                .map_err(|e| DfsError::Persistence(format!("recovery task: {e}")))?
                .map_err(|e| DfsError::Persistence(format!("{:#}", e)))?
        };
        let recovered = records.len();

        let store = Self {
            index: ChunkIndex::new(opts.shards),
            root,
            opts,
            changes: AtomicU64::new(0),
            persist_lock: Mutex::new(0),
            snapshots: AtomicU64::new(0),
            _lock: lock,
        };
        store.index.load(&store.root, records).await;
        tracing::info!(root = %store.root.display(), chunks = recovered, "chunk store opened");
        store.persist(store.mark_changed()).await;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    /// Index snapshots written since open.
    pub fn snapshots_written(&self) -> u64 {
        self.snapshots.load(Ordering::SeqCst)
    }

    /// Persist `payload` and index it. Last write wins; on a failed write the
    /// previous index entry (if any) is left untouched.
    pub async fn store(
        &self,
        file_name: &str,
        seq: SequenceId,
        payload: &[u8],
        digest: Digest,
    ) -> DfsResult<()> {
        validate_file_name(file_name)?;
        if file_name == index::SNAPSHOT_FILE {
            return Err(DfsError::InvalidName {
                name: file_name.to_string(),
                reason: "reserved for the index snapshot",
            });
        }
        if !digest.matches(payload) {
            return Err(DfsError::Integrity { file: file_name.to_string(), seq });
        }
        let mut guard = self.index.shard_for(file_name).write().await;
        let dir = file_dir(&self.root, file_name)?;
        let path = dir.join(chunk_file_name(seq));
        write_chunk(&dir, &path, payload).await.map_err(|e| {
            DfsError::Persistence(format!("write {}: {}", path.display(), e))
        })?;
        guard
            .entry(file_name.to_string())
            .or_default()
            .insert(seq, IndexEntry { digest, path });
        drop(guard);
        tracing::debug!(file = file_name, seq, bytes = payload.len(), "chunk stored");
        self.persist(self.mark_changed()).await;
        Ok(())
    }

    /// Return the payload on disk with the digest recorded at write time.
    /// The payload is not re-verified here.
    pub async fn retrieve(&self, file_name: &str, seq: SequenceId) -> DfsResult<Chunk> {
        validate_file_name(file_name)?;
        let guard = self.index.shard_for(file_name).read().await;
        let entry = guard
            .get(file_name)
            .and_then(|chunks| chunks.get(&seq))
            .ok_or_else(|| DfsError::NotFound(format!("{} chunk {}", file_name, seq)))?;
        let payload = tokio::fs::read(&entry.path).await?;
        Ok(Chunk { seq, payload, digest: entry.digest })
    }

    pub async fn list(&self) -> BTreeMap<String, Vec<SequenceId>> {
        self.index.listing().await
    }

    /// Remove every chunk of `file_name`. The index entries go away even when
    /// a payload cannot be removed; that failure is still reported.
    pub async fn delete(&self, file_name: &str) -> DfsResult<usize> {
        validate_file_name(file_name)?;
        let mut guard = self.index.shard_for(file_name).write().await;
        let chunks = guard
            .remove(file_name)
            .ok_or_else(|| DfsError::NotFound(file_name.to_string()))?;
        let mut failures: Vec<String> = Vec::new();
        for entry in chunks.values() {
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => failures.push(format!("{}: {}", entry.path.display(), e)),
            }
        }
        let dir = self.root.join(file_name);
        match tokio::fs::remove_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => failures.push(format!("{}: {}", dir.display(), e)),
        }
        drop(guard);
        self.persist(self.mark_changed()).await;
        if !failures.is_empty() {
            return Err(DfsError::Persistence(format!(
                "delete {} left files behind: {}",
                file_name,
                failures.join("; ")
            )));
        }
        tracing::debug!(file = file_name, chunks = chunks.len(), "file deleted");
        Ok(chunks.len())
    }

    fn mark_changed(&self) -> u64 {
        self.changes.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make sure a snapshot covering mutation `generation` is on disk. Writers
    /// queued behind one snapshot are satisfied by it instead of writing again.
    async fn persist(&self, generation: u64) {
        if !self.opts.persist_index {
            return;
        }
        let mut flushed = self.persist_lock.lock().await;
        if *flushed >= generation {
            return;
        }
        let target = self.changes.load(Ordering::SeqCst);
        let records = self.index.records(&self.root).await;
        let path = self.root.join(index::SNAPSHOT_FILE);
        let res = tokio::task::spawn_blocking(move || index::write_snapshot(&path, &records)).await;
        match res {
            Ok(Ok(())) => {
                *flushed = target;
                self.snapshots.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Err(e)) => tracing::warn!(error = %format!("{:#}", e), "index snapshot not written"),
            Err(e) => tracing::warn!(error = %e, "index snapshot task failed"),
        }
    }
}

async fn write_chunk(dir: &Path, path: &Path, payload: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp_name);
    let mut f = tokio::fs::File::create(&tmp).await?;
    let written = async {
        f.write_all(payload).await?;
        f.sync_all().await
    }
    .await;
    drop(f);
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    tokio::fs::rename(&tmp, path).await
}

/// Rebuild the index from the snapshot (if any) reconciled against the chunk
/// files actually present under `root`.
fn recover(root: &Path, opts: &StoreOptions) -> anyhow::Result<Vec<IndexRecord>> {
    let mut known: BTreeMap<(String, SequenceId), IndexRecord> = BTreeMap::new();
    let snap = root.join(index::SNAPSHOT_FILE);
    if opts.persist_index && snap.exists() {
        match index::read_snapshot(&snap, &opts.limits) {
            Ok(records) => {
                for r in records {
                    known.insert((r.file_name.clone(), r.seq), r);
                }
            }
            Err(e) => tracing::warn!(error = %format!("{:#}", e), "ignoring unreadable index snapshot"),
        }
    }

    let mut on_disk: BTreeMap<(String, SequenceId), PathBuf> = BTreeMap::new();
    for ent in WalkDir::new(root).min_depth(2).max_depth(2) {
        let ent = ent.with_context(|| format!("scan {:?}", root))?;
        if !ent.file_type().is_file() {
            continue;
        }
        let p = ent.path();
        let fname = ent.file_name().to_string_lossy().to_string();
        if fname.ends_with(TMP_SUFFIX) {
            tracing::debug!(path = %p.display(), "removing interrupted write");
            std::fs::remove_file(p).with_context(|| format!("remove {:?}", p))?;
            continue;
        }
        let Some(seq) = parse_chunk_file_name(&fname) else { continue };
        let Some(owner) = p.parent().and_then(|d| d.file_name()).and_then(|s| s.to_str()) else {
            continue;
        };
        if validate_file_name(owner).is_err() {
            continue;
        }
        on_disk.insert((owner.to_string(), seq), p.to_path_buf());
    }

    let rel = |p: &Path| p.strip_prefix(root).unwrap_or(p).to_string_lossy().replace('\\', "/");
    let mut out = Vec::with_capacity(on_disk.len());
    for (key, rec) in known {
        match on_disk.remove(&key) {
            Some(path) => out.push(IndexRecord { rel_path: rel(&path), ..rec }),
            None => {
                tracing::warn!(file = %key.0, seq = key.1, "indexed chunk missing on disk, dropped")
            }
        }
    }
    for ((file_name, seq), path) in on_disk {
        let payload = std::fs::read(&path).with_context(|| format!("read {:?}", path))?;
        tracing::warn!(file = %file_name, seq, "unindexed chunk adopted with digest from disk");
        out.push(IndexRecord { file_name, seq, digest: Digest::of(&payload), rel_path: rel(&path) });
    }
    Ok(out)
}
