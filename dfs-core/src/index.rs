//! Node-local chunk index and its on-disk snapshot.
//!
//! The live index is sharded by file name: every chunk of one file lives in
//! the same shard, so a store/retrieve/delete on that file holds exactly one
//! lock for its whole duration.
//!
//! Snapshot layout (`index.dfsi`):
//! descriptor (magic + NUL + schema + codec + flags) + zstd(bincode records)
//! followed by a fixed trailer at EOF (magic + NUL + len + crc). The body
//! always starts at offset 0 and ends where the trailer begins, so the
//! trailer carries only its length.

use crate::chunk::{Digest, SequenceId};
use anyhow::{bail, Context, Result};
use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

pub const SNAPSHOT_FILE: &str = "index.dfsi";
pub const DEFAULT_SHARDS: usize = 16;

const TRAILER_MAGIC: &[u8] = b"DFSITRLR"; // 8 bytes
const TRAILER_LEN: u64 = 8 + 1 + 4 + 4; // magic + NUL + len + crc

const INDEX_DESC_MAGIC: &[u8] = b"DFSIDXD"; // 7 bytes
const INDEX_DESC_LEN: usize = INDEX_DESC_MAGIC.len() + 1 + 4 + 4 + 4; // magic + NUL + schema + codec + flags
const SNAPSHOT_SCHEMA: u32 = 1;
const CODEC_ZSTD: u32 = 1;

#[derive(Clone, Copy, Debug)]
pub struct IndexLimits {
    pub max_uncompressed_bytes: usize,
    pub max_entries: usize,
}

impl Default for IndexLimits {
    fn default() -> Self {
        Self { max_uncompressed_bytes: 64 * 1024 * 1024, max_entries: 5_000_000 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub digest: Digest,
    pub path: PathBuf,
}

/// Persisted form of one entry; `rel_path` is relative to the storage root.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IndexRecord {
    pub file_name: String,
    pub seq: SequenceId,
    pub digest: Digest,
    pub rel_path: String,
}

pub type FileChunks = BTreeMap<SequenceId, IndexEntry>;
pub type Shard = HashMap<String, FileChunks>;

pub struct ChunkIndex {
    shards: Vec<RwLock<Shard>>,
}

impl ChunkIndex {
    pub fn new(shards: usize) -> Self {
        let n = shards.max(1);
        Self { shards: (0..n).map(|_| RwLock::new(HashMap::new())).collect() }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_for(&self, file_name: &str) -> &RwLock<Shard> {
        let mut h = DefaultHasher::new();
        file_name.hash(&mut h);
        &self.shards[(h.finish() % self.shards.len() as u64) as usize]
    }

    /// Per-shard consistent listing; shards are read one after another, so a
    /// mutation racing with the listing may or may not be reflected.
    pub async fn listing(&self) -> BTreeMap<String, Vec<SequenceId>> {
        let mut out = BTreeMap::new();
        for shard in &self.shards {
            let guard = shard.read().await;
            for (name, chunks) in guard.iter() {
                out.insert(name.clone(), chunks.keys().copied().collect());
            }
        }
        out
    }

    pub async fn records(&self, root: &Path) -> Vec<IndexRecord> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let guard = shard.read().await;
            for (name, chunks) in guard.iter() {
                for (seq, e) in chunks {
                    let rel = e.path.strip_prefix(root).unwrap_or(&e.path);
                    out.push(IndexRecord {
                        file_name: name.clone(),
                        seq: *seq,
                        digest: e.digest,
                        rel_path: rel.to_string_lossy().replace('\\', "/"),
                    });
                }
            }
        }
        out.sort_by(|a, b| (&a.file_name, a.seq).cmp(&(&b.file_name, b.seq)));
        out
    }

    /// Replace the contents from a recovered record set (startup only).
    pub async fn load(&self, root: &Path, records: Vec<IndexRecord>) {
        for r in records {
            let mut guard = self.shard_for(&r.file_name).write().await;
            guard.entry(r.file_name).or_default().insert(
                r.seq,
                IndexEntry { digest: r.digest, path: root.join(r.rel_path) },
            );
        }
    }

    pub async fn len(&self) -> usize {
        let mut n = 0;
        for shard in &self.shards {
            n += shard.read().await.values().map(|c| c.len()).sum::<usize>();
        }
        n
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Atomically replace the snapshot at `path` with `records`.
pub fn write_snapshot(path: &Path, records: &[IndexRecord]) -> Result<()> {
    let dir = path.parent().context("snapshot path has no parent")?;
    let raw = bincode::serialize(records).context("serialize index")?;
    let compressed = zstd::stream::encode_all(&raw[..], 0).context("zstd compress index")?;

    let mut desc = Vec::with_capacity(INDEX_DESC_LEN);
    desc.extend_from_slice(INDEX_DESC_MAGIC);
    desc.push(0);
    desc.extend_from_slice(&SNAPSHOT_SCHEMA.to_le_bytes());
    desc.extend_from_slice(&CODEC_ZSTD.to_le_bytes());
    desc.extend_from_slice(&0u32.to_le_bytes()); // flags

    let idx_len = (desc.len() + compressed.len()) as u32;
    let mut h = Crc32::new();
    h.update(&desc);
    h.update(&compressed);
    let crc = h.finalize();

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp snapshot in {:?}", dir))?;
    {
        let f = tmp.as_file_mut();
        f.write_all(&desc)?;
        f.write_all(&compressed)?;
        let mut tr = Vec::with_capacity(TRAILER_LEN as usize);
        tr.extend_from_slice(TRAILER_MAGIC);
        tr.push(0);
        tr.extend_from_slice(&idx_len.to_le_bytes());
        tr.extend_from_slice(&crc.to_le_bytes());
        f.write_all(&tr)?;
        f.sync_all()?;
    }
    tmp.persist(path).with_context(|| format!("replace snapshot {:?}", path))?;
    Ok(())
}

/// Read trailer at EOF; returns (index_off, index_len, crc32)
pub fn read_trailer(f: &mut File) -> Result<(u64, u32, u32)> {
    let flen = f.metadata()?.len();
    if flen < TRAILER_LEN {
        bail!("too short");
    }
    f.seek(SeekFrom::Start(flen - TRAILER_LEN))?;
    let mut tr = vec![0u8; TRAILER_LEN as usize];
    f.read_exact(&mut tr)?;
    if &tr[0..8] != TRAILER_MAGIC || tr[8] != 0 {
        bail!("bad trailer magic");
    }
    let mut len4 = [0u8; 4];
    len4.copy_from_slice(&tr[9..13]);
    let mut crc4 = [0u8; 4];
    crc4.copy_from_slice(&tr[13..17]);
    let len = u32::from_le_bytes(len4);
    // the trailer is not covered by the CRC
    let Some(off) = (flen - TRAILER_LEN).checked_sub(len as u64) else {
        bail!("trailer length {} exceeds file size {}", len, flen);
    };
    Ok((off, len, u32::from_le_bytes(crc4)))
}

/// Verify CRC and descriptor, decompress, and decode records with limits applied.
pub fn read_records(
    f: &mut File,
    idx_off: u64,
    idx_len: u32,
    crc: u32,
    limits: &IndexLimits,
) -> Result<Vec<IndexRecord>> {
    let mut buf = vec![0u8; idx_len as usize];
    f.seek(SeekFrom::Start(idx_off))?;
    f.read_exact(&mut buf)?;
    let mut h = Crc32::new();
    h.update(&buf);
    if h.finalize() != crc {
        bail!("index CRC mismatch");
    }
    if buf.len() < INDEX_DESC_LEN
        || &buf[..INDEX_DESC_MAGIC.len()] != INDEX_DESC_MAGIC
        || buf[INDEX_DESC_MAGIC.len()] != 0
    {
        bail!("missing index descriptor");
    }
    let at = INDEX_DESC_MAGIC.len() + 1;
    let mut v4 = [0u8; 4];
    v4.copy_from_slice(&buf[at..at + 4]);
    let schema = u32::from_le_bytes(v4);
    v4.copy_from_slice(&buf[at + 4..at + 8]);
    let codec = u32::from_le_bytes(v4);
    if schema != SNAPSHOT_SCHEMA || codec != CODEC_ZSTD {
        bail!("unsupported index schema {} / codec {}", schema, codec);
    }
    let decompressed = zstd::stream::decode_all(&buf[INDEX_DESC_LEN..])
        .context("zstd decompress index")?;
    if decompressed.len() > limits.max_uncompressed_bytes {
        bail!("index too large: {} bytes", decompressed.len());
    }
    let records: Vec<IndexRecord> =
        bincode::deserialize(&decompressed).context("bincode index decode")?;
    if records.len() > limits.max_entries {
        bail!("too many index entries");
    }
    Ok(records)
}

pub fn read_snapshot(path: &Path, limits: &IndexLimits) -> Result<Vec<IndexRecord>> {
    let mut f = File::open(path).with_context(|| format!("open {:?}", path))?;
    let (off, len, crc) = read_trailer(&mut f)?;
    read_records(&mut f, off, len, crc, limits)
}
