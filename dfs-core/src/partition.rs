//! Fixed-size chunking and in-order reassembly.

use crate::chunk::{Chunk, Digest, SequenceId};
use crate::error::{DfsError, DfsResult};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::Path;

pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

pub fn digest(bytes: &[u8]) -> Digest {
    Digest::of(bytes)
}

pub fn verify(bytes: &[u8], expected: &Digest) -> bool {
    expected.matches(bytes)
}

/// Split `src` into `chunk_size` windows. Only the last window may be short,
/// and an exhausted source never yields an empty chunk.
pub fn split<R: Read>(mut src: R, chunk_size: usize) -> DfsResult<Vec<Chunk>> {
    if chunk_size == 0 {
        return Err(DfsError::Config("chunk size must be positive".into()));
    }
    let mut windows: Vec<Vec<u8>> = Vec::new();
    loop {
        let mut buf = vec![0u8; chunk_size];
        let n = fill_window(&mut src, &mut buf)?;
        if n == 0 {
            break;
        }
        buf.truncate(n);
        windows.push(buf);
        if n < chunk_size {
            break;
        }
    }
    // Hash in parallel; order is fixed by the read loop above.
    let chunks = windows
        .into_par_iter()
        .enumerate()
        .map(|(i, payload)| Chunk::new(i as SequenceId, payload))
        .collect();
    Ok(chunks)
}

pub fn split_file(path: &Path, chunk_size: usize) -> DfsResult<Vec<Chunk>> {
    let f = File::open(path)?;
    split(BufReader::new(f), chunk_size)
}

// Reads until `buf` is full or the source hits EOF; short reads do not end a window.
fn fill_window<R: Read>(src: &mut R, buf: &mut [u8]) -> DfsResult<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Write chunk payloads to `sink` in ascending sequence order.
///
/// Chunks may arrive in any order. The sequence must be contiguous from 0 up to
/// the highest id present; duplicates are rejected. Nothing is written unless
/// the whole sequence checks out. Returns the number of bytes written.
pub fn reassemble<I, W>(chunks: I, sink: &mut W) -> DfsResult<u64>
where
    I: IntoIterator<Item = Chunk>,
    W: Write,
{
    let ordered = order_chunks(chunks)?;
    let expected = ordered.keys().next_back().map(|max| max + 1).unwrap_or(0);
    write_ordered(ordered, expected, sink)
}

/// Like [`reassemble`], but also requires exactly `count` chunks so a missing
/// tail is reported instead of silently producing a shorter file.
pub fn reassemble_exact<I, W>(chunks: I, count: u64, sink: &mut W) -> DfsResult<u64>
where
    I: IntoIterator<Item = Chunk>,
    W: Write,
{
    let ordered = order_chunks(chunks)?;
    if let Some((&max, _)) = ordered.iter().next_back() {
        if max >= count {
            return Err(DfsError::Protocol(format!(
                "chunk id {max} outside expected range 0..{count}"
            )));
        }
    }
    write_ordered(ordered, count, sink)
}

fn order_chunks<I>(chunks: I) -> DfsResult<BTreeMap<SequenceId, Vec<u8>>>
where
    I: IntoIterator<Item = Chunk>,
{
    let mut ordered = BTreeMap::new();
    for ch in chunks {
        if ordered.insert(ch.seq, ch.payload).is_some() {
            return Err(DfsError::DuplicateSequence(ch.seq));
        }
    }
    Ok(ordered)
}

fn write_ordered<W: Write>(
    ordered: BTreeMap<SequenceId, Vec<u8>>,
    count: u64,
    sink: &mut W,
) -> DfsResult<u64> {
    let missing: Vec<SequenceId> = (0..count).filter(|s| !ordered.contains_key(s)).collect();
    if !missing.is_empty() {
        return Err(DfsError::IncompleteSequence { missing });
    }
    let mut written = 0u64;
    for payload in ordered.values() {
        sink.write_all(payload)?;
        written += payload.len() as u64;
    }
    sink.flush()?;
    Ok(written)
}
