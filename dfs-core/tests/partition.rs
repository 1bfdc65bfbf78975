use dfs_core::chunk::{Chunk, Digest};
use dfs_core::error::DfsError;
use dfs_core::partition::{self, reassemble, reassemble_exact, split};
use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::io::Read;

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

#[test]
fn nine_bytes_in_fours_reassemble_from_any_order() {
    let chunks = split(&b"ABCDEFGHI"[..], 4).unwrap();
    let payloads: Vec<&[u8]> = chunks.iter().map(|c| c.payload.as_slice()).collect();
    assert_eq!(payloads, vec![&b"ABCD"[..], &b"EFGH"[..], &b"I"[..]]);
    assert_eq!(chunks.iter().map(|c| c.seq).collect::<Vec<_>>(), vec![0, 1, 2]);

    let mut shuffled = vec![chunks[2].clone(), chunks[0].clone(), chunks[1].clone()];
    let mut out = Vec::new();
    assert_eq!(reassemble(shuffled.drain(..), &mut out).unwrap(), 9);
    assert_eq!(out, b"ABCDEFGHI");
}

#[test]
fn empty_source_yields_no_chunks() {
    let chunks = split(std::io::empty(), 16).unwrap();
    assert!(chunks.is_empty());
    let mut out = Vec::new();
    assert_eq!(reassemble(chunks, &mut out).unwrap(), 0);
    assert!(out.is_empty());
}

#[test]
fn exact_multiple_has_no_trailing_empty_chunk() {
    let data = random_bytes(64, 1);
    let chunks = split(&data[..], 16).unwrap();
    assert_eq!(chunks.len(), 4);
    assert!(chunks.iter().all(|c| c.len() == 16));
}

#[test]
fn zero_chunk_size_is_rejected() {
    assert!(matches!(split(&b"abc"[..], 0), Err(DfsError::Config(_))));
}

// Reader that hands out at most 3 bytes per call.
struct Trickle<'a>(&'a [u8]);

impl Read for Trickle<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.0.len().min(buf.len()).min(3);
        buf[..n].copy_from_slice(&self.0[..n]);
        self.0 = &self.0[n..];
        Ok(n)
    }
}

#[test]
fn short_reads_do_not_shorten_chunks() {
    let data = random_bytes(100, 2);
    let chunks = split(Trickle(&data), 32).unwrap();
    let lens: Vec<usize> = chunks.iter().map(Chunk::len).collect();
    assert_eq!(lens, vec![32, 32, 32, 4]);
}

#[test]
fn duplicate_sequence_is_rejected() {
    let chunks = split(&b"ABCDEFGHI"[..], 4).unwrap();
    let dup = vec![chunks[0].clone(), chunks[1].clone(), chunks[1].clone(), chunks[2].clone()];
    let mut out = Vec::new();
    assert!(matches!(reassemble(dup, &mut out), Err(DfsError::DuplicateSequence(1))));
    assert!(out.is_empty());
}

#[test]
fn gap_is_reported_and_nothing_written() {
    let chunks = split(&b"ABCDEFGHI"[..], 4).unwrap();
    let gappy = vec![chunks[0].clone(), chunks[2].clone()];
    let mut out = Vec::new();
    match reassemble(gappy, &mut out) {
        Err(DfsError::IncompleteSequence { missing }) => assert_eq!(missing, vec![1]),
        other => panic!("expected IncompleteSequence, got {:?}", other),
    }
    assert!(out.is_empty());
}

#[test]
fn exact_count_catches_missing_tail() {
    let chunks = split(&b"ABCDEFGHI"[..], 4).unwrap();
    let mut out = Vec::new();
    match reassemble_exact(chunks[..2].to_vec(), 3, &mut out) {
        Err(DfsError::IncompleteSequence { missing }) => assert_eq!(missing, vec![2]),
        other => panic!("expected IncompleteSequence, got {:?}", other),
    }
    assert!(reassemble_exact(chunks.clone(), 2, &mut out).is_err());
    assert!(out.is_empty());
}

#[test]
fn digest_detects_single_bit_flip() {
    let mut data = random_bytes(4096, 3);
    let d = partition::digest(&data);
    assert!(partition::verify(&data, &d));
    data[1234] ^= 0x01;
    assert!(!partition::verify(&data, &d));
    assert_ne!(Digest::of(&data), d);
}

#[test]
fn digest_serializes_as_hex_in_json() {
    let d = Digest::of(b"hello");
    let json = serde_json::to_string(&d).unwrap();
    assert_eq!(json, format!("\"{}\"", blake3::hash(b"hello").to_hex()));
    let back: Digest = serde_json::from_str(&json).unwrap();
    assert_eq!(back, d);
}

proptest! {
    #[test]
    fn split_then_shuffled_reassemble_is_identity(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
        chunk_size in 1usize..300,
        seed in any::<u64>(),
    ) {
        let mut chunks = split(&data[..], chunk_size).unwrap();
        let expected = (data.len() + chunk_size - 1) / chunk_size;
        prop_assert_eq!(chunks.len(), expected);
        for (i, c) in chunks.iter().enumerate() {
            prop_assert_eq!(c.seq, i as u64);
            prop_assert!(!c.is_empty());
            prop_assert!(c.is_intact());
            if i + 1 < chunks.len() {
                prop_assert_eq!(c.len(), chunk_size);
            }
        }
        chunks.shuffle(&mut StdRng::seed_from_u64(seed));
        let mut out = Vec::new();
        let n = reassemble_exact(chunks, expected as u64, &mut out).unwrap();
        prop_assert_eq!(n as usize, data.len());
        prop_assert_eq!(out, data);
    }
}
