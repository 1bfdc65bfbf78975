use crate::chunk::SequenceId;

/// Pool indices holding chunk `seq`: `(seq + i) mod node_count` for
/// `i in 0..min(replication_factor, node_count)`. Consecutive chunks rotate
/// their primary across the pool and no index repeats within one set.
pub fn replica_set(seq: SequenceId, node_count: usize, replication_factor: usize) -> Vec<usize> {
    if node_count == 0 {
        return Vec::new();
    }
    let r = replication_factor.min(node_count);
    let base = (seq % node_count as u64) as usize;
    (0..r).map(|i| (base + i) % node_count).collect()
}
