//! Error taxonomy shared by the partitioner, storage nodes and the coordinator.

use crate::chunk::SequenceId;
use crate::config::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("integrity check failed for {file} chunk {seq}")]
    Integrity { file: String, seq: SequenceId },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("node {node} at {addr}: {reason}")]
    Network { node: NodeId, addr: String, reason: String },

    #[error("incomplete chunk sequence, missing ids {missing:?}")]
    IncompleteSequence { missing: Vec<SequenceId> },

    #[error("duplicate chunk sequence id {0}")]
    DuplicateSequence(SequenceId),

    #[error("unknown file: {0}")]
    UnknownFile(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("invalid file name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("node {node} returned {kind:?}: {message}")]
    Remote { node: NodeId, kind: crate::wire::ErrorKind, message: String },

    #[error("no replica of {file} chunk {seq} produced a verified payload")]
    ChunkUnavailable { file: String, seq: SequenceId },

    #[error("no storage nodes registered")]
    NoNodes,

    #[error("upload of {file} incomplete: chunks {chunks:?} have no replica")]
    UploadIncomplete { file: String, chunks: Vec<SequenceId> },

    #[error("configuration error: {0}")]
    Config(String),
}

impl DfsError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DfsError::NotFound(_)
                | DfsError::Remote { kind: crate::wire::ErrorKind::NotFound, .. }
        )
    }
}

pub type DfsResult<T> = std::result::Result<T, DfsError>;
