use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub type SequenceId = u64;

/// BLAKE3 digest of a chunk payload. Hex in human-readable formats (JSON),
/// raw 32 bytes otherwise (bincode).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn of(bytes: &[u8]) -> Self {
        Digest(*blake3::hash(bytes).as_bytes())
    }

    /// Constant-time comparison against the digest of `bytes`.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        blake3::hash(bytes) == blake3::Hash::from(self.0)
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(s)
        }
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        if d.is_human_readable() {
            let s = String::deserialize(d)?;
            let h = blake3::Hash::from_hex(s.as_str()).map_err(serde::de::Error::custom)?;
            Ok(Digest(*h.as_bytes()))
        } else {
            Ok(Digest(<[u8; 32]>::deserialize(d)?))
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form keeps chunk listings readable
        write!(f, "Digest({}..)", &self.to_hex()[..12])
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub seq: SequenceId,
    pub payload: Vec<u8>,
    pub digest: Digest,
}

impl Chunk {
    pub fn new(seq: SequenceId, payload: Vec<u8>) -> Self {
        let digest = Digest::of(&payload);
        Self { seq, payload, digest }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn is_intact(&self) -> bool {
        self.digest.matches(&self.payload)
    }
}
