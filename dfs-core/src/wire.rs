//! Node wire protocol: one request frame and one response frame per connection.
//!
//! Frame layout (little endian):
//! magic `DFSWIRE` (7) + NUL (1) + schema_version (u32) + payload_len (u32)
//! + crc32 of payload (u32) + payload (bincode of [`Request`] or [`Response`]).
//!
//! Header fields are checked before the payload is read, so an oversized or
//! foreign frame never causes a large allocation or a decode attempt.

use crate::chunk::{Digest, SequenceId};
use crate::error::{DfsError, DfsResult};
use crc32fast::Hasher as Crc32;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const WIRE_MAGIC: &[u8] = b"DFSWIRE"; // 7 bytes
pub const SCHEMA_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 7 + 1 + 4 + 4 + 4; // magic + NUL + version + len + crc

#[derive(Clone, Copy, Debug)]
pub struct FrameLimits {
    pub max_payload_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self { max_payload_bytes: 64 * 1024 * 1024 }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Store { file_name: String, seq: SequenceId, payload: Vec<u8>, digest: Digest },
    Retrieve { file_name: String, seq: SequenceId },
    List,
    Delete { file_name: String },
}

impl Request {
    pub fn command(&self) -> &'static str {
        match self {
            Request::Store { .. } => "STORE",
            Request::Retrieve { .. } => "RETRIEVE",
            Request::List => "LIST",
            Request::Delete { .. } => "DELETE",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Integrity,
    Persistence,
    InvalidRequest,
    Internal,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Stored,
    Chunk { payload: Vec<u8>, digest: Digest },
    Listing { files: BTreeMap<String, Vec<SequenceId>> },
    Deleted,
    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error { kind, message: message.into() }
    }
}

/// Map a node-side failure onto the error kinds the protocol can carry.
impl From<&DfsError> for Response {
    fn from(e: &DfsError) -> Self {
        let kind = match e {
            DfsError::NotFound(_) | DfsError::UnknownFile(_) => ErrorKind::NotFound,
            DfsError::Integrity { .. } => ErrorKind::Integrity,
            DfsError::Io(_) | DfsError::Persistence(_) => ErrorKind::Persistence,
            DfsError::InvalidName { .. } | DfsError::Protocol(_) => ErrorKind::InvalidRequest,
            _ => ErrorKind::Internal,
        };
        Response::error(kind, e.to_string())
    }
}

pub fn encode_frame<T: Serialize>(msg: &T) -> DfsResult<Vec<u8>> {
    let payload =
        bincode::serialize(msg).map_err(|e| DfsError::Protocol(format!("encode: {e}")))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| DfsError::Protocol(format!("payload too large: {} bytes", payload.len())))?;
    let mut h = Crc32::new();
    h.update(&payload);
    let crc = h.finalize();
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(WIRE_MAGIC);
    buf.push(0);
    buf.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Validate a frame header; returns (payload_len, crc32).
pub fn decode_header(hdr: &[u8; HEADER_LEN], limits: &FrameLimits) -> DfsResult<(usize, u32)> {
    if &hdr[..7] != WIRE_MAGIC || hdr[7] != 0 {
        return Err(DfsError::Protocol("bad frame magic".into()));
    }
    let mut v4 = [0u8; 4];
    v4.copy_from_slice(&hdr[8..12]);
    let version = u32::from_le_bytes(v4);
    if version != SCHEMA_VERSION {
        return Err(DfsError::Protocol(format!("unsupported schema version {version}")));
    }
    v4.copy_from_slice(&hdr[12..16]);
    let len = u32::from_le_bytes(v4) as usize;
    if len > limits.max_payload_bytes {
        return Err(DfsError::Protocol(format!(
            "frame too large: {len} bytes (limit {})",
            limits.max_payload_bytes
        )));
    }
    v4.copy_from_slice(&hdr[16..20]);
    Ok((len, u32::from_le_bytes(v4)))
}

pub fn decode_payload<T: DeserializeOwned>(payload: &[u8], crc: u32) -> DfsResult<T> {
    let mut h = Crc32::new();
    h.update(payload);
    if h.finalize() != crc {
        return Err(DfsError::Protocol("frame CRC mismatch".into()));
    }
    bincode::deserialize(payload).map_err(|e| DfsError::Protocol(format!("decode: {e}")))
}

/// Decode a complete in-memory frame.
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8], limits: &FrameLimits) -> DfsResult<T> {
    if bytes.len() < HEADER_LEN {
        return Err(DfsError::Protocol("frame too short".into()));
    }
    let mut hdr = [0u8; HEADER_LEN];
    hdr.copy_from_slice(&bytes[..HEADER_LEN]);
    let (len, crc) = decode_header(&hdr, limits)?;
    let body = &bytes[HEADER_LEN..];
    if body.len() != len {
        return Err(DfsError::Protocol(format!(
            "frame length mismatch: header says {len}, got {}",
            body.len()
        )));
    }
    decode_payload(body, crc)
}

pub async fn write_frame<W, T>(w: &mut W, msg: &T) -> DfsResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let buf = encode_frame(msg)?;
    w.write_all(&buf).await?;
    w.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(r: &mut R, limits: &FrameLimits) -> DfsResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut hdr = [0u8; HEADER_LEN];
    r.read_exact(&mut hdr).await?;
    let (len, crc) = decode_header(&hdr, limits)?;
    // grow with the bytes that actually arrive instead of trusting `len` up front
    let mut payload = Vec::with_capacity(len.min(64 * 1024));
    (&mut *r).take(len as u64).read_to_end(&mut payload).await?;
    if payload.len() != len {
        return Err(DfsError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("frame truncated: {} of {} payload bytes", payload.len(), len),
        )));
    }
    decode_payload(&payload, crc)
}
