use dfs_core::chunk::Digest;
use dfs_core::error::DfsError;
use dfs_core::wire::{
    decode_frame, encode_frame, read_frame, write_frame, ErrorKind, FrameLimits, Request,
    Response, HEADER_LEN,
};
use std::collections::BTreeMap;

fn store_request() -> Request {
    let payload = b"chunk payload".to_vec();
    Request::Store {
        file_name: "notes.txt".into(),
        seq: 7,
        digest: Digest::of(&payload),
        payload,
    }
}

fn assert_protocol<T: std::fmt::Debug>(res: Result<T, DfsError>, needle: &str) {
    match res {
        Err(DfsError::Protocol(msg)) => assert!(msg.contains(needle), "{msg:?} lacks {needle:?}"),
        other => panic!("expected protocol error containing {needle:?}, got {other:?}"),
    }
}

#[test]
fn frame_carries_request() {
    let req = store_request();
    let buf = encode_frame(&req).unwrap();
    assert_eq!(&buf[..8], b"DFSWIRE\0");
    let back: Request = decode_frame(&buf, &FrameLimits::default()).unwrap();
    assert_eq!(back, req);
    assert_eq!(back.command(), "STORE");
}

#[test]
fn bad_magic_rejected() {
    let mut buf = encode_frame(&Request::List).unwrap();
    buf[0] = b'X';
    assert_protocol(decode_frame::<Request>(&buf, &FrameLimits::default()), "magic");
}

#[test]
fn unknown_schema_version_rejected() {
    let mut buf = encode_frame(&Request::List).unwrap();
    buf[8..12].copy_from_slice(&99u32.to_le_bytes());
    assert_protocol(decode_frame::<Request>(&buf, &FrameLimits::default()), "schema version");
}

#[test]
fn corrupted_payload_fails_crc() {
    let mut buf = encode_frame(&store_request()).unwrap();
    let last = buf.len() - 1;
    buf[last] ^= 0xFF;
    assert_protocol(decode_frame::<Request>(&buf, &FrameLimits::default()), "CRC");
}

#[test]
fn oversized_frame_rejected_from_header() {
    let buf = encode_frame(&store_request()).unwrap();
    let tight = FrameLimits { max_payload_bytes: 8 };
    assert_protocol(decode_frame::<Request>(&buf, &tight), "too large");
}

#[test]
fn truncated_frame_rejected() {
    let buf = encode_frame(&store_request()).unwrap();
    assert_protocol(decode_frame::<Request>(&buf[..HEADER_LEN - 1], &FrameLimits::default()), "short");
    assert_protocol(decode_frame::<Request>(&buf[..buf.len() - 1], &FrameLimits::default()), "length");
}

#[test]
fn node_errors_map_to_wire_kinds() {
    let cases = [
        (DfsError::NotFound("x".into()), ErrorKind::NotFound),
        (DfsError::Integrity { file: "x".into(), seq: 0 }, ErrorKind::Integrity),
        (DfsError::Persistence("disk".into()), ErrorKind::Persistence),
        (DfsError::InvalidName { name: "../x".into(), reason: "bad" }, ErrorKind::InvalidRequest),
        (DfsError::NoNodes, ErrorKind::Internal),
    ];
    for (err, kind) in cases {
        match Response::from(&err) {
            Response::Error { kind: k, .. } => assert_eq!(k, kind, "{err}"),
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[tokio::test]
async fn frames_stream_over_duplex() {
    let (mut a, mut b) = tokio::io::duplex(1 << 16);
    let mut files = BTreeMap::new();
    files.insert("a.bin".to_string(), vec![0, 1, 2]);
    let resp = Response::Listing { files };
    write_frame(&mut a, &resp).await.unwrap();
    let got: Response = read_frame(&mut b, &FrameLimits::default()).await.unwrap();
    assert_eq!(got, resp);
}

#[tokio::test]
async fn stream_closing_mid_payload_is_an_io_error() {
    let (mut a, mut b) = tokio::io::duplex(1 << 16);
    let buf = encode_frame(&store_request()).unwrap();
    {
        use tokio::io::AsyncWriteExt;
        a.write_all(&buf[..buf.len() - 3]).await.unwrap();
    }
    drop(a);
    let res = read_frame::<_, Request>(&mut b, &FrameLimits::default()).await;
    assert!(matches!(res, Err(DfsError::Io(_))), "{res:?}");
}

#[tokio::test]
async fn announced_length_is_not_allocated_before_bytes_arrive() {
    // header promising the full limit, followed by nothing
    let mut hdr = encode_frame(&Request::List).unwrap()[..HEADER_LEN].to_vec();
    let limits = FrameLimits::default();
    hdr[12..16].copy_from_slice(&(limits.max_payload_bytes as u32).to_le_bytes());
    let (mut a, mut b) = tokio::io::duplex(64);
    {
        use tokio::io::AsyncWriteExt;
        a.write_all(&hdr).await.unwrap();
    }
    drop(a);
    let res = read_frame::<_, Request>(&mut b, &limits).await;
    match res {
        Err(DfsError::Io(e)) => assert!(e.to_string().contains("0 of"), "{e}"),
        other => panic!("expected truncation, got {other:?}"),
    }
}
