use dfs_core::chunk::Digest;
use dfs_core::node::{dispatch, NodeConfig, NodeServer};
use dfs_core::store::{ChunkStore, StoreOptions};
use dfs_core::wire::{self, ErrorKind, FrameLimits, Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn dispatch_covers_every_command() {
    let td = tempfile::tempdir().unwrap();
    let store = ChunkStore::open(td.path(), StoreOptions::default()).await.unwrap();
    let payload = b"hello node".to_vec();
    let digest = Digest::of(&payload);

    let r = dispatch(
        &store,
        Request::Store { file_name: "h.txt".into(), seq: 0, payload: payload.clone(), digest },
    )
    .await;
    assert_eq!(r, Response::Stored);

    let r = dispatch(&store, Request::Retrieve { file_name: "h.txt".into(), seq: 0 }).await;
    assert_eq!(r, Response::Chunk { payload, digest });

    match dispatch(&store, Request::List).await {
        Response::Listing { files } => assert_eq!(files["h.txt"], vec![0]),
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(dispatch(&store, Request::Delete { file_name: "h.txt".into() }).await, Response::Deleted);
    match dispatch(&store, Request::Retrieve { file_name: "h.txt".into(), seq: 0 }).await {
        Response::Error { kind, .. } => assert_eq!(kind, ErrorKind::NotFound),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn dispatch_reports_integrity_and_bad_names() {
    let td = tempfile::tempdir().unwrap();
    let store = ChunkStore::open(td.path(), StoreOptions::default()).await.unwrap();
    let r = dispatch(
        &store,
        Request::Store {
            file_name: "x.bin".into(),
            seq: 0,
            payload: b"abc".to_vec(),
            digest: Digest::of(b"abd"),
        },
    )
    .await;
    assert!(matches!(r, Response::Error { kind: ErrorKind::Integrity, .. }));

    let r = dispatch(&store, Request::Delete { file_name: "../x".into() }).await;
    assert!(matches!(r, Response::Error { kind: ErrorKind::InvalidRequest, .. }));
}

#[tokio::test]
async fn garbage_frame_gets_invalid_request() {
    let td = tempfile::tempdir().unwrap();
    let server = NodeServer::bind(NodeConfig::new(7, "127.0.0.1", 0, td.path())).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let task = tokio::spawn(server.serve(async {
        let _ = rx.await;
    }));

    let mut s = TcpStream::connect(addr).await.unwrap();
    // exactly one header worth of junk so nothing is left unread
    s.write_all(&[b'x'; wire::HEADER_LEN]).await.unwrap();
    let resp: Response = wire::read_frame(&mut s, &FrameLimits::default()).await.unwrap();
    assert!(matches!(resp, Response::Error { kind: ErrorKind::InvalidRequest, .. }));
    let mut rest = Vec::new();
    s.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    // the node keeps serving after a bad client
    let mut s = TcpStream::connect(addr).await.unwrap();
    wire::write_frame(&mut s, &Request::List).await.unwrap();
    let resp: Response = wire::read_frame(&mut s, &FrameLimits::default()).await.unwrap();
    assert!(matches!(resp, Response::Listing { .. }));

    tx.send(()).unwrap();
    task.await.unwrap().unwrap();
}
