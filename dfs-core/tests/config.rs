use dfs_core::config::{ClientConfig, MAX_CHUNK_SIZE};
use dfs_core::error::DfsError;
use dfs_core::partition::DEFAULT_CHUNK_SIZE;
use std::time::Duration;

#[test]
fn defaults_fill_missing_fields() {
    let cfg = ClientConfig::from_json(r#"{ "nodes": [ { "id": 1, "port": 9001 } ] }"#).unwrap();
    assert_eq!(cfg.replication_factor, 2);
    assert_eq!(cfg.chunk_size, DEFAULT_CHUNK_SIZE);
    assert_eq!(cfg.connect_timeout(), Duration::from_secs(5));
    assert_eq!(cfg.nodes[0].host, "localhost");
    assert_eq!(cfg.nodes[0].address(), "localhost:9001");
}

#[test]
fn explicit_fields_are_kept() {
    let cfg = ClientConfig::from_json(
        r#"{
            "replication_factor": 3,
            "chunk_size": 4096,
            "io_timeout_ms": 250,
            "nodes": [
                { "id": 1, "host": "10.0.0.1", "port": 7000 },
                { "id": 2, "host": "10.0.0.2", "port": 7000 }
            ]
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.replication_factor, 3);
    assert_eq!(cfg.chunk_size, 4096);
    assert_eq!(cfg.io_timeout(), Duration::from_millis(250));
    assert_eq!(cfg.nodes[1].address(), "10.0.0.2:7000");
}

#[test]
fn invalid_configs_rejected() {
    let bad = [
        r#"{ "nodes": [] , "chunk_size": 0 }"#.to_string(),
        format!(r#"{{ "nodes": [], "chunk_size": {} }}"#, MAX_CHUNK_SIZE + 1),
        r#"{ "nodes": [], "replication_factor": 0 }"#.to_string(),
        r#"{ "nodes": [ { "id": 1, "port": 1 }, { "id": 1, "port": 2 } ] }"#.to_string(),
        r#"{ "replication_factor": 2 }"#.to_string(),
        "not json".to_string(),
    ];
    for json in &bad {
        assert!(matches!(ClientConfig::from_json(json), Err(DfsError::Config(_))), "{json}");
    }
}

#[test]
fn load_reports_missing_file() {
    let td = tempfile::tempdir().unwrap();
    let err = ClientConfig::load(&td.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, DfsError::Config(_)));
}
