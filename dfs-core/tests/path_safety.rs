use dfs_core::error::DfsError;
use dfs_core::path_safety::{file_dir, file_name_of, validate_file_name, MAX_NAME_LEN};
use std::path::Path;

#[test]
fn plain_names_accepted() {
    for name in ["a.bin", "report 2024.pdf", "x", "ünïcode.txt", "dots.in.name"] {
        validate_file_name(name).unwrap();
    }
    validate_file_name(&"n".repeat(MAX_NAME_LEN)).unwrap();
}

#[test]
fn unsafe_names_rejected() {
    let long = "n".repeat(MAX_NAME_LEN + 1);
    for name in ["", ".", "..", ".hidden", "a/b", "../up", "a\\b", "nul\0byte", "/abs", long.as_str()] {
        assert!(
            matches!(validate_file_name(name), Err(DfsError::InvalidName { .. })),
            "{name:?} accepted"
        );
    }
}

#[test]
fn file_name_taken_from_last_component() {
    assert_eq!(file_name_of(Path::new("/tmp/data/photo.raw")).unwrap(), "photo.raw");
    assert_eq!(file_name_of(Path::new("photo.raw")).unwrap(), "photo.raw");
    assert!(file_name_of(Path::new("/")).is_err());
    assert!(file_name_of(Path::new("dir/..")).is_err());
}

#[cfg(target_family = "unix")]
#[test]
fn symlinked_file_dir_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    let outside = tmp.path().join("outside");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::create_dir_all(&outside).unwrap();
    std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

    assert!(matches!(file_dir(&root, "link"), Err(DfsError::InvalidName { .. })));
    assert_eq!(file_dir(&root, "real").unwrap(), root.join("real"));
}
