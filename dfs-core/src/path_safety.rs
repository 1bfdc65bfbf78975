use crate::error::{DfsError, DfsResult};
use std::path::{Component, Path, PathBuf};

pub const MAX_NAME_LEN: usize = 255;

fn invalid(name: &str, reason: &'static str) -> DfsError {
    DfsError::InvalidName { name: name.to_string(), reason }
}

/// A stored file name must be exactly one normal path component: no
/// separators, no `.`/`..`, no leading dot (reserved for node metadata).
pub fn validate_file_name(name: &str) -> DfsResult<()> {
    if name.is_empty() {
        return Err(invalid(name, "empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid(name, "longer than 255 bytes"));
    }
    if name.contains('\0') {
        return Err(invalid(name, "contains NUL"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid(name, "contains a path separator"));
    }
    if name.starts_with('.') {
        return Err(invalid(name, "leading dot is reserved"));
    }
    let mut comps = Path::new(name).components();
    match (comps.next(), comps.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid(name, "not a single path component")),
    }
}

/// Resolve the per-file chunk directory under `root`, refusing symlinks so a
/// stored name can never point outside the node's storage area.
pub fn file_dir(root: &Path, name: &str) -> DfsResult<PathBuf> {
    validate_file_name(name)?;
    let candidate = root.join(name);
    if let Ok(m) = std::fs::symlink_metadata(&candidate) {
        if m.file_type().is_symlink() {
            return Err(invalid(name, "symlink in storage area"));
        }
    }
    Ok(candidate)
}

/// Final path component of `path`, validated as a stored file name.
pub fn file_name_of(path: &Path) -> DfsResult<String> {
    let raw = path
        .file_name()
        .ok_or_else(|| invalid(&path.to_string_lossy(), "path has no file name"))?;
    let name = raw
        .to_str()
        .ok_or_else(|| invalid(&raw.to_string_lossy(), "not valid UTF-8"))?
        .to_string();
    validate_file_name(&name)?;
    Ok(name)
}
