//! Crash-safe file replacement.
//!
//! Readers of a path written through [`write_atomic`] see either the complete
//! previous contents or the complete new contents. The final `rename` is
//! assumed atomic on the underlying filesystem (true for POSIX local volumes).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

/// Atomically replace `path` with `contents` (temp file + fsync + rename).
///
/// The temp file lives next to the destination so the rename never crosses
/// a filesystem boundary. On failure the destination is left untouched.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;

    let tmp_path = temp_path_for(parent, path);
    debug!(path = %path.display(), tmp = %tmp_path.display(), bytes = contents.len(), "atomic write");

    if let Err(err) = write_synced(&tmp_path, contents) {
        remove_temp(&tmp_path);
        return Err(err);
    }
    if let Err(err) = fs::rename(&tmp_path, path) {
        remove_temp(&tmp_path);
        return Err(err).with_context(|| format!("replace {}", path.display()));
    }
    sync_parent_dir(parent)?;
    Ok(())
}

/// Serialize `value` as pretty JSON with a trailing newline and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

fn temp_path_for(parent: &Path, path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("state");
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{name}.tmp-{}-{nanos}", std::process::id()))
}

fn remove_temp(tmp_path: &Path) {
    if let Err(err) = fs::remove_file(tmp_path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(tmp = %tmp_path.display(), %err, "failed to remove temp file");
    }
}

fn write_synced(tmp_path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(tmp_path)
        .with_context(|| format!("create temp file {}", tmp_path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync temp file {}", tmp_path.display()))?;
    Ok(())
}

#[cfg(unix)]
fn sync_parent_dir(parent: &Path) -> Result<()> {
    fs::File::open(parent)
        .and_then(|dir| dir.sync_all())
        .with_context(|| format!("sync directory {}", parent.display()))
}

#[cfg(not(unix))]
fn sync_parent_dir(_parent: &Path) -> Result<()> {
    Ok(())
}
