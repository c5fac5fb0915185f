//! Run artifacts on disk: atomic writes, optional JSON loads, JSON lines.
//!
//! Every artifact the file sink produces (metric logs, checkpoints, manifests,
//! run summaries) goes through these helpers so a crash mid-write never leaves
//! a truncated file behind.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Hidden sibling the data is staged in before the rename.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Write `data` to a staging file, sync it, then rename over `path`.
/// Parent directories are created as needed.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    ensure_parent(path)?;
    let staging = staging_path(path);
    {
        let mut file = File::create(&staging)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&staging, path)
}

/// [`atomic_write`] of pretty-printed JSON.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, &json)
}

/// Deserialize a JSON file; `Ok(None)` when it does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Append one compact JSON record followed by a newline.
///
/// Metric logs grow one line per epoch, so they are appended rather than
/// rewritten.
pub fn append_json_line<T: Serialize>(path: &Path, record: &T) -> io::Result<()> {
    ensure_parent(path)?;
    let mut line = serde_json::to_vec(record).map_err(io::Error::other)?;
    line.push(b'\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&line)?;
    file.flush()
}
