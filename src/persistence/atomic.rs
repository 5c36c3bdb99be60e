//! Crash-safe whole-file writes.
//!
//! Both helpers stage the full contents in a uniquely named temp file and fsync
//! it before it becomes visible under its final name, so readers never observe
//! a partially written file:
//!
//! - [`replace_file`] renames over the target (last writer wins).
//! - [`create_file_exclusive`] hard-links to the target, which fails if the
//!   target already exists (first writer wins, across processes).

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::fsync::{fsync_dir, fsync_file};

/// Suffix shared by all staging files. Readers must ignore names containing it.
pub const TEMP_MARKER: &str = ".tmp.";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns a staging path next to `target` that no other writer will use.
///
/// Unique per process (pid) and per call (counter), so concurrent writers in
/// the same or different processes never share a temp file.
fn temp_path_for(target: &Path) -> PathBuf {
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!("{}{}.{}", TEMP_MARKER, std::process::id(), seq));
    target.with_file_name(name)
}

/// Writes and fsyncs `contents` into a fresh temp file beside `target`.
fn stage(target: &Path, contents: &[u8]) -> io::Result<PathBuf> {
    let temp_path = temp_path_for(target);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)?;
    file.write_all(contents)?;
    fsync_file(&file)?;
    Ok(temp_path)
}

fn parent_dir(path: &Path) -> io::Result<&Path> {
    path.parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))
}

/// Atomically replaces `target` with `contents`.
///
/// Sequence: write temp, fsync temp, rename over target, fsync directory.
pub fn replace_file(target: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = parent_dir(target)?;
    let temp_path = stage(target, contents)?;

    if let Err(e) = std::fs::rename(&temp_path, target) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    fsync_dir(dir)
}

/// Creates `target` with `contents` only if it does not already exist.
///
/// Returns `Ok(true)` if this call created the file and `Ok(false)` if
/// `target` already existed. The existence check and the creation are a
/// single `link(2)`, so among concurrent callers exactly one gets `true`.
pub fn create_file_exclusive(target: &Path, contents: &[u8]) -> io::Result<bool> {
    let dir = parent_dir(target)?;
    let temp_path = stage(target, contents)?;

    let linked = std::fs::hard_link(&temp_path, target);
    // The temp name is only a staging handle; drop it whatever happened.
    let _ = std::fs::remove_file(&temp_path);

    match linked {
        Ok(()) => {
            fsync_dir(dir)?;
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}
