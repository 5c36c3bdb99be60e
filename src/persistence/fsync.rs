//! fsync helpers for ledger files.
//!
//! A ledger record only counts as written once both the file and the directory
//! entry that names it are on disk. Creating, linking and renaming all modify
//! the directory, so every such step is followed by [`fsync_dir`].

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Syncs a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory so that entries created, linked or renamed in it survive
/// a power loss.
///
/// # Errors
///
/// Returns an error if the path doesn't exist or the sync fails.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}
