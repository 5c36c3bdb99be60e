//! Durable file primitives used by the file-backed ledger.
//!
//! # Crash Safety
//!
//! - Whole-file writes go through a fsynced temp file, never in place
//! - Exclusive creation is a hard link, which the filesystem performs atomically
//! - Every directory mutation is followed by a directory fsync

pub mod atomic;
pub mod fsync;

pub use atomic::{TEMP_MARKER, create_file_exclusive, replace_file};
pub use fsync::{fsync_dir, fsync_file};
