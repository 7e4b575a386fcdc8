//! Utility modules for the backup runner.

pub mod errors;
pub mod logger;

pub use errors::{ArchiveError, BackupError, CompressError, DumpError, LockError, Result};
