//! Error types for the backup pipeline.
//!
//! Run-level errors ([`BackupError`]) abort before any target work starts.
//! Per-target errors ([`DumpError`], [`CompressError`]) only exclude their
//! own target from the archive.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Another backup is running (pid {pid}, lock file {path})")]
    LockHeld { path: PathBuf, pid: i32 },

    #[error("Missing dependency: {0}")]
    DependencyMissing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// Process exit status for a run that failed before any target work.
    pub fn exit_code(&self) -> i32 {
        match self {
            BackupError::Usage(_) | BackupError::Config(_) => 3,
            BackupError::LockHeld { .. } => 4,
            BackupError::DependencyMissing(_) => 5,
            BackupError::Io(_) => 6,
        }
    }
}

impl From<LockError> for BackupError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Held { path, pid } => BackupError::LockHeld { path, pid },
            LockError::Io(e) => BackupError::Io(e),
        }
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock {path} is held by live process {pid}")]
    Held { path: PathBuf, pid: i32 },

    #[error("Lock file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("Failed to start dump utility: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Dump utility reported: {0}")]
    ErrorOutput(String),

    #[error("Dump utility exited with {0}")]
    ExitStatus(std::process::ExitStatus),

    #[error("Dump did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("Dump cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("Raw dump file is missing: {0}")]
    SourceMissing(PathBuf),

    #[error("Compression did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("Compression cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("No files to archive")]
    NothingToArchive,

    #[error("Archive already exists in destination: {0}")]
    DestinationExists(PathBuf),

    #[error("I/O error while building archive: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, BackupError>;
