//! Backup targets and the scratch-file layout they map to.

use super::codec::Codec;
use crate::utils::BackupError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Database login shared by every target of a run.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One database to back up. Immutable for the whole run.
#[derive(Debug, Clone)]
pub struct BackupTarget {
    pub name: String,
    pub host: String,
    pub credentials: Arc<Credentials>,
}

impl BackupTarget {
    /// The name becomes a file name in the scratch directory, so anything that
    /// could escape it is rejected.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        credentials: Arc<Credentials>,
    ) -> Result<Self, BackupError> {
        let name = name.into();
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\', '\0'])
        {
            return Err(BackupError::Usage(format!("invalid database name {:?}", name)));
        }
        Ok(Self {
            name,
            host: host.into(),
            credentials,
        })
    }
}

/// Per-target lifecycle: `Pending → Dumped → Compressed → Archived`, with
/// `Failed` reachable from `Pending` and `Dumped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Pending,
    Dumped,
    Compressed,
    Archived,
    Failed,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetStatus::Pending => "pending",
            TargetStatus::Dumped => "dumped",
            TargetStatus::Compressed => "compressed",
            TargetStatus::Archived => "archived",
            TargetStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Raw dump produced by the dumper.
#[derive(Debug, Clone)]
pub struct DumpArtifact {
    pub target: BackupTarget,
    pub path: PathBuf,
    pub status: TargetStatus,
}

/// Where intermediate files live: `<target>.sql` and `<target>.sql.<ext>`.
#[derive(Debug, Clone)]
pub struct ScratchLayout {
    dir: PathBuf,
}

impl ScratchLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn raw_path(&self, target: &str) -> PathBuf {
        self.dir.join(format!("{}.sql", target))
    }

    pub fn compressed_path(&self, target: &str, codec: Codec) -> PathBuf {
        self.dir.join(format!("{}.sql.{}", target, codec.extension()))
    }

    /// Every intermediate file a target may have produced under any codec.
    pub fn intermediate_files(&self, target: &str) -> Vec<PathBuf> {
        let mut files = vec![self.raw_path(target)];
        files.extend(Codec::ALL.iter().map(|c| self.compressed_path(target, *c)));
        files
    }
}
