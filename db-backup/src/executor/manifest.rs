//! Run manifest: the set of compressed artifacts eligible for archiving.
//!
//! Compression workers append concurrently; the archiver reads the entries
//! once, after the compress phase barrier.

use super::codec::Codec;
use super::target::{BackupTarget, TargetStatus};
use std::path::PathBuf;
use std::sync::Mutex;

/// Per-target compressed file produced by the compressor.
#[derive(Debug, Clone)]
pub struct CompressedArtifact {
    pub target: BackupTarget,
    pub path: PathBuf,
    pub status: TargetStatus,
}

/// Append-only, concurrency-safe collection of compressed artifacts.
#[derive(Debug, Default)]
pub struct RunManifest {
    entries: Mutex<Vec<CompressedArtifact>>,
}

impl RunManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only artifacts that passed both dump and compress belong here.
    pub fn append(&self, artifact: CompressedArtifact) {
        debug_assert_eq!(artifact.status, TargetStatus::Compressed);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(artifact);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries sorted by target name so archives are laid out deterministically.
    pub fn entries(&self) -> Vec<CompressedArtifact> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone();
        entries.sort_by(|a, b| a.target.name.cmp(&b.target.name));
        entries
    }
}

/// Final archive produced by a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveResult {
    pub path: PathBuf,
    pub codec: Codec,
    pub included: usize,
    pub excluded: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::target::Credentials;
    use std::sync::Arc;

    fn artifact(name: &str) -> CompressedArtifact {
        let creds = Arc::new(Credentials::new("root", "pw"));
        CompressedArtifact {
            target: BackupTarget::new(name, "127.0.0.1", creds).unwrap(),
            path: PathBuf::from(format!("/tmp/{}.sql.zst", name)),
            status: TargetStatus::Compressed,
        }
    }

    #[test]
    fn test_concurrent_appends_keep_every_entry() {
        let manifest = Arc::new(RunManifest::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let manifest = Arc::clone(&manifest);
                std::thread::spawn(move || manifest.append(artifact(&format!("db{:02}", i))))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let entries = manifest.entries();
        assert_eq!(entries.len(), 16);
        assert_eq!(entries[0].target.name, "db00");
        assert_eq!(entries[15].target.name, "db15");
    }

    #[test]
    fn test_empty_manifest() {
        let manifest = RunManifest::new();
        assert!(manifest.is_empty());
        manifest.append(artifact("beta"));
        assert!(!manifest.is_empty());
    }
}
