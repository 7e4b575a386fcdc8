//! Post-run cleanup of intermediate files and the process lock.

use super::target::ScratchLayout;
use crate::daemon::lock::ProcessLock;
use std::io::ErrorKind;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub errors: Vec<String>,
}

/// Remove raw and compressed files of every attempted target, successful or
/// not, then release the lock. Missing files are fine, so a second call is a
/// no-op.
pub fn cleanup<'a>(
    layout: &ScratchLayout,
    targets: impl IntoIterator<Item = &'a str>,
    lock: &mut ProcessLock,
) -> CleanupReport {
    info!("Cleaning temporary files");
    let mut report = CleanupReport::default();

    for target in targets {
        for path in layout.intermediate_files(target) {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed {}", path.display());
                    report.removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to remove {}: {}", path.display(), e);
                    report.errors.push(format!("{}: {}", path.display(), e));
                }
            }
        }
    }

    if let Err(e) = lock.release() {
        warn!("Failed to remove lock file {}: {}", lock.path().display(), e);
        report.errors.push(format!("{}: {}", lock.path().display(), e));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::codec::Codec;
    use tempfile::TempDir;

    #[test]
    fn test_removes_files_and_lock_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let layout = ScratchLayout::new(dir.path());
        let lock_path = dir.path().join("backup.pid");
        let mut lock = ProcessLock::acquire(&lock_path).unwrap();

        std::fs::write(layout.raw_path("alpha"), b"partial").unwrap();
        std::fs::write(layout.raw_path("beta"), b"dump").unwrap();
        std::fs::write(layout.compressed_path("beta", Codec::Zstd), b"zst").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"keep").unwrap();

        let first = cleanup(&layout, ["alpha", "beta"], &mut lock);
        assert_eq!(first.removed, 3);
        assert!(first.errors.is_empty());
        assert!(!lock_path.exists());
        assert!(dir.path().join("unrelated.txt").exists());

        let second = cleanup(&layout, ["alpha", "beta"], &mut lock);
        assert_eq!(second, CleanupReport::default());
    }
}
