//! Per-target dump through the external dump utility.
//!
//! The utility's stdout is redirected into `<scratch>/<target>.sql` and its
//! stderr is captured. Any error output, a non-zero exit, a timeout, or
//! cancellation fails the target and deletes the partial file. There are no
//! retries.

use super::target::{BackupTarget, DumpArtifact, ScratchLayout, TargetStatus};
use crate::utils::DumpError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Environment variable the MySQL client tools read the password from.
const PASSWORD_ENV: &str = "MYSQL_PWD";

#[derive(Debug, Clone)]
pub struct Dumper {
    program: PathBuf,
    extra_args: Vec<String>,
    layout: ScratchLayout,
    timeout: Duration,
}

impl Dumper {
    pub fn new(
        program: impl Into<PathBuf>,
        extra_args: Vec<String>,
        layout: ScratchLayout,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            extra_args,
            layout,
            timeout,
        }
    }

    pub async fn dump(
        &self,
        target: &BackupTarget,
        cancel: &CancellationToken,
    ) -> Result<DumpArtifact, DumpError> {
        let path = self.layout.raw_path(&target.name);
        let started = Instant::now();
        info!(target = %target.name, "Backing up database");

        match self.run_utility(target, &path, cancel).await {
            Ok(()) => {
                let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
                info!(
                    target = %target.name,
                    bytes = size,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Dump complete"
                );
                Ok(DumpArtifact {
                    target: target.clone(),
                    path,
                    status: TargetStatus::Dumped,
                })
            }
            Err(e) => {
                warn!(target = %target.name, "Dump failed: {}", e);
                discard(&path).await;
                Err(e)
            }
        }
    }

    async fn run_utility(
        &self,
        target: &BackupTarget,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), DumpError> {
        let out = tokio::fs::File::create(path).await?.into_std().await;

        // The password goes through the child's environment, never its argv.
        let child = Command::new(&self.program)
            .args(&self.extra_args)
            .arg("-u")
            .arg(&target.credentials.user)
            .arg("-h")
            .arg(&target.host)
            .arg(&target.name)
            .env(PASSWORD_ENV, target.credentials.password())
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(DumpError::Spawn)?;

        debug!(target = %target.name, pid = ?child.id(), "Dump utility started");

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DumpError::Cancelled),
            res = tokio::time::timeout(self.timeout, child.wait_with_output()) => match res {
                Ok(output) => output?,
                Err(_) => return Err(DumpError::TimedOut(self.timeout)),
            },
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            return Err(DumpError::ErrorOutput(stderr.to_string()));
        }
        if !output.status.success() {
            return Err(DumpError::ExitStatus(output.status));
        }
        Ok(())
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial dump {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial dump {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::target::Credentials;
    use crate::executor::test_support::fake_dump_utility;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn target(name: &str) -> BackupTarget {
        let creds = Arc::new(Credentials::new("backup", "hunter2"));
        BackupTarget::new(name, "10.0.0.5", creds).unwrap()
    }

    fn dumper(dir: &TempDir, timeout: Duration) -> Dumper {
        let (program, args) = fake_dump_utility(dir.path());
        Dumper::new(program, args, ScratchLayout::new(dir.path()), timeout)
    }

    #[tokio::test]
    async fn test_successful_dump_writes_file() {
        let dir = TempDir::new().unwrap();
        let artifact = dumper(&dir, Duration::from_secs(30))
            .dump(&target("beta"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(artifact.status, TargetStatus::Dumped);
        assert_eq!(artifact.path, dir.path().join("beta.sql"));
        let content = std::fs::read_to_string(&artifact.path).unwrap();
        assert!(content.contains("-- dump of beta"));
    }

    #[tokio::test]
    async fn test_password_is_passed_through_environment() {
        let dir = TempDir::new().unwrap();
        let artifact = dumper(&dir, Duration::from_secs(30))
            .dump(&target("beta"), &CancellationToken::new())
            .await
            .unwrap();

        let content = std::fs::read_to_string(&artifact.path).unwrap();
        assert!(content.contains("args: -u backup -h 10.0.0.5 beta\n"));
        assert!(content.contains("pwd: hunter2\n"));
    }

    #[tokio::test]
    async fn test_error_output_fails_and_removes_file() {
        let dir = TempDir::new().unwrap();
        let err = dumper(&dir, Duration::from_secs(30))
            .dump(&target("alpha"), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            DumpError::ErrorOutput(msg) => assert!(msg.contains("Unknown database 'alpha'")),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!dir.path().join("alpha.sql").exists());
    }

    #[tokio::test]
    async fn test_warning_on_stderr_counts_as_failure() {
        let dir = TempDir::new().unwrap();
        let err = dumper(&dir, Duration::from_secs(30))
            .dump(&target("noisy"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DumpError::ErrorOutput(_)));
        assert!(!dir.path().join("noisy.sql").exists());
    }

    #[tokio::test]
    async fn test_silent_nonzero_exit_fails() {
        let dir = TempDir::new().unwrap();
        let err = dumper(&dir, Duration::from_secs(30))
            .dump(&target("silent"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DumpError::ExitStatus(_)));
        assert!(!dir.path().join("silent.sql").exists());
    }

    #[tokio::test]
    async fn test_hung_dump_times_out() {
        let dir = TempDir::new().unwrap();
        let started = Instant::now();
        let err = dumper(&dir, Duration::from_millis(200))
            .dump(&target("slow"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DumpError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!dir.path().join("slow.sql").exists());
    }

    #[tokio::test]
    async fn test_cancelled_dump() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = dumper(&dir, Duration::from_secs(30))
            .dump(&target("beta"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DumpError::Cancelled));
        assert!(!dir.path().join("beta.sql").exists());
    }

    #[tokio::test]
    async fn test_missing_utility_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let dumper = Dumper::new(
            "/nonexistent/mysqldump",
            Vec::new(),
            ScratchLayout::new(dir.path()),
            Duration::from_secs(1),
        );
        let err = dumper.dump(&target("beta"), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DumpError::Spawn(_)));
        assert!(!dir.path().join("beta.sql").exists());
    }
}
