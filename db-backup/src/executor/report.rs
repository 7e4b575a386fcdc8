//! Run summary handed to the log and to the notifier.

use super::manifest::ArchiveResult;
use super::target::TargetStatus;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every target was archived.
    Complete,
    /// An archive was produced but some targets failed.
    Partial,
    /// No target reached the compressed state.
    NothingArchived,
    /// Building or storing the archive failed.
    ArchiveFailed(String),
    /// A shutdown signal interrupted the run.
    Cancelled,
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Complete => "completed",
            RunOutcome::Partial => "partially completed",
            RunOutcome::NothingArchived => "produced no archive",
            RunOutcome::ArchiveFailed(_) => "failed to archive",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TargetReport {
    pub name: String,
    pub status: TargetStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub host: String,
    pub targets: Vec<TargetReport>,
    pub archive: Option<ArchiveResult>,
    pub outcome: RunOutcome,
    pub elapsed: Duration,
    pub cleanup_errors: Vec<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| t.status == TargetStatus::Archived)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.targets.len() - self.succeeded()
    }

    /// 0 when every target was archived, 1 for a partial archive, 2 when the
    /// run finished without an archive.
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcome::Complete => 0,
            RunOutcome::Partial => 1,
            RunOutcome::NothingArchived | RunOutcome::ArchiveFailed(_) | RunOutcome::Cancelled => 2,
        }
    }

    pub fn status_of(&self, target: &str) -> Option<TargetStatus> {
        self.targets.iter().find(|t| t.name == target).map(|t| t.status)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Backup of {} {} (run {})", self.host, self.outcome.label(), self.run_id)?;
        writeln!(f, "Succeeded: {}, failed: {}", self.succeeded(), self.failed())?;
        match &self.archive {
            Some(archive) => writeln!(f, "Archive: {} ({})", archive.path.display(), archive.codec)?,
            None => writeln!(f, "Archive: none")?,
        }
        if let RunOutcome::ArchiveFailed(reason) = &self.outcome {
            writeln!(f, "Archive error: {}", reason)?;
        }
        for target in &self.targets {
            match &target.error {
                Some(err) => writeln!(f, "  {}: {} ({})", target.name, target.status, err)?,
                None => writeln!(f, "  {}: {}", target.name, target.status)?,
            }
        }
        if !self.cleanup_errors.is_empty() {
            writeln!(f, "Cleanup errors: {}", self.cleanup_errors.len())?;
        }
        write!(f, "Total time spent: {:.3} seconds", self.elapsed.as_secs_f64())
    }
}
