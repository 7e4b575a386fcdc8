//! Backup run coordinator.
//!
//! One run goes through a fixed sequence:
//! - process lock
//! - dependency check and codec selection
//! - dump phase (worker pool over every target)
//! - compress phase (worker pool over every dumped target)
//! - archive assembly
//! - cleanup of intermediate files and the lock
//!
//! Per-target failures never stop the run. Run-level failures (lock held,
//! missing dependency) return before any target work starts.

pub mod archive;
pub mod cleanup;
pub mod codec;
pub mod compress;
pub mod dump;
pub mod manifest;
pub mod pool;
pub mod report;
pub mod target;

#[cfg(test)]
pub(crate) mod test_support;

use crate::config::RunContext;
use crate::daemon::lock::ProcessLock;
use crate::utils::{ArchiveError, BackupError};
use archive::Archiver;
use codec::{check_dependencies, Codec};
use compress::Compressor;
use dump::Dumper;
use manifest::{ArchiveResult, RunManifest};
use pool::WorkerPool;
use report::{RunOutcome, RunReport, TargetReport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use target::{BackupTarget, DumpArtifact, ScratchLayout, TargetStatus};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Main backup coordinator
pub struct Coordinator {
    ctx: Arc<RunContext>,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Create a coordinator that can't be cancelled from outside
    pub fn new(ctx: RunContext) -> Self {
        Self::with_cancel(ctx, CancellationToken::new())
    }

    /// Create a coordinator that stops when `cancel` fires
    pub fn with_cancel(ctx: RunContext, cancel: CancellationToken) -> Self {
        Self {
            ctx: Arc::new(ctx),
            cancel,
        }
    }

    /// Execute one backup run.
    ///
    /// `Err` is reserved for run-level failures that happen before any dump
    /// is attempted. Everything after that, including an empty manifest or a
    /// failed archive, is reported through the returned [`RunReport`].
    pub async fn run(&self) -> Result<RunReport, BackupError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, host = %self.ctx.host);
        self.execute(run_id).instrument(span).await
    }

    async fn execute(&self, run_id: Uuid) -> Result<RunReport, BackupError> {
        let started = Instant::now();
        let ctx = &self.ctx;
        info!(
            targets = ctx.targets.len(),
            workers = ctx.max_parallelism,
            "Starting backup of {}",
            ctx.targets.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")
        );

        let mut lock = ProcessLock::acquire(&ctx.lock_file).map_err(|e| {
            error!("{}", e);
            BackupError::from(e)
        })?;

        let codec = match check_dependencies(&ctx.codec_preference, &ctx.dump.program) {
            Ok(codec) => codec,
            Err(e) => {
                error!("{}", e);
                if let Err(err) = lock.release() {
                    warn!("Failed to remove lock file {}: {}", lock.path().display(), err);
                }
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(&ctx.scratch_dir).await {
            error!("Cannot create scratch directory {}: {}", ctx.scratch_dir.display(), e);
            if let Err(err) = lock.release() {
                warn!("Failed to remove lock file {}: {}", lock.path().display(), err);
            }
            return Err(e.into());
        }

        let layout = ScratchLayout::new(&ctx.scratch_dir);
        let pool = WorkerPool::new(ctx.max_parallelism);
        let mut failures: HashMap<String, String> = HashMap::new();

        // Dump phase
        let dumps = self.dump_phase(&pool, &layout, &mut failures).await;

        // Compress phase, starts only after every dump has finished
        let manifest = self.compress_phase(&pool, &layout, codec, dumps, &mut failures).await;

        // Archive
        let entries = manifest.entries();
        let (outcome, archive) = if self.cancel.is_cancelled() {
            warn!("Run cancelled, skipping archive");
            (RunOutcome::Cancelled, None)
        } else {
            let archiver = Archiver::new(&ctx.destination, &ctx.host, layout.clone(), ctx.compression_level);
            match archiver.archive(&entries, codec, ctx.targets.len()).await {
                Ok(result) if failures.is_empty() => (RunOutcome::Complete, Some(result)),
                Ok(result) => (RunOutcome::Partial, Some(result)),
                Err(ArchiveError::NothingToArchive) => (RunOutcome::NothingArchived, None),
                Err(e) => {
                    error!("Archive failed: {}", e);
                    (RunOutcome::ArchiveFailed(e.to_string()), None)
                }
            }
        };

        // Cleanup runs on every path once the lock is held
        let cleaned = cleanup::cleanup(&layout, ctx.targets.iter().map(|t| t.name.as_str()), &mut lock);

        let targets = target_reports(&ctx.targets, &failures, &entries, archive.as_ref(), &outcome);
        let report = RunReport {
            run_id,
            host: ctx.host.clone(),
            targets,
            archive,
            outcome,
            elapsed: started.elapsed(),
            cleanup_errors: cleaned.errors,
        };

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            outcome = report.outcome.label(),
            "Backup finished"
        );
        Ok(report)
    }

    async fn dump_phase(
        &self,
        pool: &WorkerPool,
        layout: &ScratchLayout,
        failures: &mut HashMap<String, String>,
    ) -> Vec<DumpArtifact> {
        let dumper = Arc::new(Dumper::new(
            self.ctx.dump.program.clone(),
            self.ctx.dump.extra_args.clone(),
            layout.clone(),
            self.ctx.command_timeout,
        ));
        let cancel = self.cancel.clone();

        let outcomes = pool
            .run("dump", self.ctx.targets.clone(), move |target: BackupTarget| {
                let dumper = Arc::clone(&dumper);
                let cancel = cancel.clone();
                async move { dumper.dump(&target, &cancel).await }
            })
            .await;

        let mut dumps = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome.result {
                Ok(artifact) => dumps.push(artifact),
                Err(e) => {
                    failures.insert(outcome.target, format!("dump: {}", e));
                }
            }
        }
        dumps
    }

    async fn compress_phase(
        &self,
        pool: &WorkerPool,
        layout: &ScratchLayout,
        codec: Codec,
        dumps: Vec<DumpArtifact>,
        failures: &mut HashMap<String, String>,
    ) -> Arc<RunManifest> {
        let manifest = Arc::new(RunManifest::new());
        let compressor = Arc::new(Compressor::new(
            codec,
            self.ctx.compression_level,
            layout.clone(),
            self.ctx.command_timeout,
        ));
        let cancel = self.cancel.clone();
        let shared = Arc::clone(&manifest);

        let outcomes = pool
            .run("compress", dumps, move |artifact: DumpArtifact| {
                let compressor = Arc::clone(&compressor);
                let manifest = Arc::clone(&shared);
                let cancel = cancel.clone();
                async move {
                    let compressed = compressor.compress(&artifact, &cancel).await?;
                    manifest.append(compressed);
                    Ok::<_, crate::utils::CompressError>(())
                }
            })
            .await;

        for outcome in outcomes {
            if let Err(e) = outcome.result {
                failures.insert(outcome.target, format!("compress: {}", e));
            }
        }
        manifest
    }
}

/// Final per-target status. A compressed target becomes `Archived` only when
/// the archive over the whole manifest succeeded.
fn target_reports(
    targets: &[BackupTarget],
    failures: &HashMap<String, String>,
    entries: &[manifest::CompressedArtifact],
    archive: Option<&ArchiveResult>,
    outcome: &RunOutcome,
) -> Vec<TargetReport> {
    targets
        .iter()
        .map(|t| {
            if let Some(reason) = failures.get(&t.name) {
                return TargetReport {
                    name: t.name.clone(),
                    status: TargetStatus::Failed,
                    error: Some(reason.clone()),
                };
            }
            let compressed = entries.iter().any(|e| e.target.name == t.name);
            let (status, error) = match (compressed, archive) {
                (true, Some(_)) => (TargetStatus::Archived, None),
                (true, None) => (TargetStatus::Compressed, Some(format!("not archived: {}", outcome.label()))),
                (false, _) => (TargetStatus::Failed, Some("no artifact produced".to_string())),
            };
            TargetReport {
                name: t.name.clone(),
                status,
                error,
            }
        })
        .collect()
}
