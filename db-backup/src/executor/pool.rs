//! Bounded-parallelism fan-out of one pipeline stage over every target.
//!
//! `run` is a hard barrier: it returns only once every target has reached a
//! terminal outcome for the stage. Failures (including panics) are isolated
//! to their own target. A single input is processed inline, without spawning,
//! but goes through the same panic guard so outcomes are identical.

use super::target::{BackupTarget, DumpArtifact};
use futures_util::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Anything the pool can key an outcome by.
pub trait StageInput {
    fn target_name(&self) -> &str;
}

impl StageInput for BackupTarget {
    fn target_name(&self) -> &str {
        &self.name
    }
}

impl StageInput for DumpArtifact {
    fn target_name(&self) -> &str {
        &self.target.name
    }
}

/// Why a target did not complete a stage.
#[derive(Debug)]
pub enum StageFailure<E> {
    /// The stage function returned an error.
    Stage(E),
    /// The stage function panicked or its task was torn down.
    Aborted(String),
}

impl<E: fmt::Display> fmt::Display for StageFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageFailure::Stage(e) => write!(f, "{}", e),
            StageFailure::Aborted(msg) => write!(f, "worker aborted: {}", msg),
        }
    }
}

/// Terminal outcome of one target for one stage.
#[derive(Debug)]
pub struct StageOutcome<O, E> {
    pub target: String,
    pub result: Result<O, StageFailure<E>>,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    max_parallelism: usize,
}

impl WorkerPool {
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            max_parallelism: max_parallelism.max(1),
        }
    }

    /// Effective number of concurrent workers for `targets` inputs.
    pub fn degree(&self, targets: usize) -> usize {
        self.max_parallelism.min(targets)
    }

    /// Apply `stage_fn` to every input. Outcomes are returned in input order.
    pub async fn run<I, O, E, F, Fut>(
        &self,
        stage: &'static str,
        inputs: Vec<I>,
        stage_fn: F,
    ) -> Vec<StageOutcome<O, E>>
    where
        I: StageInput + Send + 'static,
        O: Send + 'static,
        E: fmt::Display + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
    {
        let started = Instant::now();
        let total = inputs.len();
        let degree = self.degree(total);

        if total == 0 {
            return Vec::new();
        }

        info!(stage, targets = total, workers = degree, "Starting stage");
        let outcomes = if total == 1 {
            let mut outcomes = Vec::with_capacity(1);
            for input in inputs {
                let target = input.target_name().to_string();
                let result = guarded(stage_fn(input)).await;
                outcomes.push(StageOutcome { target, result });
            }
            outcomes
        } else {
            let stage_fn = Arc::new(stage_fn);
            let semaphore = Arc::new(Semaphore::new(degree));
            let mut handles = Vec::with_capacity(total);

            for input in inputs {
                let target = input.target_name().to_string();
                let sem = Arc::clone(&semaphore);
                let stage_fn = Arc::clone(&stage_fn);

                let handle = tokio::spawn(async move {
                    let _permit = match sem.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => return Err(StageFailure::Aborted(format!("semaphore closed: {}", e))),
                    };
                    guarded(stage_fn(input)).await
                });
                handles.push((target, handle));
            }

            // Barrier: wait for every worker, in input order
            let mut outcomes = Vec::with_capacity(total);
            for (target, handle) in handles {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(StageFailure::Aborted(e.to_string())),
                };
                outcomes.push(StageOutcome { target, result });
            }
            outcomes
        };

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        for outcome in &outcomes {
            if let Err(e) = &outcome.result {
                warn!(stage, target = %outcome.target, "Stage failed: {}", e);
            }
        }
        info!(
            stage,
            succeeded = total - failed,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stage finished"
        );

        outcomes
    }
}

async fn guarded<O, E, Fut>(fut: Fut) -> Result<O, StageFailure<E>>
where
    Fut: Future<Output = Result<O, E>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(out)) => Ok(out),
        Ok(Err(e)) => Err(StageFailure::Stage(e)),
        Err(panic) => Err(StageFailure::Aborted(panic_message(panic.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
