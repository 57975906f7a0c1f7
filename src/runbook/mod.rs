//! Disaster-recovery runbooks.
//!
//! Each drill is an explicit sequence of named steps over the cluster
//! traits. Steps run in order, every transition is logged, and the first
//! failure aborts the drill. The per-step outcomes land in a JUnit report
//! either way, so a run that died mid-drill still shows where.

mod junit;
mod quorum;
mod rollback;

pub use junit::append_run_log;
pub use junit::render_junit;
pub use junit::write_junit;
pub use quorum::QuorumLossRunbook;
pub use rollback::RollbackRunbook;

#[cfg(test)]
mod rollback_test;

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio::time::Instant;
use tracing::error;
use tracing::info;

use crate::cluster::ClusterCtl;
use crate::cluster::PoolCondition;
use crate::config::RunbookConfig;
use crate::exec::ProcessOutput;
use crate::metrics::RUNBOOK_STEP_SECONDS_METRIC;
use crate::Result;
use crate::RunbookError;

/// Verdict of one executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Passed,
    Failed,
}

/// One executed step, with wall time for the JUnit report.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: &'static str,
    pub status: StepStatus,
    pub detail: Option<String>,
    pub elapsed: Duration,
}

/// Everything a finished or aborted drill reports.
#[derive(Debug, Clone)]
pub struct RunbookReport {
    pub runbook: &'static str,
    pub steps: Vec<StepReport>,
}

impl RunbookReport {
    pub fn passed(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Passed)
    }

    pub fn failures(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count()
    }

    pub fn total_elapsed(&self) -> Duration {
        self.steps.iter().map(|s| s.elapsed).sum()
    }
}

/// Runs steps in order and records their outcomes.
///
/// The error still propagates through [`step`](Self::step) so the drill
/// aborts at the first failed step; the recorder keeps what ran so far.
pub(crate) struct StepRecorder {
    runbook: &'static str,
    steps: Vec<StepReport>,
}

impl StepRecorder {
    pub(crate) fn new(runbook: &'static str) -> Self {
        Self {
            runbook,
            steps: Vec::new(),
        }
    }

    pub(crate) async fn step<T, F>(
        &mut self,
        name: &'static str,
        work: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        info!(runbook = self.runbook, step = name, "step starting");
        let started = Instant::now();
        let outcome = work.await;
        RUNBOOK_STEP_SECONDS_METRIC
            .with_label_values(&[self.runbook, name])
            .observe(started.elapsed().as_secs_f64());
        match outcome {
            Ok(value) => {
                let elapsed = started.elapsed();
                info!(runbook = self.runbook, step = name, ?elapsed, "step passed");
                self.steps.push(StepReport {
                    name,
                    status: StepStatus::Passed,
                    detail: None,
                    elapsed,
                });
                Ok(value)
            }
            Err(e) => {
                let elapsed = started.elapsed();
                error!(runbook = self.runbook, step = name, error = ?e, "step failed");
                self.steps.push(StepReport {
                    name,
                    status: StepStatus::Failed,
                    detail: Some(e.to_string()),
                    elapsed,
                });
                Err(e)
            }
        }
    }

    pub(crate) fn finish(self) -> RunbookReport {
        RunbookReport {
            runbook: self.runbook,
            steps: self.steps,
        }
    }
}

/// Waits out a fleet-config rollout: the pool first reports Updating,
/// then settles back into Updated.
///
/// A pool that is never caught in Updating may simply have finished
/// between polls, so only the settle phase can fail the drill.
pub(crate) async fn wait_for_pool_rollout(
    ctl: &dyn ClusterCtl,
    pool: &str,
    config: &RunbookConfig,
) -> Result<()> {
    for _ in 0..config.rollout_attempts {
        if ctl
            .wait_pool_condition(pool, PoolCondition::Updating, config.rollout_wait())
            .await?
        {
            break;
        }
    }

    for attempt in 1..=config.rollout_attempts {
        if ctl
            .wait_pool_condition(pool, PoolCondition::Updated, config.rollout_wait())
            .await?
        {
            return Ok(());
        }
        if attempt < config.rollout_attempts {
            sleep(config.rollout_settle()).await;
        }
    }

    Err(RunbookError::Exhausted {
        step: "pool-rollout",
        attempts: config.rollout_attempts,
    }
    .into())
}

/// Maps a non-zero remote exit into a runbook error naming the node.
pub(crate) fn remote_ok(
    node: &str,
    output: ProcessOutput,
) -> Result<ProcessOutput> {
    if output.success() {
        return Ok(output);
    }

    Err(RunbookError::RemoteOp {
        node: node.to_string(),
        detail: format!(
            "remote script exited {}: {}",
            output.status,
            output.stderr_utf8()
        ),
    }
    .into())
}
