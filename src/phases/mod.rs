//! The four workers of a run: lease, setup, test, teardown.
//!
//! Phases share nothing but the signal board. Each one waits for the
//! flags its predecessors raise, does its work, and raises its own; the
//! supervisor merely starts all four and reports the worst outcome.
//! Keeping the board durable means the same workers could run as
//! separate processes on a shared volume without changing a line here.

mod lease_phase;
mod setup_phase;
mod teardown_phase;
mod test_phase;

pub use lease_phase::LeasePhase;
pub use setup_phase::SetupPhase;
pub use teardown_phase::TeardownPhase;
pub use test_phase::TestPhase;

#[cfg(test)]
mod setup_phase_test;
#[cfg(test)]
mod teardown_phase_test;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use crate::metrics::PHASE_FAILURES;
use crate::metrics::PHASE_SECONDS_METRIC;
use crate::Result;

/// One worker of the run.
#[async_trait]
pub trait Phase: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Runs the phase to completion. Implementations raise their own
    /// board flags, including `Exit` on failure.
    async fn run(
        &self,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Terminal outcome of one phase.
#[derive(Debug)]
pub struct PhaseReport {
    pub phase: &'static str,
    pub outcome: Result<()>,
}

/// Starts every phase as its own task and waits for all of them.
///
/// Reports come back in the order the phases were handed in, not in
/// completion order. A panicking phase is reported as a failed task, the
/// siblings keep running.
pub async fn supervise(
    phases: Vec<Arc<dyn Phase>>,
    cancel: &CancellationToken,
) -> Vec<PhaseReport> {
    let handles: Vec<_> = phases
        .into_iter()
        .map(|phase| {
            let cancel = cancel.clone();
            let name = phase.name();
            (
                name,
                tokio::spawn(async move {
                    let started = Instant::now();
                    let outcome = phase.run(&cancel).await;
                    PHASE_SECONDS_METRIC
                        .with_label_values(&[name])
                        .observe(started.elapsed().as_secs_f64());
                    if outcome.is_err() {
                        PHASE_FAILURES.with_label_values(&[name]).inc();
                    }
                    outcome
                }),
            )
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(e.into()),
        };
        match &outcome {
            Ok(()) => info!(phase = name, "phase finished"),
            Err(e) => error!(phase = name, error = %e, "phase failed"),
        }
        reports.push(PhaseReport {
            phase: name,
            outcome,
        });
    }
    reports
}

/// Collapses the phase reports into the run verdict.
///
/// The first failure in phase order wins; a peer-exit failure downstream
/// of the real one never masks it.
pub fn run_outcome(reports: Vec<PhaseReport>) -> Result<()> {
    for report in reports {
        report.outcome?;
    }
    Ok(())
}

/// Owner id the pool tags resources with. Unique per run, so a retried
/// job never collides with its predecessor's unexpired lease.
pub fn run_owner(cluster_name: &str) -> String {
    format!("{cluster_name}-{}", nanoid::nanoid!(8))
}
