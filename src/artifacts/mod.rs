//! Evidence collection after a run.
//!
//! Teardown turns the cluster inside out into the artifact directory: a
//! bounded pool of fetch jobs, each one command whose stdout lands at a
//! path under the artifact root. One job failing never stops another;
//! whatever evidence is reachable gets saved.

mod collector;
mod jobs;

pub use collector::ArtifactCollector;
pub use collector::CollectionReport;
pub use jobs::bootstrap_gather_specs;
pub use jobs::bootstrap_journal_jobs;
pub use jobs::cluster_state_jobs;
pub use jobs::container_log_jobs;
pub use jobs::journal_jobs;
pub use jobs::metrics_jobs;
pub use jobs::monitoring_jobs;
pub use jobs::must_gather_job;
pub use jobs::network_jobs;
pub use jobs::node_jobs;
pub use jobs::parse_bootstrap_ip;


use crate::exec::CommandSpec;

/// One unit of evidence: a command whose stdout lands at `target`,
/// relative to the artifact root.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub target: String,
    pub spec: CommandSpec,
    /// Compress on write; the stored file gains a `.gz` suffix
    pub gzip: bool,
}

impl FetchJob {
    pub fn new(
        target: impl Into<String>,
        spec: CommandSpec,
    ) -> Self {
        Self {
            target: target.into(),
            spec,
            gzip: false,
        }
    }

    pub fn gzipped(
        target: impl Into<String>,
        spec: CommandSpec,
    ) -> Self {
        Self {
            target: target.into(),
            spec,
            gzip: true,
        }
    }
}
