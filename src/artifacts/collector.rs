use std::sync::Arc;

use futures::stream;
use futures::StreamExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::artifacts::FetchJob;
use crate::config::ArtifactConfig;
use crate::exec::CommandSpec;
use crate::exec::ProcessRunner;
use crate::metrics::ARTIFACT_JOB_OUTCOMES;
use crate::utils::file_io::write_gzip_file;
use crate::utils::file_io::write_into_file;
use crate::Result;
use crate::SystemError;

/// Per-job outcomes of a collection sweep. Failed jobs are recorded,
/// never fatal; partial evidence beats none when the cluster is already
/// sick.
#[derive(Debug, Default)]
pub struct CollectionReport {
    pub completed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl CollectionReport {
    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs fetch jobs with a cap on in-flight commands and writes their
/// output under the artifact root.
pub struct ArtifactCollector {
    runner: Arc<dyn ProcessRunner>,
    config: ArtifactConfig,
}

impl ArtifactCollector {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        config: ArtifactConfig,
    ) -> Self {
        Self { runner, config }
    }

    /// Runs every job, at most `max_concurrency` in flight, and waits for
    /// all of them to settle.
    pub async fn collect(
        &self,
        jobs: Vec<FetchJob>,
    ) -> CollectionReport {
        info!(
            total = jobs.len(),
            cap = self.config.max_concurrency,
            "collecting artifacts"
        );

        let outcomes = stream::iter(jobs.into_iter().map(|job| self.run_job(job)))
            .buffer_unordered(self.config.max_concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut report = CollectionReport::default();
        for (target, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    ARTIFACT_JOB_OUTCOMES.with_label_values(&["completed"]).inc();
                    report.completed.push(target);
                }
                Err(e) => {
                    ARTIFACT_JOB_OUTCOMES.with_label_values(&["failed"]).inc();
                    report.failed.push((target, e.to_string()));
                }
            }
        }
        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            "artifact collection finished"
        );
        report
    }

    async fn run_job(
        &self,
        job: FetchJob,
    ) -> (String, Result<()>) {
        let outcome = self.fetch(&job).await;
        match &outcome {
            Ok(()) => debug!(target = %job.target, "artifact saved"),
            Err(e) => warn!(target = %job.target, error = %e, "artifact failed"),
        }
        (job.target, outcome)
    }

    async fn fetch(
        &self,
        job: &FetchJob,
    ) -> Result<()> {
        let output = self.runner.run(job.spec.clone()).await?;
        if !output.success() {
            return Err(SystemError::Process {
                program: job.spec.program.clone(),
                detail: format!(
                    "`{}` exited {}: {}",
                    job.spec.display(),
                    output.status,
                    output.stderr_utf8()
                ),
            }
            .into());
        }

        let path = self.config.root.join(&job.target);
        if job.gzip {
            write_gzip_file(path, &output.stdout).await
        } else {
            write_into_file(path, &output.stdout).await
        }
    }

    /// Tears the cloud footprint down once the evidence is on disk.
    pub async fn deprovision(
        &self,
        envs: Vec<(String, String)>,
    ) -> Result<()> {
        let install_dir = self.config.install_dir();
        info!(dir = %install_dir.display(), "destroying cluster");

        let mut spec = CommandSpec::new("openshift-install")
            .arg("--dir")
            .arg(install_dir.display().to_string())
            .arg("destroy")
            .arg("cluster");
        for (key, value) in envs {
            spec = spec.env(key, value);
        }

        let output = self.runner.run(spec).await?;
        if !output.success() {
            return Err(SystemError::Process {
                program: "openshift-install".into(),
                detail: format!(
                    "destroy cluster exited {}: {}",
                    output.status,
                    output.stderr_utf8()
                ),
            }
            .into());
        }
        Ok(())
    }
}
