use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use super::Phase;
use crate::artifacts::bootstrap_gather_specs;
use crate::artifacts::bootstrap_journal_jobs;
use crate::artifacts::cluster_state_jobs;
use crate::artifacts::container_log_jobs;
use crate::artifacts::journal_jobs;
use crate::artifacts::metrics_jobs;
use crate::artifacts::monitoring_jobs;
use crate::artifacts::must_gather_job;
use crate::artifacts::network_jobs;
use crate::artifacts::node_jobs;
use crate::artifacts::parse_bootstrap_ip;
use crate::artifacts::ArtifactCollector;
use crate::artifacts::FetchJob;
use crate::cluster::provider;
use crate::cluster::ClusterCtl;
use crate::config::HarnessConfig;
use crate::exec::ProcessRunner;
use crate::signals::wait_for_bounded;
use crate::signals::Signal;
use crate::signals::SignalBoard;
use crate::Result;

/// Collects the evidence and destroys the cloud footprint.
///
/// Runs no matter how the rest of the run went. Waits out the exit flag
/// on a long bounded budget, raises it itself so the remaining peers
/// unwind, then sweeps the cluster into the artifact tree before the
/// deprovision. Collection failures are recorded, never fatal; a failed
/// deprovision is, because it leaks paid resources.
pub struct TeardownPhase {
    board: Arc<dyn SignalBoard>,
    runner: Arc<dyn ProcessRunner>,
    ctl: Arc<dyn ClusterCtl>,
    collector: ArtifactCollector,
    config: HarnessConfig,
}

impl TeardownPhase {
    /// The runner also feeds the collector, so hand in one bound to a
    /// cancel token that outlives the run's: teardown keeps gathering
    /// after the first shutdown signal.
    pub fn new(
        board: Arc<dyn SignalBoard>,
        runner: Arc<dyn ProcessRunner>,
        ctl: Arc<dyn ClusterCtl>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            board,
            collector: ArtifactCollector::new(runner.clone(), config.artifacts.clone()),
            runner,
            ctl,
            config,
        }
    }

    async fn drive(
        &self,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.await_run_end(cancel).await;
        if let Err(e) = self.board.raise(Signal::Exit).await {
            warn!(error = %e, "could not raise the exit flag");
        }

        let mut jobs = self.bootstrap_jobs().await;
        jobs.extend(self.gather_jobs().await);
        let report = self.collector.collect(jobs).await;
        if !report.all_ok() {
            warn!(
                failed = report.failed.len(),
                total = report.total(),
                "some evidence is missing"
            );
        }

        if self.config.artifacts.deprovision {
            self.collector.deprovision(self.deprovision_env()).await?;
        } else {
            info!("deprovision disabled, leaving the cluster up for inspection");
        }
        Ok(())
    }

    /// Waits for a peer to end the run. The budget running out does not
    /// stop teardown; evidence from a wedged test phase is the evidence
    /// that matters most.
    async fn await_run_end(
        &self,
        cancel: &CancellationToken,
    ) {
        let waited = wait_for_bounded(
            self.board.as_ref(),
            Signal::Exit,
            self.config.signals.exit_wait_attempts,
            self.config.signals.exit_wait_interval(),
            cancel,
        )
        .await;
        match waited {
            Ok(true) => info!("run is over, gathering evidence"),
            Ok(false) => warn!("exit flag never came, gathering from a run still in flight"),
            Err(e) => warn!(error = %e, "exit wait ended early, gathering anyway"),
        }
    }

    /// Bootstrap-host collection, gated on the installer's terraform
    /// state still listing the host. The gather script and the bundle
    /// copy run here sequentially; only the journal fetches go through
    /// the pool.
    async fn bootstrap_jobs(&self) -> Vec<FetchJob> {
        let install_dir = self.config.artifacts.install_dir();
        let Ok(raw) = tokio::fs::read(install_dir.join("terraform.tfstate")).await else {
            info!("no terraform state, skipping bootstrap collection");
            return Vec::new();
        };
        let state: Value = match serde_json::from_slice(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "terraform state is unreadable, skipping bootstrap collection");
                return Vec::new();
            }
        };
        let Some(ip) = parse_bootstrap_ip(&state) else {
            info!("bootstrap host already torn down");
            return Vec::new();
        };

        info!(%ip, "gathering from the bootstrap host");
        let (gather, fetch_bundle) = bootstrap_gather_specs(&ip, &install_dir);
        for spec in [gather, fetch_bundle] {
            let line = spec.display();
            match self.runner.run(spec).await {
                Ok(output) if output.success() => {}
                Ok(output) => {
                    warn!(command = %line, status = output.status, "bootstrap gather failed");
                    break;
                }
                Err(e) => {
                    warn!(command = %line, error = %e, "bootstrap gather failed");
                    break;
                }
            }
        }

        bootstrap_journal_jobs(&ip, &install_dir)
    }

    /// The standard evidence sweep. Job groups that need a live control
    /// plane to enumerate their targets are skipped with a log line when
    /// the query fails; everything else is queued regardless and fails
    /// per job.
    async fn gather_jobs(&self) -> Vec<FetchJob> {
        let kubeconfig = self.config.artifacts.root.join(crate::INSTALLER_KUBECONFIG);
        let mut jobs = cluster_state_jobs(&kubeconfig);
        jobs.extend(journal_jobs(&kubeconfig));
        jobs.extend(monitoring_jobs(&kubeconfig));

        match self.ctl.node_names().await {
            Ok(nodes) => jobs.extend(node_jobs(&kubeconfig, &nodes)),
            Err(e) => warn!(error = %e, "node line-up unavailable, skipping heap profiles"),
        }

        match self
            .ctl
            .pods_by_selector(crate::SDN_NAMESPACE, crate::SDN_POD_SELECTOR)
            .await
        {
            Ok(pods) => jobs.extend(network_jobs(&kubeconfig, &pods)),
            Err(e) => warn!(error = %e, "SDN pods unavailable, skipping iptables snapshots"),
        }

        let mut api_pods = Vec::new();
        for namespace in [
            crate::KUBE_APISERVER_NAMESPACE,
            crate::OPENSHIFT_APISERVER_NAMESPACE,
        ] {
            match self
                .ctl
                .pods_by_selector(namespace, crate::API_COMPONENT_SELECTOR)
                .await
            {
                Ok(pods) => {
                    api_pods.extend(pods.into_iter().map(|pod| (namespace.to_string(), pod)))
                }
                Err(e) => warn!(error = %e, namespace, "apiserver pods unavailable"),
            }
        }
        jobs.extend(metrics_jobs(&kubeconfig, &api_pods));

        match self.ctl.all_pod_containers().await {
            Ok(containers) => jobs.extend(container_log_jobs(&kubeconfig, &containers)),
            Err(e) => warn!(error = %e, "container line-up unavailable, skipping pod logs"),
        }

        if self.config.artifacts.run_must_gather {
            jobs.push(must_gather_job(&kubeconfig, &self.config.artifacts.root));
        }
        jobs
    }

    fn deprovision_env(&self) -> Vec<(String, String)> {
        let profile = &self.config.cluster;
        vec![(
            provider::credentials_env_var(profile.cluster_type).into(),
            profile.platform_credentials_path().display().to_string(),
        )]
    }
}

#[async_trait]
impl Phase for TeardownPhase {
    fn name(&self) -> &'static str {
        "teardown"
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.drive(cancel).await
    }
}
