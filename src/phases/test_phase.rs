use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use super::Phase;
use crate::cluster::provider;
use crate::cluster::ClusterCtl;
use crate::cluster::DnsApi;
use crate::cluster::NodeShell;
use crate::config::ClusterType;
use crate::config::HarnessConfig;
use crate::config::TestMode;
use crate::exec::CommandSpec;
use crate::exec::ProcessRunner;
use crate::runbook::append_run_log;
use crate::runbook::wait_for_pool_rollout;
use crate::runbook::write_junit;
use crate::runbook::QuorumLossRunbook;
use crate::runbook::RollbackRunbook;
use crate::runbook::RunbookReport;
use crate::signals::wait_for_or_exit;
use crate::signals::Observation;
use crate::signals::Signal;
use crate::signals::SignalBoard;
use crate::CoordinationError;
use crate::Error;
use crate::Result;
use crate::SystemError;

/// Exercises the installed cluster.
///
/// Waits for `SetupSuccess`, then drives whatever the profile asks for:
/// the opaque suite command, the suite with an upgrade target exported,
/// or one of the recovery drills. The run is over when this phase ends,
/// so `Exit` goes up on every path out, success included.
pub struct TestPhase {
    board: Arc<dyn SignalBoard>,
    runner: Arc<dyn ProcessRunner>,
    ctl: Arc<dyn ClusterCtl>,
    shell: Arc<dyn NodeShell>,
    dns: Arc<dyn DnsApi>,
    config: HarnessConfig,
}

impl TestPhase {
    pub fn new(
        board: Arc<dyn SignalBoard>,
        runner: Arc<dyn ProcessRunner>,
        ctl: Arc<dyn ClusterCtl>,
        shell: Arc<dyn NodeShell>,
        dns: Arc<dyn DnsApi>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            board,
            runner,
            ctl,
            shell,
            dns,
            config,
        }
    }

    async fn drive(
        &self,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let observed = wait_for_or_exit(
            self.board.as_ref(),
            Signal::SetupSuccess,
            self.config.signals.poll_interval(),
            cancel,
        )
        .await?;
        if observed == Observation::PeerExited {
            return Err(CoordinationError::PeerExited { observer: "test" }.into());
        }
        info!("cluster is up, preparing the test environment");

        let kubeconfig = self.stage_suite_kubeconfig().await?;
        self.apply_insights_manifest().await;

        if self.config.cluster.enable_fips {
            self.enable_fips().await?;
        }

        match self.config.cluster.test_mode {
            TestMode::Standard => self.run_suite(&kubeconfig, Vec::new()).await,
            TestMode::Upgrade => {
                let target = self.config.cluster.release_image.clone();
                info!(release = %target, "suite will drive the upgrade to the target payload");
                self.run_suite(&kubeconfig, vec![("RELEASE_IMAGE_LATEST".into(), target)])
                    .await
            }
            TestMode::Rollback => {
                let runbook = RollbackRunbook::new(
                    self.ctl.clone(),
                    self.shell.clone(),
                    self.config.runbook.clone(),
                    self.config.cluster.ssh_private_key_path(),
                );
                let (report, outcome) = runbook.run().await;
                self.record_drill(&report).await;
                outcome
            }
            TestMode::QuorumLoss => {
                let runbook = QuorumLossRunbook::new(
                    self.ctl.clone(),
                    self.shell.clone(),
                    self.dns.clone(),
                    self.config.runbook.clone(),
                    self.config.retry.clone(),
                );
                let (report, outcome) = runbook.run().await;
                self.record_drill(&report).await;
                outcome
            }
        }
    }

    /// Copies the installer's kubeconfig aside so suite clients cannot
    /// clobber the shared one.
    async fn stage_suite_kubeconfig(&self) -> Result<PathBuf> {
        let shared = self.config.artifacts.root.join(crate::INSTALLER_KUBECONFIG);
        let private = self.config.artifacts.install_dir().join("auth/admin.kubeconfig");
        tokio::fs::copy(&shared, &private)
            .await
            .map_err(|source| SystemError::PathError {
                path: shared.clone(),
                source,
            })?;
        Ok(private)
    }

    /// Installs the profile's insights secret so the cluster reports
    /// support data. A missing file means the profile carries none;
    /// failures are tolerated either way.
    async fn apply_insights_manifest(&self) {
        let path = self.config.cluster.insights_manifest_path();
        let Ok(manifest) = tokio::fs::read_to_string(&path).await else {
            return;
        };
        info!(path = %path.display(), "applying the insights manifest");
        if let Err(e) = self.ctl.apply_manifest(None, &manifest).await {
            warn!(error = %e, "insights manifest was not applied");
        }
    }

    /// Turns FIPS on fleet-wide: one machine config per pool, then a
    /// rollout wait per pool.
    async fn enable_fips(&self) -> Result<()> {
        let pools = self.ctl.machine_config_pools().await?;
        info!(?pools, "enabling FIPS across the fleet");
        for pool in &pools {
            self.ctl
                .apply_manifest(None, &provider::fips_machine_config(pool))
                .await?;
        }
        for pool in &pools {
            wait_for_pool_rollout(self.ctl.as_ref(), pool, &self.config.runbook).await?;
        }
        Ok(())
    }

    /// Runs the opaque suite command with the provider environment the
    /// suite binaries expect.
    async fn run_suite(
        &self,
        kubeconfig: &Path,
        extra_env: Vec<(String, String)>,
    ) -> Result<()> {
        let profile = &self.config.cluster;
        let Some(command) = profile.suite_command.as_deref() else {
            return Err(Error::Fatal("no suite command configured".into()));
        };

        self.stage_suite_key().await;

        let mut spec = CommandSpec::shell(command)
            .env("KUBECONFIG", kubeconfig.display().to_string())
            .env("ARTIFACT_DIR", self.config.artifacts.root.display().to_string())
            .env(
                "TEST_PROVIDER",
                provider::test_provider_descriptor(profile.cluster_type),
            )
            .env(
                "KUBE_SSH_KEY_PATH",
                profile.ssh_private_key_path().display().to_string(),
            )
            .env(
                provider::credentials_env_var(profile.cluster_type),
                profile.platform_credentials_path().display().to_string(),
            );
        if profile.cluster_type == ClusterType::Gcp {
            spec = spec.env(
                "GOOGLE_APPLICATION_CREDENTIALS",
                profile.platform_credentials_path().display().to_string(),
            );
        }
        if let Some(args) = provider::provider_args(profile.cluster_type) {
            spec = spec.env("PROVIDER_ARGS", args);
        }
        if let Some(user) = provider::ssh_user(profile.cluster_type) {
            spec = spec.env("KUBE_SSH_USER", user);
        }
        match self.ctl.master_external_ip().await {
            Ok(ip) => spec = spec.env("KUBE_SSH_BASTION", format!("{ip}:22")),
            Err(e) => {
                warn!(error = %e, "no external master address, suite ssh helpers are on their own")
            }
        }
        for (key, value) in extra_env {
            spec = spec.env(key, value);
        }

        info!(command, "running the suite");
        let output = self.runner.run(spec).await?;
        if !output.success() {
            return Err(SystemError::Process {
                program: "suite".into(),
                detail: format!("suite exited {}: {}", output.status, output.stderr_utf8()),
            }
            .into());
        }
        info!("suite passed");
        Ok(())
    }

    /// Stages the node key under the name the suite's ssh helpers look
    /// for. Best-effort, like the bootstrap key staging in setup.
    async fn stage_suite_key(&self) {
        let Some(name) = provider::suite_ssh_key_name(self.config.cluster.cluster_type) else {
            return;
        };
        let Some(home) = std::env::var_os("HOME") else {
            warn!("HOME not set, skipping suite key staging");
            return;
        };
        let ssh_dir = PathBuf::from(home).join(".ssh");
        if let Err(e) = tokio::fs::create_dir_all(&ssh_dir).await {
            warn!(error = %e, "could not prepare ~/.ssh");
            return;
        }
        let key = self.config.cluster.ssh_private_key_path();
        if let Err(e) = tokio::fs::copy(&key, ssh_dir.join(name)).await {
            warn!(error = %e, "could not stage the suite ssh key");
        }
    }

    /// Parks the drill report where the CI tooling looks for it. Report
    /// writing never changes the drill verdict.
    async fn record_drill(
        &self,
        report: &RunbookReport,
    ) {
        let junit_dir = self.config.artifacts.root.join("junit");
        match write_junit(report, &junit_dir).await {
            Ok(path) => info!(path = %path.display(), "drill report written"),
            Err(e) => warn!(error = %e, "could not write the junit report"),
        }
        let log_path = self.config.artifacts.root.join("e2e.log");
        if let Err(e) = append_run_log(report, &log_path).await {
            warn!(error = %e, "could not append the run log");
        }
    }
}

#[async_trait]
impl Phase for TestPhase {
    fn name(&self) -> &'static str {
        "test"
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let outcome = self.drive(cancel).await;
        // Testing ending is what ends the run, so the flag goes up on
        // success too
        if let Err(e) = self.board.raise(Signal::Exit).await {
            warn!(error = %e, "could not raise the exit flag");
        }
        outcome
    }
}
