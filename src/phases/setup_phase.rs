use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use super::Phase;
use crate::cluster::provider;
use crate::config::HarnessConfig;
use crate::exec::CommandSpec;
use crate::exec::ProcessOutput;
use crate::exec::ProcessRunner;
use crate::signals::wait_for_or_exit;
use crate::signals::Observation;
use crate::signals::Signal;
use crate::signals::SignalBoard;
use crate::utils::file_io::write_into_file;
use crate::CoordinationError;
use crate::Result;
use crate::SystemError;

/// Installs the cluster once the lease is held.
///
/// Waits for `Leased`, renders the install config for the profile's
/// platform, runs the installer, and raises `SetupSuccess`. Any failure
/// raises `Exit` instead, so no peer keeps waiting on a cluster that
/// will never come.
pub struct SetupPhase {
    board: Arc<dyn SignalBoard>,
    runner: Arc<dyn ProcessRunner>,
    config: HarnessConfig,
}

impl SetupPhase {
    pub fn new(
        board: Arc<dyn SignalBoard>,
        runner: Arc<dyn ProcessRunner>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            board,
            runner,
            config,
        }
    }

    async fn drive(
        &self,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let observed = wait_for_or_exit(
            self.board.as_ref(),
            Signal::Leased,
            self.config.signals.poll_interval(),
            cancel,
        )
        .await?;
        if observed == Observation::PeerExited {
            return Err(CoordinationError::PeerExited { observer: "setup" }.into());
        }
        info!("lease acquired, installing");

        let install_dir = self.config.artifacts.install_dir();
        let rendered = provider::render_install_config(&self.config.cluster).await?;
        write_into_file(install_dir.join("install-config.yaml"), rendered.as_bytes()).await?;

        self.stage_bootstrap_key().await;

        if let Some(manifest) = &self.config.cluster.network_manifest_path {
            self.inject_network_manifest(manifest, &install_dir).await?;
        }

        info!(release = %self.config.cluster.install_release(), "creating cluster");
        self.run_installer(&["create", "cluster"]).await?;

        self.board.raise(Signal::SetupSuccess).await
    }

    /// Copies the node private key into `~/.ssh` so the installer can
    /// reach the bootstrap host for logs if the install dies early.
    /// Best-effort.
    async fn stage_bootstrap_key(&self) {
        let Some(home) = std::env::var_os("HOME") else {
            warn!("HOME not set, skipping bootstrap key staging");
            return;
        };
        let key = self.config.cluster.ssh_private_key_path();
        let Some(name) = key.file_name() else {
            return;
        };
        let ssh_dir = PathBuf::from(home).join(".ssh");
        if let Err(e) = tokio::fs::create_dir_all(&ssh_dir).await {
            warn!(error = %e, "could not prepare ~/.ssh");
            return;
        }
        if let Err(e) = tokio::fs::copy(&key, ssh_dir.join(name)).await {
            warn!(error = %e, "could not stage the bootstrap key");
        }
    }

    /// Generates manifests, then drops the profile's network-operator
    /// manifest in before the real install consumes them.
    async fn inject_network_manifest(
        &self,
        manifest: &Path,
        install_dir: &Path,
    ) -> Result<()> {
        info!(manifest = %manifest.display(), "injecting network manifest");
        self.run_installer(&["create", "manifests"]).await?;

        let content = tokio::fs::read(manifest)
            .await
            .map_err(|source| SystemError::PathError {
                path: manifest.to_path_buf(),
                source,
            })?;
        write_into_file(
            install_dir.join("manifests/cluster-network-03-config.yml"),
            &content,
        )
        .await
    }

    async fn run_installer(
        &self,
        action: &[&str],
    ) -> Result<ProcessOutput> {
        let mut spec = CommandSpec::new("openshift-install")
            .arg("--dir")
            .arg(self.config.artifacts.install_dir().display().to_string())
            .args(action.iter().copied());
        for (key, value) in self.installer_env() {
            spec = spec.env(key, value);
        }

        let output = self.runner.run(spec).await?;
        if !output.success() {
            return Err(SystemError::Process {
                program: "openshift-install".into(),
                detail: format!(
                    "{} exited {}: {}",
                    action.join(" "),
                    output.status,
                    output.stderr_utf8()
                ),
            }
            .into());
        }
        Ok(output)
    }

    fn installer_env(&self) -> Vec<(String, String)> {
        let profile = &self.config.cluster;
        vec![
            ("TF_LOG".into(), "debug".into()),
            (
                "OPENSHIFT_INSTALL_RELEASE_IMAGE_OVERRIDE".into(),
                profile.install_release().to_string(),
            ),
            (
                provider::credentials_env_var(profile.cluster_type).into(),
                profile.platform_credentials_path().display().to_string(),
            ),
        ]
    }
}

#[async_trait]
impl Phase for SetupPhase {
    fn name(&self) -> &'static str {
        "setup"
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let outcome = self.drive(cancel).await;
        if outcome.is_err() {
            if let Err(e) = self.board.raise(Signal::Exit).await {
                warn!(error = %e, "could not raise the exit flag");
            }
        }
        outcome
    }
}
