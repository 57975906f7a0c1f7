use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::info;

use super::ClusterCtl;
use super::NodeShell;
use crate::config::RetryPolicy;
use crate::exec::wait_until;
use crate::exec::CommandSpec;
use crate::exec::ProcessOutput;
use crate::exec::ProcessRunner;
use crate::Error;
use crate::Result;
use crate::SystemError;

/// The bastion deployment published for reaching cluster-internal nodes.
const DEPLOY_SCRIPT: &str =
    "curl --silent https://raw.githubusercontent.com/eparis/ssh-bastion/master/deploy/deploy.sh | /bin/bash";

/// ssh reports its own transport failures with this status; anything else
/// came from the remote command.
const SSH_TRANSPORT_FAILURE: i32 = 255;

const INGRESS_WAIT_ATTEMPTS: usize = 61;
const INGRESS_WAIT_DELAY: Duration = Duration::from_secs(10);

/// [`NodeShell`] that dials cluster nodes through an in-cluster ssh
/// bastion service.
///
/// Nodes keep private addresses only; every connection is proxied through
/// the bastion's public load balancer. The bastion is deployed lazily on
/// the first `ensure_ready` call and its hostname cached for the rest of
/// the run.
pub struct BastionShell {
    runner: Arc<dyn ProcessRunner>,
    ctl: Arc<dyn ClusterCtl>,
    kubeconfig: PathBuf,
    key_path: PathBuf,
    ssh_user: String,
    policy: RetryPolicy,
    host: RwLock<Option<String>>,
}

impl BastionShell {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        ctl: Arc<dyn ClusterCtl>,
        kubeconfig: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        ssh_user: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            runner,
            ctl,
            kubeconfig: kubeconfig.into(),
            key_path: key_path.into(),
            ssh_user: ssh_user.into(),
            policy,
            host: RwLock::new(None),
        }
    }

    fn bastion_host(&self) -> Result<String> {
        self.host
            .read()
            .clone()
            .ok_or_else(|| Error::Fatal("ssh bastion not deployed".to_string()))
    }

    /// Options shared by ssh and scp: no host-key pinning (ephemeral
    /// hosts), generous connect budgets, proxy jump through the bastion.
    fn transport_options(
        &self,
        bastion: &str,
    ) -> Vec<String> {
        let key = self.key_path.display();
        vec![
            "-i".to_string(),
            key.to_string(),
            "-o".to_string(),
            "LogLevel=error".to_string(),
            "-o".to_string(),
            "ConnectionAttempts=100".to_string(),
            "-o".to_string(),
            "ConnectTimeout=30".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!(
                "ProxyCommand=ssh -i {key} -A -o StrictHostKeyChecking=no \
                 -o UserKnownHostsFile=/dev/null -o LogLevel=error \
                 -o ServerAliveInterval=30 -o ConnectionAttempts=100 \
                 -o ConnectTimeout=30 -W %h:%p {user}@{bastion}",
                user = self.ssh_user,
            ),
        ]
    }

    async fn dial(
        &self,
        node: &str,
        script: &str,
    ) -> Result<ProcessOutput> {
        let bastion = self.bastion_host()?;
        let spec = CommandSpec::new("ssh")
            .args(self.transport_options(&bastion))
            .arg(format!("{}@{}", self.ssh_user, node))
            .arg(script);
        self.runner.run(spec).await
    }
}

#[async_trait]
impl NodeShell for BastionShell {
    async fn ensure_ready(&self) -> Result<()> {
        if self.host.read().is_some() {
            return Ok(());
        }

        info!("Deploying ssh bastion");
        let deploy = CommandSpec::shell(DEPLOY_SCRIPT)
            .env("KUBECONFIG", self.kubeconfig.display().to_string());
        let output = self.runner.run(deploy).await?;
        if !output.success() {
            return Err(SystemError::Process {
                program: "ssh-bastion-deploy".to_string(),
                detail: output.stderr_utf8(),
            }
            .into());
        }

        let found: Mutex<Option<String>> = Mutex::new(None);
        let found_ref = &found;
        wait_until(
            "bastion-ingress",
            INGRESS_WAIT_ATTEMPTS,
            INGRESS_WAIT_DELAY,
            || async move {
                let hostname = self
                    .ctl
                    .service_ingress_hostname(
                        crate::SSH_BASTION_NAMESPACE,
                        crate::SSH_BASTION_SERVICE,
                    )
                    .await?;
                match hostname {
                    Some(host) => {
                        *found_ref.lock() = Some(host);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            },
        )
        .await?;

        let host = found.into_inner();
        info!(host = host.as_deref().unwrap_or(""), "ssh bastion ready");
        *self.host.write() = host;
        Ok(())
    }

    async fn run_on(
        &self,
        node: &str,
        script: &str,
    ) -> Result<ProcessOutput> {
        let mut last = self.dial(node, script).await?;
        for attempt in 1..self.policy.max_attempts {
            if last.status != SSH_TRANSPORT_FAILURE {
                return Ok(last);
            }
            debug!(node, attempt, "ssh transport failure, redialing");
            tokio::time::sleep(self.policy.delay()).await;
            last = self.dial(node, script).await?;
        }
        Ok(last)
    }

    async fn upload(
        &self,
        node: &str,
        local: &Path,
        remote: &str,
    ) -> Result<()> {
        let bastion = self.bastion_host()?;
        let spec = CommandSpec::new("scp")
            .args(self.transport_options(&bastion))
            .arg(local.display().to_string())
            .arg(format!("{}@{}:{}", self.ssh_user, node, remote));
        let output = self.runner.run(spec).await?;
        if !output.success() {
            return Err(SystemError::Process {
                program: "scp".to_string(),
                detail: format!(
                    "upload of {} to {node}:{remote} exited {}: {}",
                    local.display(),
                    output.status,
                    output.stderr_utf8()
                ),
            }
            .into());
        }
        Ok(())
    }
}
