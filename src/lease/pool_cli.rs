use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use tracing::warn;

use super::Lease;
use super::LeasePool;
use crate::config::LeaseConfig;
use crate::exec::CommandSpec;
use crate::exec::ProcessRunner;
use crate::LeaseError;
use crate::Result;

/// Resource record the pool CLI prints on a successful claim.
#[derive(Debug, Deserialize)]
struct PoolResource {
    name: String,
    #[serde(rename = "type")]
    resource_type: String,
}

/// Pool access through its CLI.
///
/// Every operation shells out with the server URL and owner as global
/// flags, the way the CLI expects them before the subcommand.
pub struct CliLeasePool {
    runner: Arc<dyn ProcessRunner>,
    config: LeaseConfig,
}

impl CliLeasePool {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        config: LeaseConfig,
    ) -> Self {
        Self { runner, config }
    }

    fn base_command(
        &self,
        owner: &str,
    ) -> CommandSpec {
        CommandSpec::new(&self.config.pool_command)
            .arg("--server-url")
            .arg(&self.config.server_url)
            .arg("--owner-name")
            .arg(owner)
    }
}

#[async_trait]
impl LeasePool for CliLeasePool {
    async fn try_acquire(
        &self,
        resource_type: &str,
        owner: &str,
    ) -> Result<Option<Lease>> {
        let spec = self
            .base_command(owner)
            .arg("acquire")
            .arg("--type")
            .arg(resource_type)
            .arg("--state")
            .arg("free")
            .arg("--target-state")
            .arg("leased");

        let output = self.runner.run(spec).await?;
        if !output.success() {
            // The CLI reports "nothing free" and "pool unreachable" the
            // same way; both mean try again within the acquire window
            debug!("claim attempt on `{resource_type}` came back empty: {}", output.stderr_utf8());
            return Ok(None);
        }

        let raw = output.stdout_utf8();
        let resource: PoolResource = serde_json::from_str(&raw)
            .map_err(|e| LeaseError::MalformedResource(format!("{e}: {raw}")))?;

        Ok(Some(Lease {
            resource_name: resource.name,
            resource_type: resource.resource_type,
            owner: owner.to_string(),
            raw,
        }))
    }

    async fn heartbeat(
        &self,
        lease: &Lease,
    ) -> Result<()> {
        let spec = self
            .base_command(&lease.owner)
            .arg("heartbeat")
            .arg("--resource")
            .arg(&lease.raw);

        let output = self.runner.run(spec).await?;
        if !output.success() {
            return Err(LeaseError::PoolUnavailable(format!(
                "heartbeat for `{}` exited {}: {}",
                lease.resource_name,
                output.status,
                output.stderr_utf8()
            ))
            .into());
        }
        Ok(())
    }

    async fn release(
        &self,
        lease: &Lease,
    ) -> Result<()> {
        let spec = self
            .base_command(&lease.owner)
            .arg("release")
            .arg("--name")
            .arg(&lease.resource_name)
            .arg("--target-state")
            .arg("free");

        let output = self.runner.run(spec).await?;
        if !output.success() {
            warn!("release of `{}` exited {}", lease.resource_name, output.status);
            return Err(LeaseError::ReleaseFailed(lease.resource_name.clone()).into());
        }
        Ok(())
    }
}
