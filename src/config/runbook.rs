use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Wait budgets for the disaster-recovery runbooks.
///
/// Every budget is a bounded poll loop. The defaults add up to roughly the
/// worst wall-clock times observed for each stage on real clusters, with
/// headroom; a loop that exhausts its budget fails the step rather than
/// hanging the run.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunbookConfig {
    /// Fleet-config rollout polling, per machine pool
    #[serde(default = "default_rollout_attempts")]
    pub rollout_attempts: usize,

    /// Single rollout condition wait (transitioned out of Updating,
    /// then settled into Updated)
    #[serde(default = "default_rollout_wait_secs")]
    pub rollout_wait_secs: u64,

    /// Pause after a pool reports Updated before trusting it
    #[serde(default = "default_rollout_settle_secs")]
    pub rollout_settle_secs: u64,

    /// API reachability probes after a snapshot restore
    #[serde(default = "default_api_probe_attempts")]
    pub api_probe_attempts: usize,

    #[serde(default = "default_api_probe_delay_secs")]
    pub api_probe_delay_secs: u64,

    /// Replacement-machine address watch
    #[serde(default = "default_machine_wait_attempts")]
    pub machine_wait_attempts: usize,

    #[serde(default = "default_machine_wait_delay_secs")]
    pub machine_wait_delay_secs: u64,

    /// Rebuilt-node join watch
    #[serde(default = "default_node_wait_attempts")]
    pub node_wait_attempts: usize,

    #[serde(default = "default_node_wait_delay_secs")]
    pub node_wait_delay_secs: u64,

    /// Single pod Ready condition wait (member, signer, apiserver)
    #[serde(default = "default_pod_ready_wait_secs")]
    pub pod_ready_wait_secs: u64,

    /// Grace between deleting the victim masters and probing that the
    /// control plane actually went down
    #[serde(default = "default_meltdown_probe_delay_secs")]
    pub meltdown_probe_delay_secs: u64,

    /// Per-request cap on the meltdown probe itself; a hung API counts
    /// as down
    #[serde(default = "default_meltdown_probe_timeout_secs")]
    pub meltdown_probe_timeout_secs: u64,

    /// Quiet period after recovery before declaring the drill done
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,

    /// TTL on upserted member discovery records
    #[serde(default = "default_dns_ttl_secs")]
    pub dns_ttl_secs: u32,
}

impl Default for RunbookConfig {
    fn default() -> Self {
        Self {
            rollout_attempts: default_rollout_attempts(),
            rollout_wait_secs: default_rollout_wait_secs(),
            rollout_settle_secs: default_rollout_settle_secs(),
            api_probe_attempts: default_api_probe_attempts(),
            api_probe_delay_secs: default_api_probe_delay_secs(),
            machine_wait_attempts: default_machine_wait_attempts(),
            machine_wait_delay_secs: default_machine_wait_delay_secs(),
            node_wait_attempts: default_node_wait_attempts(),
            node_wait_delay_secs: default_node_wait_delay_secs(),
            pod_ready_wait_secs: default_pod_ready_wait_secs(),
            meltdown_probe_delay_secs: default_meltdown_probe_delay_secs(),
            meltdown_probe_timeout_secs: default_meltdown_probe_timeout_secs(),
            settle_secs: default_settle_secs(),
            dns_ttl_secs: default_dns_ttl_secs(),
        }
    }
}

impl RunbookConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, attempts) in [
            ("rollout_attempts", self.rollout_attempts),
            ("api_probe_attempts", self.api_probe_attempts),
            ("machine_wait_attempts", self.machine_wait_attempts),
            ("node_wait_attempts", self.node_wait_attempts),
        ] {
            if attempts == 0 {
                return Err(Error::Config(ConfigError::Message(format!(
                    "runbook.{name} cannot be 0"
                ))));
            }
        }

        if self.meltdown_probe_timeout_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "runbook.meltdown_probe_timeout_secs cannot be 0".into(),
            )));
        }

        Ok(())
    }

    pub fn rollout_wait(&self) -> Duration {
        Duration::from_secs(self.rollout_wait_secs)
    }

    pub fn rollout_settle(&self) -> Duration {
        Duration::from_secs(self.rollout_settle_secs)
    }

    pub fn api_probe_delay(&self) -> Duration {
        Duration::from_secs(self.api_probe_delay_secs)
    }

    pub fn machine_wait_delay(&self) -> Duration {
        Duration::from_secs(self.machine_wait_delay_secs)
    }

    pub fn node_wait_delay(&self) -> Duration {
        Duration::from_secs(self.node_wait_delay_secs)
    }

    pub fn pod_ready_wait(&self) -> Duration {
        Duration::from_secs(self.pod_ready_wait_secs)
    }

    pub fn meltdown_probe_delay(&self) -> Duration {
        Duration::from_secs(self.meltdown_probe_delay_secs)
    }

    pub fn meltdown_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.meltdown_probe_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

fn default_rollout_attempts() -> usize {
    10
}

fn default_rollout_wait_secs() -> u64 {
    // 5 minutes per condition, matching the fleet operator's own pace
    300
}

fn default_rollout_settle_secs() -> u64 {
    30
}

fn default_api_probe_attempts() -> usize {
    10
}

fn default_api_probe_delay_secs() -> u64 {
    30
}

fn default_machine_wait_attempts() -> usize {
    60
}

fn default_machine_wait_delay_secs() -> u64 {
    30
}

fn default_node_wait_attempts() -> usize {
    60
}

fn default_node_wait_delay_secs() -> u64 {
    30
}

fn default_pod_ready_wait_secs() -> u64 {
    300
}

fn default_meltdown_probe_delay_secs() -> u64 {
    30
}

fn default_meltdown_probe_timeout_secs() -> u64 {
    5
}

fn default_settle_secs() -> u64 {
    60
}

fn default_dns_ttl_secs() -> u32 {
    60
}
