use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Basic fixed-delay retry template.
///
/// Cluster recovery deliberately retries on a flat cadence: the interesting
/// failure mode is "control plane not up yet", where backing off only
/// stretches the drill without reducing load.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct RetryPolicy {
    /// Total invocation budget, first attempt included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Pause between consecutive attempts (unit: milliseconds)
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Divide budgets by operational domain
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryPolicies {
    // Control-plane API calls during a drill
    #[serde(default)]
    pub api: RetryPolicy,

    // First API probe after a snapshot restore; the control plane can
    // take several minutes to answer at all
    #[serde(default)]
    pub api_recovery: RetryPolicy,

    // Shell dialing through the bastion while hosts reboot
    #[serde(default)]
    pub ssh: RetryPolicy,

    // Machine-pool deletions (cloud API visible churn)
    #[serde(default)]
    pub machine_delete: RetryPolicy,

    // Machine-pool creations; failures here are tolerated at the call
    // site because the victim manifests race the machine controller
    #[serde(default)]
    pub machine_create: RetryPolicy,
}

// Default value implementation
impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            api: RetryPolicy {
                max_attempts: 10,
                delay_ms: 10_000,
            },
            api_recovery: RetryPolicy {
                max_attempts: 30,
                delay_ms: 10_000,
            },
            ssh: RetryPolicy {
                max_attempts: 60,
                delay_ms: 10_000,
            },
            machine_delete: RetryPolicy {
                max_attempts: 10,
                delay_ms: 10_000,
            },
            machine_create: RetryPolicy {
                max_attempts: 5,
                delay_ms: 10_000,
            },
        }
    }
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        for (name, policy) in [
            ("api", &self.api),
            ("api_recovery", &self.api_recovery),
            ("ssh", &self.ssh),
            ("machine_delete", &self.machine_delete),
            ("machine_create", &self.machine_create),
        ] {
            if policy.max_attempts == 0 {
                return Err(Error::Config(ConfigError::Message(format!(
                    "retry.{name}.max_attempts cannot be 0"
                ))));
            }
        }
        Ok(())
    }
}

fn default_max_attempts() -> usize {
    10
}

fn default_delay_ms() -> u64 {
    10_000
}
