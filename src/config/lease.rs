use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::ClusterType;
use crate::Error;
use crate::Result;

/// External resource pool the harness draws quota slices from.
///
/// The pool is reached through its CLI; every interaction (acquire,
/// heartbeat, release) shells out to `pool_command` against `server_url`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LeaseConfig {
    /// Pool CLI binary exposing acquire/heartbeat/release subcommands
    #[serde(default = "default_pool_command")]
    pub pool_command: String,

    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Resource family suffix; the platform prefix is added at acquire time
    #[serde(default = "default_resource_suffix")]
    pub resource_suffix: String,

    /// Whole acquire window, polling included (default 150 minutes)
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Pause between acquire attempts while the pool is exhausted
    #[serde(default = "default_acquire_poll_secs")]
    pub acquire_poll_secs: u64,

    /// Ownership refresh period; missing several of these in a row lets
    /// the pool reap the lease server-side
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            pool_command: default_pool_command(),
            server_url: default_server_url(),
            resource_suffix: default_resource_suffix(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            acquire_poll_secs: default_acquire_poll_secs(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl LeaseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pool_command.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "lease pool_command cannot be empty".into(),
            )));
        }

        if self.server_url.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "lease server_url cannot be empty".into(),
            )));
        }

        if self.heartbeat_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "lease heartbeat_secs cannot be 0".into(),
            )));
        }

        // A heartbeat period at or above the acquire window means the
        // first refresh would land after pool-side expiry
        if self.heartbeat_secs >= self.acquire_timeout_secs {
            return Err(Error::Config(ConfigError::Message(format!(
                "heartbeat_secs {} must be below acquire_timeout_secs {}",
                self.heartbeat_secs, self.acquire_timeout_secs
            ))));
        }

        if self.acquire_poll_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "lease acquire_poll_secs cannot be 0".into(),
            )));
        }

        Ok(())
    }

    /// Full pool resource type for a platform, e.g. `aws-quota-slice`
    pub fn resource_type(
        &self,
        cluster_type: ClusterType,
    ) -> String {
        format!("{}-{}", cluster_type.lease_family(), self.resource_suffix)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn acquire_poll_interval(&self) -> Duration {
        Duration::from_secs(self.acquire_poll_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

fn default_pool_command() -> String {
    "boskosctl".into()
}

fn default_server_url() -> String {
    "http://boskos".into()
}

fn default_resource_suffix() -> String {
    "quota-slice".into()
}

fn default_acquire_timeout_secs() -> u64 {
    // 150 minutes, matching the longest observed pool drain
    9000
}

fn default_acquire_poll_secs() -> u64 {
    30
}

fn default_heartbeat_secs() -> u64 {
    15
}
