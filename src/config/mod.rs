//! Configuration management for the cluster test harness.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Environment variable overrides
//! - Configuration file support
//! - Component-wise validation
mod artifacts;
mod cluster;
mod lease;
mod monitoring;
mod retry;
mod runbook;
mod signals;

pub use artifacts::*;
pub use cluster::*;
pub use lease::*;
pub use monitoring::*;
pub use retry::*;
pub use runbook::*;
pub use signals::*;


use std::env;
use std::fmt::Debug;
use std::path::Path;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Main configuration container for every harness phase
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct HarnessConfig {
    /// Identity and shape of the cluster under test
    pub cluster: ClusterProfile,
    /// Resource pool endpoint and lease timing
    pub lease: LeaseConfig,
    /// Sentinel board shared by the phases
    pub signals: SignalBoardConfig,
    /// Retry budgets for flaky external surfaces
    pub retry: RetryPolicies,
    /// Wait budgets for the recovery runbooks
    pub runbook: RunbookConfig,
    /// Evidence collection layout and limits
    pub artifacts: ArtifactConfig,
    /// Prometheus endpoint configuration
    pub monitoring: MonitoringConfig,
}

impl Debug for HarnessConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("HarnessConfig").field("cluster", &self.cluster).finish()
    }
}

impl HarnessConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `GAUNTLET__` prefix (highest priority)
    ///
    /// # Note
    /// This method does NOT validate the configuration. Validation is deferred to allow
    /// further overrides via `with_override_config()`. Callers MUST call `validate()`
    /// before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// // Load with default values only
    /// let cfg = HarnessConfig::new()?.validate()?;
    ///
    /// // Load with config file and environment variables
    /// std::env::set_var("CONFIG_PATH", "config/gauntlet.toml");
    /// std::env::set_var("GAUNTLET__CLUSTER__CLUSTER_NAME", "ci-op-x7k2");
    /// let cfg = HarnessConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("GAUNTLET")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config) // No validation - deferred to validate()
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    ///
    /// # Note
    /// This method does NOT validate the configuration. Callers MUST call `validate()`
    /// after all overrides are applied.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("GAUNTLET")
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config) // No validation - deferred to validate()
    }

    /// Validates configuration and returns validated instance.
    ///
    /// Consumes self and performs validation of all subsystems. Must be called
    /// after all configuration overrides to ensure the final config is valid.
    ///
    /// # Errors
    /// Returns validation errors from any subsystem:
    /// - Missing cluster identity or release payload
    /// - Lease heartbeat at or above the acquire window
    /// - Zero-width retry or wait budgets
    /// - Unusable board or artifact directories
    pub fn validate(self) -> Result<Self> {
        self.cluster.validate()?;
        self.lease.validate()?;
        self.signals.validate()?;
        self.retry.validate()?;
        self.runbook.validate()?;
        self.artifacts.validate()?;
        self.monitoring.validate()?;
        Ok(self)
    }
}

/// Ensures directory path is valid and writable
pub(super) fn validate_directory(
    path: &Path,
    name: &str,
) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::Config(ConfigError::Message(format!(
            "{name} path cannot be empty"
        ))));
    }

    #[cfg(not(test))]
    {
        use std::fs;
        // Check directory existence or create ability
        if !path.exists() {
            fs::create_dir_all(path).map_err(|e| {
                Error::Config(ConfigError::Message(format!(
                    "Failed to create {} directory at {}: {}",
                    name,
                    path.display(),
                    e
                )))
            })?;
        }

        // Check write permissions
        let test_file = path.join(".permission_test");
        fs::write(&test_file, b"test").map_err(|e| {
            Error::Config(ConfigError::Message(format!(
                "No write permission in {} directory {}: {}",
                name,
                path.display(),
                e
            )))
        })?;
        fs::remove_file(&test_file).ok();
    }

    Ok(())
}
