use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Metrics endpoint of the harness process itself.
///
/// A run lasts hours; with the endpoint enabled the CI Prometheus can
/// scrape phase durations and lease-heartbeat health while the run is
/// still going instead of waiting for the final report.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitoringConfig {
    #[serde(default = "default_prometheus_enabled")]
    pub prometheus_enabled: bool,

    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_enabled: default_prometheus_enabled(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

impl MonitoringConfig {
    /// # Errors
    /// Returns `Error::Config` when the endpoint is enabled on a port
    /// that is zero, privileged, or already bound.
    pub fn validate(&self) -> Result<()> {
        if !self.prometheus_enabled {
            #[cfg(debug_assertions)]
            if self.prometheus_port != default_prometheus_port() {
                tracing::warn!(
                    port = self.prometheus_port,
                    "prometheus_port configured but monitoring is disabled"
                );
            }
            return Ok(());
        }

        if self.prometheus_port == 0 {
            return Err(Error::Config(ConfigError::Message(
                "prometheus_port cannot be 0 when enabled".into(),
            )));
        }

        // The harness runs as an unprivileged pod
        if self.prometheus_port < 1024 {
            return Err(Error::Config(ConfigError::Message(format!(
                "prometheus_port {} is a privileged port",
                self.prometheus_port
            ))));
        }

        #[cfg(not(test))]
        {
            use std::net::TcpListener;
            if let Err(e) = TcpListener::bind(("0.0.0.0", self.prometheus_port)) {
                return Err(Error::Config(ConfigError::Message(format!(
                    "prometheus_port {} unavailable: {}",
                    self.prometheus_port, e
                ))));
            }
        }

        Ok(())
    }
}

fn default_prometheus_enabled() -> bool {
    false
}

fn default_prometheus_port() -> u16 {
    9090
}
