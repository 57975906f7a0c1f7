use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::validate_directory;
use crate::Error;
use crate::Result;

/// Where teardown parks evidence and how hard it hammers the cluster
/// doing so.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ArtifactConfig {
    /// Collection root; sub-directories are created per evidence class
    #[serde(default = "default_artifact_root")]
    pub root: PathBuf,

    /// Upper bound on concurrently running collection jobs. The cluster
    /// under collection may already be degraded; this caps the extra load.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Run the heavyweight diagnostic bundle on top of the object dumps
    #[serde(default = "default_run_must_gather")]
    pub run_must_gather: bool,

    /// Destroy cloud resources once collection finishes. Turning this off
    /// leaves the cluster (and its lease) for interactive debugging.
    #[serde(default = "default_deprovision")]
    pub deprovision: bool,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            root: default_artifact_root(),
            max_concurrency: default_max_concurrency(),
            run_must_gather: default_run_must_gather(),
            deprovision: default_deprovision(),
        }
    }
}

impl ArtifactConfig {
    pub fn validate(&self) -> Result<()> {
        validate_directory(&self.root, "artifact")?;

        if self.max_concurrency == 0 {
            return Err(Error::Config(ConfigError::Message(
                "artifacts.max_concurrency cannot be 0".into(),
            )));
        }

        Ok(())
    }

    /// Installer workspace; auth material lands under `<dir>/auth/`
    pub fn install_dir(&self) -> PathBuf {
        self.root.join(crate::ARTIFACT_DIR_INSTALLER)
    }
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from("/tmp/artifacts")
}

fn default_max_concurrency() -> usize {
    45
}

fn default_run_must_gather() -> bool {
    true
}

fn default_deprovision() -> bool {
    true
}
