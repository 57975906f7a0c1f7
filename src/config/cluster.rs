use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Cloud platform the ephemeral cluster is provisioned on.
///
/// The platform decides which credential file is read from the profile
/// bundle, which lease resource family is drawn from the pool and how the
/// install config is rendered.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    Aws,
    Azure4,
    Gcp,
}

impl ClusterType {
    /// Lease resource family drawn from the pool, e.g. `aws-quota-slice`.
    pub fn lease_family(&self) -> &'static str {
        match self {
            ClusterType::Aws => "aws",
            ClusterType::Azure4 => "azure4",
            ClusterType::Gcp => "gcp",
        }
    }
}

/// Exercise the test phase drives once the cluster is reachable.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TestMode {
    /// Run the configured suite command and nothing else
    Standard,
    /// Install the initial payload, then run the suite with the target
    /// payload exported for an in-suite upgrade
    Upgrade,
    /// Fleet-config rollback drill: snapshot, mutate, restore, verify
    Rollback,
    /// Control-plane meltdown drill: destroy two masters, rebuild from
    /// the survivor's on-disk snapshot
    QuorumLoss,
}

/// Proxy stanza rendered into the install config when the profile
/// provides one.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ProxyProfile {
    #[serde(default)]
    pub http_proxy: String,

    #[serde(default)]
    pub https_proxy: String,

    #[serde(default)]
    pub no_proxy: Option<String>,

    /// PEM bundle appended as additionalTrustBundle
    #[serde(default)]
    pub trust_bundle_path: Option<PathBuf>,
}

/// Identity and shape of the cluster under test.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterProfile {
    #[serde(default = "default_cluster_type")]
    pub cluster_type: ClusterType,

    /// Installer cluster name; also the prefix of the lease owner id
    #[serde(default)]
    pub cluster_name: String,

    /// DNS zone the cluster is rooted under; empty picks the platform default
    #[serde(default)]
    pub base_domain: String,

    /// Mounted credential bundle: pull secret, ssh keypair, platform
    /// credentials, optional insights manifest
    #[serde(default = "default_profile_dir")]
    pub profile_dir: PathBuf,

    /// Release payload the cluster ends up on
    #[serde(default)]
    pub release_image: String,

    /// Payload installed first when `test_mode = upgrade`
    #[serde(default)]
    pub release_image_initial: Option<String>,

    #[serde(default = "default_test_mode")]
    pub test_mode: TestMode,

    /// Opaque command handed to a shell by the test phase
    #[serde(default)]
    pub suite_command: Option<String>,

    #[serde(default)]
    pub enable_fips: bool,

    /// Overrides networking.networkType in the rendered install config
    #[serde(default)]
    pub network_type: Option<String>,

    /// Raw network-operator manifest injected between manifest
    /// generation and the install run
    #[serde(default)]
    pub network_manifest_path: Option<PathBuf>,

    #[serde(default)]
    pub proxy: Option<ProxyProfile>,

    /// Hours until the platform reaper may reclaim the cluster,
    /// stamped as a user tag where the platform supports one
    #[serde(default = "default_expiration_hours")]
    pub expiration_hours: u64,

    /// Control-plane replica count; the recovery drills assume this many
    #[serde(default = "default_master_replicas")]
    pub master_replicas: usize,

    #[serde(default = "default_worker_replicas")]
    pub worker_replicas: usize,
}

impl Default for ClusterProfile {
    fn default() -> Self {
        Self {
            cluster_type: default_cluster_type(),
            cluster_name: String::new(),
            base_domain: String::new(),
            profile_dir: default_profile_dir(),
            release_image: String::new(),
            release_image_initial: None,
            test_mode: default_test_mode(),
            suite_command: None,
            enable_fips: false,
            network_type: None,
            network_manifest_path: None,
            proxy: None,
            expiration_hours: default_expiration_hours(),
            master_replicas: default_master_replicas(),
            worker_replicas: default_worker_replicas(),
        }
    }
}

impl ClusterProfile {
    /// Validates cluster identity and drill preconditions
    /// # Errors
    /// Returns `Error::Config` when:
    /// - the cluster name is empty or not a DNS label
    /// - no release payload is configured
    /// - an upgrade run lacks an initial payload
    /// - a suite run lacks a suite command
    /// - a recovery drill is requested on a sub-quorum control plane
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "cluster_name cannot be empty".into(),
            )));
        }

        // Installer requirement: name becomes a DNS label
        let valid_label = self
            .cluster_name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !self.cluster_name.starts_with('-')
            && !self.cluster_name.ends_with('-');
        if !valid_label {
            return Err(Error::Config(ConfigError::Message(format!(
                "cluster_name `{}` must be a lowercase DNS label",
                self.cluster_name
            ))));
        }

        if self.release_image.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "release_image cannot be empty".into(),
            )));
        }

        if self.test_mode == TestMode::Upgrade && self.release_image_initial.is_none() {
            return Err(Error::Config(ConfigError::Message(
                "test_mode=upgrade requires release_image_initial".into(),
            )));
        }

        if matches!(self.test_mode, TestMode::Standard | TestMode::Upgrade)
            && self.suite_command.is_none()
        {
            return Err(Error::Config(ConfigError::Message(format!(
                "test_mode={:?} requires suite_command",
                self.test_mode
            ))));
        }

        if matches!(self.test_mode, TestMode::Rollback | TestMode::QuorumLoss)
            && self.master_replicas < 3
        {
            return Err(Error::Config(ConfigError::Message(format!(
                "recovery drills need at least 3 masters, got {}",
                self.master_replicas
            ))));
        }

        if self.expiration_hours == 0 {
            return Err(Error::Config(ConfigError::Message(
                "expiration_hours cannot be 0".into(),
            )));
        }

        Ok(())
    }

    /// Payload handed to the installer. Upgrade runs install the initial
    /// payload and reach `release_image` from inside the suite.
    pub fn install_release(&self) -> &str {
        match (self.test_mode, &self.release_image_initial) {
            (TestMode::Upgrade, Some(initial)) => initial,
            _ => &self.release_image,
        }
    }

    pub fn pull_secret_path(&self) -> PathBuf {
        self.profile_dir.join("pull-secret")
    }

    pub fn ssh_public_key_path(&self) -> PathBuf {
        self.profile_dir.join("ssh-publickey")
    }

    pub fn ssh_private_key_path(&self) -> PathBuf {
        self.profile_dir.join("ssh-privatekey")
    }

    /// Platform credential file inside the profile bundle
    pub fn platform_credentials_path(&self) -> PathBuf {
        match self.cluster_type {
            ClusterType::Aws => self.profile_dir.join(".awscred"),
            ClusterType::Azure4 => self.profile_dir.join("osServicePrincipal.json"),
            ClusterType::Gcp => self.profile_dir.join("gce.json"),
        }
    }

    /// Optional insights operator manifest shipped with some profiles
    pub fn insights_manifest_path(&self) -> PathBuf {
        self.profile_dir.join("insights-live.yaml")
    }
}

fn default_cluster_type() -> ClusterType {
    ClusterType::Aws
}

fn default_test_mode() -> TestMode {
    TestMode::Standard
}

fn default_profile_dir() -> PathBuf {
    PathBuf::from("/tmp/cluster")
}

fn default_expiration_hours() -> u64 {
    4
}

fn default_master_replicas() -> usize {
    3
}

fn default_worker_replicas() -> usize {
    3
}
