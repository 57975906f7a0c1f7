//! Per-platform install-config rendering and suite environment values.

use std::path::Path;
use std::time::Duration;

use crate::config::ClusterProfile;
use crate::config::ClusterType;
use crate::config::ProxyProfile;
use crate::utils::time::expiration_stamp;
use crate::Result;
use crate::SystemError;

const AWS_REGION: &str = "us-east-1";
const AZURE_REGION: &str = "centralus";
const AZURE_BASE_DOMAIN_RESOURCE_GROUP: &str = "os4-common";
const GCP_REGION: &str = "us-east1";
const GCP_PROJECT: &str = "openshift-gce-devel-ci";

/// Renders the installer's install-config.yaml for the profile's
/// platform, reading the pull secret and ssh public key from the
/// credential bundle.
pub async fn render_install_config(profile: &ClusterProfile) -> Result<String> {
    let pull_secret = read_credential(&profile.pull_secret_path()).await?;
    let ssh_key = read_credential(&profile.ssh_public_key_path()).await?;
    let pull_secret = pull_secret.trim();
    let ssh_key = ssh_key.trim();

    let name = &profile.cluster_name;
    let base_domain = effective_base_domain(profile);
    let masters = profile.master_replicas;
    let workers = profile.worker_replicas;

    let mut yaml = match profile.cluster_type {
        ClusterType::Aws => {
            let expiration =
                expiration_stamp(Duration::from_secs(profile.expiration_hours * 3600));
            format!(
                r#"apiVersion: v1
baseDomain: {base_domain}
metadata:
  name: {name}
controlPlane:
  name: master
  replicas: {masters}
  platform:
    aws:
      zones:
      - us-east-1a
      - us-east-1b
compute:
- name: worker
  replicas: {workers}
  platform:
    aws:
      type: m4.xlarge
      zones:
      - us-east-1a
      - us-east-1b
platform:
  aws:
    region: {AWS_REGION}
    userTags:
      expirationDate: {expiration}
pullSecret: >
  {pull_secret}
sshKey: |
  {ssh_key}
"#
            )
        }
        ClusterType::Azure4 => format!(
            r#"apiVersion: v1
baseDomain: {base_domain}
metadata:
  name: {name}
controlPlane:
  name: master
  replicas: {masters}
compute:
- name: worker
  replicas: {workers}
platform:
  azure:
    baseDomainResourceGroupName: {AZURE_BASE_DOMAIN_RESOURCE_GROUP}
    region: {AZURE_REGION}
pullSecret: >
  {pull_secret}
sshKey: |
  {ssh_key}
"#
        ),
        ClusterType::Gcp => format!(
            r#"apiVersion: v1
baseDomain: {base_domain}
metadata:
  name: {name}
controlPlane:
  name: master
  replicas: {masters}
compute:
- name: worker
  replicas: {workers}
platform:
  gcp:
    projectID: {GCP_PROJECT}
    region: {GCP_REGION}
pullSecret: >
  {pull_secret}
sshKey: |
  {ssh_key}
"#
        ),
    };

    if let Some(proxy) = &profile.proxy {
        yaml.push_str(&render_proxy(proxy).await?);
    }

    if let Some(network_type) = &profile.network_type {
        yaml.push_str(&format!("networking:\n  networkType: {network_type}\n"));
    }

    Ok(yaml)
}

/// DNS zone the cluster roots under; an empty profile value picks the
/// platform's CI default.
pub fn effective_base_domain(profile: &ClusterProfile) -> &str {
    if !profile.base_domain.is_empty() {
        return &profile.base_domain;
    }
    match profile.cluster_type {
        ClusterType::Aws => "origin-ci-int-aws.dev.rhcloud.com",
        ClusterType::Azure4 => "ci.azure.devcluster.openshift.com",
        ClusterType::Gcp => "origin-ci-int-gce.dev.openshift.com",
    }
}

/// Provider descriptor exported as TEST_PROVIDER for the suite.
pub fn test_provider_descriptor(cluster_type: ClusterType) -> &'static str {
    match cluster_type {
        ClusterType::Aws => {
            r#"{"type":"aws","region":"us-east-1","zone":"us-east-1a","multizone":true,"multimaster":true}"#
        }
        ClusterType::Azure4 => "azure",
        ClusterType::Gcp => {
            r#"{"type":"gce","region":"us-east1","multizone":true,"multimaster":true,"projectid":"openshift-gce-devel-ci"}"#
        }
    }
}

/// Extra suite arguments some platforms want alongside the descriptor.
pub fn provider_args(cluster_type: ClusterType) -> Option<&'static str> {
    match cluster_type {
        ClusterType::Aws => Some("-provider=aws -gce-zone=us-east-1"),
        ClusterType::Azure4 | ClusterType::Gcp => None,
    }
}

/// Login user the suite's ssh helpers use on cluster nodes.
pub fn ssh_user(cluster_type: ClusterType) -> Option<&'static str> {
    match cluster_type {
        ClusterType::Aws | ClusterType::Gcp => Some("core"),
        ClusterType::Azure4 => None,
    }
}

/// Environment variable the installer and destroyer read platform
/// credentials from.
pub fn credentials_env_var(cluster_type: ClusterType) -> &'static str {
    match cluster_type {
        ClusterType::Aws => "AWS_SHARED_CREDENTIALS_FILE",
        ClusterType::Azure4 => "AZURE_AUTH_LOCATION",
        ClusterType::Gcp => "GOOGLE_CLOUD_KEYFILE_JSON",
    }
}

/// Name the suite's ssh helpers expect the node key under `~/.ssh`.
pub fn suite_ssh_key_name(cluster_type: ClusterType) -> Option<&'static str> {
    match cluster_type {
        ClusterType::Aws => Some("kube_aws_rsa"),
        ClusterType::Gcp => Some("google_compute_engine"),
        ClusterType::Azure4 => None,
    }
}

/// Machine config enabling FIPS on one pool; applied per pool, then the
/// rollout is awaited.
pub fn fips_machine_config(pool: &str) -> String {
    format!(
        r#"apiVersion: machineconfiguration.openshift.io/v1
kind: MachineConfig
metadata:
  labels:
    machineconfiguration.openshift.io/role: {pool}
  name: 99-fips-{pool}
spec:
  fips: true
"#
    )
}

async fn render_proxy(proxy: &ProxyProfile) -> Result<String> {
    let mut stanza = String::from("proxy:\n");
    if !proxy.https_proxy.is_empty() {
        stanza.push_str(&format!("  httpsProxy: {}\n", proxy.https_proxy));
    }
    if !proxy.http_proxy.is_empty() {
        stanza.push_str(&format!("  httpProxy: {}\n", proxy.http_proxy));
    }
    if let Some(no_proxy) = &proxy.no_proxy {
        stanza.push_str(&format!("  noProxy: {no_proxy}\n"));
    }

    if let Some(path) = &proxy.trust_bundle_path {
        let bundle = read_credential(path).await?;
        stanza.push_str("additionalTrustBundle: |\n");
        for line in bundle.trim_end().lines() {
            stanza.push_str("  ");
            stanza.push_str(line);
            stanza.push('\n');
        }
    }

    Ok(stanza)
}

async fn read_credential(path: &Path) -> Result<String> {
    let content =
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SystemError::PathError {
                path: path.to_path_buf(),
                source,
            })?;
    Ok(content)
}
