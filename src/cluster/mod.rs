//! Cluster access layer: the `oc` CLI, the ssh bastion and the cloud DNS
//! API, each behind a trait.
//!
//! The recovery runbooks and the phase workers never spawn a process
//! directly; everything they do to a live cluster flows through
//! [`ClusterCtl`], [`NodeShell`] and [`DnsApi`] so a whole drill can run
//! against a scripted cluster in tests.

mod ctl;
mod dns;
pub mod machines;
pub mod provider;
mod ssh;

pub use ctl::OcClusterCtl;
pub use dns::Route53Dns;
pub use ssh::BastionShell;

#[cfg(test)]
mod ctl_test;
#[cfg(test)]
mod ssh_test;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;

use crate::exec::ProcessOutput;
use crate::Result;

/// One node as the control plane reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub name: String,
    pub ready: bool,
}

/// One machine-API object, with the addresses the drills care about.
/// Addresses stay `None` until the cloud provider reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineRecord {
    pub name: String,
    pub internal_ip: Option<String>,
    pub internal_dns: Option<String>,
}

/// Addressable container inside a running pod, including init containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodContainerRef {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

/// Config-pool rollout conditions the drills wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolCondition {
    Updating,
    Updated,
}

impl PoolCondition {
    pub fn as_condition(&self) -> &'static str {
        match self {
            PoolCondition::Updating => "Updating",
            PoolCondition::Updated => "Updated",
        }
    }
}

/// Control-plane operations over the cluster CLI.
///
/// Boolean returns mean "observed yes/no" under a healthy query path;
/// `Err` is reserved for the query itself breaking (spawn failure,
/// unreadable response). Callers decide how many `false` answers they
/// tolerate.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterCtl: Send + Sync + 'static {
    /// Short-timeout API liveness probe. `Ok(false)` when the control
    /// plane does not answer, which is the expected state mid-meltdown.
    async fn probe_api(&self) -> Result<bool>;

    async fn node_names(&self) -> Result<Vec<String>>;

    async fn master_nodes(&self) -> Result<Vec<NodeRecord>>;

    /// External address of the first master, used as the suite's ssh
    /// bastion endpoint.
    async fn master_external_ip(&self) -> Result<String>;

    async fn node_internal_ip(
        &self,
        node: &str,
    ) -> Result<String>;

    /// Machine name recorded in the node's machine annotation, without
    /// the namespace qualifier.
    async fn node_machine_annotation(
        &self,
        node: &str,
    ) -> Result<String>;

    /// Node hosting the first pod matching `selector`, or `None` when no
    /// pod matches.
    async fn controller_pod_node(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Option<String>>;

    async fn pods_by_selector(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<String>>;

    /// Every container of every pod in the cluster, init containers
    /// included. Drives the per-container log collection.
    async fn all_pod_containers(&self) -> Result<Vec<PodContainerRef>>;

    async fn pod_exists(
        &self,
        namespace: &str,
        pod: &str,
    ) -> Result<bool>;

    /// Blocks until the pod reports Ready or the timeout lapses.
    /// `Ok(false)` on timeout.
    async fn wait_pod_ready(
        &self,
        namespace: &str,
        pod: &str,
        timeout: Duration,
    ) -> Result<bool>;

    async fn delete_pod(
        &self,
        namespace: &str,
        pod: &str,
    ) -> Result<()>;

    async fn delete_pods_by_selector(
        &self,
        namespace: &str,
        selector: &str,
        wait: bool,
    ) -> Result<()>;

    async fn delete_all_pods(
        &self,
        namespace: &str,
    ) -> Result<()>;

    async fn delete_project(
        &self,
        name: &str,
    ) -> Result<()>;

    async fn scale(
        &self,
        namespace: &str,
        deployment: &str,
        replicas: u32,
    ) -> Result<()>;

    async fn master_machines(&self) -> Result<Vec<MachineRecord>>;

    /// Full machine object, for cloning replacements from a survivor.
    async fn machine_manifest(
        &self,
        name: &str,
    ) -> Result<Value>;

    /// Deletes with a short request timeout; against a melting control
    /// plane the call must fail fast so the retry budget governs pacing.
    async fn delete_machine(
        &self,
        name: &str,
    ) -> Result<()>;

    /// `create -f -` with the manifest on stdin. Creation of an object
    /// that already exists is an error, same as the CLI.
    async fn apply_manifest<'a>(
        &self,
        namespace: Option<&'a str>,
        manifest: &str,
    ) -> Result<()>;

    async fn patch_machine_config(
        &self,
        name: &str,
        patch: &Value,
    ) -> Result<()>;

    /// Source of the first file carried by a machine config, the field
    /// the rollback drill asserts on.
    async fn machine_config_file_source(
        &self,
        name: &str,
    ) -> Result<String>;

    async fn machine_config_pools(&self) -> Result<Vec<String>>;

    async fn pool_exists(
        &self,
        pool: &str,
    ) -> Result<bool>;

    /// Blocks until the pool reports `condition` or the timeout lapses.
    /// `Ok(false)` on timeout.
    async fn wait_pool_condition(
        &self,
        pool: &str,
        condition: PoolCondition,
        timeout: Duration,
    ) -> Result<bool>;

    async fn api_server_url(&self) -> Result<String>;

    /// Image reference a named component resolves to in the release
    /// payload under test.
    async fn release_image_for(
        &self,
        component: &str,
    ) -> Result<String>;

    /// Load-balancer hostname of a service, `None` while the cloud is
    /// still provisioning it.
    async fn service_ingress_hostname(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Option<String>>;
}

/// Remote execution on cluster nodes.
///
/// `run_on` hands back the remote exit status untouched: transport
/// failures are retried inside the implementation, remote failures are
/// the caller's to judge.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeShell: Send + Sync + 'static {
    /// Prepares the transport (deploys the bastion on first use).
    /// Idempotent.
    async fn ensure_ready(&self) -> Result<()>;

    async fn run_on(
        &self,
        node: &str,
        script: &str,
    ) -> Result<ProcessOutput>;

    async fn upload(
        &self,
        node: &str,
        local: &Path,
        remote: &str,
    ) -> Result<()>;
}

/// Authoritative DNS updates for the consensus-member records.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DnsApi: Send + Sync + 'static {
    /// Upserts an A record in the zone owning `domain`.
    async fn upsert_a(
        &self,
        domain: &str,
        fqdn: &str,
        ip: &str,
        ttl: u32,
    ) -> Result<()>;
}
