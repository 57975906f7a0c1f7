use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::ClusterCtl;
use super::MachineRecord;
use super::NodeRecord;
use super::PodContainerRef;
use super::PoolCondition;
use crate::exec::CommandSpec;
use crate::exec::ProcessOutput;
use crate::exec::ProcessRunner;
use crate::Error;
use crate::Result;
use crate::SystemError;

/// [`ClusterCtl`] over the `oc` binary.
///
/// Every invocation carries the run's kubeconfig explicitly so the
/// harness never depends on ambient environment.
pub struct OcClusterCtl {
    runner: Arc<dyn ProcessRunner>,
    kubeconfig: PathBuf,
    probe_timeout: Duration,
}

impl OcClusterCtl {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        kubeconfig: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            kubeconfig: kubeconfig.into(),
            probe_timeout: Duration::from_secs(5),
        }
    }

    /// Caps each liveness probe request. Mid-meltdown a hung API must
    /// count as down, so the probe never inherits the client default.
    pub fn with_probe_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn oc(&self) -> CommandSpec {
        CommandSpec::new("oc").env("KUBECONFIG", self.kubeconfig.display().to_string())
    }

    async fn run(
        &self,
        spec: CommandSpec,
    ) -> Result<ProcessOutput> {
        self.runner.run(spec).await
    }

    /// Runs and treats a non-zero exit as an error.
    async fn run_ok(
        &self,
        spec: CommandSpec,
    ) -> Result<ProcessOutput> {
        let line = spec.display();
        let output = self.runner.run(spec).await?;
        if !output.success() {
            return Err(SystemError::Process {
                program: "oc".to_string(),
                detail: format!("`{line}` exited {}: {}", output.status, output.stderr_utf8()),
            }
            .into());
        }
        Ok(output)
    }

    async fn run_json(
        &self,
        spec: CommandSpec,
    ) -> Result<Value> {
        let output = self.run_ok(spec).await?;
        let value = serde_json::from_slice(&output.stdout)?;
        Ok(value)
    }
}

#[async_trait]
impl ClusterCtl for OcClusterCtl {
    async fn probe_api(&self) -> Result<bool> {
        let spec = self
            .oc()
            .arg(format!("--request-timeout={}s", self.probe_timeout.as_secs()))
            .args(["get", "nodes"]);
        Ok(self.run(spec).await?.success())
    }

    async fn node_names(&self) -> Result<Vec<String>> {
        let spec = self.oc().args(["get", "nodes", "-o", "json"]);
        let v = self.run_json(spec).await?;
        Ok(item_names(&v))
    }

    async fn master_nodes(&self) -> Result<Vec<NodeRecord>> {
        let spec = self
            .oc()
            .args(["get", "nodes", "-l", crate::MASTER_NODE_SELECTOR, "-o", "json"]);
        let v = self.run_json(spec).await?;
        let nodes = items(&v)
            .iter()
            .filter_map(|item| {
                Some(NodeRecord {
                    name: item["metadata"]["name"].as_str()?.to_string(),
                    ready: node_is_ready(item),
                })
            })
            .collect();
        Ok(nodes)
    }

    async fn master_external_ip(&self) -> Result<String> {
        let spec = self
            .oc()
            .args(["get", "nodes", "-l", crate::MASTER_NODE_SELECTOR, "-o", "json"]);
        let v = self.run_json(spec).await?;
        items(&v)
            .iter()
            .find_map(|item| address_of(item, "ExternalIP"))
            .ok_or_else(|| Error::Fatal("no master node reports an ExternalIP".to_string()))
    }

    async fn node_internal_ip(
        &self,
        node: &str,
    ) -> Result<String> {
        let spec = self.oc().args(["get", "nodes"]).arg(node).args(["-o", "json"]);
        let v = self.run_json(spec).await?;
        address_of(&v, "InternalIP")
            .ok_or_else(|| Error::Fatal(format!("node `{node}` reports no InternalIP")))
    }

    async fn node_machine_annotation(
        &self,
        node: &str,
    ) -> Result<String> {
        let spec = self.oc().args(["get", "node"]).arg(node).args(["-o", "json"]);
        let v = self.run_json(spec).await?;
        let qualified = v["metadata"]["annotations"][crate::MACHINE_ANNOTATION]
            .as_str()
            .ok_or_else(|| Error::Fatal(format!("node `{node}` carries no machine annotation")))?;
        // Annotation value is namespace-qualified
        Ok(qualified.rsplit('/').next().unwrap_or(qualified).to_string())
    }

    async fn controller_pod_node(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Option<String>> {
        let spec = self
            .oc()
            .args(["get", "pods", "-n"])
            .arg(namespace)
            .arg("-l")
            .arg(selector)
            .args(["-o", "json"]);
        let v = self.run_json(spec).await?;
        Ok(items(&v)
            .first()
            .and_then(|pod| pod["spec"]["nodeName"].as_str())
            .map(str::to_string))
    }

    async fn pods_by_selector(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<String>> {
        let spec = self
            .oc()
            .args(["get", "pods", "-n"])
            .arg(namespace)
            .arg("-l")
            .arg(selector)
            .args(["-o", "json"]);
        let v = self.run_json(spec).await?;
        Ok(item_names(&v))
    }

    async fn all_pod_containers(&self) -> Result<Vec<PodContainerRef>> {
        let spec = self.oc().args(["get", "pods", "--all-namespaces", "-o", "json"]);
        let v = self.run_json(spec).await?;
        let mut refs = Vec::new();
        for pod in items(&v) {
            let (Some(namespace), Some(name)) = (
                pod["metadata"]["namespace"].as_str(),
                pod["metadata"]["name"].as_str(),
            ) else {
                continue;
            };
            for field in ["containers", "initContainers"] {
                for container in pod["spec"][field].as_array().into_iter().flatten() {
                    if let Some(container) = container["name"].as_str() {
                        refs.push(PodContainerRef {
                            namespace: namespace.to_string(),
                            pod: name.to_string(),
                            container: container.to_string(),
                        });
                    }
                }
            }
        }
        Ok(refs)
    }

    async fn pod_exists(
        &self,
        namespace: &str,
        pod: &str,
    ) -> Result<bool> {
        let spec = self
            .oc()
            .args(["get", format!("pod/{pod}").as_str(), "-n"])
            .arg(namespace)
            .args(["-o", "name"]);
        Ok(self.run(spec).await?.success())
    }

    async fn wait_pod_ready(
        &self,
        namespace: &str,
        pod: &str,
        timeout: Duration,
    ) -> Result<bool> {
        let spec = self
            .oc()
            .args(["wait", format!("pod/{pod}").as_str(), "-n"])
            .arg(namespace)
            .arg("--for=condition=Ready")
            .arg(format!("--timeout={}s", timeout.as_secs()));
        Ok(self.run(spec).await?.success())
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        pod: &str,
    ) -> Result<()> {
        let spec = self
            .oc()
            .args(["delete", format!("pod/{pod}").as_str(), "-n"])
            .arg(namespace);
        self.run_ok(spec).await?;
        Ok(())
    }

    async fn delete_pods_by_selector(
        &self,
        namespace: &str,
        selector: &str,
        wait: bool,
    ) -> Result<()> {
        let mut spec = self
            .oc()
            .args(["delete", "pods", "-l"])
            .arg(selector)
            .arg("-n")
            .arg(namespace);
        if !wait {
            spec = spec.arg("--wait=false");
        }
        self.run_ok(spec).await?;
        Ok(())
    }

    async fn delete_all_pods(
        &self,
        namespace: &str,
    ) -> Result<()> {
        let spec = self.oc().args(["delete", "pod", "--all", "-n"]).arg(namespace);
        self.run_ok(spec).await?;
        Ok(())
    }

    async fn delete_project(
        &self,
        name: &str,
    ) -> Result<()> {
        let spec = self.oc().args(["delete", "project"]).arg(name);
        self.run_ok(spec).await?;
        Ok(())
    }

    async fn scale(
        &self,
        namespace: &str,
        deployment: &str,
        replicas: u32,
    ) -> Result<()> {
        let spec = self
            .oc()
            .arg("scale")
            .arg(format!("--replicas={replicas}"))
            .arg(format!("deployment.apps/{deployment}"))
            .arg("-n")
            .arg(namespace);
        self.run_ok(spec).await?;
        Ok(())
    }

    async fn master_machines(&self) -> Result<Vec<MachineRecord>> {
        let spec = self
            .oc()
            .args(["-n", crate::MACHINE_API_NAMESPACE, "get", "machines"])
            .args(["-l", crate::MASTER_MACHINE_SELECTOR])
            .args(["-o", "json"]);
        let v = self.run_json(spec).await?;
        let machines = items(&v)
            .iter()
            .filter_map(|item| {
                Some(MachineRecord {
                    name: item["metadata"]["name"].as_str()?.to_string(),
                    internal_ip: address_of(item, "InternalIP"),
                    internal_dns: address_of(item, "InternalDNS"),
                })
            })
            .collect();
        Ok(machines)
    }

    async fn machine_manifest(
        &self,
        name: &str,
    ) -> Result<Value> {
        let spec = self
            .oc()
            .args(["-n", crate::MACHINE_API_NAMESPACE, "get", "machine"])
            .arg(name)
            .args(["-o", "json"]);
        self.run_json(spec).await
    }

    async fn delete_machine(
        &self,
        name: &str,
    ) -> Result<()> {
        let spec = self
            .oc()
            .args(["--request-timeout=5s", "-n", crate::MACHINE_API_NAMESPACE])
            .args(["delete", "machine"])
            .arg(name);
        self.run_ok(spec).await?;
        Ok(())
    }

    async fn apply_manifest<'a>(
        &self,
        namespace: Option<&'a str>,
        manifest: &str,
    ) -> Result<()> {
        let mut spec = self.oc().args(["create", "-f", "-"]);
        if let Some(namespace) = namespace {
            spec = spec.arg("-n").arg(namespace);
        }
        self.run_ok(spec.stdin_bytes(manifest)).await?;
        Ok(())
    }

    async fn patch_machine_config(
        &self,
        name: &str,
        patch: &Value,
    ) -> Result<()> {
        let spec = self
            .oc()
            .args(["patch", "machineconfig"])
            .arg(name)
            .arg("--patch")
            .arg(patch.to_string())
            .arg("--type=merge");
        self.run_ok(spec).await?;
        Ok(())
    }

    async fn machine_config_file_source(
        &self,
        name: &str,
    ) -> Result<String> {
        let spec = self
            .oc()
            .args(["get", format!("machineconfig/{name}").as_str(), "-o", "json"]);
        let v = self.run_json(spec).await?;
        v["spec"]["config"]["storage"]["files"][0]["contents"]["source"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Fatal(format!("machineconfig `{name}` carries no file source"))
            })
    }

    async fn machine_config_pools(&self) -> Result<Vec<String>> {
        let spec = self.oc().args(["get", "machineconfigpool", "-o", "json"]);
        let v = self.run_json(spec).await?;
        Ok(item_names(&v))
    }

    async fn pool_exists(
        &self,
        pool: &str,
    ) -> Result<bool> {
        let spec = self
            .oc()
            .args(["get", format!("machineconfigpool/{pool}").as_str(), "-o", "name"]);
        Ok(self.run(spec).await?.success())
    }

    async fn wait_pool_condition(
        &self,
        pool: &str,
        condition: PoolCondition,
        timeout: Duration,
    ) -> Result<bool> {
        let spec = self
            .oc()
            .args(["wait", format!("machineconfigpool/{pool}").as_str()])
            .arg(format!("--for=condition={}", condition.as_condition()))
            .arg(format!("--timeout={}s", timeout.as_secs()));
        Ok(self.run(spec).await?.success())
    }

    async fn api_server_url(&self) -> Result<String> {
        let spec = self.oc().args(["whoami", "--show-server"]);
        Ok(self.run_ok(spec).await?.stdout_utf8())
    }

    async fn release_image_for(
        &self,
        component: &str,
    ) -> Result<String> {
        let spec = self
            .oc()
            .args(["adm", "release", "info", "--image-for"])
            .arg(component);
        Ok(self.run_ok(spec).await?.stdout_utf8())
    }

    async fn service_ingress_hostname(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Option<String>> {
        let spec = self
            .oc()
            .args(["get", "service", "-n"])
            .arg(namespace)
            .arg(service)
            .args(["-o", "json"]);
        let output = self.run(spec).await?;
        if !output.success() {
            // Service not created yet; callers poll
            return Ok(None);
        }
        let v: Value = serde_json::from_slice(&output.stdout)?;
        Ok(v["status"]["loadBalancer"]["ingress"][0]["hostname"]
            .as_str()
            .filter(|h| !h.is_empty())
            .map(str::to_string))
    }
}

fn items(v: &Value) -> &[Value] {
    v["items"].as_array().map(Vec::as_slice).unwrap_or(&[])
}

fn item_names(v: &Value) -> Vec<String> {
    items(v)
        .iter()
        .filter_map(|item| item["metadata"]["name"].as_str())
        .map(str::to_string)
        .collect()
}

fn address_of(
    item: &Value,
    addr_type: &str,
) -> Option<String> {
    item["status"]["addresses"]
        .as_array()?
        .iter()
        .find(|a| a["type"].as_str() == Some(addr_type))
        .and_then(|a| a["address"].as_str())
        .map(str::to_string)
}

fn node_is_ready(item: &Value) -> bool {
    item["status"]["conditions"]
        .as_array()
        .into_iter()
        .flatten()
        .any(|c| c["type"].as_str() == Some("Ready") && c["status"].as_str() == Some("True"))
}
