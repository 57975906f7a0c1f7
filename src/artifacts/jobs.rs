//! The standard evidence set, expressed as fetch jobs.
//!
//! Job targets are relative to the artifact root. Gzipped jobs name the
//! uncompressed file; the writer adds the suffix.

use std::path::Path;

use serde_json::Value;

use crate::artifacts::FetchJob;
use crate::cluster::PodContainerRef;
use crate::exec::CommandSpec;

/// Cluster-scoped config.openshift.io resources dumped in one get.
const CONFIG_RESOURCES: [&str; 13] = [
    "apiserver.config.openshift.io",
    "authentication.config.openshift.io",
    "build.config.openshift.io",
    "console.config.openshift.io",
    "dns.config.openshift.io",
    "featuregate.config.openshift.io",
    "image.config.openshift.io",
    "infrastructure.config.openshift.io",
    "ingress.config.openshift.io",
    "network.config.openshift.io",
    "oauth.config.openshift.io",
    "project.config.openshift.io",
    "scheduler.config.openshift.io",
];

/// Units whose journals the bootstrap host exposes over its gateway.
const BOOTSTRAP_SERVICES: [&str; 4] = ["bootkube", "openshift", "kubelet", "crio"];

fn oc_insecure(kubeconfig: &Path) -> CommandSpec {
    CommandSpec::new("oc")
        .env("KUBECONFIG", kubeconfig.display().to_string())
        .arg("--insecure-skip-tls-verify")
}

/// Dumps get a short timeout; a wedged apiserver must not stall teardown.
fn oc(kubeconfig: &Path) -> CommandSpec {
    oc_insecure(kubeconfig).arg("--request-timeout=5s")
}

/// Object dumps every run collects regardless of outcome.
pub fn cluster_state_jobs(kubeconfig: &Path) -> Vec<FetchJob> {
    let mut jobs = vec![FetchJob::new(
        "config-resources.json",
        oc(kubeconfig).arg("get").args(CONFIG_RESOURCES).arg("-o").arg("json"),
    )];

    let cluster_scoped = [
        "apiservices",
        "clusteroperators",
        "clusterversion",
        "csr",
        "kubeapiserver",
        "kubecontrollermanager",
        "machineconfigpools",
        "machineconfigs",
        "namespaces",
        "nodes",
        "openshiftapiserver",
    ];
    for resource in cluster_scoped {
        jobs.push(FetchJob::new(
            format!("{resource}.json"),
            oc(kubeconfig).arg("get").arg(resource).arg("-o").arg("json"),
        ));
    }

    let namespaced = [
        "configmaps",
        "credentialsrequests",
        "endpoints",
        "events",
        "pods",
        "persistentvolumes",
        "persistentvolumeclaims",
        "rolebindings",
        "roles",
        "services",
    ];
    for resource in namespaced {
        jobs.push(FetchJob::new(
            format!("{resource}.json"),
            oc(kubeconfig)
                .arg("get")
                .arg(resource)
                .arg("--all-namespaces")
                .arg("-o")
                .arg("json"),
        ));
    }

    // Workload dumps run large; compressed on write
    for resource in ["deployments", "daemonsets", "replicasets", "statefulsets"] {
        jobs.push(FetchJob::gzipped(
            format!("{resource}.json"),
            oc(kubeconfig)
                .arg("get")
                .arg(resource)
                .arg("--all-namespaces")
                .arg("-o")
                .arg("json"),
        ));
    }
    jobs.push(FetchJob::gzipped(
        "openapi.json",
        oc(kubeconfig).arg("get").arg("--raw").arg("/openapi/v2"),
    ));

    jobs
}

/// Kubelet heap profile per node, proxied through the apiserver.
pub fn node_jobs(
    kubeconfig: &Path,
    nodes: &[String],
) -> Vec<FetchJob> {
    nodes
        .iter()
        .map(|node| {
            FetchJob::new(
                format!("{}/{node}/heap", crate::ARTIFACT_DIR_NODES),
                oc_insecure(kubeconfig)
                    .arg("get")
                    .arg("--request-timeout=20s")
                    .arg("--raw")
                    .arg(format!("/api/v1/nodes/{node}/proxy/debug/pprof/heap")),
            )
        })
        .collect()
}

/// Consolidated journal per node role.
pub fn journal_jobs(kubeconfig: &Path) -> Vec<FetchJob> {
    ["master", "worker"]
        .iter()
        .map(|role| {
            FetchJob::gzipped(
                format!("{}/{role}s-journal", crate::ARTIFACT_DIR_NODES),
                oc_insecure(kubeconfig)
                    .arg("adm")
                    .arg("node-logs")
                    .arg(format!("--role={role}"))
                    .arg("--unify=false"),
            )
        })
        .collect()
}

/// Packet-filter counters from every SDN pod.
pub fn network_jobs(
    kubeconfig: &Path,
    sdn_pods: &[String],
) -> Vec<FetchJob> {
    sdn_pods
        .iter()
        .map(|pod| {
            FetchJob::new(
                format!("{}/iptables-save-{pod}", crate::ARTIFACT_DIR_NETWORK),
                oc_insecure(kubeconfig)
                    .arg("rsh")
                    .arg("--timeout=20")
                    .arg("-n")
                    .arg(crate::SDN_NAMESPACE)
                    .arg("-c")
                    .arg("sdn")
                    .arg(pod)
                    .arg("iptables-save")
                    .arg("-c"),
            )
        })
        .collect()
}

/// Heap profiles off the apiserver pods, serving and controller ports.
pub fn metrics_jobs(
    kubeconfig: &Path,
    api_pods: &[(String, String)],
) -> Vec<FetchJob> {
    let mut jobs = Vec::with_capacity(api_pods.len() * 2);
    for (namespace, pod) in api_pods {
        for (suffix, port) in [("heap", 8443u16), ("controllers-heap", 8444)] {
            jobs.push(FetchJob::new(
                format!("{}/{namespace}_{pod}-{suffix}", crate::ARTIFACT_DIR_METRICS),
                oc_insecure(kubeconfig)
                    .arg("exec")
                    .arg("-n")
                    .arg(namespace)
                    .arg(pod)
                    .arg("--")
                    .arg("/bin/bash")
                    .arg("-c")
                    .arg(format!("curl -sks https://localhost:{port}/debug/pprof/heap")),
            ));
        }
    }
    jobs
}

/// Current and previous logs for every container, compressed.
pub fn container_log_jobs(
    kubeconfig: &Path,
    containers: &[PodContainerRef],
) -> Vec<FetchJob> {
    let mut jobs = Vec::with_capacity(containers.len() * 2);
    for c in containers {
        let base = oc_insecure(kubeconfig)
            .arg("logs")
            .arg("--request-timeout=20s")
            .arg("-n")
            .arg(&c.namespace)
            .arg(&c.pod)
            .arg("-c")
            .arg(&c.container);
        jobs.push(FetchJob::gzipped(
            format!(
                "{}/{}_{}_{}.log",
                crate::ARTIFACT_DIR_PODS,
                c.namespace,
                c.pod,
                c.container
            ),
            base.clone(),
        ));
        jobs.push(FetchJob::gzipped(
            format!(
                "{}/{}_{}_{}_previous.log",
                crate::ARTIFACT_DIR_PODS,
                c.namespace,
                c.pod,
                c.container
            ),
            base.arg("-p"),
        ));
    }
    jobs
}

/// Prometheus TSDB snapshot. The pod tars it compressed already, so the
/// job stores the raw stream under its final name.
pub fn monitoring_jobs(kubeconfig: &Path) -> Vec<FetchJob> {
    vec![FetchJob::new(
        format!("{}/prometheus.tar.gz", crate::ARTIFACT_DIR_METRICS),
        oc_insecure(kubeconfig)
            .arg("exec")
            .arg("-n")
            .arg("openshift-monitoring")
            .arg("prometheus-k8s-0")
            .arg("--")
            .arg("tar")
            .arg("cvzf")
            .arg("-")
            .arg("-C")
            .arg("/prometheus")
            .arg("."),
    )]
}

/// The heavyweight diagnostic bundle. It writes its own tree under the
/// artifact root; the job target only keeps the tool's log.
pub fn must_gather_job(
    kubeconfig: &Path,
    artifact_root: &Path,
) -> FetchJob {
    FetchJob::new(
        "must-gather/must-gather.log",
        oc_insecure(kubeconfig)
            .arg("adm")
            .arg("must-gather")
            .arg("--dest-dir")
            .arg(artifact_root.join("must-gather").display().to_string()),
    )
}

/// Unit journals off the bootstrap host's journal gateway.
pub fn bootstrap_journal_jobs(
    bootstrap_ip: &str,
    install_dir: &Path,
) -> Vec<FetchJob> {
    BOOTSTRAP_SERVICES
        .iter()
        .map(|service| {
            FetchJob::new(
                format!("{}/{service}.service", crate::ARTIFACT_DIR_BOOTSTRAP),
                CommandSpec::new("curl")
                    .arg("--insecure")
                    .arg("--silent")
                    .arg("--connect-timeout")
                    .arg("5")
                    .arg("--retry")
                    .arg("3")
                    .arg("--cert")
                    .arg(install_dir.join("tls/journal-gatewayd.crt").display().to_string())
                    .arg("--key")
                    .arg(install_dir.join("tls/journal-gatewayd.key").display().to_string())
                    .arg(format!(
                        "https://{bootstrap_ip}:19531/entries?_SYSTEMD_UNIT={service}.service"
                    )),
            )
        })
        .collect()
}

/// Gather script on the bootstrap host plus the copy of the bundle it
/// leaves behind. Run sequentially, outside the pool: the scp writes its
/// destination file itself.
pub fn bootstrap_gather_specs(
    bootstrap_ip: &str,
    install_dir: &Path,
) -> (CommandSpec, CommandSpec) {
    let options = [
        "-o",
        "PreferredAuthentications=publickey",
        "-o",
        "StrictHostKeyChecking=false",
        "-o",
        "UserKnownHostsFile=/dev/null",
    ];
    let gather = CommandSpec::new("ssh")
        .arg("-A")
        .args(options)
        .arg(format!("core@{bootstrap_ip}"))
        .arg("/bin/bash")
        .arg("-x")
        .arg("/usr/local/bin/installer-gather.sh");
    let fetch_bundle = CommandSpec::new("scp")
        .args(options)
        .arg(format!("core@{bootstrap_ip}:log-bundle.tar.gz"))
        .arg(install_dir.join("bootstrap-logs.tar.gz").display().to_string());
    (gather, fetch_bundle)
}

/// Bootstrap host address out of the installer's terraform state. Absent
/// once the installer has torn the bootstrap node down.
pub fn parse_bootstrap_ip(state: &Value) -> Option<String> {
    for module in state.get("modules")?.as_array()? {
        let Some(resources) = module.get("resources").and_then(Value::as_object) else {
            continue;
        };
        if let Some(ip) = resources
            .get("aws_instance.bootstrap")
            .and_then(|r| r.pointer("/primary/attributes/public_ip"))
            .and_then(Value::as_str)
        {
            return Some(ip.to_string());
        }
    }
    None
}
