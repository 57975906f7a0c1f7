//! Quorum-loss drill: destroy every master but one, prove the control
//! plane actually melted down, restore the survivor's member snapshot
//! and grow the control plane back to its full line-up.

use std::sync::Arc;

use tracing::debug;
use tracing::info;
use tracing::warn;

use tokio::time::sleep;

use crate::cluster::machines::clone_machine_manifest;
use crate::cluster::machines::replacement_indices;
use crate::cluster::machines::short_hostname;
use crate::cluster::machines::split_machine_name;
use crate::cluster::ClusterCtl;
use crate::cluster::DnsApi;
use crate::cluster::NodeShell;
use crate::config::RetryPolicies;
use crate::config::RunbookConfig;
use crate::exec::retry_async;
use crate::exec::wait_until;
use crate::runbook::remote_ok;
use crate::runbook::RunbookReport;
use crate::runbook::StepRecorder;
use crate::Error;
use crate::Result;
use crate::RunbookError;

/// Written on the survivor before anything is destroyed; the restore
/// script reads it back once the rest of the control plane is gone.
const SURVIVOR_CONNSTRING_SCRIPT: &str = r#"source /run/etcd/environment && echo "etcd-member-$(hostname -f)=https://${ETCD_DNS_NAME}:2380" > /tmp/etcd_connstring"#;

const HOSTNAME_PLACEHOLDER: &str = "__MASTER_HOSTNAME__";

/// Signer pod pinned onto the surviving master. It countersigns the
/// certificates the regrown members request before the cluster CA is
/// reachable again.
const SIGNER_POD_TEMPLATE: &str = r#"kind: Pod
apiVersion: v1
metadata:
  name: etcd-signer
  namespace: openshift-config
  labels:
    app: etcd-signer
spec:
  hostNetwork: true
  nodeName: __MASTER_HOSTNAME__
  restartPolicy: Never
  tolerations:
  - key: node-role.kubernetes.io/master
    operator: Exists
    effect: NoSchedule
  containers:
  - name: signer
    image: quay.io/openshift/origin-kube-etcd-signer-server:v4.0.0
    command:
    - kube-etcd-signer-server
    - --cacrt=/etc/kubernetes/static-pod-resources/etcd-member/ca.crt
    - --cakey=/etc/kubernetes/static-pod-resources/etcd-member/ca.key
    - --servcrt=/etc/kubernetes/static-pod-resources/etcd-member/root-ca.crt
    - --servkey=/etc/kubernetes/static-pod-resources/etcd-member/root-ca.key
    - --address=0.0.0.0:6443
    securityContext:
      privileged: true
    volumeMounts:
    - mountPath: /etc/kubernetes/
      name: certs
  volumes:
  - name: certs
    hostPath:
      path: /etc/kubernetes/
"#;

/// Witness that the control plane stopped answering after the victim
/// machines were destroyed. Only the meltdown probe mints one, and the
/// restore path refuses to run without it.
struct MeltdownConfirmed(());

struct Victim {
    node: String,
    machine: String,
}

struct Lineup {
    survivor_node: String,
    survivor_machine: String,
    victims: Vec<Victim>,
    expected_masters: usize,
}

pub struct QuorumLossRunbook {
    ctl: Arc<dyn ClusterCtl>,
    shell: Arc<dyn NodeShell>,
    dns: Arc<dyn DnsApi>,
    config: RunbookConfig,
    policies: RetryPolicies,
}

impl QuorumLossRunbook {
    pub const NAME: &'static str = "quorum-restore";

    pub fn new(
        ctl: Arc<dyn ClusterCtl>,
        shell: Arc<dyn NodeShell>,
        dns: Arc<dyn DnsApi>,
        config: RunbookConfig,
        policies: RetryPolicies,
    ) -> Self {
        Self {
            ctl,
            shell,
            dns,
            config,
            policies,
        }
    }

    /// Runs the drill to completion or to its first failed step. The
    /// report covers every step that ran either way.
    pub async fn run(&self) -> (RunbookReport, Result<()>) {
        let mut recorder = StepRecorder::new(Self::NAME);
        let outcome = self.drive(&mut recorder).await;
        (recorder.finish(), outcome)
    }

    async fn drive(
        &self,
        rec: &mut StepRecorder,
    ) -> Result<()> {
        rec.step("prepare-bastion", self.shell.ensure_ready()).await?;

        // The machine controller's own node survives, so the controller
        // keeps running while its peers are destroyed.
        let lineup = rec
            .step("select-survivor", async {
                let survivor_node = self
                    .ctl
                    .controller_pod_node(
                        crate::MACHINE_API_NAMESPACE,
                        crate::MACHINE_CONTROLLER_SELECTOR,
                    )
                    .await?
                    .ok_or_else(|| {
                        RunbookError::NoSurvivor("no machine controller pod scheduled".into())
                    })?;

                let nodes = self.ctl.master_nodes().await?;
                let expected_masters = nodes.len();
                let survivor_machine = self.ctl.node_machine_annotation(&survivor_node).await?;

                let mut victims = Vec::new();
                for node in nodes {
                    if node.name == survivor_node {
                        continue;
                    }
                    let machine = self.ctl.node_machine_annotation(&node.name).await?;
                    victims.push(Victim {
                        node: node.name,
                        machine,
                    });
                }
                if victims.is_empty() {
                    return Err(Error::Fatal(format!(
                        "quorum drill needs at least two masters, found {expected_masters}"
                    )));
                }
                Ok(Lineup {
                    survivor_node,
                    survivor_machine,
                    victims,
                    expected_masters,
                })
            })
            .await?;
        info!(
            survivor = %lineup.survivor_node,
            victims = ?lineup.victims.iter().map(|v| v.machine.as_str()).collect::<Vec<_>>(),
            "quorum-loss line-up"
        );

        rec.step("capture-connection-string", async {
            remote_ok(
                &lineup.survivor_node,
                self.shell
                    .run_on(&lineup.survivor_node, SURVIVOR_CONNSTRING_SCRIPT)
                    .await?,
            )?;
            Ok(())
        })
        .await?;

        // The guard would fight the deletions otherwise
        rec.step("scale-down-quorum-guard", async {
            self.ctl
                .scale(crate::QUORUM_GUARD_NAMESPACE, crate::QUORUM_GUARD_DEPLOYMENT, 0)
                .await
        })
        .await?;

        rec.step("destroy-victim-machines", async {
            for victim in &lineup.victims {
                info!(machine = %victim.machine, node = %victim.node, "destroying victim master");
                retry_async(self.policies.machine_delete, "delete-machine", || {
                    self.ctl.delete_machine(&victim.machine)
                })
                .await?;
            }
            Ok(())
        })
        .await?;

        // An API that still answers means the wrong machines were
        // deleted; restoring on top of a healthy cluster would destroy
        // it for real.
        let proof = rec
            .step("confirm-meltdown", async {
                sleep(self.config.meltdown_probe_delay()).await;
                if self.ctl.probe_api().await? {
                    return Err(RunbookError::MeltdownNotObserved.into());
                }
                info!("control plane is down as expected");
                Ok(MeltdownConfirmed(()))
            })
            .await?;

        rec.step("restore-survivor", self.restore_survivor(&lineup, &proof))
            .await?;

        rec.step(
            "wait-api-recovery",
            wait_until(
                "api-recovery",
                self.policies.api_recovery.max_attempts,
                self.policies.api_recovery.delay(),
                || self.ctl.probe_api(),
            ),
        )
        .await?;

        // Node networking holds stale flows from before the restore
        rec.step("restart-networking", async {
            retry_async(self.policies.api, "restart-networking", || {
                self.ctl
                    .delete_pods_by_selector(crate::SDN_NAMESPACE, crate::SDN_POD_SELECTOR, false)
            })
            .await
        })
        .await?;

        rec.step("await-machine-api", async {
            retry_async(self.policies.api, "machine-api", || self.ctl.master_machines()).await?;
            Ok(())
        })
        .await?;

        rec.step("clone-survivor-machine", async {
            let template = self.ctl.machine_manifest(&lineup.survivor_machine).await?;
            let (prefix, survivor_index) = split_machine_name(&lineup.survivor_machine)?;
            for index in replacement_indices(survivor_index, lineup.victims.len()) {
                let manifest = clone_machine_manifest(&template, prefix, index);
                let rendered = serde_json::to_string(&manifest)?;
                let created = retry_async(self.policies.machine_create, "create-machine", || {
                    self.ctl
                        .apply_manifest(Some(crate::MACHINE_API_NAMESPACE), &rendered)
                })
                .await;
                if let Err(e) = created {
                    // The controller may have accepted an attempt that
                    // timed out on our side; the address watch below is
                    // the real gate
                    warn!(machine = %format!("{prefix}-{index}"), error = ?e, "machine create unresolved, continuing");
                }
            }
            Ok(())
        })
        .await?;

        let member_ips = rec
            .step("wait-machine-addresses", async {
                let expected = lineup.expected_masters;
                let mut observed = 0;
                for attempt in 1..=self.config.machine_wait_attempts {
                    let machines = self.ctl.master_machines().await?;
                    let ips: Vec<String> =
                        machines.iter().filter_map(|m| m.internal_ip.clone()).collect();
                    observed = ips.len();
                    if observed == expected {
                        return Ok(ips);
                    }
                    debug!(attempt, observed, expected, "machines still waiting for addresses");
                    if attempt < self.config.machine_wait_attempts {
                        sleep(self.config.machine_wait_delay()).await;
                    }
                }
                Err(RunbookError::MachineCount {
                    expected,
                    actual: observed,
                }
                .into())
            })
            .await?;

        rec.step("wait-node-join", async {
            let expected = lineup.expected_masters;
            let mut observed = 0;
            for attempt in 1..=self.config.node_wait_attempts {
                observed = self.ctl.master_nodes().await?.len();
                if observed == expected {
                    return Ok(());
                }
                debug!(attempt, observed, expected, "replacement nodes still joining");
                if attempt < self.config.node_wait_attempts {
                    sleep(self.config.node_wait_delay()).await;
                }
            }
            Err(RunbookError::NodeCount {
                expected,
                actual: observed,
            }
            .into())
        })
        .await?;

        // Member discovery records must point at the replacement
        // machines before their etcd pods come up.
        rec.step("update-member-dns", async {
            let api_url = self.ctl.api_server_url().await?;
            let domain = domain_from_api_url(&api_url).ok_or_else(|| {
                Error::Fatal(format!("cannot derive base domain from API url `{api_url}`"))
            })?;
            for (index, ip) in member_ips.iter().enumerate() {
                let fqdn = format!("etcd-{index}.{domain}");
                self.dns
                    .upsert_a(&domain, &fqdn, ip, self.config.dns_ttl_secs)
                    .await?;
            }
            Ok(())
        })
        .await?;

        rec.step("run-cert-signer", async {
            let manifest = SIGNER_POD_TEMPLATE
                .replace(HOSTNAME_PLACEHOLDER, short_hostname(&lineup.survivor_node));
            retry_async(self.policies.api, "create-signer", || {
                self.ctl.apply_manifest(None, &manifest)
            })
            .await?;
            wait_until(
                "signer-pod",
                self.policies.api.max_attempts,
                self.policies.api.delay(),
                || self.ctl.pod_exists(crate::SIGNER_NAMESPACE, crate::SIGNER_POD),
            )
            .await?;
            let ready = self
                .ctl
                .wait_pod_ready(
                    crate::SIGNER_NAMESPACE,
                    crate::SIGNER_POD,
                    self.config.pod_ready_wait(),
                )
                .await?;
            if !ready {
                return Err(RunbookError::Verification {
                    step: "run-cert-signer",
                    expected: "Ready".into(),
                    actual: format!(
                        "pod `{}` not Ready within {}s",
                        crate::SIGNER_POD,
                        self.config.pod_ready_wait_secs
                    ),
                }
                .into());
            }
            Ok(())
        })
        .await?;

        let images = rec
            .step("collect-release-images", async {
                let setup_env = self.ctl.release_image_for("setup-etcd-environment").await?;
                let client_agent = self.ctl.release_image_for("kube-client-agent").await?;
                info!(%setup_env, %client_agent, "recovery images resolved");
                Ok((setup_env, client_agent))
            })
            .await?;

        let member_hosts = rec
            .step("regrow-members", async {
                let survivor_ip = self.ctl.node_internal_ip(&lineup.survivor_node).await?;
                let machines = self.ctl.master_machines().await?;
                let mut hosts = Vec::with_capacity(machines.len());
                for machine in &machines {
                    let Some(host) = machine.internal_dns.clone() else {
                        return Err(RunbookError::RemoteOp {
                            node: machine.name.clone(),
                            detail: "machine has no internal DNS name".into(),
                        }
                        .into());
                    };
                    hosts.push(host);
                }
                for host in &hosts {
                    if *host == lineup.survivor_node {
                        continue;
                    }
                    info!(%host, "regrowing consensus member");
                    // The member name expands on the node itself, so each
                    // recruit reports its own fqdn
                    let script = format!(
                        "sudo -i env SETUP_ETCD_ENVIRONMENT={setup} KUBE_CLIENT_AGENT={agent} /bin/bash -x {recover} {survivor_ip} etcd-member-$(hostname -f)",
                        setup = images.0,
                        agent = images.1,
                        recover = crate::ETCD_MEMBER_RECOVER_SCRIPT,
                    );
                    remote_ok(host, self.shell.run_on(host, &script).await?)?;
                }
                Ok(hosts)
            })
            .await?;

        rec.step("wait-members-ready", async {
            for host in &member_hosts {
                let pod = format!("etcd-member-{host}");
                wait_until(
                    "member-pod",
                    self.policies.api.max_attempts,
                    self.policies.api.delay(),
                    || self.ctl.pod_exists(crate::ETCD_NAMESPACE, &pod),
                )
                .await?;
                let ready = self
                    .ctl
                    .wait_pod_ready(crate::ETCD_NAMESPACE, &pod, self.config.pod_ready_wait())
                    .await?;
                if !ready {
                    return Err(RunbookError::Verification {
                        step: "wait-members-ready",
                        expected: "Ready".into(),
                        actual: format!(
                            "pod `{pod}` not Ready within {}s",
                            self.config.pod_ready_wait_secs
                        ),
                    }
                    .into());
                }
            }
            Ok(())
        })
        .await?;

        rec.step("cleanup", async {
            retry_async(self.policies.api, "remove-bastion", || {
                self.ctl.delete_project(crate::SSH_BASTION_NAMESPACE)
            })
            .await?;
            self.ctl
                .delete_pod(crate::SIGNER_NAMESPACE, crate::SIGNER_POD)
                .await?;
            retry_async(self.policies.api, "restore-quorum-guard", || {
                self.ctl.scale(
                    crate::QUORUM_GUARD_NAMESPACE,
                    crate::QUORUM_GUARD_DEPLOYMENT,
                    lineup.expected_masters as u32,
                )
            })
            .await?;
            // Quiet period so alerts stop firing before the suite starts
            sleep(self.config.settle()).await;
            Ok(())
        })
        .await?;

        Ok(())
    }

    async fn restore_survivor(
        &self,
        lineup: &Lineup,
        _proof: &MeltdownConfirmed,
    ) -> Result<()> {
        let script = format!(
            "sudo -i /bin/bash -x {restore} {snapshot} $(cat /tmp/etcd_connstring)",
            restore = crate::ETCD_RESTORE_SCRIPT,
            snapshot = crate::ETCD_MEMBER_SNAP_DB,
        );
        remote_ok(
            &lineup.survivor_node,
            self.shell.run_on(&lineup.survivor_node, &script).await?,
        )?;
        Ok(())
    }
}

/// Extracts the cluster base domain from the API server URL,
/// `https://api.gg.example.com:6443` yielding `gg.example.com`.
pub(crate) fn domain_from_api_url(url: &str) -> Option<String> {
    let after = url.split_once("api.")?.1;
    let end = after
        .find(|c| c == ':' || c == '/')
        .unwrap_or(after.len());
    if end == 0 {
        return None;
    }
    Some(after[..end].to_string())
}
