//! Fleet-config rollback drill: plant a marker machine config, snapshot
//! the consensus store, mutate the marker, restore the snapshot and prove
//! the mutation was rolled back on the API and on every master's disk.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use serde_json::Value;
use tracing::info;

use crate::cluster::machines::assemble_connstring;
use crate::cluster::machines::MemberEndpoint;
use crate::cluster::ClusterCtl;
use crate::cluster::NodeShell;
use crate::config::RunbookConfig;
use crate::exec::wait_until;
use crate::exec::ProcessOutput;
use crate::runbook::remote_ok;
use crate::runbook::wait_for_pool_rollout;
use crate::runbook::RunbookReport;
use crate::runbook::StepRecorder;
use crate::Result;
use crate::RunbookError;

/// Prints the member name and peer URL on separate lines; the peer URL
/// only exists in the member's runtime environment file.
const MEMBER_ENDPOINT_SCRIPT: &str = r#"echo "etcd-member-$(hostname -f)" && source /run/etcd/environment && echo "https://${ETCD_DNS_NAME}:2380""#;

pub struct RollbackRunbook {
    ctl: Arc<dyn ClusterCtl>,
    shell: Arc<dyn NodeShell>,
    config: RunbookConfig,
    ssh_key: PathBuf,
}

impl RollbackRunbook {
    pub const NAME: &'static str = "restore-cluster-state";

    pub fn new(
        ctl: Arc<dyn ClusterCtl>,
        shell: Arc<dyn NodeShell>,
        config: RunbookConfig,
        ssh_key: PathBuf,
    ) -> Self {
        Self {
            ctl,
            shell,
            config,
            ssh_key,
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
        rec.step("create-marker-config", async {
            self.ctl
                .apply_manifest(None, &marker_machine_config())
                .await
        })
        .await?;

        rec.step(
            "wait-marker-rollout",
            wait_for_pool_rollout(self.ctl.as_ref(), crate::MASTER_POOL, &self.config),
        )
        .await?;

        rec.step("prepare-bastion", self.shell.ensure_ready()).await?;

        let masters = rec
            .step("list-masters", async {
                let nodes = self.ctl.master_nodes().await?;
                if nodes.is_empty() {
                    return Err(
                        RunbookError::NoSurvivor("no master nodes reported".into()).into()
                    );
                }
                Ok(nodes.into_iter().map(|n| n.name).collect::<Vec<_>>())
            })
            .await?;
        let first_master = masters[0].clone();
        info!(?masters, %first_master, "master line-up");

        // The backup lands on the first master; it is fanned out to the
        // others before the restore.
        rec.step("snapshot-consensus-store", async {
            let script = format!(
                "sudo -i /bin/bash -x {script} {backup} && sudo -i cp {backup} {staging} && sudo -i chown core:core {staging}",
                script = crate::ETCD_BACKUP_SCRIPT,
                backup = crate::ETCD_BACKUP_PATH,
                staging = crate::ETCD_SNAPSHOT_STAGING,
            );
            remote_ok(&first_master, self.shell.run_on(&first_master, &script).await?)?;
            Ok(())
        })
        .await?;

        rec.step("mutate-marker-config", async {
            self.ctl
                .patch_machine_config(crate::ROLLBACK_MARKER_CONFIG, &marker_patch())
                .await
        })
        .await?;

        rec.step(
            "wait-mutation-rollout",
            wait_for_pool_rollout(self.ctl.as_ref(), crate::MASTER_POOL, &self.config),
        )
        .await?;

        rec.step("distribute-snapshot", async {
            for master in &masters {
                self.shell
                    .upload(master, &self.ssh_key, "/home/core/.ssh/id_rsa")
                    .await?;
                remote_ok(
                    master,
                    self.shell
                        .run_on(master, "chmod 0600 /home/core/.ssh/id_rsa")
                        .await?,
                )?;
            }
            for master in &masters {
                let script = format!(
                    "scp -o StrictHostKeyChecking=no {staging} core@{master}:{staging}",
                    staging = crate::ETCD_SNAPSHOT_STAGING,
                );
                remote_ok(
                    &first_master,
                    self.shell.run_on(&first_master, &script).await?,
                )?;
            }
            Ok(())
        })
        .await?;

        let members = rec
            .step("collect-member-endpoints", async {
                let mut members = Vec::with_capacity(masters.len());
                for master in &masters {
                    let output = remote_ok(
                        master,
                        self.shell.run_on(master, MEMBER_ENDPOINT_SCRIPT).await?,
                    )?;
                    members.push(parse_member_endpoint(master, &output)?);
                }
                Ok(members)
            })
            .await?;

        rec.step("restore-consensus-store", async {
            let connstring = assemble_connstring(&members);
            info!(%connstring, "restoring consensus store on every master");
            for master in &masters {
                remote_ok(
                    master,
                    self.shell
                        .run_on(master, &format!("echo '{connstring}' > /tmp/etcd_connstring"))
                        .await?,
                )?;
                let script = format!(
                    "sudo -i /bin/bash -x {script} {staging} $(cat /tmp/etcd_connstring)",
                    script = crate::ETCD_RESTORE_SCRIPT,
                    staging = crate::ETCD_SNAPSHOT_STAGING,
                );
                remote_ok(master, self.shell.run_on(master, &script).await?)?;
            }
            Ok(())
        })
        .await?;

        rec.step(
            "wait-api-recovery",
            wait_until(
                "api-recovery",
                self.config.api_probe_attempts,
                self.config.api_probe_delay(),
                || self.ctl.probe_api(),
            ),
        )
        .await?;

        rec.step(
            "wait-config-operator",
            wait_until(
                "config-operator",
                self.config.api_probe_attempts,
                self.config.api_probe_delay(),
                || self.ctl.pool_exists(crate::MASTER_POOL),
            ),
        )
        .await?;

        rec.step(
            "wait-config-rollout",
            wait_for_pool_rollout(self.ctl.as_ref(), crate::MASTER_POOL, &self.config),
        )
        .await?;

        rec.step("wait-apiservers", async {
            for master in &masters {
                let pod = format!("kube-apiserver-{master}");
                let ready = self
                    .ctl
                    .wait_pod_ready(
                        crate::KUBE_APISERVER_NAMESPACE,
                        &pod,
                        self.config.pod_ready_wait(),
                    )
                    .await?;
                if !ready {
                    return Err(RunbookError::Verification {
                        step: "wait-apiservers",
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

        rec.step("verify-marker-config", async {
            let expected = format!("data:,{}", crate::ROLLBACK_MARKER_BEFORE);
            let actual = self
                .ctl
                .machine_config_file_source(crate::ROLLBACK_MARKER_CONFIG)
                .await?;
            if actual != expected {
                return Err(RunbookError::Verification {
                    step: "verify-marker-config",
                    expected,
                    actual,
                }
                .into());
            }
            Ok(())
        })
        .await?;

        rec.step("verify-marker-files", async {
            for master in &masters {
                let script = format!("sudo -i cat {}", crate::ROLLBACK_MARKER_PATH);
                let output = remote_ok(master, self.shell.run_on(master, &script).await?)?;
                let actual = output.stdout_utf8();
                if actual != crate::ROLLBACK_MARKER_BEFORE {
                    return Err(RunbookError::Verification {
                        step: "verify-marker-files",
                        expected: crate::ROLLBACK_MARKER_BEFORE.to_string(),
                        actual: format!("`{actual}` on {master}"),
                    }
                    .into());
                }
            }
            Ok(())
        })
        .await?;

        rec.step("cleanup", async {
            self.ctl.delete_project(crate::SSH_BASTION_NAMESPACE).await?;
            self.ctl
                .delete_all_pods(crate::OPENSHIFT_APISERVER_NAMESPACE)
                .await
        })
        .await?;

        Ok(())
    }
}

fn marker_machine_config() -> String {
    format!(
        r#"apiVersion: machineconfiguration.openshift.io/v1
kind: MachineConfig
metadata:
  labels:
    machineconfiguration.openshift.io/role: {pool}
  name: {name}
spec:
  config:
    ignition:
      version: 2.2.0
    storage:
      files:
      - contents:
          source: data:,{marker}
        filesystem: root
        mode: 420
        path: {path}
"#,
        pool = crate::MASTER_POOL,
        name = crate::ROLLBACK_MARKER_CONFIG,
        marker = crate::ROLLBACK_MARKER_BEFORE,
        path = crate::ROLLBACK_MARKER_PATH,
    )
}

fn marker_patch() -> Value {
    json!({
        "spec": {
            "config": {
                "storage": {
                    "files": [{
                        "contents": {
                            "source": format!("data:,{}", crate::ROLLBACK_MARKER_AFTER),
                            "verification": {}
                        },
                        "filesystem": "root",
                        "mode": 420,
                        "path": crate::ROLLBACK_MARKER_PATH
                    }]
                }
            }
        }
    })
}

fn parse_member_endpoint(
    node: &str,
    output: &ProcessOutput,
) -> Result<MemberEndpoint> {
    let stdout = output.stdout_utf8();
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    match (lines.next(), lines.next()) {
        (Some(name), Some(peer_url)) => Ok(MemberEndpoint {
            name: name.to_string(),
            peer_url: peer_url.to_string(),
        }),
        _ => Err(RunbookError::RemoteOp {
            node: node.to_string(),
            detail: format!("unexpected member endpoint output: `{stdout}`"),
        }
        .into()),
    }
}
