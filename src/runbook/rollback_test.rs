use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::cluster::MockClusterCtl;
use crate::cluster::NodeRecord;
use crate::cluster::PoolCondition;
use crate::config::RunbookConfig;
use crate::runbook::wait_for_pool_rollout;
use crate::runbook::RollbackRunbook;
use crate::runbook::StepStatus;
use crate::test_utils::enable_logger;
use crate::test_utils::remote_output;
use crate::test_utils::ScriptedShell;
use crate::Error;
use crate::RunbookError;

/// Everything the scripted control plane was asked to change.
#[derive(Default)]
struct CtlLog {
    manifests: Mutex<Vec<String>>,
    patches: Mutex<Vec<Value>>,
    deleted_projects: Mutex<Vec<String>>,
    purged_namespaces: Mutex<Vec<String>>,
    marker_source: Mutex<String>,
}

impl CtlLog {
    fn with_marker_source(source: &str) -> Arc<Self> {
        let log = Arc::new(Self::default());
        *log.marker_source.lock() = source.to_string();
        log
    }
}

fn three_masters() -> Vec<NodeRecord> {
    ["m0", "m1", "m2"]
        .iter()
        .map(|n| NodeRecord {
            name: n.to_string(),
            ready: true,
        })
        .collect()
}

fn scripted_ctl(log: &Arc<CtlLog>) -> MockClusterCtl {
    let mut ctl = MockClusterCtl::new();
    ctl.expect_apply_manifest().returning({
        let log = log.clone();
        move |namespace, manifest| {
            assert!(namespace.is_none());
            log.manifests.lock().push(manifest.to_string());
            Ok(())
        }
    });
    ctl.expect_wait_pool_condition()
        .returning(|_, _, _| Ok(true));
    ctl.expect_master_nodes().returning(|| Ok(three_masters()));
    ctl.expect_patch_machine_config().returning({
        let log = log.clone();
        move |name, patch| {
            assert_eq!(name, "99-rollback-test");
            log.patches.lock().push(patch.clone());
            Ok(())
        }
    });
    ctl.expect_probe_api().returning(|| Ok(true));
    ctl.expect_pool_exists().returning(|_| Ok(true));
    ctl.expect_wait_pod_ready().returning(|_, _, _| Ok(true));
    ctl.expect_machine_config_file_source().returning({
        let log = log.clone();
        move |_| Ok(log.marker_source.lock().clone())
    });
    ctl.expect_delete_project().returning({
        let log = log.clone();
        move |name| {
            log.deleted_projects.lock().push(name.to_string());
            Ok(())
        }
    });
    ctl.expect_delete_all_pods().returning({
        let log = log.clone();
        move |namespace| {
            log.purged_namespaces.lock().push(namespace.to_string());
            Ok(())
        }
    });
    ctl
}

fn member_shell() -> ScriptedShell {
    ScriptedShell::new()
        .respond_on(
            "m0",
            "/run/etcd/environment",
            remote_output(0, "etcd-member-m0.internal\nhttps://etcd-0.gg.example.com:2380\n"),
        )
        .respond_on(
            "m1",
            "/run/etcd/environment",
            remote_output(0, "etcd-member-m1.internal\nhttps://etcd-1.gg.example.com:2380\n"),
        )
        .respond_on(
            "m2",
            "/run/etcd/environment",
            remote_output(0, "etcd-member-m2.internal\nhttps://etcd-2.gg.example.com:2380\n"),
        )
}

fn drill(
    ctl: MockClusterCtl,
    shell: Arc<ScriptedShell>,
) -> RollbackRunbook {
    RollbackRunbook::new(
        Arc::new(ctl),
        shell,
        RunbookConfig::default(),
        PathBuf::from("/tmp/cluster/ssh-privatekey"),
    )
}

#[tokio::test(start_paused = true)]
async fn rollback_drill_runs_to_verified_completion() {
    enable_logger();
    let log = CtlLog::with_marker_source("data:,A");
    let shell = Arc::new(member_shell().respond("cat /etc/rollback-test", remote_output(0, "A\n")));

    let (report, outcome) = drill(scripted_ctl(&log), shell.clone()).run().await;

    assert!(outcome.is_ok(), "{outcome:?}");
    assert!(report.passed());
    let names: Vec<&str> = report.steps.iter().map(|s| s.name).collect();
    assert_eq!(
        names,
        vec![
            "create-marker-config",
            "wait-marker-rollout",
            "prepare-bastion",
            "list-masters",
            "snapshot-consensus-store",
            "mutate-marker-config",
            "wait-mutation-rollout",
            "distribute-snapshot",
            "collect-member-endpoints",
            "restore-consensus-store",
            "wait-api-recovery",
            "wait-config-operator",
            "wait-config-rollout",
            "wait-apiservers",
            "verify-marker-config",
            "verify-marker-files",
            "cleanup",
        ]
    );

    let manifests = log.manifests.lock();
    assert_eq!(manifests.len(), 1);
    assert!(manifests[0].contains("name: 99-rollback-test"));
    assert!(manifests[0].contains("source: data:,A"));
    assert!(manifests[0].contains("path: /etc/rollback-test"));

    let patches = log.patches.lock();
    assert_eq!(patches.len(), 1);
    assert_eq!(
        patches[0]["spec"]["config"]["storage"]["files"][0]["contents"]["source"],
        "data:,B"
    );

    // The backup runs on the first master only, then fans out from there
    let backups = shell.calls_matching("etcd-snapshot-backup.sh");
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].0, "m0");
    assert_eq!(shell.uploads().len(), 3);
    let fanout = shell.calls_matching("scp -o StrictHostKeyChecking=no");
    assert_eq!(fanout.len(), 3);
    assert!(fanout.iter().all(|(node, _)| node == "m0"));

    // Every master restores against the same assembled member list
    let writes = shell.calls_matching("> /tmp/etcd_connstring");
    assert_eq!(writes.len(), 3);
    let connstring = "etcd-member-m0.internal=https://etcd-0.gg.example.com:2380,\
                      etcd-member-m1.internal=https://etcd-1.gg.example.com:2380,\
                      etcd-member-m2.internal=https://etcd-2.gg.example.com:2380";
    assert!(writes[0].1.contains(connstring), "{}", writes[0].1);
    assert_eq!(shell.calls_matching("etcd-snapshot-restore.sh").len(), 3);

    assert_eq!(*log.deleted_projects.lock(), vec!["openshift-ssh-bastion"]);
    assert_eq!(*log.purged_namespaces.lock(), vec!["openshift-apiserver"]);
}

#[tokio::test(start_paused = true)]
async fn marker_file_with_mutated_value_fails_the_drill() {
    enable_logger();
    let log = CtlLog::with_marker_source("data:,A");
    // One master kept the mutated value on disk, so the restore did not
    // actually roll its filesystem back
    let shell = Arc::new(
        member_shell()
            .respond_on("m2", "cat /etc/rollback-test", remote_output(0, "B\n"))
            .respond("cat /etc/rollback-test", remote_output(0, "A\n")),
    );

    let (report, outcome) = drill(scripted_ctl(&log), shell.clone()).run().await;

    let err = outcome.unwrap_err();
    assert!(matches!(
        err,
        Error::Runbook(RunbookError::Verification {
            step: "verify-marker-files",
            ..
        })
    ));
    assert!(!report.passed());
    let last = report.steps.last().unwrap();
    assert_eq!(last.name, "verify-marker-files");
    assert_eq!(last.status, StepStatus::Failed);
    assert!(last.detail.as_ref().unwrap().contains("m2"));

    // The drill aborted before its cleanup step
    assert!(log.deleted_projects.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn marker_config_that_kept_the_mutation_fails_verification() {
    enable_logger();
    let log = CtlLog::with_marker_source("data:,B");
    let shell = Arc::new(member_shell().respond("cat /etc/rollback-test", remote_output(0, "A\n")));

    let (report, outcome) = drill(scripted_ctl(&log), shell).run().await;

    match outcome.unwrap_err() {
        Error::Runbook(RunbookError::Verification {
            step,
            expected,
            actual,
        }) => {
            assert_eq!(step, "verify-marker-config");
            assert_eq!(expected, "data:,A");
            assert_eq!(actual, "data:,B");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(report.steps.last().unwrap().name, "verify-marker-config");
}

#[tokio::test(start_paused = true)]
async fn pool_rollout_tolerates_a_missed_updating_phase() {
    enable_logger();
    let updating_polls = Arc::new(AtomicUsize::new(0));
    let mut ctl = MockClusterCtl::new();
    ctl.expect_wait_pool_condition().returning({
        let updating_polls = updating_polls.clone();
        move |_, condition, _| match condition {
            PoolCondition::Updating => {
                updating_polls.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            }
            PoolCondition::Updated => Ok(true),
        }
    });

    let config = RunbookConfig::default();
    wait_for_pool_rollout(&ctl, "master", &config).await.unwrap();

    // A pool that finished between polls never shows Updating; the full
    // budget is spent looking before moving on
    assert_eq!(updating_polls.load(Ordering::SeqCst), config.rollout_attempts);
}

#[tokio::test(start_paused = true)]
async fn pool_rollout_exhaustion_is_fatal() {
    enable_logger();
    let mut ctl = MockClusterCtl::new();
    ctl.expect_wait_pool_condition()
        .returning(|_, _, _| Ok(false));

    let mut config = RunbookConfig::default();
    config.rollout_attempts = 2;

    let err = wait_for_pool_rollout(&ctl, "master", &config)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Runbook(RunbookError::Exhausted {
            step: "pool-rollout",
            attempts: 2,
        })
    ));
}
