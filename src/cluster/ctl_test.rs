use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::exec::MockProcessRunner;
use crate::exec::ProcessOutput;
use crate::test_utils::enable_logger;

fn output(
    status: i32,
    stdout: &str,
) -> ProcessOutput {
    ProcessOutput {
        status,
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

fn ctl_with(runner: MockProcessRunner) -> OcClusterCtl {
    OcClusterCtl::new(Arc::new(runner), "/tmp/admin.kubeconfig")
}

#[tokio::test]
async fn probe_uses_short_request_timeout_and_reports_reachability() {
    enable_logger();
    let mut runner = MockProcessRunner::new();
    runner
        .expect_run()
        .withf(|spec| {
            spec.program == "oc"
                && spec.args == ["--request-timeout=5s", "get", "nodes"]
                && spec
                    .envs
                    .contains(&("KUBECONFIG".to_string(), "/tmp/admin.kubeconfig".to_string()))
        })
        .returning(|_| Ok(output(1, "")));

    assert!(!ctl_with(runner).probe_api().await.unwrap());
}

#[tokio::test]
async fn master_nodes_parse_names_and_readiness() {
    enable_logger();
    let nodes = json!({"items": [
        {"metadata": {"name": "master-0"},
         "status": {"conditions": [{"type": "Ready", "status": "True"}]}},
        {"metadata": {"name": "master-1"},
         "status": {"conditions": [{"type": "Ready", "status": "Unknown"}]}},
    ]});
    let mut runner = MockProcessRunner::new();
    runner
        .expect_run()
        .withf(|spec| {
            spec.args == ["get", "nodes", "-l", "node-role.kubernetes.io/master=", "-o", "json"]
        })
        .returning(move |_| Ok(output(0, &nodes.to_string())));

    let records = ctl_with(runner).master_nodes().await.unwrap();

    assert_eq!(
        records,
        vec![
            NodeRecord { name: "master-0".into(), ready: true },
            NodeRecord { name: "master-1".into(), ready: false },
        ]
    );
}

#[tokio::test]
async fn master_machines_report_addresses_when_present() {
    enable_logger();
    let machines = json!({"items": [
        {"metadata": {"name": "ci-op-master-0"},
         "status": {"addresses": [
             {"type": "InternalIP", "address": "10.0.1.2"},
             {"type": "InternalDNS", "address": "ip-10-0-1-2.ec2.internal"},
         ]}},
        {"metadata": {"name": "ci-op-master-1"}},
    ]});
    let mut runner = MockProcessRunner::new();
    runner
        .expect_run()
        .withf(|spec| {
            spec.args
                == [
                    "-n",
                    "openshift-machine-api",
                    "get",
                    "machines",
                    "-l",
                    "machine.openshift.io/cluster-api-machine-role=master",
                    "-o",
                    "json",
                ]
        })
        .returning(move |_| Ok(output(0, &machines.to_string())));

    let records = ctl_with(runner).master_machines().await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].internal_ip.as_deref(), Some("10.0.1.2"));
    assert_eq!(records[0].internal_dns.as_deref(), Some("ip-10-0-1-2.ec2.internal"));
    assert_eq!(records[1].internal_ip, None);
}

#[tokio::test]
async fn machine_annotation_is_stripped_of_its_namespace() {
    enable_logger();
    let node = json!({"metadata": {"annotations": {
        "machine.openshift.io/machine": "openshift-machine-api/ci-op-master-1"
    }}});
    let mut runner = MockProcessRunner::new();
    runner
        .expect_run()
        .returning(move |_| Ok(output(0, &node.to_string())));

    let name = ctl_with(runner)
        .node_machine_annotation("ip-10-0-1-2")
        .await
        .unwrap();

    assert_eq!(name, "ci-op-master-1");
}

#[tokio::test]
async fn apply_manifest_pipes_the_body_through_stdin() {
    enable_logger();
    let mut runner = MockProcessRunner::new();
    runner
        .expect_run()
        .withf(|spec| {
            spec.args == ["create", "-f", "-", "-n", "openshift-machine-api"]
                && spec.stdin.as_deref() == Some(b"kind: Machine\n".as_slice())
        })
        .returning(|_| Ok(output(0, "machine/m created")));

    ctl_with(runner)
        .apply_manifest(Some("openshift-machine-api"), "kind: Machine\n")
        .await
        .unwrap();
}

#[tokio::test]
async fn machine_deletion_carries_the_short_request_timeout() {
    enable_logger();
    let mut runner = MockProcessRunner::new();
    runner
        .expect_run()
        .withf(|spec| {
            spec.args
                == [
                    "--request-timeout=5s",
                    "-n",
                    "openshift-machine-api",
                    "delete",
                    "machine",
                    "ci-op-master-1",
                ]
        })
        .returning(|_| Ok(output(0, "")));

    ctl_with(runner).delete_machine("ci-op-master-1").await.unwrap();
}

#[tokio::test]
async fn config_file_source_digs_out_the_first_file() {
    enable_logger();
    let mc = json!({"spec": {"config": {"storage": {"files": [
        {"contents": {"source": "data:,A"}, "path": "/etc/rollback-test"}
    ]}}}});
    let mut runner = MockProcessRunner::new();
    runner
        .expect_run()
        .withf(|spec| spec.args == ["get", "machineconfig/99-rollback-test", "-o", "json"])
        .returning(move |_| Ok(output(0, &mc.to_string())));

    let source = ctl_with(runner)
        .machine_config_file_source("99-rollback-test")
        .await
        .unwrap();

    assert_eq!(source, "data:,A");
}

#[tokio::test]
async fn missing_service_reads_as_no_hostname() {
    enable_logger();
    let mut runner = MockProcessRunner::new();
    runner.expect_run().returning(|_| Ok(output(1, "")));

    let hostname = ctl_with(runner)
        .service_ingress_hostname("openshift-ssh-bastion", "ssh-bastion")
        .await
        .unwrap();

    assert_eq!(hostname, None);
}

#[tokio::test]
async fn provisioned_service_reports_its_ingress_hostname() {
    enable_logger();
    let svc = json!({"status": {"loadBalancer": {"ingress": [
        {"hostname": "abc.elb.amazonaws.com"}
    ]}}});
    let mut runner = MockProcessRunner::new();
    runner
        .expect_run()
        .returning(move |_| Ok(output(0, &svc.to_string())));

    let hostname = ctl_with(runner)
        .service_ingress_hostname("openshift-ssh-bastion", "ssh-bastion")
        .await
        .unwrap();

    assert_eq!(hostname.as_deref(), Some("abc.elb.amazonaws.com"));
}

#[tokio::test]
async fn container_listing_includes_init_containers() {
    enable_logger();
    let pods = json!({"items": [
        {"metadata": {"name": "etcd-member", "namespace": "openshift-etcd"},
         "spec": {
             "containers": [{"name": "etcd"}, {"name": "metrics"}],
             "initContainers": [{"name": "certs"}],
         }},
    ]});
    let mut runner = MockProcessRunner::new();
    runner
        .expect_run()
        .withf(|spec| spec.args == ["get", "pods", "--all-namespaces", "-o", "json"])
        .returning(move |_| Ok(output(0, &pods.to_string())));

    let refs = ctl_with(runner).all_pod_containers().await.unwrap();

    let containers: Vec<&str> = refs.iter().map(|r| r.container.as_str()).collect();
    assert_eq!(containers, ["etcd", "metrics", "certs"]);
    assert!(refs.iter().all(|r| r.pod == "etcd-member" && r.namespace == "openshift-etcd"));
}

#[tokio::test]
async fn pool_wait_formats_condition_and_timeout() {
    enable_logger();
    let mut runner = MockProcessRunner::new();
    runner
        .expect_run()
        .withf(|spec| {
            spec.args
                == [
                    "wait",
                    "machineconfigpool/master",
                    "--for=condition=Updated",
                    "--timeout=300s",
                ]
        })
        .returning(|_| Ok(output(0, "")));

    let settled = ctl_with(runner)
        .wait_pool_condition("master", PoolCondition::Updated, Duration::from_secs(300))
        .await
        .unwrap();

    assert!(settled);
}

#[tokio::test]
async fn failed_queries_surface_the_command_line() {
    enable_logger();
    let mut runner = MockProcessRunner::new();
    runner.expect_run().returning(|_| {
        Ok(ProcessOutput {
            status: 1,
            stdout: Vec::new(),
            stderr: b"error: the server doesn't have a resource type \"machines\"".to_vec(),
        })
    });

    let err = ctl_with(runner).master_machines().await.unwrap_err();

    let rendered = format!("{err}");
    assert!(rendered.contains("get machines"), "got: {rendered}");
}
