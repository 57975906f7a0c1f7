use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::*;
use crate::config::RetryPolicy;
use crate::exec::CommandSpec;
use crate::exec::MockProcessRunner;
use crate::exec::ProcessOutput;
use crate::test_utils::enable_logger;

fn output(status: i32) -> ProcessOutput {
    ProcessOutput {
        status,
        stdout: Vec::new(),
        stderr: Vec::new(),
    }
}

fn fast_policy(max_attempts: usize) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        delay_ms: 10_000,
    }
}

/// Runner that pops a scripted exit status per call and records the argv.
fn scripted_runner(
    statuses: Vec<i32>,
    calls: Arc<Mutex<Vec<CommandSpec>>>,
) -> MockProcessRunner {
    let mut runner = MockProcessRunner::new();
    let queue = Mutex::new(VecDeque::from(statuses));
    runner.expect_run().returning(move |spec| {
        calls.lock().push(spec);
        let status = queue.lock().pop_front().unwrap_or(0);
        Ok(output(status))
    });
    runner
}

fn shell_with_host(
    runner: MockProcessRunner,
    policy: RetryPolicy,
) -> BastionShell {
    let mut ctl = MockClusterCtl::new();
    ctl.expect_service_ingress_hostname()
        .returning(|_, _| Ok(Some("bastion.elb.example.com".to_string())));
    BastionShell::new(
        Arc::new(runner),
        Arc::new(ctl),
        "/tmp/admin.kubeconfig",
        "/tmp/cluster/ssh-privatekey",
        "core",
        policy,
    )
}

#[tokio::test(start_paused = true)]
async fn remote_exit_codes_pass_through_without_redial() {
    enable_logger();
    let calls = Arc::new(Mutex::new(Vec::new()));
    // First scripted status feeds the deploy script
    let shell = shell_with_host(scripted_runner(vec![0, 3], calls.clone()), fast_policy(60));
    shell.ensure_ready().await.unwrap();
    let deploys = calls.lock().len();

    let out = shell.run_on("master-0", "sudo -i cat /etc/rollback-test").await.unwrap();

    assert_eq!(out.status, 3);
    assert_eq!(calls.lock().len() - deploys, 1);
}

#[tokio::test(start_paused = true)]
async fn transport_failures_redial_until_the_remote_answers() {
    enable_logger();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let shell = shell_with_host(
        scripted_runner(vec![0, 255, 255, 0], calls.clone()),
        fast_policy(60),
    );
    shell.ensure_ready().await.unwrap();
    let deploys = calls.lock().len();

    let out = shell.run_on("master-0", "true").await.unwrap();

    assert_eq!(out.status, 0);
    assert_eq!(calls.lock().len() - deploys, 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_dial_budget_hands_back_the_transport_failure() {
    enable_logger();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let shell = shell_with_host(
        scripted_runner(vec![0, 255, 255, 255, 255], calls.clone()),
        fast_policy(3),
    );
    shell.ensure_ready().await.unwrap();
    let deploys = calls.lock().len();

    let out = shell.run_on("master-0", "true").await.unwrap();

    assert_eq!(out.status, 255);
    assert_eq!(calls.lock().len() - deploys, 3);
}

#[tokio::test(start_paused = true)]
async fn dialing_proxies_through_the_discovered_bastion() {
    enable_logger();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let shell = shell_with_host(scripted_runner(vec![0, 0], calls.clone()), fast_policy(60));
    shell.ensure_ready().await.unwrap();

    shell.run_on("master-0", "hostname -f").await.unwrap();

    let dial = calls.lock().last().cloned().unwrap();
    assert_eq!(dial.program, "ssh");
    let proxy = dial
        .args
        .iter()
        .find(|a| a.starts_with("ProxyCommand="))
        .cloned()
        .unwrap();
    assert!(proxy.contains("core@bastion.elb.example.com"), "got: {proxy}");
    assert!(proxy.contains("-W %h:%p"));
    assert_eq!(dial.args.last().unwrap(), "hostname -f");
    assert!(dial.args.contains(&"core@master-0".to_string()));
}

#[tokio::test(start_paused = true)]
async fn bastion_deploys_once_and_caches_the_hostname() {
    enable_logger();
    let lookups = Arc::new(Mutex::new(0usize));
    let lookups_in_mock = lookups.clone();
    let mut ctl = MockClusterCtl::new();
    ctl.expect_service_ingress_hostname().returning(move |namespace, service| {
        assert_eq!((namespace, service), ("openshift-ssh-bastion", "ssh-bastion"));
        let mut seen = lookups_in_mock.lock();
        *seen += 1;
        // Load balancer takes a couple of polls to surface
        if *seen < 3 {
            Ok(None)
        } else {
            Ok(Some("bastion.elb.example.com".to_string()))
        }
    });

    let deploys = Arc::new(Mutex::new(Vec::new()));
    let runner = scripted_runner(vec![0], deploys.clone());
    let shell = BastionShell::new(
        Arc::new(runner),
        Arc::new(ctl),
        "/tmp/admin.kubeconfig",
        "/tmp/cluster/ssh-privatekey",
        "core",
        fast_policy(60),
    );

    shell.ensure_ready().await.unwrap();
    shell.ensure_ready().await.unwrap();

    assert_eq!(*lookups.lock(), 3);
    let specs = deploys.lock();
    assert_eq!(specs.len(), 1, "deploy script must run exactly once");
    assert_eq!(specs[0].program, "bash");
}

#[tokio::test]
async fn shell_refuses_to_dial_before_deployment() {
    enable_logger();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let runner = scripted_runner(vec![], calls.clone());
    let ctl = MockClusterCtl::new();
    let shell = BastionShell::new(
        Arc::new(runner),
        Arc::new(ctl),
        "/tmp/admin.kubeconfig",
        "/tmp/cluster/ssh-privatekey",
        "core",
        fast_policy(60),
    );

    let err = shell.run_on("master-0", "true").await.unwrap_err();

    assert!(format!("{err}").contains("bastion"));
    assert!(calls.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_upload_surfaces_the_target() {
    enable_logger();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut runner = MockProcessRunner::new();
    {
        let calls = calls.clone();
        runner.expect_run().returning(move |spec| {
            let is_deploy = spec.program == "bash";
            calls.lock().push(spec);
            if is_deploy {
                Ok(output(0))
            } else {
                Ok(ProcessOutput {
                    status: 1,
                    stdout: Vec::new(),
                    stderr: b"scp: permission denied".to_vec(),
                })
            }
        });
    }
    let shell = shell_with_host(runner, fast_policy(60));
    shell.ensure_ready().await.unwrap();

    let err = shell
        .upload(
            "master-0",
            std::path::Path::new("/tmp/cluster/ssh-privatekey"),
            "/home/core/.ssh/id_rsa",
        )
        .await
        .unwrap_err();

    let rendered = format!("{err}");
    assert!(rendered.contains("master-0:/home/core/.ssh/id_rsa"), "got: {rendered}");
    assert_eq!(calls.lock().last().unwrap().program, "scp");
}
