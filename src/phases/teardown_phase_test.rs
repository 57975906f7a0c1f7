use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::cluster::MockClusterCtl;
use crate::config::HarnessConfig;
use crate::exec::CommandSpec;
use crate::exec::ProcessOutput;
use crate::exec::ProcessRunner;
use crate::signals::MemorySignalBoard;
use crate::signals::Signal;
use crate::signals::SignalBoard;
use crate::test_utils::enable_logger;
use crate::Result;

/// Runner that records every spec and answers all of them with success.
struct RecordingRunner {
    specs: Mutex<Vec<CommandSpec>>,
}

impl RecordingRunner {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            specs: Mutex::new(Vec::new()),
        })
    }

    fn specs(&self) -> Vec<CommandSpec> {
        self.specs.lock().clone()
    }

    fn programs(&self) -> Vec<String> {
        self.specs.lock().iter().map(|s| s.program.clone()).collect()
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(
        &self,
        spec: CommandSpec,
    ) -> Result<ProcessOutput> {
        self.specs.lock().push(spec);
        Ok(ProcessOutput {
            status: 0,
            stdout: b"{}".to_vec(),
            stderr: Vec::new(),
        })
    }
}

fn config_at(root: &Path) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.cluster.cluster_name = "ci-op-x7k2".into();
    config.artifacts.root = root.to_path_buf();
    config
}

fn quiet_ctl() -> MockClusterCtl {
    let mut ctl = MockClusterCtl::new();
    ctl.expect_node_names().returning(|| Ok(vec!["master-0".to_string()]));
    ctl.expect_pods_by_selector().returning(|_, _| Ok(Vec::new()));
    ctl.expect_all_pod_containers().returning(|| Ok(Vec::new()));
    ctl
}

#[tokio::test(start_paused = true)]
async fn gathers_evidence_before_destroying_the_cluster() {
    enable_logger();
    let root = tempfile::tempdir().unwrap();
    let runner = RecordingRunner::new();
    let board = Arc::new(MemorySignalBoard::new());
    board.raise(Signal::Exit).await.unwrap();

    let phase = TeardownPhase::new(
        board,
        runner.clone(),
        Arc::new(quiet_ctl()),
        config_at(root.path()),
    );
    phase.run(&CancellationToken::new()).await.unwrap();

    let specs = runner.specs();
    let destroy = specs.last().unwrap();
    assert_eq!(destroy.program, "openshift-install");
    assert!(destroy.args.contains(&"destroy".to_string()));
    assert!(destroy.envs.iter().any(|(k, _)| k == "AWS_SHARED_CREDENTIALS_FILE"));
    assert!(specs
        .iter()
        .any(|s| s.program == "oc" && s.args.contains(&"clusteroperators".to_string())));
    assert!(root.path().join("clusteroperators.json").is_file());
}

#[tokio::test(start_paused = true)]
async fn missing_exit_flag_never_blocks_teardown() {
    enable_logger();
    let root = tempfile::tempdir().unwrap();
    let runner = RecordingRunner::new();
    let board = Arc::new(MemorySignalBoard::new());

    let mut config = config_at(root.path());
    config.signals.exit_wait_attempts = 2;
    config.signals.exit_wait_secs = 1;

    let phase = TeardownPhase::new(board.clone(), runner.clone(), Arc::new(quiet_ctl()), config);
    phase.run(&CancellationToken::new()).await.unwrap();

    // Teardown raises the flag itself so a stuck peer unwinds too
    assert!(board.is_raised(Signal::Exit).await.unwrap());
    assert!(runner.programs().contains(&"openshift-install".to_string()));
}

#[tokio::test(start_paused = true)]
async fn deprovision_can_be_switched_off() {
    enable_logger();
    let root = tempfile::tempdir().unwrap();
    let runner = RecordingRunner::new();
    let board = Arc::new(MemorySignalBoard::new());
    board.raise(Signal::Exit).await.unwrap();

    let mut config = config_at(root.path());
    config.artifacts.deprovision = false;

    let phase = TeardownPhase::new(board, runner.clone(), Arc::new(quiet_ctl()), config);
    phase.run(&CancellationToken::new()).await.unwrap();

    assert!(!runner.programs().contains(&"openshift-install".to_string()));
}

#[tokio::test(start_paused = true)]
async fn bootstrap_evidence_is_gathered_while_the_host_lives() {
    enable_logger();
    let root = tempfile::tempdir().unwrap();
    let config = config_at(root.path());
    let install_dir = config.artifacts.install_dir();
    tokio::fs::create_dir_all(&install_dir).await.unwrap();
    tokio::fs::write(
        install_dir.join("terraform.tfstate"),
        r#"{"modules":[{"resources":{"aws_instance.bootstrap":{"primary":{"attributes":{"public_ip":"1.2.3.4"}}}}}]}"#,
    )
    .await
    .unwrap();

    let runner = RecordingRunner::new();
    let board = Arc::new(MemorySignalBoard::new());
    board.raise(Signal::Exit).await.unwrap();

    let phase = TeardownPhase::new(board, runner.clone(), Arc::new(quiet_ctl()), config);
    phase.run(&CancellationToken::new()).await.unwrap();

    let specs = runner.specs();
    assert!(specs.iter().any(|s| {
        s.program == "ssh"
            && s.args.contains(&"/usr/local/bin/installer-gather.sh".to_string())
    }));
    assert!(specs.iter().any(|s| s.program == "scp"));
    assert!(specs
        .iter()
        .any(|s| s.program == "curl" && s.args.iter().any(|a| a.contains("1.2.3.4:19531"))));
}
