use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::HarnessConfig;
use crate::exec::MockProcessRunner;
use crate::exec::ProcessOutput;
use crate::signals::MemorySignalBoard;
use crate::signals::Signal;
use crate::signals::SignalBoard;
use crate::test_utils::enable_logger;
use crate::CoordinationError;
use crate::Error;

fn output(status: i32) -> ProcessOutput {
    ProcessOutput {
        status,
        stdout: Vec::new(),
        stderr: b"bootstrap wait timed out".to_vec(),
    }
}

async fn config_with_profile(
    root: &Path,
    profile_dir: &Path,
) -> HarnessConfig {
    tokio::fs::write(profile_dir.join("pull-secret"), r#"{"auths":{}}"#).await.unwrap();
    tokio::fs::write(profile_dir.join("ssh-publickey"), "ssh-rsa AAAA ci").await.unwrap();

    let mut config = HarnessConfig::default();
    config.cluster.cluster_name = "ci-op-x7k2".into();
    config.cluster.release_image = "registry.ci/ocp/release:4.6".into();
    config.cluster.suite_command = Some("openshift-tests run".into());
    config.cluster.profile_dir = profile_dir.to_path_buf();
    config.artifacts.root = root.to_path_buf();
    config
}

#[tokio::test(start_paused = true)]
async fn peer_exit_stops_setup_within_one_poll() {
    enable_logger();
    let board = Arc::new(MemorySignalBoard::new());
    let mut runner = MockProcessRunner::new();
    runner.expect_run().times(0);
    let config = HarnessConfig::default();
    let poll = config.signals.poll_interval();
    let phase = Arc::new(SetupPhase::new(board.clone(), Arc::new(runner), config));

    let handle = tokio::spawn({
        let phase = phase.clone();
        async move { phase.run(&CancellationToken::new()).await }
    });

    // Let the phase park on the board first, then end the run
    tokio::time::sleep(Duration::from_secs(5)).await;
    board.raise(Signal::Exit).await.unwrap();

    let noticed = tokio::time::Instant::now();
    let err = handle.await.unwrap().unwrap_err();
    assert!(noticed.elapsed() <= poll);

    assert!(matches!(
        err,
        Error::Coordination(CoordinationError::PeerExited { observer: "setup" })
    ));
}

#[tokio::test(start_paused = true)]
#[serial]
async fn renders_the_install_config_and_raises_success() {
    enable_logger();
    let root = tempfile::tempdir().unwrap();
    let profile = tempfile::tempdir().unwrap();
    let home = tempfile::tempdir().unwrap();
    let config = config_with_profile(root.path(), profile.path()).await;

    let board = Arc::new(MemorySignalBoard::new());
    board.raise(Signal::Leased).await.unwrap();

    let mut runner = MockProcessRunner::new();
    runner
        .expect_run()
        .withf(|spec| {
            spec.program == "openshift-install"
                && spec.args.contains(&"create".to_string())
                && spec.args.contains(&"cluster".to_string())
                && spec.envs.contains(&(
                    "OPENSHIFT_INSTALL_RELEASE_IMAGE_OVERRIDE".to_string(),
                    "registry.ci/ocp/release:4.6".to_string(),
                ))
        })
        .times(1)
        .returning(|_| Ok(output(0)));

    let phase = SetupPhase::new(board.clone(), Arc::new(runner), config);
    temp_env::async_with_vars(
        [("HOME", Some(home.path().as_os_str()))],
        phase.run(&CancellationToken::new()),
    )
    .await
    .unwrap();

    assert!(board.is_raised(Signal::SetupSuccess).await.unwrap());
    let rendered =
        tokio::fs::read_to_string(root.path().join("installer/install-config.yaml")).await.unwrap();
    assert!(rendered.contains("name: ci-op-x7k2"));
    assert!(rendered.contains("region: us-east-1"));
    assert!(rendered.contains(r#"{"auths":{}}"#));
}

#[tokio::test(start_paused = true)]
#[serial]
async fn installer_failure_raises_exit_instead_of_success() {
    enable_logger();
    let root = tempfile::tempdir().unwrap();
    let profile = tempfile::tempdir().unwrap();
    let home = tempfile::tempdir().unwrap();
    let config = config_with_profile(root.path(), profile.path()).await;

    let board = Arc::new(MemorySignalBoard::new());
    board.raise(Signal::Leased).await.unwrap();

    let mut runner = MockProcessRunner::new();
    runner.expect_run().returning(|_| Ok(output(1)));

    let phase = SetupPhase::new(board.clone(), Arc::new(runner), config);
    let err = temp_env::async_with_vars(
        [("HOME", Some(home.path().as_os_str()))],
        phase.run(&CancellationToken::new()),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::System(_)));
    assert!(board.is_raised(Signal::Exit).await.unwrap());
    assert!(!board.is_raised(Signal::SetupSuccess).await.unwrap());
}
