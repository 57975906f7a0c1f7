use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;

#[tokio::test]
async fn runner_captures_status_and_both_streams() {
    let runner = TokioProcessRunner::new(CancellationToken::new());
    let spec = CommandSpec::shell("echo out; echo err 1>&2; exit 3");

    let output = runner.run(spec).await.unwrap();

    assert_eq!(output.status, 3);
    assert!(!output.success());
    assert_eq!(output.stdout_utf8(), "out");
    assert_eq!(output.stderr_utf8(), "err");
}

#[tokio::test]
async fn runner_passes_environment_and_workdir() {
    let dir = tempfile::tempdir().unwrap();
    let runner = TokioProcessRunner::new(CancellationToken::new());
    let spec = CommandSpec::shell("echo \"$KUBECONFIG in $(pwd)\"")
        .env("KUBECONFIG", "/tmp/kubeconfig")
        .current_dir(dir.path());

    let output = runner.run(spec).await.unwrap();

    let canonical = dir.path().canonicalize().unwrap();
    assert_eq!(output.stdout_utf8(), format!("/tmp/kubeconfig in {}", canonical.display()));
}

#[tokio::test]
async fn runner_feeds_stdin_to_the_child() {
    let runner = TokioProcessRunner::new(CancellationToken::new());
    let spec = CommandSpec::new("cat").stdin_bytes("kind: Machine\n");

    let output = runner.run(spec).await.unwrap();

    assert!(output.success());
    assert_eq!(output.stdout_utf8(), "kind: Machine");
}

#[tokio::test]
async fn cancellation_reaps_a_running_child() {
    let cancel = CancellationToken::new();
    let runner = TokioProcessRunner::new(cancel.clone());

    let handle = tokio::spawn(async move { runner.run(CommandSpec::shell("sleep 30")).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn spawn_failure_names_the_program() {
    let runner = TokioProcessRunner::new(CancellationToken::new());

    let err = runner
        .run(CommandSpec::new("definitely-not-on-path-x7k2"))
        .await
        .unwrap_err();

    assert!(format!("{err}").contains("definitely-not-on-path-x7k2"));
}

#[test]
fn display_renders_program_and_args() {
    let spec = CommandSpec::new("oc").args(["get", "nodes", "-o", "json"]);
    assert_eq!(spec.display(), "oc get nodes -o json");
}
