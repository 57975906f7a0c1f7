use std::sync::Arc;

use super::*;
use crate::config::LeaseConfig;
use crate::exec::MockProcessRunner;
use crate::exec::ProcessOutput;
use crate::Error;
use crate::LeaseError;

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

fn pool_with(runner: MockProcessRunner) -> CliLeasePool {
    CliLeasePool::new(Arc::new(runner), LeaseConfig::default())
}

#[tokio::test]
async fn acquire_builds_the_claim_command_and_parses_the_resource() {
    let mut runner = MockProcessRunner::new();
    runner
        .expect_run()
        .withf(|spec| {
            spec.program == "boskosctl"
                && spec.args
                    == vec![
                        "--server-url",
                        "http://boskos",
                        "--owner-name",
                        "ci-op-x7k2",
                        "acquire",
                        "--type",
                        "aws-quota-slice",
                        "--state",
                        "free",
                        "--target-state",
                        "leased",
                    ]
        })
        .times(1)
        .returning(|_| {
            Ok(output(
                0,
                r#"{"type":"aws-quota-slice","name":"aws-quota-slice-0042","state":"leased"}"#,
            ))
        });

    let lease = pool_with(runner)
        .try_acquire("aws-quota-slice", "ci-op-x7k2")
        .await
        .unwrap()
        .expect("resource claimed");

    assert_eq!(lease.resource_name, "aws-quota-slice-0042");
    assert_eq!(lease.resource_type, "aws-quota-slice");
    assert_eq!(lease.owner, "ci-op-x7k2");
    assert!(lease.raw.contains("aws-quota-slice-0042"));
}

#[tokio::test]
async fn empty_pool_is_reported_as_no_resource() {
    let mut runner = MockProcessRunner::new();
    runner.expect_run().times(1).returning(|_| Ok(output(1, "")));

    let claimed = pool_with(runner).try_acquire("aws-quota-slice", "ci-op-x7k2").await.unwrap();

    assert!(claimed.is_none());
}

#[tokio::test]
async fn unreadable_resource_record_is_an_error() {
    let mut runner = MockProcessRunner::new();
    runner.expect_run().times(1).returning(|_| Ok(output(0, "not json at all")));

    let err =
        pool_with(runner).try_acquire("aws-quota-slice", "ci-op-x7k2").await.unwrap_err();

    assert!(matches!(err, Error::Lease(LeaseError::MalformedResource(_))));
}

#[tokio::test]
async fn heartbeat_echoes_the_raw_resource_record() {
    let mut runner = MockProcessRunner::new();
    runner
        .expect_run()
        .withf(|spec| {
            spec.args.windows(2).any(|pair| {
                pair[0] == "--resource" && pair[1].contains("aws-quota-slice-0042")
            }) && spec.args.contains(&"heartbeat".to_string())
        })
        .times(1)
        .returning(|_| Ok(output(0, "")));

    let lease = Lease {
        resource_name: "aws-quota-slice-0042".into(),
        resource_type: "aws-quota-slice".into(),
        owner: "ci-op-x7k2".into(),
        raw: r#"{"type":"aws-quota-slice","name":"aws-quota-slice-0042"}"#.into(),
    };

    pool_with(runner).heartbeat(&lease).await.unwrap();
}

#[tokio::test]
async fn release_frees_the_resource_by_name() {
    let mut runner = MockProcessRunner::new();
    runner
        .expect_run()
        .withf(|spec| {
            spec.args.contains(&"release".to_string())
                && spec.args.windows(2).any(|pair| {
                    pair[0] == "--name" && pair[1] == "aws-quota-slice-0042"
                })
                && spec.args.windows(2).any(|pair| {
                    pair[0] == "--target-state" && pair[1] == "free"
                })
        })
        .times(1)
        .returning(|_| Ok(output(0, "")));

    let lease = Lease {
        resource_name: "aws-quota-slice-0042".into(),
        resource_type: "aws-quota-slice".into(),
        owner: "ci-op-x7k2".into(),
        raw: String::new(),
    };

    pool_with(runner).release(&lease).await.unwrap();
}

#[tokio::test]
async fn failed_release_surfaces_as_release_error() {
    let mut runner = MockProcessRunner::new();
    runner.expect_run().times(1).returning(|_| Ok(output(1, "")));

    let lease = Lease {
        resource_name: "aws-quota-slice-0042".into(),
        resource_type: "aws-quota-slice".into(),
        owner: "ci-op-x7k2".into(),
        raw: String::new(),
    };

    let err = pool_with(runner).release(&lease).await.unwrap_err();
    assert!(matches!(err, Error::Lease(LeaseError::ReleaseFailed(_))));
}
