use std::future::Future;

use tokio::time::sleep;
use tracing::warn;

use super::CommandSpec;
use super::ProcessOutput;
use super::ProcessRunner;
use crate::RetryPolicy;
use crate::Result;
use crate::RunbookError;
use crate::SystemError;

/// What an exhausted command budget means to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Exhaustion is an error
    Enforce,
    /// Exhaustion is tolerated; the last output is handed back as-is.
    /// Used where the work races a controller that may have already done it.
    Ignore,
}

/// Runs a command until it exits zero, on a fixed cadence.
///
/// Returns at the first success. After the budget runs out, `Enforce`
/// fails the call and `Ignore` hands back the last output.
pub async fn retry_command(
    runner: &dyn ProcessRunner,
    spec: &CommandSpec,
    policy: RetryPolicy,
    mode: FailureMode,
) -> Result<ProcessOutput> {
    let mut last = None;
    for attempt in 1..=policy.max_attempts {
        let output = runner.run(spec.clone()).await?;
        if output.success() {
            return Ok(output);
        }

        warn!(
            "attempt {attempt}/{}: `{}` exited {} ({})",
            policy.max_attempts,
            spec.display(),
            output.status,
            output.stderr_utf8()
        );
        last = Some(output);

        if attempt < policy.max_attempts {
            sleep(policy.delay()).await;
        }
    }

    // Budget gone; `last` is always set because max_attempts >= 1
    let output = last.ok_or_else(|| SystemError::Process {
        program: spec.program.clone(),
        detail: "retry budget was empty".into(),
    })?;

    match mode {
        FailureMode::Ignore => {
            warn!("ignoring failure of `{}` after {} attempts", spec.display(), policy.max_attempts);
            Ok(output)
        }
        FailureMode::Enforce => Err(SystemError::Process {
            program: spec.program.clone(),
            detail: format!(
                "exit status {} after {} attempts: {}",
                output.status,
                policy.max_attempts,
                output.stderr_utf8()
            ),
        }
        .into()),
    }
}

/// Fixed-cadence retry for fallible async operations.
///
/// Returns the first `Ok`, or the last error once the budget runs out.
pub async fn retry_async<F, T, P>(
    policy: RetryPolicy,
    label: &str,
    task: F,
) -> Result<P>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let mut last_error = None;
    for attempt in 1..=policy.max_attempts {
        match task().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!("attempt {attempt}/{} of {label} failed: {e:?}", policy.max_attempts);
                last_error = Some(e);
            }
        }

        if attempt < policy.max_attempts {
            sleep(policy.delay()).await;
        }
    }

    warn!("{label} failed after {} attempts", policy.max_attempts);
    Err(last_error.unwrap_or_else(|| {
        RunbookError::Exhausted {
            step: "retry",
            attempts: policy.max_attempts,
        }
        .into()
    }))
}

/// Bounded poll for a condition to come true.
///
/// Probe errors count as "not yet": the usual failure here is an API that
/// is still coming back. Exhaustion fails the step.
pub async fn wait_until<F, T>(
    step: &'static str,
    attempts: usize,
    interval: std::time::Duration,
    probe: F,
) -> Result<()>
where
    F: Fn() -> T,
    T: Future<Output = Result<bool>>,
{
    for attempt in 1..=attempts {
        match probe().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                warn!("probe {attempt}/{attempts} of {step} errored: {e:?}");
            }
        }

        if attempt < attempts {
            sleep(interval).await;
        }
    }

    Err(RunbookError::Exhausted { step, attempts }.into())
}
