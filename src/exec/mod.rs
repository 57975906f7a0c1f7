//! Child-process plumbing shared by every phase.
//!
//! All work against external systems (pool CLI, cluster CLI, installer,
//! remote shells) goes through [`ProcessRunner`] so tests can script the
//! outside world, and through the fixed-delay retry executor so flaky
//! surfaces get a uniform budget.
mod process;
mod retry;

pub use process::CommandSpec;
pub use process::ProcessOutput;
pub use process::ProcessRunner;
pub use process::TokioProcessRunner;
pub use retry::retry_async;
pub use retry::retry_command;
pub use retry::wait_until;
pub use retry::FailureMode;

#[cfg(test)]
pub use process::MockProcessRunner;

#[cfg(test)]
mod process_test;
