//! Test-Harness Error Hierarchy
//!
//! Defines error types for the cluster test harness, categorized by
//! operational concern: infrastructure plumbing, resource leasing,
//! cross-phase coordination and recovery-runbook verification.

use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (process spawning, filesystem, serialization)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Harness configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Lease acquisition and release failures against the resource pool
    #[error(transparent)]
    Lease(#[from] LeaseError),

    /// Cross-phase coordination failures (signal board, peer exits)
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    /// Disaster-recovery runbook failures (verification, step budgets)
    #[error(transparent)]
    Runbook(#[from] RunbookError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// Filesystem failures during signal/artifact operations
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failures with path context attached
    #[error("Error occurred at path: {path}")]
    PathError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Child process could not be spawned or waited on
    #[error("Process `{program}` failed: {detail}")]
    Process { program: String, detail: String },

    /// Serialization failures for pool resources and object dumps
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// Background task failed
    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    /// No resource transitioned to leased within the acquire window
    #[error("Lease on `{resource_type}` not acquired within {timeout:?}")]
    AcquireTimeout {
        resource_type: String,
        timeout: Duration,
    },

    /// Pool endpoint unreachable or returned a non-zero status
    #[error("Resource pool unavailable: {0}")]
    PoolUnavailable(String),

    /// Pool handed back a resource record the harness cannot read
    #[error("Malformed pool resource: {0}")]
    MalformedResource(String),

    /// Release did not complete; pool-side expiry will reclaim the resource
    #[error("Lease release failed for `{0}`")]
    ReleaseFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    /// Another phase set the exit signal; this phase must unwind
    #[error("Peer phase exited, `{observer}` unwinding")]
    PeerExited { observer: &'static str },

    /// Sentinel flag could not be written or probed
    #[error("Signal board I/O failure for `{signal}`")]
    BoardIo {
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Shutdown signal received mid-phase
    #[error("Cancelled by shutdown signal")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum RunbookError {
    /// A post-restore check observed the wrong state; never retried
    #[error("Verification failed at `{step}`: expected `{expected}`, got `{actual}`")]
    Verification {
        step: &'static str,
        expected: String,
        actual: String,
    },

    /// A bounded wait loop ran out of attempts
    #[error("Step `{step}` exhausted {attempts} attempts")]
    Exhausted { step: &'static str, attempts: usize },

    /// The cluster stayed reachable after deleting two masters, which means
    /// the wrong machines were targeted; destructive work must stop here
    #[error("Cluster still reachable after master deletion; aborting recovery")]
    MeltdownNotObserved,

    /// No surviving member could be selected before destructive steps
    #[error("No surviving master found: {0}")]
    NoSurvivor(String),

    /// Machine pool never reached the expected size
    #[error("Expected {expected} master machines with addresses, found {actual}")]
    MachineCount { expected: usize, actual: usize },

    /// Node pool never reached the expected size
    #[error("Expected {expected} master nodes joined, found {actual}")]
    NodeCount { expected: usize, actual: usize },

    /// A remote command against a member failed beyond retry budgets
    #[error("Remote operation on `{node}` failed: {detail}")]
    RemoteOp { node: String, detail: String },
}

// ============== Conversion Implementations ============== //
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::System(SystemError::Io(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<JoinError> for Error {
    fn from(e: JoinError) -> Self {
        Error::System(SystemError::TaskFailed(e))
    }
}
