//! Quota-slice leasing against the external resource pool.
//!
//! Cloud quota is partitioned into pool resources. A run may only spend
//! money while it holds a lease on one of them: the coordinator claims a
//! resource before setup starts, refreshes ownership on a fixed cadence
//! for the whole run and hands the resource back when the run unwinds.
//! A run that stops refreshing gets reaped server-side, so a crashed
//! harness cannot strand quota.
mod coordinator;
mod pool_cli;

pub use coordinator::LeaseCoordinator;
pub use pool_cli::CliLeasePool;

#[cfg(test)]
mod pool_cli_test;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// A live claim on one pool resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lease {
    /// Pool-assigned resource name, e.g. `aws-quota-slice-0042`
    pub resource_name: String,

    /// Resource family the claim was drawn from
    pub resource_type: String,

    /// Owner id the pool tagged the resource with
    pub owner: String,

    /// Resource record exactly as the pool announced it; refreshes echo
    /// this back verbatim
    pub raw: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LeasePool: Send + Sync + 'static {
    /// Single claim attempt. `Ok(None)` means no free resource this time.
    async fn try_acquire(
        &self,
        resource_type: &str,
        owner: &str,
    ) -> Result<Option<Lease>>;

    /// Refreshes ownership so pool-side expiry stays ahead of the run.
    async fn heartbeat(
        &self,
        lease: &Lease,
    ) -> Result<()>;

    /// Returns the resource to the free state.
    async fn release(
        &self,
        lease: &Lease,
    ) -> Result<()>;
}
