use std::sync::Arc;

use autometrics::autometrics;
use tokio::time::sleep;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use super::Lease;
use super::LeasePool;
use crate::config::LeaseConfig;
use crate::metrics::HEARTBEAT_FAILURES;
use crate::CoordinationError;
use crate::LeaseError;
use crate::Result;
use crate::API_SLO;

/// Drives one lease through its whole life: claim, refresh, hand back.
pub struct LeaseCoordinator {
    pool: Arc<dyn LeasePool>,
    config: LeaseConfig,
}

impl LeaseCoordinator {
    pub fn new(
        pool: Arc<dyn LeasePool>,
        config: LeaseConfig,
    ) -> Self {
        Self { pool, config }
    }

    /// Polls the pool until a resource is claimed or the acquire window
    /// closes.
    ///
    /// Pool-empty and pool-unreachable both surface as empty attempts;
    /// the window bounds how long either is tolerated.
    #[autometrics(objective = API_SLO)]
    pub async fn acquire(
        &self,
        resource_type: &str,
        owner: &str,
        cancel: &CancellationToken,
    ) -> Result<Lease> {
        let deadline = Instant::now() + self.config.acquire_timeout();
        info!("acquiring lease on `{resource_type}` as `{owner}`");

        loop {
            if let Some(lease) = self.pool.try_acquire(resource_type, owner).await? {
                info!("lease acquired: `{}`", lease.resource_name);
                return Ok(lease);
            }

            if Instant::now() + self.config.acquire_poll_interval() >= deadline {
                return Err(LeaseError::AcquireTimeout {
                    resource_type: resource_type.to_string(),
                    timeout: self.config.acquire_timeout(),
                }
                .into());
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(CoordinationError::Cancelled.into());
                }
                _ = sleep(self.config.acquire_poll_interval()) => {}
            }
        }
    }

    /// Refreshes ownership on the configured cadence until cancelled.
    ///
    /// Individual refresh failures are tolerated; the pool only reaps an
    /// owner after several missed beats, and the next tick usually lands.
    pub async fn keep_alive(
        &self,
        lease: &Lease,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval());
        info!("refreshing ownership of `{}` every {:?}", lease.resource_name, self.config.heartbeat_interval());

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.pool.heartbeat(lease).await {
                        HEARTBEAT_FAILURES.with_label_values(&[lease.resource_type.as_str()]).inc();
                        warn!("ownership refresh for `{}` failed: {e:?}", lease.resource_name);
                    }
                }
            }
        }
    }

    /// Hands the resource back to the pool.
    #[autometrics(objective = API_SLO)]
    pub async fn release(
        &self,
        lease: &Lease,
    ) -> Result<()> {
        info!("releasing lease on `{}`", lease.resource_name);
        self.pool.release(lease).await
    }
}
