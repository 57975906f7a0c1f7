use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use super::Phase;
use crate::config::HarnessConfig;
use crate::lease::Lease;
use crate::lease::LeaseCoordinator;
use crate::lease::LeasePool;
use crate::signals::wait_for_or_exit;
use crate::signals::Signal;
use crate::signals::SignalBoard;
use crate::Result;

/// Claims a quota slice before any money is spent and holds it for the
/// whole run.
///
/// Flow: acquire, raise `Leased`, refresh ownership until a peer raises
/// `Exit`, release. The resource goes back to the pool on every path out
/// of this phase; a failed release is only logged, because pool-side
/// expiry reclaims the slice once the heartbeats stop.
pub struct LeasePhase {
    coordinator: LeaseCoordinator,
    board: Arc<dyn SignalBoard>,
    resource_type: String,
    owner: String,
    poll_interval: Duration,
}

impl LeasePhase {
    pub fn new(
        pool: Arc<dyn LeasePool>,
        board: Arc<dyn SignalBoard>,
        config: &HarnessConfig,
        owner: String,
    ) -> Self {
        Self {
            coordinator: LeaseCoordinator::new(pool, config.lease.clone()),
            board,
            resource_type: config.lease.resource_type(config.cluster.cluster_type),
            owner,
            poll_interval: config.signals.poll_interval(),
        }
    }

    async fn drive(
        &self,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let lease = self
            .coordinator
            .acquire(&self.resource_type, &self.owner, cancel)
            .await?;
        self.board.raise(Signal::Leased).await?;

        let outcome = self.hold(&lease, cancel).await;

        if let Err(e) = self.coordinator.release(&lease).await {
            warn!(resource = %lease.resource_name, error = %e, "lease release failed, pool expiry will reclaim it");
        }
        outcome
    }

    /// Refreshes ownership until a peer raises `Exit`.
    async fn hold(
        &self,
        lease: &Lease,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            observed = wait_for_or_exit(self.board.as_ref(), Signal::Exit, self.poll_interval, cancel) => {
                observed?;
                info!(resource = %lease.resource_name, "run is over, handing the lease back");
                Ok(())
            }
            outcome = self.coordinator.keep_alive(lease, cancel) => outcome,
        }
    }
}

#[async_trait]
impl Phase for LeasePhase {
    fn name(&self) -> &'static str {
        "lease"
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let outcome = self.drive(cancel).await;
        if outcome.is_err() {
            if let Err(e) = self.board.raise(Signal::Exit).await {
                warn!(error = %e, "could not raise the exit flag");
            }
        }
        outcome
    }
}
