//! Sentinel board the phases coordinate through.
//!
//! Phases never call each other. Each one raises named flags on a shared
//! board and polls for the flags its peers raise:
//!
//! - `Leased`: the lease phase secured a pool resource; setup may spend money
//! - `SetupSuccess`: the installer finished cleanly; the suite may start
//! - `Exit`: some phase finished or died; everyone unwinds
//!
//! Flags are raise-once and never lowered. The durable implementation keeps
//! one file per flag so a crashed and restarted phase resumes the same
//! conversation.
mod board;

pub use board::FileSignalBoard;
pub use board::MemorySignalBoard;


use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::constants::SIGNAL_EXIT;
use crate::constants::SIGNAL_LEASED;
use crate::constants::SIGNAL_SETUP_SUCCESS;
use crate::CoordinationError;
use crate::Result;

/// One raise-once flag on the shared board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Leased,
    SetupSuccess,
    Exit,
}

impl Signal {
    /// On-disk name of the flag under the board directory
    pub fn file_name(&self) -> &'static str {
        match self {
            Signal::Leased => SIGNAL_LEASED,
            Signal::SetupSuccess => SIGNAL_SETUP_SUCCESS,
            Signal::Exit => SIGNAL_EXIT,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SignalBoard: Send + Sync + 'static {
    /// Raises a flag. Raising an already-raised flag is a no-op.
    async fn raise(
        &self,
        signal: Signal,
    ) -> Result<()>;

    /// Single observation without waiting.
    async fn is_raised(
        &self,
        signal: Signal,
    ) -> Result<bool>;
}

/// What a waiting phase saw first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The wanted flag showed up
    Raised,
    /// A peer raised the exit flag before the wanted one appeared
    PeerExited,
}

/// Polls until `wanted` or the exit flag shows up, whichever first.
///
/// Exit wins ties: a phase that sees both on the same poll must unwind,
/// because the run is already over.
pub async fn wait_for_or_exit(
    board: &dyn SignalBoard,
    wanted: Signal,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<Observation> {
    loop {
        if board.is_raised(Signal::Exit).await? {
            return Ok(Observation::PeerExited);
        }
        if board.is_raised(wanted).await? {
            return Ok(Observation::Raised);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CoordinationError::Cancelled.into());
            }
            _ = sleep(poll_interval) => {}
        }
    }
}

/// Bounded wait for a flag.
///
/// Returns `Ok(true)` when the flag showed up inside the budget and
/// `Ok(false)` when the budget ran out. Used by teardown, which collects
/// evidence from a still-running test phase rather than waiting forever.
pub async fn wait_for_bounded(
    board: &dyn SignalBoard,
    wanted: Signal,
    attempts: usize,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<bool> {
    for _ in 0..attempts {
        if board.is_raised(wanted).await? {
            return Ok(true);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CoordinationError::Cancelled.into());
            }
            _ = sleep(interval) => {}
        }
    }
    board.is_raised(wanted).await
}
