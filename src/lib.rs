mod artifacts;
mod cluster;
mod config;
mod constants;
mod errors;
mod exec;
mod lease;
mod metrics;
mod phases;
mod runbook;
mod signals;
pub mod utils;

pub use artifacts::*;
pub use cluster::*;
pub use config::*;
pub use errors::*;
pub use exec::*;
pub use lease::*;
pub use metrics::*;
pub use phases::*;
pub use runbook::*;
pub use signals::*;
pub use utils::*;

pub(crate) use constants::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
//-----------------------------------------------------------
// Autometrics
/// autometrics: https://docs.autometrics.dev/rust/adding-alerts-and-slos
use autometrics::objectives::Objective;
use autometrics::objectives::ObjectivePercentile;

// Success-rate only: pool calls shell out to the pool CLI, so latency
// is dominated by process spawn and server-side polling
const API_SLO: Objective =
    Objective::new("pool-api").success_rate(ObjectivePercentile::P99_9);
