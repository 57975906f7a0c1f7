//! Test components shared between unit tests and integration tests.
mod common;
mod fake_cluster;
mod fake_pool;

pub use common::*;
pub use fake_cluster::*;
pub use fake_pool::*;
