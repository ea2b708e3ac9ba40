//! Fixtures for tests that depend on a Gridstore table.
//!
//! A [`TableFixture`] provisions an ephemeral table around a test, either
//! on a process-shared local emulator (the default) or against the live
//! service, and tears it down afterwards. Tests can drive the fixture
//! directly or compose [`Step`]s with [`StepTest`].

use rand::{Rng, thread_rng};

mod emulator;
mod error;
mod fixture;
mod reconcile;
mod steps;

pub use emulator::EmulatorHandle;
pub use error::{FixtureError, Result};
pub use fixture::{Mode, TableFixture};
pub use reconcile::RetryPolicy;
pub use steps::{FCustom, Step, StepTest, StepTestState};

/// Return a fresh table name for `project`, in the form
/// `test-<project>-<8 hex chars>`.
///
/// Names from concurrent fixtures stay distinct, so suites can run against
/// a shared backend without colliding.
pub fn ephemeral_table_name(project: &str) -> String {
    let mut suffix = [0u8; 4];
    thread_rng().fill(&mut suffix);
    format!("test-{project}-{}", hex::encode(suffix))
}

/// Helper macro to skip tests against the live service if the required
/// environment is not set.
///
/// Produces the `(region, Option<endpoint override>)` pair to run against.
#[macro_export]
macro_rules! maybe_skip_live {
    () => {{
        use std::env;
        dotenvy::dotenv().ok();

        match (
            env::var("TEST_GRIDSTORE_REGION").ok(),
            env::var("TEST_GRIDSTORE_ENDPOINT").ok(),
        ) {
            (Some(region), endpoint) => (region, endpoint),
            (None, _) => {
                eprintln!(
                    "skipping live-service test - set TEST_GRIDSTORE_REGION (and optionally \
                     TEST_GRIDSTORE_ENDPOINT) to run"
                );
                return;
            }
        }
    }};
}
