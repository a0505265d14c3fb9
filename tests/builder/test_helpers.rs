//! Shared fixtures for builder BDD scenarios.

use std::time::Duration;

use cloudkit::builder::{BuildFailure, BuildPlan, BuildResult};
use cloudkit::test_support::FakeCloud;
use cloudkit::WaitSettings;
use rstest::fixture;

#[derive(Clone, Debug)]
pub enum BuildOutcome {
    Success(BuildResult),
    Failure(BuildFailure),
}

#[derive(Clone, Debug)]
pub struct BuilderContext {
    pub cloud: FakeCloud,
    pub plan: BuildPlan,
    pub outcome: Option<BuildOutcome>,
}

#[fixture]
pub fn builder_context() -> BuilderContext {
    BuilderContext {
        cloud: FakeCloud::new(),
        plan: BuildPlan::default(),
        outcome: None,
    }
}

pub const fn fast_settings() -> WaitSettings {
    WaitSettings {
        timeout: Duration::from_secs(5),
        polling_interval: Duration::from_millis(1),
        not_found_retry: 3,
    }
}
