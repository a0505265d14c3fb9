//! BDD scenarios for the build workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{BuilderContext, builder_context};

#[scenario(
    path = "tests/features/builder.feature",
    name = "Build a booted server with a generated key"
)]
fn scenario_booted_server(builder_context: BuilderContext) {
    let _ = builder_context;
}

#[scenario(
    path = "tests/features/builder.feature",
    name = "Keep partial results when a disk fails"
)]
fn scenario_partial_disks(builder_context: BuilderContext) {
    let _ = builder_context;
}

#[scenario(
    path = "tests/features/builder.feature",
    name = "Reject a plan with too many additional NICs"
)]
fn scenario_too_many_nics(builder_context: BuilderContext) {
    let _ = builder_context;
}

#[scenario(
    path = "tests/features/builder.feature",
    name = "Report a missing server plan"
)]
fn scenario_missing_plan(builder_context: BuilderContext) {
    let _ = builder_context;
}
