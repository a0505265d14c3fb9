//! BDD step definitions for the build workflow.

use cloudkit::builder::{
    AdditionalNic, DiskEditSpec, DiskSpec, GenerateSshKey, NicSpec, ServerBuilder,
};
use cloudkit::error::ApiError;
use cloudkit::test_support::Operation;
use cloudkit::{OsType, WaitContext, Zone};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{BuildOutcome, BuilderContext, fast_settings};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a fake cloud with the standard catalogue")]
fn standard_cloud(builder_context: BuilderContext) -> BuilderContext {
    builder_context
}

#[given("a plan named \"{name}\" with {cpu:u32} CPUs and {memory:u32} GB of memory")]
fn named_plan(
    mut builder_context: BuilderContext,
    name: String,
    cpu: u32,
    memory: u32,
) -> BuilderContext {
    builder_context.plan = builder_context
        .plan
        .clone()
        .cpu(cpu)
        .memory_gb(memory)
        .nic(NicSpec::shared());
    builder_context.plan.name = name;
    builder_context
}

#[given("an \"{os}\" boot disk of {size:u32} GB with a generated key")]
fn boot_disk(mut builder_context: BuilderContext, os: String, size: u32) -> BuilderContext {
    let os_type: OsType = os
        .parse()
        .unwrap_or_else(|err| panic!("scenario names a known OS: {err}"));
    let disk = DiskSpec::from_unix_archive("boot", os_type, size).with_edit(DiskEditSpec {
        host_name: Some(builder_context.plan.name.clone()),
        generate_ssh_key: Some(GenerateSshKey::default()),
        ..DiskEditSpec::default()
    });
    builder_context.plan = builder_context.plan.clone().disk(disk);
    builder_context
}

#[given("{count:u32} blank disks of {size:u32} GB")]
fn blank_disks(mut builder_context: BuilderContext, count: u32, size: u32) -> BuilderContext {
    for index in 0..count {
        let disk = DiskSpec::blank(format!("data-{index}"), size);
        builder_context.plan = builder_context.plan.clone().disk(disk);
    }
    builder_context
}

#[given("{count:u32} additional disconnected NICs")]
fn additional_nics(mut builder_context: BuilderContext, count: u32) -> BuilderContext {
    for _ in 0..count {
        builder_context.plan = builder_context
            .plan
            .clone()
            .additional_nic(AdditionalNic::Disconnected);
    }
    builder_context
}

#[given("the server boots after creation")]
fn boots_after_creation(mut builder_context: BuilderContext) -> BuilderContext {
    builder_context.plan = builder_context.plan.clone().boot_after_create(true);
    builder_context
}

#[given("disk creation fails on call {nth:u32}")]
fn disk_creation_fails(builder_context: BuilderContext, nth: u32) -> BuilderContext {
    builder_context.cloud.fail_on(
        Operation::DiskCreate,
        nth as usize,
        ApiError::Api {
            status: 500,
            message: String::from("storage unavailable"),
        },
    );
    builder_context
}

#[when("I build the server")]
fn build_server(mut builder_context: BuilderContext) -> BuilderContext {
    let runtime = Runtime::new().unwrap_or_else(|err| panic!("tokio runtime: {err}"));
    let builder = ServerBuilder::new(&builder_context.cloud, builder_context.plan.clone())
        .with_wait_settings(fast_settings());
    let result = runtime.block_on(builder.build(&WaitContext::background(), &Zone::new("is1a")));
    builder_context.outcome = Some(match result {
        Ok(built) => BuildOutcome::Success(built),
        Err(failure) => BuildOutcome::Failure(failure),
    });
    builder_context
}

fn success(builder_context: &BuilderContext) -> Result<&cloudkit::BuildResult, StepError> {
    match builder_context.outcome.as_ref() {
        Some(BuildOutcome::Success(result)) => Ok(result),
        Some(BuildOutcome::Failure(failure)) => Err(StepError::Assertion(format!(
            "expected success, got: {failure}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

fn failure(builder_context: &BuilderContext) -> Result<&cloudkit::BuildFailure, StepError> {
    match builder_context.outcome.as_ref() {
        Some(BuildOutcome::Failure(failure)) => Ok(failure),
        Some(BuildOutcome::Success(_)) => Err(StepError::Assertion(String::from(
            "expected the build to fail, got success",
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the build succeeds")]
fn build_succeeds(builder_context: &BuilderContext) -> Result<(), StepError> {
    success(builder_context).map(drop)
}

#[then("the server is \"{status}\"")]
fn server_status(builder_context: &BuilderContext, status: String) -> Result<(), StepError> {
    let result = success(builder_context)?;
    let server = result
        .server
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing server snapshot")))?;
    if server.instance_status.as_str() == status {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected status {status}, got {}",
            server.instance_status
        )))
    }
}

#[then("the generated private key is returned")]
fn private_key_returned(builder_context: &BuilderContext) -> Result<(), StepError> {
    let result = success(builder_context)?;
    match result.generated_private_key() {
        Some(key) if key.contains("PRIVATE KEY") => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a private key, got {other:?}"
        ))),
    }
}

#[then("no ephemeral artifacts remain")]
fn artifacts_removed(builder_context: &BuilderContext) -> Result<(), StepError> {
    let keys = builder_context.cloud.ssh_key_ids();
    let notes = builder_context.cloud.notes();
    if keys.is_empty() && notes.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no leftovers, found keys {keys:?} and notes {notes:?}"
        )))
    }
}

#[then("the build fails while \"{stage}\"")]
fn fails_while(builder_context: &BuilderContext, stage: String) -> Result<(), StepError> {
    let failed = failure(builder_context)?;
    if failed.stage.to_string() == stage {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected failure while {stage}, got {}",
            failed.stage
        )))
    }
}

#[then("the partial result holds the server and {disks:u32} disks")]
fn partial_result(builder_context: &BuilderContext, disks: u32) -> Result<(), StepError> {
    let failed = failure(builder_context)?;
    let server_id = failed
        .partial
        .server_id
        .ok_or_else(|| StepError::Assertion(String::from("partial result has no server")))?;
    if builder_context.cloud.server(server_id).is_none() {
        return Err(StepError::Assertion(format!(
            "server {server_id} should still exist"
        )));
    }
    if failed.partial.disks.len() == disks as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {disks} disks, got {:?}",
            failed.partial.disk_ids()
        )))
    }
}

#[then("nothing was deleted")]
fn nothing_deleted(builder_context: &BuilderContext) -> Result<(), StepError> {
    let deletes = builder_context.cloud.calls(Operation::ServerDelete)
        + builder_context.cloud.calls(Operation::DiskDelete);
    if deletes == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no deletes, got {deletes}"
        )))
    }
}

#[then("no resources were created")]
fn nothing_created(builder_context: &BuilderContext) -> Result<(), StepError> {
    let mutations = builder_context.cloud.mutating_calls();
    if mutations == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no mutating calls, got {mutations}"
        )))
    }
}

#[then("the failure mentions \"{text}\"")]
fn failure_mentions(builder_context: &BuilderContext, text: String) -> Result<(), StepError> {
    let failed = failure(builder_context)?;
    let message = failed.to_string();
    if message.contains(&text) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {text:?} in {message}"
        )))
    }
}
