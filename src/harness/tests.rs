//! Lifecycle runs against the in-memory provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::*;
use crate::builder::{BuildPlan, NicSpec, ServerBuilder};
use crate::client::{BuildClient, Deletable, PowerControllable, Readable, Updatable};
use crate::resources::{Server, ServerUpdateRequest, ShutdownOption};
use crate::test_support::{FakeCloud, Operation};

fn fast() -> WaitSettings {
    WaitSettings {
        timeout: Duration::from_secs(2),
        polling_interval: Duration::from_millis(1),
        not_found_retry: 3,
    }
}

fn read_server() -> CrudStep<FakeCloud, Server> {
    CrudStep::new(|ctx: TestContext, cloud: FakeCloud| async move {
        let id = ctx.require_id()?;
        Ok::<_, BoxError>(cloud.servers().read(ctx.zone(), id).await?)
    })
}

fn create_server(boot: bool) -> CrudStep<FakeCloud, Server> {
    CrudStep::new(move |ctx: TestContext, cloud: FakeCloud| async move {
        let plan = BuildPlan::new("harness")
            .nic(NicSpec::shared())
            .boot_after_create(boot);
        let result = ServerBuilder::new(&cloud, plan)
            .with_wait_settings(fast())
            .build(&WaitContext::background(), ctx.zone())
            .await?;
        result
            .server
            .ok_or_else(|| BoxError::from("build returned no server"))
    })
}

fn shutdown_server() -> CrudStep<FakeCloud, ()> {
    CrudStep::new(|ctx: TestContext, cloud: FakeCloud| async move {
        let id = ctx.require_id()?;
        Ok::<_, BoxError>(cloud
            .servers()
            .shutdown(ctx.zone(), id, ShutdownOption::default())
            .await?)
    })
}

fn delete_server() -> CrudStep<FakeCloud, ()> {
    CrudStep::new(|ctx: TestContext, cloud: FakeCloud| async move {
        let id = ctx.require_id()?;
        Ok::<_, BoxError>(cloud.servers().delete(ctx.zone(), id).await?)
    })
}

fn case(cloud: &FakeCloud) -> CrudTestCase<FakeCloud, Server> {
    let shared = cloud.clone();
    CrudTestCase::new(Zone::new("is1a"), move || shared.clone(), read_server())
        .with_wait_settings(fast())
}

#[tokio::test]
async fn full_lifecycle_of_a_running_server() {
    let cloud = FakeCloud::new();
    cloud.set_not_found_reads(1);
    let renamed = Expectation::new(&serde_json::json!({ "Name": "renamed" })).expect("json");

    let test_ctx = case(&cloud)
        .create(create_server(true))
        .update(
            CrudStep::new(|ctx: TestContext, cloud: FakeCloud| async move {
                let id = ctx.require_id()?;
                let params = ServerUpdateRequest {
                    name: String::from("renamed"),
                    ..ServerUpdateRequest::default()
                };
                Ok::<_, BoxError>(cloud.servers().update(ctx.zone(), id, &params).await?)
            })
            .expect(renamed),
        )
        .shutdown(shutdown_server())
        .delete(delete_server())
        .run(&WaitContext::background())
        .await
        .expect("lifecycle succeeds");

    let id = test_ctx.id().expect("id recorded");
    assert!(cloud.server(id).is_none());
    assert_eq!(cloud.calls(Operation::ServerShutdown), 1);
    assert_eq!(cloud.calls(Operation::ServerDelete), 1);
}

#[tokio::test]
async fn shutdown_is_skipped_for_stopped_resources() {
    let cloud = FakeCloud::new();

    case(&cloud)
        .create(create_server(false))
        .shutdown(shutdown_server())
        .delete(delete_server())
        .run(&WaitContext::background())
        .await
        .expect("lifecycle succeeds");

    assert_eq!(cloud.calls(Operation::ServerShutdown), 0);
}

#[tokio::test]
async fn cleanup_runs_after_a_failed_phase() {
    let cloud = FakeCloud::new();
    let cleaned = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cleaned);

    let err = case(&cloud)
        .create(CrudStep::new(|_ctx: TestContext, _cloud: FakeCloud| async move {
            Err::<Server, BoxError>(BoxError::from("quota exceeded"))
        }))
        .cleanup(CrudStep::new(move |_ctx: TestContext, _cloud: FakeCloud| {
            let done = Arc::clone(&flag);
            async move {
                done.store(true, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        }))
        .run(&WaitContext::background())
        .await
        .expect_err("create fails");

    assert_eq!(err.phase, Phase::Create);
    assert!(err.message.contains("quota exceeded"));
    assert!(cleaned.load(Ordering::SeqCst));
}

#[tokio::test]
async fn delete_that_leaves_the_resource_fails_the_negative_read() {
    let cloud = FakeCloud::new();

    let err = case(&cloud)
        .create(create_server(false))
        .delete(CrudStep::new(|_ctx: TestContext, _cloud: FakeCloud| async move {
            Ok::<(), BoxError>(())
        }))
        .run(&WaitContext::background())
        .await
        .expect_err("resource survives");

    assert_eq!(err.phase, Phase::ReadAfterDelete);
}

#[tokio::test]
async fn failed_check_names_the_phase() {
    let cloud = FakeCloud::new();
    let wrong = Expectation::new(&serde_json::json!({ "Name": "other" }))
        .expect("json")
        .ignore(["ID"]);

    let err = CrudTestCase::new(
        Zone::new("is1a"),
        {
            let shared = cloud.clone();
            move || shared.clone()
        },
        read_server().expect(wrong),
    )
    .with_wait_settings(fast())
    .create(create_server(false))
    .run(&WaitContext::background())
    .await
    .expect_err("name differs");

    assert_eq!(err.phase, Phase::Read);
    assert!(err.message.contains("Name"), "{}", err.message);
}

#[tokio::test]
async fn cleanup_failure_is_reported_when_everything_else_passed() {
    let cloud = FakeCloud::new();

    let err = case(&cloud)
        .create(create_server(false))
        .cleanup(CrudStep::new(|_ctx: TestContext, _cloud: FakeCloud| async move {
            Err::<(), BoxError>(BoxError::from("leaked switch"))
        }))
        .run(&WaitContext::background())
        .await
        .expect_err("cleanup fails");

    assert_eq!(err.phase, Phase::Cleanup);
}

#[tokio::test]
async fn skip_extract_id_keeps_the_setup_identifier() {
    let cloud = FakeCloud::new();
    let seeded = cloud.insert_server(Server {
        name: String::from("seeded"),
        instance_status: crate::types::InstanceStatus::Down,
        availability: Availability::Available,
        ..Server::default()
    });

    let test_ctx = case(&cloud)
        .setup(CrudStep::new(move |ctx: TestContext, _cloud: FakeCloud| async move {
            ctx.set_id(seeded);
            Ok::<(), BoxError>(())
        }))
        .create(create_server(false).skip_extract_id())
        .run(&WaitContext::background())
        .await
        .expect("lifecycle succeeds");

    assert_eq!(test_ctx.id(), Some(seeded));
}

#[tokio::test]
async fn update_that_replaces_the_resource_moves_the_recorded_identifier() {
    let cloud = FakeCloud::new();

    let test_ctx = case(&cloud)
        .create(create_server(false))
        .update(CrudStep::new(|ctx: TestContext, cloud: FakeCloud| async move {
            let previous = ctx.require_id()?;
            let replacement = cloud.insert_server(Server {
                name: String::from("replacement"),
                instance_status: InstanceStatus::Down,
                availability: Availability::Available,
                ..Server::default()
            });
            cloud.servers().delete(ctx.zone(), previous).await?;
            Ok::<_, BoxError>(cloud.servers().read(ctx.zone(), replacement).await?)
        }))
        .delete(delete_server())
        .run(&WaitContext::background())
        .await
        .expect("lifecycle succeeds");

    assert!(test_ctx.id().is_some());
    assert!(cloud.server_ids().is_empty(), "replacement was left behind");
    assert_eq!(cloud.calls(Operation::ServerDelete), 2);
}

#[tokio::test]
async fn shutdown_decision_reads_the_resource_again() {
    let cloud = FakeCloud::new();

    case(&cloud)
        .create(create_server(true))
        .update(CrudStep::new(|ctx: TestContext, _cloud: FakeCloud| async move {
            let id = ctx.require_id()?;
            Ok::<_, BoxError>(Server {
                id,
                ..Server::default()
            })
        }))
        .shutdown(shutdown_server())
        .delete(delete_server())
        .run(&WaitContext::background())
        .await
        .expect("lifecycle succeeds");

    assert_eq!(cloud.calls(Operation::ServerShutdown), 1);
    assert!(cloud.server_ids().is_empty());
}

#[tokio::test]
async fn startup_wait_outlasts_a_transitional_power_state() {
    let cloud = FakeCloud::new();
    let reads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reads);
    let read = CrudStep::new(move |ctx: TestContext, _cloud: FakeCloud| {
        let seen = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            let instance_status = if seen < 2 {
                InstanceStatus::Cleaning
            } else {
                InstanceStatus::Down
            };
            Ok::<_, BoxError>(Server {
                id: ctx.require_id()?,
                instance_status,
                availability: Availability::Available,
                ..Server::default()
            })
        }
    });

    let shared = cloud.clone();
    CrudTestCase::new(Zone::new("is1a"), move || shared.clone(), read)
        .with_wait_settings(fast())
        .create(CrudStep::new(|_ctx: TestContext, _cloud: FakeCloud| async move {
            Ok::<_, BoxError>(Server {
                id: ResourceId::new(7),
                instance_status: InstanceStatus::Cleaning,
                availability: Availability::Available,
                ..Server::default()
            })
        }))
        .run(&WaitContext::background())
        .await
        .expect("power state settles");

    // Two transitional reads, the settled read, then the read phase.
    assert!(reads.load(Ordering::SeqCst) >= 4);
}
