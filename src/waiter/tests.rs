//! Tests for the state polling loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rstest::rstest;
use tokio::sync::Mutex;

use super::*;

#[derive(Clone, Debug, Eq, PartialEq)]
struct Snapshot {
    label: &'static str,
    status: Option<InstanceStatus>,
    availability: Option<Availability>,
}

impl StateSnapshot for Snapshot {
    fn instance_status(&self) -> Option<InstanceStatus> {
        self.status.clone()
    }

    fn availability(&self) -> Option<Availability> {
        self.availability.clone()
    }
}

fn status(label: &'static str, raw: &str) -> Result<Snapshot, ApiError> {
    Ok(Snapshot {
        label,
        status: Some(InstanceStatus::from(raw)),
        availability: None,
    })
}

fn available(label: &'static str, raw: &str) -> Result<Snapshot, ApiError> {
    Ok(Snapshot {
        label,
        status: None,
        availability: Some(Availability::from(raw)),
    })
}

fn not_found() -> Result<Snapshot, ApiError> {
    Err(ApiError::NotFound {
        resource: String::from("server"),
        id: String::from("1"),
    })
}

/// Replays scripted read results; once exhausted the last result repeats.
#[derive(Clone)]
struct ScriptedReads {
    script: Arc<Mutex<VecDeque<Result<Snapshot, ApiError>>>>,
    last: Arc<Mutex<Option<Result<Snapshot, ApiError>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedReads {
    fn new(script: impl IntoIterator<Item = Result<Snapshot, ApiError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            last: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn read(&self) -> Result<Snapshot, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().await.pop_front();
        let mut last = self.last.lock().await;
        if let Some(result) = next {
            *last = Some(result.clone());
            return result;
        }
        last.clone().unwrap_or_else(not_found)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn fast<T>(waiter: StatePollingWaiter<T>) -> StatePollingWaiter<T> {
    waiter
        .with_timeout(Duration::from_millis(500))
        .with_polling_interval(Duration::from_millis(1))
}

#[tokio::test]
async fn succeeds_after_absorbing_post_create_not_found() {
    let reads = ScriptedReads::new([
        not_found(),
        not_found(),
        status("down", "down"),
        status("up", "up"),
    ]);
    let waiter = fast(StatePollingWaiter::instance_status([InstanceStatus::Up])).with_not_found_retry(5);

    let state = waiter
        .wait_for_state(&WaitContext::background(), || reads.read())
        .await
        .expect("wait should succeed");

    assert_eq!(state.label, "up");
    assert_eq!(reads.calls(), 4);
}

#[rstest]
#[case(2, true)]
#[case(3, false)]
#[tokio::test]
async fn not_found_budget_is_exact(#[case] misses: usize, #[case] succeeds: bool) {
    let script = std::iter::repeat_with(not_found)
        .take(misses)
        .chain([status("up", "up")]);
    let reads = ScriptedReads::new(script);
    let waiter = fast(StatePollingWaiter::instance_status([InstanceStatus::Up])).with_not_found_retry(2);

    let result = waiter
        .wait_for_state(&WaitContext::background(), || reads.read())
        .await;

    if succeeds {
        assert!(result.is_ok(), "unexpected outcome: {result:?}");
    } else {
        let err = result.expect_err("budget should be exhausted");
        assert!(err.is_not_found(), "unexpected error: {err:?}");
    }
}

#[tokio::test]
async fn not_found_budget_resets_after_a_successful_read() {
    let reads = ScriptedReads::new([
        not_found(),
        status("down", "down"),
        not_found(),
        status("up", "up"),
    ]);
    let waiter = fast(StatePollingWaiter::instance_status([InstanceStatus::Up])).with_not_found_retry(1);

    let state = waiter
        .wait_for_state(&WaitContext::background(), || reads.read())
        .await
        .expect("consecutive budget should reset");
    assert_eq!(state.label, "up");
}

#[tokio::test]
async fn returns_the_exact_satisfying_state_on_the_kth_poll() {
    let reads = ScriptedReads::new([
        available("copying", "migrating"),
        available("copying", "migrating"),
        available("ready", "available"),
    ]);
    let waiter = fast(StatePollingWaiter::availability([Availability::Available]));

    let state = waiter
        .wait_for_state(&WaitContext::background(), || reads.read())
        .await
        .expect("wait should succeed");

    assert_eq!(state, available("ready", "available").expect("fixture"));
    assert!((3..=4).contains(&reads.calls()));
}

#[tokio::test]
async fn maximal_timeout_waits_without_a_deadline() {
    let reads = ScriptedReads::new([status("down", "down"), status("up", "up")]);
    let waiter = StatePollingWaiter::instance_status([InstanceStatus::Up])
        .with_timeout(Duration::MAX)
        .with_polling_interval(Duration::from_millis(1));

    let state = waiter
        .wait_for_state(&WaitContext::background(), || reads.read())
        .await
        .expect("an unbounded wait still succeeds");

    assert_eq!(state.label, "up");
}

#[tokio::test]
async fn times_out_within_timeout_plus_one_interval() {
    let reads = ScriptedReads::new([status("down", "down")]);
    let waiter = StatePollingWaiter::instance_status([InstanceStatus::Up])
        .with_timeout(Duration::from_millis(50))
        .with_polling_interval(Duration::from_millis(10));

    let started = Instant::now();
    let err = waiter
        .wait_for_state(&WaitContext::background(), || reads.read())
        .await
        .expect_err("target never holds");

    assert!(err.is_timeout(), "unexpected error: {err:?}");
    assert!(started.elapsed() < Duration::from_millis(250));
}

#[tokio::test]
async fn strict_mode_fails_fast_on_unrecognised_status() {
    let reads = ScriptedReads::new([status("weird", "totally-unrecognized")]);
    let waiter = StatePollingWaiter::instance_status([InstanceStatus::Up])
        .with_timeout(Duration::from_secs(5))
        .with_polling_interval(Duration::from_millis(1))
        .raise_error_with_unknown_state(true);

    let started = Instant::now();
    let err = waiter
        .wait_for_state(&WaitContext::background(), || reads.read())
        .await
        .expect_err("strict mode must reject the value");

    assert_eq!(
        err,
        WaitError::UnexpectedState {
            value: String::from("totally-unrecognized")
        }
    );
    assert_eq!(reads.calls(), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn lenient_mode_keeps_polling_unrecognised_status_until_timeout() {
    let reads = ScriptedReads::new([status("weird", "totally-unrecognized")]);
    let waiter = StatePollingWaiter::instance_status([InstanceStatus::Up])
        .with_timeout(Duration::from_millis(30))
        .with_polling_interval(Duration::from_millis(1));

    let err = waiter
        .wait_for_state(&WaitContext::background(), || reads.read())
        .await
        .expect_err("value never matches");

    assert!(err.is_timeout());
    assert!(reads.calls() > 1);
}

#[tokio::test]
async fn cancellation_interrupts_the_sleep_between_polls() {
    let reads = ScriptedReads::new([status("down", "down")]);
    let waiter = StatePollingWaiter::instance_status([InstanceStatus::Up])
        .with_timeout(Duration::from_secs(60))
        .with_polling_interval(Duration::from_millis(200));
    let (ctx, handle) = WaitContext::background().with_cancel();

    let canceller = tokio::spawn(async move {
        sleep(Duration::from_millis(20)).await;
        handle.cancel();
    });

    let started = Instant::now();
    let err = waiter
        .wait_for_state(&ctx, || reads.read())
        .await
        .expect_err("cancelled wait never succeeds");
    canceller.await.expect("join canceller");

    assert!(err.is_cancelled(), "unexpected error: {err:?}");
    assert!(started.elapsed() < Duration::from_millis(200 + 100));
}

#[tokio::test]
async fn parent_deadline_is_honoured() {
    let reads = ScriptedReads::new([status("down", "down")]);
    let waiter = fast(StatePollingWaiter::instance_status([InstanceStatus::Up]))
        .with_timeout(Duration::from_secs(60));
    let ctx = WaitContext::background().with_timeout(Duration::from_millis(20));

    let err = waiter
        .wait_for_state(&ctx, || reads.read())
        .await
        .expect_err("parent deadline passes first");
    assert!(err.is_timeout());
}

#[tokio::test]
async fn non_not_found_errors_are_returned_unretried() {
    let reads = ScriptedReads::new([Err(ApiError::Conflict {
        message: String::from("still running"),
    })]);
    let waiter = fast(StatePollingWaiter::instance_status([InstanceStatus::Up])).with_not_found_retry(10);

    let err = waiter
        .wait_for_state(&WaitContext::background(), || reads.read())
        .await
        .expect_err("conflict is terminal");

    assert!(matches!(err, WaitError::Api(ApiError::Conflict { .. })));
    assert_eq!(reads.calls(), 1);
}

#[tokio::test]
async fn predicate_controls_completion_and_errors() {
    let reads = ScriptedReads::new([status("a", "down"), status("b", "cleaning"), status("c", "up")]);
    let waiter = fast(StatePollingWaiter::state_check(|snapshot: &Snapshot| {
        Ok(snapshot.label == "b")
    }));
    let state = waiter
        .wait_for_state(&WaitContext::background(), || reads.read())
        .await
        .expect("predicate accepts b");
    assert_eq!(state.label, "b");

    let reads = ScriptedReads::new([status("a", "down")]);
    let failing = fast(StatePollingWaiter::state_check(|_: &Snapshot| {
        Err(String::from("boom"))
    }));
    let err = failing
        .wait_for_state(&WaitContext::background(), || reads.read())
        .await
        .expect_err("predicate error is terminal");
    assert_eq!(
        err,
        WaitError::StateCheck {
            message: String::from("boom")
        }
    );
}

#[tokio::test]
async fn status_target_requires_a_status_bearing_result() {
    let reads = ScriptedReads::new([available("disk", "available")]);
    let waiter = fast(StatePollingWaiter::instance_status([InstanceStatus::Up]));

    let err = waiter
        .wait_for_state(&WaitContext::background(), || reads.read())
        .await
        .expect_err("disks have no power state");
    assert!(matches!(err, WaitError::StateUnavailable { .. }));
}

#[test]
fn zero_durations_keep_defaults() {
    let waiter: StatePollingWaiter<Snapshot> = StatePollingWaiter::instance_status([InstanceStatus::Up])
        .with_timeout(Duration::ZERO)
        .with_polling_interval(Duration::ZERO);
    assert_eq!(waiter.timeout, DEFAULT_TIMEOUT);
    assert_eq!(waiter.polling_interval, DEFAULT_POLLING_INTERVAL);
}
