//! Lifecycle test harness for resource clients.
//!
//! A [`CrudTestCase`] drives one resource through its whole lifecycle with
//! caller-supplied steps: setup, create, wait for startup, read, updates,
//! shutdown when running, delete, a read that must now report not-found,
//! and cleanup. Cleanup runs whether or not an earlier phase failed.

mod expectation;

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error as ThisError;

use crate::client::StateSnapshot;
use crate::context::WaitContext;
use crate::error::ApiError;
use crate::types::{Availability, InstanceStatus, ResourceId, Zone};
use crate::waiter::{StatePollingWaiter, WaitSettings};

pub use expectation::Expectation;

/// Error type returned by caller steps.
pub type BoxError = Box<dyn Error + Send + Sync>;
/// Future returned by a caller step.
pub type StepFuture<T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send>>;
/// Caller step.
pub type StepFn<C, T> = Arc<dyn Fn(TestContext, C) -> StepFuture<T> + Send + Sync>;
/// Assertion over a step result.
pub type CheckFn<T> = Arc<dyn Fn(&TestContext, &T) -> Result<(), BoxError> + Send + Sync>;

#[derive(Debug, Default)]
struct ContextState {
    id: Option<ResourceId>,
    values: serde_json::Map<String, Value>,
}

/// State shared between the steps of one run.
#[derive(Clone, Debug)]
pub struct TestContext {
    zone: Zone,
    state: Arc<Mutex<ContextState>>,
}

impl TestContext {
    /// Creates an empty context for `zone`.
    #[must_use]
    pub fn new(zone: Zone) -> Self {
        Self {
            zone,
            state: Arc::new(Mutex::new(ContextState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Zone the run targets.
    #[must_use]
    pub const fn zone(&self) -> &Zone {
        &self.zone
    }

    /// Identifier of the resource under test, once created.
    #[must_use]
    pub fn id(&self) -> Option<ResourceId> {
        self.lock().id
    }

    /// Records the identifier of the resource under test.
    pub fn set_id(&self, id: ResourceId) {
        self.lock().id = Some(id);
    }

    /// Identifier of the resource under test.
    ///
    /// # Errors
    ///
    /// Fails when no identifier was recorded yet.
    pub fn require_id(&self) -> Result<ResourceId, BoxError> {
        self.id()
            .ok_or_else(|| BoxError::from("no resource ID recorded in the test context"))
    }

    /// Stores a value for later steps.
    ///
    /// # Errors
    ///
    /// Returns the serialisation error when `value` cannot be turned into
    /// JSON.
    pub fn set_value(&self, key: &str, value: &impl Serialize) -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(value)?;
        self.lock().values.insert(key.to_owned(), json);
        Ok(())
    }

    /// Value stored under `key`.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<Value> {
        self.lock().values.get(key).cloned()
    }
}

/// One caller step with its optional assertion.
pub struct CrudStep<C, T> {
    func: StepFn<C, T>,
    check: Option<CheckFn<T>>,
    skip_extract_id: bool,
}

impl<C, T> Clone for CrudStep<C, T> {
    fn clone(&self) -> Self {
        Self {
            func: Arc::clone(&self.func),
            check: self.check.clone(),
            skip_extract_id: self.skip_extract_id,
        }
    }
}

impl<C, T> fmt::Debug for CrudStep<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrudStep")
            .field("has_check", &self.check.is_some())
            .field("skip_extract_id", &self.skip_extract_id)
            .finish_non_exhaustive()
    }
}

impl<C: 'static, T: 'static> CrudStep<C, T> {
    /// Wraps an async step function.
    #[must_use]
    pub fn new<F, Fut>(step: F) -> Self
    where
        F: Fn(TestContext, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |ctx: TestContext, caller: C| -> StepFuture<T> {
                Box::pin(step(ctx, caller))
            }),
            check: None,
            skip_extract_id: false,
        }
    }

    /// Runs `check` against the step result.
    #[must_use]
    pub fn with_check(
        mut self,
        check: impl Fn(&TestContext, &T) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.check = Some(Arc::new(check));
        self
    }

    /// Compares the step result with `expectation`.
    #[must_use]
    pub fn expect(mut self, expectation: Expectation) -> Self
    where
        T: Serialize,
    {
        self.check = Some(expectation.into_check());
        self
    }

    /// Keeps the step result from overwriting the recorded identifier.
    #[must_use]
    pub const fn skip_extract_id(mut self) -> Self {
        self.skip_extract_id = true;
        self
    }
}

/// Lifecycle phase of a harness run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Caller setup.
    Setup,
    /// Resource creation.
    Create,
    /// Waiting for the created resource to settle.
    StartupWait,
    /// First read.
    Read,
    /// Update at the given position.
    Update(usize),
    /// Power off and wait for down.
    Shutdown,
    /// Resource deletion.
    Delete,
    /// Read after delete, which must report not-found.
    ReadAfterDelete,
    /// Caller cleanup.
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => f.write_str("setup"),
            Self::Create => f.write_str("create"),
            Self::StartupWait => f.write_str("startup wait"),
            Self::Read => f.write_str("read"),
            Self::Update(index) => write!(f, "update #{}", index + 1),
            Self::Shutdown => f.write_str("shutdown"),
            Self::Delete => f.write_str("delete"),
            Self::ReadAfterDelete => f.write_str("read after delete"),
            Self::Cleanup => f.write_str("cleanup"),
        }
    }
}

/// Failure of one harness phase.
#[derive(Clone, Debug, ThisError, Eq, PartialEq)]
#[error("{phase} phase failed: {message}")]
pub struct HarnessError {
    /// Phase that failed.
    pub phase: Phase,
    /// What went wrong.
    pub message: String,
}

impl HarnessError {
    fn new(phase: Phase, message: impl fmt::Display) -> Self {
        Self {
            phase,
            message: message.to_string(),
        }
    }
}

type CallerFactory<C> = Arc<dyn Fn() -> C + Send + Sync>;

/// Full lifecycle test of one resource kind.
pub struct CrudTestCase<C, T> {
    zone: Zone,
    caller: CallerFactory<C>,
    setup: Option<CrudStep<C, ()>>,
    create: Option<CrudStep<C, T>>,
    read: CrudStep<C, T>,
    updates: Vec<CrudStep<C, T>>,
    shutdown: Option<CrudStep<C, ()>>,
    delete: Option<CrudStep<C, ()>>,
    cleanup: Option<CrudStep<C, ()>>,
    ignore_startup_wait: bool,
    settings: WaitSettings,
}

impl<C, T> fmt::Debug for CrudTestCase<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrudTestCase")
            .field("zone", &self.zone)
            .field("updates", &self.updates.len())
            .field("ignore_startup_wait", &self.ignore_startup_wait)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<C, T> CrudTestCase<C, T>
where
    C: Clone + Send + Sync + 'static,
    T: StateSnapshot + Send + 'static,
{
    /// Creates a test case. `caller` builds the client handed to every step;
    /// `read` is the only mandatory step.
    #[must_use]
    pub fn new(
        zone: Zone,
        caller: impl Fn() -> C + Send + Sync + 'static,
        read: CrudStep<C, T>,
    ) -> Self {
        Self {
            zone,
            caller: Arc::new(caller),
            setup: None,
            create: None,
            read,
            updates: Vec::new(),
            shutdown: None,
            delete: None,
            cleanup: None,
            ignore_startup_wait: false,
            settings: WaitSettings::default(),
        }
    }

    /// Runs `step` before anything else.
    #[must_use]
    pub fn setup(mut self, step: CrudStep<C, ()>) -> Self {
        self.setup = Some(step);
        self
    }

    /// Creates the resource; its identifier is recorded in the context.
    #[must_use]
    pub fn create(mut self, step: CrudStep<C, T>) -> Self {
        self.create = Some(step);
        self
    }

    /// Appends an update step.
    #[must_use]
    pub fn update(mut self, step: CrudStep<C, T>) -> Self {
        self.updates.push(step);
        self
    }

    /// Powers the resource off when a fresh read shows it running.
    #[must_use]
    pub fn shutdown(mut self, step: CrudStep<C, ()>) -> Self {
        self.shutdown = Some(step);
        self
    }

    /// Deletes the resource, after which a read must report not-found.
    #[must_use]
    pub fn delete(mut self, step: CrudStep<C, ()>) -> Self {
        self.delete = Some(step);
        self
    }

    /// Runs `step` last, even when an earlier phase failed.
    #[must_use]
    pub fn cleanup(mut self, step: CrudStep<C, ()>) -> Self {
        self.cleanup = Some(step);
        self
    }

    /// Skips waiting for the created resource to settle.
    #[must_use]
    pub const fn ignore_startup_wait(mut self, ignore: bool) -> Self {
        self.ignore_startup_wait = ignore;
        self
    }

    /// Overrides the timing of the startup and shutdown waits.
    #[must_use]
    pub const fn with_wait_settings(mut self, settings: WaitSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Runs every phase in order and returns the shared context.
    ///
    /// # Errors
    ///
    /// Returns the first failing phase. A cleanup failure is reported only
    /// when every earlier phase succeeded.
    pub async fn run(&self, ctx: &WaitContext) -> Result<TestContext, HarnessError> {
        let test_ctx = TestContext::new(self.zone.clone());
        let caller = (self.caller)();

        let outcome = self.run_phases(ctx, &test_ctx, &caller).await;

        let cleanup = match &self.cleanup {
            Some(step) => self
                .run_step(ctx, Phase::Cleanup, step, &test_ctx, &caller)
                .await,
            None => Ok(()),
        };

        match (outcome, cleanup) {
            (Err(err), Err(cleanup_err)) => {
                tracing::warn!(error = %cleanup_err, "cleanup failed after an earlier failure");
                Err(err)
            }
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Ok(()), Ok(())) => Ok(test_ctx),
        }
    }

    async fn run_phases(
        &self,
        ctx: &WaitContext,
        test_ctx: &TestContext,
        caller: &C,
    ) -> Result<(), HarnessError> {
        if let Some(step) = &self.setup {
            self.run_step(ctx, Phase::Setup, step, test_ctx, caller).await?;
        }

        if let Some(step) = &self.create {
            let created = self.run_step(ctx, Phase::Create, step, test_ctx, caller).await?;
            record_id(step, &created, test_ctx);
            if !self.ignore_startup_wait {
                self.wait_until(ctx, Phase::StartupWait, test_ctx, caller, is_settled)
                    .await?;
            }
        }

        let read = self.run_step(ctx, Phase::Read, &self.read, test_ctx, caller).await?;
        record_id(&self.read, &read, test_ctx);
        for (index, step) in self.updates.iter().enumerate() {
            let updated = self
                .run_step(ctx, Phase::Update(index), step, test_ctx, caller)
                .await?;
            record_id(step, &updated, test_ctx);
        }

        if let Some(step) = &self.shutdown {
            let current = self.read_current(ctx, Phase::Shutdown, test_ctx, caller).await?;
            if current.instance_status() == Some(InstanceStatus::Up) {
                self.run_step(ctx, Phase::Shutdown, step, test_ctx, caller).await?;
                self.wait_until(ctx, Phase::Shutdown, test_ctx, caller, is_down)
                    .await?;
            } else {
                tracing::debug!("resource not running, skipping shutdown");
            }
        }

        if let Some(step) = &self.delete {
            self.run_step(ctx, Phase::Delete, step, test_ctx, caller).await?;
            self.expect_gone(ctx, test_ctx, caller).await?;
        }
        Ok(())
    }

    async fn run_step<R>(
        &self,
        ctx: &WaitContext,
        phase: Phase,
        step: &CrudStep<C, R>,
        test_ctx: &TestContext,
        caller: &C,
    ) -> Result<R, HarnessError> {
        tracing::info!(%phase, "running harness phase");
        let call = (step.func)(test_ctx.clone(), caller.clone());
        let value = tokio::select! {
            biased;
            reason = ctx.done() => return Err(HarnessError::new(phase, reason)),
            result = call => result.map_err(|err| HarnessError::new(phase, err))?,
        };
        if let Some(check) = &step.check {
            check(test_ctx, &value).map_err(|err| HarnessError::new(phase, err))?;
        }
        Ok(value)
    }

    async fn wait_until(
        &self,
        ctx: &WaitContext,
        phase: Phase,
        test_ctx: &TestContext,
        caller: &C,
        ready: fn(&T) -> bool,
    ) -> Result<T, HarnessError> {
        let read = &self.read.func;
        StatePollingWaiter::state_check(move |state: &T| Ok(ready(state)))
            .with_settings(self.settings)
            .wait_for_state(ctx, || {
                let call = read(test_ctx.clone(), caller.clone());
                async move { call.await.map_err(into_api_error) }
            })
            .await
            .map_err(|err| HarnessError::new(phase, err))
    }

    async fn read_current(
        &self,
        ctx: &WaitContext,
        phase: Phase,
        test_ctx: &TestContext,
        caller: &C,
    ) -> Result<T, HarnessError> {
        let call = (self.read.func)(test_ctx.clone(), caller.clone());
        tokio::select! {
            biased;
            reason = ctx.done() => Err(HarnessError::new(phase, reason)),
            result = call => result.map_err(|err| HarnessError::new(phase, err)),
        }
    }

    async fn expect_gone(
        &self,
        ctx: &WaitContext,
        test_ctx: &TestContext,
        caller: &C,
    ) -> Result<(), HarnessError> {
        let phase = Phase::ReadAfterDelete;
        let call = (self.read.func)(test_ctx.clone(), caller.clone());
        let outcome = tokio::select! {
            biased;
            reason = ctx.done() => return Err(HarnessError::new(phase, reason)),
            result = call => result,
        };
        match outcome {
            Ok(_) => Err(HarnessError::new(
                phase,
                "resource is still readable after delete",
            )),
            Err(err) if is_not_found(err.as_ref()) => Ok(()),
            Err(err) => Err(HarnessError::new(
                phase,
                format!("expected a not-found error, got: {err}"),
            )),
        }
    }
}

fn record_id<C, T: StateSnapshot>(step: &CrudStep<C, T>, result: &T, test_ctx: &TestContext) {
    if !step.skip_extract_id
        && let Some(id) = result.resource_id()
    {
        test_ctx.set_id(id);
    }
}

fn is_settled<T: StateSnapshot>(state: &T) -> bool {
    let available = state
        .availability()
        .is_none_or(|availability| availability == Availability::Available);
    let powered = state
        .instance_status()
        .is_none_or(|status| !is_transitional(&status));
    available && powered
}

const fn is_transitional(status: &InstanceStatus) -> bool {
    matches!(status, InstanceStatus::Unknown | InstanceStatus::Cleaning)
}

fn is_down<T: StateSnapshot>(state: &T) -> bool {
    state.instance_status() == Some(InstanceStatus::Down)
}

fn is_not_found(err: &(dyn Error + Send + Sync + 'static)) -> bool {
    err.downcast_ref::<ApiError>()
        .is_some_and(ApiError::is_not_found)
}

fn into_api_error(err: BoxError) -> ApiError {
    match err.downcast::<ApiError>() {
        Ok(api) => *api,
        Err(other) => ApiError::Other {
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests;
