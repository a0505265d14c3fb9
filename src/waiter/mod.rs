//! Polling loop that waits for a remote resource to reach a target state.
//!
//! The waiter repeatedly invokes a caller-supplied read function until the
//! result satisfies a [`PollTarget`], the read fails terminally, or the
//! [`WaitContext`] finishes. All state is local to a single
//! [`StatePollingWaiter::wait_for_state`] call, so one waiter can serve many
//! concurrent waits against independent resources.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

use crate::client::{Readable, StateSnapshot};
use crate::context::{ContextError, WaitContext};
use crate::error::ApiError;
use crate::types::{Availability, InstanceStatus, ResourceId, Zone};

/// Overall budget applied when the caller does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);
/// Delay between polls applied when the caller does not set one.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(5);
/// Post-create not-found responses absorbed by builder and harness waits.
pub const DEFAULT_NOT_FOUND_RETRY: u32 = 3;

/// Predicate over a read result. `Ok(true)` ends the wait successfully,
/// `Err` ends it with [`WaitError::StateCheck`].
pub type StateCheckFn<T> = Box<dyn Fn(&T) -> Result<bool, String> + Send + Sync>;

/// Condition a wait is waiting for. Exactly one mode is active per waiter.
pub enum PollTarget<T> {
    /// Arbitrary predicate over the read result.
    StateCheck(StateCheckFn<T>),
    /// Any of the listed power states.
    InstanceStatus(Vec<InstanceStatus>),
    /// Any of the listed lifecycle states.
    Availability(Vec<Availability>),
}

impl<T> std::fmt::Debug for PollTarget<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateCheck(_) => f.write_str("StateCheck(<fn>)"),
            Self::InstanceStatus(targets) => f.debug_tuple("InstanceStatus").field(targets).finish(),
            Self::Availability(targets) => f.debug_tuple("Availability").field(targets).finish(),
        }
    }
}

/// Errors that end a wait.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WaitError {
    /// The timeout or an inherited deadline passed before the target held.
    #[error("timed out after {timeout:?} waiting for resource state")]
    Timeout {
        /// Budget configured on the waiter.
        timeout: Duration,
    },
    /// The parent context was cancelled.
    #[error("wait cancelled")]
    Cancelled,
    /// Strict mode saw a state value outside the known enumeration.
    #[error("unexpected state value '{value}'")]
    UnexpectedState {
        /// Raw value reported by the provider.
        value: String,
    },
    /// The read result carries no state of the targeted kind.
    #[error("read result does not expose {expected}")]
    StateUnavailable {
        /// Kind of state the target needed.
        expected: String,
    },
    /// The predicate reported an error.
    #[error("state check failed: {message}")]
    StateCheck {
        /// Message returned by the predicate.
        message: String,
    },
    /// The read failed with a non-retryable error, or the not-found budget
    /// ran out.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl WaitError {
    /// Returns `true` when the wait gave up because time ran out.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` when the wait was cancelled by the caller.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` when the resource stayed invisible past the retry budget.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Api(err) if err.is_not_found())
    }

    const fn from_context(reason: ContextError, timeout: Duration) -> Self {
        match reason {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::Timeout { timeout },
        }
    }
}

/// Timing knobs shared by the builder, the harness and the CLI.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitSettings {
    /// Overall budget per wait.
    pub timeout: Duration,
    /// Delay between polls.
    pub polling_interval: Duration,
    /// Consecutive not-found responses tolerated.
    pub not_found_retry: u32,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            not_found_retry: DEFAULT_NOT_FOUND_RETRY,
        }
    }
}

/// Polls a resource until a [`PollTarget`] holds.
#[derive(Debug)]
pub struct StatePollingWaiter<T> {
    target: PollTarget<T>,
    timeout: Duration,
    polling_interval: Duration,
    not_found_retry: u32,
    raise_error_with_unknown_state: bool,
}

impl<T> StatePollingWaiter<T> {
    /// Creates a waiter for `target` with default timing and no not-found
    /// tolerance.
    #[must_use]
    pub const fn new(target: PollTarget<T>) -> Self {
        Self {
            target,
            timeout: DEFAULT_TIMEOUT,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            not_found_retry: 0,
            raise_error_with_unknown_state: false,
        }
    }

    /// Waits until the power state is one of `targets`.
    #[must_use]
    pub fn instance_status(targets: impl IntoIterator<Item = InstanceStatus>) -> Self {
        Self::new(PollTarget::InstanceStatus(targets.into_iter().collect()))
    }

    /// Waits until the lifecycle state is one of `targets`.
    #[must_use]
    pub fn availability(targets: impl IntoIterator<Item = Availability>) -> Self {
        Self::new(PollTarget::Availability(targets.into_iter().collect()))
    }

    /// Waits until `check` returns `Ok(true)`.
    #[must_use]
    pub fn state_check(check: impl Fn(&T) -> Result<bool, String> + Send + Sync + 'static) -> Self {
        Self::new(PollTarget::StateCheck(Box::new(check)))
    }

    /// Sets the overall budget. Zero keeps the default.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    /// Sets the delay between polls. Zero keeps the default.
    #[must_use]
    pub const fn with_polling_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.polling_interval = interval;
        }
        self
    }

    /// Sets how many consecutive not-found reads are tolerated.
    #[must_use]
    pub const fn with_not_found_retry(mut self, retries: u32) -> Self {
        self.not_found_retry = retries;
        self
    }

    /// Fails immediately on state values outside the known enumeration
    /// instead of polling on.
    #[must_use]
    pub const fn raise_error_with_unknown_state(mut self, strict: bool) -> Self {
        self.raise_error_with_unknown_state = strict;
        self
    }

    /// Applies every field of `settings`.
    #[must_use]
    pub const fn with_settings(self, settings: WaitSettings) -> Self {
        self.with_timeout(settings.timeout)
            .with_polling_interval(settings.polling_interval)
            .with_not_found_retry(settings.not_found_retry)
    }
}

impl<T: StateSnapshot> StatePollingWaiter<T> {
    /// Calls `read` until the target holds and returns that read result.
    ///
    /// The wait runs under a child of `ctx` bounded by the configured
    /// timeout. Cancellation and deadlines are observed during reads and
    /// during the sleep between polls.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Timeout`] or [`WaitError::Cancelled`] when the
    /// context finishes first, [`WaitError::Api`] for any read error other
    /// than a not-found absorbed by the retry budget, and the target-specific
    /// variants when the read result cannot satisfy the target.
    pub async fn wait_for_state<F, Fut>(&self, ctx: &WaitContext, mut read: F) -> Result<T, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let scoped = ctx.with_timeout(self.timeout);
        let mut not_found_budget = self.not_found_retry;
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            let outcome = tokio::select! {
                biased;
                reason = scoped.done() => return Err(WaitError::from_context(reason, self.timeout)),
                result = read() => result,
            };

            match outcome {
                Ok(state) => {
                    if self.is_satisfied(&state)? {
                        tracing::debug!(attempt, "resource reached target state");
                        return Ok(state);
                    }
                    not_found_budget = self.not_found_retry;
                    tracing::debug!(attempt, "resource not in target state yet");
                }
                Err(err) if err.is_not_found() => {
                    if not_found_budget == 0 {
                        return Err(WaitError::Api(err));
                    }
                    not_found_budget -= 1;
                    tracing::warn!(attempt, remaining = not_found_budget, "resource not visible yet");
                }
                Err(err) => return Err(WaitError::Api(err)),
            }

            tokio::select! {
                biased;
                reason = scoped.done() => return Err(WaitError::from_context(reason, self.timeout)),
                () = sleep(self.polling_interval) => {}
            }
        }
    }

    fn is_satisfied(&self, state: &T) -> Result<bool, WaitError> {
        match &self.target {
            PollTarget::StateCheck(check) => {
                check(state).map_err(|message| WaitError::StateCheck { message })
            }
            PollTarget::InstanceStatus(targets) => {
                let status = state
                    .instance_status()
                    .ok_or_else(|| WaitError::StateUnavailable {
                        expected: String::from("an instance status"),
                    })?;
                self.check_known(status.is_known(), status.as_str())?;
                Ok(targets.contains(&status))
            }
            PollTarget::Availability(targets) => {
                let availability =
                    state
                        .availability()
                        .ok_or_else(|| WaitError::StateUnavailable {
                            expected: String::from("an availability"),
                        })?;
                self.check_known(availability.is_known(), availability.as_str())?;
                Ok(targets.contains(&availability))
            }
        }
    }

    fn check_known(&self, known: bool, value: &str) -> Result<(), WaitError> {
        if !known && self.raise_error_with_unknown_state {
            return Err(WaitError::UnexpectedState {
                value: value.to_owned(),
            });
        }
        Ok(())
    }
}

/// Waits until the resource `id` reports [`InstanceStatus::Up`].
///
/// # Errors
///
/// Returns [`WaitError`] as described on
/// [`StatePollingWaiter::wait_for_state`].
pub async fn wait_until_up<C>(
    ctx: &WaitContext,
    client: &C,
    zone: &Zone,
    id: ResourceId,
    settings: WaitSettings,
) -> Result<C::Output, WaitError>
where
    C: Readable + ?Sized,
    C::Output: StateSnapshot,
{
    StatePollingWaiter::instance_status([InstanceStatus::Up])
        .with_settings(settings)
        .wait_for_state(ctx, || client.read(zone, id))
        .await
}

/// Waits until the resource `id` reports [`InstanceStatus::Down`].
///
/// # Errors
///
/// Returns [`WaitError`] as described on
/// [`StatePollingWaiter::wait_for_state`].
pub async fn wait_until_down<C>(
    ctx: &WaitContext,
    client: &C,
    zone: &Zone,
    id: ResourceId,
    settings: WaitSettings,
) -> Result<C::Output, WaitError>
where
    C: Readable + ?Sized,
    C::Output: StateSnapshot,
{
    StatePollingWaiter::instance_status([InstanceStatus::Down])
        .with_settings(settings)
        .wait_for_state(ctx, || client.read(zone, id))
        .await
}

/// Waits until the resource `id` reports [`Availability::Available`].
///
/// # Errors
///
/// Returns [`WaitError`] as described on
/// [`StatePollingWaiter::wait_for_state`].
pub async fn wait_until_available<C>(
    ctx: &WaitContext,
    client: &C,
    zone: &Zone,
    id: ResourceId,
    settings: WaitSettings,
) -> Result<C::Output, WaitError>
where
    C: Readable + ?Sized,
    C::Output: StateSnapshot,
{
    StatePollingWaiter::availability([Availability::Available])
        .with_settings(settings)
        .wait_for_state(ctx, || client.read(zone, id))
        .await
}

#[cfg(test)]
mod tests;
