//! Lifecycle hooks fired at fixed points of a build.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::BuildResult;
use super::plan::BuildPlan;

/// Point in the build at which hooks fire.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BuildEvent {
    /// Before anything else happens.
    Start,
    /// Before the server plan lookup.
    BeforePlanLookup,
    /// After the server plan was resolved.
    AfterPlanLookup,
    /// Before the server create call.
    BeforeServerCreate,
    /// After the server exists.
    AfterServerCreate,
    /// Before each disk is built and connected.
    BeforeDiskConnect,
    /// After each disk is connected.
    AfterDiskConnect,
    /// Before the ISO image is inserted.
    BeforeCdromInsert,
    /// After the ISO image is inserted.
    AfterCdromInsert,
    /// Before the server is powered on.
    BeforeBoot,
    /// After the server reported up.
    AfterBoot,
    /// After every step succeeded.
    Complete,
}

impl fmt::Display for BuildEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Callback invoked with the event, the plan and the in-progress result.
pub type BuildHook = Arc<dyn Fn(BuildEvent, &BuildPlan, &BuildResult) + Send + Sync>;

/// Ordered hooks per event.
#[derive(Clone, Default)]
pub struct EventHooks {
    hooks: HashMap<BuildEvent, Vec<BuildHook>>,
}

impl EventHooks {
    /// Registers `hook` for `event`. Hooks for one event run in
    /// registration order.
    pub fn register(
        &mut self,
        event: BuildEvent,
        hook: impl Fn(BuildEvent, &BuildPlan, &BuildResult) + Send + Sync + 'static,
    ) {
        self.hooks.entry(event).or_default().push(Arc::new(hook));
    }

    /// Number of hooks registered for `event`.
    #[must_use]
    pub fn len(&self, event: BuildEvent) -> usize {
        self.hooks.get(&event).map_or(0, Vec::len)
    }

    /// Returns `true` when no hook is registered at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.values().all(Vec::is_empty)
    }

    pub(crate) fn fire(&self, event: BuildEvent, plan: &BuildPlan, result: &BuildResult) {
        let Some(hooks) = self.hooks.get(&event) else {
            return;
        };
        tracing::debug!(%event, count = hooks.len(), "firing build hooks");
        for hook in hooks {
            hook(event, plan, result);
        }
    }
}

impl fmt::Debug for EventHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<_> = self
            .hooks
            .iter()
            .map(|(event, hooks)| (*event, hooks.len()))
            .collect();
        counts.sort_by_key(|(event, _)| event.to_string());
        f.debug_struct("EventHooks").field("counts", &counts).finish()
    }
}
