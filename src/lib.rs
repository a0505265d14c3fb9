//! Provisioning primitives for an IaaS REST API.
//!
//! The crate polls resources until they reach a target state
//! ([`StatePollingWaiter`]), orchestrates a server build with its disks and
//! lifecycle hooks ([`ServerBuilder`]), and runs generic
//! create/read/update/delete acceptance scenarios ([`CrudTestCase`]). Every
//! layer talks to the provider through the capability traits in [`client`],
//! implemented over HTTP by [`http`] and in memory by [`test_support`].

pub mod builder;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod harness;
pub mod http;
pub mod resources;
pub mod test_support;
pub mod types;
pub mod waiter;

pub use builder::{
    BuildError, BuildEvent, BuildFailure, BuildPlan, BuildResult, BuildStage, DiskBuilder,
    DiskSpec, NicSpec, ServerBuilder,
};
pub use client::{BuildClient, StateSnapshot};
pub use config::{ClientConfig, ConfigError};
pub use context::{CancelHandle, ContextError, WaitContext};
pub use error::ApiError;
pub use harness::{CrudStep, CrudTestCase, Expectation, HarnessError, Phase, TestContext};
pub use http::{HttpBuildClient, HttpCaller, HttpSettings};
pub use test_support::FakeCloud;
pub use types::{Availability, InstanceStatus, OsType, ResourceId, Zone};
pub use waiter::{
    PollTarget, StatePollingWaiter, WaitError, WaitSettings, wait_until_available,
    wait_until_down, wait_until_up,
};
