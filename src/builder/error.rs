//! Errors raised while validating or executing a build.

use std::fmt;

use thiserror::Error;

use crate::context::ContextError;
use crate::error::ApiError;
use crate::types::{Commitment, DiskPlanKind, OsType, PlanGeneration};
use crate::waiter::WaitError;

use super::BuildResult;

/// Validation and execution errors.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BuildError {
    /// Additional NICs were requested without a primary NIC.
    #[error("a primary NIC is required when additional NICs are configured")]
    NicRequired,
    /// More additional NICs than the platform supports.
    #[error("at most {max} additional NICs are supported, got {count}")]
    TooManyAdditionalNics {
        /// Requested count.
        count: usize,
        /// Platform limit.
        max: usize,
    },
    /// The interface driver is not one the platform accepts.
    #[error("unsupported interface driver '{value}'")]
    UnsupportedInterfaceDriver {
        /// Raw driver value.
        value: String,
    },
    /// No server plan matches the requested shape.
    #[error(
        "server plan not found: cpu={cpu} memory={memory_gb}GB commitment={commitment} generation={generation}"
    )]
    ServerPlanNotFound {
        /// Requested CPU count.
        cpu: u32,
        /// Requested memory size.
        memory_gb: u32,
        /// Requested CPU allocation model.
        commitment: Commitment,
        /// Requested generation.
        generation: PlanGeneration,
    },
    /// No orderable disk plan of the requested kind exists.
    #[error("disk plan not found: {kind}")]
    DiskPlanNotFound {
        /// Requested storage class.
        kind: DiskPlanKind,
    },
    /// The disk plan exists but does not offer the requested size.
    #[error("disk size {size_gb}GB is not offered by the {kind} plan")]
    DiskSizeUnavailable {
        /// Requested storage class.
        kind: DiskPlanKind,
        /// Requested size.
        size_gb: u32,
    },
    /// The OS type does not belong to the family the source requires.
    #[error("OS type {os_type} is not a {expected} image")]
    UnsupportedOsType {
        /// Requested OS type.
        os_type: OsType,
        /// Family the disk source requires.
        expected: String,
    },
    /// Guest customisation was requested for a source that cannot take it.
    #[error("disk edit not supported: {reason}")]
    EditNotSupported {
        /// Why the source rejects customisation.
        reason: String,
    },
    /// No available public archive carries the OS type's tags.
    #[error("public archive for {os_type} not found")]
    ArchiveNotFound {
        /// Requested OS type.
        os_type: OsType,
    },
    /// A packet filter targets a NIC position the server does not have.
    #[error("server has no interface at position {index}")]
    InterfaceMissing {
        /// NIC position.
        index: usize,
    },
    /// A finder call failed.
    #[error("failed to look up {what}: {source}")]
    Lookup {
        /// What was being looked up.
        what: String,
        /// Underlying client error.
        source: ApiError,
    },
    /// The build context was cancelled or its deadline passed between waits.
    #[error("build interrupted: {0}")]
    Interrupted(ContextError),
    /// A create, update or power call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// A state wait failed.
    #[error(transparent)]
    Wait(#[from] WaitError),
}

impl BuildError {
    pub(crate) fn lookup(what: &str, source: ApiError) -> Self {
        Self::Lookup {
            what: what.to_owned(),
            source,
        }
    }
}

/// Step of the build workflow.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BuildStage {
    /// Defaults, NIC rules, plan resolution and disk checks.
    Validating,
    /// Creating the server resource.
    CreatingPrimary,
    /// Building and connecting disks.
    BuildingDisks,
    /// Applying packet filters per NIC.
    ConnectingPacketFilters,
    /// Inserting the ISO image.
    InsertingCdrom,
    /// Powering on and waiting for the server to come up.
    Booting,
    /// Every step finished.
    Done,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validating => "validating",
            Self::CreatingPrimary => "creating the server",
            Self::BuildingDisks => "building disks",
            Self::ConnectingPacketFilters => "connecting packet filters",
            Self::InsertingCdrom => "inserting the CD-ROM",
            Self::Booting => "booting",
            Self::Done => "done",
        };
        f.write_str(label)
    }
}

/// A failed build, with whatever was created before the failure.
///
/// Nothing is rolled back. The caller inspects `partial` to clean up.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("build failed while {stage}: {error}")]
pub struct BuildFailure {
    /// Step that failed.
    pub stage: BuildStage,
    /// Cause of the failure.
    #[source]
    pub error: BuildError,
    /// Resources created before the failure.
    pub partial: Box<BuildResult>,
}

impl BuildFailure {
    pub(crate) fn new(stage: BuildStage, error: BuildError, partial: &BuildResult) -> Self {
        Self {
            stage,
            error,
            partial: Box::new(partial.clone()),
        }
    }
}
