//! Capability traits implemented by resource clients.
//!
//! Every resource kind is reached through the same small set of capability
//! traits instead of a bespoke method set per kind. The builder and harness
//! only depend on these traits, so an HTTP client, the in-memory fake or a
//! test double can be swapped in freely.

use std::future::Future;
use std::pin::Pin;

use crate::error::ApiError;
use crate::resources::{
    Archive, ArchiveQuery, Disk, DiskCreateRequest, DiskEditRequest, DiskPlan, DiskPlanQuery,
    GeneratedSshKey, Note, NoteCreateRequest, Server, ServerCreateRequest, ServerPlan,
    ServerPlanQuery, ServerUpdateRequest, ShutdownOption, SshKeyGenerateRequest,
};
use crate::types::{Availability, InstanceStatus, ResourceId, Zone};

/// Future returned by client operations.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// State a read result may expose to the polling layer.
///
/// Resource kinds without a power state keep the default `None`.
pub trait StateSnapshot {
    /// Identifier of the resource, when the result carries one.
    fn resource_id(&self) -> Option<ResourceId> {
        None
    }

    /// Power state, for appliance-backed resources.
    fn instance_status(&self) -> Option<InstanceStatus> {
        None
    }

    /// Lifecycle state.
    fn availability(&self) -> Option<Availability> {
        None
    }
}

/// Page of results returned by a find call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FindResult<T> {
    /// Total number of matches reported by the provider.
    pub total: usize,
    /// Matches in provider order.
    pub items: Vec<T>,
}

/// Resources that can be created.
pub trait Creatable: Send + Sync {
    /// Request body.
    type Params: Sync;
    /// Created resource.
    type Output: Send;

    /// Creates a resource in `zone`.
    fn create<'a>(
        &'a self,
        zone: &'a Zone,
        params: &'a Self::Params,
    ) -> ClientFuture<'a, Self::Output>;
}

/// Resources that can be read by identifier.
pub trait Readable: Send + Sync {
    /// Read result.
    type Output: Send;

    /// Reads the current state of `id`.
    fn read<'a>(&'a self, zone: &'a Zone, id: ResourceId) -> ClientFuture<'a, Self::Output>;
}

/// Resources with mutable attributes.
pub trait Updatable: Send + Sync {
    /// Request body.
    type Params: Sync;
    /// Updated resource.
    type Output: Send;

    /// Updates `id` and returns the new state.
    fn update<'a>(
        &'a self,
        zone: &'a Zone,
        id: ResourceId,
        params: &'a Self::Params,
    ) -> ClientFuture<'a, Self::Output>;
}

/// Resources that can be deleted.
pub trait Deletable: Send + Sync {
    /// Deletes `id`.
    fn delete<'a>(&'a self, zone: &'a Zone, id: ResourceId) -> ClientFuture<'a, ()>;
}

/// Resources that can be searched.
pub trait Findable: Send + Sync {
    /// Search conditions.
    type Condition: Sync;
    /// Result item.
    type Item: Send;

    /// Lists resources matching `condition`.
    fn find<'a>(
        &'a self,
        zone: &'a Zone,
        condition: &'a Self::Condition,
    ) -> ClientFuture<'a, FindResult<Self::Item>>;
}

/// Appliance-backed resources with a power state.
pub trait PowerControllable: Send + Sync {
    /// Powers the resource on.
    fn boot<'a>(&'a self, zone: &'a Zone, id: ResourceId) -> ClientFuture<'a, ()>;

    /// Powers the resource off.
    fn shutdown<'a>(
        &'a self,
        zone: &'a Zone,
        id: ResourceId,
        option: ShutdownOption,
    ) -> ClientFuture<'a, ()>;
}

/// Server operations used by the builder and harness.
pub trait ServerOps:
    Creatable<Params = ServerCreateRequest, Output = Server>
    + Readable<Output = Server>
    + Updatable<Params = ServerUpdateRequest, Output = Server>
    + Deletable
    + PowerControllable
{
    /// Inserts an ISO image into the server's virtual drive.
    fn insert_cdrom<'a>(
        &'a self,
        zone: &'a Zone,
        id: ResourceId,
        cdrom_id: ResourceId,
    ) -> ClientFuture<'a, ()>;

    /// Applies a packet filter to one of the server's interfaces.
    fn connect_packet_filter<'a>(
        &'a self,
        zone: &'a Zone,
        interface_id: ResourceId,
        packet_filter_id: ResourceId,
    ) -> ClientFuture<'a, ()>;
}

/// Disk operations used by the disk builder.
pub trait DiskOps:
    Creatable<Params = DiskCreateRequest, Output = Disk> + Readable<Output = Disk> + Deletable
{
    /// Applies guest customisation to the disk.
    fn edit<'a>(
        &'a self,
        zone: &'a Zone,
        id: ResourceId,
        params: &'a DiskEditRequest,
    ) -> ClientFuture<'a, ()>;
}

/// SSH key operations used for generated key pairs.
pub trait SshKeyOps: Deletable {
    /// Generates a key pair server-side and registers its public half.
    fn generate<'a>(
        &'a self,
        zone: &'a Zone,
        params: &'a SshKeyGenerateRequest,
    ) -> ClientFuture<'a, GeneratedSshKey>;
}

/// Startup script operations.
pub trait NoteOps: Creatable<Params = NoteCreateRequest, Output = Note> + Deletable {}

impl<T> NoteOps for T where T: Creatable<Params = NoteCreateRequest, Output = Note> + Deletable {}

/// Finder for server plans.
pub trait ServerPlanFinder: Findable<Condition = ServerPlanQuery, Item = ServerPlan> {}

impl<T> ServerPlanFinder for T where T: Findable<Condition = ServerPlanQuery, Item = ServerPlan> {}

/// Finder for disk plans.
pub trait DiskPlanFinder: Findable<Condition = DiskPlanQuery, Item = DiskPlan> {}

impl<T> DiskPlanFinder for T where T: Findable<Condition = DiskPlanQuery, Item = DiskPlan> {}

/// Finder for archives.
pub trait ArchiveFinder: Findable<Condition = ArchiveQuery, Item = Archive> {}

impl<T> ArchiveFinder for T where T: Findable<Condition = ArchiveQuery, Item = Archive> {}

/// Bundle of resource clients the builder needs.
///
/// The caller constructs the bundle and hands it to the builder explicitly;
/// nothing in this crate keeps a process-wide client.
pub trait BuildClient: Send + Sync {
    /// Server client.
    type Servers: ServerOps;
    /// Disk client.
    type Disks: DiskOps;
    /// Server plan finder.
    type ServerPlans: ServerPlanFinder;
    /// Disk plan finder.
    type DiskPlans: DiskPlanFinder;
    /// Archive finder.
    type Archives: ArchiveFinder;
    /// SSH key client.
    type SshKeys: SshKeyOps;
    /// Startup script client.
    type Notes: NoteOps;

    /// Returns the server client.
    fn servers(&self) -> &Self::Servers;
    /// Returns the disk client.
    fn disks(&self) -> &Self::Disks;
    /// Returns the server plan finder.
    fn server_plans(&self) -> &Self::ServerPlans;
    /// Returns the disk plan finder.
    fn disk_plans(&self) -> &Self::DiskPlans;
    /// Returns the archive finder.
    fn archives(&self) -> &Self::Archives;
    /// Returns the SSH key client.
    fn ssh_keys(&self) -> &Self::SshKeys;
    /// Returns the startup script client.
    fn notes(&self) -> &Self::Notes;
}
