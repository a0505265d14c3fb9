//! In-memory provider double shared by unit tests, integration tests and the
//! CLI's fake mode.
//!
//! [`FakeCloud`] keeps every resource in one shared state and hands out one
//! handle per resource kind, each implementing the capability traits. State
//! changes that take time on the real platform (boot, shutdown, disk copy)
//! are scripted as transitions that complete after a configurable number of
//! reads, and freshly created resources can stay invisible for a number of
//! reads to mimic eventual consistency. Every call lands in a journal, and
//! any call can be made to fail.

mod env;
mod handles;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::client::BuildClient;
use crate::error::ApiError;
use crate::resources::{Archive, Disk, DiskPlan, DiskPlanSize, GeneratedSshKey, Note, Server, ServerPlan};
use crate::types::{
    Availability, Commitment, DiskPlanKind, InstanceStatus, OsType, PlanGeneration, ResourceId,
};

pub use env::EnvGuard;
pub use handles::{
    FakeArchives, FakeDiskPlans, FakeDisks, FakeNotes, FakeServerPlans, FakeServers, FakeSshKeys,
};

const FIRST_ID: u64 = 113_000_000_001;

/// Operation recorded in the call journal.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operation {
    /// Server create.
    ServerCreate,
    /// Server read.
    ServerRead,
    /// Server update.
    ServerUpdate,
    /// Server delete.
    ServerDelete,
    /// Server power on.
    ServerBoot,
    /// Server power off.
    ServerShutdown,
    /// ISO insertion.
    InsertCdrom,
    /// Packet filter connection.
    ConnectPacketFilter,
    /// Disk create.
    DiskCreate,
    /// Disk read.
    DiskRead,
    /// Disk customisation.
    DiskEdit,
    /// Disk delete.
    DiskDelete,
    /// Server plan search.
    ServerPlanFind,
    /// Disk plan search.
    DiskPlanFind,
    /// Archive search.
    ArchiveFind,
    /// SSH key generation.
    SshKeyGenerate,
    /// SSH key delete.
    SshKeyDelete,
    /// Note create.
    NoteCreate,
    /// Note delete.
    NoteDelete,
}

impl Operation {
    /// Returns `true` for calls that change provider state.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        !matches!(
            self,
            Self::ServerRead
                | Self::DiskRead
                | Self::ServerPlanFind
                | Self::DiskPlanFind
                | Self::ArchiveFind
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Journal entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Call {
    /// Operation invoked.
    pub operation: Operation,
    /// Target resource, when the call names one.
    pub id: Option<ResourceId>,
}

#[derive(Clone, Debug)]
enum Transition {
    Status(InstanceStatus),
    Availability(Availability),
}

#[derive(Clone, Debug)]
struct Pending {
    reads_left: u32,
    transition: Transition,
}

#[derive(Clone, Debug)]
struct Tracked<T> {
    value: T,
    hidden_reads: u32,
    pending: Option<Pending>,
}

impl<T> Tracked<T> {
    const fn new(value: T, hidden_reads: u32) -> Self {
        Self {
            value,
            hidden_reads,
            pending: None,
        }
    }
}

#[derive(Clone, Debug)]
struct Timing {
    not_found_reads: u32,
    boot_reads: u32,
    shutdown_reads: u32,
    disk_copy_reads: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            not_found_reads: 0,
            boot_reads: 1,
            shutdown_reads: 1,
            disk_copy_reads: 1,
        }
    }
}

#[derive(Debug)]
struct FakeState {
    next_id: u64,
    servers: BTreeMap<ResourceId, Tracked<Server>>,
    disks: BTreeMap<ResourceId, Tracked<Disk>>,
    notes: BTreeMap<ResourceId, Note>,
    ssh_keys: BTreeMap<ResourceId, GeneratedSshKey>,
    server_plans: Vec<ServerPlan>,
    disk_plans: Vec<DiskPlan>,
    archives: Vec<Archive>,
    timing: Timing,
    journal: Vec<Call>,
    counts: HashMap<Operation, usize>,
    failures: HashMap<(Operation, usize), ApiError>,
}

impl FakeState {
    fn empty() -> Self {
        Self {
            next_id: FIRST_ID,
            servers: BTreeMap::new(),
            disks: BTreeMap::new(),
            notes: BTreeMap::new(),
            ssh_keys: BTreeMap::new(),
            server_plans: Vec::new(),
            disk_plans: Vec::new(),
            archives: Vec::new(),
            timing: Timing::default(),
            journal: Vec::new(),
            counts: HashMap::new(),
            failures: HashMap::new(),
        }
    }

    fn allocate_id(&mut self) -> ResourceId {
        let id = ResourceId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Records the call and returns the injected failure, if any.
    fn enter(&mut self, operation: Operation, id: Option<ResourceId>) -> Result<(), ApiError> {
        self.journal.push(Call { operation, id });
        let count = self.counts.entry(operation).or_insert(0);
        *count += 1;
        let nth = *count;
        match self.failures.remove(&(operation, nth)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Advances a tracked resource by one read.
fn observe<T: Clone>(
    entry: &mut Tracked<T>,
    apply: impl FnOnce(&mut T, Transition),
) -> Option<T> {
    if entry.hidden_reads > 0 {
        entry.hidden_reads -= 1;
        return None;
    }
    if let Some(pending) = entry.pending.as_mut() {
        if pending.reads_left == 0 {
            if let Some(done) = entry.pending.take() {
                apply(&mut entry.value, done.transition);
            }
        } else {
            pending.reads_left -= 1;
        }
    }
    Some(entry.value.clone())
}

/// In-memory stand-in for the provider API.
#[derive(Clone)]
pub struct FakeCloud {
    state: Arc<Mutex<FakeState>>,
    servers: FakeServers,
    disks: FakeDisks,
    server_plans: FakeServerPlans,
    disk_plans: FakeDiskPlans,
    archives: FakeArchives,
    ssh_keys: FakeSshKeys,
    notes: FakeNotes,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FakeCloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("FakeCloud")
            .field("servers", &state.servers.len())
            .field("disks", &state.disks.len())
            .field("calls", &state.journal.len())
            .finish()
    }
}

impl FakeCloud {
    /// Creates a fake seeded with a standard catalog of plans and archives.
    #[must_use]
    pub fn new() -> Self {
        let cloud = Self::empty();
        {
            let mut state = cloud.lock();
            state.server_plans = standard_server_plans();
            state.disk_plans = standard_disk_plans();
            state.archives = standard_archives();
        }
        cloud
    }

    /// Creates a fake with an empty catalog.
    #[must_use]
    pub fn empty() -> Self {
        let state = Arc::new(Mutex::new(FakeState::empty()));
        Self {
            servers: FakeServers::new(Arc::clone(&state)),
            disks: FakeDisks::new(Arc::clone(&state)),
            server_plans: FakeServerPlans::new(Arc::clone(&state)),
            disk_plans: FakeDiskPlans::new(Arc::clone(&state)),
            archives: FakeArchives::new(Arc::clone(&state)),
            ssh_keys: FakeSshKeys::new(Arc::clone(&state)),
            notes: FakeNotes::new(Arc::clone(&state)),
            state,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        lock_state(&self.state)
    }

    /// Replaces the server plan catalog.
    pub fn set_server_plans(&self, plans: Vec<ServerPlan>) {
        self.lock().server_plans = plans;
    }

    /// Replaces the disk plan catalog.
    pub fn set_disk_plans(&self, plans: Vec<DiskPlan>) {
        self.lock().disk_plans = plans;
    }

    /// Replaces the archive catalog.
    pub fn set_archives(&self, archives: Vec<Archive>) {
        self.lock().archives = archives;
    }

    /// Resources created from now on answer not-found for `reads` reads.
    pub fn set_not_found_reads(&self, reads: u32) {
        self.lock().timing.not_found_reads = reads;
    }

    /// Reads that still report `down` after a boot.
    pub fn set_boot_reads(&self, reads: u32) {
        self.lock().timing.boot_reads = reads;
    }

    /// Reads that still report `up` after a shutdown.
    pub fn set_shutdown_reads(&self, reads: u32) {
        self.lock().timing.shutdown_reads = reads;
    }

    /// Reads that report `migrating` after a disk create or edit.
    pub fn set_disk_copy_reads(&self, reads: u32) {
        self.lock().timing.disk_copy_reads = reads;
    }

    /// Makes the `nth` call (1-based) of `operation` fail with `error`.
    pub fn fail_on(&self, operation: Operation, nth: usize, error: ApiError) {
        self.lock().failures.insert((operation, nth), error);
    }

    /// Stores a server as if it already existed, returning its ID.
    pub fn insert_server(&self, mut server: Server) -> ResourceId {
        let mut state = self.lock();
        let id = state.allocate_id();
        server.id = id;
        state.servers.insert(id, Tracked::new(server, 0));
        id
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn journal(&self) -> Vec<Call> {
        self.lock().journal.clone()
    }

    /// Number of calls of `operation` made so far.
    #[must_use]
    pub fn calls(&self, operation: Operation) -> usize {
        self.lock().counts.get(&operation).copied().unwrap_or(0)
    }

    /// Number of state-changing calls made so far.
    #[must_use]
    pub fn mutating_calls(&self) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|call| call.operation.is_mutating())
            .count()
    }

    /// Current server state, bypassing visibility and transitions.
    #[must_use]
    pub fn server(&self, id: ResourceId) -> Option<Server> {
        self.lock().servers.get(&id).map(|entry| entry.value.clone())
    }

    /// Current disk state, bypassing visibility and transitions.
    #[must_use]
    pub fn disk(&self, id: ResourceId) -> Option<Disk> {
        self.lock().disks.get(&id).map(|entry| entry.value.clone())
    }

    /// IDs of every stored server.
    #[must_use]
    pub fn server_ids(&self) -> Vec<ResourceId> {
        self.lock().servers.keys().copied().collect()
    }

    /// IDs of every stored disk.
    #[must_use]
    pub fn disk_ids(&self) -> Vec<ResourceId> {
        self.lock().disks.keys().copied().collect()
    }

    /// IDs of every stored SSH key.
    #[must_use]
    pub fn ssh_key_ids(&self) -> Vec<ResourceId> {
        self.lock().ssh_keys.keys().copied().collect()
    }

    /// Every stored note.
    #[must_use]
    pub fn notes(&self) -> Vec<Note> {
        self.lock().notes.values().cloned().collect()
    }
}

impl BuildClient for FakeCloud {
    type Servers = FakeServers;
    type Disks = FakeDisks;
    type ServerPlans = FakeServerPlans;
    type DiskPlans = FakeDiskPlans;
    type Archives = FakeArchives;
    type SshKeys = FakeSshKeys;
    type Notes = FakeNotes;

    fn servers(&self) -> &Self::Servers {
        &self.servers
    }

    fn disks(&self) -> &Self::Disks {
        &self.disks
    }

    fn server_plans(&self) -> &Self::ServerPlans {
        &self.server_plans
    }

    fn disk_plans(&self) -> &Self::DiskPlans {
        &self.disk_plans
    }

    fn archives(&self) -> &Self::Archives {
        &self.archives
    }

    fn ssh_keys(&self) -> &Self::SshKeys {
        &self.ssh_keys
    }

    fn notes(&self) -> &Self::Notes {
        &self.notes
    }
}

fn lock_state(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Server plan with the given shape, available for ordering.
#[must_use]
pub fn server_plan(id: u64, cpu: u32, memory_gb: u32, generation: u32) -> ServerPlan {
    ServerPlan {
        id: ResourceId::new(id),
        name: format!("{cpu}core-{memory_gb}gb-g{generation}"),
        cpu,
        memory_gb,
        commitment: Commitment::Standard,
        generation: PlanGeneration::new(generation),
        availability: Availability::Available,
    }
}

/// Disk plan offering every size in `sizes`.
#[must_use]
pub fn disk_plan(id: u64, kind: DiskPlanKind, sizes: &[u32]) -> DiskPlan {
    DiskPlan {
        id: ResourceId::new(id),
        kind,
        availability: Availability::Available,
        sizes: sizes
            .iter()
            .map(|size_gb| DiskPlanSize {
                size_gb: *size_gb,
                availability: Availability::Available,
            })
            .collect(),
    }
}

fn standard_server_plans() -> Vec<ServerPlan> {
    let mut plans = Vec::new();
    let mut id = 100_001_001;
    for generation in [100, 200] {
        for cpu in [1, 2, 4, 8] {
            for memory_gb in [1, 2, 4, 8, 16] {
                plans.push(server_plan(id, cpu, memory_gb, generation));
                id += 1;
            }
        }
    }
    plans
}

fn standard_disk_plans() -> Vec<DiskPlan> {
    vec![
        disk_plan(4, DiskPlanKind::Ssd, &[20, 40, 100, 250, 500]),
        disk_plan(2, DiskPlanKind::Hdd, &[20, 40, 100, 250, 500, 1024]),
    ]
}

fn standard_archives() -> Vec<Archive> {
    OsType::ALL
        .into_iter()
        .zip(112_000_000_001_u64..)
        .map(|(os_type, id)| Archive {
            id: ResourceId::new(id),
            name: format!("{os_type} (public)"),
            tags: os_type
                .archive_tags()
                .iter()
                .map(|tag| (*tag).to_owned())
                .collect(),
            availability: Availability::Available,
            size_gb: 20,
        })
        .collect()
}
