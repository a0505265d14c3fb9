//! Desired end state consumed by [`super::ServerBuilder`].

use crate::resources::SwitchConnection;
use crate::types::{Commitment, InterfaceDriver, PlanGeneration, ResourceId};

use super::disk::DiskSpec;

/// Maximum number of NICs beyond the primary one.
pub const MAX_ADDITIONAL_NICS: usize = 3;
/// CPU count applied when the plan leaves it unset.
pub const DEFAULT_CPU: u32 = 1;
/// Memory size applied when the plan leaves it unset.
pub const DEFAULT_MEMORY_GB: u32 = 1;

/// Primary NIC placement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NicSpec {
    /// Provider-managed shared segment.
    Shared {
        /// Packet filter applied once the server exists.
        packet_filter_id: Option<ResourceId>,
    },
    /// Existing customer switch.
    Switch {
        /// Switch to connect to.
        switch_id: ResourceId,
        /// Packet filter applied once the server exists.
        packet_filter_id: Option<ResourceId>,
    },
    /// NIC present but unplugged.
    Disconnected,
}

impl NicSpec {
    /// Shared segment without a packet filter.
    #[must_use]
    pub const fn shared() -> Self {
        Self::Shared {
            packet_filter_id: None,
        }
    }

    /// Existing switch without a packet filter.
    #[must_use]
    pub const fn switch(switch_id: ResourceId) -> Self {
        Self::Switch {
            switch_id,
            packet_filter_id: None,
        }
    }

    pub(crate) const fn connection(&self) -> SwitchConnection {
        match self {
            Self::Shared { .. } => SwitchConnection::Shared,
            Self::Switch { switch_id, .. } => SwitchConnection::Switch(*switch_id),
            Self::Disconnected => SwitchConnection::Disconnected,
        }
    }

    pub(crate) const fn packet_filter_id(&self) -> Option<ResourceId> {
        match self {
            Self::Shared { packet_filter_id } | Self::Switch { packet_filter_id, .. } => {
                *packet_filter_id
            }
            Self::Disconnected => None,
        }
    }
}

/// Placement of a NIC after the primary one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AdditionalNic {
    /// Existing customer switch.
    Switch {
        /// Switch to connect to.
        switch_id: ResourceId,
        /// Packet filter applied once the server exists.
        packet_filter_id: Option<ResourceId>,
    },
    /// NIC present but unplugged.
    Disconnected,
}

impl AdditionalNic {
    pub(crate) const fn connection(&self) -> SwitchConnection {
        match self {
            Self::Switch { switch_id, .. } => SwitchConnection::Switch(*switch_id),
            Self::Disconnected => SwitchConnection::Disconnected,
        }
    }

    pub(crate) const fn packet_filter_id(&self) -> Option<ResourceId> {
        match self {
            Self::Switch {
                packet_filter_id, ..
            } => *packet_filter_id,
            Self::Disconnected => None,
        }
    }
}

/// Everything needed to build one server with its disks.
///
/// Zero and `None` fields receive defaults during validation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BuildPlan {
    /// Server name.
    pub name: String,
    /// Server description.
    pub description: String,
    /// Server tags.
    pub tags: Vec<String>,
    /// Virtual CPU count.
    pub cpu: u32,
    /// Memory in GiB.
    pub memory_gb: u32,
    /// CPU allocation model.
    pub commitment: Commitment,
    /// Hardware generation; default picks the newest matching plan.
    pub generation: PlanGeneration,
    /// NIC driver; `None` means VirtIO.
    pub interface_driver: Option<InterfaceDriver>,
    /// Primary NIC. Required when `additional_nics` is non-empty.
    pub nic: Option<NicSpec>,
    /// Further NICs, connected in order.
    pub additional_nics: Vec<AdditionalNic>,
    /// Disks built and connected in order.
    pub disks: Vec<DiskSpec>,
    /// ISO image inserted after the disks are connected.
    pub cdrom_id: Option<ResourceId>,
    /// Dedicated host placement.
    pub private_host_id: Option<ResourceId>,
    /// Boot the server and wait for it to come up.
    pub boot_after_create: bool,
}

impl BuildPlan {
    /// Starts a plan for a server called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_owned(),
            ..Self::default()
        }
    }

    /// Sets the CPU count.
    #[must_use]
    pub const fn cpu(mut self, cpu: u32) -> Self {
        self.cpu = cpu;
        self
    }

    /// Sets the memory size.
    #[must_use]
    pub const fn memory_gb(mut self, memory_gb: u32) -> Self {
        self.memory_gb = memory_gb;
        self
    }

    /// Sets the CPU allocation model.
    #[must_use]
    pub const fn commitment(mut self, commitment: Commitment) -> Self {
        self.commitment = commitment;
        self
    }

    /// Sets the hardware generation.
    #[must_use]
    pub const fn generation(mut self, generation: PlanGeneration) -> Self {
        self.generation = generation;
        self
    }

    /// Sets the NIC driver.
    #[must_use]
    pub fn interface_driver(mut self, driver: InterfaceDriver) -> Self {
        self.interface_driver = Some(driver);
        self
    }

    /// Sets the primary NIC.
    #[must_use]
    pub fn nic(mut self, nic: NicSpec) -> Self {
        self.nic = Some(nic);
        self
    }

    /// Appends an additional NIC.
    #[must_use]
    pub fn additional_nic(mut self, nic: AdditionalNic) -> Self {
        self.additional_nics.push(nic);
        self
    }

    /// Appends a disk.
    #[must_use]
    pub fn disk(mut self, disk: DiskSpec) -> Self {
        self.disks.push(disk);
        self
    }

    /// Sets the ISO image to insert.
    #[must_use]
    pub const fn cdrom(mut self, cdrom_id: ResourceId) -> Self {
        self.cdrom_id = Some(cdrom_id);
        self
    }

    /// Places the server on a dedicated host.
    #[must_use]
    pub const fn private_host(mut self, host_id: ResourceId) -> Self {
        self.private_host_id = Some(host_id);
        self
    }

    /// Requests boot after creation.
    #[must_use]
    pub const fn boot_after_create(mut self, boot: bool) -> Self {
        self.boot_after_create = boot;
        self
    }

    /// Returns a copy with defaults applied to unset fields.
    #[must_use]
    pub fn with_defaults(&self) -> Self {
        let mut plan = self.clone();
        if plan.cpu == 0 {
            plan.cpu = DEFAULT_CPU;
        }
        if plan.memory_gb == 0 {
            plan.memory_gb = DEFAULT_MEMORY_GB;
        }
        if plan.interface_driver.is_none() {
            plan.interface_driver = Some(InterfaceDriver::default());
        }
        plan
    }

    /// NIC slots in positional order, as sent to the create call.
    pub(crate) fn connections(&self) -> Vec<SwitchConnection> {
        self.nic
            .iter()
            .map(NicSpec::connection)
            .chain(self.additional_nics.iter().map(AdditionalNic::connection))
            .collect()
    }

    /// Requested packet filters by NIC position.
    pub(crate) fn packet_filters(&self) -> Vec<Option<ResourceId>> {
        self.nic
            .iter()
            .map(NicSpec::packet_filter_id)
            .chain(
                self.additional_nics
                    .iter()
                    .map(AdditionalNic::packet_filter_id),
            )
            .collect()
    }
}
