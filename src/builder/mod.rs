//! Server build orchestration.
//!
//! [`ServerBuilder`] turns a [`BuildPlan`] into a running server: it
//! validates the plan, resolves the server plan, creates the server, builds
//! and connects each disk, applies packet filters, inserts the ISO image and
//! optionally boots. Hooks registered through [`ServerBuilder::on`] fire at
//! fixed points of that sequence.
//!
//! Validation runs before any mutating call, so a plan that fails validation
//! leaves no resources behind. Later failures are not rolled back: the
//! returned [`BuildFailure`] carries everything created up to that point.

mod disk;
mod error;
mod events;
mod plan;

use crate::client::{BuildClient, ClientFuture, Creatable, Findable, PowerControllable, ServerOps};
use crate::context::WaitContext;
use crate::resources::{GeneratedSshKey, Server, ServerCreateRequest, ServerPlan, ServerPlanQuery};
use crate::types::{ResourceId, Zone};
use crate::waiter::{WaitSettings, wait_until_up};

pub use disk::{
    ArtifactKind, DEFAULT_DISK_SIZE_GB, DiskBuildResult, DiskBuilder, DiskEditSpec, DiskSource,
    DiskSpec, EPHEMERAL_PREFIX, EphemeralArtifact, GenerateSshKey, NoteSpec,
};
pub use error::{BuildError, BuildFailure, BuildStage};
pub use events::{BuildEvent, BuildHook, EventHooks};
pub use plan::{
    AdditionalNic, BuildPlan, DEFAULT_CPU, DEFAULT_MEMORY_GB, MAX_ADDITIONAL_NICS, NicSpec,
};

/// Resources created by a build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BuildResult {
    /// Created server.
    pub server_id: Option<ResourceId>,
    /// Latest server snapshot; refreshed after boot.
    pub server: Option<Server>,
    /// Key pair generated for the first disk, if requested.
    pub generated_ssh_key: Option<GeneratedSshKey>,
    /// Disks in build order.
    pub disks: Vec<DiskBuildResult>,
}

impl BuildResult {
    /// Private key of the generated key pair.
    #[must_use]
    pub fn generated_private_key(&self) -> Option<&str> {
        self.generated_ssh_key
            .as_ref()
            .map(|key| key.private_key.as_str())
    }

    /// Identifiers of every created disk.
    #[must_use]
    pub fn disk_ids(&self) -> Vec<ResourceId> {
        self.disks.iter().filter_map(|disk| disk.disk_id).collect()
    }
}

/// Plan after defaults were applied, with its resolved server plan.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidatedPlan {
    /// Plan with defaults applied.
    pub plan: BuildPlan,
    /// Server plan selected for the requested shape.
    pub server_plan: ServerPlan,
}

/// Builds one server from a [`BuildPlan`].
pub struct ServerBuilder<'c, C: BuildClient> {
    client: &'c C,
    plan: BuildPlan,
    hooks: EventHooks,
    settings: WaitSettings,
}

impl<'c, C: BuildClient> ServerBuilder<'c, C> {
    /// Creates a builder using `client` for every remote call.
    #[must_use]
    pub fn new(client: &'c C, plan: BuildPlan) -> Self {
        Self {
            client,
            plan,
            hooks: EventHooks::default(),
            settings: WaitSettings::default(),
        }
    }

    /// Overrides the timing of every wait the build performs.
    #[must_use]
    pub const fn with_wait_settings(mut self, settings: WaitSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Registers a hook for `event`.
    #[must_use]
    pub fn on(
        mut self,
        event: BuildEvent,
        hook: impl Fn(BuildEvent, &BuildPlan, &BuildResult) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.register(event, hook);
        self
    }

    /// Plan as supplied by the caller.
    #[must_use]
    pub const fn plan(&self) -> &BuildPlan {
        &self.plan
    }

    /// Applies defaults, checks NIC and driver rules, resolves the server
    /// plan and validates every disk. Performs no mutating call.
    ///
    /// # Errors
    ///
    /// Returns the first [`BuildError`] encountered.
    pub async fn validate(&self, ctx: &WaitContext, zone: &Zone) -> Result<ValidatedPlan, BuildError> {
        let plan = self.plan.with_defaults();

        if !plan.additional_nics.is_empty() && plan.nic.is_none() {
            return Err(BuildError::NicRequired);
        }
        if plan.additional_nics.len() > MAX_ADDITIONAL_NICS {
            return Err(BuildError::TooManyAdditionalNics {
                count: plan.additional_nics.len(),
                max: MAX_ADDITIONAL_NICS,
            });
        }
        if let Some(driver) = plan.interface_driver.as_ref().filter(|driver| !driver.is_known()) {
            return Err(BuildError::UnsupportedInterfaceDriver {
                value: driver.as_str().to_owned(),
            });
        }

        self.hooks
            .fire(BuildEvent::BeforePlanLookup, &plan, &BuildResult::default());
        let server_plan = self.resolve_server_plan(ctx, zone, &plan).await?;
        tracing::debug!(plan_id = %server_plan.id, generation = %server_plan.generation, "resolved server plan");
        self.hooks
            .fire(BuildEvent::AfterPlanLookup, &plan, &BuildResult::default());

        for disk in &plan.disks {
            DiskBuilder::new(self.client, disk, self.settings)
                .validate(ctx, zone)
                .await?;
        }

        Ok(ValidatedPlan { plan, server_plan })
    }

    async fn resolve_server_plan(
        &self,
        ctx: &WaitContext,
        zone: &Zone,
        plan: &BuildPlan,
    ) -> Result<ServerPlan, BuildError> {
        let query = ServerPlanQuery {
            cpu: plan.cpu,
            memory_gb: plan.memory_gb,
            commitment: plan.commitment,
            generation: plan.generation,
        };
        let found = guarded(ctx, self.client.server_plans().find(zone, &query))
            .await
            .map_err(|err| match err {
                BuildError::Api(source) => BuildError::lookup("server plan", source),
                other => other,
            })?;

        let mut candidates: Vec<ServerPlan> = found
            .items
            .into_iter()
            .filter(|candidate| query.matches(candidate))
            .collect();
        candidates.sort_by(|a, b| b.generation.cmp(&a.generation));
        candidates
            .into_iter()
            .next()
            .ok_or(BuildError::ServerPlanNotFound {
                cpu: query.cpu,
                memory_gb: query.memory_gb,
                commitment: query.commitment,
                generation: query.generation,
            })
    }

    /// Validates the plan, then creates the server and everything attached
    /// to it.
    ///
    /// # Errors
    ///
    /// Returns [`BuildFailure`] naming the failed stage. Its partial result
    /// lists every resource created before the failure; nothing is rolled
    /// back.
    pub async fn build(&self, ctx: &WaitContext, zone: &Zone) -> Result<BuildResult, BuildFailure> {
        let mut result = BuildResult::default();
        self.hooks.fire(BuildEvent::Start, &self.plan, &result);

        let validated = match self.validate(ctx, zone).await {
            Ok(validated) => validated,
            Err(err) => return Err(BuildFailure::new(BuildStage::Validating, err, &result)),
        };
        let plan = &validated.plan;

        if let Err(err) = self.create_server(ctx, zone, &validated, &mut result).await {
            return Err(BuildFailure::new(BuildStage::CreatingPrimary, err, &result));
        }
        let server_id = result.server_id.unwrap_or_default();

        if let Err(err) = self.build_disks(ctx, zone, plan, server_id, &mut result).await {
            return Err(BuildFailure::new(BuildStage::BuildingDisks, err, &result));
        }

        self.connect_packet_filters(ctx, zone, plan, &result)
            .await
            .map_err(|err| BuildFailure::new(BuildStage::ConnectingPacketFilters, err, &result))?;

        if let Some(cdrom_id) = plan.cdrom_id {
            self.hooks.fire(BuildEvent::BeforeCdromInsert, plan, &result);
            tracing::info!(stage = %BuildStage::InsertingCdrom, %server_id, %cdrom_id, "inserting ISO image");
            guarded(ctx, self.client.servers().insert_cdrom(zone, server_id, cdrom_id))
                .await
                .map_err(|err| BuildFailure::new(BuildStage::InsertingCdrom, err, &result))?;
            self.hooks.fire(BuildEvent::AfterCdromInsert, plan, &result);
        }

        if plan.boot_after_create {
            if let Err(err) = self.boot(ctx, zone, plan, server_id, &mut result).await {
                return Err(BuildFailure::new(BuildStage::Booting, err, &result));
            }
        }

        tracing::info!(stage = %BuildStage::Done, %server_id, disks = result.disks.len(), "build complete");
        self.hooks.fire(BuildEvent::Complete, plan, &result);
        Ok(result)
    }

    async fn create_server(
        &self,
        ctx: &WaitContext,
        zone: &Zone,
        validated: &ValidatedPlan,
        result: &mut BuildResult,
    ) -> Result<(), BuildError> {
        let plan = &validated.plan;
        let request = ServerCreateRequest {
            name: plan.name.clone(),
            description: plan.description.clone(),
            tags: plan.tags.clone(),
            plan_id: validated.server_plan.id,
            connected_switches: plan.connections(),
            interface_driver: plan
                .interface_driver
                .clone()
                .unwrap_or_default(),
            private_host_id: plan.private_host_id,
        };

        self.hooks.fire(BuildEvent::BeforeServerCreate, plan, result);
        tracing::info!(stage = %BuildStage::CreatingPrimary, name = %request.name, plan_id = %request.plan_id, "creating server");
        let server = guarded(ctx, self.client.servers().create(zone, &request)).await?;
        result.server_id = Some(server.id);
        result.server = Some(server);
        self.hooks.fire(BuildEvent::AfterServerCreate, plan, result);
        Ok(())
    }

    async fn build_disks(
        &self,
        ctx: &WaitContext,
        zone: &Zone,
        plan: &BuildPlan,
        server_id: ResourceId,
        result: &mut BuildResult,
    ) -> Result<(), BuildError> {
        for (index, spec) in plan.disks.iter().enumerate() {
            self.hooks.fire(BuildEvent::BeforeDiskConnect, plan, result);
            tracing::info!(stage = %BuildStage::BuildingDisks, index, name = %spec.name, "building disk");

            let builder = DiskBuilder::new(self.client, spec, self.settings);
            let mut progress = DiskBuildResult::default();
            let outcome = async {
                builder.validate(ctx, zone).await?;
                builder
                    .build_into(ctx, zone, Some(server_id), &mut progress)
                    .await
            }
            .await;

            if index == 0 && result.generated_ssh_key.is_none() {
                result.generated_ssh_key.clone_from(&progress.generated_ssh_key);
            }
            if !progress.is_empty() {
                result.disks.push(progress);
            }
            outcome?;
            self.hooks.fire(BuildEvent::AfterDiskConnect, plan, result);
        }
        Ok(())
    }

    async fn connect_packet_filters(
        &self,
        ctx: &WaitContext,
        zone: &Zone,
        plan: &BuildPlan,
        result: &BuildResult,
    ) -> Result<(), BuildError> {
        let interfaces = result
            .server
            .as_ref()
            .map(|server| server.interfaces.as_slice())
            .unwrap_or_default();
        for (index, filter) in plan.packet_filters().into_iter().enumerate() {
            let Some(packet_filter_id) = filter else {
                continue;
            };
            let interface = interfaces
                .get(index)
                .ok_or(BuildError::InterfaceMissing { index })?;
            tracing::info!(
                stage = %BuildStage::ConnectingPacketFilters,
                interface_id = %interface.id,
                %packet_filter_id,
                "connecting packet filter"
            );
            guarded(
                ctx,
                self.client
                    .servers()
                    .connect_packet_filter(zone, interface.id, packet_filter_id),
            )
            .await?;
        }
        Ok(())
    }

    async fn boot(
        &self,
        ctx: &WaitContext,
        zone: &Zone,
        plan: &BuildPlan,
        server_id: ResourceId,
        result: &mut BuildResult,
    ) -> Result<(), BuildError> {
        self.hooks.fire(BuildEvent::BeforeBoot, plan, result);
        tracing::info!(stage = %BuildStage::Booting, %server_id, "booting server");
        guarded(ctx, self.client.servers().boot(zone, server_id)).await?;
        let server = wait_until_up(ctx, self.client.servers(), zone, server_id, self.settings).await?;
        result.server = Some(server);
        self.hooks.fire(BuildEvent::AfterBoot, plan, result);
        Ok(())
    }
}

impl<C: BuildClient> std::fmt::Debug for ServerBuilder<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("plan", &self.plan)
            .field("hooks", &self.hooks)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Runs a client call, giving up early when `ctx` finishes.
pub(crate) async fn guarded<T>(ctx: &WaitContext, call: ClientFuture<'_, T>) -> Result<T, BuildError> {
    tokio::select! {
        biased;
        reason = ctx.done() => Err(BuildError::Interrupted(reason)),
        result = call => result.map_err(BuildError::from),
    }
}
