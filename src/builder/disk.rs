//! Disk specifications and the disk build workflow.
//!
//! A disk is created from one of several sources, optionally customised
//! before first boot, and connected to its server. Customisation may need
//! short-lived account artifacts (a generated SSH key, inline startup
//! scripts); those are created under `cloudkit-<uuid>` names and removed
//! again once the disk is ready unless the caller asks to keep them.

use uuid::Uuid;

use crate::client::{BuildClient, Creatable, Deletable, DiskOps, Findable, SshKeyOps};
use crate::context::WaitContext;
use crate::resources::{
    ArchiveQuery, DiskCreateRequest, DiskEditRequest, DiskPlanQuery, GeneratedSshKey,
    NoteCreateRequest, SshKeyGenerateRequest,
};
use crate::types::{Availability, DiskConnection, DiskPlanKind, OsType, ResourceId, Zone};
use crate::waiter::{WaitSettings, wait_until_available};

use super::error::{BuildError, BuildFailure, BuildStage};
use super::{BuildResult, guarded};

/// Size applied when a disk specification leaves it unset.
pub const DEFAULT_DISK_SIZE_GB: u32 = 20;
/// Prefix of every ephemeral artifact name.
pub const EPHEMERAL_PREFIX: &str = "cloudkit-";

/// Where the disk content comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DiskSource {
    /// Empty disk.
    Blank,
    /// Latest public archive of a Unix-family OS.
    UnixArchive(OsType),
    /// Latest public archive of a Windows OS.
    WindowsArchive(OsType),
    /// Specific archive.
    Archive(ResourceId),
    /// Clone of an existing disk.
    Disk(ResourceId),
}

/// Server-side SSH key generation request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GenerateSshKey {
    /// Passphrase protecting the generated private key.
    pub pass_phrase: Option<String>,
    /// Keep the registered public key after the disk is ready.
    pub keep: bool,
}

/// Startup script attached to a disk.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NoteSpec {
    /// Existing note on the account.
    Existing(ResourceId),
    /// Script body uploaded as a new note for this build.
    Inline {
        /// Script body.
        content: String,
        /// Keep the uploaded note after the disk is ready.
        keep: bool,
    },
}

/// Guest customisation applied before first boot.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DiskEditSpec {
    /// Guest hostname.
    pub host_name: Option<String>,
    /// Administrator password.
    pub password: Option<String>,
    /// Raw public keys to install.
    pub ssh_keys: Vec<String>,
    /// Registered keys to install.
    pub ssh_key_ids: Vec<ResourceId>,
    /// Generate a key pair and install its public half.
    pub generate_ssh_key: Option<GenerateSshKey>,
    /// Disable password login over SSH.
    pub disable_password_auth: bool,
    /// Startup scripts.
    pub notes: Vec<NoteSpec>,
    /// Static address for the primary NIC.
    pub ip_address: Option<String>,
    /// Prefix length for `ip_address`.
    pub network_mask_len: Option<u8>,
    /// Default gateway for `ip_address`.
    pub default_route: Option<String>,
}

/// One disk to build.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiskSpec {
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Tags attached to the disk.
    pub tags: Vec<String>,
    /// Storage class.
    pub plan: DiskPlanKind,
    /// Bus used to connect the disk.
    pub connection: DiskConnection,
    /// Size in GiB; zero means [`DEFAULT_DISK_SIZE_GB`].
    pub size_gb: u32,
    /// Content source.
    pub source: DiskSource,
    /// Guest customisation.
    pub edit: Option<DiskEditSpec>,
}

impl DiskSpec {
    fn with_source(name: impl Into<String>, size_gb: u32, source: DiskSource) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            plan: DiskPlanKind::default(),
            connection: DiskConnection::default(),
            size_gb,
            source,
            edit: None,
        }
    }

    /// Empty disk.
    #[must_use]
    pub fn blank(name: impl Into<String>, size_gb: u32) -> Self {
        Self::with_source(name, size_gb, DiskSource::Blank)
    }

    /// Disk copied from the latest public archive of a Unix-family OS.
    #[must_use]
    pub fn from_unix_archive(name: impl Into<String>, os_type: OsType, size_gb: u32) -> Self {
        Self::with_source(name, size_gb, DiskSource::UnixArchive(os_type))
    }

    /// Disk copied from the latest public archive of a Windows OS.
    #[must_use]
    pub fn from_windows_archive(name: impl Into<String>, os_type: OsType, size_gb: u32) -> Self {
        Self::with_source(name, size_gb, DiskSource::WindowsArchive(os_type))
    }

    /// Disk copied from a specific archive.
    #[must_use]
    pub fn from_archive(name: impl Into<String>, archive_id: ResourceId, size_gb: u32) -> Self {
        Self::with_source(name, size_gb, DiskSource::Archive(archive_id))
    }

    /// Clone of an existing disk.
    #[must_use]
    pub fn from_disk(name: impl Into<String>, disk_id: ResourceId, size_gb: u32) -> Self {
        Self::with_source(name, size_gb, DiskSource::Disk(disk_id))
    }

    /// Sets the storage class.
    #[must_use]
    pub const fn plan(mut self, plan: DiskPlanKind) -> Self {
        self.plan = plan;
        self
    }

    /// Sets the connection bus.
    #[must_use]
    pub const fn connection(mut self, connection: DiskConnection) -> Self {
        self.connection = connection;
        self
    }

    /// Attaches guest customisation.
    #[must_use]
    pub fn with_edit(mut self, edit: DiskEditSpec) -> Self {
        self.edit = Some(edit);
        self
    }

    const fn effective_size(&self) -> u32 {
        if self.size_gb == 0 {
            DEFAULT_DISK_SIZE_GB
        } else {
            self.size_gb
        }
    }

    fn check_source(&self) -> Result<(), BuildError> {
        match (&self.source, &self.edit) {
            (DiskSource::UnixArchive(os_type), _) if !os_type.is_unix() => {
                Err(BuildError::UnsupportedOsType {
                    os_type: *os_type,
                    expected: String::from("unix"),
                })
            }
            (DiskSource::WindowsArchive(os_type), _) if !os_type.is_windows() => {
                Err(BuildError::UnsupportedOsType {
                    os_type: *os_type,
                    expected: String::from("windows"),
                })
            }
            (DiskSource::Blank, Some(_)) => Err(BuildError::EditNotSupported {
                reason: String::from("blank disks have no guest to customise"),
            }),
            (DiskSource::WindowsArchive(_), Some(_)) => Err(BuildError::EditNotSupported {
                reason: String::from("windows images are customised on first boot"),
            }),
            _ => Ok(()),
        }
    }
}

/// Kind of a short-lived artifact created for a disk edit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArtifactKind {
    /// Generated SSH key.
    SshKey,
    /// Uploaded startup script.
    Note,
}

/// Short-lived artifact created for a disk edit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EphemeralArtifact {
    /// Artifact kind.
    pub kind: ArtifactKind,
    /// Artifact identifier.
    pub id: ResourceId,
    /// Name under which it was created.
    pub name: String,
    /// Whether the build removed it again.
    pub removed: bool,
}

/// Outcome of building one disk.
///
/// In a partial result `disk_id` is `None` when the disk itself was never
/// created but artifacts were.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DiskBuildResult {
    /// Created disk.
    pub disk_id: Option<ResourceId>,
    /// Archive the disk was copied from, after OS resolution.
    pub source_archive_id: Option<ResourceId>,
    /// Generated key pair, including the private key.
    pub generated_ssh_key: Option<GeneratedSshKey>,
    /// Registered keys installed on the disk, including the generated one.
    pub ssh_key_ids: Vec<ResourceId>,
    /// Startup scripts attached to the disk.
    pub note_ids: Vec<ResourceId>,
    /// Short-lived artifacts and whether they were removed.
    pub artifacts: Vec<EphemeralArtifact>,
}

impl DiskBuildResult {
    /// Returns `true` when nothing was created.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.disk_id.is_none() && self.artifacts.is_empty()
    }
}

/// Builds one disk, optionally connected to a server.
#[derive(Debug)]
pub struct DiskBuilder<'c, C: BuildClient> {
    client: &'c C,
    spec: &'c DiskSpec,
    settings: WaitSettings,
}

impl<'c, C: BuildClient> DiskBuilder<'c, C> {
    /// Creates a builder for `spec`.
    #[must_use]
    pub const fn new(client: &'c C, spec: &'c DiskSpec, settings: WaitSettings) -> Self {
        Self {
            client,
            spec,
            settings,
        }
    }

    /// Checks the source rules and that the disk plan offers the size.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] describing the first rule that fails.
    pub async fn validate(&self, ctx: &WaitContext, zone: &Zone) -> Result<(), BuildError> {
        self.spec.check_source()?;

        let query = DiskPlanQuery {
            kind: self.spec.plan,
        };
        let plans = guarded(ctx, self.client.disk_plans().find(zone, &query))
            .await
            .map_err(|err| match err {
                BuildError::Api(source) => BuildError::lookup("disk plan", source),
                other => other,
            })?;
        let plan = plans
            .items
            .into_iter()
            .find(|plan| plan.kind == self.spec.plan && plan.availability == Availability::Available)
            .ok_or(BuildError::DiskPlanNotFound {
                kind: self.spec.plan,
            })?;

        let size_gb = self.spec.effective_size();
        if !plan.offers(size_gb) {
            return Err(BuildError::DiskSizeUnavailable {
                kind: self.spec.plan,
                size_gb,
            });
        }
        Ok(())
    }

    /// Validates, then builds the disk and connects it to `server_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildFailure`] at [`BuildStage::BuildingDisks`]; its partial
    /// result lists the disk and artifacts created so far.
    pub async fn build(
        &self,
        ctx: &WaitContext,
        zone: &Zone,
        server_id: Option<ResourceId>,
    ) -> Result<DiskBuildResult, BuildFailure> {
        let mut progress = DiskBuildResult::default();
        let outcome = async {
            self.validate(ctx, zone).await?;
            self.build_into(ctx, zone, server_id, &mut progress).await
        }
        .await;
        match outcome {
            Ok(()) => Ok(progress),
            Err(error) => {
                let partial = BuildResult {
                    disks: if progress.is_empty() {
                        Vec::new()
                    } else {
                        vec![progress]
                    },
                    ..BuildResult::default()
                };
                Err(BuildFailure::new(BuildStage::BuildingDisks, error, &partial))
            }
        }
    }

    /// Runs the build steps, recording every created resource in `progress`.
    pub(crate) async fn build_into(
        &self,
        ctx: &WaitContext,
        zone: &Zone,
        server_id: Option<ResourceId>,
        progress: &mut DiskBuildResult,
    ) -> Result<(), BuildError> {
        let (source_archive_id, source_disk_id) = self.resolve_source(ctx, zone).await?;
        progress.source_archive_id = source_archive_id;

        let edit = match &self.spec.edit {
            Some(spec) => Some(self.prepare_edit(ctx, zone, spec, progress).await?),
            None => None,
        };

        let request = DiskCreateRequest {
            name: self.spec.name.clone(),
            description: self.spec.description.clone(),
            tags: self.spec.tags.clone(),
            plan: self.spec.plan,
            connection: self.spec.connection,
            size_gb: self.spec.effective_size(),
            source_archive_id,
            source_disk_id,
            server_id,
        };
        tracing::info!(name = %request.name, size_gb = request.size_gb, "creating disk");
        let disk = guarded(ctx, self.client.disks().create(zone, &request)).await?;
        progress.disk_id = Some(disk.id);

        wait_until_available(ctx, self.client.disks(), zone, disk.id, self.settings).await?;

        if let Some(customisation) = edit {
            tracing::info!(disk_id = %disk.id, "applying disk customisation");
            guarded(ctx, self.client.disks().edit(zone, disk.id, &customisation)).await?;
            wait_until_available(ctx, self.client.disks(), zone, disk.id, self.settings).await?;
        }

        self.remove_artifacts(ctx, zone, progress).await
    }

    async fn resolve_source(
        &self,
        ctx: &WaitContext,
        zone: &Zone,
    ) -> Result<(Option<ResourceId>, Option<ResourceId>), BuildError> {
        match &self.spec.source {
            DiskSource::Blank => Ok((None, None)),
            DiskSource::Archive(id) => Ok((Some(*id), None)),
            DiskSource::Disk(id) => Ok((None, Some(*id))),
            DiskSource::UnixArchive(os_type) | DiskSource::WindowsArchive(os_type) => {
                let archive_id = self.find_archive(ctx, zone, *os_type).await?;
                Ok((Some(archive_id), None))
            }
        }
    }

    async fn find_archive(
        &self,
        ctx: &WaitContext,
        zone: &Zone,
        os_type: OsType,
    ) -> Result<ResourceId, BuildError> {
        let query = ArchiveQuery {
            tags: os_type
                .archive_tags()
                .iter()
                .map(|tag| (*tag).to_owned())
                .collect(),
            public_only: true,
        };
        let found = guarded(ctx, self.client.archives().find(zone, &query))
            .await
            .map_err(|err| match err {
                BuildError::Api(source) => BuildError::lookup("archive", source),
                other => other,
            })?;
        let archive = found
            .items
            .into_iter()
            .find(|archive| {
                query.matches(archive) && archive.availability == Availability::Available
            })
            .ok_or(BuildError::ArchiveNotFound { os_type })?;
        tracing::debug!(%os_type, archive_id = %archive.id, "resolved public archive");
        Ok(archive.id)
    }

    async fn prepare_edit(
        &self,
        ctx: &WaitContext,
        zone: &Zone,
        spec: &DiskEditSpec,
        progress: &mut DiskBuildResult,
    ) -> Result<DiskEditRequest, BuildError> {
        let mut ssh_key_ids = spec.ssh_key_ids.clone();
        if let Some(generate) = &spec.generate_ssh_key {
            let name = ephemeral_name();
            let request = SshKeyGenerateRequest {
                name: name.clone(),
                pass_phrase: generate.pass_phrase.clone(),
            };
            let key = guarded(ctx, self.client.ssh_keys().generate(zone, &request)).await?;
            tracing::info!(key_id = %key.id, "generated SSH key pair");
            ssh_key_ids.push(key.id);
            if !generate.keep {
                progress.artifacts.push(EphemeralArtifact {
                    kind: ArtifactKind::SshKey,
                    id: key.id,
                    name,
                    removed: false,
                });
            }
            progress.generated_ssh_key = Some(key);
        }

        let mut note_ids = Vec::with_capacity(spec.notes.len());
        for note in &spec.notes {
            match note {
                NoteSpec::Existing(id) => note_ids.push(*id),
                NoteSpec::Inline { content, keep } => {
                    let name = ephemeral_name();
                    let request = NoteCreateRequest {
                        name: name.clone(),
                        content: content.clone(),
                    };
                    let created = guarded(ctx, self.client.notes().create(zone, &request)).await?;
                    note_ids.push(created.id);
                    if !keep {
                        progress.artifacts.push(EphemeralArtifact {
                            kind: ArtifactKind::Note,
                            id: created.id,
                            name,
                            removed: false,
                        });
                    }
                }
            }
        }

        progress.ssh_key_ids.clone_from(&ssh_key_ids);
        progress.note_ids.clone_from(&note_ids);
        Ok(DiskEditRequest {
            host_name: spec.host_name.clone(),
            password: spec.password.clone(),
            ssh_key_ids,
            ssh_keys: spec.ssh_keys.clone(),
            disable_password_auth: spec.disable_password_auth,
            note_ids,
            ip_address: spec.ip_address.clone(),
            network_mask_len: spec.network_mask_len,
            default_route: spec.default_route.clone(),
        })
    }

    async fn remove_artifacts(
        &self,
        ctx: &WaitContext,
        zone: &Zone,
        progress: &mut DiskBuildResult,
    ) -> Result<(), BuildError> {
        for artifact in &mut progress.artifacts {
            let deletion = match artifact.kind {
                ArtifactKind::SshKey => self.client.ssh_keys().delete(zone, artifact.id),
                ArtifactKind::Note => self.client.notes().delete(zone, artifact.id),
            };
            guarded(ctx, deletion).await?;
            artifact.removed = true;
            tracing::debug!(kind = ?artifact.kind, id = %artifact.id, "removed ephemeral artifact");
        }
        Ok(())
    }
}

fn ephemeral_name() -> String {
    format!("{EPHEMERAL_PREFIX}{}", Uuid::new_v4())
}
