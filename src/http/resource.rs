//! Capability trait implementations over [`HttpCaller`].

use std::marker::PhantomData;
use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{HttpCaller, Target};
use crate::client::{
    ClientFuture, Creatable, Deletable, DiskOps, FindResult, Findable, PowerControllable,
    Readable, ServerOps, SshKeyOps, Updatable,
};
use crate::error::ApiError;
use crate::resources::{
    Archive, ArchiveQuery, Disk, DiskCreateRequest, DiskEditRequest, DiskPlan, DiskPlanQuery,
    GeneratedSshKey, Note, NoteCreateRequest, Server, ServerCreateRequest, ServerPlan,
    ServerPlanQuery, ServerUpdateRequest, ShutdownOption, SshKeyGenerateRequest,
};
use crate::types::{ResourceId, Zone};

/// Describes how one resource kind is laid out on the wire.
pub trait ResourceKind: Send + Sync + 'static {
    /// Resource model returned by reads.
    type Model: DeserializeOwned + Send;
    /// Name used in error messages.
    const NAME: &'static str;
    /// Path segment below the API root.
    const PATH: &'static str;
    /// JSON key wrapping a single object.
    const ENVELOPE: &'static str;
    /// JSON key wrapping a list of objects.
    const LIST_ENVELOPE: &'static str;
}

/// Kinds accepting `POST <path>`.
pub trait CreatableKind: ResourceKind {
    /// Request body placed inside the envelope.
    type Params: Serialize + Sync;
}

/// Kinds accepting `PUT <path>/<id>`.
pub trait UpdatableKind: ResourceKind {
    /// Request body placed inside the envelope.
    type Params: Serialize + Sync;
}

/// Kinds accepting `DELETE <path>/<id>`.
pub trait DeletableKind: ResourceKind {}

/// Kinds accepting `GET <path>?<filter>`.
pub trait FindableKind: ResourceKind {
    /// Search conditions sent as the filter.
    type Condition: Serialize + Sync;

    /// Local post-filter applied to the returned page.
    fn keep(_condition: &Self::Condition, _item: &Self::Model) -> bool {
        true
    }
}

/// REST client for one resource kind.
pub struct RestResource<K> {
    caller: Arc<HttpCaller>,
    kind: PhantomData<fn() -> K>,
}

impl<K> RestResource<K> {
    /// Creates a client sharing `caller`.
    #[must_use]
    pub const fn new(caller: Arc<HttpCaller>) -> Self {
        Self {
            caller,
            kind: PhantomData,
        }
    }
}

impl<K> Clone for RestResource<K> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.caller))
    }
}

impl<K: ResourceKind> std::fmt::Debug for RestResource<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestResource")
            .field("kind", &K::NAME)
            .finish_non_exhaustive()
    }
}

impl<K: ResourceKind> RestResource<K> {
    const fn target<'a>(zone: &'a Zone, id: Option<ResourceId>) -> Target<'a> {
        Target {
            zone,
            resource: K::NAME,
            id,
        }
    }

    fn item_path(id: ResourceId) -> String {
        format!("{}/{id}", K::PATH)
    }

    async fn unit<B>(
        &self,
        method: Method,
        zone: &Zone,
        id: Option<ResourceId>,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), ApiError>
    where
        B: Serialize + ?Sized + Sync,
    {
        self.caller
            .call(method, Self::target(zone, id), path, None, body)
            .await
            .map(drop)
    }
}

impl<K: CreatableKind> Creatable for RestResource<K> {
    type Params = K::Params;
    type Output = K::Model;

    fn create<'a>(
        &'a self,
        zone: &'a Zone,
        params: &'a Self::Params,
    ) -> ClientFuture<'a, Self::Output> {
        Box::pin(async move {
            let body = envelope(K::ENVELOPE, params)?;
            self.caller
                .call_enveloped(
                    Method::POST,
                    Self::target(zone, None),
                    K::PATH,
                    Some(&body),
                    K::ENVELOPE,
                )
                .await
        })
    }
}

impl<K: ResourceKind> Readable for RestResource<K> {
    type Output = K::Model;

    fn read<'a>(&'a self, zone: &'a Zone, id: ResourceId) -> ClientFuture<'a, Self::Output> {
        Box::pin(async move {
            self.caller
                .call_enveloped::<Value, _>(
                    Method::GET,
                    Self::target(zone, Some(id)),
                    &Self::item_path(id),
                    None,
                    K::ENVELOPE,
                )
                .await
        })
    }
}

impl<K: UpdatableKind> Updatable for RestResource<K> {
    type Params = K::Params;
    type Output = K::Model;

    fn update<'a>(
        &'a self,
        zone: &'a Zone,
        id: ResourceId,
        params: &'a Self::Params,
    ) -> ClientFuture<'a, Self::Output> {
        Box::pin(async move {
            let body = envelope(K::ENVELOPE, params)?;
            self.caller
                .call_enveloped(
                    Method::PUT,
                    Self::target(zone, Some(id)),
                    &Self::item_path(id),
                    Some(&body),
                    K::ENVELOPE,
                )
                .await
        })
    }
}

impl<K: DeletableKind> Deletable for RestResource<K> {
    fn delete<'a>(&'a self, zone: &'a Zone, id: ResourceId) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.unit::<Value>(Method::DELETE, zone, Some(id), &Self::item_path(id), None)
                .await
        })
    }
}

impl<K: FindableKind> Findable for RestResource<K> {
    type Condition = K::Condition;
    type Item = K::Model;

    fn find<'a>(
        &'a self,
        zone: &'a Zone,
        condition: &'a Self::Condition,
    ) -> ClientFuture<'a, FindResult<Self::Item>> {
        Box::pin(async move {
            let query = filter_query(condition)?;
            let value = self
                .caller
                .call::<Value>(
                    Method::GET,
                    Self::target(zone, None),
                    K::PATH,
                    Some(query),
                    None,
                )
                .await?;
            let page: FindResult<K::Model> = decode_page(value, K::LIST_ENVELOPE)?;
            let items: Vec<_> = page
                .items
                .into_iter()
                .filter(|item| K::keep(condition, item))
                .collect();
            Ok(FindResult {
                total: items.len(),
                items,
            })
        })
    }
}

/// Wraps `params` as `{ "<key>": params }`.
pub(super) fn envelope<P: Serialize + ?Sized>(key: &str, params: &P) -> Result<Value, ApiError> {
    let inner = serde_json::to_value(params).map_err(|err| ApiError::Decode {
        message: err.to_string(),
    })?;
    Ok(json!({ key: inner }))
}

/// Encodes a find condition as the provider's JSON query string.
pub(super) fn filter_query<C: Serialize + ?Sized>(condition: &C) -> Result<String, ApiError> {
    let filter = envelope("Filter", condition)?;
    serde_json::to_string(&filter).map_err(|err| ApiError::Decode {
        message: err.to_string(),
    })
}

/// Decodes a `{ "Total": n, "<key>": [...] }` page.
pub(super) fn decode_page<T: DeserializeOwned>(
    mut value: Value,
    key: &str,
) -> Result<FindResult<T>, ApiError> {
    let items: Vec<T> = match value.get_mut(key).map(Value::take) {
        Some(list) => serde_json::from_value(list).map_err(|err| ApiError::Decode {
            message: err.to_string(),
        })?,
        None => Vec::new(),
    };
    let total = value
        .get("Total")
        .and_then(Value::as_u64)
        .and_then(|total| usize::try_from(total).ok())
        .unwrap_or(items.len());
    Ok(FindResult { total, items })
}

macro_rules! resource_kind {
    ($(#[$meta:meta])* $kind:ident, $model:ty, $name:literal, $path:literal, $one:literal, $many:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default)]
        pub struct $kind;

        impl ResourceKind for $kind {
            type Model = $model;
            const NAME: &'static str = $name;
            const PATH: &'static str = $path;
            const ENVELOPE: &'static str = $one;
            const LIST_ENVELOPE: &'static str = $many;
        }
    };
}

resource_kind!(
    /// Servers.
    ServerResource, Server, "server", "server", "Server", "Servers"
);
resource_kind!(
    /// Disks.
    DiskResource, Disk, "disk", "disk", "Disk", "Disks"
);
resource_kind!(
    /// Server plan catalogue.
    ServerPlanResource, ServerPlan, "server plan", "product/server", "ServerPlan", "ServerPlans"
);
resource_kind!(
    /// Disk plan catalogue.
    DiskPlanResource, DiskPlan, "disk plan", "product/disk", "DiskPlan", "DiskPlans"
);
resource_kind!(
    /// Archives.
    ArchiveResource, Archive, "archive", "archive", "Archive", "Archives"
);
resource_kind!(
    /// Registered SSH keys.
    SshKeyResource, GeneratedSshKey, "ssh key", "sshkey", "SSHKey", "SSHKeys"
);
resource_kind!(
    /// Startup scripts.
    NoteResource, Note, "note", "note", "Note", "Notes"
);

impl CreatableKind for ServerResource {
    type Params = ServerCreateRequest;
}

impl UpdatableKind for ServerResource {
    type Params = ServerUpdateRequest;
}

impl DeletableKind for ServerResource {}

impl CreatableKind for DiskResource {
    type Params = DiskCreateRequest;
}

impl DeletableKind for DiskResource {}

impl FindableKind for ServerPlanResource {
    type Condition = ServerPlanQuery;

    fn keep(condition: &ServerPlanQuery, item: &ServerPlan) -> bool {
        condition.matches(item)
    }
}

impl FindableKind for DiskPlanResource {
    type Condition = DiskPlanQuery;

    fn keep(condition: &DiskPlanQuery, item: &DiskPlan) -> bool {
        item.kind == condition.kind
    }
}

impl FindableKind for ArchiveResource {
    type Condition = ArchiveQuery;

    fn keep(condition: &ArchiveQuery, item: &Archive) -> bool {
        condition.matches(item)
    }
}

impl DeletableKind for SshKeyResource {}

impl CreatableKind for NoteResource {
    type Params = NoteCreateRequest;
}

impl DeletableKind for NoteResource {}

/// Server client.
pub type HttpServers = RestResource<ServerResource>;
/// Disk client.
pub type HttpDisks = RestResource<DiskResource>;
/// Server plan finder.
pub type HttpServerPlans = RestResource<ServerPlanResource>;
/// Disk plan finder.
pub type HttpDiskPlans = RestResource<DiskPlanResource>;
/// Archive finder.
pub type HttpArchives = RestResource<ArchiveResource>;
/// SSH key client.
pub type HttpSshKeys = RestResource<SshKeyResource>;
/// Startup script client.
pub type HttpNotes = RestResource<NoteResource>;

impl PowerControllable for HttpServers {
    fn boot<'a>(&'a self, zone: &'a Zone, id: ResourceId) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("{}/power", Self::item_path(id));
            self.unit::<Value>(Method::PUT, zone, Some(id), &path, None)
                .await
        })
    }

    fn shutdown<'a>(
        &'a self,
        zone: &'a Zone,
        id: ResourceId,
        option: ShutdownOption,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("{}/power", Self::item_path(id));
            self.unit(Method::DELETE, zone, Some(id), &path, Some(&option))
                .await
        })
    }
}

impl ServerOps for HttpServers {
    fn insert_cdrom<'a>(
        &'a self,
        zone: &'a Zone,
        id: ResourceId,
        cdrom_id: ResourceId,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("{}/cdrom", Self::item_path(id));
            let body = json!({ "CDROM": { "ID": cdrom_id } });
            self.unit(Method::PUT, zone, Some(id), &path, Some(&body))
                .await
        })
    }

    fn connect_packet_filter<'a>(
        &'a self,
        zone: &'a Zone,
        interface_id: ResourceId,
        packet_filter_id: ResourceId,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("interface/{interface_id}/to/packetfilter/{packet_filter_id}");
            self.caller
                .call::<Value>(
                    Method::PUT,
                    Target {
                        zone,
                        resource: "interface",
                        id: Some(interface_id),
                    },
                    &path,
                    None,
                    None,
                )
                .await
                .map(drop)
        })
    }
}

impl DiskOps for HttpDisks {
    fn edit<'a>(
        &'a self,
        zone: &'a Zone,
        id: ResourceId,
        params: &'a DiskEditRequest,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("{}/config", Self::item_path(id));
            self.unit(Method::PUT, zone, Some(id), &path, Some(params))
                .await
        })
    }
}

impl SshKeyOps for HttpSshKeys {
    fn generate<'a>(
        &'a self,
        zone: &'a Zone,
        params: &'a SshKeyGenerateRequest,
    ) -> ClientFuture<'a, GeneratedSshKey> {
        Box::pin(async move {
            let path = format!("{}/generate", SshKeyResource::PATH);
            let body = envelope("KeyPair", params)?;
            self.caller
                .call_enveloped(
                    Method::POST,
                    Self::target(zone, None),
                    &path,
                    Some(&body),
                    SshKeyResource::ENVELOPE,
                )
                .await
        })
    }
}
