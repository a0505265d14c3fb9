//! REST transport for the provider API.
//!
//! [`HttpCaller`] sends authenticated JSON requests to
//! `<root>/zone/<zone>/api/cloud/1.1/<path>` and maps non-success responses
//! onto [`ApiError`]. [`RestResource`] layers the capability traits on top,
//! one resource kind at a time, and [`HttpBuildClient`] bundles the kinds
//! the builder needs.

mod resource;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::BuildClient;
use crate::error::ApiError;
use crate::types::{ResourceId, Zone};

pub use resource::{
    ArchiveResource, CreatableKind, DeletableKind, DiskPlanResource, DiskResource, FindableKind,
    HttpArchives, HttpDiskPlans, HttpDisks, HttpNotes, HttpServerPlans, HttpServers, HttpSshKeys,
    NoteResource, ResourceKind, RestResource, ServerPlanResource, ServerResource, SshKeyResource,
    UpdatableKind,
};

/// Default API root.
pub const DEFAULT_API_ROOT_URL: &str = "https://secure.sakura.ad.jp/cloud";
const API_PATH: &str = "api/cloud/1.1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection settings for [`HttpCaller`].
#[derive(Clone, PartialEq, Eq)]
pub struct HttpSettings {
    /// API root, without the zone segment.
    pub root_url: String,
    /// Access token used as the basic-auth user.
    pub access_token: String,
    /// Access token secret used as the basic-auth password.
    pub access_token_secret: String,
    /// Log every request and response, bodies included.
    pub trace: bool,
}

impl std::fmt::Debug for HttpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSettings")
            .field("root_url", &self.root_url)
            .field("access_token", &self.access_token)
            .field("access_token_secret", &"<redacted>")
            .field("trace", &self.trace)
            .finish()
    }
}

/// Authenticated JSON transport.
#[derive(Clone, Debug)]
pub struct HttpCaller {
    http: reqwest::Client,
    settings: HttpSettings,
}

/// Target of one request.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Target<'a> {
    pub(crate) zone: &'a Zone,
    pub(crate) resource: &'static str,
    pub(crate) id: Option<ResourceId>,
}

impl HttpCaller {
    /// Builds a caller with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] when the HTTP client cannot be built.
    pub fn new(settings: HttpSettings) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ApiError::Transport {
                message: err.to_string(),
            })?;
        Ok(Self { http, settings })
    }

    /// Connection settings in use.
    #[must_use]
    pub const fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    /// Absolute URL of `path` in `zone`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] when the configured root does not
    /// form a valid URL.
    pub fn url(&self, zone: &Zone, path: &str) -> Result<Url, ApiError> {
        endpoint_url(&self.settings.root_url, zone, path)
    }

    /// Sends a request and decodes the JSON response body.
    pub(crate) async fn call<B>(
        &self,
        method: Method,
        target: Target<'_>,
        path: &str,
        query: Option<String>,
        body: Option<&B>,
    ) -> Result<Value, ApiError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let mut url = self.url(target.zone, path)?;
        if let Some(raw) = query.as_deref() {
            url.set_query(Some(raw));
        }
        if self.settings.trace {
            let payload = body
                .and_then(|value| serde_json::to_string(value).ok())
                .unwrap_or_default();
            tracing::debug!(%method, %url, body = %payload, "sending API request");
        }

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .basic_auth(
                &self.settings.access_token,
                Some(&self.settings.access_token_secret),
            );
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(|err| ApiError::Transport {
            message: err.to_string(),
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|err| ApiError::Transport {
            message: err.to_string(),
        })?;
        if self.settings.trace {
            tracing::debug!(
                %method,
                %url,
                status = status.as_u16(),
                body = %text,
                "received API response"
            );
        }

        if !status.is_success() {
            return Err(status_error(status, target, &text));
        }
        decode_body(&text)
    }

    /// Sends a request and decodes one enveloped object from the response.
    pub(crate) async fn call_enveloped<B, R>(
        &self,
        method: Method,
        target: Target<'_>,
        path: &str,
        body: Option<&B>,
        envelope: &str,
    ) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let value = self.call(method, target, path, None, body).await?;
        unwrap_envelope(value, envelope)
    }
}

/// Joins the API root, zone and resource path.
fn endpoint_url(root: &str, zone: &Zone, path: &str) -> Result<Url, ApiError> {
    let joined = format!(
        "{}/zone/{}/{API_PATH}/{}",
        root.trim_end_matches('/'),
        zone,
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|err| ApiError::Transport {
        message: format!("invalid API URL {joined}: {err}"),
    })
}

fn decode_body(text: &str) -> Result<Value, ApiError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|err| ApiError::Decode {
        message: err.to_string(),
    })
}

/// Extracts the message the provider puts in error bodies, falling back to
/// the raw body.
fn error_message(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|value| {
            value
                .get("error_msg")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| text.trim().to_owned())
}

fn status_error(status: StatusCode, target: Target<'_>, text: &str) -> ApiError {
    match (status, target.id) {
        (StatusCode::NOT_FOUND, Some(id)) => ApiError::not_found(target.resource, id),
        _ => ApiError::from_status(status.as_u16(), target.resource, error_message(text)),
    }
}

fn unwrap_envelope<R: DeserializeOwned>(mut value: Value, envelope: &str) -> Result<R, ApiError> {
    let inner = value
        .get_mut(envelope)
        .map(Value::take)
        .ok_or_else(|| ApiError::Decode {
            message: format!("response has no {envelope} field"),
        })?;
    serde_json::from_value(inner).map_err(|err| ApiError::Decode {
        message: err.to_string(),
    })
}

/// Resource clients backed by the REST API.
#[derive(Clone, Debug)]
pub struct HttpBuildClient {
    servers: HttpServers,
    disks: HttpDisks,
    server_plans: HttpServerPlans,
    disk_plans: HttpDiskPlans,
    archives: HttpArchives,
    ssh_keys: HttpSshKeys,
    notes: HttpNotes,
}

impl HttpBuildClient {
    /// Creates every resource client on top of one shared caller.
    #[must_use]
    pub fn new(caller: HttpCaller) -> Self {
        let shared = Arc::new(caller);
        Self {
            servers: RestResource::new(Arc::clone(&shared)),
            disks: RestResource::new(Arc::clone(&shared)),
            server_plans: RestResource::new(Arc::clone(&shared)),
            disk_plans: RestResource::new(Arc::clone(&shared)),
            archives: RestResource::new(Arc::clone(&shared)),
            ssh_keys: RestResource::new(Arc::clone(&shared)),
            notes: RestResource::new(shared),
        }
    }
}

impl BuildClient for HttpBuildClient {
    type Servers = HttpServers;
    type Disks = HttpDisks;
    type ServerPlans = HttpServerPlans;
    type DiskPlans = HttpDiskPlans;
    type Archives = HttpArchives;
    type SshKeys = HttpSshKeys;
    type Notes = HttpNotes;

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
