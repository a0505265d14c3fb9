//! Error taxonomy returned by resource clients.

use thiserror::Error;

use crate::types::ResourceId;

/// Errors raised by a single CRUD or power operation against the remote API.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    /// The resource does not exist, or is not visible yet after creation.
    #[error("{resource} {id} not found")]
    NotFound {
        /// Resource kind (for example `server`).
        resource: String,
        /// Identifier that was looked up, when known.
        id: String,
    },
    /// The request conflicts with the resource's current state (for example
    /// deleting a server that is still running).
    #[error("conflict: {message}")]
    Conflict {
        /// Message returned by the provider.
        message: String,
    },
    /// The provider throttled the request.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Message returned by the provider.
        message: String,
    },
    /// Any other non-success response.
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message returned by the provider.
        message: String,
    },
    /// The request never produced a response.
    #[error("transport error: {message}")]
    Transport {
        /// Underlying client error.
        message: String,
    },
    /// The response body could not be decoded.
    #[error("failed to decode response: {message}")]
    Decode {
        /// Decoder error message.
        message: String,
    },
    /// Error raised by caller code rather than the provider, such as a
    /// harness step.
    #[error("{message}")]
    Other {
        /// Caller error message.
        message: String,
    },
}

impl ApiError {
    /// Builds a not-found error for the given resource kind and identifier.
    #[must_use]
    pub fn not_found(resource: &str, id: ResourceId) -> Self {
        Self::NotFound {
            resource: resource.to_owned(),
            id: id.to_string(),
        }
    }

    /// Maps a non-success HTTP status to the matching variant.
    #[must_use]
    pub fn from_status(status: u16, resource: &str, message: String) -> Self {
        match status {
            404 => Self::NotFound {
                resource: resource.to_owned(),
                id: message,
            },
            409 => Self::Conflict { message },
            429 | 503 => Self::RateLimited { message },
            _ => Self::Api { status, message },
        }
    }

    /// Returns `true` for the 404-equivalent variant.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns the HTTP-equivalent status code when one applies.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::Conflict { .. } => Some(409),
            Self::RateLimited { .. } => Some(429),
            Self::Api { status, .. } => Some(*status),
            Self::Transport { .. } | Self::Decode { .. } | Self::Other { .. } => None,
        }
    }
}
