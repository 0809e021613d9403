//! Error types for the todo client.
//!
//! # Design
//! `NotFound` and `Unauthorized` get dedicated variants because callers
//! distinguish them from "the server returned an unexpected status." All other
//! non-2xx responses land in `HttpError` with the raw status code and body.
//!
//! Every variant carries owned strings rather than source errors so that
//! `ApiError` is `Clone`: a single in-flight token refresh hands the same
//! result to every request waiting on it.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The transport could not complete the round-trip (connect, timeout, TLS).
    #[error("network failure: {0}")]
    Network(String),

    /// The server returned 401 and the request could not be recovered.
    #[error("unauthorized: {body}")]
    Unauthorized { body: String },

    /// Refreshing the session failed; the session has been cleared.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// A refresh was requested but no refresh token is stored.
    #[error("no refresh token available")]
    NoRefreshToken,

    /// An expected field was missing from a callback or provider payload.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The server returned 404, the requested todo does not exist.
    #[error("resource not found")]
    NotFound,

    /// The server returned a non-2xx status other than 401 or 404.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// The caller cancelled the operation before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Reading or writing the persisted session failed.
    #[error("session storage failed: {0}")]
    Storage(String),
}

impl ApiError {
    /// HTTP status associated with this error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::NotFound => Some(404),
            ApiError::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Network(err.to_string())
    }
}
