//! Error types for the doorman core library.

use thiserror::Error;

use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed credentials file. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The provider rejected the supplied identity during login.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The auth token backing a refresh is missing or expired.
    /// Internal signal: the session manager falls back to a full login.
    #[error("session stale - full login required")]
    StaleSession,

    /// The provider rejected the token exchange.
    /// Internal signal: the session manager falls back to a full login.
    #[error("token refresh denied: {0}")]
    RefreshDenied(String),

    /// Connection failure, timeout, or server-side error.
    /// Retried under the pipeline's backoff policy.
    #[error("transient network failure: {0}")]
    Transient(String),

    /// The provider kept rejecting the token even after one forced
    /// re-authentication.
    #[error("not authorized - token rejected after re-authentication")]
    Authorization,

    /// Retry budget (or the caller's operation timeout) exhausted.
    #[error("request failed after {attempts} attempts: {cause}")]
    RequestFailed { attempts: u32, cause: String },

    /// Token store I/O or serialization failure.
    #[error("token store failure: {0}")]
    Storage(String),

    /// Non-retryable API response (access denied, not found, bad shape).
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A request parameter was rejected before any call was made.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transient(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
