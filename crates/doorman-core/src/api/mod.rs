//! Systems API access.
//!
//! `Pipeline` wraps every outbound call with credential resolution and
//! bounded, jittered backoff; `SystemApi` is the facade command code uses.
//! Status-code-level provider signals are modeled by `ApiError`.

pub mod client;
pub mod error;
pub mod pipeline;

pub use client::{system_api, SystemApi, SystemsClient};
pub use error::ApiError;
pub use pipeline::{Pipeline, RateLimitState, RetryPolicy};
