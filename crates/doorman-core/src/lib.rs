//! doorman core - client library for the pdk.io cloud access-control API.
//!
//! Handles the full credential lifecycle (login handshake, layered token
//! caching, transparent refresh), wraps every business call in a resilient
//! retry pipeline, and exposes a typed inventory/device-control surface.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod store;

pub use api::{system_api, ApiError, Pipeline, RetryPolicy, SystemApi, SystemsClient};
pub use auth::{
    AuthProvider, Authenticator, HttpAuthProvider, Refresher, SessionManager, TokenLevel,
    TokenRecord, TokenState,
};
pub use config::{cache_dir, Credentials, Environment};
pub use error::{Error, Result};
pub use store::{CachedData, EntityCache, TokenStore};
