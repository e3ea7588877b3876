//! Credential and environment configuration.
//!
//! Login identity (email, password, system id) is loaded once at startup
//! from `credentials.json` in the app config directory, overridable with
//! `DOORMAN_CREDENTIALS`. A missing or malformed file is a fatal
//! configuration error - there is no interactive fallback.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "doorman";

/// Credentials file name
const CREDENTIALS_FILE: &str = "credentials.json";

/// OAuth client id of the provider's own web app. Shared across accounts;
/// overridable per credentials file in case the provider rotates it.
const DEFAULT_CLIENT_ID: &str = "544557759a01deb9874c02ee";

/// Login identity for one provider account. Immutable for the process
/// lifetime.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub system_id: String,
    #[serde(default)]
    client_id: Option<String>,
}

impl Credentials {
    /// Load from the default location
    /// (`$DOORMAN_CREDENTIALS` or `~/.config/doorman/credentials.json`).
    pub fn load() -> Result<Self> {
        let path = match std::env::var("DOORMAN_CREDENTIALS") {
            Ok(p) if !p.is_empty() => PathBuf::from(p),
            _ => Self::default_path()?,
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "cannot read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;

        let credentials: Credentials = serde_json::from_str(&contents).map_err(|e| {
            Error::Configuration(format!(
                "malformed credentials file {}: {}",
                path.display(),
                e
            ))
        })?;

        credentials.validate()?;
        Ok(credentials)
    }

    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or(DEFAULT_CLIENT_ID)
    }

    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("email", &self.email),
            ("password", &self.password),
            ("system_id", &self.system_id),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "credentials field '{}' is empty",
                    field
                )));
            }
        }
        Ok(())
    }

    fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Configuration("could not find config directory".to_string()))?;
        Ok(config_dir.join(APP_NAME).join(CREDENTIALS_FILE))
    }
}

/// Provider deployment the client talks to. The beta stack runs the same
/// API on separate hosts with its own client id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Production,
    Beta,
}

impl Environment {
    /// Read `DOORMAN_ENV` (`beta` or `prod`), defaulting to production.
    pub fn from_env() -> Self {
        match std::env::var("DOORMAN_ENV").as_deref() {
            Ok("beta") => Environment::Beta,
            _ => Environment::Production,
        }
    }

    /// Base URL of the accounts service (login and token exchange).
    pub fn accounts_base(&self) -> &'static str {
        match self {
            Environment::Production => "https://accounts.pdk.io",
            Environment::Beta => "https://betaaccounts.pdk.io",
        }
    }

    /// Base URL of the systems API (cloud nodes, devices, control).
    pub fn systems_base(&self) -> &'static str {
        match self {
            Environment::Production => "https://systems.pdk.io",
            Environment::Beta => "https://beta.pdk.io/systems",
        }
    }

    /// Redirect URI registered for the provider's web app client.
    pub fn redirect_uri(&self) -> &'static str {
        match self {
            Environment::Production => "https://pdk.io/authCallback",
            Environment::Beta => "https://beta.pdk.io/api/auth/callback",
        }
    }
}

/// Cache directory for token records and entity caches, namespaced by
/// system id so unrelated systems never share files.
pub fn cache_dir(system_id: &str) -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .ok_or_else(|| Error::Configuration("could not find cache directory".to_string()))?;
    Ok(cache_dir.join(APP_NAME).join(system_id))
}
