//! Business API surface: cloud-node inventory and device control.
//!
//! `SystemsClient` issues raw authenticated calls against the systems API
//! and reports status-code-level signals; `SystemApi` is the facade command
//! code talks to, with every call routed through the resilient pipeline.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::api::error::ApiError;
use crate::api::pipeline::Pipeline;
use crate::auth::provider::AuthProvider;
use crate::auth::tokens::TokenLevel;
use crate::config::Environment;
use crate::error::{Error, Result};
use crate::models::{CloudNode, Device};

/// HTTP request timeout for systems-API calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Dwell is expressed in tenths of a second; the provider accepts 1..=5400.
const DWELL_RANGE: std::ops::RangeInclusive<u16> = 1..=5400;

/// Raw authenticated access to `{systems_base}/{system_id}/...`.
///
/// Clone is cheap - reqwest::Client shares its connection pool.
#[derive(Clone)]
pub struct SystemsClient {
    client: Client,
    base_url: String,
    system_id: String,
}

impl SystemsClient {
    pub fn new(environment: Environment, system_id: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: environment.systems_base().to_string(),
            system_id: system_id.into(),
        })
    }

    /// Override the systems base URL (tests, self-hosted mirrors).
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = base.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.system_id, path.trim_start_matches('/'))
    }

    /// GET a JSON payload with the given bearer token.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
    ) -> std::result::Result<T, ApiError> {
        let url = self.url(path);
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("bad JSON from {}: {}", url, e)))
    }

    /// POST a command that succeeds with no body (the control endpoints
    /// answer 204 No Content).
    pub async fn post_command(
        &self,
        path: &str,
        body: &serde_json::Value,
        token: &str,
    ) -> std::result::Result<(), ApiError> {
        let url = self.url(path);
        debug!(url = %url, "POST");

        let response = self
            .client
            .request(Method::POST, &url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
        Ok(())
    }
}

/// High-level inventory and device-control operations.
///
/// Callers get typed results or a typed error; tokens never leave the
/// pipeline.
pub struct SystemApi<P: AuthProvider> {
    pipeline: Pipeline<P>,
    client: SystemsClient,
}

impl<P: AuthProvider> SystemApi<P> {
    pub fn new(pipeline: Pipeline<P>, client: SystemsClient) -> Self {
        Self { pipeline, client }
    }

    pub fn pipeline(&self) -> &Pipeline<P> {
        &self.pipeline
    }

    /// All cloud nodes registered to the system.
    pub async fn list_cloud_nodes(&self) -> Result<Vec<CloudNode>> {
        let client = &self.client;
        self.pipeline
            .execute(TokenLevel::System, |token| async move {
                client.get_json("cloud-nodes", &token).await
            })
            .await
    }

    /// All devices attached to one cloud node.
    pub async fn list_devices(&self, cloud_node_id: &str) -> Result<Vec<Device>> {
        let client = &self.client;
        let path = format!("cloud-nodes/{}/devices", cloud_node_id);
        self.pipeline
            .execute(TokenLevel::System, |token| {
                let path = path.clone();
                async move { client.get_json(&path, &token).await }
            })
            .await
    }

    /// Ask a device to open, optionally holding it open for `dwell` tenths
    /// of a second.
    pub async fn try_open_device(
        &self,
        cloud_node_id: &str,
        device_id: &str,
        dwell: Option<u16>,
    ) -> Result<()> {
        if let Some(dwell) = dwell {
            if !DWELL_RANGE.contains(&dwell) {
                return Err(Error::InvalidRequest(format!(
                    "dwell must be between {} and {} tenths of a second",
                    DWELL_RANGE.start(),
                    DWELL_RANGE.end()
                )));
            }
        }

        let body = match dwell {
            Some(dwell) => serde_json::json!({ "dwell": dwell }),
            None => serde_json::json!({}),
        };

        let client = &self.client;
        let path = format!("cloud-nodes/{}/devices/{}/try-open", cloud_node_id, device_id);
        self.pipeline
            .execute(TokenLevel::System, |token| {
                let path = path.clone();
                let body = body.clone();
                async move { client.post_command(&path, &body, &token).await }
            })
            .await?;

        info!(device_id = %device_id, dwell = ?dwell, "open command accepted");
        Ok(())
    }

    /// Ask a device to close.
    pub async fn close_device(&self, cloud_node_id: &str, device_id: &str) -> Result<()> {
        let client = &self.client;
        let path = format!("cloud-nodes/{}/devices/{}/close", cloud_node_id, device_id);
        self.pipeline
            .execute(TokenLevel::System, |token| {
                let path = path.clone();
                async move { client.post_command(&path, &serde_json::json!({}), &token).await }
            })
            .await?;

        info!(device_id = %device_id, "close command accepted");
        Ok(())
    }
}

/// Convenience constructor wiring the whole stack together.
pub fn system_api(
    environment: Environment,
    credentials: crate::config::Credentials,
    store: crate::store::TokenStore,
    policy: crate::api::pipeline::RetryPolicy,
) -> Result<SystemApi<crate::auth::HttpAuthProvider>> {
    let provider = crate::auth::HttpAuthProvider::new(environment)?;
    let client = SystemsClient::new(environment, credentials.system_id.clone())?;
    let sessions = Arc::new(crate::auth::SessionManager::new(provider, credentials, store));
    Ok(SystemApi::new(Pipeline::new(sessions, policy), client))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::provider::{LoginGrant, TokenGrant};
    use crate::auth::SessionManager;
    use crate::config::Credentials;
    use crate::store::TokenStore;
    use chrono::{Duration as ChronoDuration, Utc};

    struct NeverProvider;

    impl AuthProvider for NeverProvider {
        async fn login(&self, _: &Credentials) -> Result<LoginGrant> {
            panic!("no network in this test");
        }

        async fn exchange(&self, _: &str, _: &str, _: &str) -> Result<TokenGrant> {
            panic!("no network in this test");
        }
    }

    fn api() -> SystemApi<NeverProvider> {
        let credentials: Credentials = serde_json::from_str(
            r#"{"email": "ops@example.com", "password": "pw", "system_id": "sys-1"}"#,
        )
        .unwrap();
        let dir = std::env::temp_dir().join(format!("doorman-api-{}", std::process::id()));
        let store = TokenStore::new(dir).unwrap();
        let sessions = Arc::new(SessionManager::new(NeverProvider, credentials, store));
        let pipeline = Pipeline::new(sessions, crate::api::pipeline::RetryPolicy::default());
        let client = SystemsClient::new(Environment::Production, "sys-1").unwrap();
        SystemApi::new(pipeline, client)
    }

    #[tokio::test]
    async fn test_out_of_range_dwell_rejected_before_any_call() {
        let api = api();
        let err = api.try_open_device("node-1", "dev-1", Some(0)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        let err = api.try_open_device("node-1", "dev-1", Some(5401)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn test_url_building() {
        let client = SystemsClient::new(Environment::Production, "sys-1").unwrap();
        assert_eq!(
            client.url("cloud-nodes"),
            "https://systems.pdk.io/sys-1/cloud-nodes"
        );
        assert_eq!(
            client.url("/cloud-nodes/n1/devices"),
            "https://systems.pdk.io/sys-1/cloud-nodes/n1/devices"
        );
    }

    #[tokio::test]
    async fn test_wired_constructor_builds() {
        let credentials: Credentials = serde_json::from_str(
            r#"{"email": "ops@example.com", "password": "pw", "system_id": "sys-ctor"}"#,
        )
        .unwrap();
        let dir = std::env::temp_dir().join(format!("doorman-api-ctor-{}", std::process::id()));
        let store = TokenStore::new(dir).unwrap();
        let api = system_api(
            Environment::Production,
            credentials,
            store,
            crate::api::pipeline::RetryPolicy::default(),
        )
        .unwrap();
        assert_eq!(api.pipeline().sessions().system_id(), "sys-ctor");
    }
}
