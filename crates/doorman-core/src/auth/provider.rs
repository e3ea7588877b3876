//! Provider-side authentication operations.
//!
//! [`AuthProvider`] is the seam between the session lifecycle and the
//! provider's accounts service: one method for the full login handshake,
//! one for the auth-token exchange. The HTTP implementation drives the
//! provider's browser-style flow; tests substitute counting fakes.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use reqwest::{header, redirect, Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::tokens::{default_auth_expiry, default_business_expiry};
use crate::config::{Credentials, Environment};
use crate::error::{Error, Result};

/// HTTP request timeout for accounts-service calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Outcome of a successful login handshake. Access/system tokens are not
/// part of it; they come from a subsequent exchange.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub auth_token: String,
    pub nonce: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Outcome of a successful token exchange.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub system_token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Accounts-service operations the session lifecycle depends on.
pub trait AuthProvider: Send + Sync {
    /// Run the full login handshake for the given identity.
    fn login(&self, credentials: &Credentials) -> impl Future<Output = Result<LoginGrant>> + Send;

    /// Exchange a live auth token + login nonce for a fresh access/system
    /// token pair.
    fn exchange(
        &self,
        auth_token: &str,
        nonce: &str,
        system_id: &str,
    ) -> impl Future<Output = Result<TokenGrant>> + Send;
}

impl<P: AuthProvider> AuthProvider for std::sync::Arc<P> {
    fn login(&self, credentials: &Credentials) -> impl Future<Output = Result<LoginGrant>> + Send {
        (**self).login(credentials)
    }

    fn exchange(
        &self,
        auth_token: &str,
        nonce: &str,
        system_id: &str,
    ) -> impl Future<Output = Result<TokenGrant>> + Send {
        (**self).exchange(auth_token, nonce, system_id)
    }
}

/// [`AuthProvider`] backed by the provider's accounts service.
///
/// The login flow is the same one the provider's web app performs: submit
/// credentials to the local-auth endpoint (establishing a cookie session),
/// then walk the authorize/interaction redirects until the callback URL
/// carries the id token in its fragment.
pub struct HttpAuthProvider {
    client: Client,
    accounts_base: String,
    redirect_uri: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    /// The provider names the system token plain "token".
    token: String,
    #[serde(rename = "expiresIn", default)]
    expires_in_secs: Option<i64>,
}

impl HttpAuthProvider {
    pub fn new(environment: Environment) -> Result<Self> {
        // Redirects are walked manually: the interaction hops carry the
        // state we need in their Location headers.
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .cookie_store(true)
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            accounts_base: environment.accounts_base().to_string(),
            redirect_uri: environment.redirect_uri().to_string(),
        })
    }

    /// Override the accounts base URL (tests, self-hosted mirrors).
    pub fn with_accounts_base(mut self, base: impl Into<String>) -> Self {
        self.accounts_base = base.into();
        self
    }

    async fn submit_credentials(&self, credentials: &Credentials) -> Result<()> {
        let url = format!("{}/auth/local", self.accounts_base);
        let payload = serde_json::json!({
            "email": credentials.email,
            "password": credentials.password,
        });

        let response = self
            .client
            .post(&url)
            .header(header::ORIGIN, self.accounts_base.clone())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(status = %status, "login rate limited");
            return Err(Error::Transient(format!("login rate limited: {}", body)));
        }
        if status.is_server_error() {
            return Err(Error::Transient(format!(
                "login endpoint returned {}: {}",
                status, body
            )));
        }
        Err(Error::Authentication(format!(
            "provider rejected credentials with status {}",
            status
        )))
    }

    /// GET a handshake URL and return the Location header of its redirect.
    async fn follow_hop(&self, url: &str, step: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_redirection() {
            if status.is_server_error() {
                return Err(Error::Transient(format!(
                    "{} returned {} instead of a redirect",
                    step, status
                )));
            }
            return Err(Error::Authentication(format!(
                "{} returned {} instead of a redirect",
                step, status
            )));
        }

        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::Authentication(format!("{} redirect had no location", step)))
    }
}

impl AuthProvider for HttpAuthProvider {
    async fn login(&self, credentials: &Credentials) -> Result<LoginGrant> {
        self.submit_credentials(credentials).await?;

        let nonce = generate_nonce();
        let authorize_url = reqwest::Url::parse_with_params(
            &format!("{}/oauth2/auth", self.accounts_base),
            &[
                ("response_type", "id_token token"),
                ("client_id", credentials.client_id()),
                ("redirect_uri", &self.redirect_uri),
                ("nonce", &nonce),
                ("scope", "openid"),
            ],
        )
        .map_err(|e| Error::Authentication(format!("bad authorize URL: {}", e)))?;

        // authorize -> interaction -> authorize/<id> -> callback#fragment
        let location = self.follow_hop(authorize_url.as_str(), "authorize").await?;
        let interaction_id = location
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Error::Authentication(format!("no interaction id in redirect: {}", location))
            })?
            .to_string();
        debug!(interaction_id = %interaction_id, "login handshake started");

        let interaction_url = format!("{}/interaction/{}", self.accounts_base, interaction_id);
        self.follow_hop(&interaction_url, "interaction").await?;

        let resume_url = format!("{}/oauth2/auth/{}", self.accounts_base, interaction_id);
        let callback_url = self.follow_hop(&resume_url, "authorize resume").await?;

        let auth_token = fragment_param(&callback_url, "id_token").ok_or_else(|| {
            Error::Authentication("callback carried no id token".to_string())
        })?;

        debug!("login handshake complete");
        Ok(LoginGrant {
            auth_token,
            nonce,
            expires_at: default_auth_expiry(Utc::now()),
        })
    }

    async fn exchange(&self, auth_token: &str, nonce: &str, system_id: &str) -> Result<TokenGrant> {
        let url = format!("{}/api/systems/{}/token", self.accounts_base, system_id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(auth_token)
            .header(header::ACCEPT, "application/vnd.pdk.v2+json")
            .json(&serde_json::json!({ "nonce": nonce }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                return Err(Error::Transient(format!(
                    "token exchange returned {}: {}",
                    status, body
                )));
            }
            return Err(Error::RefreshDenied(format!(
                "token exchange rejected with status {}",
                status
            )));
        }

        let grant: ExchangeResponse = response.json().await.map_err(|e| {
            Error::RefreshDenied(format!("unparseable token exchange response: {}", e))
        })?;

        let now = Utc::now();
        let expires_at = match grant.expires_in_secs {
            Some(secs) => now + chrono::Duration::seconds(secs),
            None => default_business_expiry(now),
        };

        Ok(TokenGrant {
            access_token: grant.access_token,
            system_token: grant.token,
            expires_at,
        })
    }
}

/// 32-hex-char nonce for the authorize request.
fn generate_nonce() -> String {
    let mut rng = rand::thread_rng();
    (0..16).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}

/// Pull one parameter out of a URL fragment
/// (`...#id_token=abc&access_token=def`).
fn fragment_param(url: &str, key: &str) -> Option<String> {
    let (_, fragment) = url.split_once('#')?;
    fragment.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key && !v.is_empty()).then(|| v.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_param_extracts_token() {
        let url = "https://pdk.io/authCallback#id_token=eyJhbGc.abc.def&access_token=xyz&expires_in=300";
        assert_eq!(fragment_param(url, "id_token").as_deref(), Some("eyJhbGc.abc.def"));
        assert_eq!(fragment_param(url, "access_token").as_deref(), Some("xyz"));
    }

    #[test]
    fn test_fragment_param_missing() {
        assert_eq!(fragment_param("https://pdk.io/authCallback", "id_token"), None);
        assert_eq!(
            fragment_param("https://pdk.io/authCallback#access_token=xyz", "id_token"),
            None
        );
        assert_eq!(fragment_param("https://pdk.io/cb#id_token=", "id_token"), None);
    }

    #[test]
    fn test_generate_nonce_shape() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_nonce(), generate_nonce());
    }

    #[test]
    fn test_exchange_response_parses_provider_shape() {
        let json = r#"{"accessToken": "acc-123", "token": "sys-456", "expiresIn": 300}"#;
        let parsed: ExchangeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.access_token, "acc-123");
        assert_eq!(parsed.token, "sys-456");
        assert_eq!(parsed.expires_in_secs, Some(300));

        let no_ttl = r#"{"accessToken": "a", "token": "s"}"#;
        let parsed: ExchangeResponse = serde_json::from_str(no_ttl).unwrap();
        assert_eq!(parsed.expires_in_secs, None);
    }
}
