//! Token refresher: completes or renews a record without a full login.

use chrono::Utc;
use tracing::{debug, warn};

use crate::auth::provider::AuthProvider;
use crate::auth::tokens::TokenRecord;
use crate::error::{Error, Result};

/// Exchanges a record's auth token + nonce for a fresh access/system pair.
///
/// Refresh is the cheap path: it skips the credential round-trip (and its
/// rate-limit cost) whenever the longer-lived auth token is still good.
/// Only an expired auth token forces a full login.
pub struct Refresher<P> {
    provider: P,
}

impl<P: AuthProvider> Refresher<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Precondition: the record's auth token must be unexpired, otherwise
    /// `StaleSession` tells the caller to fall back to a full login.
    /// On success the access/system pair and its expiry are replaced; the
    /// auth token, its expiry, and the nonce are untouched.
    pub async fn refresh(&self, record: TokenRecord) -> Result<TokenRecord> {
        if !record.auth_token_valid(Utc::now()) {
            warn!(system_id = %record.system_id, "auth token expired, refresh impossible");
            return Err(Error::StaleSession);
        }

        let grant = self
            .provider
            .exchange(&record.auth_token, &record.auth_nonce, &record.system_id)
            .await?;

        debug!(system_id = %record.system_id, "token exchange succeeded");
        Ok(record.completed_with(grant.access_token, grant.system_token, grant.expires_at))
    }
}
