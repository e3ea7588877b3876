//! Token record and lifecycle state.
//!
//! The provider hands out three layered credentials: a login-scoped auth
//! token, and a shorter-lived access/system token pair obtained by
//! exchanging it. One record exists per system id; every state a record can
//! be in is enumerated in [`TokenState`] so callers never do ad-hoc
//! null/expiry checks.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Auth token lifetime granted at login.
/// The provider's id tokens expire after ~5 minutes.
const AUTH_TOKEN_TTL_MINUTES: i64 = 5;

/// Access/system token lifetime granted at exchange.
const BUSINESS_TOKEN_TTL_MINUTES: i64 = 5;

/// Which credential a business call must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLevel {
    Access,
    System,
}

/// One persisted credential set for a system id.
///
/// A record is *complete* when all three tokens are present and both
/// expiries are in the future; anything else is partial or stale and routes
/// through refresh or re-login (see [`TokenState`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub system_id: String,
    pub auth_token: String,
    pub access_token: Option<String>,
    pub system_token: Option<String>,
    pub auth_nonce: String,
    pub auth_token_expiry: DateTime<Utc>,
    /// Gates both the access and system tokens; the provider issues the
    /// pair together and they age together.
    pub system_token_expiry: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl TokenRecord {
    /// Record as it exists right after login: auth token and nonce only.
    /// The caller must immediately run a refresh to complete it.
    pub fn after_login(
        system_id: impl Into<String>,
        auth_token: impl Into<String>,
        auth_nonce: impl Into<String>,
        auth_token_expiry: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            system_id: system_id.into(),
            auth_token: auth_token.into(),
            access_token: None,
            system_token: None,
            auth_nonce: auth_nonce.into(),
            auth_token_expiry,
            // Nothing issued yet; an already-past expiry keeps the record
            // classified as partial.
            system_token_expiry: now,
            last_updated: now,
        }
    }

    /// Apply a successful exchange: new access/system pair, auth token and
    /// nonce untouched.
    pub fn completed_with(
        mut self,
        access_token: impl Into<String>,
        system_token: impl Into<String>,
        system_token_expiry: DateTime<Utc>,
    ) -> Self {
        self.access_token = Some(access_token.into());
        self.system_token = Some(system_token.into());
        self.system_token_expiry = system_token_expiry;
        self
    }

    pub fn auth_token_valid(&self, now: DateTime<Utc>) -> bool {
        self.auth_token_expiry > now
    }

    pub fn business_tokens_valid(&self, now: DateTime<Utc>) -> bool {
        self.access_token.is_some()
            && self.system_token.is_some()
            && self.system_token_expiry > now
    }

    /// Bearer credential for the requested level, if present.
    pub fn token_for(&self, level: TokenLevel) -> Option<&str> {
        match level {
            TokenLevel::Access => self.access_token.as_deref(),
            TokenLevel::System => self.system_token.as_deref(),
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> TokenState {
        TokenState::classify(Some(self), now)
    }

    pub fn minutes_until_business_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.system_token_expiry - now).num_minutes().max(0)
    }
}

/// Default auth-token expiry for a login happening now.
pub fn default_auth_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::minutes(AUTH_TOKEN_TTL_MINUTES)
}

/// Default access/system-token expiry for an exchange happening now.
pub fn default_business_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::minutes(BUSINESS_TOKEN_TTL_MINUTES)
}

/// Every state a stored record can be in, with one resolution path each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No record for this system id. Resolution: full login.
    Empty,
    /// Auth token live, access/system pair never issued. Resolution: refresh.
    PartialAfterLogin,
    /// Everything present and unexpired. Resolution: use as-is.
    Complete,
    /// Auth token expired; a refresh is impossible regardless of the rest.
    /// Resolution: full login, discarding the stale token and nonce.
    AuthExpired,
    /// Auth token live but the access/system pair has aged out.
    /// Resolution: refresh.
    AccessExpired,
}

impl TokenState {
    pub fn classify(record: Option<&TokenRecord>, now: DateTime<Utc>) -> Self {
        let Some(record) = record else {
            return TokenState::Empty;
        };

        if !record.auth_token_valid(now) {
            return TokenState::AuthExpired;
        }

        if record.access_token.is_none() || record.system_token.is_none() {
            return TokenState::PartialAfterLogin;
        }

        if record.system_token_expiry <= now {
            return TokenState::AccessExpired;
        }

        TokenState::Complete
    }
}
