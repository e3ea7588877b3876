//! Session manager: resolve-or-refresh-then-persist, serialized per system.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::authenticator::Authenticator;
use crate::auth::provider::AuthProvider;
use crate::auth::refresher::Refresher;
use crate::auth::tokens::{TokenLevel, TokenRecord, TokenState};
use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::store::TokenStore;

/// Owns the credential resolution ladder for one system id.
///
/// All resolution runs under one async mutex, so concurrent callers can
/// never trigger overlapping logins or refreshes: the second caller blocks,
/// then finds the record the first one persisted.
pub struct SessionManager<P: AuthProvider> {
    credentials: Credentials,
    store: TokenStore,
    authenticator: Authenticator<Arc<P>>,
    refresher: Refresher<Arc<P>>,
    lock: Mutex<()>,
}

impl<P: AuthProvider> SessionManager<P> {
    pub fn new(provider: P, credentials: Credentials, store: TokenStore) -> Self {
        let provider = Arc::new(provider);
        Self {
            authenticator: Authenticator::new(Arc::clone(&provider)),
            refresher: Refresher::new(provider),
            credentials,
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn system_id(&self) -> &str {
        &self.credentials.system_id
    }

    /// Stored record without touching the provider (status display).
    pub fn peek(&self) -> Result<Option<TokenRecord>> {
        self.store.get(self.system_id())
    }

    /// Produce a record whose token for `level` is currently valid,
    /// refreshing or re-authenticating as the stored state requires.
    /// Every credential change is persisted before this returns.
    pub async fn ensure_valid(&self, level: TokenLevel) -> Result<TokenRecord> {
        let _guard = self.lock.lock().await;

        // A read failure is not fatal: fall through to a fresh login.
        let existing = match self.store.get(self.system_id()) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "token store read failed, re-authenticating");
                None
            }
        };

        let state = TokenState::classify(existing.as_ref(), Utc::now());
        debug!(state = ?state, level = ?level, "resolving token record");

        match state {
            TokenState::Complete => Ok(existing.expect("complete state implies record")),
            TokenState::PartialAfterLogin | TokenState::AccessExpired => {
                self.refresh_or_login(existing.expect("state implies record"))
                    .await
            }
            TokenState::Empty | TokenState::AuthExpired => self.login_and_complete().await,
        }
    }

    /// Discard local bookkeeping and force a full login. Used by the
    /// pipeline when the provider rejects a token the store considered
    /// valid.
    pub async fn reauthenticate(&self) -> Result<TokenRecord> {
        let _guard = self.lock.lock().await;
        info!(system_id = %self.system_id(), "forced re-authentication");
        self.login_and_complete().await
    }

    async fn refresh_or_login(&self, record: TokenRecord) -> Result<TokenRecord> {
        match self.refresher.refresh(record).await {
            Ok(updated) => self.store.put(&updated),
            Err(Error::StaleSession) | Err(Error::RefreshDenied(_)) => {
                // Internal fallback signals; never surfaced to callers.
                info!(system_id = %self.system_id(), "refresh unavailable, performing full login");
                self.login_and_complete().await
            }
            Err(e) => Err(e),
        }
    }

    async fn login_and_complete(&self) -> Result<TokenRecord> {
        let partial = self.authenticator.authenticate(&self.credentials).await?;

        match self.refresher.refresh(partial).await {
            Ok(complete) => self.store.put(&complete),
            // A denied exchange right after a successful login cannot be
            // fixed by another login; surface it instead of looping.
            Err(Error::RefreshDenied(msg)) => Err(Error::Authentication(format!(
                "token exchange denied immediately after login: {}",
                msg
            ))),
            Err(Error::StaleSession) => Err(Error::Authentication(
                "auth token already expired immediately after login".to_string(),
            )),
            Err(e) => Err(e),
        }
    }
}
