//! Session authenticator: full login producing a partial token record.

use std::sync::Mutex;

use tracing::{info, warn};

use crate::auth::provider::AuthProvider;
use crate::auth::tokens::TokenRecord;
use crate::config::Credentials;
use crate::error::Result;

/// Where the authenticator is in its lifecycle. Failures drop back to
/// `Authenticating` rather than `NoSession`: once a login has been
/// attempted the stored identity is known-submitted and retries continue
/// from there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NoSession,
    Authenticating,
    Authenticated,
}

pub struct Authenticator<P> {
    provider: P,
    state: Mutex<AuthState>,
}

impl<P: AuthProvider> Authenticator<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            state: Mutex::new(AuthState::NoSession),
        }
    }

    pub fn state(&self) -> AuthState {
        *self.state.lock().expect("auth state lock poisoned")
    }

    fn set_state(&self, state: AuthState) {
        *self.state.lock().expect("auth state lock poisoned") = state;
    }

    /// Run the login handshake and build a fresh, partial record: auth
    /// token and nonce populated, access/system pair empty. The caller must
    /// immediately refresh to complete it.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<TokenRecord> {
        self.set_state(AuthState::Authenticating);

        match self.provider.login(credentials).await {
            Ok(grant) => {
                self.set_state(AuthState::Authenticated);
                info!(system_id = %credentials.system_id, "login succeeded");
                Ok(TokenRecord::after_login(
                    credentials.system_id.clone(),
                    grant.auth_token,
                    grant.nonce,
                    grant.expires_at,
                ))
            }
            Err(e) => {
                warn!(system_id = %credentials.system_id, error = %e, "login failed");
                Err(e)
            }
        }
    }
}
