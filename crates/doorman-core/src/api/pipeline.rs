//! Resilient request pipeline: credential attachment, backoff, rate limits.
//!
//! Every outbound business call goes through [`Pipeline::execute`], which
//! resolves a valid token record first, attaches the right bearer token,
//! and retries under an explicit [`RetryPolicy`]. Callers never see the
//! internal refresh/re-login fallbacks - only the typed results.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::api::error::ApiError;
use crate::auth::manager::SessionManager;
use crate::auth::provider::AuthProvider;
use crate::auth::tokens::{TokenLevel, TokenRecord};
use crate::error::{Error, Result};

/// Retry/backoff policy for one pipeline.
///
/// A plain value object so the backoff schedule is testable without any
/// network call or sleep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retry ceiling: total underlying calls = `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
    /// Random jitter factor range: each delay is scaled by a value drawn
    /// from `[1.0, 1.0 + jitter)`.
    pub jitter: f64,
    /// Upper bound on the pre-jitter delay.
    pub max_delay: Duration,
    /// Overall budget for one `execute`, backoff sleeps included. `None`
    /// means no deadline.
    pub operation_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter: 0.25,
            max_delay: Duration::from_secs(30),
            operation_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Pre-jitter delay for the nth retry (1-based), capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(raw.min(self.max_delay.as_secs_f64()))
    }

    /// Scale a delay by a random factor in `[1.0, 1.0 + jitter)`.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(1.0..1.0 + self.jitter);
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }
}

/// Last observed rate-limit signal. Process-local, never persisted.
#[derive(Debug, Clone, Default)]
pub struct RateLimitState {
    pub consecutive_hits: u32,
    pub last_hit: Option<Instant>,
}

/// Wraps business calls with credential resolution and bounded retry.
pub struct Pipeline<P: AuthProvider> {
    sessions: Arc<SessionManager<P>>,
    policy: RetryPolicy,
    rate_limit: Mutex<RateLimitState>,
}

impl<P: AuthProvider> Pipeline<P> {
    pub fn new(sessions: Arc<SessionManager<P>>, policy: RetryPolicy) -> Self {
        Self {
            sessions,
            policy,
            rate_limit: Mutex::new(RateLimitState::default()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn sessions(&self) -> &SessionManager<P> {
        &self.sessions
    }

    pub fn rate_limit_state(&self) -> RateLimitState {
        self.rate_limit.lock().expect("rate limit lock poisoned").clone()
    }

    /// Run `op` with a valid bearer token for `level`, retrying per policy.
    ///
    /// `op` is called with the token and must surface provider responses as
    /// [`ApiError`] signals; it may be invoked several times.
    pub async fn execute<T, F, Fut>(&self, level: TokenLevel, op: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<T, ApiError>>,
    {
        let calls = AtomicU32::new(0);
        let work = self.run(level, &op, &calls);

        match self.policy.operation_timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => Err(Error::RequestFailed {
                    attempts: calls.load(Ordering::SeqCst),
                    cause: format!("operation timed out after {:?}", limit),
                }),
            },
            None => work.await,
        }
    }

    async fn run<T, F, Fut>(&self, level: TokenLevel, op: &F, calls: &AtomicU32) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<T, ApiError>>,
    {
        let mut retries: u32 = 0;
        let mut unauthorized_streak: u32 = 0;

        let mut record = self.resolve(level, &mut retries).await?;
        let mut token = bearer_for(&record, level)?;

        loop {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            match op(token.clone()).await {
                Ok(value) => {
                    self.clear_rate_limit();
                    debug!(attempts = attempt, "request succeeded");
                    return Ok(value);
                }
                Err(ApiError::RateLimited) => {
                    self.note_rate_limit();
                    unauthorized_streak = 0;
                    retries += 1;
                    if retries > self.policy.max_retries {
                        return Err(Error::RequestFailed {
                            attempts: attempt,
                            cause: ApiError::RateLimited.to_string(),
                        });
                    }
                    let delay = self.policy.jittered(self.policy.delay_for(retries));
                    warn!(
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    // Same call, same token: rate limiting alone never
                    // triggers re-authentication.
                    tokio::time::sleep(delay).await;
                }
                Err(ApiError::Unauthorized) => {
                    unauthorized_streak += 1;
                    if unauthorized_streak > 1 {
                        return Err(Error::Authorization);
                    }
                    warn!("token rejected despite local bookkeeping, re-authenticating once");
                    record = self.sessions.reauthenticate().await?;
                    token = bearer_for(&record, level)?;
                }
                Err(e) if e.is_transient() => {
                    unauthorized_streak = 0;
                    retries += 1;
                    if retries > self.policy.max_retries {
                        return Err(Error::RequestFailed {
                            attempts: attempt,
                            cause: e.to_string(),
                        });
                    }
                    let delay = self.policy.jittered(self.policy.delay_for(retries));
                    warn!(error = %e, retry = retries, "transient failure, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(Error::Api(e)),
            }
        }
    }

    /// Resolve a valid record, retrying transient login/refresh failures
    /// from the same retry budget as the call itself.
    async fn resolve(&self, level: TokenLevel, retries: &mut u32) -> Result<TokenRecord> {
        loop {
            match self.sessions.ensure_valid(level).await {
                Ok(record) => return Ok(record),
                Err(Error::Transient(cause)) => {
                    *retries += 1;
                    if *retries > self.policy.max_retries {
                        return Err(Error::RequestFailed {
                            attempts: 0,
                            cause,
                        });
                    }
                    let delay = self.policy.jittered(self.policy.delay_for(*retries));
                    warn!(
                        error = %cause,
                        retry = *retries,
                        "credential resolution failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn note_rate_limit(&self) {
        let mut state = self.rate_limit.lock().expect("rate limit lock poisoned");
        state.consecutive_hits += 1;
        state.last_hit = Some(Instant::now());
    }

    fn clear_rate_limit(&self) {
        let mut state = self.rate_limit.lock().expect("rate limit lock poisoned");
        state.consecutive_hits = 0;
    }
}

fn bearer_for(record: &TokenRecord, level: TokenLevel) -> Result<String> {
    record
        .token_for(level)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Authentication(format!("resolved record carries no {:?} token", level))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::provider::{LoginGrant, TokenGrant};
    use crate::auth::tokens::TokenRecord;
    use crate::config::Credentials;
    use crate::store::TokenStore;
    use chrono::{Duration as ChronoDuration, Utc};

    struct MockProvider {
        login_calls: AtomicU32,
        exchange_calls: AtomicU32,
        transient_login_failures: AtomicU32,
    }

    impl MockProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                login_calls: AtomicU32::new(0),
                exchange_calls: AtomicU32::new(0),
                transient_login_failures: AtomicU32::new(0),
            })
        }

        fn logins(&self) -> u32 {
            self.login_calls.load(Ordering::SeqCst)
        }
    }

    impl AuthProvider for MockProvider {
        async fn login(&self, _: &Credentials) -> Result<LoginGrant> {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.transient_login_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_login_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::Transient("connection reset".to_string()));
            }
            Ok(LoginGrant {
                auth_token: "fresh-auth".to_string(),
                nonce: "fresh-nonce".to_string(),
                expires_at: Utc::now() + ChronoDuration::minutes(5),
            })
        }

        async fn exchange(&self, _: &str, _: &str, _: &str) -> Result<TokenGrant> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenGrant {
                access_token: "fresh-access".to_string(),
                system_token: "fresh-system".to_string(),
                expires_at: Utc::now() + ChronoDuration::minutes(5),
            })
        }
    }

    fn credentials() -> Credentials {
        serde_json::from_str(
            r#"{"email": "ops@example.com", "password": "pw", "system_id": "sys-1"}"#,
        )
        .unwrap()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
            jitter: 0.0,
            max_delay: Duration::from_millis(10),
            operation_timeout: None,
        }
    }

    fn unique_store(tag: &str) -> TokenStore {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "doorman-pipeline-{}-{}-{}",
            std::process::id(),
            tag,
            nanos
        ));
        TokenStore::new(dir).unwrap()
    }

    fn empty_pipeline(
        provider: &Arc<MockProvider>,
        tag: &str,
        policy: RetryPolicy,
    ) -> Pipeline<Arc<MockProvider>> {
        let store = unique_store(tag);
        let sessions = Arc::new(SessionManager::new(Arc::clone(provider), credentials(), store));
        Pipeline::new(sessions, policy)
    }

    fn seeded_pipeline(
        provider: &Arc<MockProvider>,
        tag: &str,
        policy: RetryPolicy,
    ) -> Pipeline<Arc<MockProvider>> {
        let store = unique_store(tag);
        let now = Utc::now();
        let record = TokenRecord::after_login(
            "sys-1",
            "seeded-auth",
            "seeded-nonce",
            now + ChronoDuration::minutes(5),
        )
        .completed_with("seeded-access", "seeded-system", now + ChronoDuration::minutes(5));
        store.put(&record).unwrap();

        let sessions = Arc::new(SessionManager::new(Arc::clone(provider), credentials(), store));
        Pipeline::new(sessions, policy)
    }

    #[test]
    fn test_policy_delays_grow_and_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
            max_delay: Duration::from_millis(500),
            operation_timeout: None,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        // Capped from here on.
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(10), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_bounds_keep_delays_increasing() {
        let policy = RetryPolicy {
            jitter: 0.25,
            ..RetryPolicy::default()
        };
        // With multiplier 2.0 > 1 + jitter, consecutive jittered delays
        // are strictly increasing regardless of the draw.
        for retry in 1..5 {
            let lower = policy.delay_for(retry);
            let jittered = policy.jittered(lower);
            assert!(jittered >= lower);
            assert!(jittered < lower.mul_f64(1.0 + policy.jitter));
            assert!(lower.mul_f64(1.0 + policy.jitter) <= policy.delay_for(retry + 1));
        }
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_ceiling() {
        let provider = MockProvider::new();
        let pipeline = seeded_pipeline(&provider, "ratelimit", fast_policy());
        let op_calls = Arc::new(AtomicU32::new(0));

        let calls = Arc::clone(&op_calls);
        let result: Result<()> = pipeline
            .execute(TokenLevel::System, move |_token| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::RateLimited)
                }
            })
            .await;

        // Ceiling of 2 retries means 3 underlying calls.
        assert_eq!(op_calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            Error::RequestFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected RequestFailed, got {:?}", other),
        }
        // Rate limiting alone never re-authenticates.
        assert_eq!(provider.logins(), 0);
        assert_eq!(pipeline.rate_limit_state().consecutive_hits, 3);
    }

    #[tokio::test]
    async fn test_single_unauthorized_reauthenticates_once_and_retries() {
        let provider = MockProvider::new();
        let pipeline = seeded_pipeline(&provider, "unauthorized-once", fast_policy());
        let op_calls = Arc::new(AtomicU32::new(0));

        let calls = Arc::clone(&op_calls);
        let result = pipeline
            .execute(TokenLevel::System, move |token| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ApiError::Unauthorized)
                    } else {
                        // The retry must carry the re-issued token.
                        assert_eq!(token, "fresh-system");
                        Ok("payload")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "payload");
        assert_eq!(op_calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.logins(), 1);
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_authorization_error() {
        let provider = MockProvider::new();
        let pipeline = seeded_pipeline(&provider, "unauthorized-twice", fast_policy());
        let op_calls = Arc::new(AtomicU32::new(0));

        let calls = Arc::clone(&op_calls);
        let result: Result<()> = pipeline
            .execute(TokenLevel::System, move |_token| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::Unauthorized)
                }
            })
            .await;

        assert!(matches!(result.unwrap_err(), Error::Authorization));
        // Exactly two calls: the original and the one post-re-auth retry.
        assert_eq!(op_calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.logins(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let provider = MockProvider::new();
        let pipeline = seeded_pipeline(&provider, "transient", fast_policy());
        let op_calls = Arc::new(AtomicU32::new(0));

        let calls = Arc::clone(&op_calls);
        let result = pipeline
            .execute(TokenLevel::Access, move |token| {
                let calls = Arc::clone(&calls);
                async move {
                    assert_eq!(token, "seeded-access");
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ApiError::ServerError("flaky upstream".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(op_calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.logins(), 0);
    }

    #[tokio::test]
    async fn test_non_retryable_surfaces_immediately() {
        let provider = MockProvider::new();
        let pipeline = seeded_pipeline(&provider, "notfound", fast_policy());
        let op_calls = Arc::new(AtomicU32::new(0));

        let calls = Arc::clone(&op_calls);
        let result: Result<()> = pipeline
            .execute(TokenLevel::System, move |_token| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::NotFound("no such device".to_string()))
                }
            })
            .await;

        assert!(matches!(result.unwrap_err(), Error::Api(ApiError::NotFound(_))));
        assert_eq!(op_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_operation_timeout_aborts_backoff() {
        let provider = MockProvider::new();
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(5),
            jitter: 0.0,
            operation_timeout: Some(Duration::from_millis(100)),
            ..RetryPolicy::default()
        };
        let pipeline = seeded_pipeline(&provider, "timeout", policy);

        let started = Instant::now();
        let result: Result<()> = pipeline
            .execute(TokenLevel::System, |_token| async {
                Err(ApiError::RateLimited)
            })
            .await;

        assert!(matches!(result.unwrap_err(), Error::RequestFailed { .. }));
        // Aborted mid-backoff, nowhere near the 5s base delay.
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_transient_login_failure_retried_from_same_budget() {
        let provider = MockProvider::new();
        provider.transient_login_failures.store(1, Ordering::SeqCst);
        let pipeline = empty_pipeline(&provider, "transient-login", fast_policy());
        let op_calls = Arc::new(AtomicU32::new(0));

        let calls = Arc::clone(&op_calls);
        let result = pipeline
            .execute(TokenLevel::System, move |_token| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("ok")
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "ok");
        // First login attempt failed transiently, the retry succeeded.
        assert_eq!(provider.logins(), 2);
        assert_eq!(op_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_valid_cached_record_makes_no_provider_calls() {
        let provider = MockProvider::new();
        let pipeline = seeded_pipeline(&provider, "cached", fast_policy());

        let result = pipeline
            .execute(TokenLevel::System, |token| async move {
                assert_eq!(token, "seeded-system");
                Ok("ok")
            })
            .await
            .unwrap();

        assert_eq!(result, "ok");
        assert_eq!(provider.logins(), 0);
        assert_eq!(provider.exchange_calls.load(Ordering::SeqCst), 0);
    }
}
