//! Bearer credential cache for the Ad Manager API.
//!
//! Tokens are reused until they come within a safety margin of expiry. When a
//! refresh is needed, the first caller starts a single exchange and every
//! concurrent caller awaits that same shared future, so a burst of forecasts
//! never triggers more than one exchange. A failed exchange is reported to all
//! of its waiters and leaves the cache unrefreshed; the next call starts over.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::CredentialError;

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Token returned by a credential exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: Duration,
}

/// Performs one credential exchange against the token endpoint.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self) -> Result<TokenGrant, CredentialError>;
}

/// Cached bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Builds the credential for a fresh grant.
    ///
    /// A grant whose lifetime does not outlast `margin` could never be handed
    /// out, so it is rejected as malformed.
    fn from_grant(
        grant: TokenGrant,
        issued_at: DateTime<Utc>,
        margin: chrono::Duration,
    ) -> Result<Self, CredentialError> {
        let lifetime = chrono::Duration::from_std(grant.expires_in).map_err(|_| {
            CredentialError::MalformedGrant(format!(
                "expires_in out of range: {:?}",
                grant.expires_in
            ))
        })?;
        if lifetime <= margin {
            return Err(CredentialError::MalformedGrant(format!(
                "expires_in of {}s does not exceed the {}s refresh margin",
                lifetime.num_seconds(),
                margin.num_seconds()
            )));
        }
        Ok(Self {
            access_token: grant.access_token,
            expires_at: issued_at + lifetime,
        })
    }

    /// True while `now` is strictly before `expires_at - margin`.
    pub fn is_usable(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now < self.expires_at - margin
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential, CredentialError>>>;

#[derive(Default)]
struct CacheState {
    current: Option<Credential>,
    refresh: Option<RefreshFuture>,
}

pub struct CredentialCache {
    exchanger: Arc<dyn TokenExchanger>,
    clock: Arc<dyn Clock>,
    safety_margin: chrono::Duration,
    state: Arc<Mutex<CacheState>>,
}

impl CredentialCache {
    /// Creates a cache that refreshes `safety_margin` before expiry.
    pub fn new(
        exchanger: Arc<dyn TokenExchanger>,
        clock: Arc<dyn Clock>,
        safety_margin: Duration,
    ) -> Self {
        Self {
            exchanger,
            clock,
            safety_margin: chrono::Duration::from_std(safety_margin)
                .unwrap_or(chrono::Duration::zero()),
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Returns a usable access token, refreshing it first if needed.
    ///
    /// # Returns
    ///
    /// * `Result<String, CredentialError>` - The bearer token, or the error of
    ///   the exchange this call waited on.
    pub async fn get_access_token(&self) -> Result<String, CredentialError> {
        let refresh = {
            let mut state = self.state.lock().await;

            if let Some(credential) = state.current.as_ref() {
                if credential.is_usable(self.clock.now(), self.safety_margin) {
                    return Ok(credential.access_token.clone());
                }
            }

            match state.refresh.as_ref() {
                Some(in_flight) => {
                    debug!("Joining in-flight credential refresh");
                    in_flight.clone()
                }
                None => {
                    let refresh = self.start_refresh();
                    state.refresh = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await.map(|credential| credential.access_token)
    }

    /// Expiry of the cached token, if one has been obtained.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .await
            .current
            .as_ref()
            .map(|credential| credential.expires_at)
    }

    fn start_refresh(&self) -> RefreshFuture {
        let exchanger = Arc::clone(&self.exchanger);
        let clock = Arc::clone(&self.clock);
        let state = Arc::clone(&self.state);
        let margin = self.safety_margin;

        async move {
            info!("Refreshing Ad Manager access token");
            let outcome = match exchanger.exchange().await {
                Ok(grant) => Credential::from_grant(grant, clock.now(), margin),
                Err(e) => Err(e),
            };

            let mut state = state.lock().await;
            state.refresh = None;
            match &outcome {
                Ok(credential) => {
                    info!("✓ Access token refreshed, expires at {}", credential.expires_at);
                    state.current = Some(credential.clone());
                }
                Err(e) => warn!("Credential exchange failed: {}", e),
            }
            outcome
        }
        .boxed()
        .shared()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// OAuth2 refresh-token exchange against a standard token endpoint.
#[derive(Clone)]
pub struct OAuthTokenExchanger {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

impl OAuthTokenExchanger {
    /// Creates a new `OAuthTokenExchanger`.
    ///
    /// # Arguments
    ///
    /// * `token_url` - The OAuth2 token endpoint.
    /// * `client_id` - OAuth client id.
    /// * `client_secret` - OAuth client secret.
    /// * `refresh_token` - Long-lived refresh token of the service account.
    pub fn new(
        token_url: String,
        client_id: String,
        client_secret: String,
        refresh_token: String,
    ) -> Result<Self, CredentialError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                CredentialError::Unreachable(format!("Failed to create token client: {}", e))
            })?;

        Ok(Self {
            client,
            token_url,
            client_id,
            client_secret,
            refresh_token,
        })
    }
}

#[async_trait]
impl TokenExchanger for OAuthTokenExchanger {
    async fn exchange(&self) -> Result<TokenGrant, CredentialError> {
        debug!("Exchanging refresh token at {}", self.token_url);

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CredentialError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CredentialError::Rejected { status, body });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::MalformedGrant(e.to_string()))?;

        Ok(TokenGrant {
            access_token: token.access_token,
            expires_in: Duration::from_secs(token.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExchanger {
        calls: AtomicUsize,
        fail: bool,
        lifetime: Duration,
    }

    impl CountingExchanger {
        fn new(fail: bool) -> Self {
            Self::with_lifetime(fail, Duration::from_secs(3600))
        }

        fn with_lifetime(fail: bool, lifetime: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
                lifetime,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenExchanger for CountingExchanger {
        async fn exchange(&self) -> Result<TokenGrant, CredentialError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail {
                return Err(CredentialError::Rejected {
                    status: 400,
                    body: "invalid_grant".to_string(),
                });
            }
            Ok(TokenGrant {
                access_token: format!("token-{}", n),
                expires_in: self.lifetime,
            })
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn cache(exchanger: Arc<CountingExchanger>, clock: Arc<ManualClock>) -> CredentialCache {
        CredentialCache::new(exchanger, clock, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_exchange() {
        let exchanger = Arc::new(CountingExchanger::new(false));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = Arc::new(cache(exchanger.clone(), clock));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_access_token().await })
            })
            .collect();

        for handle in futures::future::join_all(handles).await {
            assert_eq!(handle.unwrap().unwrap(), "token-1");
        }
        assert_eq!(exchanger.calls(), 1);
    }

    #[tokio::test]
    async fn test_cached_token_reused_until_margin() {
        let exchanger = Arc::new(CountingExchanger::new(false));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache(exchanger.clone(), clock.clone());

        assert_eq!(cache.get_access_token().await.unwrap(), "token-1");

        // 3600s lifetime, 300s margin: still usable at +3299s
        clock.advance(Duration::from_secs(3299));
        assert_eq!(cache.get_access_token().await.unwrap(), "token-1");
        assert_eq!(exchanger.calls(), 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get_access_token().await.unwrap(), "token-2");
        assert_eq!(exchanger.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_exchange_reaches_all_waiters_and_is_not_cached() {
        let exchanger = Arc::new(CountingExchanger::new(true));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = Arc::new(cache(exchanger.clone(), clock));

        let (a, b) = tokio::join!(cache.get_access_token(), cache.get_access_token());
        assert!(matches!(a, Err(CredentialError::Rejected { status: 400, .. })));
        assert_eq!(a, b);
        assert_eq!(exchanger.calls(), 1);
        assert!(cache.expires_at().await.is_none());

        // The next call starts a fresh exchange rather than replaying the failure
        assert!(cache.get_access_token().await.is_err());
        assert_eq!(exchanger.calls(), 2);
    }

    #[tokio::test]
    async fn test_expiry_tracks_clock() {
        let exchanger = Arc::new(CountingExchanger::new(false));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache(exchanger, clock);

        cache.get_access_token().await.unwrap();
        assert_eq!(
            cache.expires_at().await,
            Some(start() + chrono::Duration::seconds(3600))
        );
    }

    #[tokio::test]
    async fn test_grant_shorter_than_margin_is_never_handed_out() {
        // 60s lifetime against a 300s margin
        let exchanger = Arc::new(CountingExchanger::with_lifetime(
            false,
            Duration::from_secs(60),
        ));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = Arc::new(cache(exchanger.clone(), clock));

        let (a, b) = tokio::join!(cache.get_access_token(), cache.get_access_token());
        assert!(matches!(a, Err(CredentialError::MalformedGrant(_))));
        assert_eq!(a, b);
        assert_eq!(exchanger.calls(), 1);
        assert!(cache.expires_at().await.is_none());
    }

    #[tokio::test]
    async fn test_grant_equal_to_margin_is_rejected() {
        let exchanger = Arc::new(CountingExchanger::with_lifetime(
            false,
            Duration::from_secs(300),
        ));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache(exchanger, clock);

        assert!(matches!(
            cache.get_access_token().await,
            Err(CredentialError::MalformedGrant(_))
        ));
    }

    #[test]
    fn test_fresh_credential_is_usable_under_margin() {
        let margin = chrono::Duration::seconds(300);
        let grant = TokenGrant {
            access_token: "t".to_string(),
            expires_in: Duration::from_secs(301),
        };
        let credential = Credential::from_grant(grant, start(), margin).unwrap();
        assert!(credential.is_usable(start(), margin));
    }
}
