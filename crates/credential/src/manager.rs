//! Per-identity credential manager
//!
//! Owns one refresh token and its derived access token, serializing refresh
//! attempts behind a single lock so concurrent callers crossing the stale
//! threshold produce exactly one upstream call.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use common::Clock;
use store::PersistentStore;

use crate::classify::{Classification, classify};
use crate::endpoints::RegionEndpoints;
use crate::error::{Error, Result};
use crate::fingerprint::fingerprint;
use crate::token::{self, Attempt};

/// Seconds before expiry at which a cached token is considered stale.
pub const DEFAULT_REFRESH_THRESHOLD_SECS: u64 = 60;

const MAX_RETRIES: u32 = 3;
const BASE_DELAY_MS: u64 = 1000;

struct CachedToken {
    access_token: String,
    /// `None` until the first successful refresh.
    expires_at: Option<u64>,
    refresh_token: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    profile_arn: Option<String>,
}

/// Supplies a currently-valid access token for one identity, refreshing it
/// transparently when absent or near expiry.
pub struct CredentialManager {
    identity_id: u64,
    region: String,
    endpoints: RegionEndpoints,
    refresh_threshold_secs: u64,
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    http_client: reqwest::Client,
    state: Mutex<CachedToken>,
}

impl CredentialManager {
    pub fn new(
        identity_id: u64,
        region: String,
        refresh_token: String,
        client_id: Option<String>,
        client_secret: Option<String>,
        profile_arn: Option<String>,
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
        http_client: reqwest::Client,
    ) -> Self {
        let endpoints = RegionEndpoints::for_region(&region);
        Self {
            identity_id,
            region,
            endpoints,
            refresh_threshold_secs: DEFAULT_REFRESH_THRESHOLD_SECS,
            store,
            clock,
            http_client,
            state: Mutex::new(CachedToken {
                access_token: String::new(),
                expires_at: None,
                refresh_token,
                client_id,
                client_secret,
                profile_arn,
            }),
        }
    }

    /// Override the default refresh threshold (seconds before expiry at
    /// which a cached token is treated as stale).
    pub fn with_refresh_threshold_secs(mut self, secs: u64) -> Self {
        self.refresh_threshold_secs = secs;
        self
    }

    pub fn identity_id(&self) -> u64 {
        self.identity_id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn api_host(&self) -> &str {
        &self.endpoints.api_host
    }

    pub fn q_host(&self) -> &str {
        &self.endpoints.q_host
    }

    pub fn fingerprint(&self) -> &'static str {
        fingerprint()
    }

    pub async fn profile_arn(&self) -> Option<String> {
        self.state.lock().await.profile_arn.clone()
    }

    /// Return a currently-valid access token, refreshing first if the
    /// cached token is absent or within the refresh threshold of expiry.
    pub async fn get_access_token(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if self.is_stale(&state) {
            self.refresh_locked(&mut state).await?;
        }
        Ok(state.access_token.clone())
    }

    /// Unconditionally refresh, even if the cached token looks fresh. Used
    /// by the request-forwarding collaborator on an upstream 403.
    pub async fn force_refresh(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await?;
        Ok(state.access_token.clone())
    }

    fn is_stale(&self, state: &CachedToken) -> bool {
        match state.expires_at {
            None => true,
            Some(expires_at) => {
                expires_at <= self.clock.now_millis() + self.refresh_threshold_secs * 1000
            }
        }
    }

    async fn refresh_locked(&self, state: &mut CachedToken) -> Result<()> {
        if state.refresh_token.is_empty() {
            return Err(Error::NoRefreshToken);
        }

        let user_agent = format!("KiroGateway-{}", &fingerprint()[..16.min(fingerprint().len())]);
        let mut last_error: Option<Error> = None;

        for attempt in 0..MAX_RETRIES {
            let outcome = token::attempt_refresh(
                &self.http_client,
                &self.endpoints.refresh_url,
                &state.refresh_token,
                state.client_id.as_deref(),
                state.client_secret.as_deref(),
                &user_agent,
            )
            .await;

            match outcome {
                Attempt::Success(response) => {
                    let now = self.clock.now_millis();
                    let new_expires_at = now + response.expires_in.saturating_mul(1000) - 60_000;
                    let new_refresh_token = response
                        .refresh_token
                        .clone()
                        .unwrap_or_else(|| state.refresh_token.clone());

                    // Persist first, then mutate in-memory state.
                    self.store
                        .rotate_refresh_token(
                            self.identity_id,
                            &new_refresh_token,
                            response.profile_arn.clone(),
                        )
                        .await?;

                    state.access_token = response.access_token;
                    state.refresh_token = new_refresh_token;
                    if let Some(arn) = response.profile_arn {
                        state.profile_arn = Some(arn);
                    }
                    state.expires_at = Some(new_expires_at as u64);

                    info!(identity_id = self.identity_id, "refresh succeeded");
                    return Ok(());
                }
                Attempt::HttpError { status, body } => {
                    match classify(Some(status), None) {
                        Classification::Retry => {
                            last_error = Some(Error::UpstreamTransient(format!(
                                "HTTP {status}: {body}"
                            )));
                            self.backoff(attempt).await;
                        }
                        Classification::Fatal => {
                            warn!(identity_id = self.identity_id, status, "refresh refused");
                            return Err(Error::UpstreamRefused(format!(
                                "HTTP {status}: {body}"
                            )));
                        }
                    }
                }
                Attempt::Transport(kind) => {
                    debug_assert_eq!(classify(None, Some(kind)), Classification::Retry);
                    last_error = Some(Error::UpstreamTransient(format!("{kind:?}")));
                    self.backoff(attempt).await;
                }
                Attempt::Malformed(detail) => {
                    warn!(identity_id = self.identity_id, "refresh response malformed");
                    return Err(Error::MalformedResponse(detail));
                }
            }
        }

        warn!(identity_id = self.identity_id, "refresh exhausted retries");
        Err(last_error
            .unwrap_or_else(|| Error::UpstreamTransient("retries exhausted".into())))
    }

    async fn backoff(&self, attempt: u32) {
        let delay = BASE_DELAY_MS * 2u64.pow(attempt);
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }
}
