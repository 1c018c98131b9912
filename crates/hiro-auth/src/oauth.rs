//! OAuth 2.0 broker: authorization-code and refresh-token flows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use hiro_types::{AuthStatus, Config, TokenRecord};

use crate::store::TokenStore;

/// Pending authorization states expire after ten minutes.
const STATE_TTL_MS: u64 = 10 * 60 * 1_000;
/// Tokens are refreshed this long before their stated expiry.
const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
struct PendingState {
    user_id: String,
    created_at_ms: u64,
}

/// What the token endpoint answers to either grant.
#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Brokers OAuth on behalf of each caller: a state-CSRF ledger for the
/// authorization flow, code exchange, proactive refresh and expiry-aware
/// access-token vending backed by the encrypted [`TokenStore`].
pub struct OAuthService {
    config: Arc<Config>,
    client: reqwest::Client,
    store: Arc<TokenStore>,
    pending: Mutex<HashMap<String, PendingState>>,
}

impl OAuthService {
    pub fn new(config: Arc<Config>, store: Arc<TokenStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("hiro/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("failed to build OAuth HTTP client")?;
        Ok(Self {
            config,
            client,
            store,
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Start the authorization flow for `user_id`: register a fresh 128-bit
    /// state nonce and return the full authorization URL.
    pub fn begin_authorization(&self, user_id: &str) -> Result<String> {
        let mut nonce = [0u8; 16];
        OsRng.fill_bytes(&mut nonce);
        let state = hex::encode(nonce);
        self.pending.lock().insert(
            state.clone(),
            PendingState {
                user_id: user_id.to_string(),
                created_at_ms: now_ms(),
            },
        );

        let oauth = &self.config.oauth;
        let mut url = Url::parse(&oauth.authorize_url)
            .with_context(|| format!("invalid authorize URL {}", oauth.authorize_url))?;
        url.query_pairs_mut()
            .append_pair("client_id", &oauth.client_id)
            .append_pair("response_type", "code")
            .append_pair("scope", &oauth.scope)
            .append_pair("state", &state)
            .append_pair("redirect_uri", &oauth.redirect_uri);
        debug!(user_id, "issued authorization URL");
        Ok(url.into())
    }

    /// Handle the provider callback: validate the state nonce, exchange the
    /// code and persist the resulting record. Returns the caller the state
    /// was minted for. The state entry is consumed whatever the outcome.
    pub async fn complete_authorization(&self, code: &str, state: &str) -> Result<String> {
        let pending = self.pending.lock().remove(state);
        let Some(pending) = pending else {
            anyhow::bail!("invalid state");
        };
        if now_ms().saturating_sub(pending.created_at_ms) > STATE_TTL_MS {
            anyhow::bail!("expired state");
        }

        let oauth = &self.config.oauth;
        let record = self
            .post_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", &oauth.client_id),
                ("client_secret", oauth.client_secret.expose_secret()),
                ("redirect_uri", &oauth.redirect_uri),
            ])
            .await?;
        self.store.put(&pending.user_id, &record).await?;
        info!(user_id = %pending.user_id, "stored OAuth credentials");
        Ok(pending.user_id)
    }

    /// Vend an access token for `user_id`, refreshing proactively when the
    /// stored token expires within the skew window. `Ok(None)` means the
    /// caller has no usable credentials.
    pub async fn access_token(&self, user_id: &str) -> Result<Option<String>> {
        let Some(record) = self.store.get(user_id).await? else {
            return Ok(None);
        };
        let Some(expires_at) = record.expires_at else {
            return Ok(Some(record.access_token));
        };
        if Utc::now() < expires_at - chrono::Duration::seconds(EXPIRY_SKEW_SECONDS) {
            return Ok(Some(record.access_token));
        }
        if record.refresh_token.is_none() {
            debug!(user_id, "token expired and no refresh token is stored");
            return Ok(None);
        }
        let fresh = self.refresh_record(user_id, &record).await?;
        Ok(Some(fresh.access_token))
    }

    async fn refresh_record(&self, user_id: &str, current: &TokenRecord) -> Result<TokenRecord> {
        let oauth = &self.config.oauth;
        let refresh_token = current
            .refresh_token
            .as_deref()
            .context("no refresh token available")?;
        let mut fresh = self
            .post_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &oauth.client_id),
                ("client_secret", oauth.client_secret.expose_secret()),
            ])
            .await
            .context("token refresh failed")?;
        // Providers may omit the refresh token on rotation; keep the old one.
        if fresh.refresh_token.is_none() {
            fresh.refresh_token = current.refresh_token.clone();
        }
        self.store.put(user_id, &fresh).await?;
        info!(user_id, "refreshed OAuth credentials");
        Ok(fresh)
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<TokenRecord> {
        let response = self
            .client
            .post(&self.config.oauth.token_url)
            .form(form)
            .send()
            .await
            .context("token endpoint unreachable")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("token endpoint returned {status}: {body}");
        }
        let parsed: TokenEndpointResponse = response
            .json()
            .await
            .context("token endpoint returned invalid JSON")?;
        Ok(record_from_response(parsed, Utc::now()))
    }

    /// Report the stored credential state for `user_id`.
    pub async fn status(&self, user_id: &str) -> Result<AuthStatus> {
        Ok(match self.store.get(user_id).await? {
            Some(record) => AuthStatus {
                authenticated: true,
                scopes: record.scope,
                expires_at: record.expires_at.map(|t| t.to_rfc3339()),
            },
            None => AuthStatus {
                authenticated: false,
                scopes: Vec::new(),
                expires_at: None,
            },
        })
    }

    /// Drop the stored credentials for `user_id`.
    pub async fn logout(&self, user_id: &str) -> Result<bool> {
        let removed = self.store.delete(user_id).await?;
        if removed {
            info!(user_id, "logged out");
        }
        Ok(removed)
    }

    /// Remove pending authorization states past the ten-minute horizon.
    pub fn sweep_expired_states(&self) -> usize {
        let now = now_ms();
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, state| now.saturating_sub(state.created_at_ms) <= STATE_TTL_MS);
        let removed = before - pending.len();
        if removed > 0 {
            debug!(removed, "swept expired authorization states");
        }
        removed
    }

    /// Periodic sweeper for the pending-state ledger.
    pub fn spawn_state_gc(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.sweep_expired_states();
            }
        })
    }

    #[cfg(test)]
    fn backdate_state(&self, state: &str, age_ms: u64) {
        if let Some(entry) = self.pending.lock().get_mut(state) {
            entry.created_at_ms = now_ms().saturating_sub(age_ms);
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

fn record_from_response(parsed: TokenEndpointResponse, now: DateTime<Utc>) -> TokenRecord {
    TokenRecord {
        access_token: parsed.access_token,
        token_type: parsed.token_type.unwrap_or_else(|| "Bearer".to_string()),
        refresh_token: parsed.refresh_token,
        scope: parsed
            .scope
            .map(|raw| {
                raw.split([' ', ','])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        expires_at: parsed
            .expires_in
            .map(|seconds| now + chrono::Duration::seconds(seconds)),
        obtained_at: now,
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
