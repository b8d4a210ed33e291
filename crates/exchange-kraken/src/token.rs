//! WebSocket authentication token cache.
//!
//! Private-channel subscriptions need a short-lived token issued over signed
//! REST. The token is reused until 5 s before its declared expiry (default
//! window 15 minutes); the reconnect path asks for a fresh one outright.

use crate::error::Result;
use crate::rest::KrakenRestClient;
use chrono::Utc;
use tokio::sync::Mutex;

const EXPIRY_GUARD_MS: i64 = 5_000;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at_ms: i64,
}

#[derive(Debug, Default)]
pub struct TokenCache {
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached token, fetching a new one when absent or within
    /// the expiry guard. Holding the cache lock across the fetch makes
    /// concurrent callers share one in-flight request.
    ///
    /// # Errors
    ///
    /// Fails when the token endpoint fails.
    pub async fn token(&self, rest: &KrakenRestClient) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now().timestamp_millis();
        if let Some(entry) = cached.as_ref() {
            if now < entry.expires_at_ms - EXPIRY_GUARD_MS {
                return Ok(entry.token.clone());
            }
        }
        let entry = Self::fetch(rest).await?;
        let token = entry.token.clone();
        *cached = Some(entry);
        Ok(token)
    }

    /// Discards any cached token and fetches a new one.
    ///
    /// # Errors
    ///
    /// Fails when the token endpoint fails.
    pub async fn fresh(&self, rest: &KrakenRestClient) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let entry = Self::fetch(rest).await?;
        let token = entry.token.clone();
        *cached = Some(entry);
        Ok(token)
    }

    async fn fetch(rest: &KrakenRestClient) -> Result<CachedToken> {
        let (token, expires_secs) = rest.websockets_token().await?;
        tracing::debug!(expires_secs, "fetched WebSocket token");
        Ok(CachedToken {
            token,
            expires_at_ms: Utc::now().timestamp_millis() + expires_secs * 1000,
        })
    }
}
