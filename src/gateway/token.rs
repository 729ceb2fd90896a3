use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::ServiceError;

/// A bearer token with the expiry the gateway assigned it.
#[derive(Debug, Clone)]
pub struct FreshToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Process-wide cache for the gateway bearer token.
///
/// One refresh at a time: the mutex is held across the refresh call, so
/// concurrent callers queue behind the first and then observe the token it
/// stored. Tokens are refreshed `refresh_margin` ahead of expiry so a token
/// that is valid when handed out does not expire mid-request.
pub struct GatewayTokenCache {
    state: Mutex<Option<FreshToken>>,
    refresh_margin: ChronoDuration,
}

impl GatewayTokenCache {
    pub fn new(refresh_margin: Duration) -> Self {
        Self {
            state: Mutex::new(None),
            refresh_margin: ChronoDuration::from_std(refresh_margin)
                .unwrap_or_else(|_| ChronoDuration::seconds(60)),
        }
    }

    /// Returns the cached token, or runs `refresh` to obtain one.
    ///
    /// `refresh` is only invoked while the internal lock is held, so under
    /// concurrent load exactly one caller performs the network request.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FreshToken, ServiceError>>,
    {
        let mut guard = self.state.lock().await;

        if let Some(cached) = guard.as_ref() {
            if !self.needs_refresh(cached) {
                return Ok(cached.token.clone());
            }
            debug!(expires_at = %cached.expires_at, "Cached gateway token near expiry, refreshing");
        }

        let fresh = refresh().await?;
        let token = fresh.token.clone();
        *guard = Some(fresh);
        Ok(token)
    }

    /// Drops the cached token so the next caller fetches a fresh one. Called
    /// when the gateway rejects a request with 401 despite an unexpired token.
    pub async fn invalidate(&self) {
        let mut guard = self.state.lock().await;
        if guard.take().is_some() {
            debug!("Gateway token cache invalidated");
        }
    }

    fn needs_refresh(&self, cached: &FreshToken) -> bool {
        Utc::now() + self.refresh_margin >= cached.expires_at
    }
}
