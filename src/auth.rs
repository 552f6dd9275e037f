//! Bearer token authority.
//!
//! Owns the cached anonymous-device token and decides when to refresh it.
//! Concurrent callers never trigger parallel refreshes: the first caller
//! spawns one refresh task and every caller awaits the same shared handle
//! until the in-flight slot is cleared.

use crate::config::RestConfig;
use crate::endpoint::Endpoint;
use crate::error::{RestError, RestResult};
use crate::transport::HttpTransport;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// An opaque bearer credential with an optional expiry deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    hash: String,
    expires_at: Option<Instant>,
}

impl AuthToken {
    /// Create a token valid for `ttl` from now, or indefinitely when `None`
    pub fn new(hash: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            hash: hash.into(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    /// The credential value placed in the bearer header
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Whether the token is still usable
    pub fn is_valid(&self) -> bool {
        self.expires_at.map_or(true, |deadline| Instant::now() < deadline)
    }
}

/// Wire shape of the authentication response.
#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl From<AuthResponse> for AuthToken {
    fn from(response: AuthResponse) -> Self {
        AuthToken::new(
            response.token,
            response.expires_in.map(Duration::from_secs),
        )
    }
}

type RefreshFuture = Shared<BoxFuture<'static, RestResult<AuthToken>>>;

#[derive(Default)]
struct AuthState {
    token: Option<AuthToken>,
    inflight: Option<RefreshFuture>,
}

/// Issues, caches, and refreshes bearer tokens.
pub struct TokenAuthority {
    transport: Arc<dyn HttpTransport>,
    config: RestConfig,
    state: Arc<Mutex<AuthState>>,
}

impl TokenAuthority {
    pub fn new(transport: Arc<dyn HttpTransport>, config: RestConfig) -> Self {
        Self {
            transport,
            config,
            state: Arc::new(Mutex::new(AuthState::default())),
        }
    }

    /// Return a usable token, refreshing when required.
    ///
    /// A cached valid token is returned without network access unless
    /// `force_refresh` is set. When a refresh is already in flight, every
    /// caller receives its result, success or failure alike.
    pub async fn valid_token(&self, device_id: &str, force_refresh: bool) -> RestResult<AuthToken> {
        let refresh = {
            let mut state = self.state.lock();

            if let Some(inflight) = state.inflight.clone() {
                debug!("joining in-flight token refresh");
                inflight
            } else {
                if !force_refresh {
                    if let Some(token) = &state.token {
                        if token.is_valid() {
                            return Ok(token.clone());
                        }
                    }
                }

                let refresh = self.spawn_refresh(device_id);
                state.inflight = Some(refresh.clone());
                refresh
            }
        };

        refresh.await
    }

    /// Drop the cached token without issuing a refresh.
    pub fn clear(&self) {
        self.state.lock().token = None;
    }

    fn spawn_refresh(&self, device_id: &str) -> RefreshFuture {
        let transport = self.transport.clone();
        let config = self.config.clone();
        let state = self.state.clone();
        let device_id = device_id.to_string();

        // Runs on its own task so abandoned callers cannot strand the
        // in-flight slot; the slot is cleared exactly once, on completion.
        let handle = tokio::spawn(async move {
            let result = refresh(transport.as_ref(), &config, &device_id).await;

            let mut state = state.lock();
            match &result {
                Ok(token) => {
                    info!("token refreshed");
                    state.token = Some(token.clone());
                }
                Err(error) => {
                    warn!("token refresh failed: {error}");
                }
            }
            state.inflight = None;

            result
        });

        async move { handle.await.unwrap_or(Err(RestError::Unknown)) }
            .boxed()
            .shared()
    }
}

async fn refresh(
    transport: &dyn HttpTransport,
    config: &RestConfig,
    device_id: &str,
) -> RestResult<AuthToken> {
    let mut endpoint = Endpoint::post(&config.base_url, "/api/v1/auth").json_body(
        &serde_json::json!({
            "device_uuid": device_id,
            "device_type": config.device_type,
            "type": "anonymous",
        }),
    )?;
    if let Some(timeout) = config.timeout {
        endpoint = endpoint.timeout(timeout);
    }

    let body = transport.send(endpoint.prepare()?).await?;
    let response: AuthResponse =
        serde_json::from_slice(&body).map_err(|_| RestError::InvalidResponse)?;
    Ok(response.into())
}
