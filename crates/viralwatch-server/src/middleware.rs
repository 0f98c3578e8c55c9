use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::ApiError;

/// Newtype wrapping a request ID string, stored as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Who is calling the protected API: `key-<n>` for the n-th configured bearer
/// token, or `anonymous` while auth is disabled. Never carries the token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Caller(pub String);

impl Caller {
    fn anonymous() -> Self {
        Self("anonymous".to_string())
    }
}

/// Bearer tokens accepted by the protected routes.
#[derive(Clone)]
pub struct AuthState {
    api_keys: Arc<Vec<String>>,
    pub enabled: bool,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("api_keys", &format!("[{} redacted]", self.api_keys.len()))
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl AuthState {
    /// Reads `VIRALWATCH_API_KEYS` (comma-separated bearer tokens). Missing
    /// keys disable auth in development and fail startup anywhere else.
    pub fn from_env(is_development: bool) -> anyhow::Result<Self> {
        let raw = std::env::var("VIRALWATCH_API_KEYS").unwrap_or_default();
        Self::from_raw(&raw, is_development)
    }

    pub fn from_raw(raw: &str, is_development: bool) -> anyhow::Result<Self> {
        let mut keys: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        keys.sort();
        keys.dedup();

        match (keys.is_empty(), is_development) {
            (false, _) => Ok(Self {
                api_keys: Arc::new(keys),
                enabled: true,
            }),
            (true, true) => {
                tracing::warn!("VIRALWATCH_API_KEYS not set; bearer auth disabled for development");
                Ok(Self {
                    api_keys: Arc::new(Vec::new()),
                    enabled: false,
                })
            }
            (true, false) => anyhow::bail!(
                "VIRALWATCH_API_KEYS is required outside development; provide comma-separated bearer tokens"
            ),
        }
    }

    /// The caller owning `token`. Every key is compared so timing does not
    /// reveal which one matched.
    fn caller(&self, token: &str) -> Option<Caller> {
        let mut matched = None;
        for (index, key) in self.api_keys.iter().enumerate() {
            if bool::from(key.as_bytes().ct_eq(token.as_bytes())) {
                matched = Some(index);
            }
        }
        matched.map(|index| Caller(format!("key-{index}")))
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    started_at: Instant,
    count: usize,
}

/// Fixed-window request limiter keeping one window per [`Caller`].
#[derive(Debug, Clone)]
pub struct RateLimitState {
    max_requests: usize,
    window: Duration,
    windows: Arc<Mutex<HashMap<Caller, RateLimitWindow>>>,
}

impl RateLimitState {
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count one request from `caller` at `now`. Returns the time left in the
    /// caller's window when the request is over the limit.
    async fn admit(&self, caller: &Caller, now: Instant) -> Result<(), Duration> {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(caller.clone()).or_insert(RateLimitWindow {
            started_at: now,
            count: 0,
        });
        let elapsed = now.saturating_duration_since(window.started_at);
        if elapsed >= self.window {
            *window = RateLimitWindow {
                started_at: now,
                count: 0,
            };
        }
        if window.count >= self.max_requests {
            return Err(self.window.saturating_sub(elapsed));
        }
        window.count += 1;
        Ok(())
    }
}

fn request_id_of(req: &Request) -> String {
    req.extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default()
}

/// Uses the incoming `x-request-id` header or a fresh `UUIDv4`, stores it as
/// a [`RequestId`] extension and echoes it on the response.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;

    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert("x-request-id", val);
    }

    res
}

/// Resolves the [`Caller`] from the bearer token, rejecting unknown tokens
/// while auth is enabled.
pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    let caller = if auth.enabled {
        let token = extract_bearer_token(req.headers().get(header::AUTHORIZATION));
        match token.and_then(|t| auth.caller(t)) {
            Some(caller) => caller,
            None => {
                tracing::warn!(path = %req.uri().path(), "rejected request without valid bearer token");
                return ApiError::new(
                    request_id_of(&req),
                    "unauthorized",
                    "missing or invalid bearer token",
                )
                .into_response();
            }
        }
    } else {
        Caller::anonymous()
    };

    req.extensions_mut().insert(caller);
    next.run(req).await
}

/// Enforces the per-caller request limit. Runs after
/// [`require_bearer_auth`]; requests without a [`Caller`] share the
/// anonymous window.
pub async fn enforce_rate_limit(
    State(rate_limit): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let caller = req
        .extensions()
        .get::<Caller>()
        .cloned()
        .unwrap_or_else(Caller::anonymous);

    if let Err(wait) = rate_limit.admit(&caller, Instant::now()).await {
        tracing::warn!(caller = %caller.0, retry_after_secs = wait.as_secs(), "rate limit exceeded");
        let mut res = ApiError::new(request_id_of(&req), "rate_limited", "rate limit exceeded")
            .into_response();
        // Retry-After is whole seconds, rounded up.
        let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        if let Ok(val) = HeaderValue::from_str(&secs.to_string()) {
            res.headers_mut().insert(header::RETRY_AFTER, val);
        }
        return res;
    }

    next.run(req).await
}

fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|s| !s.trim().is_empty())
}
