//! Source collectors: fetch raw JSON payloads with an access grant.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use viralwatch_access::{ClassifyOutcome, CredentialKind, Grant, Outcome};
use viralwatch_core::SourcePlatform;

/// Lowercase markers of an anti-bot or block page.
const BLOCK_INDICATORS: &[&str] = &[
    "captcha",
    "robot",
    "automated",
    "blocked",
    "access denied",
    "rate limit",
    "too many requests",
];

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("source rate limited the request (HTTP {status})")]
    RateLimited { status: u16 },

    #[error("request was blocked: {reason}")]
    Blocked { reason: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("source returned HTTP {status}")]
    Http { status: u16 },

    #[error("response body is not usable JSON: {0}")]
    Decode(String),

    #[error("HTTP client setup failed: {0}")]
    Client(#[source] reqwest::Error),
}

impl ClassifyOutcome for CollectorError {
    fn outcome(&self) -> Outcome {
        match self {
            CollectorError::RateLimited { .. } => Outcome::RateLimited,
            CollectorError::Blocked { .. } => Outcome::Blocked,
            CollectorError::Network(_) => Outcome::NetworkError,
            CollectorError::Http { .. } | CollectorError::Decode(_) | CollectorError::Client(_) => {
                Outcome::Success
            }
        }
    }
}

/// Fetches raw payloads for one source using the credential in a grant.
pub trait Collector: Send + Sync {
    fn platform(&self) -> SourcePlatform;

    /// Budget units charged per fetch.
    fn request_cost(&self) -> u64;

    fn fetch(
        &self,
        grant: &Grant,
    ) -> impl Future<Output = Result<Vec<Value>, CollectorError>> + Send;
}

/// GETs a JSON endpoint through the grant's proxy, or with the grant's API
/// key as the `key` query parameter.
///
/// A JSON array yields one payload per element; an object with an `items`
/// array yields its items; any other object is a single payload.
#[derive(Debug, Clone)]
pub struct HttpJsonCollector {
    platform: SourcePlatform,
    endpoint: String,
    request_cost: u64,
    timeout: Duration,
    user_agent: String,
    direct: reqwest::Client,
}

impl HttpJsonCollector {
    /// # Errors
    ///
    /// Returns [`CollectorError::Client`] if the HTTP client cannot be built.
    pub fn new(
        platform: SourcePlatform,
        endpoint: impl Into<String>,
        request_cost: u64,
        timeout_secs: u64,
        user_agent: impl Into<String>,
    ) -> Result<Self, CollectorError> {
        let timeout = Duration::from_secs(timeout_secs);
        let user_agent = user_agent.into();
        let direct = build_client(timeout, &user_agent, None)?;
        Ok(Self {
            platform,
            endpoint: endpoint.into(),
            request_cost: request_cost.max(1),
            timeout,
            user_agent,
            direct,
        })
    }

    fn request(&self, grant: &Grant) -> Result<reqwest::RequestBuilder, CollectorError> {
        let credential = &grant.credential;
        let request = match credential.kind {
            CredentialKind::Proxy => {
                let client =
                    build_client(self.timeout, &self.user_agent, Some(&credential.identifier))?;
                client.get(&self.endpoint)
            }
            CredentialKind::ApiKey => self
                .direct
                .get(&self.endpoint)
                .query(&[("key", credential.identifier.as_str())]),
            CredentialKind::Direct => self.direct.get(&self.endpoint),
        };
        Ok(request)
    }
}

fn build_client(
    timeout: Duration,
    user_agent: &str,
    proxy: Option<&str>,
) -> Result<reqwest::Client, CollectorError> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent);
    if let Some(url) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(url).map_err(CollectorError::Client)?);
    }
    builder.build().map_err(CollectorError::Client)
}

fn block_indicator(body: &str) -> Option<&'static str> {
    let lowered = body.to_lowercase();
    BLOCK_INDICATORS
        .iter()
        .copied()
        .find(|marker| lowered.contains(marker))
}

/// Turn a response into payloads or a classified failure.
pub(crate) fn classify_response(
    status: StatusCode,
    body: &str,
) -> Result<Vec<Value>, CollectorError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(CollectorError::RateLimited {
            status: status.as_u16(),
        });
    }
    if status == StatusCode::FORBIDDEN || status == StatusCode::SERVICE_UNAVAILABLE {
        if let Some(marker) = block_indicator(body) {
            return Err(CollectorError::Blocked {
                reason: format!("HTTP {} with '{marker}' marker", status.as_u16()),
            });
        }
    }
    if !status.is_success() {
        return Err(CollectorError::Http {
            status: status.as_u16(),
        });
    }

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(Value::Object(mut obj)) => match obj.remove("items") {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => {
                obj.insert("items".to_string(), other);
                Ok(vec![Value::Object(obj)])
            }
            None => Ok(vec![Value::Object(obj)]),
        },
        Ok(other) => Err(CollectorError::Decode(format!(
            "expected an array or object, got {other}"
        ))),
        Err(e) => match block_indicator(body) {
            Some(marker) => Err(CollectorError::Blocked {
                reason: format!("non-JSON page with '{marker}' marker"),
            }),
            None => Err(CollectorError::Decode(e.to_string())),
        },
    }
}

impl Collector for HttpJsonCollector {
    fn platform(&self) -> SourcePlatform {
        self.platform
    }

    fn request_cost(&self) -> u64 {
        self.request_cost
    }

    async fn fetch(&self, grant: &Grant) -> Result<Vec<Value>, CollectorError> {
        let response = self
            .request(grant)?
            .send()
            .await
            .map_err(|e| CollectorError::Network(e.without_url().to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CollectorError::Network(e.without_url().to_string()))?;
        tracing::debug!(
            source = %self.platform,
            credential = %grant.credential.label(),
            status = status.as_u16(),
            bytes = body.len(),
            "collector response"
        );
        classify_response(status, &body)
    }
}

#[cfg(test)]
#[path = "collector_test.rs"]
mod tests;
