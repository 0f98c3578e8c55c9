use std::future::Future;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use viralwatch_core::Alert;

use crate::error::AlertError;

/// Outcome of one delivery channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelResult {
    pub channel: String,
    pub delivered: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DeliveryReport {
    pub channels: Vec<ChannelResult>,
}

impl DeliveryReport {
    #[must_use]
    pub fn delivered_count(&self) -> usize {
        self.channels.iter().filter(|c| c.delivered).count()
    }

    #[must_use]
    pub fn failures(&self) -> impl Iterator<Item = &ChannelResult> {
        self.channels.iter().filter(|c| !c.delivered)
    }
}

/// Hands an alert to its delivery channels.
///
/// Implementations report per-channel failures in the returned report rather
/// than failing the call, and never retry.
pub trait Notifier: Send + Sync {
    fn deliver(&self, alert: &Alert) -> impl Future<Output = DeliveryReport> + Send;
}

/// Writes alerts to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn deliver(&self, alert: &Alert) -> DeliveryReport {
        tracing::info!(
            alert_id = %alert.alert_id,
            kind = %alert.kind,
            severity = %alert.severity,
            subject = %alert.subject,
            payload = %alert.payload,
            "alert"
        );
        DeliveryReport {
            channels: vec![ChannelResult {
                channel: "log".to_string(),
                delivered: true,
                error: None,
            }],
        }
    }
}

const WEBHOOK_CONCURRENCY: usize = 4;

/// POSTs the alert as JSON to every configured URL, one channel per URL.
///
/// Channel names are `webhook#<index>` so URLs carrying tokens stay out of
/// logs and reports.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("urls", &format!("[{} redacted]", self.urls.len()))
            .finish_non_exhaustive()
    }
}

impl WebhookNotifier {
    /// # Errors
    ///
    /// Returns [`AlertError::Http`] when the HTTP client cannot be built.
    pub fn new(urls: Vec<String>, timeout_secs: u64) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client, urls })
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.urls.len()
    }

}

async fn post(client: reqwest::Client, url: String, alert: &Alert) -> Result<(), reqwest::Error> {
    client
        .post(url)
        .json(alert)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

impl Notifier for WebhookNotifier {
    async fn deliver(&self, alert: &Alert) -> DeliveryReport {
        // Delivery must stay `Send`: build the futures before streaming them.
        let posts: Vec<_> = self
            .urls
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, url)| {
                let client = self.client.clone();
                async move {
                    let channel = format!("webhook#{index}");
                    match post(client, url, alert).await {
                        Ok(()) => ChannelResult {
                            channel,
                            delivered: true,
                            error: None,
                        },
                        Err(e) => ChannelResult {
                            channel,
                            delivered: false,
                            error: Some(e.without_url().to_string()),
                        },
                    }
                }
            })
            .collect();
        let channels = stream::iter(posts)
            .buffered(WEBHOOK_CONCURRENCY)
            .collect()
            .await;
        DeliveryReport { channels }
    }
}

/// Delivers through two notifiers and concatenates their reports.
#[derive(Debug, Clone)]
pub struct Fanout<A, B>(pub A, pub B);

impl<A: Notifier, B: Notifier> Notifier for Fanout<A, B> {
    async fn deliver(&self, alert: &Alert) -> DeliveryReport {
        let mut report = self.0.deliver(alert).await;
        report.channels.extend(self.1.deliver(alert).await.channels);
        report
    }
}
