use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;

/// Outbound push delivery, injected into the app state so handlers never talk
/// to the webhook endpoint directly and tests can substitute a recorder.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Single best-effort attempt. `true` means the webhook answered 200;
    /// every other status and every transport error is a failed delivery.
    async fn send(&self, token: &str, url: &str, title: &str, body: &str) -> bool;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationPayload<'a> {
    notification_id: String,
    title: &'a str,
    body: &'a str,
    target_url: &'a str,
    tokens: [&'a str; 1],
}

pub struct WebhookNotifier {
    app_url: String,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn from_config(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.notify_timeout_ms))
            .build()
            .unwrap_or_else(|error| {
                tracing::warn!(
                    target: "coincast.notifications",
                    error = %error,
                    "failed to build notification http client with timeout; using defaults",
                );
                reqwest::Client::new()
            });

        Self {
            app_url: config.app_url.clone(),
            http,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, token: &str, url: &str, title: &str, body: &str) -> bool {
        let payload = NotificationPayload {
            notification_id: Uuid::new_v4().to_string(),
            title,
            body,
            target_url: &self.app_url,
            tokens: [token],
        };

        let response = match self.http.post(url).json(&payload).send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(
                    target: "coincast.notifications",
                    url,
                    error = %error,
                    "notification request failed",
                );
                return false;
            }
        };

        if response.status() == reqwest::StatusCode::OK {
            true
        } else {
            tracing::warn!(
                target: "coincast.notifications",
                url,
                status = %response.status(),
                "notification rejected by webhook",
            );
            false
        }
    }
}

/// Captures every send for assertions; delivery outcome is fixed up front.
#[derive(Clone)]
pub struct RecordingNotifier {
    delivered: bool,
    sent: Arc<Mutex<Vec<RecordedNotification>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedNotification {
    pub token: String,
    pub url: String,
    pub title: String,
    pub body: String,
}

impl RecordingNotifier {
    pub fn delivering() -> Self {
        Self {
            delivered: true,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing() -> Self {
        Self {
            delivered: false,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn sent(&self) -> Vec<RecordedNotification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, token: &str, url: &str, title: &str, body: &str) -> bool {
        self.sent.lock().await.push(RecordedNotification {
            token: token.to_string(),
            url: url.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        });
        self.delivered
    }
}
