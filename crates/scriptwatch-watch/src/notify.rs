//! Notification dispatch
//!
//! Delivery is best-effort: callers log a `NotifyError` and move on.

use chrono::{DateTime, Local};
use reqwest::Client;
use scriptwatch_core::{interval_label, ChannelKind, NotificationConfig, TargetUrl, WatchParams};
use scriptwatch_store::RevisionId;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("unsupported channel type: {0}")]
    Unsupported(String),

    #[error("channel rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Deliver a message to an external channel.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &NotificationConfig, message: &str) -> NotifyResult<()>;
}

/// Drops every message. Used when no channel delivery is wanted.
pub struct NullNotifier;

#[async_trait::async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _channel: &NotificationConfig, _message: &str) -> NotifyResult<()> {
        Ok(())
    }
}

pub struct TelegramNotifier {
    client: Client,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new() -> NotifyResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self::with_client(client, TELEGRAM_API_BASE))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, channel: &NotificationConfig, message: &str) -> NotifyResult<()> {
        if channel.kind != ChannelKind::Telegram {
            return Err(NotifyError::Unsupported(format!("{:?}", channel.kind)));
        }

        let url = format!("{}/bot{}/sendMessage", self.base_url, channel.token);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": channel.chat_id,
                "text": message,
                "parse_mode": "HTML",
            }))
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!("Telegram message delivered to {}", channel.chat_id);
        Ok(())
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn change_detected_message(url: &TargetUrl, at: DateTime<Local>, revision: &RevisionId) -> String {
    format!(
        "<b>🔔 Changes Detected!</b>\n\nURL: {}\nTimestamp: {}\nCommit: {}",
        escape_html(url.as_str()),
        at.format("%Y-%m-%d %H:%M:%S"),
        revision.short(),
    )
}

pub fn monitoring_started_message(params: &WatchParams) -> String {
    let threshold = match params.failure_threshold {
        0 => "unlimited".to_string(),
        n => n.to_string(),
    };
    format!(
        "<b>🔍 New URL Monitoring Started</b>\n\nURL: {}\nInterval: {}\nFailure threshold: {}",
        escape_html(params.url.as_str()),
        interval_label(params.interval),
        threshold,
    )
}

pub fn auto_disabled_message(url: &TargetUrl, failures: u32) -> String {
    format!(
        "<b>⛔ Monitoring Disabled</b>\n\nURL: {}\nConsecutive failures: {}",
        escape_html(url.as_str()),
        failures,
    )
}
