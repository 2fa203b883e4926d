//! Core types for Scriptwatch

use crate::error::{Error, Result};
use crate::normalize::{normalize_url, validate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Smallest accepted poll interval.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Normalized target URL - the identity of a watch target. Cheaply cloneable.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TargetUrl(Arc<str>);

impl TargetUrl {
    /// Normalize without validation. Used for keys read back from storage
    /// or query strings, where lookup simply misses on garbage.
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Arc::from(normalize_url(s.as_ref())))
    }

    /// Normalize and require an absolute http(s) URL with a host.
    pub fn parse(s: impl AsRef<str>) -> Result<Self> {
        let key = Self::new(s);
        validate(key.as_str()).map_err(Error::InvalidUrl)?;
        Ok(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A target whose path names a `.js` file is fetched directly instead of
    /// being scanned for script tags.
    pub fn is_direct_script(&self) -> bool {
        match url::Url::parse(&self.0) {
            Ok(u) => u.path().to_ascii_lowercase().ends_with(".js"),
            Err(_) => self.0.to_ascii_lowercase().ends_with(".js"),
        }
    }
}

impl std::fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TargetUrl {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for TargetUrl {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<TargetUrl> for String {
    fn from(u: TargetUrl) -> Self {
        u.0.to_string()
    }
}

impl Serialize for TargetUrl {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TargetUrl {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::new(s))
    }
}

/// Persisted watch status
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    #[default]
    Active,
    Disabled,
}

impl TargetStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TargetStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Active => "active",
            TargetStatus::Disabled => "disabled",
        }
    }
}

impl std::str::FromStr for TargetStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" | "enabled" => Ok(TargetStatus::Active),
            "disabled" => Ok(TargetStatus::Disabled),
            other => Err(Error::invalid_config(format!("unknown status '{}'", other))),
        }
    }
}

/// Notification channel type
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Telegram,
    #[default]
    #[serde(other)]
    None,
}

/// Per-target notification settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationConfig {
    #[serde(rename = "type", default)]
    pub kind: ChannelKind,
    /// Bot token
    #[serde(default)]
    pub token: String,
    /// Chat ID or @channel name
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub enabled: bool,
}

impl NotificationConfig {
    pub fn telegram(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            kind: ChannelKind::Telegram,
            token: token.into(),
            chat_id: chat_id.into(),
            enabled: true,
        }
    }

    /// Whether a message sent to this channel would actually go anywhere.
    pub fn is_deliverable(&self) -> bool {
        self.enabled && self.kind == ChannelKind::Telegram
    }
}

/// Desired configuration for one watch target, as persisted in the config file.
///
/// `interval` is whole seconds on the wire; `failure_threshold` keeps its
/// historical JSON name `timeout`. A threshold of 0 never auto-disables.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    pub url: TargetUrl,
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    #[serde(default)]
    pub status: TargetStatus,
    #[serde(rename = "timeout", default)]
    pub failure_threshold: u32,
    #[serde(default)]
    pub notification: NotificationConfig,
}

impl TargetConfig {
    pub fn new(url: impl AsRef<str>, interval: Duration) -> Self {
        Self {
            url: TargetUrl::new(url),
            interval,
            status: TargetStatus::Active,
            failure_threshold: 0,
            notification: NotificationConfig::default(),
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_status(mut self, status: TargetStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_notification(mut self, notification: NotificationConfig) -> Self {
        self.notification = notification;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Check the invariants an administrative caller must satisfy.
    pub fn validate(&self) -> Result<()> {
        TargetUrl::parse(self.url.as_str())?;
        if self.interval < MIN_INTERVAL {
            return Err(Error::invalid_config(format!(
                "interval must be at least {}s, got {}s",
                MIN_INTERVAL.as_secs(),
                self.interval.as_secs()
            )));
        }
        Ok(())
    }

    /// The parameters a running watch task is built from. Two configs that
    /// differ only in status share the same watch parameters.
    pub fn watch_params(&self) -> WatchParams {
        WatchParams {
            url: self.url.clone(),
            interval: self.interval,
            failure_threshold: self.failure_threshold,
            notification: self.notification.clone(),
        }
    }
}

/// Immutable parameters of one running watch task. A change to any of these
/// replaces the task rather than mutating it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchParams {
    pub url: TargetUrl,
    pub interval: Duration,
    pub failure_threshold: u32,
    pub notification: NotificationConfig,
}

/// Human-facing label for a poll interval.
pub fn interval_label(interval: Duration) -> String {
    match interval.as_secs() {
        60 => "Every Minute".to_string(),
        3600 => "Hourly".to_string(),
        86400 => "Daily".to_string(),
        604800 => "Weekly".to_string(),
        secs => format!("{} seconds", secs),
    }
}

pub mod duration_secs {
    //! Serialize a `Duration` as whole seconds.

    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
