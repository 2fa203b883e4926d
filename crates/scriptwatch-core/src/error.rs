//! Error types for Scriptwatch

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid target config: {0}")]
    InvalidConfig(String),

    #[error("url already being monitored: {0}")]
    TargetExists(String),

    #[error("url not found: {0}")]
    TargetNotFound(String),

    #[error("config load failed: {0}")]
    ConfigLoad(String),

    #[error("config persist failed: {0}")]
    ConfigPersist(String),

    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    #[error("history error: {0}")]
    History(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl(url.into())
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn config_persist(message: impl std::fmt::Display) -> Self {
        Self::ConfigPersist(message.to_string())
    }

    pub fn history(message: impl std::fmt::Display) -> Self {
        Self::History(message.to_string())
    }

    /// True for errors caused by the caller's input rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl(_)
                | Self::InvalidConfig(_)
                | Self::TargetExists(_)
                | Self::TargetNotFound(_)
                | Self::RevisionNotFound(_)
        )
    }
}
