//! Version store abstraction

use chrono::{DateTime, Utc};
use scriptwatch_core::{Snapshot, TargetUrl};
use serde::Serialize;
use std::sync::Arc;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("invalid revision id: {0}")]
    InvalidRevision(String),

    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    #[error("corrupt history: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Errors caused by the caller's input rather than the store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::InvalidRevision(_) | Self::RevisionNotFound(_))
    }
}

/// Opaque identifier of one stored revision.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RevisionId(Arc<str>);

impl RevisionId {
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Arc::from(s.as_ref().trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logs and messages.
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }

    pub fn is_hex(&self) -> bool {
        !self.0.is_empty() && self.0.chars().all(|c| c.is_ascii_hexdigit())
    }
}

impl std::fmt::Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RevisionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Revision {
    pub id: RevisionId,
    pub date: DateTime<Utc>,
}

/// One page of history, newest first, plus the total count.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RevisionPage {
    pub revisions: Vec<Revision>,
    pub total: usize,
}

impl RevisionPage {
    /// Slice a newest-first list into a page.
    pub fn paginate(all: Vec<Revision>, offset: usize, limit: usize) -> Self {
        let total = all.len();
        let revisions = all.into_iter().skip(offset).take(limit).collect();
        Self { revisions, total }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Latest stored revision already holds this content.
    NoChange,
    Committed(RevisionId),
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// Durable per-target history of snapshots.
///
/// Implementations compare against the comparable form of the latest stored
/// revision, so a commit of identical content is `NoChange` and never an error.
#[async_trait::async_trait]
pub trait VersionStore: Send + Sync {
    async fn commit_if_changed(
        &self,
        target: &TargetUrl,
        snapshot: &Snapshot,
    ) -> StoreResult<CommitOutcome>;

    /// Revisions newest first. A target with no history yields an empty page.
    async fn list_revisions(
        &self,
        target: &TargetUrl,
        offset: usize,
        limit: usize,
    ) -> StoreResult<RevisionPage>;

    /// Patch from the revision's parent to the revision. Empty for the first one.
    async fn diff_revision(&self, target: &TargetUrl, revision: &RevisionId) -> StoreResult<String>;

    /// Delete all history for a target. Missing history is not an error.
    async fn purge(&self, target: &TargetUrl) -> StoreResult<()>;
}
