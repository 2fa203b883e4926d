//! In-memory version store for tests and `--ephemeral` runs. Not durable.

use crate::diff::line_diff;
use crate::git::COMBINED_FILE;
use crate::store::{CommitOutcome, Revision, RevisionId, RevisionPage, StoreError, StoreResult, VersionStore};
use chrono::{Local, Utc};
use scriptwatch_core::{Snapshot, TargetUrl};
use std::collections::HashMap;
use std::sync::Mutex;

struct Stored {
    revision: Revision,
    content: Vec<u8>,
}

#[derive(Default)]
pub struct MemoryStore {
    history: Mutex<HashMap<TargetUrl, Vec<Stored>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored revisions for a target.
    pub fn revision_count(&self, target: &TargetUrl) -> usize {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.get(target).map(Vec::len).unwrap_or(0)
    }

    /// Presentable content of the latest revision.
    pub fn latest(&self, target: &TargetUrl) -> Option<Vec<u8>> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.get(target)?.last().map(|s| s.content.clone())
    }
}

#[async_trait::async_trait]
impl VersionStore for MemoryStore {
    async fn commit_if_changed(
        &self,
        target: &TargetUrl,
        snapshot: &Snapshot,
    ) -> StoreResult<CommitOutcome> {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let revisions = history.entry(target.clone()).or_default();
        if let Some(last) = revisions.last() {
            if snapshot.matches_presentable(&last.content) {
                return Ok(CommitOutcome::NoChange);
            }
        }
        let id = RevisionId::new(uuid::Uuid::new_v4().simple().to_string());
        revisions.push(Stored {
            revision: Revision {
                id: id.clone(),
                date: Utc::now(),
            },
            content: snapshot.presentable(Local::now()),
        });
        Ok(CommitOutcome::Committed(id))
    }

    async fn list_revisions(
        &self,
        target: &TargetUrl,
        offset: usize,
        limit: usize,
    ) -> StoreResult<RevisionPage> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let all = history
            .get(target)
            .map(|r| r.iter().rev().map(|s| s.revision.clone()).collect())
            .unwrap_or_default();
        Ok(RevisionPage::paginate(all, offset, limit))
    }

    async fn diff_revision(&self, target: &TargetUrl, revision: &RevisionId) -> StoreResult<String> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let revisions = history
            .get(target)
            .ok_or_else(|| StoreError::RevisionNotFound(revision.to_string()))?;
        let idx = revisions
            .iter()
            .position(|s| &s.revision.id == revision)
            .ok_or_else(|| StoreError::RevisionNotFound(revision.to_string()))?;
        if idx == 0 {
            return Ok(String::new());
        }
        let old = String::from_utf8_lossy(&revisions[idx - 1].content);
        let new = String::from_utf8_lossy(&revisions[idx].content);
        Ok(line_diff(COMBINED_FILE, &old, &new))
    }

    async fn purge(&self, target: &TargetUrl) -> StoreResult<()> {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.remove(target);
        Ok(())
    }
}
