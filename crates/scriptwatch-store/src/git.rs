//! Git-backed version store
//!
//! One repository per target under the snapshot root, holding a single
//! `combined.js` in presentable form. Every changed snapshot is one commit.

use crate::store::{CommitOutcome, Revision, RevisionId, RevisionPage, StoreError, StoreResult, VersionStore};
use chrono::{DateTime, Local, Utc};
use scriptwatch_core::{Snapshot, TargetUrl};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::{debug, info};

pub const COMBINED_FILE: &str = "combined.js";
pub const DEFAULT_SNAPSHOT_ROOT: &str = "js_snapshots";

const AUTHOR_NAME: &str = "scriptwatch";
const AUTHOR_EMAIL: &str = "scriptwatch@localhost";

const DIR_PREFIX_MAX: usize = 80;
const DIR_HASH_LEN: usize = 12;

/// Directory name for a target's repository: a readable prefix (scheme
/// dropped, anything outside `[A-Za-z0-9._-]` replaced with `_`, capped at
/// `DIR_PREFIX_MAX` chars) plus the first `DIR_HASH_LEN` hex digits of the
/// SHA-256 of the full URL. The prefix alone is lossy; the hash keeps
/// distinct URLs in distinct repositories.
pub fn target_dir_name(target: &TargetUrl) -> String {
    let s = target.as_str();
    let rest = s.split_once("://").map(|(_, r)| r).unwrap_or(s);
    let prefix: String = rest
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .take(DIR_PREFIX_MAX)
        .collect();

    let digest = Sha256::digest(s.as_bytes());
    let hash: String = digest
        .iter()
        .take(DIR_HASH_LEN / 2)
        .map(|b| format!("{:02x}", b))
        .collect();
    format!("{}-{}", prefix, hash)
}

pub struct GitStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl GitStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repo_dir(&self, target: &TargetUrl) -> PathBuf {
        self.root.join(target_dir_name(target))
    }

    /// Check that a usable `git` binary is on PATH.
    pub async fn git_version() -> StoreResult<String> {
        let out = Command::new("git").arg("--version").output().await?;
        if !out.status.success() {
            return Err(StoreError::Git {
                command: "--version".into(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    fn lock_for(&self, dir: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(dir.to_string()).or_default().clone()
    }

    async fn git(repo: &Path, args: &[&str]) -> StoreResult<String> {
        let out = Command::new("git")
            .arg("-C")
            .arg(repo)
            .arg("-c")
            .arg(format!("user.name={}", AUTHOR_NAME))
            .arg("-c")
            .arg(format!("user.email={}", AUTHOR_EMAIL))
            .args(["-c", "commit.gpgsign=false", "-c", "init.defaultBranch=main"])
            .args(args)
            .output()
            .await?;
        if !out.status.success() {
            return Err(StoreError::Git {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    async fn has_head(repo: &Path) -> bool {
        Self::git(repo, &["rev-parse", "--verify", "-q", "HEAD"]).await.is_ok()
    }

    async fn ensure_repo(dir: &Path) -> StoreResult<()> {
        if dir.join(".git").exists() {
            return Ok(());
        }
        tokio::fs::create_dir_all(dir).await?;
        Self::git(dir, &["init", "-q"]).await?;
        debug!("Initialized history repo at {}", dir.display());
        Ok(())
    }

    async fn write_atomic(path: &Path, content: &[u8]) -> StoreResult<()> {
        let tmp = path.with_extension("js.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl VersionStore for GitStore {
    async fn commit_if_changed(
        &self,
        target: &TargetUrl,
        snapshot: &Snapshot,
    ) -> StoreResult<CommitOutcome> {
        let name = target_dir_name(target);
        let lock = self.lock_for(&name);
        let _guard = lock.lock().await;
        let dir = self.root.join(&name);

        Self::ensure_repo(&dir).await?;
        let file = dir.join(COMBINED_FILE);
        let unchanged = match tokio::fs::read(&file).await {
            Ok(existing) => snapshot.matches_presentable(&existing),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        // an identical file may still be uncommitted after an earlier failure
        let now = Local::now();
        if !unchanged {
            Self::write_atomic(&file, &snapshot.presentable(now)).await?;
        }
        Self::git(&dir, &["add", COMBINED_FILE]).await?;
        if Self::git(&dir, &["status", "--porcelain"]).await?.trim().is_empty() {
            return Ok(CommitOutcome::NoChange);
        }
        let message = format!("JS snapshot {}", now.format("%Y-%m-%d %H:%M:%S"));
        Self::git(&dir, &["commit", "-q", "-m", &message]).await?;
        let id = RevisionId::new(Self::git(&dir, &["rev-parse", "HEAD"]).await?);
        info!("Committed {} for {}", id.short(), target);
        Ok(CommitOutcome::Committed(id))
    }

    async fn list_revisions(
        &self,
        target: &TargetUrl,
        offset: usize,
        limit: usize,
    ) -> StoreResult<RevisionPage> {
        let dir = self.repo_dir(target);
        if !dir.join(".git").exists() || !Self::has_head(&dir).await {
            return Ok(RevisionPage::default());
        }

        let log = Self::git(&dir, &["log", "--format=%H %aI"]).await?;
        let mut all = Vec::new();
        for line in log.lines().filter(|l| !l.trim().is_empty()) {
            let (hash, date) = line
                .split_once(' ')
                .ok_or_else(|| StoreError::Corrupt(format!("unexpected log line: {}", line)))?;
            let date = DateTime::parse_from_rfc3339(date.trim())
                .map_err(|e| StoreError::Corrupt(format!("bad commit date '{}': {}", date, e)))?
                .with_timezone(&Utc);
            all.push(Revision { id: RevisionId::new(hash), date });
        }
        // git log order: newest commit first, whatever the clocks said
        Ok(RevisionPage::paginate(all, offset, limit))
    }

    async fn diff_revision(&self, target: &TargetUrl, revision: &RevisionId) -> StoreResult<String> {
        if !revision.is_hex() || revision.as_str().len() < 4 || revision.as_str().len() > 64 {
            return Err(StoreError::InvalidRevision(revision.to_string()));
        }
        let dir = self.repo_dir(target);
        if !dir.join(".git").exists() {
            return Err(StoreError::RevisionNotFound(revision.to_string()));
        }

        let revspec = format!("{}^{{commit}}", revision);
        let parents = Self::git(&dir, &["rev-list", "--parents", "-n", "1", &revspec])
            .await
            .map_err(|_| StoreError::RevisionNotFound(revision.to_string()))?;
        let ids: Vec<&str> = parents.split_whitespace().collect();
        match ids.as_slice() {
            [] => Err(StoreError::RevisionNotFound(revision.to_string())),
            [_] => Ok(String::new()),
            [commit, parent, ..] => Self::git(&dir, &["diff", *parent, *commit]).await,
        }
    }

    async fn purge(&self, target: &TargetUrl) -> StoreResult<()> {
        let name = target_dir_name(target);
        let lock = self.lock_for(&name);
        let _guard = lock.lock().await;
        let dir = self.root.join(&name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Removed history for {}", target);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
