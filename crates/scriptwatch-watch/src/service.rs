//! Administrative surface over config store, registry, and history
//!
//! One async admin lock serializes every read-modify-write of the target
//! list. Config is persisted before the registry is touched, so a failed
//! save leaves running tasks exactly as they were.

use crate::notify::{monitoring_started_message, Notifier};
use crate::registry::{TaskView, WatchRegistry};
use crate::task::{dispatch_notification, TaskDeps, TaskEvent, TaskStatus};
use scriptwatch_core::{
    interval_label, ConfigStore, Error, NotificationConfig, Result, TargetConfig, TargetStatus,
    TargetUrl,
};
use scriptwatch_store::{RevisionId, RevisionPage, StoreError, VersionStore};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// A configured target joined with the live state of its task.
#[derive(Clone, Debug, Serialize)]
pub struct TargetView {
    pub url: TargetUrl,
    /// Whole seconds
    pub interval: u64,
    pub interval_label: String,
    pub status: TargetStatus,
    #[serde(rename = "timeout")]
    pub failure_threshold: u32,
    pub notification: NotificationConfig,
    pub running: bool,
    pub task: Option<TaskStatus>,
}

impl TargetView {
    fn new(config: TargetConfig, task: Option<TaskView>) -> Self {
        Self {
            interval: config.interval.as_secs(),
            interval_label: interval_label(config.interval),
            status: config.status,
            failure_threshold: config.failure_threshold,
            notification: config.notification,
            running: task.is_some(),
            task: task.map(|t| t.status),
            url: config.url,
        }
    }
}

pub struct WatchService {
    config: Arc<dyn ConfigStore>,
    registry: WatchRegistry,
    store: Arc<dyn VersionStore>,
    notifier: Arc<dyn Notifier>,
    admin: tokio::sync::Mutex<()>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl WatchService {
    /// Build the service and start its task-event loop. Must be called
    /// from within a tokio runtime.
    pub fn new(config: Arc<dyn ConfigStore>, deps: TaskDeps) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Arc::new(Self {
            config,
            store: deps.store.clone(),
            notifier: deps.notifier.clone(),
            registry: WatchRegistry::new(deps, tx),
            admin: tokio::sync::Mutex::new(()),
            event_loop: Mutex::new(None),
        });
        let handle = tokio::spawn(Self::event_loop(Arc::downgrade(&service), rx));
        *service.event_loop.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        service
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    async fn event_loop(weak: Weak<Self>, mut rx: mpsc::UnboundedReceiver<TaskEvent>) {
        while let Some(event) = rx.recv().await {
            let Some(service) = weak.upgrade() else {
                break;
            };
            service.handle_event(event).await;
        }
        debug!("Task event loop exited");
    }

    async fn handle_event(&self, event: TaskEvent) {
        match event {
            TaskEvent::AutoDisabled {
                url,
                generation,
                failures,
            } => {
                let _admin = self.admin.lock().await;
                if !self.registry.owns(&url, generation) {
                    debug!(url = %url, generation, "Stale auto-disable ignored");
                    return;
                }
                let persisted = self.update_config(|targets| {
                    match targets.iter_mut().find(|t| t.url == url) {
                        Some(t) => {
                            t.status = TargetStatus::Disabled;
                            Ok(())
                        }
                        None => Err(Error::TargetNotFound(url.to_string())),
                    }
                });
                // the task has already exited; its entry goes either way
                self.registry.remove_if_generation(&url, generation);
                match persisted {
                    Ok(_) => warn!(url = %url, failures, "Target auto-disabled"),
                    Err(Error::TargetNotFound(_)) => {}
                    Err(e) => error!(url = %url, "Failed to persist auto-disable: {}", e),
                }
            }
        }
    }

    /// Load, mutate, save. Returns the saved list.
    fn update_config<F>(&self, mutate: F) -> Result<Vec<TargetConfig>>
    where
        F: FnOnce(&mut Vec<TargetConfig>) -> Result<()>,
    {
        let mut targets = self.config.load()?;
        mutate(&mut targets)?;
        self.config.save(&targets)?;
        Ok(targets)
    }

    /// Load the config store, drop invalid entries and duplicate URLs (first
    /// wins), and reconcile.
    pub async fn bootstrap(&self) -> Result<usize> {
        let _admin = self.admin.lock().await;
        let loaded = self.config.load()?;
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(loaded.len());
        for target in loaded {
            if let Err(e) = target.validate() {
                warn!(url = %target.url, "Invalid target in config ignored: {}", e);
                continue;
            }
            if seen.insert(target.url.clone()) {
                targets.push(target);
            } else {
                warn!(url = %target.url, "Duplicate target in config ignored");
            }
        }
        self.registry.reconcile(&targets).await;
        let active = targets.iter().filter(|t| t.is_active()).count();
        info!(targets = targets.len(), active, "Bootstrapped from config");
        Ok(active)
    }

    pub async fn add_target(&self, config: TargetConfig) -> Result<TargetConfig> {
        config.validate()?;
        let _admin = self.admin.lock().await;
        self.update_config(|targets| {
            if targets.iter().any(|t| t.url == config.url) {
                return Err(Error::TargetExists(config.url.to_string()));
            }
            targets.push(config.clone());
            Ok(())
        })?;

        if config.is_active() {
            let params = config.watch_params();
            self.registry.start_task(params.clone());
            dispatch_notification(
                self.notifier.clone(),
                params.notification.clone(),
                params.url.clone(),
                monitoring_started_message(&params),
            );
        }
        info!(url = %config.url, "Target added");
        Ok(config)
    }

    /// Replace the configuration for an existing URL and restart its task.
    pub async fn edit_target(&self, config: TargetConfig) -> Result<TargetConfig> {
        self.replace_target(config, false).await
    }

    /// Like `edit_target`, but the stored status wins over `config.status`.
    pub async fn edit_target_keep_status(&self, config: TargetConfig) -> Result<TargetConfig> {
        self.replace_target(config, true).await
    }

    async fn replace_target(&self, config: TargetConfig, keep_status: bool) -> Result<TargetConfig> {
        config.validate()?;
        let _admin = self.admin.lock().await;
        let mut applied = None;
        self.update_config(|targets| match targets.iter_mut().find(|t| t.url == config.url) {
            Some(existing) => {
                let mut next = config.clone();
                if keep_status {
                    next.status = existing.status;
                }
                *existing = next.clone();
                applied = Some(next);
                Ok(())
            }
            None => Err(Error::TargetNotFound(config.url.to_string())),
        })?;
        let config = applied.ok_or_else(|| Error::TargetNotFound(config.url.to_string()))?;

        self.registry.stop_task(&config.url).await;
        if config.is_active() {
            self.registry.start_task(config.watch_params());
        }
        info!(url = %config.url, "Target updated");
        Ok(config)
    }

    /// Remove the configuration, stop the task, and purge history.
    pub async fn remove_target(&self, url: &TargetUrl) -> Result<()> {
        let _admin = self.admin.lock().await;
        self.update_config(|targets| {
            let before = targets.len();
            targets.retain(|t| &t.url != url);
            if targets.len() == before {
                return Err(Error::TargetNotFound(url.to_string()));
            }
            Ok(())
        })?;

        self.registry.stop_task(url).await;
        self.store.purge(url).await.map_err(Error::history)?;
        info!(url = %url, "Target removed");
        Ok(())
    }

    pub async fn set_status(&self, url: &TargetUrl, status: TargetStatus) -> Result<TargetConfig> {
        let _admin = self.admin.lock().await;
        let targets = self.update_config(|targets| match targets.iter_mut().find(|t| &t.url == url) {
            Some(t) => {
                if status.is_active() {
                    t.validate()?;
                }
                t.status = status;
                Ok(())
            }
            None => Err(Error::TargetNotFound(url.to_string())),
        })?;
        let config = targets
            .into_iter()
            .find(|t| &t.url == url)
            .ok_or_else(|| Error::TargetNotFound(url.to_string()))?;

        match status {
            TargetStatus::Active => {
                self.registry.start_task(config.watch_params());
            }
            TargetStatus::Disabled => {
                self.registry.stop_task(url).await;
            }
        }
        info!(url = %url, status = status.as_str(), "Target status changed");
        Ok(config)
    }

    /// Configured targets sorted by URL, each with its live task state.
    pub fn list_targets(&self) -> Result<Vec<TargetView>> {
        let mut targets = self.config.load()?;
        targets.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(targets
            .into_iter()
            .map(|t| {
                let task = self.registry.lookup(&t.url);
                TargetView::new(t, task)
            })
            .collect())
    }

    pub async fn list_history(
        &self,
        url: &TargetUrl,
        offset: usize,
        limit: usize,
    ) -> Result<RevisionPage> {
        self.store
            .list_revisions(url, offset, limit)
            .await
            .map_err(Error::history)
    }

    pub async fn get_diff(&self, url: &TargetUrl, revision: &RevisionId) -> Result<String> {
        self.store
            .diff_revision(url, revision)
            .await
            .map_err(|e| match e {
                StoreError::InvalidRevision(r) | StoreError::RevisionNotFound(r) => {
                    Error::RevisionNotFound(r)
                }
                other => Error::history(other),
            })
    }

    /// Stop every task and the event loop.
    pub async fn shutdown(&self) {
        let _admin = self.admin.lock().await;
        self.registry.shutdown().await;
        let handle = self.event_loop.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
        }
        info!("Watch service stopped");
    }
}
