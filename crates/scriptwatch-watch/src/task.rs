//! Per-target watch task
//!
//! Each tick runs resolve -> fetch -> normalize -> commit -> notify. The next
//! tick's timer is armed only after the current one finishes, so ticks of one
//! target never overlap. Cancellation is observed at the top of each tick,
//! before every fetch, before commit, and while waiting for the timer.

use crate::notify::{auto_disabled_message, change_detected_message, Notifier};
use chrono::{DateTime, Local, Utc};
use scriptwatch_core::{NotificationConfig, Snapshot, TargetUrl, WatchParams};
use scriptwatch_fetch::{FetchError, Fetcher, Resolver};
use scriptwatch_store::{CommitOutcome, RevisionId, VersionStore};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Collaborators shared by every task.
#[derive(Clone)]
pub struct TaskDeps {
    pub resolver: Arc<dyn Resolver>,
    pub fetcher: Arc<dyn Fetcher>,
    pub store: Arc<dyn VersionStore>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[default]
    Scheduled,
    Fetching,
    Evaluating,
    Committing,
    Stopped,
}

/// Live view of a task, published over a `watch` channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub consecutive_failures: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_revision: Option<RevisionId>,
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Cancelled,
    /// The target referenced no scripts.
    NoResources,
    Unchanged,
    Committed(RevisionId),
    Failed(String),
}

/// Events a task reports back to its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskEvent {
    AutoDisabled {
        url: TargetUrl,
        generation: u64,
        failures: u32,
    },
}

enum Fetched {
    Cancelled,
    Empty,
    Ready(Snapshot),
}

pub struct WatchTask {
    params: WatchParams,
    generation: u64,
    deps: TaskDeps,
    cancel: CancellationToken,
    status: watch::Sender<TaskStatus>,
    events: Option<mpsc::UnboundedSender<TaskEvent>>,
    failures: u32,
    last_snapshot: Option<Snapshot>,
}

impl WatchTask {
    pub fn new(params: WatchParams, deps: TaskDeps, cancel: CancellationToken) -> Self {
        let (status, _) = watch::channel(TaskStatus::default());
        Self {
            params,
            generation: 0,
            deps,
            cancel,
            status,
            events: None,
            failures: 0,
            last_snapshot: None,
        }
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<TaskEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.status.subscribe()
    }

    pub fn params(&self) -> &WatchParams {
        &self.params
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    fn set_state(&self, state: TaskState) {
        self.status.send_modify(|s| s.state = state);
    }

    fn threshold_reached(&self) -> bool {
        self.params.failure_threshold > 0 && self.failures >= self.params.failure_threshold
    }

    /// Run until cancelled or auto-disabled. The first check happens immediately.
    pub async fn run(mut self) {
        let url = self.params.url.clone();
        info!(url = %url, interval_secs = self.params.interval.as_secs(), "Watch task started");

        loop {
            let outcome = self.tick().await;
            if outcome == TickOutcome::Cancelled {
                break;
            }
            if matches!(outcome, TickOutcome::Failed(_)) && self.threshold_reached() {
                self.auto_disable();
                break;
            }

            self.set_state(TaskState::Scheduled);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.params.interval) => {}
            }
        }

        self.set_state(TaskState::Stopped);
        info!(url = %url, "Watch task stopped");
    }

    /// One fetch cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.cancel.is_cancelled() {
            return TickOutcome::Cancelled;
        }
        let url = self.params.url.clone();
        self.set_state(TaskState::Fetching);
        self.status.send_modify(|s| s.last_check = Some(Utc::now()));

        let snapshot = match self.fetch_snapshot().await {
            Ok(Fetched::Cancelled) => return TickOutcome::Cancelled,
            Ok(Fetched::Empty) => {
                debug!(url = %url, "No scripts found");
                self.record_success();
                return TickOutcome::NoResources;
            }
            Ok(Fetched::Ready(snapshot)) => snapshot,
            Err(e) => return self.record_failure(e.to_string()),
        };

        self.set_state(TaskState::Evaluating);
        if self.last_snapshot.as_ref() == Some(&snapshot) {
            self.record_success();
            return TickOutcome::Unchanged;
        }

        if self.cancel.is_cancelled() {
            return TickOutcome::Cancelled;
        }
        self.set_state(TaskState::Committing);
        match self.deps.store.commit_if_changed(&url, &snapshot).await {
            Ok(CommitOutcome::NoChange) => {
                self.last_snapshot = Some(snapshot);
                self.record_success();
                TickOutcome::Unchanged
            }
            Ok(CommitOutcome::Committed(id)) => {
                info!(url = %url, revision = %id.short(), scripts = snapshot.script_count(), "Change committed");
                self.last_snapshot = Some(snapshot);
                self.record_success();
                self.status.send_modify(|s| s.last_revision = Some(id.clone()));
                self.dispatch(change_detected_message(&url, Local::now(), &id));
                TickOutcome::Committed(id)
            }
            Err(e) => self.record_failure(format!("commit failed: {}", e)),
        }
    }

    async fn fetch_snapshot(&self) -> Result<Fetched, FetchError> {
        let url = &self.params.url;
        let scripts = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(Fetched::Cancelled),
            r = self.deps.resolver.resolve(url) => r?,
        };
        if scripts.is_empty() {
            return Ok(Fetched::Empty);
        }

        let mut bodies = Vec::with_capacity(scripts.len());
        let mut last_error = None;
        for script in &scripts {
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Fetched::Cancelled),
                r = self.deps.fetcher.fetch(script) => r,
            };
            match fetched {
                Ok(body) => bodies.push(body),
                Err(e) => {
                    warn!(url = %url, script = %script, "Script fetch failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        if bodies.is_empty() {
            return Err(last_error
                .unwrap_or_else(|| FetchError::request(url.as_str(), "no scripts retrieved")));
        }
        if bodies.len() < scripts.len() {
            debug!(url = %url, "Proceeding with {}/{} scripts", bodies.len(), scripts.len());
        }
        Ok(Fetched::Ready(Snapshot::normalize(&bodies)))
    }

    fn record_success(&mut self) {
        self.failures = 0;
        self.status.send_modify(|s| {
            s.consecutive_failures = 0;
            s.last_error = None;
        });
    }

    fn record_failure(&mut self, message: String) -> TickOutcome {
        self.failures = self.failures.saturating_add(1);
        warn!(url = %self.params.url, failures = self.failures, "Check failed: {}", message);
        let failures = self.failures;
        let error = message.clone();
        self.status.send_modify(|s| {
            s.consecutive_failures = failures;
            s.last_error = Some(error);
        });
        TickOutcome::Failed(message)
    }

    fn auto_disable(&self) {
        let url = self.params.url.clone();
        warn!(url = %url, failures = self.failures, "Failure threshold reached, disabling");
        self.dispatch(auto_disabled_message(&url, self.failures));
        if let Some(events) = &self.events {
            let event = TaskEvent::AutoDisabled {
                url,
                generation: self.generation,
                failures: self.failures,
            };
            if events.send(event).is_err() {
                debug!("Task event receiver dropped");
            }
        }
    }

    /// Fire-and-forget notification; never blocks the schedule.
    fn dispatch(&self, message: String) {
        dispatch_notification(
            self.deps.notifier.clone(),
            self.params.notification.clone(),
            self.params.url.clone(),
            message,
        );
    }
}

pub(crate) fn dispatch_notification(
    notifier: Arc<dyn Notifier>,
    channel: NotificationConfig,
    url: TargetUrl,
    message: String,
) {
    if !channel.is_deliverable() {
        return;
    }
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&channel, &message).await {
            warn!(url = %url, "Notification failed: {}", e);
        }
    });
}
