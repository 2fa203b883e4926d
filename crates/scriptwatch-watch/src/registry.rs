//! Watch registry - at most one running task per normalized target URL
//!
//! The map sits behind a single std mutex. Every critical section is a plain
//! map operation; the lock is never held across fetches, commits, or while
//! waiting for a task to finish.

use crate::task::{TaskDeps, TaskEvent, TaskStatus, WatchTask};
use scriptwatch_core::{TargetConfig, TargetUrl, WatchParams, MIN_INTERVAL};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct TaskHandle {
    params: WatchParams,
    generation: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    status: watch::Receiver<TaskStatus>,
}

/// Read-only snapshot of a registered task.
#[derive(Clone, Debug)]
pub struct TaskView {
    pub params: WatchParams,
    pub generation: u64,
    pub status: TaskStatus,
}

impl TaskHandle {
    fn view(&self) -> TaskView {
        TaskView {
            params: self.params.clone(),
            generation: self.generation,
            status: self.status.borrow().clone(),
        }
    }
}

pub struct WatchRegistry {
    tasks: Mutex<HashMap<TargetUrl, TaskHandle>>,
    deps: TaskDeps,
    events: mpsc::UnboundedSender<TaskEvent>,
    next_generation: AtomicU64,
}

impl WatchRegistry {
    pub fn new(deps: TaskDeps, events: mpsc::UnboundedSender<TaskEvent>) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            deps,
            events,
            next_generation: AtomicU64::new(1),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TargetUrl, TaskHandle>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register and spawn a task unless one is already registered for the URL
    /// or the interval is below `MIN_INTERVAL`. Returns whether a task was started.
    pub fn start_task(&self, params: WatchParams) -> bool {
        if params.interval < MIN_INTERVAL {
            warn!(url = %params.url, interval_ms = params.interval.as_millis() as u64, "Refusing to start task below minimum interval");
            return false;
        }
        let mut tasks = self.tasks();
        if tasks.contains_key(&params.url) {
            debug!(url = %params.url, "Task already registered");
            return false;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let task = WatchTask::new(params.clone(), self.deps.clone(), cancel.clone())
            .with_generation(generation)
            .with_events(self.events.clone());
        let status = task.subscribe();
        let join = tokio::spawn(task.run());

        tasks.insert(
            params.url.clone(),
            TaskHandle {
                params,
                generation,
                cancel,
                join,
                status,
            },
        );
        true
    }

    /// Cancel and remove the task for a URL, then wait for it to acknowledge.
    /// Returns whether a task was registered.
    pub async fn stop_task(&self, url: &TargetUrl) -> bool {
        let handle = self.tasks().remove(url);
        match handle {
            Some(handle) => {
                Self::finish(url, handle).await;
                true
            }
            None => false,
        }
    }

    async fn finish(url: &TargetUrl, handle: TaskHandle) {
        handle.cancel.cancel();
        if let Err(e) = handle.join.await {
            warn!(url = %url, "Watch task ended abnormally: {}", e);
        }
        debug!(url = %url, generation = handle.generation, "Task stopped");
    }

    /// Drop the entry for a task that already ended on its own, but only if the
    /// entry still belongs to that task.
    pub fn remove_if_generation(&self, url: &TargetUrl, generation: u64) -> bool {
        let mut tasks = self.tasks();
        match tasks.get(url) {
            Some(h) if h.generation == generation => {
                if let Some(h) = tasks.remove(url) {
                    h.cancel.cancel();
                }
                true
            }
            _ => false,
        }
    }

    pub fn owns(&self, url: &TargetUrl, generation: u64) -> bool {
        self.tasks().get(url).map(|h| h.generation == generation).unwrap_or(false)
    }

    /// Make the running set match the desired configuration: one task per
    /// active entry, none otherwise. Entries whose parameters changed are
    /// stopped and started fresh.
    pub async fn reconcile(&self, desired: &[TargetConfig]) {
        let mut wanted: Vec<WatchParams> = Vec::new();
        let mut seen = HashSet::new();
        for config in desired.iter().filter(|c| c.is_active()) {
            if seen.insert(config.url.clone()) {
                wanted.push(config.watch_params());
            }
        }

        let stale: Vec<TargetUrl> = {
            let tasks = self.tasks();
            tasks
                .iter()
                .filter(|(url, h)| !wanted.iter().any(|p| &p.url == *url && *p == h.params))
                .map(|(url, _)| url.clone())
                .collect()
        };
        for url in &stale {
            self.stop_task(url).await;
        }

        let mut started = 0;
        for params in wanted {
            if self.start_task(params) {
                started += 1;
            }
        }
        info!(stopped = stale.len(), started, running = self.len(), "Registry reconciled");
    }

    pub fn lookup(&self, url: &TargetUrl) -> Option<TaskView> {
        self.tasks().get(url).map(TaskHandle::view)
    }

    pub fn list(&self) -> Vec<TaskView> {
        let mut views: Vec<TaskView> = self.tasks().values().map(TaskHandle::view).collect();
        views.sort_by(|a, b| a.params.url.cmp(&b.params.url));
        views
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every task and wait for all of them.
    pub async fn shutdown(&self) {
        let drained: Vec<(TargetUrl, TaskHandle)> = self.tasks().drain().collect();
        if drained.is_empty() {
            return;
        }
        info!("Stopping {} watch tasks", drained.len());
        for (_, handle) in &drained {
            handle.cancel.cancel();
        }
        futures::future::join_all(
            drained
                .into_iter()
                .map(|(url, handle)| async move { Self::finish(&url, handle).await }),
        )
        .await;
    }
}
