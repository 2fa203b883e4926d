//! Scriptwatch Watch - Watch tasks, the task registry, and the admin service

pub mod notify;
pub mod registry;
pub mod service;
pub mod task;

pub use notify::{
    auto_disabled_message, change_detected_message, monitoring_started_message, Notifier,
    NotifyError, NotifyResult, NullNotifier, TelegramNotifier, TELEGRAM_API_BASE,
};
pub use registry::{TaskView, WatchRegistry};
pub use service::{TargetView, WatchService, DEFAULT_HISTORY_LIMIT};
pub use task::{TaskDeps, TaskEvent, TaskState, TaskStatus, TickOutcome, WatchTask};
