//! Tests for scriptwatch-watch: WatchTask ticks, WatchRegistry lifecycle, WatchService admin ops

use bytes::Bytes;
use scriptwatch_core::*;
use scriptwatch_fetch::{FetchError, FetchResult, Fetcher, Resolver, ScriptResolver};
use scriptwatch_store::*;
use scriptwatch_watch::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ===========================================================================
// Mocks
// ===========================================================================

/// Serves fixed bodies per URL; URLs without a body fail.
#[derive(Default)]
struct MapFetcher {
    bodies: Mutex<HashMap<String, String>>,
    calls: AtomicUsize,
}

impl MapFetcher {
    fn set(&self, url: &str, body: &str) {
        self.bodies.lock().unwrap().insert(url.to_string(), body.to_string());
    }

    fn fail(&self, url: &str) {
        self.bodies.lock().unwrap().remove(url);
    }
}

#[async_trait::async_trait]
impl Fetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bodies
            .lock()
            .unwrap()
            .get(url)
            .map(|b| Bytes::from(b.clone()))
            .ok_or_else(|| FetchError::Status { url: url.to_string(), status: 503 })
    }
}

/// Returns a fixed script list, or fails while `down` is set.
#[derive(Default)]
struct ListResolver {
    scripts: Mutex<Vec<String>>,
    down: Mutex<bool>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ListResolver {
    fn with_scripts(scripts: &[&str]) -> Self {
        let r = Self::default();
        *r.scripts.lock().unwrap() = scripts.iter().map(|s| s.to_string()).collect();
        r
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Resolver for ListResolver {
    async fn resolve(&self, target: &TargetUrl) -> FetchResult<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if *self.down.lock().unwrap() {
            return Err(FetchError::request(target.as_str(), "connection refused"));
        }
        Ok(self.scripts.lock().unwrap().clone())
    }
}

/// Decrements the in-flight count even when the resolve is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, _channel: &NotificationConfig, message: &str) -> NotifyResult<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

struct BrokenStore;

#[async_trait::async_trait]
impl VersionStore for BrokenStore {
    async fn commit_if_changed(&self, _: &TargetUrl, _: &Snapshot) -> StoreResult<CommitOutcome> {
        Err(StoreError::Corrupt("disk full".into()))
    }
    async fn list_revisions(&self, _: &TargetUrl, _: usize, _: usize) -> StoreResult<RevisionPage> {
        Ok(RevisionPage::default())
    }
    async fn diff_revision(&self, _: &TargetUrl, r: &RevisionId) -> StoreResult<String> {
        Err(StoreError::RevisionNotFound(r.to_string()))
    }
    async fn purge(&self, _: &TargetUrl) -> StoreResult<()> {
        Ok(())
    }
}

/// Loads fine, refuses to save.
struct ReadOnlyConfig(Vec<TargetConfig>);

impl ConfigStore for ReadOnlyConfig {
    fn load(&self) -> Result<Vec<TargetConfig>> {
        Ok(self.0.clone())
    }
    fn save(&self, _: &[TargetConfig]) -> Result<()> {
        Err(Error::config_persist("read-only filesystem"))
    }
}

/// Fails the first `failures` saves, then behaves like an in-memory store.
struct FlakyConfig {
    targets: Mutex<Vec<TargetConfig>>,
    failures: AtomicUsize,
}

impl FlakyConfig {
    fn new(targets: Vec<TargetConfig>, failures: usize) -> Self {
        Self {
            targets: Mutex::new(targets),
            failures: AtomicUsize::new(failures),
        }
    }
}

impl ConfigStore for FlakyConfig {
    fn load(&self) -> Result<Vec<TargetConfig>> {
        Ok(self.targets.lock().unwrap().clone())
    }
    fn save(&self, targets: &[TargetConfig]) -> Result<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(Error::config_persist("disk full"));
        }
        *self.targets.lock().unwrap() = targets.to_vec();
        Ok(())
    }
}

struct Harness {
    resolver: Arc<ListResolver>,
    fetcher: Arc<MapFetcher>,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
}

impl Harness {
    fn new(resolver: ListResolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
            fetcher: Arc::new(MapFetcher::default()),
            store: Arc::new(MemoryStore::new()),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    fn deps(&self) -> TaskDeps {
        TaskDeps {
            resolver: self.resolver.clone(),
            fetcher: self.fetcher.clone(),
            store: self.store.clone(),
            notifier: self.notifier.clone(),
        }
    }

    fn task(&self, params: WatchParams) -> WatchTask {
        WatchTask::new(params, self.deps(), CancellationToken::new())
    }
}

const PAGE: &str = "https://example.com";
const S1: &str = "https://example.com/s1.js";
const S2: &str = "https://example.com/s2.js";

fn params(threshold: u32) -> WatchParams {
    TargetConfig::new(PAGE, Duration::from_secs(60))
        .with_failure_threshold(threshold)
        .watch_params()
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// ===========================================================================
// WatchTask
// ===========================================================================

#[tokio::test]
async fn identical_content_commits_once() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    h.fetcher.set(S1, "a()");
    let mut task = h.task(params(0));

    assert!(matches!(task.tick().await, TickOutcome::Committed(_)));
    assert_eq!(task.tick().await, TickOutcome::Unchanged);
    assert_eq!(task.tick().await, TickOutcome::Unchanged);
    assert_eq!(h.store.revision_count(&TargetUrl::new(PAGE)), 1);
}

#[tokio::test]
async fn fresh_task_defers_to_store_for_existing_history() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    h.fetcher.set(S1, "a()");
    assert!(matches!(h.task(params(0)).tick().await, TickOutcome::Committed(_)));

    // A restarted task has no in-memory snapshot but the store still says no change.
    assert_eq!(h.task(params(0)).tick().await, TickOutcome::Unchanged);
    assert_eq!(h.store.revision_count(&TargetUrl::new(PAGE)), 1);
}

#[tokio::test]
async fn direct_script_scenario() {
    let fetcher = Arc::new(MapFetcher::default());
    let store = Arc::new(MemoryStore::new());
    let deps = TaskDeps {
        resolver: Arc::new(ScriptResolver::new(fetcher.clone())),
        fetcher: fetcher.clone(),
        store: store.clone(),
        notifier: Arc::new(NullNotifier),
    };
    let url = "http://example.com/app.js";
    let target = TargetUrl::new(url);
    let mut task = WatchTask::new(
        TargetConfig::new(url, Duration::from_secs(60)).watch_params(),
        deps,
        CancellationToken::new(),
    );

    fetcher.set(url, "B1");
    let r1 = match task.tick().await {
        TickOutcome::Committed(id) => id,
        other => panic!("expected commit, got {:?}", other),
    };

    assert_eq!(task.tick().await, TickOutcome::Unchanged);
    let page = store.list_revisions(&target, 0, 10).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.revisions[0].id, r1);

    fetcher.set(url, "B2");
    let r2 = match task.tick().await {
        TickOutcome::Committed(id) => id,
        other => panic!("expected commit, got {:?}", other),
    };
    assert_ne!(r1, r2);
    assert_eq!(store.diff_revision(&target, &r1).await.unwrap(), "");
    let patch = store.diff_revision(&target, &r2).await.unwrap();
    assert!(patch.contains("-B1"));
    assert!(patch.contains("+B2"));
}

#[tokio::test]
async fn partial_fetch_failure_is_tolerated() {
    let h = Harness::new(ListResolver::with_scripts(&[S1, S2]));
    h.fetcher.set(S1, "one()");
    h.fetcher.fail(S2);
    let mut task = h.task(params(1));

    assert!(matches!(task.tick().await, TickOutcome::Committed(_)));
    assert_eq!(task.consecutive_failures(), 0);
    let stored = h.store.latest(&TargetUrl::new(PAGE)).unwrap();
    assert!(Snapshot::normalize(["one()"]).matches_presentable(&stored));
}

#[tokio::test]
async fn all_fetches_failing_is_a_failure() {
    let h = Harness::new(ListResolver::with_scripts(&[S1, S2]));
    let mut task = h.task(params(0));
    assert!(matches!(task.tick().await, TickOutcome::Failed(_)));
    assert_eq!(task.consecutive_failures(), 1);
    assert_eq!(h.store.revision_count(&TargetUrl::new(PAGE)), 0);
}

#[tokio::test]
async fn zero_resources_is_a_successful_noop() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    h.resolver.set_down(true);
    let mut task = h.task(params(0));
    assert!(matches!(task.tick().await, TickOutcome::Failed(_)));

    h.resolver.set_down(false);
    *h.resolver.scripts.lock().unwrap() = Vec::new();
    assert_eq!(task.tick().await, TickOutcome::NoResources);
    assert_eq!(task.consecutive_failures(), 0);
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn success_resets_failure_counter() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    h.fetcher.set(S1, "x");
    let mut task = h.task(params(3));

    h.resolver.set_down(true);
    task.tick().await;
    task.tick().await;
    assert_eq!(task.consecutive_failures(), 2);

    h.resolver.set_down(false);
    assert!(matches!(task.tick().await, TickOutcome::Committed(_)));
    assert_eq!(task.consecutive_failures(), 0);

    h.resolver.set_down(true);
    task.tick().await;
    assert_eq!(task.consecutive_failures(), 1);
}

#[tokio::test]
async fn commit_failure_is_counted() {
    let resolver = Arc::new(ListResolver::with_scripts(&[S1]));
    let fetcher = Arc::new(MapFetcher::default());
    fetcher.set(S1, "x");
    let deps = TaskDeps {
        resolver,
        fetcher,
        store: Arc::new(BrokenStore),
        notifier: Arc::new(NullNotifier),
    };
    let mut task = WatchTask::new(params(0), deps, CancellationToken::new());
    match task.tick().await {
        TickOutcome::Failed(msg) => assert!(msg.contains("disk full")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(task.consecutive_failures(), 1);
}

#[tokio::test]
async fn cancelled_task_does_not_fetch() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    let cancel = CancellationToken::new();
    let mut task = WatchTask::new(params(0), h.deps(), cancel.clone());
    cancel.cancel();
    assert_eq!(task.tick().await, TickOutcome::Cancelled);
    assert_eq!(h.resolver.calls(), 0);
}

#[tokio::test]
async fn commit_dispatches_notification_when_enabled() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    h.fetcher.set(S1, "x");
    let mut p = params(0);
    p.notification = NotificationConfig::telegram("tok", "@chan");
    let mut task = h.task(p);
    task.tick().await;
    settle().await;
    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("Changes Detected"));
}

#[tokio::test]
async fn disabled_channel_gets_nothing() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    h.fetcher.set(S1, "x");
    let mut p = params(0);
    p.notification = NotificationConfig::telegram("tok", "@chan");
    p.notification.enabled = false;
    h.task(p).tick().await;
    settle().await;
    assert!(h.notifier.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_publishes_status() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    h.fetcher.set(S1, "x");
    let cancel = CancellationToken::new();
    let task = WatchTask::new(params(0), h.deps(), cancel.clone());
    let status = task.subscribe();
    let join = tokio::spawn(task.run());

    tokio::time::sleep(Duration::from_secs(1)).await;
    {
        let s = status.borrow();
        assert_eq!(s.state, TaskState::Scheduled);
        assert!(s.last_check.is_some());
        assert!(s.last_revision.is_some());
    }

    cancel.cancel();
    join.await.unwrap();
    assert_eq!(status.borrow().state, TaskState::Stopped);
}

// ===========================================================================
// WatchRegistry
// ===========================================================================

fn registry(h: &Harness) -> (WatchRegistry, tokio::sync::mpsc::UnboundedReceiver<TaskEvent>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (WatchRegistry::new(h.deps(), tx), rx)
}

#[tokio::test(start_paused = true)]
async fn start_is_noop_when_registered() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    let (reg, _rx) = registry(&h);
    assert!(reg.start_task(params(0)));
    assert!(!reg.start_task(params(5)));
    assert_eq!(reg.len(), 1);
    assert_eq!(reg.lookup(&TargetUrl::new(PAGE)).unwrap().params.failure_threshold, 0);
    reg.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stop_ends_polling() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    h.fetcher.set(S1, "x");
    let (reg, _rx) = registry(&h);
    reg.start_task(params(0));
    tokio::time::sleep(Duration::from_secs(150)).await;
    let calls = h.resolver.calls();
    assert!(calls >= 3);

    assert!(reg.stop_task(&TargetUrl::new(PAGE)).await);
    assert!(reg.lookup(&TargetUrl::new(PAGE)).is_none());
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.resolver.calls(), calls);
    assert!(!reg.stop_task(&TargetUrl::new(PAGE)).await);
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_in_flight_resolve() {
    let h = Harness::new(
        ListResolver::with_scripts(&[S1]).with_delay(Duration::from_secs(3600)),
    );
    let (reg, _rx) = registry(&h);
    reg.start_task(params(0));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.resolver.calls(), 1);
    assert!(reg.stop_task(&TargetUrl::new(PAGE)).await);
    assert_eq!(h.store.revision_count(&TargetUrl::new(PAGE)), 0);
}

#[tokio::test(start_paused = true)]
async fn reconcile_matches_desired_set() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    let (reg, _rx) = registry(&h);
    let a = TargetConfig::new("https://a.example", Duration::from_secs(60));
    let b = TargetConfig::new("https://b.example", Duration::from_secs(60));
    let c = TargetConfig::new("https://c.example", Duration::from_secs(60))
        .with_status(TargetStatus::Disabled);

    reg.reconcile(&[a.clone(), b.clone(), c.clone()]).await;
    assert_eq!(reg.len(), 2);
    assert!(reg.lookup(&c.url).is_none());
    let gen_a = reg.lookup(&a.url).unwrap().generation;
    let gen_b = reg.lookup(&b.url).unwrap().generation;

    // a unchanged, b changed threshold, c enabled
    let b2 = b.clone().with_failure_threshold(2);
    let c2 = c.clone().with_status(TargetStatus::Active);
    reg.reconcile(&[a.clone(), b2, c2]).await;
    assert_eq!(reg.len(), 3);
    assert_eq!(reg.lookup(&a.url).unwrap().generation, gen_a);
    let b_view = reg.lookup(&b.url).unwrap();
    assert_ne!(b_view.generation, gen_b);
    assert_eq!(b_view.params.failure_threshold, 2);

    reg.reconcile(&[]).await;
    assert!(reg.is_empty());
}

#[tokio::test(start_paused = true)]
async fn generation_guards_removal() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    let (reg, _rx) = registry(&h);
    reg.start_task(params(0));
    let url = TargetUrl::new(PAGE);
    let generation = reg.lookup(&url).unwrap().generation;
    assert!(reg.owns(&url, generation));
    assert!(!reg.remove_if_generation(&url, generation + 1));
    assert_eq!(reg.len(), 1);
    assert!(reg.remove_if_generation(&url, generation));
    assert!(reg.is_empty());
}

#[tokio::test(start_paused = true)]
async fn start_refuses_interval_below_minimum() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    let (reg, _rx) = registry(&h);
    let zero = TargetConfig::new(PAGE, Duration::ZERO).watch_params();
    assert!(!reg.start_task(zero));
    assert!(reg.is_empty());
    settle().await;
    assert_eq!(h.resolver.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn threshold_emits_auto_disable_event() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    h.resolver.set_down(true);
    let (reg, mut rx) = registry(&h);
    reg.start_task(params(3));
    let event = rx.recv().await.unwrap();
    let generation = reg.lookup(&TargetUrl::new(PAGE)).unwrap().generation;
    assert_eq!(
        event,
        TaskEvent::AutoDisabled {
            url: TargetUrl::new(PAGE),
            generation,
            failures: 3,
        }
    );
    assert_eq!(h.resolver.calls(), 3);
}

// ===========================================================================
// WatchService
// ===========================================================================

fn service(h: &Harness, config: Arc<dyn ConfigStore>) -> Arc<WatchService> {
    WatchService::new(config, h.deps())
}

async fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..1000 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    cond()
}

#[tokio::test(start_paused = true)]
async fn bootstrap_dedupes_and_skips_disabled() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    let config = Arc::new(MemoryConfigStore::with_targets(vec![
        TargetConfig::new("https://a.example/", Duration::from_secs(60)),
        TargetConfig::new("https://a.example", Duration::from_secs(3600)),
        TargetConfig::new("https://b.example", Duration::from_secs(60))
            .with_status(TargetStatus::Disabled),
    ]));
    let svc = service(&h, config);
    assert_eq!(svc.bootstrap().await.unwrap(), 1);
    let view = svc.registry().lookup(&TargetUrl::new("https://a.example")).unwrap();
    assert_eq!(view.params.interval, Duration::from_secs(60));
    assert_eq!(svc.registry().len(), 1);
    svc.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn bootstrap_skips_zero_interval_entries() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    let config = Arc::new(MemoryConfigStore::with_targets(vec![
        TargetConfig::new(PAGE, Duration::ZERO),
        TargetConfig::new("https://b.example", Duration::ZERO)
            .with_status(TargetStatus::Disabled),
    ]));
    let svc = service(&h, config.clone());
    assert_eq!(svc.bootstrap().await.unwrap(), 0);
    assert!(svc.registry().is_empty());
    settle().await;
    assert_eq!(h.resolver.calls(), 0);

    // enabling the stored zero-interval entry is rejected, not spun up
    let b = TargetUrl::new("https://b.example");
    let err = svc.set_status(&b, TargetStatus::Active).await.unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)), "{:?}", err);
    assert!(svc.registry().is_empty());
    assert_eq!(config.load().unwrap()[1].status, TargetStatus::Disabled);
    settle().await;
    assert_eq!(h.resolver.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn edit_keeping_status_leaves_disabled_target_idle() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    let config = Arc::new(MemoryConfigStore::new());
    let svc = service(&h, config.clone());
    let url = TargetUrl::new(PAGE);
    svc.add_target(
        TargetConfig::new(PAGE, Duration::from_secs(60)).with_status(TargetStatus::Disabled),
    )
    .await
    .unwrap();

    // the incoming config says active, the stored status wins
    let saved = svc
        .edit_target_keep_status(TargetConfig::new(PAGE, Duration::from_secs(120)))
        .await
        .unwrap();
    assert_eq!(saved.status, TargetStatus::Disabled);
    assert_eq!(saved.interval, Duration::from_secs(120));
    assert_eq!(config.load().unwrap()[0].status, TargetStatus::Disabled);
    assert!(svc.registry().lookup(&url).is_none());
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.resolver.calls(), 0);

    // an explicit edit still applies the given status
    let saved = svc
        .edit_target(TargetConfig::new(PAGE, Duration::from_secs(120)))
        .await
        .unwrap();
    assert_eq!(saved.status, TargetStatus::Active);
    assert!(svc.registry().lookup(&url).is_some());
    svc.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn add_edit_remove_lifecycle() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    h.fetcher.set(S1, "x");
    let config = Arc::new(MemoryConfigStore::new());
    let svc = service(&h, config.clone());
    let url = TargetUrl::new(PAGE);

    let cfg = TargetConfig::new("https://example.com/", Duration::from_secs(60))
        .with_notification(NotificationConfig::telegram("tok", "@chan"));
    svc.add_target(cfg.clone()).await.unwrap();
    assert!(matches!(
        svc.add_target(cfg.clone()).await,
        Err(Error::TargetExists(_))
    ));
    assert_eq!(config.load().unwrap().len(), 1);
    let first_gen = svc.registry().lookup(&url).unwrap().generation;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.notifier.messages().iter().any(|m| m.contains("Monitoring Started")));
    assert_eq!(svc.list_history(&url, 0, 10).await.unwrap().total, 1);

    svc.edit_target(cfg.clone().with_failure_threshold(4)).await.unwrap();
    let view = svc.registry().lookup(&url).unwrap();
    assert_ne!(view.generation, first_gen);
    assert_eq!(view.params.failure_threshold, 4);
    assert_eq!(config.load().unwrap()[0].failure_threshold, 4);

    svc.remove_target(&url).await.unwrap();
    assert!(svc.registry().lookup(&url).is_none());
    assert!(config.load().unwrap().is_empty());
    assert_eq!(svc.list_history(&url, 0, 10).await.unwrap().total, 0);
    assert!(matches!(svc.remove_target(&url).await, Err(Error::TargetNotFound(_))));
    svc.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn edit_unknown_target_is_not_found() {
    let h = Harness::new(ListResolver::default());
    let svc = service(&h, Arc::new(MemoryConfigStore::new()));
    let err = svc
        .edit_target(TargetConfig::new(PAGE, Duration::from_secs(60)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TargetNotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn invalid_config_is_rejected_before_persisting() {
    let h = Harness::new(ListResolver::default());
    let config = Arc::new(MemoryConfigStore::new());
    let svc = service(&h, config.clone());
    let err = svc
        .add_target(TargetConfig::new(PAGE, Duration::ZERO))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert!(config.load().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn status_toggle_starts_and_stops() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    let config = Arc::new(MemoryConfigStore::new());
    let svc = service(&h, config.clone());
    let url = TargetUrl::new(PAGE);
    svc.add_target(TargetConfig::new(PAGE, Duration::from_secs(60)))
        .await
        .unwrap();

    svc.set_status(&url, TargetStatus::Disabled).await.unwrap();
    assert!(svc.registry().lookup(&url).is_none());
    assert_eq!(config.load().unwrap()[0].status, TargetStatus::Disabled);

    svc.set_status(&url, TargetStatus::Active).await.unwrap();
    assert!(svc.registry().lookup(&url).is_some());
    assert!(matches!(
        svc.set_status(&TargetUrl::new("https://nope.example"), TargetStatus::Active).await,
        Err(Error::TargetNotFound(_))
    ));
    svc.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn persist_failure_leaves_registry_untouched() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    let existing = TargetConfig::new(PAGE, Duration::from_secs(60));
    let svc = service(&h, Arc::new(ReadOnlyConfig(vec![existing.clone()])));
    svc.bootstrap().await.unwrap();
    let url = TargetUrl::new(PAGE);
    let generation = svc.registry().lookup(&url).unwrap().generation;

    let err = svc
        .add_target(TargetConfig::new("https://other.example", Duration::from_secs(60)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConfigPersist(_)));
    assert!(svc.registry().lookup(&TargetUrl::new("https://other.example")).is_none());

    assert!(svc.remove_target(&url).await.is_err());
    assert!(svc.set_status(&url, TargetStatus::Disabled).await.is_err());
    assert!(svc.edit_target(existing.with_failure_threshold(9)).await.is_err());
    assert_eq!(svc.registry().lookup(&url).unwrap().generation, generation);
    svc.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn threshold_disables_and_persists() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    h.resolver.set_down(true);
    let config = Arc::new(MemoryConfigStore::new());
    let svc = service(&h, config.clone());
    let url = TargetUrl::new(PAGE);
    svc.add_target(
        TargetConfig::new(PAGE, Duration::from_secs(60))
            .with_failure_threshold(3)
            .with_notification(NotificationConfig::telegram("tok", "@chan")),
    )
    .await
    .unwrap();

    let disabled = wait_for(|| {
        config.load().unwrap()[0].status == TargetStatus::Disabled
            && svc.registry().lookup(&url).is_none()
    })
    .await;
    assert!(disabled);
    assert_eq!(h.resolver.calls(), 3);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.resolver.calls(), 3);
    assert!(h.notifier.messages().iter().any(|m| m.contains("Monitoring Disabled")));

    // restart does not resurrect it
    let again = service(&h, config.clone());
    assert_eq!(again.bootstrap().await.unwrap(), 0);
    svc.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn auto_disable_frees_entry_when_persist_fails() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    h.resolver.set_down(true);
    let target = TargetConfig::new(PAGE, Duration::from_secs(60)).with_failure_threshold(2);
    let config = Arc::new(FlakyConfig::new(vec![target], 1));
    let svc = service(&h, config.clone());
    let url = TargetUrl::new(PAGE);
    assert_eq!(svc.bootstrap().await.unwrap(), 1);

    let freed = wait_for(|| svc.registry().lookup(&url).is_none()).await;
    assert!(freed);
    assert_eq!(h.resolver.calls(), 2);
    // the disable was never written
    assert_eq!(config.load().unwrap()[0].status, TargetStatus::Active);

    // re-enabling starts a fresh task instead of hitting the dead handle
    h.resolver.set_down(false);
    svc.set_status(&url, TargetStatus::Active).await.unwrap();
    assert!(svc.registry().lookup(&url).is_some());
    assert!(wait_for(|| h.resolver.calls() >= 3).await);
    svc.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_admin_ops_keep_one_task() {
    let h = Harness::new(
        ListResolver::with_scripts(&[S1]).with_delay(Duration::from_secs(1)),
    );
    h.fetcher.set(S1, "x");
    let config = Arc::new(MemoryConfigStore::new());
    let svc = service(&h, config.clone());
    let url = TargetUrl::new(PAGE);
    svc.add_target(TargetConfig::new(PAGE, Duration::from_secs(60)))
        .await
        .unwrap();

    let mut ops = Vec::new();
    for i in 0..20u32 {
        let svc = svc.clone();
        let url = url.clone();
        ops.push(tokio::spawn(async move {
            match i % 4 {
                0 => {
                    let _ = svc
                        .edit_target(
                            TargetConfig::new(PAGE, Duration::from_secs(60))
                                .with_failure_threshold(i),
                        )
                        .await;
                }
                1 => {
                    let _ = svc.set_status(&url, TargetStatus::Disabled).await;
                }
                2 => {
                    let _ = svc.set_status(&url, TargetStatus::Active).await;
                }
                _ => {
                    let _ = svc
                        .add_target(TargetConfig::new(PAGE, Duration::from_secs(60)))
                        .await;
                }
            }
        }));
    }
    for op in ops {
        op.await.unwrap();
    }

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.resolver.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(svc.registry().len() <= 1);

    svc.remove_target(&url).await.unwrap();
    let calls = h.resolver.calls();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.resolver.calls(), calls);
    svc.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn list_targets_joins_live_state() {
    let h = Harness::new(ListResolver::with_scripts(&[S1]));
    h.fetcher.set(S1, "x");
    let config = Arc::new(MemoryConfigStore::new());
    let svc = service(&h, config);
    svc.add_target(TargetConfig::new("https://b.example", Duration::from_secs(3600)))
        .await
        .unwrap();
    svc.add_target(
        TargetConfig::new("https://a.example", Duration::from_secs(60))
            .with_status(TargetStatus::Disabled),
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let views = svc.list_targets().unwrap();
    assert_eq!(views.len(), 2);
    assert_eq!(views[0].url.as_str(), "https://a.example");
    assert!(!views[0].running);
    assert!(views[0].task.is_none());
    assert_eq!(views[1].interval_label, "Hourly");
    assert!(views[1].running);
    assert!(views[1].task.as_ref().unwrap().last_revision.is_some());

    let json = serde_json::to_value(&views[1]).unwrap();
    assert_eq!(json["interval"], 3600);
    assert_eq!(json["timeout"], 0);
    assert_eq!(json["status"], "active");
    svc.shutdown().await;
}

#[tokio::test]
async fn diff_of_unknown_revision_is_client_error() {
    let h = Harness::new(ListResolver::default());
    let svc = service(&h, Arc::new(MemoryConfigStore::new()));
    let err = svc
        .get_diff(&TargetUrl::new(PAGE), &RevisionId::new("abcdef"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RevisionNotFound(_)));
    assert!(err.is_client_error());
}
