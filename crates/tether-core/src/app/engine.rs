//! QueueEngine - tick の実行と定期タイマー
//!
//! # Tick の流れ
//! 1. store から全 item を読む（失敗したらログを出してこの tick は終了）
//! 2. Scheduler で eligible な item を batch に分ける
//! 3. batch ごとに: in-flight に登録 → 並行実行 → 全結果を待つ → 結果を反映 → in-flight から外す
//!
//! in-flight の登録は `InFlightBatch` が持ちます。tick の future が途中で drop されても
//! id は外れ、走っている handler task は abort されます。
//!
//! # 不変条件
//! - 同時に走る tick は 1 つだけ（2 つ目は `TickReport::skipped()` で即 return）
//! - in-flight の item は再 dispatch されない
//! - `clear()` 後に完了した item の結果は捨てる（store に書き戻さない）
//!
//! tick の中からエラーは漏れません。store / handler の失敗はログと状態遷移になります。

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::executor::{DispatchOutcome, Executor};
use crate::domain::{FailureDisposition, ItemId, QueueItem};
use crate::ports::{Clock, DurableStore, FailureReporter, StorageError};
use crate::queue::{BackoffPolicy, ConfigError, QueueConfig, Scheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Ticking,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub dispatched: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub abandoned: usize,
    /// Another tick was already running; nothing was done.
    pub skipped: bool,
}

impl TickReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.dispatched == 0
    }
}

struct EngineInner {
    store: Arc<dyn DurableStore>,
    executor: Executor,
    scheduler: Scheduler,
    policy: BackoffPolicy,
    reporter: Arc<dyn FailureReporter>,
    clock: Arc<dyn Clock>,
    ticking: AtomicBool,
    in_flight: Mutex<HashSet<ItemId>>,
    /// Ids deleted by `clear()` since the current tick began. Held while outcomes are applied.
    cleared: AsyncMutex<HashSet<ItemId>>,
}

/// Releases the reentrancy flag even if the tick future is dropped mid-way.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One batch's entries in the in-flight set, removed on drop.
struct InFlightBatch<'a> {
    set: &'a Mutex<HashSet<ItemId>>,
    ids: Vec<ItemId>,
    tasks: Vec<AbortHandle>,
}

impl<'a> InFlightBatch<'a> {
    fn register(set: &'a Mutex<HashSet<ItemId>>, batch: &[QueueItem]) -> Self {
        let ids: Vec<ItemId> = batch.iter().map(|item| item.id).collect();
        set.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids.iter().copied());
        Self {
            set,
            ids,
            tasks: Vec::new(),
        }
    }
}

impl Drop for InFlightBatch<'_> {
    fn drop(&mut self) {
        // no-op for tasks that already finished
        for task in &self.tasks {
            task.abort();
        }
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        for id in &self.ids {
            set.remove(id);
        }
    }
}

struct Timer {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

pub struct QueueEngine {
    inner: Arc<EngineInner>,
    tick_interval: Duration,
    timer: Mutex<Option<Timer>>,
}

impl QueueEngine {
    pub fn new(
        store: Arc<dyn DurableStore>,
        executor: Executor,
        reporter: Arc<dyn FailureReporter>,
        clock: Arc<dyn Clock>,
        config: &QueueConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let inner = EngineInner {
            store,
            executor,
            scheduler: Scheduler::new(config.concurrency)?,
            policy: config.backoff_policy(),
            reporter,
            clock,
            ticking: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
            cleared: AsyncMutex::new(HashSet::new()),
        };
        Ok(Self {
            inner: Arc::new(inner),
            tick_interval: config.tick_interval(),
            timer: Mutex::new(None),
        })
    }

    /// Run one tick now. Returns `TickReport::skipped()` if a tick is already running.
    pub async fn tick(&self) -> TickReport {
        self.inner.tick().await
    }

    pub fn state(&self) -> EngineState {
        if self.inner.ticking.load(Ordering::Acquire) {
            EngineState::Ticking
        } else {
            EngineState::Idle
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight_ids().len()
    }

    pub fn in_flight_ids(&self) -> HashSet<ItemId> {
        self.inner.in_flight_ids()
    }

    /// Delete every persisted item. Dispatches already running finish, but their outcome is dropped.
    ///
    /// If a delete fails, only the items deleted before it are treated as cleared.
    pub async fn clear(&self) -> Result<usize, StorageError> {
        let mut cleared = self.inner.cleared.lock().await;

        let items = self.inner.store.get_all().await?;
        for item in &items {
            self.inner.store.delete(&item.id).await?;
            cleared.insert(item.id);
        }
        info!(removed = items.len(), "queue cleared");
        Ok(items.len())
    }

    /// Start the periodic timer. Calling it while the timer runs is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut slot = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = slot.as_ref()
            && !timer.join.is_finished()
        {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(timer_loop(
            Arc::downgrade(&self.inner),
            self.tick_interval,
            shutdown_rx,
        ));
        *slot = Some(Timer { shutdown_tx, join });
        info!(
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            "queue timer started"
        );
    }

    /// Stop the timer and wait for a running tick to finish. Persisted items are untouched.
    pub async fn stop(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            // ignore send error: the loop may already be gone
            let _ = timer.shutdown_tx.send(true);
            if let Err(e) = timer.join.await {
                warn!(error = %e, "queue timer task ended abnormally");
            }
            info!("queue timer stopped");
        }

        if !self.inner.ticking.load(Ordering::Acquire) {
            self.inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|timer| !timer.join.is_finished())
    }
}

impl EngineInner {
    fn in_flight_ids(&self) -> HashSet<ItemId> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[instrument(level = "debug", skip(self))]
    async fn tick(&self) -> TickReport {
        if self
            .ticking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("tick already running; skipped");
            return TickReport::skipped();
        }
        let _guard = TickGuard(&self.ticking);

        // only one tick runs, so nothing from an earlier tick is still in flight
        self.cleared.lock().await.clear();
        let items = match self.store.get_all().await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "failed to load queue items; tick aborted");
                return TickReport::default();
            }
        };

        let now = self.clock.now();
        let batches = self.scheduler.plan(items, &self.in_flight_ids(), now);

        let mut report = TickReport::default();
        for batch in batches {
            let batch: Vec<QueueItem> = {
                let cleared = self.cleared.lock().await;
                batch
                    .into_iter()
                    .filter(|item| !cleared.contains(&item.id))
                    .collect()
            };
            if batch.is_empty() {
                debug!("batch cleared before dispatch");
                continue;
            }

            let mut registered = InFlightBatch::register(&self.in_flight, &batch);
            report.dispatched += batch.len();
            let outcomes = self.dispatch_batch(batch, &mut registered).await;

            let cleared = self.cleared.lock().await;
            for (item, outcome) in outcomes {
                if cleared.contains(&item.id) {
                    debug!(item_id = %item.id, "outcome discarded after clear");
                    continue;
                }
                self.apply(item, outcome, &mut report).await;
            }
            drop(registered);
        }

        if !report.is_idle() {
            debug!(
                dispatched = report.dispatched,
                succeeded = report.succeeded,
                retried = report.retried,
                abandoned = report.abandoned,
                "tick finished"
            );
        }
        report
    }

    /// Runs every item of the batch concurrently and waits for all of them.
    async fn dispatch_batch(
        &self,
        batch: Vec<QueueItem>,
        registered: &mut InFlightBatch<'_>,
    ) -> Vec<(QueueItem, DispatchOutcome)> {
        let handles: Vec<(QueueItem, JoinHandle<DispatchOutcome>)> = batch
            .into_iter()
            .map(|item| {
                let executor = self.executor.clone();
                let owned = item.clone();
                let handle = tokio::spawn(async move { executor.execute(&owned).await });
                registered.tasks.push(handle.abort_handle());
                (item, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (item, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "handler task did not complete");
                    let reason = if e.is_panic() {
                        "handler panicked"
                    } else {
                        "handler task was cancelled"
                    };
                    DispatchOutcome::Failed(reason.to_string())
                }
            };
            outcomes.push((item, outcome));
        }
        outcomes
    }

    async fn apply(&self, mut item: QueueItem, outcome: DispatchOutcome, report: &mut TickReport) {
        let error = match outcome {
            DispatchOutcome::Succeeded => {
                report.succeeded += 1;
                match self.store.delete(&item.id).await {
                    Ok(()) => debug!(item_id = %item.id, kind = item.kind.type_name(), "item completed"),
                    Err(e) => warn!(item_id = %item.id, error = %e, "failed to delete completed item"),
                }
                return;
            }
            DispatchOutcome::Failed(error) => error,
        };

        match item.record_failure(self.clock.now(), error.as_str(), &self.policy) {
            FailureDisposition::Retry => {
                report.retried += 1;
                match self.store.put(&item).await {
                    Ok(()) => info!(
                        item_id = %item.id,
                        kind = item.kind.type_name(),
                        attempt = item.attempt_count,
                        backoff_ms = item.backoff_delay.as_millis() as u64,
                        error = %error,
                        "item failed; retry scheduled"
                    ),
                    Err(e) => warn!(
                        item_id = %item.id,
                        error = %e,
                        "failed to persist retry state; previous record kept"
                    ),
                }
            }
            FailureDisposition::Abandon => {
                report.abandoned += 1;
                match self.store.delete(&item.id).await {
                    Ok(()) => self.reporter.report(&item, &error),
                    Err(e) => warn!(
                        item_id = %item.id,
                        error = %e,
                        "failed to delete abandoned item; it will be retried"
                    ),
                }
            }
        }
    }
}

async fn timer_loop(
    inner: Weak<EngineInner>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // engine dropped
                    break;
                }
                continue;
            }
            _ = interval.tick() => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        // outside select: stop waits for a running tick instead of cancelling it
        inner.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ApiCallPayload, ItemKind, Priority};
    use crate::handlers::{ApiCallHandler, HandlerError, HandlerRegistry};
    use crate::impls::InMemoryStore;
    use crate::ports::{ChannelReporter, ManualClock};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;
    use ulid::Ulid;

    /// Blocks every call until released.
    struct GatedApi {
        started: Arc<AtomicUsize>,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl ApiCallHandler for GatedApi {
        async fn call(&self, _payload: &ApiCallPayload) -> Result<(), HandlerError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(())
        }
    }

    struct PanickingApi;

    #[async_trait]
    impl ApiCallHandler for PanickingApi {
        async fn call(&self, _payload: &ApiCallPayload) -> Result<(), HandlerError> {
            panic!("boom");
        }
    }

    /// First call never returns; later calls succeed.
    #[derive(Default)]
    struct StuckOnceApi {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ApiCallHandler for StuckOnceApi {
        async fn call(&self, _payload: &ApiCallPayload) -> Result<(), HandlerError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    /// In-memory store whose deletes can be switched to fail.
    #[derive(Default)]
    struct FlakyDeleteStore {
        inner: InMemoryStore,
        fail_deletes: AtomicBool,
    }

    #[async_trait]
    impl DurableStore for FlakyDeleteStore {
        async fn put(&self, item: &QueueItem) -> Result<(), StorageError> {
            self.inner.put(item).await
        }

        async fn get_all(&self) -> Result<Vec<QueueItem>, StorageError> {
            self.inner.get_all().await
        }

        async fn delete(&self, id: &ItemId) -> Result<(), StorageError> {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(StorageError::Backend("disk full".into()));
            }
            self.inner.delete(id).await
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap(),
        ))
    }

    fn item(seq: u64, clock: &ManualClock) -> QueueItem {
        QueueItem::new(
            ItemId::from_ulid(Ulid::new()),
            ItemKind::ApiCall(ApiCallPayload::new("POST", "/shifts")),
            Priority::Medium,
            3,
            clock.now(),
            seq,
            Duration::from_millis(1000),
        )
    }

    fn engine(
        store: Arc<dyn DurableStore>,
        api: impl ApiCallHandler + 'static,
        clock: Arc<ManualClock>,
    ) -> QueueEngine {
        let registry = HandlerRegistry::builder()
            .api_call(api)
            .unwrap()
            .build()
            .unwrap();
        let (reporter, _rx) = ChannelReporter::new();
        QueueEngine::new(
            store,
            Executor::new(registry),
            Arc::new(reporter),
            clock,
            &QueueConfig::default(),
        )
        .unwrap()
    }

    async fn wait_until(started: &AtomicUsize, n: usize) {
        while started.load(Ordering::SeqCst) < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn second_tick_is_skipped_while_first_runs() {
        let clock = clock();
        let store = Arc::new(InMemoryStore::new());
        store.put(&item(0, &clock)).await.unwrap();

        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let engine = Arc::new(engine(
            Arc::clone(&store) as Arc<dyn DurableStore>,
            GatedApi {
                started: Arc::clone(&started),
                gate: Arc::clone(&gate),
            },
            clock,
        ));

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.tick().await }
        });
        wait_until(&started, 1).await;

        assert_eq!(engine.state(), EngineState::Ticking);
        assert_eq!(engine.in_flight_count(), 1);
        assert!(engine.tick().await.skipped);

        gate.notify_one();
        let report = first.await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.in_flight_count(), 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn clear_during_dispatch_discards_outcome() {
        let clock = clock();
        let store = Arc::new(InMemoryStore::new());
        store.put(&item(0, &clock)).await.unwrap();

        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let engine = Arc::new(engine(
            Arc::clone(&store) as Arc<dyn DurableStore>,
            GatedApi {
                started: Arc::clone(&started),
                gate: Arc::clone(&gate),
            },
            clock,
        ));

        let running = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.tick().await }
        });
        wait_until(&started, 1).await;

        assert_eq!(engine.clear().await.unwrap(), 1);
        gate.notify_one();
        let report = running.await.unwrap();

        assert_eq!(report.dispatched, 1);
        assert_eq!(report.succeeded, 0);
        assert!(store.is_empty().await);
        assert_eq!(engine.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn panicking_handler_counts_as_failure() {
        let clock = clock();
        let store = Arc::new(InMemoryStore::new());
        let it = item(0, &clock);
        store.put(&it).await.unwrap();

        let engine = engine(Arc::clone(&store) as Arc<dyn DurableStore>, PanickingApi, clock);
        let report = engine.tick().await;
        assert_eq!(report.retried, 1);

        let stored = store.get_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].attempt_count, 1);
        assert_eq!(stored[0].last_error.as_deref(), Some("handler panicked"));
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_halts() {
        let clock = clock();
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store, PanickingApi, clock);

        assert!(!engine.is_running());
        engine.start();
        engine.start();
        assert!(engine.is_running());

        engine.stop().await;
        assert!(!engine.is_running());
        // stopping twice is harmless
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ticks_after_each_interval() {
        let clock = clock();
        let store = Arc::new(InMemoryStore::new());
        store.put(&item(0, &clock)).await.unwrap();

        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        // release permits up front so the handler never blocks
        gate.notify_one();
        let engine = engine(
            Arc::clone(&store) as Arc<dyn DurableStore>,
            GatedApi {
                started: Arc::clone(&started),
                gate,
            },
            clock,
        );

        engine.start();
        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(started.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        wait_until(&started, 1).await;
        engine.stop().await;
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_tick_releases_its_items() {
        let clock = clock();
        let store = Arc::new(InMemoryStore::new());
        store.put(&item(0, &clock)).await.unwrap();

        let engine = engine(Arc::clone(&store) as Arc<dyn DurableStore>, StuckOnceApi::default(), clock);
        let abandoned = tokio::time::timeout(Duration::from_millis(50), engine.tick()).await;
        assert!(abandoned.is_err());
        assert_eq!(engine.in_flight_count(), 0);
        assert_eq!(engine.state(), EngineState::Idle);

        let report = engine.tick().await;
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.succeeded, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn stop_without_timer_leaves_nothing_in_flight() {
        let clock = clock();
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store, PanickingApi, clock);

        engine.stop().await;
        assert!(!engine.is_running());
        assert_eq!(engine.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn failed_clear_keeps_outcomes_of_undeleted_items() {
        let clock = clock();
        let store = Arc::new(FlakyDeleteStore::default());
        store.put(&item(0, &clock)).await.unwrap();

        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let engine = Arc::new(engine(
            Arc::clone(&store) as Arc<dyn DurableStore>,
            GatedApi {
                started: Arc::clone(&started),
                gate: Arc::clone(&gate),
            },
            clock,
        ));

        let running = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.tick().await }
        });
        wait_until(&started, 1).await;

        store.fail_deletes.store(true, Ordering::SeqCst);
        assert!(engine.clear().await.is_err());
        store.fail_deletes.store(false, Ordering::SeqCst);

        gate.notify_one();
        let report = running.await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.succeeded, 1);
        assert!(store.inner.is_empty().await);
    }
}
