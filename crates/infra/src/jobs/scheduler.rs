//! Periodic airdrop scheduler.
//!
//! Every tick spawns an independent batch run. Runs are not serialized: a slow
//! mint can make two runs overlap, and the store's skip-locked claims keep
//! them on different recipients.
//!
//! The scheduler owns one store handle, connected on first use and shared by
//! every run until [`AirdropScheduler::stop`] closes it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::mint::Minter;
use crate::recipients::{RecipientStore, StoreConnector, StoreError};

use super::batch::{BatchProcessor, BatchReport};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum recipients per run.
    pub batch_size: usize,
    /// Time between runs.
    pub tick: Duration,
    /// Fire on multiples of `tick` since the Unix epoch (cron-style) instead
    /// of relative to `start()`.
    pub align_to_wall_clock: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            tick: Duration::from_secs(60),
            align_to_wall_clock: true,
        }
    }
}

impl SchedulerConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_wall_clock_alignment(mut self, align: bool) -> Self {
        self.align_to_wall_clock = align;
        self
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to connect recipient store: {0}")]
    Connect(#[source] StoreError),
}

/// Time from `now` until the next multiple of `period` since the Unix epoch.
pub fn delay_until_next_tick(now: SystemTime, period: Duration) -> Duration {
    let period_ms = period.as_millis();
    if period_ms == 0 {
        return Duration::ZERO;
    }
    let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    let remainder = since_epoch % period_ms;
    if remainder == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((period_ms - remainder) as u64)
    }
}

struct Shared<C: StoreConnector, M> {
    connector: C,
    minter: Arc<M>,
    config: SchedulerConfig,
    store: tokio::sync::Mutex<Option<Arc<C::Store>>>,
    in_flight: AtomicUsize,
    idle: Notify,
    shutdown: Notify,
}

/// Counts one batch run from store checkout until it ends, however it ends.
/// The last run out wakes a waiting `stop()`.
struct InFlight<'a> {
    count: &'a AtomicUsize,
    idle: &'a Notify,
}

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize, idle: &'a Notify) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self { count, idle }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl<C, M> Shared<C, M>
where
    C: StoreConnector,
    M: Minter + 'static,
{
    /// Check out the shared store, connecting if needed.
    ///
    /// The run is counted as in flight before the slot lock is released, so
    /// `stop()` (which holds that lock while draining) never closes a store
    /// a run has already been handed.
    async fn checkout(&self) -> Result<(Arc<C::Store>, InFlight<'_>), SchedulerError> {
        let mut slot = self.store.lock().await;
        let store = match slot.as_ref() {
            Some(store) => Arc::clone(store),
            None => {
                let store =
                    Arc::new(self.connector.connect().await.map_err(SchedulerError::Connect)?);
                info!("recipient store connected");
                *slot = Some(Arc::clone(&store));
                store
            }
        };
        Ok((store, InFlight::enter(&self.in_flight, &self.idle)))
    }

    async fn wait_idle(&self) {
        loop {
            // Registered before the check so a wakeup in between is not lost.
            let idle = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    async fn run_once(&self) -> Result<BatchReport, SchedulerError> {
        let (store, _guard) = self.checkout().await?;
        let processor = BatchProcessor::new(store, Arc::clone(&self.minter));
        Ok(processor.run_batch(self.config.batch_size).await)
    }

    async fn run_tick(&self) {
        if let Err(e) = self.run_once().await {
            error!(error = %e, "scheduled airdrop run failed; retrying next tick");
        }
    }
}

/// Runs [`BatchProcessor`] batches on a fixed cadence.
pub struct AirdropScheduler<C: StoreConnector, M> {
    shared: Arc<Shared<C, M>>,
    running: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl<C, M> AirdropScheduler<C, M>
where
    C: StoreConnector,
    M: Minter + 'static,
{
    pub fn new(connector: C, minter: Arc<M>, config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                minter,
                config,
                store: tokio::sync::Mutex::new(None),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                shutdown: Notify::new(),
            }),
            running: AtomicBool::new(false),
            ticker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Batch runs currently executing, scheduled or manual.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Run one batch now, outside the tick cadence.
    pub async fn run_once(&self) -> Result<BatchReport, SchedulerError> {
        self.shared.run_once().await
    }

    /// Start ticking. Returns `false` if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let config = &self.shared.config;
        let period = config.tick.max(Duration::from_millis(1));
        let first_delay = if config.align_to_wall_clock {
            delay_until_next_tick(SystemTime::now(), period)
        } else {
            period
        };
        info!(
            tick_secs = period.as_secs_f64(),
            batch_size = config.batch_size,
            first_run_in_secs = first_delay.as_secs_f64(),
            "airdrop scheduler started"
        );

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + first_delay, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut runs = JoinSet::new();

            loop {
                tokio::select! {
                    _ = shared.shutdown.notified() => break,
                    _ = interval.tick() => {
                        debug!(in_flight = runs.len(), "tick");
                        let shared = Arc::clone(&shared);
                        runs.spawn(async move { shared.run_tick().await });
                    }
                    Some(joined) = runs.join_next(), if !runs.is_empty() => {
                        if let Err(e) = joined {
                            error!(error = %e, "airdrop run panicked");
                        }
                    }
                }
            }

            if !runs.is_empty() {
                info!(in_flight = runs.len(), "waiting for in-flight airdrop runs");
            }
            while let Some(joined) = runs.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "airdrop run panicked");
                }
            }
        });

        *self.ticker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    /// Stop ticking, wait for in-flight runs, then close the store.
    ///
    /// Runs are allowed to finish; nothing is cancelled. This includes
    /// manual [`run_once`](Self::run_once) calls, and any run that starts
    /// while `stop()` is draining waits and then connects afresh. Safe to
    /// call when not running.
    pub async fn stop(&self) {
        let handle = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            self.shared.shutdown.notify_one();
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler loop ended abnormally");
            }
        }
        self.running.store(false, Ordering::SeqCst);

        let mut slot = self.shared.store.lock().await;
        if self.in_flight() > 0 {
            info!(in_flight = self.in_flight(), "waiting for manual airdrop runs");
        }
        self.shared.wait_idle().await;
        if let Some(store) = slot.take() {
            store.close().await;
            info!("recipient store closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;

    use airdrop_core::{AirdropStatus, Recipient, WalletAddress};

    use crate::mint::{MintBehavior, ScriptedMinter};
    use crate::recipients::InMemoryRecipientStore;

    const TICK: Duration = Duration::from_secs(60);

    fn config(batch_size: usize) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_batch_size(batch_size)
            .with_tick(TICK)
            .with_wall_clock_alignment(false)
    }

    fn seed_pending(store: &InMemoryRecipientStore, n: usize) {
        for i in 0..n {
            let mut r = Recipient::register(
                WalletAddress::parse(format!("0xw{i}")).unwrap(),
                Utc::now(),
            );
            r.airdrop_status = AirdropStatus::Pending;
            store.seed(r).unwrap();
        }
    }

    async fn completed(store: &InMemoryRecipientStore) -> u64 {
        store
            .snapshot()
            .iter()
            .filter(|r| r.airdrop_status == AirdropStatus::Completed)
            .count() as u64
    }

    /// Fails the first `failures` connects.
    struct FlakyConnector {
        store: InMemoryRecipientStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl StoreConnector for FlakyConnector {
        type Store = InMemoryRecipientStore;

        async fn connect(&self) -> Result<InMemoryRecipientStore, StoreError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Connection("database unavailable".to_string()));
            }
            self.store.connect().await
        }
    }

    #[test]
    fn next_tick_aligns_to_period_boundaries() {
        let at = |secs| UNIX_EPOCH + Duration::from_secs(secs);
        assert_eq!(delay_until_next_tick(at(125), TICK), Duration::from_secs(55));
        assert_eq!(delay_until_next_tick(at(120), TICK), Duration::ZERO);
        assert_eq!(
            delay_until_next_tick(at(59) + Duration::from_millis(500), TICK),
            Duration::from_millis(500)
        );
        assert_eq!(delay_until_next_tick(at(7), Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let store = InMemoryRecipientStore::new();
        let minter = Arc::new(ScriptedMinter::default());
        let scheduler = AirdropScheduler::new(store, minter, config(20));

        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert!(scheduler.is_running());

        scheduler.stop().await;
        assert!(!scheduler.is_running());
        scheduler.stop().await;

        assert!(scheduler.start());
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn each_tick_processes_one_capped_batch() {
        let store = InMemoryRecipientStore::new();
        seed_pending(&store, 5);
        let minter = Arc::new(ScriptedMinter::default());
        let scheduler = AirdropScheduler::new(store.clone(), minter, config(3));

        scheduler.start();
        tokio::time::sleep(TICK - Duration::from_secs(1)).await;
        assert_eq!(completed(&store).await, 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(completed(&store).await, 3);

        tokio::time::sleep(TICK).await;
        assert_eq!(completed(&store).await, 5);
        assert_eq!(store.connect_count(), 1);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_runs_overlap_without_double_minting() {
        let store = InMemoryRecipientStore::new();
        seed_pending(&store, 2);
        let minter = Arc::new(ScriptedMinter::default().with_delay(Duration::from_secs(90)));
        let scheduler = AirdropScheduler::new(store.clone(), Arc::clone(&minter), config(1));

        scheduler.start();
        tokio::time::sleep(2 * TICK + Duration::from_secs(1)).await;
        assert_eq!(scheduler.in_flight(), 2);
        assert_eq!(store.locked_count(), 2);

        tokio::time::sleep(2 * TICK).await;
        scheduler.stop().await;

        assert_eq!(completed(&store).await, 2);
        assert_eq!(minter.calls_for("0xw0"), 1);
        assert_eq!(minter.calls_for("0xw1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_run_then_closes_store() {
        let store = InMemoryRecipientStore::new();
        seed_pending(&store, 1);
        let minter = Arc::new(ScriptedMinter::default().with_delay(Duration::from_secs(30)));
        let scheduler = AirdropScheduler::new(store.clone(), minter, config(20));

        let started = Instant::now();
        scheduler.start();
        tokio::time::sleep(TICK + Duration::from_secs(1)).await;
        assert_eq!(scheduler.in_flight(), 1);

        scheduler.stop().await;

        assert!(started.elapsed() >= TICK + Duration::from_secs(30));
        assert_eq!(scheduler.in_flight(), 0);
        assert_eq!(completed(&store).await, 1);
        assert!(store.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_manual_run_before_closing_store() {
        let store = InMemoryRecipientStore::new();
        seed_pending(&store, 5);
        let minter = Arc::new(ScriptedMinter::default().with_delay(Duration::from_secs(10)));
        let scheduler = Arc::new(AirdropScheduler::new(store.clone(), minter, config(20)));

        let manual = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.run_once().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.in_flight(), 1);

        scheduler.stop().await;
        assert_eq!(scheduler.in_flight(), 0);
        assert!(store.is_closed());

        let report = manual.await.unwrap().unwrap();
        assert_eq!(report.completed, 5);
        assert_eq!(report.processed, 5);
        assert_eq!(completed(&store).await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn run_started_during_stop_gets_a_fresh_store() {
        let store = InMemoryRecipientStore::new();
        seed_pending(&store, 2);
        let minter = Arc::new(ScriptedMinter::default().with_delay(Duration::from_secs(10)));
        let scheduler = Arc::new(AirdropScheduler::new(store.clone(), minter, config(1)));

        let first = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.run_once().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        let stopping = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.stop().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        let late = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.run_once().await }
        });

        stopping.await.unwrap();
        assert_eq!(first.await.unwrap().unwrap().completed, 1);
        assert_eq!(late.await.unwrap().unwrap().completed, 1);
        assert_eq!(store.connect_count(), 2);
        assert_eq!(completed(&store).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_is_retried_on_the_next_tick() {
        let store = InMemoryRecipientStore::new();
        seed_pending(&store, 2);
        let connector = FlakyConnector {
            store: store.clone(),
            failures: AtomicUsize::new(1),
        };
        let minter = Arc::new(ScriptedMinter::default());
        let scheduler = AirdropScheduler::new(connector, minter, config(20));

        scheduler.start();
        tokio::time::sleep(TICK + Duration::from_secs(1)).await;
        assert_eq!(completed(&store).await, 0);
        assert!(scheduler.is_running());

        tokio::time::sleep(TICK).await;
        assert_eq!(completed(&store).await, 2);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn run_once_connects_lazily_and_reconnects_after_stop() {
        let store = InMemoryRecipientStore::new();
        seed_pending(&store, 1);
        let minter = Arc::new(ScriptedMinter::new(MintBehavior::Refuse));
        let scheduler = AirdropScheduler::new(store.clone(), minter, config(20));
        assert_eq!(store.connect_count(), 0);

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.errored, 1);
        assert_eq!(store.connect_count(), 1);

        scheduler.stop().await;
        assert!(store.is_closed());

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report, BatchReport::default());
        assert_eq!(store.connect_count(), 2);
        assert!(!store.is_closed());
    }

    #[tokio::test]
    async fn run_once_reports_connect_failure() {
        let connector = FlakyConnector {
            store: InMemoryRecipientStore::new(),
            failures: AtomicUsize::new(1),
        };
        let minter = Arc::new(ScriptedMinter::default());
        let scheduler = AirdropScheduler::new(connector, minter, config(20));

        let err = scheduler.run_once().await.unwrap_err();
        assert!(matches!(err, SchedulerError::Connect(StoreError::Connection(_))));
        assert_eq!(scheduler.in_flight(), 0);
    }
}
