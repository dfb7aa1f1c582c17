//! Scheduler module driving the periodic refresh cycle.

mod ticker;

pub use ticker::*;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheView, SnapshotCache};
use crate::metrics::MetricsCollector;
use crate::model::{DynamicFacts, StaticFacts, Target};
use crate::normalize::Normalizer;
use crate::probe::{ProbeSettings, Prober};

/// Errors that abort a whole cycle. The cache is left untouched.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("refresh cycle exceeded {0:?}")]
    TimedOut(Duration),
}

/// Where the scheduler is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    Idle,
    Collecting,
    Publishing,
}

impl CycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => CycleState::Collecting,
            2 => CycleState::Publishing,
            _ => CycleState::Idle,
        }
    }
}

/// Timing knobs for the refresh loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub collect_timeout: Duration,
    /// Fixed limit for one cycle. `None` derives it from the target list.
    pub cycle_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
    pub probe: ProbeSettings,
}

impl SchedulerSettings {
    /// Limit for one cycle over `target_count` targets.
    ///
    /// The derived limit covers the static fetch, then dynamic collection
    /// running alongside every probe batch.
    pub fn cycle_limit(&self, target_count: usize) -> Duration {
        self.cycle_timeout.unwrap_or_else(|| {
            self.collect_timeout * 2 + self.probe.worst_case(target_count)
        })
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            collect_timeout: Duration::from_secs(5),
            cycle_timeout: None,
            shutdown_grace: Duration::from_secs(5),
            probe: ProbeSettings::default(),
        }
    }
}

/// Runs collection and probing cycles and publishes them into the cache.
pub struct Scheduler {
    targets: Vec<Target>,
    collector: Arc<dyn MetricsCollector>,
    prober: Prober,
    cache: Arc<SnapshotCache>,
    settings: SchedulerSettings,
    static_facts: OnceCell<(StaticFacts, Normalizer)>,
    last_dynamic: Mutex<Option<DynamicFacts>>,
    cycle_lock: tokio::sync::Mutex<()>,
    state: AtomicU8,
}

impl Scheduler {
    pub fn new(
        targets: Vec<Target>,
        collector: Arc<dyn MetricsCollector>,
        prober: Prober,
        cache: Arc<SnapshotCache>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            targets,
            collector,
            prober,
            cache,
            settings,
            static_facts: OnceCell::new(),
            last_dynamic: Mutex::new(None),
            cycle_lock: tokio::sync::Mutex::new(()),
            state: AtomicU8::new(CycleState::Idle as u8),
        }
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn state(&self) -> CycleState {
        CycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: CycleState) {
        self.state.store(state as u8, Ordering::Release);
        tracing::trace!("Scheduler state -> {:?}", state);
    }

    /// Static facts and the normalizer derived from them, fetched once.
    async fn host(&self) -> &(StaticFacts, Normalizer) {
        self.static_facts
            .get_or_init(|| async move {
                let collect = self.collector.collect_static();
                let limit = self.settings.collect_timeout;
                let facts = match tokio::time::timeout(limit, collect).await {
                    Ok(Ok(facts)) => facts,
                    Ok(Err(e)) => {
                        tracing::warn!("Static host facts unavailable, using defaults: {}", e);
                        StaticFacts::unknown()
                    }
                    Err(_) => {
                        tracing::warn!("Static host facts timed out, using defaults");
                        StaticFacts::unknown()
                    }
                };
                let normalizer = Normalizer::for_host(&facts);
                (facts, normalizer)
            })
            .await
    }

    /// Gather dynamic facts, falling back to the previous ones on failure.
    async fn dynamic_facts(&self) -> DynamicFacts {
        let collect = self.collector.collect_dynamic();
        let outcome = tokio::time::timeout(self.settings.collect_timeout, collect).await;
        let mut last = self
            .last_dynamic
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match outcome {
            Ok(Ok(facts)) => {
                *last = Some(facts.clone());
                facts
            }
            Ok(Err(e)) => {
                tracing::warn!("Metrics collection failed, reusing previous values: {}", e);
                last.clone().unwrap_or_default()
            }
            Err(_) => {
                tracing::warn!(
                    "Metrics collection timed out after {:?}, reusing previous values",
                    self.settings.collect_timeout
                );
                last.clone().unwrap_or_default()
            }
        }
    }

    async fn collect_and_publish(&self) {
        self.set_state(CycleState::Collecting);
        let (facts, normalizer) = self.host().await;

        let (dynamic, results) = tokio::join!(
            self.dynamic_facts(),
            self.prober.probe(&self.targets, &self.settings.probe)
        );

        self.set_state(CycleState::Publishing);
        let snapshot = normalizer.snapshot(facts, dynamic);
        let results = normalizer.normalize_results(results);
        self.cache.publish(snapshot, results);
    }

    /// Run one full cycle. Cycles never overlap.
    pub async fn run_cycle(&self) -> Result<(), CycleError> {
        let _guard = self.cycle_lock.lock().await;
        let started = Instant::now();
        let limit = self.settings.cycle_limit(self.targets.len());

        let outcome = tokio::time::timeout(limit, self.collect_and_publish()).await;
        self.set_state(CycleState::Idle);

        match outcome {
            Ok(()) => {
                tracing::debug!(
                    "Refresh cycle for {} targets finished in {:?}",
                    self.targets.len(),
                    started.elapsed()
                );
                Ok(())
            }
            Err(_) => Err(CycleError::TimedOut(limit)),
        }
    }

    async fn run_cycle_logged(&self) {
        if let Err(e) = self.run_cycle().await {
            tracing::warn!("Refresh cycle aborted, keeping previous cache: {}", e);
        }
    }

    /// Run an out-of-band cycle on behalf of a reader. Concurrent callers
    /// share a single cycle.
    pub async fn force_refresh(&self) -> CacheView {
        self.cache.force_refresh(move || self.run_cycle_logged()).await
    }

    /// Run cycles on the configured interval until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let ticker = IntervalTicker::new(self.settings.interval);
        self.run_with(ticker, shutdown).await;
    }

    /// Run cycles whenever `ticker` fires until `shutdown` fires or the
    /// ticker is exhausted.
    pub async fn run_with<T: Ticker>(&self, mut ticker: T, shutdown: CancellationToken) {
        tracing::info!(
            "Starting scheduler with {} targets every {:?}",
            self.targets.len(),
            self.settings.interval
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                tick = ticker.tick() => {
                    if !tick {
                        break;
                    }
                }
            }

            let cycle = self.run_cycle_logged();
            tokio::pin!(cycle);
            tokio::select! {
                _ = &mut cycle => {}
                _ = shutdown.cancelled() => {
                    let grace = self.settings.shutdown_grace;
                    if tokio::time::timeout(grace, &mut cycle).await.is_err() {
                        tracing::warn!(
                            "Abandoning in-flight cycle after {:?} shutdown grace",
                            self.settings.shutdown_grace
                        );
                    }
                    break;
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }
}
