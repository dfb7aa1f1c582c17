//! Most-recent snapshot cache.
//!
//! Single writer, many readers: each publish swaps in a whole new
//! [`CacheState`], so readers never see two cycles mixed together and never
//! take a lock.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::model::{MetricsSnapshot, ProbeResult};

/// Everything one successful cycle produced.
#[derive(Debug, Clone, Serialize)]
pub struct CacheState {
    pub snapshot: MetricsSnapshot,
    pub probe_results: Vec<ProbeResult>,
    pub last_updated: DateTime<Utc>,
    /// Increments on every publish, starting at 1.
    pub generation: u64,
}

/// What a reader sees.
#[derive(Debug, Clone)]
pub enum CacheView {
    /// No cycle has completed yet.
    Unavailable,
    Ready(Arc<CacheState>),
}

impl CacheView {
    pub fn state(&self) -> Option<&Arc<CacheState>> {
        match self {
            CacheView::Unavailable => None,
            CacheView::Ready(state) => Some(state),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, CacheView::Ready(_))
    }
}

pub struct SnapshotCache {
    current: ArcSwapOption<CacheState>,
    generation: AtomicU64,
    /// Number of forced refreshes finished, guarded so only one runs at a time.
    refresh_gate: Mutex<u64>,
    refreshes_done: AtomicU64,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            refresh_gate: Mutex::new(0),
            refreshes_done: AtomicU64::new(0),
        }
    }

    /// Latest published state. Never blocks.
    pub fn read(&self) -> CacheView {
        match self.current.load_full() {
            Some(state) => CacheView::Ready(state),
            None => CacheView::Unavailable,
        }
    }

    /// Replace the cached state with the output of one cycle.
    pub fn publish(
        &self,
        snapshot: MetricsSnapshot,
        probe_results: Vec<ProbeResult>,
    ) -> Arc<CacheState> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let state = Arc::new(CacheState {
            snapshot,
            probe_results,
            last_updated: Utc::now(),
            generation,
        });
        self.current.store(Some(state.clone()));
        tracing::debug!("Published cache generation {}", generation);
        state
    }

    /// Run `refresh` out of band and return the resulting view.
    ///
    /// Callers that arrive while a forced refresh is running wait for it and
    /// share its outcome instead of starting their own.
    pub async fn force_refresh<F, Fut>(&self, refresh: F) -> CacheView
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let observed = self.refreshes_done.load(Ordering::Acquire);
        let mut done = self.refresh_gate.lock().await;

        if *done == observed {
            refresh().await;
            *done += 1;
            self.refreshes_done.store(*done, Ordering::Release);
        } else {
            tracing::debug!("Joined a forced refresh that was already in flight");
        }
        drop(done);

        self.read()
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}
