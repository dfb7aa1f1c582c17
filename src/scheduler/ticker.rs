//! Tick sources for the refresh loop.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

/// Something that says when the next cycle should run.
#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next tick. Returns false once no more ticks will come.
    async fn tick(&mut self) -> bool;
}

/// Fixed-interval ticker. The first tick completes immediately.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Ticker driven by messages on a channel, for deterministic tests.
pub struct ChannelTicker {
    rx: mpsc::Receiver<()>,
}

impl ChannelTicker {
    pub fn new(rx: mpsc::Receiver<()>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl Ticker for ChannelTicker {
    async fn tick(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticker_first_tick_is_immediate() {
        let mut ticker = IntervalTicker::new(Duration::from_secs(10));
        let start = tokio::time::Instant::now();

        assert!(ticker.tick().await);
        assert_eq!(start.elapsed(), Duration::ZERO);

        assert!(ticker.tick().await);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_channel_ticker_ends_when_sender_dropped() {
        let (tx, rx) = mpsc::channel(1);
        let mut ticker = ChannelTicker::new(rx);

        tx.send(()).await.unwrap();
        assert!(ticker.tick().await);
        drop(tx);
        assert!(!ticker.tick().await);
    }
}
