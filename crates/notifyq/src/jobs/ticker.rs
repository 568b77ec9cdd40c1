use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Restartable periodic tick source.
///
/// `tick` never resolves while the ticker is stopped.
#[async_trait]
pub trait Ticker: Send {
    fn start(&mut self);
    fn stop(&mut self);
    async fn tick(&mut self) -> DateTime<Utc>;
}

pub struct IntervalTicker {
    period: Duration,
    interval: Option<Interval>,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            interval: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    fn start(&mut self) {
        // First tick one full period after start, not immediately.
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    fn stop(&mut self) {
        self.interval = None;
    }

    async fn tick(&mut self) -> DateTime<Utc> {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
                Utc::now()
            }
            None => std::future::pending().await,
        }
    }
}

/// Test-driven ticker: each time pushed through its [`ManualTickerHandle`]
/// becomes one tick.
pub struct ManualTicker {
    running: Arc<AtomicBool>,
    rx: mpsc::UnboundedReceiver<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct ManualTickerHandle {
    running: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<DateTime<Utc>>,
}

impl ManualTicker {
    pub fn new() -> (ManualTickerHandle, ManualTicker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(false));
        (
            ManualTickerHandle {
                running: running.clone(),
                tx,
            },
            ManualTicker { running, rx },
        )
    }
}

impl ManualTickerHandle {
    pub fn tick_at(&self, at: DateTime<Utc>) {
        let _ = self.tx.send(at);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    fn start(&mut self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn tick(&mut self) -> DateTime<Utc> {
        if !self.running.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        match self.rx.recv().await {
            Some(at) => at,
            None => std::future::pending().await,
        }
    }
}
