// Periodic refresh scheduler
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// One repeating timer. The first tick fires one full period after `start`;
/// a tick still running when the next is due delays it rather than bursting.
pub struct RefreshScheduler {
    period: Duration,
    handle: JoinHandle<()>,
}

impl RefreshScheduler {
    pub fn start<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                debug!(target: "scheduler", period_ms = period.as_millis() as u64, "Refresh tick");
                tick().await;
            }
        });
        info!(target: "scheduler", period_ms = period.as_millis() as u64, "Refresh timer started");
        Self { period, handle }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stop(&self) {
        self.handle.abort();
        info!(target: "scheduler", "Refresh timer stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
