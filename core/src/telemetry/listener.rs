// Telemetry listener task with reconnect state machine
//
//   Connecting --ok--> Open --feed ends--> Closed --backoff--> Connecting
//        \--err--> Error --backoff--> Connecting
//
// The task runs until `stop()` aborts it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ConnectionState, TelemetryConnector, TelemetrySource};
use crate::config::BackoffConfig;

/// Receives raw feed messages and connection state transitions
#[async_trait]
pub trait TelemetryHandler: Send + Sync {
    async fn on_message(&self, source: TelemetrySource, raw: String);
    async fn on_state(&self, source: TelemetrySource, state: ConnectionState);
}

/// Exponential backoff, capped, reset after a successful open
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt; grows with each call
    pub fn next_delay(&mut self) -> Duration {
        let factor = self.config.multiplier.max(1.0).powi(self.attempt as i32);
        let ms = (self.config.initial_ms as f64 * factor).min(self.config.max_ms as f64);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(ms as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

pub struct TelemetryListener {
    source: TelemetrySource,
    endpoint: String,
    state: Arc<Mutex<ConnectionState>>,
    handle: JoinHandle<()>,
}

impl TelemetryListener {
    pub fn spawn(
        source: TelemetrySource,
        endpoint: String,
        connector: Arc<dyn TelemetryConnector>,
        backoff: BackoffConfig,
        handler: Arc<dyn TelemetryHandler>,
    ) -> Self {
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));
        let task_state = Arc::clone(&state);
        let task_endpoint = endpoint.clone();

        let handle = tokio::spawn(async move {
            let mut backoff = Backoff::new(backoff);
            let set_state = |next: ConnectionState| {
                if let Ok(mut current) = task_state.lock() {
                    *current = next;
                }
            };

            loop {
                set_state(ConnectionState::Connecting);
                handler.on_state(source, ConnectionState::Connecting).await;

                match connector.connect(&task_endpoint).await {
                    Ok(mut rx) => {
                        info!(target: "telemetry", source = %source, endpoint = %task_endpoint, "Telemetry feed open");
                        set_state(ConnectionState::Open);
                        handler.on_state(source, ConnectionState::Open).await;
                        backoff.reset();

                        while let Some(raw) = rx.recv().await {
                            handler.on_message(source, raw).await;
                        }

                        warn!(target: "telemetry", source = %source, "Telemetry feed closed");
                        set_state(ConnectionState::Closed);
                        handler.on_state(source, ConnectionState::Closed).await;
                    }
                    Err(e) => {
                        warn!(target: "telemetry", source = %source, endpoint = %task_endpoint, error = %e, "Telemetry connect failed");
                        set_state(ConnectionState::Error);
                        handler.on_state(source, ConnectionState::Error).await;
                    }
                }

                let delay = backoff.next_delay();
                debug!(target: "telemetry", source = %source, delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");
                tokio::time::sleep(delay).await;
            }
        });

        Self {
            source,
            endpoint,
            state,
            handle,
        }
    }

    pub fn source(&self) -> TelemetrySource {
        self.source
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Error)
    }

    /// Abort the task; dropping its receiver closes the underlying socket
    pub fn stop(&self) {
        self.handle.abort();
        if let Ok(mut s) = self.state.lock() {
            *s = ConnectionState::Closed;
        }
        info!(target: "telemetry", source = %self.source, "Telemetry listener stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for TelemetryListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackoffConfig {
        BackoffConfig {
            initial_ms: 100,
            max_ms: 1_000,
            multiplier: 2.0,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut b = Backoff::new(config());
        let delays: Vec<u64> = (0..6).map(|_| b.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn backoff_resets() {
        let mut b = Backoff::new(config());
        b.next_delay();
        b.next_delay();
        assert_eq!(b.attempts(), 2);
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }
}
