// Subscriber notification bus
//
// Channel name -> ordered callbacks. Delivery is synchronous, in
// registration order, and each callback is isolated: a returned error or a
// panic is logged and the remaining subscribers still receive the update.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::event::RealTimeEvent;
use crate::model::{
    Alert, CrewProductivityMetrics, DashboardSnapshot, EquipmentUtilizationMetrics,
    JobProgressMetrics, SafetyComplianceMetrics,
};
use crate::telemetry::{ConnectionState, TelemetrySource};
use crate::Result;

/// Named notification channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    JobProgress,
    CrewProductivity,
    EquipmentUtilization,
    SafetyCompliance,
    /// Every routed real-time event
    Events,
    Alerts,
    /// Full snapshot after a wholesale refresh
    DashboardUpdate,
    /// Telemetry messages that matched nothing in the snapshot
    UnmatchedTelemetry,
    /// Telemetry connection state transitions
    ConnectionState,
}

impl Channel {
    pub const ALL: [Channel; 9] = [
        Channel::JobProgress,
        Channel::CrewProductivity,
        Channel::EquipmentUtilization,
        Channel::SafetyCompliance,
        Channel::Events,
        Channel::Alerts,
        Channel::DashboardUpdate,
        Channel::UnmatchedTelemetry,
        Channel::ConnectionState,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::JobProgress => "job_progress",
            Channel::CrewProductivity => "crew_productivity",
            Channel::EquipmentUtilization => "equipment_utilization",
            Channel::SafetyCompliance => "safety_compliance",
            Channel::Events => "events",
            Channel::Alerts => "alerts",
            Channel::DashboardUpdate => "dashboard_update",
            Channel::UnmatchedTelemetry => "unmatched_telemetry",
            Channel::ConnectionState => "connection_state",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered to subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Notification {
    JobProgress(JobProgressMetrics),
    CrewProductivity(CrewProductivityMetrics),
    EquipmentUtilization(EquipmentUtilizationMetrics),
    SafetyCompliance(SafetyComplianceMetrics),
    Event(RealTimeEvent),
    Alert(Alert),
    Dashboard(Box<DashboardSnapshot>),
    UnmatchedTelemetry {
        source: TelemetrySource,
        payload: serde_json::Value,
    },
    Connection {
        source: TelemetrySource,
        state: ConnectionState,
    },
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

pub type Callback = Arc<dyn Fn(&Notification) -> Result<()> + Send + Sync>;

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    callback: Callback,
}

/// Per-channel delivery statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusStats {
    pub total_notified: u64,
    pub total_delivered: u64,
    pub failed_deliveries: u64,
    pub active_subscriptions: usize,
}

pub struct NotificationBus {
    // Channel -> subscribers in registration order
    subscriptions: DashMap<Channel, Vec<Subscriber>>,
    stats: DashMap<Channel, BusStats>,
    next_id: AtomicU64,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
            stats: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback on a channel
    pub fn subscribe<F>(&self, channel: Channel, callback: F) -> SubscriptionId
    where
        F: Fn(&Notification) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.entry(channel).or_default().push(Subscriber {
            id,
            callback: Arc::new(callback),
        });
        self.update_stats(channel, |stats| stats.active_subscriptions += 1);
        debug!(target: "notification_bus", channel = %channel, subscription = %id, "Subscribed");
        id
    }

    /// Remove a callback. Unknown ids are ignored; returns whether one was removed.
    pub fn unsubscribe(&self, channel: Channel, id: SubscriptionId) -> bool {
        let removed = match self.subscriptions.get_mut(&channel) {
            Some(mut subs) => {
                let before = subs.len();
                subs.retain(|s| s.id != id);
                before != subs.len()
            }
            None => false,
        };
        if removed {
            self.update_stats(channel, |stats| {
                stats.active_subscriptions = stats.active_subscriptions.saturating_sub(1);
            });
            debug!(target: "notification_bus", channel = %channel, subscription = %id, "Unsubscribed");
        }
        removed
    }

    /// Deliver `notification` to every subscriber of `channel`.
    /// Returns the number of callbacks that completed successfully.
    pub fn notify(&self, channel: Channel, notification: &Notification) -> usize {
        // Snapshot the list so callbacks may (un)subscribe without deadlocking
        let subscribers: Vec<Subscriber> = match self.subscriptions.get(&channel) {
            Some(subs) => subs.value().clone(),
            None => Vec::new(),
        };

        let mut delivered = 0u64;
        let mut failed = 0u64;
        for sub in &subscribers {
            match catch_unwind(AssertUnwindSafe(|| (sub.callback)(notification))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    failed += 1;
                    error!(target: "notification_bus", channel = %channel, subscription = %sub.id, error = %e, "Subscriber failed");
                }
                Err(panic) => {
                    failed += 1;
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(target: "notification_bus", channel = %channel, subscription = %sub.id, panic = %msg, "Subscriber panicked");
                }
            }
        }

        self.update_stats(channel, |stats| {
            stats.total_notified += 1;
            stats.total_delivered += delivered;
            stats.failed_deliveries += failed;
        });
        delivered as usize
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.subscriptions
            .get(&channel)
            .map(|s| s.value().len())
            .unwrap_or(0)
    }

    pub fn total_subscribers(&self) -> usize {
        self.subscriptions.iter().map(|e| e.value().len()).sum()
    }

    /// Drop every subscription on every channel
    pub fn clear(&self) {
        self.subscriptions.clear();
        for mut entry in self.stats.iter_mut() {
            entry.value_mut().active_subscriptions = 0;
        }
    }

    pub fn get_stats(&self, channel: Channel) -> Option<BusStats> {
        self.stats.get(&channel).map(|s| s.clone())
    }

    fn update_stats<F>(&self, channel: Channel, f: F)
    where
        F: FnOnce(&mut BusStats),
    {
        let mut entry = self.stats.entry(channel).or_default();
        f(entry.value_mut());
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
