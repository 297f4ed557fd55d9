// Real-time event representation
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Event / alert priority, ordered from least to most urgent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    /// Parse a backend priority/severity field; unknown values yield None
    pub fn from_field(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }

    /// Whether events of this priority also raise a dashboard alert
    pub fn raises_alert(&self) -> bool {
        *self >= Priority::High
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric domain an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    JobProgress,
    CrewProductivity,
    EquipmentUtilization,
    SafetyCompliance,
    System,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::JobProgress => "job_progress",
            EventCategory::CrewProductivity => "crew_productivity",
            EventCategory::EquipmentUtilization => "equipment_utilization",
            EventCategory::SafetyCompliance => "safety_compliance",
            EventCategory::System => "system",
        }
    }
}

/// Transient event travelling from the router to the notification bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealTimeEvent {
    pub id: String,
    pub category: EventCategory,
    /// e.g. `work_order_update`, `silica_reading`
    pub event_type: String,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
}

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Synthesize an id of the form `<prefix>_<unix ms>_<seq>`.
///
/// The sequence suffix keeps ids unique when several events share a
/// millisecond.
pub fn synthesize_id(prefix: &str, at: DateTime<Utc>) -> String {
    let seq = EVENT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}_{}", prefix, at.timestamp_millis(), seq)
}

impl RealTimeEvent {
    pub fn new(
        prefix: &str,
        category: EventCategory,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Self {
        let timestamp = Utc::now();
        Self {
            id: synthesize_id(prefix, timestamp),
            category,
            event_type: event_type.into(),
            payload,
            priority,
            timestamp,
        }
    }
}
