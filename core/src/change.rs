// Row-level change notifications from the relational backend
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tables the aggregator watches, always filtered by company
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchedTable {
    WorkOrders,
    TimeEntries,
    BeaconReadings,
    SafetyIncidents,
}

impl WatchedTable {
    pub const ALL: [WatchedTable; 4] = [
        WatchedTable::WorkOrders,
        WatchedTable::TimeEntries,
        WatchedTable::BeaconReadings,
        WatchedTable::SafetyIncidents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WatchedTable::WorkOrders => "work_orders",
            WatchedTable::TimeEntries => "time_entries",
            WatchedTable::BeaconReadings => "beacon_readings",
            WatchedTable::SafetyIncidents => "safety_incidents",
        }
    }

    /// Prefix used for synthesized event ids
    pub fn event_prefix(&self) -> &'static str {
        match self {
            WatchedTable::WorkOrders => "work_order",
            WatchedTable::TimeEntries => "time_entry",
            WatchedTable::BeaconReadings => "beacon",
            WatchedTable::SafetyIncidents => "safety",
        }
    }
}

impl fmt::Display for WatchedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

/// One change notification as delivered by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: WatchedTable,
    pub kind: ChangeKind,
    #[serde(default)]
    pub new_record: Option<serde_json::Value>,
    #[serde(default)]
    pub old_record: Option<serde_json::Value>,
    pub commit_timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn insert(table: WatchedTable, record: serde_json::Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            new_record: Some(record),
            old_record: None,
            commit_timestamp: Utc::now(),
        }
    }

    pub fn update(table: WatchedTable, record: serde_json::Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Update,
            new_record: Some(record),
            old_record: None,
            commit_timestamp: Utc::now(),
        }
    }

    pub fn delete(table: WatchedTable, record: serde_json::Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Delete,
            new_record: None,
            old_record: Some(record),
            commit_timestamp: Utc::now(),
        }
    }

    /// The record the change is about: the old row for deletes, otherwise the new row
    pub fn record(&self) -> Option<&serde_json::Value> {
        match self.kind {
            ChangeKind::Delete => self.old_record.as_ref(),
            ChangeKind::Insert | ChangeKind::Update => self.new_record.as_ref(),
        }
    }

    pub fn event_type(&self) -> String {
        format!("{}_{}", self.table.event_prefix(), self.kind.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_picks_old_row_for_delete() {
        let mut evt = ChangeEvent::delete(WatchedTable::WorkOrders, json!({"id": "wo-1"}));
        evt.new_record = Some(json!({"id": "ignored"}));
        assert_eq!(evt.record(), Some(&json!({"id": "wo-1"})));
        assert_eq!(evt.event_type(), "work_order_delete");
    }

    #[test]
    fn record_picks_new_row_for_update() {
        let evt = ChangeEvent::update(WatchedTable::SafetyIncidents, json!({"id": "s-1"}));
        assert_eq!(evt.record(), Some(&json!({"id": "s-1"})));
        assert_eq!(evt.event_type(), "safety_update");
    }
}
