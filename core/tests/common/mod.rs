// Shared helpers for the integration tests
#![allow(dead_code)]

use std::time::Duration;

use pontifex_core::config::BackoffConfig;
use chrono::{Duration as ChronoDuration, Utc};
use pontifex_core::source::{
    EquipmentRecord, Fixtures, SafetyDataset, SafetyIncidentRecord, SafetyRequirement,
    TimeEntryRecord, WorkOrderRecord,
};
use pontifex_core::{AggregatorConfig, AnalyticsAggregator, Channel, Notification};
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub fn config() -> AggregatorConfig {
    AggregatorConfig {
        company_id: "acme".into(),
        silica_monitor_url: None,
        equipment_telemetry_url: None,
        max_alerts: 100,
        backoff: BackoffConfig {
            initial_ms: 10,
            max_ms: 40,
            multiplier: 2.0,
        },
        fixtures_path: None,
        ..AggregatorConfig::default()
    }
}

pub fn work_order(id: &str, status: &str, progress: f64) -> WorkOrderRecord {
    WorkOrderRecord {
        id: id.into(),
        job_number: format!("J-{}", id),
        title: format!("Job {}", id),
        status: status.into(),
        progress_percent: progress,
        estimated_hours: 10.0,
        ..Default::default()
    }
}

pub fn work_order_row(id: &str, status: &str, progress: f64) -> Value {
    json!({
        "id": id,
        "job_number": format!("J-{}", id),
        "title": format!("Job {}", id),
        "status": status,
        "progress_percent": progress,
        "estimated_hours": 10.0,
    })
}

pub fn equipment(id: &str) -> EquipmentRecord {
    EquipmentRecord {
        id: id.into(),
        name: format!("Unit {}", id),
        category: "saw".into(),
        status: "active".into(),
        hours_used: 4.0,
        hours_available: 8.0,
        hours_since_maintenance: 50.0,
        ..Default::default()
    }
}

/// Three in-progress jobs and one piece of equipment
pub fn three_jobs() -> Fixtures {
    Fixtures {
        work_orders: vec![
            work_order("wo-1", "in_progress", 20.0),
            work_order("wo-2", "in_progress", 40.0),
            work_order("wo-3", "in_progress", 60.0),
        ],
        equipment: vec![equipment("saw-1")],
        ..Default::default()
    }
}

/// `three_jobs` plus two crew members on the clock and a safety record
pub fn staffed_site() -> Fixtures {
    let now = Utc::now();
    let entry = |id: &str, employee: &str, job: &str| TimeEntryRecord {
        id: id.into(),
        employee_id: employee.into(),
        employee_name: format!("Worker {}", employee),
        team: "fabrication".into(),
        job_id: Some(job.into()),
        clock_in: Some(now - ChronoDuration::hours(3)),
        clock_out: None,
        hours: 3.0,
        productive_hours: 2.5,
    };
    Fixtures {
        time_entries: vec![entry("te-1", "emp-1", "wo-1"), entry("te-2", "emp-2", "wo-2")],
        safety: SafetyDataset {
            incidents: vec![SafetyIncidentRecord {
                id: "inc-1".into(),
                incident_type: "hazard".into(),
                severity: "low".into(),
                description: "Slurry on walkway".into(),
                status: "resolved".into(),
                occurred_at: Some(now - ChronoDuration::days(2)),
                ..Default::default()
            }],
            requirements: vec![SafetyRequirement {
                id: "req-1".into(),
                category: "respiratory".into(),
                title: "Fit test".into(),
                due_date: Some(now + ChronoDuration::days(30)),
                compliant: true,
            }],
        },
        ..three_jobs()
    }
}

/// Forward every notification on `channel` into a receiver
pub fn record(agg: &AnalyticsAggregator, channel: Channel) -> mpsc::UnboundedReceiver<Notification> {
    let (tx, rx) = mpsc::unbounded_channel();
    agg.subscribe(channel, move |n| {
        let _ = tx.send(n.clone());
        Ok(())
    });
    rx
}

pub async fn next(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Notification {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("notification channel closed")
}

/// Let spawned watcher/listener tasks run to quiescence
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
