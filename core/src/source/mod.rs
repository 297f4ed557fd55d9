// Data source adapters
//
// The aggregator talks to the relational backend only through `DataSource`:
// full pulls per metric domain, the KPI aggregation procedure, beacon lookups
// and row-level change streams filtered by company.

mod memory;

pub use memory::{FetchDomain, Fixtures, MemoryDataSource};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::change::{ChangeEvent, WatchedTable};
use crate::config::TimeRange;
use crate::model::{GeoPoint, Kpis};
use crate::Result;

/// Backend access used by the aggregator
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch_work_orders(
        &self,
        company_id: &str,
        range: TimeRange,
    ) -> Result<Vec<WorkOrderRecord>>;

    async fn fetch_equipment(&self, company_id: &str) -> Result<Vec<EquipmentRecord>>;

    async fn fetch_time_entries(
        &self,
        company_id: &str,
        range: TimeRange,
    ) -> Result<Vec<TimeEntryRecord>>;

    async fn fetch_safety(&self, company_id: &str, range: TimeRange) -> Result<SafetyDataset>;

    /// Server-side KPI aggregation procedure
    async fn fetch_kpis(&self, company_id: &str, range: TimeRange) -> Result<Kpis>;

    /// Resolve which equipment unit or employee carries a beacon
    async fn resolve_beacon(&self, beacon_id: &str) -> Result<Option<BeaconAssignment>>;

    /// Open a change stream for one table. Dropping the receiver releases
    /// the subscription.
    async fn watch(
        &self,
        table: WatchedTable,
        company_id: &str,
    ) -> Result<mpsc::Receiver<ChangeEvent>>;
}

// -----------------------------------------------------------------------------
// Backend record shapes (snake_case rows)
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkOrderRecord {
    pub id: String,
    pub job_number: String,
    pub customer_name: String,
    pub title: String,
    /// scheduled, in_progress, emergency, on_hold, completed, cancelled
    pub status: String,
    pub priority: Option<String>,
    pub progress_percent: f64,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub estimated_hours: f64,
    pub actual_hours: f64,
    /// Hours ahead (positive) or behind (negative) schedule
    pub schedule_variance_hours: Option<f64>,
    pub assigned_crew: Vec<String>,
    pub depends_on: Vec<String>,
    pub revenue: f64,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentRecord {
    pub id: String,
    pub name: String,
    pub category: String,
    /// active, idle, maintenance, offline
    pub status: String,
    pub hours_used: f64,
    pub hours_available: f64,
    pub battery_level: Option<f64>,
    pub signal_strength: Option<f64>,
    pub last_seen: Option<DateTime<Utc>>,
    pub output_rate: Option<f64>,
    pub engine_hours: f64,
    pub hours_since_maintenance: f64,
    pub location: Option<GeoPoint>,
    pub assigned_job_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeEntryRecord {
    pub id: String,
    pub employee_id: String,
    pub employee_name: String,
    pub team: String,
    pub job_id: Option<String>,
    pub clock_in: Option<DateTime<Utc>>,
    pub clock_out: Option<DateTime<Utc>>,
    pub hours: f64,
    pub productive_hours: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyIncidentRecord {
    pub id: String,
    /// injury, near_miss, hazard, property_damage, ...
    pub incident_type: String,
    pub severity: String,
    pub description: String,
    pub employee_id: Option<String>,
    pub job_id: Option<String>,
    /// open, investigating, resolved
    pub status: String,
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyRequirement {
    pub id: String,
    pub category: String,
    pub title: String,
    pub due_date: Option<DateTime<Utc>>,
    pub compliant: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyDataset {
    pub incidents: Vec<SafetyIncidentRecord>,
    pub requirements: Vec<SafetyRequirement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconReading {
    pub id: String,
    pub beacon_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub zone: Option<String>,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// What a beacon is attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum BeaconAssignment {
    Equipment(String),
    Employee(String),
}
