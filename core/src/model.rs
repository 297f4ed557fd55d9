// Dashboard snapshot model
//
// The aggregator exclusively owns one `DashboardSnapshot` per session.
// Consumers only ever see clones of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{RefreshRate, TimeRange};
use crate::event::{EventCategory, Priority};

/// Full dashboard state for one company
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub company_id: String,
    pub last_updated: DateTime<Utc>,
    pub refresh_rate: RefreshRate,
    pub time_range: TimeRange,
    pub kpis: Kpis,
    pub job_progress: JobProgressMetrics,
    pub equipment_utilization: EquipmentUtilizationMetrics,
    pub crew_productivity: CrewProductivityMetrics,
    pub safety_compliance: SafetyComplianceMetrics,
    pub predictions: Predictions,
    /// Newest first
    pub alerts: Vec<Alert>,
    pub trends: Trends,
}

impl DashboardSnapshot {
    /// Advance `last_updated`, never moving it backwards
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.last_updated {
            self.last_updated = now;
        }
    }

    /// Insert an alert at the head, evicting the oldest beyond `cap`
    pub fn push_alert(&mut self, alert: Alert, cap: usize) {
        self.alerts.insert(0, alert);
        self.alerts.truncate(cap);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpis {
    pub active_jobs: u32,
    pub jobs_completed: u32,
    pub on_time_completion_rate: f64,
    pub equipment_utilization_rate: f64,
    pub crew_efficiency: f64,
    pub safety_score: f64,
    pub revenue_to_date: f64,
    pub average_job_duration_hours: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub zone: Option<String>,
}

// -----------------------------------------------------------------------------
// Job progress
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressMetrics {
    pub summary: JobProgressSummary,
    pub active_jobs: Vec<ActiveJob>,
    pub critical_path: Vec<ActiveJob>,
    pub at_risk_jobs: Vec<ActiveJob>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressSummary {
    pub total_active: usize,
    pub on_schedule: usize,
    pub behind_schedule: usize,
    pub at_risk: usize,
    pub completed_in_range: usize,
    pub average_progress: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveJob {
    pub id: String,
    pub job_number: String,
    pub customer_name: String,
    pub title: String,
    pub status: String,
    pub priority: Option<String>,
    pub progress_percent: f64,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub estimated_hours: f64,
    pub actual_hours: f64,
    pub schedule_variance_hours: f64,
    pub assigned_crew: Vec<String>,
    pub depends_on: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub at_risk: bool,
}

// -----------------------------------------------------------------------------
// Equipment utilization
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentUtilizationMetrics {
    pub summary: EquipmentSummary,
    pub units: Vec<EquipmentUnit>,
    pub by_category: Vec<CategoryUtilization>,
    pub top_performers: Vec<EquipmentUnit>,
    pub underutilized: Vec<EquipmentUnit>,
    pub maintenance_alerts: Vec<MaintenanceAlert>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentSummary {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub in_maintenance: usize,
    pub offline: usize,
    pub average_utilization: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceUrgency {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentUnit {
    pub id: String,
    pub name: String,
    pub category: String,
    pub status: String,
    /// Percent of available hours in use
    pub utilization_rate: f64,
    pub hours_used: f64,
    pub hours_available: f64,
    pub battery_level: Option<f64>,
    pub signal_strength: Option<f64>,
    pub last_seen: Option<DateTime<Utc>>,
    pub output_rate: Option<f64>,
    pub engine_hours: f64,
    pub hours_since_maintenance: f64,
    pub productivity_score: f64,
    pub maintenance_urgency: MaintenanceUrgency,
    pub failure_probability: f64,
    pub location: Option<GeoPoint>,
    pub assigned_job_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryUtilization {
    pub category: String,
    pub units: usize,
    pub active: usize,
    pub average_utilization: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceAlert {
    pub equipment_id: String,
    pub equipment_name: String,
    pub urgency: MaintenanceUrgency,
    pub failure_probability: f64,
    pub reason: String,
}

// -----------------------------------------------------------------------------
// Crew productivity
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewProductivityMetrics {
    pub summary: CrewSummary,
    pub members: Vec<CrewMember>,
    pub by_team: Vec<TeamProductivity>,
    pub top_performers: Vec<CrewMember>,
    pub improvement_needed: Vec<CrewMember>,
    /// Newest first
    pub real_time_activity: Vec<CrewActivity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewSummary {
    pub total_crew: usize,
    pub clocked_in: usize,
    pub total_hours: f64,
    pub productive_hours: f64,
    pub average_efficiency: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewMember {
    pub employee_id: String,
    pub name: String,
    pub team: String,
    pub hours: f64,
    pub productive_hours: f64,
    /// Productive share of logged hours, in percent
    pub efficiency: f64,
    pub clocked_in: bool,
    pub current_job_id: Option<String>,
    pub last_location: Option<GeoPoint>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Time entry id -> what it contributes; the totals above are derived from it
    #[serde(skip)]
    pub entries: BTreeMap<String, TimeContribution>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeContribution {
    pub hours: f64,
    pub productive_hours: f64,
    pub open: bool,
    pub job_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl CrewMember {
    /// Recompute totals from per-entry contributions
    pub fn recompute(&mut self) {
        self.hours = self.entries.values().map(|c| c.hours).sum();
        self.productive_hours = self.entries.values().map(|c| c.productive_hours).sum();
        let latest_open = self
            .entries
            .values()
            .filter(|c| c.open)
            .max_by_key(|c| c.started_at);
        self.clocked_in = latest_open.is_some();
        self.current_job_id = latest_open.and_then(|c| c.job_id.clone());
        self.efficiency = if self.hours > 0.0 {
            (self.productive_hours / self.hours * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamProductivity {
    pub team: String,
    pub members: usize,
    pub total_hours: f64,
    pub average_efficiency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewActivity {
    pub employee_id: String,
    pub employee_name: String,
    pub activity: String,
    pub job_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// -----------------------------------------------------------------------------
// Safety compliance
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyComplianceMetrics {
    pub summary: SafetySummary,
    pub critical_alerts: Vec<SafetyIncident>,
    pub compliance_by_category: Vec<CategoryCompliance>,
    /// Newest first
    pub recent_incidents: Vec<SafetyIncident>,
    pub upcoming_requirements: Vec<Requirement>,
    pub exposure: ExposureStatus,
    /// Every incident id counted in `summary.total_incidents`, including ones
    /// no longer listed in `recent_incidents`
    #[serde(skip)]
    pub known_incidents: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetySummary {
    pub compliance_score: f64,
    pub total_incidents: usize,
    pub open_incidents: usize,
    pub critical_incidents: usize,
    pub days_since_last_incident: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyIncident {
    pub id: String,
    pub incident_type: String,
    pub severity: String,
    pub description: String,
    pub employee_id: Option<String>,
    pub job_id: Option<String>,
    pub status: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCompliance {
    pub category: String,
    pub total: usize,
    pub compliant: usize,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    pub id: String,
    pub category: String,
    pub title: String,
    pub due_date: DateTime<Utc>,
    pub compliant: bool,
}

/// Respirable crystalline silica exposure, µg/m³ (8h TWA)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureStatus {
    /// Latest reading per monitor
    pub readings: Vec<ExposureReading>,
    pub max_reading: f64,
    pub readings_above_action_level: u32,
    pub readings_above_pel: u32,
    pub last_reading_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureReading {
    pub monitor_id: String,
    pub employee_id: Option<String>,
    pub job_id: Option<String>,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

// -----------------------------------------------------------------------------
// Derived views
// -----------------------------------------------------------------------------

/// Advisory forecasts; never authoritative
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predictions {
    pub job_completions: Vec<CompletionForecast>,
    pub equipment_failures: Vec<FailureRisk>,
    pub generated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionForecast {
    pub job_id: String,
    pub projected_finish: DateTime<Utc>,
    pub confidence: f64,
    pub late: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRisk {
    pub equipment_id: String,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub priority: Priority,
    pub category: EventCategory,
    pub title: String,
    pub message: String,
    /// Record that raised the alert, used to avoid raising it twice
    pub source_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trends {
    pub job_completion: TrendSeries,
    pub equipment_utilization: TrendSeries,
    pub crew_productivity: TrendSeries,
    pub safety_incidents: TrendSeries,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendSeries {
    pub name: String,
    pub points: Vec<TrendPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl TrendSeries {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            points: Vec::new(),
        }
    }

    /// Append a point, keeping at most `cap` of the most recent
    pub fn push(&mut self, timestamp: DateTime<Utc>, value: f64, cap: usize) {
        self.points.push(TrendPoint { timestamp, value });
        if self.points.len() > cap {
            let excess = self.points.len() - cap;
            self.points.drain(..excess);
        }
    }
}
