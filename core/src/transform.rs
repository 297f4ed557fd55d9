// Record → metric transforms
//
// Full mappings from backend rows to each metric block, plus the derived
// views (predictions, refresh-time alerts, trends). The `summarize_*`
// functions recompute one block's summary from its collections and are
// shared with the incremental updaters.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::event::{synthesize_id, EventCategory, Priority};
use crate::model::{
    ActiveJob, Alert, CategoryCompliance, CategoryUtilization, CompletionForecast, CrewActivity,
    CrewMember, CrewProductivityMetrics, EquipmentUnit, EquipmentUtilizationMetrics,
    ExposureStatus, FailureRisk, JobProgressMetrics, MaintenanceAlert, MaintenanceUrgency,
    Predictions, Requirement, SafetyComplianceMetrics, SafetyIncident, TeamProductivity,
    TimeContribution, Trends, TrendSeries,
};
use crate::router::classify_safety;
use crate::source::{
    EquipmentRecord, SafetyDataset, SafetyIncidentRecord, TimeEntryRecord, WorkOrderRecord,
};

/// Work orders with this much negative variance are at risk
pub const AT_RISK_VARIANCE_HOURS: f64 = 4.0;
/// Progress points behind the elapsed share of the schedule that flag a job at risk
pub const AT_RISK_PROGRESS_GAP: f64 = 15.0;
pub const TOP_PERFORMER_LIMIT: usize = 5;
pub const UNDERUTILIZED_BELOW: f64 = 40.0;
pub const IMPROVEMENT_BELOW: f64 = 70.0;
pub const ACTIVITY_LIMIT: usize = 50;
pub const RECENT_INCIDENT_LIMIT: usize = 20;
pub const REQUIREMENT_WINDOW_DAYS: i64 = 14;
/// Output rate (units/hour) that counts as full productivity
pub const REFERENCE_OUTPUT_RATE: f64 = 10.0;
/// Engine hours between scheduled services
pub const SERVICE_INTERVAL_HOURS: f64 = 500.0;
pub const FAILURE_RISK_REPORT_ABOVE: f64 = 0.3;
/// Forecasts further out than this (ten years) are not reported
pub const MAX_FORECAST_HOURS: f64 = 87_600.0;

fn by_f64_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

// =============================================================================
// Job progress
// =============================================================================

pub fn is_active_status(status: &str) -> bool {
    matches!(status, "in_progress" | "emergency")
}

pub fn to_active_job(record: &WorkOrderRecord, now: DateTime<Utc>) -> ActiveJob {
    let mut job = ActiveJob {
        id: record.id.clone(),
        job_number: record.job_number.clone(),
        customer_name: record.customer_name.clone(),
        title: record.title.clone(),
        status: record.status.clone(),
        priority: record.priority.clone(),
        progress_percent: record.progress_percent.clamp(0.0, 100.0),
        scheduled_start: record.scheduled_start,
        scheduled_end: record.scheduled_end,
        estimated_hours: record.estimated_hours,
        actual_hours: record.actual_hours,
        schedule_variance_hours: record.schedule_variance_hours.unwrap_or(0.0),
        assigned_crew: record.assigned_crew.clone(),
        depends_on: record.depends_on.clone(),
        updated_at: record.updated_at,
        at_risk: false,
    };
    job.at_risk = is_at_risk(&job, now);
    job
}

/// Progress the schedule says the job should have reached by `now`
fn expected_progress(job: &ActiveJob, now: DateTime<Utc>) -> Option<f64> {
    let (start, end) = (job.scheduled_start?, job.scheduled_end?);
    let total = (end - start).num_seconds();
    if total <= 0 {
        return None;
    }
    let elapsed = (now - start).num_seconds().clamp(0, total);
    Some(elapsed as f64 / total as f64 * 100.0)
}

pub fn is_at_risk(job: &ActiveJob, now: DateTime<Utc>) -> bool {
    if job.schedule_variance_hours < -AT_RISK_VARIANCE_HOURS {
        return true;
    }
    match expected_progress(job, now) {
        Some(expected) => expected - job.progress_percent > AT_RISK_PROGRESS_GAP,
        None => false,
    }
}

pub fn job_progress(records: &[WorkOrderRecord], now: DateTime<Utc>) -> JobProgressMetrics {
    let mut seen = HashSet::new();
    let mut metrics = JobProgressMetrics::default();
    for record in records {
        if is_active_status(&record.status) && seen.insert(record.id.as_str()) {
            metrics.active_jobs.push(to_active_job(record, now));
        }
    }
    metrics.summary.completed_in_range = records
        .iter()
        .filter(|r| r.status == "completed")
        .count();
    summarize_jobs(&mut metrics, now);
    metrics
}

/// Recompute the job summary, critical path and at-risk list from `active_jobs`.
/// `completed_in_range` is carried over untouched.
pub fn summarize_jobs(metrics: &mut JobProgressMetrics, now: DateTime<Utc>) {
    for job in metrics.active_jobs.iter_mut() {
        job.at_risk = is_at_risk(job, now);
    }

    let jobs = &metrics.active_jobs;
    let behind = jobs
        .iter()
        .filter(|j| j.schedule_variance_hours < 0.0)
        .count();
    metrics.summary.total_active = jobs.len();
    metrics.summary.behind_schedule = behind;
    metrics.summary.on_schedule = jobs.len() - behind;
    metrics.summary.average_progress = average(jobs.iter().map(|j| j.progress_percent));

    metrics.at_risk_jobs = jobs.iter().filter(|j| j.at_risk).cloned().collect();
    metrics.summary.at_risk = metrics.at_risk_jobs.len();

    let depended_on: HashSet<&str> = jobs
        .iter()
        .flat_map(|j| j.depends_on.iter().map(String::as_str))
        .collect();
    let mut critical: Vec<ActiveJob> = jobs
        .iter()
        .filter(|j| {
            depended_on.contains(j.id.as_str())
                || matches!(j.priority.as_deref(), Some("critical") | Some("high"))
                || j.status == "emergency"
        })
        .cloned()
        .collect();
    critical.sort_by(|a, b| match (a.scheduled_end, b.scheduled_end) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    });
    metrics.critical_path = critical;
}

// =============================================================================
// Equipment utilization
// =============================================================================

pub fn utilization_rate(hours_used: f64, hours_available: f64) -> f64 {
    if hours_available <= 0.0 {
        return 0.0;
    }
    (hours_used / hours_available * 100.0).clamp(0.0, 100.0)
}

pub fn productivity_score(utilization: f64, output_rate: Option<f64>) -> f64 {
    match output_rate {
        Some(rate) => {
            let output = (rate / REFERENCE_OUTPUT_RATE * 100.0).clamp(0.0, 100.0);
            0.6 * utilization + 0.4 * output
        }
        None => utilization,
    }
}

pub fn maintenance_urgency(
    hours_since_maintenance: f64,
    battery_level: Option<f64>,
) -> MaintenanceUrgency {
    let by_hours = if hours_since_maintenance >= SERVICE_INTERVAL_HOURS {
        MaintenanceUrgency::Critical
    } else if hours_since_maintenance >= SERVICE_INTERVAL_HOURS * 0.8 {
        MaintenanceUrgency::High
    } else if hours_since_maintenance >= SERVICE_INTERVAL_HOURS * 0.5 {
        MaintenanceUrgency::Medium
    } else {
        MaintenanceUrgency::Low
    };
    let by_battery = match battery_level {
        Some(b) if b < 10.0 => MaintenanceUrgency::High,
        Some(b) if b < 20.0 => MaintenanceUrgency::Medium,
        _ => MaintenanceUrgency::Low,
    };
    by_hours.max(by_battery)
}

/// Rough failure likelihood over the next service window.
/// `temperature` is °C, `vibration` is mm/s RMS.
pub fn failure_probability(
    hours_since_maintenance: f64,
    temperature: Option<f64>,
    vibration: Option<f64>,
) -> f64 {
    let wear = (hours_since_maintenance / SERVICE_INTERVAL_HOURS).clamp(0.0, 1.5);
    let mut p = 0.02 + 0.4 * wear * wear;
    if temperature.map(|t| t > 95.0).unwrap_or(false) {
        p += 0.15;
    }
    if vibration.map(|v| v > 11.0).unwrap_or(false) {
        p += 0.2;
    }
    p.clamp(0.0, 0.99)
}

/// Recompute every derived field of a unit from its raw fields
pub fn score_unit(unit: &mut EquipmentUnit, temperature: Option<f64>, vibration: Option<f64>) {
    unit.utilization_rate = utilization_rate(unit.hours_used, unit.hours_available);
    unit.productivity_score = productivity_score(unit.utilization_rate, unit.output_rate);
    unit.maintenance_urgency = maintenance_urgency(unit.hours_since_maintenance, unit.battery_level);
    unit.failure_probability =
        failure_probability(unit.hours_since_maintenance, temperature, vibration);
}

pub fn to_equipment_unit(record: &EquipmentRecord) -> EquipmentUnit {
    let mut unit = EquipmentUnit {
        id: record.id.clone(),
        name: record.name.clone(),
        category: record.category.clone(),
        status: record.status.clone(),
        hours_used: record.hours_used,
        hours_available: record.hours_available,
        battery_level: record.battery_level,
        signal_strength: record.signal_strength,
        last_seen: record.last_seen,
        output_rate: record.output_rate,
        engine_hours: record.engine_hours,
        hours_since_maintenance: record.hours_since_maintenance,
        location: record.location.clone(),
        assigned_job_id: record.assigned_job_id.clone(),
        ..Default::default()
    };
    score_unit(&mut unit, None, None);
    unit
}

pub fn equipment_utilization(records: &[EquipmentRecord]) -> EquipmentUtilizationMetrics {
    let mut seen = HashSet::new();
    let units = records
        .iter()
        .filter(|r| seen.insert(r.id.as_str()))
        .map(to_equipment_unit)
        .collect();
    let mut metrics = EquipmentUtilizationMetrics {
        units,
        ..Default::default()
    };
    summarize_equipment(&mut metrics);
    metrics
}

pub fn summarize_equipment(metrics: &mut EquipmentUtilizationMetrics) {
    let units = &metrics.units;
    let count = |status: &str| units.iter().filter(|u| u.status == status).count();

    metrics.summary.total = units.len();
    metrics.summary.active = count("active");
    metrics.summary.idle = count("idle");
    metrics.summary.in_maintenance = count("maintenance");
    metrics.summary.offline = count("offline");
    metrics.summary.average_utilization = average(units.iter().map(|u| u.utilization_rate));

    let mut categories: BTreeMap<&str, Vec<&EquipmentUnit>> = BTreeMap::new();
    for unit in units {
        categories.entry(unit.category.as_str()).or_default().push(unit);
    }
    metrics.by_category = categories
        .into_iter()
        .map(|(category, members)| CategoryUtilization {
            category: category.to_string(),
            units: members.len(),
            active: members.iter().filter(|u| u.status == "active").count(),
            average_utilization: average(members.iter().map(|u| u.utilization_rate)),
        })
        .collect();

    let mut ranked: Vec<EquipmentUnit> = units.clone();
    ranked.sort_by(|a, b| by_f64_desc(a.productivity_score, b.productivity_score));
    ranked.truncate(TOP_PERFORMER_LIMIT);
    metrics.top_performers = ranked;

    metrics.underutilized = units
        .iter()
        .filter(|u| u.status != "maintenance" && u.utilization_rate < UNDERUTILIZED_BELOW)
        .cloned()
        .collect();

    let mut alerts: Vec<MaintenanceAlert> = units
        .iter()
        .filter(|u| u.maintenance_urgency >= MaintenanceUrgency::High)
        .map(|u| MaintenanceAlert {
            equipment_id: u.id.clone(),
            equipment_name: u.name.clone(),
            urgency: u.maintenance_urgency,
            failure_probability: u.failure_probability,
            reason: maintenance_reason(u),
        })
        .collect();
    alerts.sort_by(|a, b| {
        b.urgency
            .cmp(&a.urgency)
            .then_with(|| by_f64_desc(a.failure_probability, b.failure_probability))
    });
    metrics.maintenance_alerts = alerts;
}

fn maintenance_reason(unit: &EquipmentUnit) -> String {
    match unit.battery_level {
        Some(b) if b < 20.0 && unit.hours_since_maintenance < SERVICE_INTERVAL_HOURS * 0.8 => {
            format!("battery at {:.0}%", b)
        }
        _ => format!(
            "{:.0} hours since last service",
            unit.hours_since_maintenance
        ),
    }
}

// =============================================================================
// Crew productivity
// =============================================================================

/// Hours an entry contributes; open entries count up to `now`
pub fn entry_hours(entry: &TimeEntryRecord, now: DateTime<Utc>) -> f64 {
    if entry.hours > 0.0 {
        return entry.hours;
    }
    match (entry.clock_in, entry.clock_out) {
        (Some(start), Some(end)) => (end - start).num_minutes().max(0) as f64 / 60.0,
        (Some(start), None) => (now - start).num_minutes().max(0) as f64 / 60.0,
        _ => 0.0,
    }
}

pub fn time_contribution(entry: &TimeEntryRecord, now: DateTime<Utc>) -> TimeContribution {
    TimeContribution {
        hours: entry_hours(entry, now),
        productive_hours: entry.productive_hours,
        open: entry.clock_in.is_some() && entry.clock_out.is_none(),
        job_id: entry.job_id.clone(),
        started_at: entry.clock_in,
    }
}

pub fn new_crew_member(entry: &TimeEntryRecord) -> CrewMember {
    CrewMember {
        employee_id: entry.employee_id.clone(),
        name: entry.employee_name.clone(),
        team: entry.team.clone(),
        ..Default::default()
    }
}

pub fn entry_activity(entry: &TimeEntryRecord) -> Option<CrewActivity> {
    let (activity, timestamp) = match (entry.clock_in, entry.clock_out) {
        (_, Some(out)) => ("clocked_out", out),
        (Some(start), None) => ("clocked_in", start),
        (None, None) => return None,
    };
    Some(CrewActivity {
        employee_id: entry.employee_id.clone(),
        employee_name: entry.employee_name.clone(),
        activity: activity.to_string(),
        job_id: entry.job_id.clone(),
        timestamp,
    })
}

pub fn crew_productivity(
    entries: &[TimeEntryRecord],
    now: DateTime<Utc>,
) -> CrewProductivityMetrics {
    let mut members: Vec<CrewMember> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for entry in entries {
        let idx = *index.entry(entry.employee_id.as_str()).or_insert_with(|| {
            members.push(new_crew_member(entry));
            members.len() - 1
        });
        let member = &mut members[idx];
        member
            .entries
            .insert(entry.id.clone(), time_contribution(entry, now));
        let seen = entry.clock_out.or(entry.clock_in);
        if seen > member.last_seen {
            member.last_seen = seen;
        }
    }
    for member in members.iter_mut() {
        member.recompute();
    }

    let mut activity: Vec<CrewActivity> = entries.iter().filter_map(entry_activity).collect();
    activity.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    activity.truncate(ACTIVITY_LIMIT);

    let mut metrics = CrewProductivityMetrics {
        members,
        real_time_activity: activity,
        ..Default::default()
    };
    summarize_crew(&mut metrics);
    metrics
}

pub fn summarize_crew(metrics: &mut CrewProductivityMetrics) {
    let members = &metrics.members;
    metrics.summary.total_crew = members.len();
    metrics.summary.clocked_in = members.iter().filter(|m| m.clocked_in).count();
    metrics.summary.total_hours = members.iter().map(|m| m.hours).sum();
    metrics.summary.productive_hours = members.iter().map(|m| m.productive_hours).sum();
    metrics.summary.average_efficiency = average(members.iter().map(|m| m.efficiency));

    let mut teams: BTreeMap<&str, Vec<&CrewMember>> = BTreeMap::new();
    for member in members {
        teams.entry(member.team.as_str()).or_default().push(member);
    }
    metrics.by_team = teams
        .into_iter()
        .map(|(team, crew)| TeamProductivity {
            team: team.to_string(),
            members: crew.len(),
            total_hours: crew.iter().map(|m| m.hours).sum(),
            average_efficiency: average(crew.iter().map(|m| m.efficiency)),
        })
        .collect();

    let mut ranked: Vec<CrewMember> = members.iter().filter(|m| m.hours > 0.0).cloned().collect();
    ranked.sort_by(|a, b| by_f64_desc(a.efficiency, b.efficiency));
    ranked.truncate(TOP_PERFORMER_LIMIT);
    metrics.top_performers = ranked;

    metrics.improvement_needed = members
        .iter()
        .filter(|m| m.hours > 0.0 && m.efficiency < IMPROVEMENT_BELOW)
        .cloned()
        .collect();
}

// =============================================================================
// Safety compliance
// =============================================================================

pub fn to_incident(record: &SafetyIncidentRecord, now: DateTime<Utc>) -> SafetyIncident {
    SafetyIncident {
        id: record.id.clone(),
        incident_type: record.incident_type.clone(),
        severity: record.severity.clone(),
        description: record.description.clone(),
        employee_id: record.employee_id.clone(),
        job_id: record.job_id.clone(),
        status: record.status.clone(),
        occurred_at: record.occurred_at.unwrap_or(now),
    }
}

fn incident_is_open(incident: &SafetyIncident) -> bool {
    incident.status != "resolved" && incident.status != "closed"
}

fn incident_is_critical(incident: &SafetyIncident) -> bool {
    let record = SafetyIncidentRecord {
        incident_type: incident.incident_type.clone(),
        severity: incident.severity.clone(),
        ..Default::default()
    };
    classify_safety(&record) == Priority::Critical
}

pub fn safety_compliance(dataset: &SafetyDataset, now: DateTime<Utc>) -> SafetyComplianceMetrics {
    let mut incidents: Vec<SafetyIncident> = dataset
        .incidents
        .iter()
        .map(|r| to_incident(r, now))
        .collect();
    let mut seen = HashSet::new();
    incidents.retain(|i| seen.insert(i.id.clone()));
    incidents.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));

    let mut categories: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for req in &dataset.requirements {
        let slot = categories.entry(req.category.as_str()).or_insert((0, 0));
        slot.0 += 1;
        if req.compliant {
            slot.1 += 1;
        }
    }
    let compliance_by_category = categories
        .into_iter()
        .map(|(category, (total, compliant))| CategoryCompliance {
            category: category.to_string(),
            total,
            compliant,
            score: compliant as f64 / total as f64 * 100.0,
        })
        .collect();

    let window_end = now + Duration::days(REQUIREMENT_WINDOW_DAYS);
    let mut upcoming: Vec<Requirement> = dataset
        .requirements
        .iter()
        .filter(|r| !r.compliant)
        .filter_map(|r| {
            let due = r.due_date?;
            (due <= window_end).then(|| Requirement {
                id: r.id.clone(),
                category: r.category.clone(),
                title: r.title.clone(),
                due_date: due,
                compliant: r.compliant,
            })
        })
        .collect();
    upcoming.sort_by(|a, b| a.due_date.cmp(&b.due_date));

    let total_requirements = dataset.requirements.len();
    let compliant_requirements = dataset.requirements.iter().filter(|r| r.compliant).count();

    let mut metrics = SafetyComplianceMetrics {
        compliance_by_category,
        upcoming_requirements: upcoming,
        exposure: ExposureStatus::default(),
        ..Default::default()
    };
    metrics.known_incidents = incidents.iter().map(|i| i.id.clone()).collect();
    metrics.summary.total_incidents = metrics.known_incidents.len();
    metrics.summary.compliance_score = if total_requirements == 0 {
        100.0
    } else {
        compliant_requirements as f64 / total_requirements as f64 * 100.0
    };
    incidents.truncate(RECENT_INCIDENT_LIMIT);
    metrics.recent_incidents = incidents;
    summarize_safety(&mut metrics, now);
    metrics
}

/// Recompute incident-derived fields from `recent_incidents`.
/// `total_incidents` and `compliance_score` are carried over untouched.
pub fn summarize_safety(metrics: &mut SafetyComplianceMetrics, now: DateTime<Utc>) {
    let incidents = &metrics.recent_incidents;
    metrics.critical_alerts = incidents
        .iter()
        .filter(|i| incident_is_open(i) && incident_is_critical(i))
        .cloned()
        .collect();
    metrics.summary.open_incidents = incidents.iter().filter(|i| incident_is_open(i)).count();
    metrics.summary.critical_incidents = metrics.critical_alerts.len();
    metrics.summary.days_since_last_incident = incidents
        .iter()
        .map(|i| i.occurred_at)
        .max()
        .map(|last| (now - last).num_days().max(0));
}

// =============================================================================
// Derived views
// =============================================================================

pub fn derive_predictions(
    jobs: &JobProgressMetrics,
    equipment: &EquipmentUtilizationMetrics,
    now: DateTime<Utc>,
) -> Predictions {
    let job_completions = jobs
        .active_jobs
        .iter()
        .filter_map(|job| forecast_completion(job, now))
        .collect();

    let mut equipment_failures: Vec<FailureRisk> = equipment
        .units
        .iter()
        .filter(|u| u.failure_probability >= FAILURE_RISK_REPORT_ABOVE)
        .map(|u| FailureRisk {
            equipment_id: u.id.clone(),
            probability: u.failure_probability,
        })
        .collect();
    equipment_failures.sort_by(|a, b| by_f64_desc(a.probability, b.probability));

    Predictions {
        job_completions,
        equipment_failures,
        generated_at: Some(now),
    }
}

fn forecast_completion(job: &ActiveJob, now: DateTime<Utc>) -> Option<CompletionForecast> {
    let remaining_pct = 100.0 - job.progress_percent;
    let remaining_hours = match job.scheduled_start {
        Some(start) if job.progress_percent > 0.0 && now > start => {
            let elapsed = (now - start).num_minutes() as f64 / 60.0;
            remaining_pct / (job.progress_percent / elapsed)
        }
        _ => (job.estimated_hours - job.actual_hours).max(0.0),
    };
    if !remaining_hours.is_finite() || remaining_hours > MAX_FORECAST_HOURS {
        return None;
    }
    let remaining = Duration::try_minutes((remaining_hours * 60.0).round() as i64)?;
    let projected_finish = now.checked_add_signed(remaining)?;
    Some(CompletionForecast {
        job_id: job.id.clone(),
        projected_finish,
        confidence: (0.5 + job.progress_percent / 200.0).clamp(0.0, 0.95),
        late: job
            .scheduled_end
            .map(|end| projected_finish > end)
            .unwrap_or(false),
    })
}

/// Alerts raised by a full refresh for conditions not already alerted on
pub fn derive_alerts(
    jobs: &JobProgressMetrics,
    equipment: &EquipmentUtilizationMetrics,
    safety: &SafetyComplianceMetrics,
    existing: &[Alert],
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let known: HashSet<&str> = existing
        .iter()
        .filter_map(|a| a.source_id.as_deref())
        .collect();
    let mut raised = Vec::new();
    let mut raise = |source_id: &str, priority, category, title: String, message: String| {
        if known.contains(source_id) {
            return;
        }
        raised.push(Alert {
            id: synthesize_id("alert", now),
            priority,
            category,
            title,
            message,
            source_id: Some(source_id.to_string()),
            created_at: now,
            acknowledged: false,
        });
    };

    for job in &jobs.at_risk_jobs {
        raise(
            &job.id,
            Priority::High,
            EventCategory::JobProgress,
            format!("Job {} at risk", job.job_number),
            format!(
                "{} is {:.0}% complete with {:.1}h schedule variance",
                job.title, job.progress_percent, job.schedule_variance_hours
            ),
        );
    }
    for alert in equipment
        .maintenance_alerts
        .iter()
        .filter(|a| a.urgency == MaintenanceUrgency::Critical)
    {
        raise(
            &alert.equipment_id,
            Priority::High,
            EventCategory::EquipmentUtilization,
            format!("{} needs maintenance", alert.equipment_name),
            alert.reason.clone(),
        );
    }
    for incident in &safety.critical_alerts {
        raise(
            &incident.id,
            Priority::Critical,
            EventCategory::SafetyCompliance,
            format!("Critical safety incident: {}", incident.incident_type),
            incident.description.clone(),
        );
    }
    raised
}

pub fn empty_trends() -> Trends {
    Trends {
        job_completion: TrendSeries::named("job_completion"),
        equipment_utilization: TrendSeries::named("equipment_utilization"),
        crew_productivity: TrendSeries::named("crew_productivity"),
        safety_incidents: TrendSeries::named("safety_incidents"),
    }
}

/// Append one point per series from freshly computed metrics
pub fn extend_trends(
    trends: &mut Trends,
    jobs: &JobProgressMetrics,
    equipment: &EquipmentUtilizationMetrics,
    crew: &CrewProductivityMetrics,
    safety: &SafetyComplianceMetrics,
    now: DateTime<Utc>,
    cap: usize,
) {
    trends
        .job_completion
        .push(now, jobs.summary.average_progress, cap);
    trends
        .equipment_utilization
        .push(now, equipment.summary.average_utilization, cap);
    trends
        .crew_productivity
        .push(now, crew.summary.average_efficiency, cap);
    trends
        .safety_incidents
        .push(now, safety.summary.open_incidents as f64, cap);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str, status: &str, progress: f64) -> WorkOrderRecord {
        WorkOrderRecord {
            id: id.into(),
            job_number: format!("J-{}", id),
            status: status.into(),
            progress_percent: progress,
            ..Default::default()
        }
    }

    #[test]
    fn job_progress_tracks_only_active_orders() {
        let now = Utc::now();
        let records = vec![
            order("a", "in_progress", 40.0),
            order("b", "emergency", 10.0),
            order("c", "completed", 100.0),
            order("d", "scheduled", 0.0),
            order("a", "in_progress", 40.0),
        ];
        let metrics = job_progress(&records, now);
        assert_eq!(metrics.summary.total_active, 2);
        assert_eq!(metrics.summary.completed_in_range, 1);
        assert!((metrics.summary.average_progress - 25.0).abs() < 1e-9);
        // emergency jobs sit on the critical path
        assert_eq!(metrics.critical_path.len(), 1);
        assert_eq!(metrics.critical_path[0].id, "b");
    }

    #[test]
    fn negative_variance_marks_job_at_risk() {
        let now = Utc::now();
        let mut record = order("a", "in_progress", 50.0);
        record.schedule_variance_hours = Some(-6.0);
        let metrics = job_progress(&[record], now);
        assert_eq!(metrics.summary.at_risk, 1);
        assert_eq!(metrics.summary.behind_schedule, 1);
    }

    #[test]
    fn lagging_progress_marks_job_at_risk() {
        let now = Utc::now();
        let mut record = order("a", "in_progress", 10.0);
        record.scheduled_start = Some(now - Duration::hours(8));
        record.scheduled_end = Some(now + Duration::hours(2));
        assert!(to_active_job(&record, now).at_risk);
    }

    #[test]
    fn stalled_job_from_epoch_gets_no_forecast() {
        let now = Utc::now();
        let mut stalled = order("a", "in_progress", 0.01);
        stalled.scheduled_start = Some(DateTime::UNIX_EPOCH);
        let mut steady = order("b", "in_progress", 50.0);
        steady.scheduled_start = Some(now - Duration::hours(10));

        let jobs = job_progress(&[stalled, steady], now);
        let predictions = derive_predictions(&jobs, &EquipmentUtilizationMetrics::default(), now);
        assert_eq!(predictions.job_completions.len(), 1);
        let forecast = &predictions.job_completions[0];
        assert_eq!(forecast.job_id, "b");
        assert_eq!(forecast.projected_finish, now + Duration::hours(10));
    }

    #[test]
    fn equipment_scores_and_groups() {
        let records = vec![
            EquipmentRecord {
                id: "saw-1".into(),
                name: "Wall saw".into(),
                category: "saws".into(),
                status: "active".into(),
                hours_used: 30.0,
                hours_available: 40.0,
                hours_since_maintenance: 520.0,
                ..Default::default()
            },
            EquipmentRecord {
                id: "drill-1".into(),
                name: "Core drill".into(),
                category: "drills".into(),
                status: "idle".into(),
                hours_used: 4.0,
                hours_available: 40.0,
                ..Default::default()
            },
        ];
        let metrics = equipment_utilization(&records);
        assert_eq!(metrics.summary.total, 2);
        assert_eq!(metrics.summary.active, 1);
        assert_eq!(metrics.by_category.len(), 2);
        assert_eq!(metrics.underutilized.len(), 1);
        assert_eq!(metrics.underutilized[0].id, "drill-1");
        assert_eq!(metrics.maintenance_alerts.len(), 1);
        assert_eq!(
            metrics.maintenance_alerts[0].urgency,
            MaintenanceUrgency::Critical
        );
        assert_eq!(metrics.top_performers[0].id, "saw-1");
    }

    #[test]
    fn crew_rolls_up_entries_per_employee() {
        let now = Utc::now();
        let entries = vec![
            TimeEntryRecord {
                id: "t1".into(),
                employee_id: "e1".into(),
                employee_name: "Ana".into(),
                team: "north".into(),
                clock_in: Some(now - Duration::hours(10)),
                clock_out: Some(now - Duration::hours(6)),
                hours: 4.0,
                productive_hours: 3.0,
                ..Default::default()
            },
            TimeEntryRecord {
                id: "t2".into(),
                employee_id: "e1".into(),
                employee_name: "Ana".into(),
                team: "north".into(),
                job_id: Some("wo-1".into()),
                clock_in: Some(now - Duration::hours(2)),
                hours: 2.0,
                productive_hours: 2.0,
                ..Default::default()
            },
        ];
        let metrics = crew_productivity(&entries, now);
        assert_eq!(metrics.summary.total_crew, 1);
        assert_eq!(metrics.summary.clocked_in, 1);
        let member = &metrics.members[0];
        assert!((member.hours - 6.0).abs() < 1e-9);
        assert!((member.efficiency - 5.0 / 6.0 * 100.0).abs() < 1e-9);
        assert_eq!(member.current_job_id.as_deref(), Some("wo-1"));
        assert_eq!(metrics.real_time_activity[0].activity, "clocked_in");
    }

    #[test]
    fn safety_scores_requirements_and_incidents() {
        let now = Utc::now();
        let dataset = SafetyDataset {
            incidents: vec![SafetyIncidentRecord {
                id: "i1".into(),
                incident_type: "injury".into(),
                severity: "medium".into(),
                status: "open".into(),
                occurred_at: Some(now - Duration::days(3)),
                ..Default::default()
            }],
            requirements: vec![
                crate::source::SafetyRequirement {
                    id: "r1".into(),
                    category: "silica".into(),
                    title: "Exposure control plan".into(),
                    due_date: Some(now + Duration::days(5)),
                    compliant: false,
                },
                crate::source::SafetyRequirement {
                    id: "r2".into(),
                    category: "silica".into(),
                    title: "Respirator fit test".into(),
                    due_date: Some(now + Duration::days(60)),
                    compliant: true,
                },
            ],
        };
        let metrics = safety_compliance(&dataset, now);
        assert!((metrics.summary.compliance_score - 50.0).abs() < 1e-9);
        assert_eq!(metrics.summary.days_since_last_incident, Some(3));
        assert_eq!(metrics.critical_alerts.len(), 1);
        assert_eq!(metrics.upcoming_requirements.len(), 1);
        assert_eq!(metrics.compliance_by_category[0].score, 50.0);
    }

    #[test]
    fn refresh_alerts_are_not_raised_twice() {
        let now = Utc::now();
        let mut record = order("a", "in_progress", 50.0);
        record.schedule_variance_hours = Some(-6.0);
        let jobs = job_progress(&[record], now);
        let equipment = EquipmentUtilizationMetrics::default();
        let safety = SafetyComplianceMetrics::default();

        let first = derive_alerts(&jobs, &equipment, &safety, &[], now);
        assert_eq!(first.len(), 1);
        let second = derive_alerts(&jobs, &equipment, &safety, &first, now);
        assert!(second.is_empty());
    }

    #[test]
    fn trends_are_capped() {
        let now = Utc::now();
        let mut trends = empty_trends();
        let jobs = JobProgressMetrics::default();
        let equipment = EquipmentUtilizationMetrics::default();
        let crew = CrewProductivityMetrics::default();
        let safety = SafetyComplianceMetrics::default();
        for _ in 0..5 {
            extend_trends(&mut trends, &jobs, &equipment, &crew, &safety, now, 3);
        }
        assert_eq!(trends.job_completion.points.len(), 3);
        assert_eq!(trends.safety_incidents.name, "safety_incidents");
    }
}
