// Incremental aggregate updaters
//
// Each updater patches one collection by primary key and then recomputes only
// that block's summary. Applying the same record twice leaves the same state.

use chrono::{DateTime, Utc};

use crate::model::{
    CrewProductivityMetrics, EquipmentUtilizationMetrics, ExposureReading, ExposureStatus,
    GeoPoint, JobProgressMetrics, SafetyComplianceMetrics,
};
use crate::source::{BeaconReading, SafetyIncidentRecord, TimeEntryRecord, WorkOrderRecord};
use crate::telemetry::{EquipmentTelemetry, SilicaReading};
use crate::transform::{
    entry_activity, is_active_status, new_crew_member, score_unit, summarize_crew,
    summarize_equipment, summarize_jobs, summarize_safety, time_contribution, to_active_job,
    to_incident, ACTIVITY_LIMIT, RECENT_INCIDENT_LIMIT,
};

/// OSHA respirable crystalline silica action level, µg/m³ (8h TWA)
pub const SILICA_ACTION_LEVEL: f64 = 25.0;
/// OSHA respirable crystalline silica permissible exposure limit, µg/m³ (8h TWA)
pub const SILICA_PEL: f64 = 50.0;

/// What an updater did to its collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Patch {
    Replaced,
    Appended,
    Removed,
    Unchanged,
}

impl Patch {
    pub fn changed(&self) -> bool {
        *self != Patch::Unchanged
    }
}

// =============================================================================
// Job progress
// =============================================================================

pub fn apply_work_order(
    metrics: &mut JobProgressMetrics,
    record: &WorkOrderRecord,
    now: DateTime<Utc>,
) -> Patch {
    let position = metrics.active_jobs.iter().position(|j| j.id == record.id);
    let patch = match (position, is_active_status(&record.status)) {
        (Some(i), true) => {
            metrics.active_jobs[i] = to_active_job(record, now);
            Patch::Replaced
        }
        (Some(i), false) => {
            metrics.active_jobs.remove(i);
            if record.status == "completed" {
                metrics.summary.completed_in_range += 1;
            }
            Patch::Removed
        }
        (None, true) => {
            metrics.active_jobs.push(to_active_job(record, now));
            Patch::Appended
        }
        (None, false) => Patch::Unchanged,
    };
    if patch.changed() {
        summarize_jobs(metrics, now);
    }
    patch
}

pub fn remove_work_order(metrics: &mut JobProgressMetrics, id: &str, now: DateTime<Utc>) -> Patch {
    let before = metrics.active_jobs.len();
    metrics.active_jobs.retain(|j| j.id != id);
    if metrics.active_jobs.len() == before {
        return Patch::Unchanged;
    }
    summarize_jobs(metrics, now);
    Patch::Removed
}

// =============================================================================
// Crew productivity
// =============================================================================

pub fn apply_time_entry(
    metrics: &mut CrewProductivityMetrics,
    entry: &TimeEntryRecord,
    now: DateTime<Utc>,
) -> Patch {
    let (idx, patch) = match metrics
        .members
        .iter()
        .position(|m| m.employee_id == entry.employee_id)
    {
        Some(i) => (i, Patch::Replaced),
        None => {
            metrics.members.push(new_crew_member(entry));
            (metrics.members.len() - 1, Patch::Appended)
        }
    };

    let member = &mut metrics.members[idx];
    member
        .entries
        .insert(entry.id.clone(), time_contribution(entry, now));
    let seen = entry.clock_out.or(entry.clock_in);
    if seen > member.last_seen {
        member.last_seen = seen;
    }
    member.recompute();

    if let Some(activity) = entry_activity(entry) {
        if !metrics.real_time_activity.contains(&activity) {
            metrics.real_time_activity.insert(0, activity);
            metrics.real_time_activity.truncate(ACTIVITY_LIMIT);
        }
    }

    summarize_crew(metrics);
    patch
}

pub fn remove_time_entry(metrics: &mut CrewProductivityMetrics, entry: &TimeEntryRecord) -> Patch {
    let Some(member) = metrics
        .members
        .iter_mut()
        .find(|m| m.employee_id == entry.employee_id)
    else {
        return Patch::Unchanged;
    };
    if member.entries.remove(&entry.id).is_none() {
        return Patch::Unchanged;
    }
    member.recompute();
    summarize_crew(metrics);
    Patch::Replaced
}

fn reading_point(reading: &BeaconReading) -> GeoPoint {
    GeoPoint {
        latitude: reading.latitude,
        longitude: reading.longitude,
        zone: reading.zone.clone(),
    }
}

pub fn apply_beacon_to_crew(
    metrics: &mut CrewProductivityMetrics,
    employee_id: &str,
    reading: &BeaconReading,
    now: DateTime<Utc>,
) -> Patch {
    let Some(member) = metrics
        .members
        .iter_mut()
        .find(|m| m.employee_id == employee_id)
    else {
        return Patch::Unchanged;
    };
    member.last_location = Some(reading_point(reading));
    let seen = Some(reading.recorded_at.unwrap_or(now));
    if seen > member.last_seen {
        member.last_seen = seen;
    }
    summarize_crew(metrics);
    Patch::Replaced
}

// =============================================================================
// Equipment
// =============================================================================

pub fn apply_beacon_to_equipment(
    metrics: &mut EquipmentUtilizationMetrics,
    equipment_id: &str,
    reading: &BeaconReading,
    now: DateTime<Utc>,
) -> Patch {
    let Some(unit) = metrics.units.iter_mut().find(|u| u.id == equipment_id) else {
        return Patch::Unchanged;
    };
    unit.location = Some(reading_point(reading));
    let seen = Some(reading.recorded_at.unwrap_or(now));
    if seen > unit.last_seen {
        unit.last_seen = seen;
    }
    summarize_equipment(metrics);
    Patch::Replaced
}

/// Patch a unit's live fields from a telemetry push. Unknown equipment is
/// left to the caller to report.
pub fn apply_equipment_telemetry(
    metrics: &mut EquipmentUtilizationMetrics,
    message: &EquipmentTelemetry,
    now: DateTime<Utc>,
) -> Patch {
    let Some(unit) = metrics
        .units
        .iter_mut()
        .find(|u| u.id == message.equipment_id)
    else {
        return Patch::Unchanged;
    };

    if let Some(status) = &message.status {
        unit.status = status.clone();
    }
    if let Some(v) = message.battery_level {
        unit.battery_level = Some(v.clamp(0.0, 100.0));
    }
    if let Some(v) = message.signal_strength {
        unit.signal_strength = Some(v);
    }
    if let Some(v) = message.output_rate {
        unit.output_rate = Some(v.max(0.0));
    }
    if let Some(v) = message.hours_used {
        unit.hours_used = v;
    }
    if let Some(v) = message.engine_hours {
        unit.engine_hours = v;
    }
    if let Some(v) = message.hours_since_maintenance {
        unit.hours_since_maintenance = v;
    }
    if let Some(loc) = &message.location {
        unit.location = Some(loc.clone());
    }
    let seen = Some(message.timestamp.unwrap_or(now));
    if seen > unit.last_seen {
        unit.last_seen = seen;
    }
    score_unit(unit, message.temperature, message.vibration);

    summarize_equipment(metrics);
    Patch::Replaced
}

// =============================================================================
// Safety
// =============================================================================

pub fn apply_safety_incident(
    metrics: &mut SafetyComplianceMetrics,
    record: &SafetyIncidentRecord,
    now: DateTime<Utc>,
) -> Patch {
    let incident = to_incident(record, now);
    let first_seen = metrics.known_incidents.insert(incident.id.clone());
    match metrics
        .recent_incidents
        .iter()
        .position(|i| i.id == incident.id)
    {
        Some(i) => metrics.recent_incidents[i] = incident,
        None => metrics.recent_incidents.push(incident),
    }
    metrics
        .recent_incidents
        .sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    metrics.recent_incidents.truncate(RECENT_INCIDENT_LIMIT);
    metrics.summary.total_incidents = metrics.known_incidents.len();
    summarize_safety(metrics, now);
    if first_seen {
        Patch::Appended
    } else {
        Patch::Replaced
    }
}

pub fn remove_safety_incident(
    metrics: &mut SafetyComplianceMetrics,
    id: &str,
    now: DateTime<Utc>,
) -> Patch {
    let before = metrics.recent_incidents.len();
    metrics.recent_incidents.retain(|i| i.id != id);
    let forgotten = metrics.known_incidents.remove(id);
    if !forgotten && metrics.recent_incidents.len() == before {
        return Patch::Unchanged;
    }
    metrics.summary.total_incidents = metrics.known_incidents.len();
    summarize_safety(metrics, now);
    Patch::Removed
}

/// Record the latest reading for a monitor and count limit exceedances
pub fn apply_exposure_reading(
    exposure: &mut ExposureStatus,
    reading: &SilicaReading,
    now: DateTime<Utc>,
) -> Patch {
    let recorded_at = reading.timestamp.unwrap_or(now);
    let latest = ExposureReading {
        monitor_id: reading.monitor_id.clone(),
        employee_id: reading.employee_id.clone(),
        job_id: reading.job_id.clone(),
        value: reading.value,
        recorded_at,
    };

    let patch = match exposure
        .readings
        .iter()
        .position(|r| r.monitor_id == reading.monitor_id)
    {
        Some(i) if exposure.readings[i] == latest => return Patch::Unchanged,
        Some(i) => {
            exposure.readings[i] = latest;
            Patch::Replaced
        }
        None => {
            exposure.readings.push(latest);
            Patch::Appended
        }
    };

    if reading.value > SILICA_ACTION_LEVEL {
        exposure.readings_above_action_level += 1;
    }
    if reading.value > SILICA_PEL {
        exposure.readings_above_pel += 1;
    }
    exposure.max_reading = exposure.max_reading.max(reading.value);
    if Some(recorded_at) > exposure.last_reading_at {
        exposure.last_reading_at = Some(recorded_at);
    }
    patch
}
