// Change event router
//
// Normalizes database change notifications and telemetry pushes into
// `RealTimeEvent`s, patches the snapshot through the matching updater, then
// publishes the domain update and the generic event as two notifications.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::aggregator::SharedState;
use crate::bus::{Channel, Notification};
use crate::change::{ChangeEvent, ChangeKind};
use crate::event::{synthesize_id, EventCategory, Priority, RealTimeEvent};
use crate::model::{Alert, DashboardSnapshot, MaintenanceUrgency};
use crate::source::{
    BeaconAssignment, BeaconReading, DataSource, SafetyIncidentRecord, TimeEntryRecord,
    WorkOrderRecord,
};
use crate::telemetry::{
    ConnectionState, EquipmentTelemetry, SilicaReading, TelemetryHandler, TelemetrySource,
};
use crate::updaters::{self, SILICA_ACTION_LEVEL, SILICA_PEL};

/// Negative schedule variance (hours) beyond which a work order is critical
pub const CRITICAL_VARIANCE_HOURS: f64 = 8.0;

// =============================================================================
// Priority classification
// =============================================================================

pub fn classify_work_order(record: &WorkOrderRecord) -> Priority {
    if record.status == "emergency" {
        return Priority::Critical;
    }
    if record
        .schedule_variance_hours
        .map(|v| v < -CRITICAL_VARIANCE_HOURS)
        .unwrap_or(false)
    {
        return Priority::Critical;
    }
    record
        .priority
        .as_deref()
        .and_then(Priority::from_field)
        .unwrap_or(Priority::Low)
}

pub fn classify_safety(record: &SafetyIncidentRecord) -> Priority {
    let severity = Priority::from_field(&record.severity);
    if record.incident_type == "injury" || severity == Some(Priority::Critical) {
        return Priority::Critical;
    }
    if record.incident_type == "near_miss" || severity == Some(Priority::High) {
        return Priority::High;
    }
    severity.unwrap_or(Priority::Low)
}

pub fn classify_silica(reading: &SilicaReading) -> Priority {
    if reading.value > SILICA_PEL {
        Priority::Critical
    } else if reading.value > SILICA_ACTION_LEVEL {
        Priority::High
    } else {
        Priority::Low
    }
}

pub fn classify_urgency(urgency: MaintenanceUrgency) -> Priority {
    match urgency {
        MaintenanceUrgency::Critical => Priority::High,
        MaintenanceUrgency::High => Priority::Medium,
        MaintenanceUrgency::Medium | MaintenanceUrgency::Low => Priority::Low,
    }
}

/// Deserialize the row a change is about; malformed rows are dropped
fn decode<T: DeserializeOwned>(change: &ChangeEvent) -> Option<T> {
    let raw = change.record()?;
    match serde_json::from_value(raw.clone()) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(target: "router", table = %change.table, error = %e, "Dropping malformed change record");
            None
        }
    }
}

/// Add an alert for a high/critical event unless an unacknowledged alert
/// for the same source at the same or higher priority already exists
fn raise_alert(
    snapshot: &mut DashboardSnapshot,
    event: &RealTimeEvent,
    source_id: &str,
    title: String,
    cap: usize,
) -> Option<Alert> {
    if !event.priority.raises_alert() {
        return None;
    }
    let duplicate = snapshot.alerts.iter().any(|a| {
        !a.acknowledged
            && a.source_id.as_deref() == Some(source_id)
            && a.priority >= event.priority
    });
    if duplicate {
        return None;
    }
    let alert = Alert {
        id: synthesize_id("alert", event.timestamp),
        priority: event.priority,
        category: event.category,
        title,
        message: format!("{} ({})", event.event_type, event.priority),
        source_id: Some(source_id.to_string()),
        created_at: event.timestamp,
        acknowledged: false,
    };
    snapshot.push_alert(alert.clone(), cap);
    Some(alert)
}

// =============================================================================
// Router
// =============================================================================

/// Routes changes and telemetry for one aggregator session
pub struct ChangeRouter {
    shared: Arc<SharedState>,
    source: Arc<dyn DataSource>,
    session: u64,
}

impl ChangeRouter {
    pub(crate) fn new(shared: Arc<SharedState>, source: Arc<dyn DataSource>, session: u64) -> Self {
        Self {
            shared,
            source,
            session,
        }
    }

    /// Domain notification first, then the generic event, then any alert
    fn publish(
        &self,
        channel: Channel,
        update: Notification,
        event: RealTimeEvent,
        alert: Option<Alert>,
    ) {
        self.shared.bus.notify(channel, &update);
        self.shared.bus.notify(Channel::Events, &Notification::Event(event));
        if let Some(alert) = alert {
            self.shared.bus.notify(Channel::Alerts, &Notification::Alert(alert));
        }
    }

    pub async fn route(&self, change: ChangeEvent) {
        use crate::change::WatchedTable::*;
        match change.table {
            WorkOrders => self.route_work_order(change).await,
            TimeEntries => self.route_time_entry(change).await,
            BeaconReadings => self.route_beacon(change).await,
            SafetyIncidents => self.route_safety(change).await,
        }
    }

    async fn route_work_order(&self, change: ChangeEvent) {
        let Some(record) = decode::<WorkOrderRecord>(&change) else {
            return;
        };
        let event = RealTimeEvent::new(
            change.table.event_prefix(),
            EventCategory::JobProgress,
            change.event_type(),
            change.record().cloned().unwrap_or_default(),
            classify_work_order(&record),
        );
        let cap = self.shared.max_alerts;
        let patched = self
            .shared
            .patch(self.session, |snap| {
                let now = Utc::now();
                let patch = match change.kind {
                    ChangeKind::Delete => {
                        updaters::remove_work_order(&mut snap.job_progress, &record.id, now)
                    }
                    ChangeKind::Insert | ChangeKind::Update => {
                        updaters::apply_work_order(&mut snap.job_progress, &record, now)
                    }
                };
                debug!(target: "router", job_id = %record.id, ?patch, "Work order patched");
                let title = format!("Work order {} {}", record.job_number, record.status);
                let alert = raise_alert(snap, &event, &record.id, title, cap);
                (snap.job_progress.clone(), alert)
            })
            .await;

        match patched {
            Some((metrics, alert)) => self.publish(
                Channel::JobProgress,
                Notification::JobProgress(metrics),
                event,
                alert,
            ),
            None => debug!(target: "router", "No active session; work order change ignored"),
        }
    }

    async fn route_time_entry(&self, change: ChangeEvent) {
        let Some(entry) = decode::<TimeEntryRecord>(&change) else {
            return;
        };
        let event = RealTimeEvent::new(
            change.table.event_prefix(),
            EventCategory::CrewProductivity,
            change.event_type(),
            change.record().cloned().unwrap_or_default(),
            Priority::Low,
        );
        let patched = self
            .shared
            .patch(self.session, |snap| {
                let now = Utc::now();
                let patch = match change.kind {
                    ChangeKind::Delete => {
                        updaters::remove_time_entry(&mut snap.crew_productivity, &entry)
                    }
                    ChangeKind::Insert | ChangeKind::Update => {
                        updaters::apply_time_entry(&mut snap.crew_productivity, &entry, now)
                    }
                };
                debug!(target: "router", employee_id = %entry.employee_id, ?patch, "Time entry patched");
                snap.crew_productivity.clone()
            })
            .await;

        match patched {
            Some(metrics) => self.publish(
                Channel::CrewProductivity,
                Notification::CrewProductivity(metrics),
                event,
                None,
            ),
            None => debug!(target: "router", "No active session; time entry change ignored"),
        }
    }

    async fn route_beacon(&self, change: ChangeEvent) {
        if change.kind == ChangeKind::Delete {
            return;
        }
        let Some(reading) = decode::<BeaconReading>(&change) else {
            return;
        };

        // Cross-table lookup before touching the snapshot
        let assignment = match self.source.resolve_beacon(&reading.beacon_id).await {
            Ok(Some(a)) => a,
            Ok(None) => {
                debug!(target: "router", beacon_id = %reading.beacon_id, "Beacon not assigned; reading dropped");
                return;
            }
            Err(e) => {
                warn!(target: "router", beacon_id = %reading.beacon_id, error = %e, "Beacon lookup failed");
                return;
            }
        };

        let payload = change.record().cloned().unwrap_or_default();
        match assignment {
            BeaconAssignment::Equipment(equipment_id) => {
                let event = RealTimeEvent::new(
                    change.table.event_prefix(),
                    EventCategory::EquipmentUtilization,
                    "equipment_location",
                    payload,
                    Priority::Low,
                );
                let patched = self
                    .shared
                    .patch(self.session, |snap| {
                        let patch = updaters::apply_beacon_to_equipment(
                            &mut snap.equipment_utilization,
                            &equipment_id,
                            &reading,
                            Utc::now(),
                        );
                        (patch, snap.equipment_utilization.clone())
                    })
                    .await;
                match patched {
                    Some((patch, metrics)) if patch.changed() => self.publish(
                        Channel::EquipmentUtilization,
                        Notification::EquipmentUtilization(metrics),
                        event,
                        None,
                    ),
                    Some(_) => {
                        debug!(target: "router", equipment_id = %equipment_id, "Beacon equipment not tracked")
                    }
                    None => debug!(target: "router", "No active session; beacon ignored"),
                }
            }
            BeaconAssignment::Employee(employee_id) => {
                let event = RealTimeEvent::new(
                    change.table.event_prefix(),
                    EventCategory::CrewProductivity,
                    "crew_location",
                    payload,
                    Priority::Low,
                );
                let patched = self
                    .shared
                    .patch(self.session, |snap| {
                        let patch = updaters::apply_beacon_to_crew(
                            &mut snap.crew_productivity,
                            &employee_id,
                            &reading,
                            Utc::now(),
                        );
                        (patch, snap.crew_productivity.clone())
                    })
                    .await;
                match patched {
                    Some((patch, metrics)) if patch.changed() => self.publish(
                        Channel::CrewProductivity,
                        Notification::CrewProductivity(metrics),
                        event,
                        None,
                    ),
                    Some(_) => {
                        debug!(target: "router", employee_id = %employee_id, "Beacon employee not tracked")
                    }
                    None => debug!(target: "router", "No active session; beacon ignored"),
                }
            }
        }
    }

    async fn route_safety(&self, change: ChangeEvent) {
        let Some(record) = decode::<SafetyIncidentRecord>(&change) else {
            return;
        };
        let event = RealTimeEvent::new(
            change.table.event_prefix(),
            EventCategory::SafetyCompliance,
            change.event_type(),
            change.record().cloned().unwrap_or_default(),
            classify_safety(&record),
        );
        let cap = self.shared.max_alerts;
        let patched = self
            .shared
            .patch(self.session, |snap| {
                let now = Utc::now();
                match change.kind {
                    ChangeKind::Delete => {
                        updaters::remove_safety_incident(
                            &mut snap.safety_compliance,
                            &record.id,
                            now,
                        );
                    }
                    ChangeKind::Insert | ChangeKind::Update => {
                        updaters::apply_safety_incident(&mut snap.safety_compliance, &record, now);
                    }
                }
                let title = format!("Safety incident: {}", record.incident_type);
                let alert = match change.kind {
                    ChangeKind::Delete => None,
                    _ => raise_alert(snap, &event, &record.id, title, cap),
                };
                (snap.safety_compliance.clone(), alert)
            })
            .await;

        match patched {
            Some((metrics, alert)) => self.publish(
                Channel::SafetyCompliance,
                Notification::SafetyCompliance(metrics),
                event,
                alert,
            ),
            None => debug!(target: "router", "No active session; safety change ignored"),
        }
    }

    // -------------------------------------------------------------------------
    // Telemetry variant: direct deserialization, no change-type classification
    // -------------------------------------------------------------------------

    pub async fn handle_silica(&self, raw: &str) {
        let reading: SilicaReading = match serde_json::from_str(raw) {
            Ok(r) => r,
            Err(e) => {
                warn!(target: "router", source = "silica_monitor", error = %e, "Dropping malformed telemetry");
                return;
            }
        };
        let payload = serde_json::to_value(&reading).unwrap_or_default();
        let event = RealTimeEvent::new(
            TelemetrySource::SilicaMonitor.as_str(),
            EventCategory::SafetyCompliance,
            "silica_reading",
            payload,
            classify_silica(&reading),
        );
        let cap = self.shared.max_alerts;
        let patched = self
            .shared
            .patch(self.session, |snap| {
                updaters::apply_exposure_reading(
                    &mut snap.safety_compliance.exposure,
                    &reading,
                    Utc::now(),
                );
                let title = format!(
                    "Silica exposure {:.1} µg/m³ at monitor {}",
                    reading.value, reading.monitor_id
                );
                let alert = raise_alert(snap, &event, &reading.monitor_id, title, cap);
                (snap.safety_compliance.clone(), alert)
            })
            .await;

        if let Some((metrics, alert)) = patched {
            self.publish(
                Channel::SafetyCompliance,
                Notification::SafetyCompliance(metrics),
                event,
                alert,
            );
        }
    }

    pub async fn handle_equipment(&self, raw: &str) {
        let message: EquipmentTelemetry = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(e) => {
                warn!(target: "router", source = "equipment_telemetry", error = %e, "Dropping malformed telemetry");
                return;
            }
        };
        let cap = self.shared.max_alerts;
        let patched = self
            .shared
            .patch(self.session, |snap| {
                let patch = updaters::apply_equipment_telemetry(
                    &mut snap.equipment_utilization,
                    &message,
                    Utc::now(),
                );
                if !patch.changed() {
                    return None;
                }
                let urgency = snap
                    .equipment_utilization
                    .units
                    .iter()
                    .find(|u| u.id == message.equipment_id)
                    .map(|u| u.maintenance_urgency)
                    .unwrap_or_default();
                let event = RealTimeEvent::new(
                    TelemetrySource::EquipmentTelemetry.as_str(),
                    EventCategory::EquipmentUtilization,
                    "equipment_telemetry",
                    serde_json::to_value(&message).unwrap_or_default(),
                    classify_urgency(urgency),
                );
                let title = format!("Equipment {} needs attention", message.equipment_id);
                let alert = raise_alert(snap, &event, &message.equipment_id, title, cap);
                Some((snap.equipment_utilization.clone(), event, alert))
            })
            .await;

        match patched {
            Some(Some((metrics, event, alert))) => self.publish(
                Channel::EquipmentUtilization,
                Notification::EquipmentUtilization(metrics),
                event,
                alert,
            ),
            Some(None) => {
                debug!(target: "router", equipment_id = %message.equipment_id, "Unmatched equipment telemetry");
                self.shared.bus.notify(
                    Channel::UnmatchedTelemetry,
                    &Notification::UnmatchedTelemetry {
                        source: TelemetrySource::EquipmentTelemetry,
                        payload: serde_json::from_str(raw).unwrap_or_default(),
                    },
                );
            }
            None => debug!(target: "router", "No active session; telemetry ignored"),
        }
    }
}

#[async_trait]
impl TelemetryHandler for ChangeRouter {
    async fn on_message(&self, source: TelemetrySource, raw: String) {
        match source {
            TelemetrySource::SilicaMonitor => self.handle_silica(&raw).await,
            TelemetrySource::EquipmentTelemetry => self.handle_equipment(&raw).await,
        }
    }

    async fn on_state(&self, source: TelemetrySource, state: ConnectionState) {
        self.shared.bus.notify(
            Channel::ConnectionState,
            &Notification::Connection { source, state },
        );
    }
}
