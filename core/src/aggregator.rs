// Analytics aggregator
//
// Owns the dashboard snapshot for one company session. `initialize` pulls every
// metric domain in parallel, then keeps the snapshot live from change streams,
// telemetry feeds and a periodic full refresh. Consumers subscribe to channels
// on the notification bus and only ever receive clones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{Channel, Notification, NotificationBus, SubscriptionId};
use crate::change::WatchedTable;
use crate::config::{AggregatorConfig, RefreshRate, TimeRange};
use crate::model::{Alert, DashboardSnapshot, Kpis};
use crate::router::ChangeRouter;
use crate::scheduler::RefreshScheduler;
use crate::source::{
    DataSource, EquipmentRecord, SafetyDataset, TimeEntryRecord, WorkOrderRecord,
};
use crate::telemetry::{TelemetryConnector, TelemetryListener, TelemetrySource};
use crate::transform;
use crate::{AnalyticsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Active,
}

// =============================================================================
// Shared session state
// =============================================================================

pub(crate) struct ActiveSession {
    id: u64,
    snapshot: DashboardSnapshot,
}

/// State shared between the aggregator, its router and its refresh timer
pub(crate) struct SharedState {
    session: RwLock<Option<ActiveSession>>,
    pub(crate) bus: NotificationBus,
    pub(crate) max_alerts: usize,
}

impl SharedState {
    fn new(max_alerts: usize) -> Self {
        Self {
            session: RwLock::new(None),
            bus: NotificationBus::new(),
            max_alerts,
        }
    }

    /// Run `f` against the snapshot if session `id` is still the live one,
    /// then advance `last_updated`. Returns None once the session is gone.
    pub(crate) async fn patch<F, R>(&self, id: u64, f: F) -> Option<R>
    where
        F: FnOnce(&mut DashboardSnapshot) -> R,
    {
        let mut guard = self.session.write().await;
        match guard.as_mut() {
            Some(session) if session.id == id => {
                let out = f(&mut session.snapshot);
                session.snapshot.touch();
                Some(out)
            }
            _ => None,
        }
    }

    async fn current(&self) -> Option<u64> {
        self.session.read().await.as_ref().map(|s| s.id)
    }
}

// =============================================================================
// Full pulls
// =============================================================================

/// Raw record sets from one round of parallel fetches
#[derive(Debug, Default)]
struct Pulled {
    work_orders: Vec<WorkOrderRecord>,
    equipment: Vec<EquipmentRecord>,
    time_entries: Vec<TimeEntryRecord>,
    safety: SafetyDataset,
    kpis: Kpis,
}

/// A failed domain keeps its default so the rest of the dashboard still loads
fn degrade<T: Default>(domain: &str, company_id: &str, result: Result<T>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            warn!(target: "aggregator", company_id = %company_id, domain = domain, error = %e, "Fetch failed; domain left empty");
            T::default()
        }
    }
}

async fn pull_all(source: &dyn DataSource, company_id: &str, range: TimeRange) -> Pulled {
    let (work_orders, equipment, time_entries, safety, kpis) = tokio::join!(
        source.fetch_work_orders(company_id, range),
        source.fetch_equipment(company_id),
        source.fetch_time_entries(company_id, range),
        source.fetch_safety(company_id, range),
        source.fetch_kpis(company_id, range),
    );
    Pulled {
        work_orders: degrade("work_orders", company_id, work_orders),
        equipment: degrade("equipment", company_id, equipment),
        time_entries: degrade("time_entries", company_id, time_entries),
        safety: degrade("safety", company_id, safety),
        kpis: degrade("kpis", company_id, kpis),
    }
}

/// Replace every metric domain of `snapshot` from a fresh pull. Alerts and
/// trends carry over; returns the alerts newly raised by this refresh.
fn apply_pull(snapshot: &mut DashboardSnapshot, pulled: Pulled, max_alerts: usize) -> Vec<Alert> {
    let now = Utc::now();
    snapshot.kpis = pulled.kpis;
    snapshot.job_progress = transform::job_progress(&pulled.work_orders, now);
    snapshot.equipment_utilization = transform::equipment_utilization(&pulled.equipment);
    snapshot.crew_productivity = transform::crew_productivity(&pulled.time_entries, now);
    // Exposure readings only arrive over telemetry
    let exposure = std::mem::take(&mut snapshot.safety_compliance.exposure);
    snapshot.safety_compliance = transform::safety_compliance(&pulled.safety, now);
    snapshot.safety_compliance.exposure = exposure;
    snapshot.predictions = transform::derive_predictions(
        &snapshot.job_progress,
        &snapshot.equipment_utilization,
        now,
    );
    transform::extend_trends(
        &mut snapshot.trends,
        &snapshot.job_progress,
        &snapshot.equipment_utilization,
        &snapshot.crew_productivity,
        &snapshot.safety_compliance,
        now,
        snapshot.time_range.trend_buckets(),
    );

    let raised = transform::derive_alerts(
        &snapshot.job_progress,
        &snapshot.equipment_utilization,
        &snapshot.safety_compliance,
        &snapshot.alerts,
        now,
    );
    for alert in raised.iter().rev() {
        snapshot.push_alert(alert.clone(), max_alerts);
    }
    raised
}

fn empty_snapshot(company_id: &str, range: TimeRange, rate: RefreshRate) -> DashboardSnapshot {
    DashboardSnapshot {
        company_id: company_id.to_string(),
        last_updated: Utc::now(),
        refresh_rate: rate,
        time_range: range,
        kpis: Kpis::default(),
        job_progress: Default::default(),
        equipment_utilization: Default::default(),
        crew_productivity: Default::default(),
        safety_compliance: Default::default(),
        predictions: Default::default(),
        alerts: Vec::new(),
        trends: transform::empty_trends(),
    }
}

/// Full refresh of a live session. Publishes `dashboard_update` with the new
/// snapshot and one `alerts` notification per newly raised alert.
async fn refresh_session(
    shared: &SharedState,
    source: &dyn DataSource,
    session: u64,
    company_id: &str,
) -> Result<()> {
    let range = match shared.session.read().await.as_ref() {
        Some(s) if s.id == session => s.snapshot.time_range,
        _ => return Err(AnalyticsError::NotActive),
    };

    let pulled = pull_all(source, company_id, range).await;
    let max_alerts = shared.max_alerts;
    let applied = shared
        .patch(session, |snap| {
            snap.company_id = company_id.to_string();
            let raised = apply_pull(snap, pulled, max_alerts);
            snap.touch();
            (snap.clone(), raised)
        })
        .await;

    let Some((snapshot, raised)) = applied else {
        debug!(target: "aggregator", company_id = %company_id, "Session ended during refresh; result discarded");
        return Err(AnalyticsError::NotActive);
    };

    info!(target: "aggregator", company_id = %company_id, jobs = snapshot.job_progress.active_jobs.len(), "Dashboard refreshed");
    shared
        .bus
        .notify(Channel::DashboardUpdate, &Notification::Dashboard(Box::new(snapshot)));
    for alert in raised {
        shared.bus.notify(Channel::Alerts, &Notification::Alert(alert));
    }
    Ok(())
}

// =============================================================================
// Aggregator
// =============================================================================

/// Background work owned by the live session
#[derive(Default)]
struct SessionTasks {
    watchers: Vec<JoinHandle<()>>,
    listeners: Vec<TelemetryListener>,
    timer: Option<RefreshScheduler>,
}

impl SessionTasks {
    fn shutdown(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }
        for watcher in self.watchers.drain(..) {
            watcher.abort();
        }
        for listener in self.listeners.drain(..) {
            listener.stop();
        }
    }
}

pub struct AnalyticsAggregator {
    config: AggregatorConfig,
    source: Arc<dyn DataSource>,
    connector: Option<Arc<dyn TelemetryConnector>>,
    shared: Arc<SharedState>,
    next_session: AtomicU64,
    /// Held for the whole of initialize/cleanup so the two never interleave
    tasks: Mutex<SessionTasks>,
}

impl AnalyticsAggregator {
    pub fn new(source: Arc<dyn DataSource>, config: AggregatorConfig) -> Self {
        let shared = Arc::new(SharedState::new(config.max_alerts));
        Self {
            config,
            source,
            connector: None,
            shared,
            next_session: AtomicU64::new(0),
            tasks: Mutex::new(SessionTasks::default()),
        }
    }

    /// Enable telemetry listeners for the feeds named in the config
    pub fn with_connector(mut self, connector: Arc<dyn TelemetryConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Load the dashboard for `company_id` and start live updates.
    ///
    /// Domain fetch failures degrade to empty metrics rather than failing the
    /// call. Fails with `AlreadyActive` while a session is live.
    pub async fn initialize(
        &self,
        company_id: &str,
        time_range: TimeRange,
        refresh_rate: RefreshRate,
    ) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if let Some(active) = self.shared.session.read().await.as_ref() {
            return Err(AnalyticsError::AlreadyActive(active.snapshot.company_id.clone()));
        }

        info!(target: "aggregator", company_id = %company_id, time_range = %time_range, refresh_rate = %refresh_rate, "Initializing analytics session");

        let pulled = pull_all(self.source.as_ref(), company_id, time_range).await;
        let mut snapshot = empty_snapshot(company_id, time_range, refresh_rate);
        let raised = apply_pull(&mut snapshot, pulled, self.config.max_alerts);
        snapshot.touch();

        let session = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        *self.shared.session.write().await = Some(ActiveSession { id: session, snapshot });
        if !raised.is_empty() {
            debug!(target: "aggregator", count = raised.len(), "Initial alerts raised");
        }

        let router = Arc::new(ChangeRouter::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.source),
            session,
        ));

        for table in WatchedTable::ALL {
            match self.source.watch(table, company_id).await {
                Ok(mut rx) => {
                    let router = Arc::clone(&router);
                    tasks.watchers.push(tokio::spawn(async move {
                        while let Some(change) = rx.recv().await {
                            router.route(change).await;
                        }
                        debug!(target: "aggregator", table = %table, "Change stream ended");
                    }));
                }
                Err(e) => {
                    warn!(target: "aggregator", table = %table, error = %e, "Change stream unavailable; table will update on refresh only");
                }
            }
        }

        if let Some(connector) = &self.connector {
            let feeds = [
                (TelemetrySource::SilicaMonitor, &self.config.silica_monitor_url),
                (TelemetrySource::EquipmentTelemetry, &self.config.equipment_telemetry_url),
            ];
            for (source, url) in feeds {
                let Some(endpoint) = url else {
                    continue;
                };
                tasks.listeners.push(TelemetryListener::spawn(
                    source,
                    endpoint.clone(),
                    Arc::clone(connector),
                    self.config.backoff.clone(),
                    router.clone(),
                ));
            }
        }

        if let Some(period) = refresh_rate.interval() {
            let shared = Arc::clone(&self.shared);
            let source = Arc::clone(&self.source);
            let company = company_id.to_string();
            tasks.timer = Some(RefreshScheduler::start(period, move || {
                let shared = Arc::clone(&shared);
                let source = Arc::clone(&source);
                let company = company.clone();
                async move {
                    if let Err(e) =
                        refresh_session(&shared, source.as_ref(), session, &company).await
                    {
                        debug!(target: "aggregator", error = %e, "Scheduled refresh skipped");
                    }
                }
            }));
        }

        info!(
            target: "aggregator",
            company_id = %company_id,
            watchers = tasks.watchers.len(),
            listeners = tasks.listeners.len(),
            timer = tasks.timer.is_some(),
            "Analytics session active"
        );
        Ok(())
    }

    pub fn subscribe<F>(&self, channel: Channel, callback: F) -> SubscriptionId
    where
        F: Fn(&Notification) -> Result<()> + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(channel, callback)
    }

    pub fn unsubscribe(&self, channel: Channel, id: SubscriptionId) -> bool {
        self.shared.bus.unsubscribe(channel, id)
    }

    /// Copy of the current snapshot, or None when idle
    pub async fn get_aggregated_data(&self) -> Option<DashboardSnapshot> {
        self.shared
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.snapshot.clone())
    }

    /// Re-pull every domain and replace the snapshot wholesale
    pub async fn refresh_all_data(&self, company_id: &str) -> Result<()> {
        let session = self.shared.current().await.ok_or(AnalyticsError::NotActive)?;
        refresh_session(&self.shared, self.source.as_ref(), session, company_id).await
    }

    /// Add an externally raised alert and publish it on `alerts`
    pub async fn publish_alert(&self, alert: Alert) -> Result<()> {
        let session = self.shared.current().await.ok_or(AnalyticsError::NotActive)?;
        let cap = self.shared.max_alerts;
        let published = alert.clone();
        self.shared
            .patch(session, |snap| snap.push_alert(alert, cap))
            .await
            .ok_or(AnalyticsError::NotActive)?;
        self.shared
            .bus
            .notify(Channel::Alerts, &Notification::Alert(published));
        Ok(())
    }

    /// Stop all background work and discard the snapshot. Safe to call
    /// any number of times.
    pub async fn cleanup(&self) {
        let mut tasks = self.tasks.lock().await;
        tasks.shutdown();
        self.shared.bus.clear();
        let previous = self.shared.session.write().await.take();
        match previous {
            Some(session) => {
                info!(target: "aggregator", company_id = %session.snapshot.company_id, "Analytics session cleaned up")
            }
            None => debug!(target: "aggregator", "Cleanup with no active session"),
        }
    }

    pub async fn state(&self) -> ServiceState {
        if self.shared.session.read().await.is_some() {
            ServiceState::Active
        } else {
            ServiceState::Idle
        }
    }

    pub async fn active_watchers(&self) -> usize {
        self.tasks
            .lock()
            .await
            .watchers
            .iter()
            .filter(|w| !w.is_finished())
            .count()
    }

    pub async fn active_listeners(&self) -> usize {
        self.tasks
            .lock()
            .await
            .listeners
            .iter()
            .filter(|l| l.is_running())
            .count()
    }

    pub async fn has_refresh_timer(&self) -> bool {
        self.tasks.lock().await.timer.is_some()
    }
}

impl Drop for AnalyticsAggregator {
    fn drop(&mut self) {
        self.tasks.get_mut().shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Fixtures, MemoryDataSource};

    fn aggregator() -> AnalyticsAggregator {
        let source = Arc::new(MemoryDataSource::new(Fixtures::default()));
        AnalyticsAggregator::new(source, AggregatorConfig::default())
    }

    #[tokio::test]
    async fn idle_until_initialized() {
        let agg = aggregator();
        assert_eq!(agg.state().await, ServiceState::Idle);
        assert!(agg.get_aggregated_data().await.is_none());
        assert!(matches!(
            agg.refresh_all_data("acme").await,
            Err(AnalyticsError::NotActive)
        ));
    }

    #[tokio::test]
    async fn empty_backend_yields_empty_snapshot() {
        let agg = aggregator();
        agg.initialize("acme", TimeRange::Day, RefreshRate::Manual)
            .await
            .unwrap();
        let snap = agg.get_aggregated_data().await.unwrap();
        assert_eq!(snap.company_id, "acme");
        assert!(snap.job_progress.active_jobs.is_empty());
        assert!(snap.alerts.is_empty());
        // kpis fixture missing: degraded, not fatal
        assert_eq!(snap.kpis, Kpis::default());
        assert_eq!(snap.trends.job_completion.points.len(), 1);
        agg.cleanup().await;
    }

    #[tokio::test]
    async fn patch_is_rejected_for_stale_session() {
        let agg = aggregator();
        agg.initialize("acme", TimeRange::Day, RefreshRate::Manual)
            .await
            .unwrap();
        let live = agg.shared.current().await.unwrap();
        assert!(agg.shared.patch(live + 1, |_| ()).await.is_none());
        assert!(agg.shared.patch(live, |_| ()).await.is_some());
        agg.cleanup().await;
        assert!(agg.shared.patch(live, |_| ()).await.is_none());
    }
}
