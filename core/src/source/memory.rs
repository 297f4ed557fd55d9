// In-memory data source
//
// Fixture-backed `DataSource` used by the runner binary and by tests. Change
// notifications are injected with `emit`; individual domains can be made to
// fail to exercise degraded refreshes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use super::{
    BeaconAssignment, DataSource, EquipmentRecord, SafetyDataset, TimeEntryRecord,
    WorkOrderRecord,
};
use crate::change::{ChangeEvent, WatchedTable};
use crate::config::TimeRange;
use crate::model::Kpis;
use crate::{AnalyticsError, Result};

const WATCH_CAPACITY: usize = 256;

/// Fetch operations that can be counted or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchDomain {
    WorkOrders,
    Equipment,
    TimeEntries,
    Safety,
    Kpis,
}

/// Seed data for one company
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixtures {
    /// When set, fetches for any other company return nothing
    pub company_id: Option<String>,
    pub work_orders: Vec<WorkOrderRecord>,
    pub equipment: Vec<EquipmentRecord>,
    pub time_entries: Vec<TimeEntryRecord>,
    pub safety: SafetyDataset,
    pub kpis: Option<Kpis>,
    pub beacons: HashMap<String, BeaconAssignment>,
}

impl Fixtures {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn serves(&self, company_id: &str) -> bool {
        self.company_id
            .as_deref()
            .map(|c| c == company_id)
            .unwrap_or(true)
    }
}

pub struct MemoryDataSource {
    fixtures: RwLock<Fixtures>,
    watchers: DashMap<WatchedTable, Vec<mpsc::Sender<ChangeEvent>>>,
    failures: DashMap<FetchDomain, String>,
    fetch_counts: DashMap<FetchDomain, AtomicU64>,
}

impl MemoryDataSource {
    pub fn new(fixtures: Fixtures) -> Self {
        Self {
            fixtures: RwLock::new(fixtures),
            watchers: DashMap::new(),
            failures: DashMap::new(),
            fetch_counts: DashMap::new(),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let fixtures = Fixtures::from_json_file(path)?;
        info!(target: "data_source", path = %path.display(), "Loaded fixtures");
        Ok(Self::new(fixtures))
    }

    /// Make every subsequent fetch of `domain` fail with `message`
    pub fn fail(&self, domain: FetchDomain, message: impl Into<String>) {
        self.failures.insert(domain, message.into());
    }

    pub fn recover(&self, domain: FetchDomain) {
        self.failures.remove(&domain);
    }

    pub fn fetch_count(&self, domain: FetchDomain) -> u64 {
        self.fetch_counts
            .get(&domain)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Mutate the seed data; later fetches observe the change
    pub async fn update_fixtures<F>(&self, f: F)
    where
        F: FnOnce(&mut Fixtures),
    {
        let mut fixtures = self.fixtures.write().await;
        f(&mut fixtures);
    }

    /// Deliver a change notification to every open watcher of its table.
    /// Returns the number of watchers reached.
    pub async fn emit(&self, event: ChangeEvent) -> usize {
        let senders: Vec<mpsc::Sender<ChangeEvent>> = match self.watchers.get_mut(&event.table) {
            Some(mut entry) => {
                entry.value_mut().retain(|tx| !tx.is_closed());
                entry.value().clone()
            }
            None => Vec::new(),
        };

        let mut delivered = 0;
        for tx in senders {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        debug!(target: "data_source", table = %event.table, delivered, "Emitted change");
        delivered
    }

    /// Number of watchers whose receiver is still alive
    pub fn active_watchers(&self, table: WatchedTable) -> usize {
        self.watchers
            .get(&table)
            .map(|w| w.value().iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn begin_fetch(&self, domain: FetchDomain) -> Result<()> {
        self.fetch_counts
            .entry(domain)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst);
        match self.failures.get(&domain) {
            Some(msg) => Err(AnalyticsError::DataSource(msg.value().clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    async fn fetch_work_orders(
        &self,
        company_id: &str,
        _range: TimeRange,
    ) -> Result<Vec<WorkOrderRecord>> {
        self.begin_fetch(FetchDomain::WorkOrders)?;
        let fixtures = self.fixtures.read().await;
        if !fixtures.serves(company_id) {
            return Ok(Vec::new());
        }
        Ok(fixtures.work_orders.clone())
    }

    async fn fetch_equipment(&self, company_id: &str) -> Result<Vec<EquipmentRecord>> {
        self.begin_fetch(FetchDomain::Equipment)?;
        let fixtures = self.fixtures.read().await;
        if !fixtures.serves(company_id) {
            return Ok(Vec::new());
        }
        Ok(fixtures.equipment.clone())
    }

    async fn fetch_time_entries(
        &self,
        company_id: &str,
        _range: TimeRange,
    ) -> Result<Vec<TimeEntryRecord>> {
        self.begin_fetch(FetchDomain::TimeEntries)?;
        let fixtures = self.fixtures.read().await;
        if !fixtures.serves(company_id) {
            return Ok(Vec::new());
        }
        Ok(fixtures.time_entries.clone())
    }

    async fn fetch_safety(&self, company_id: &str, _range: TimeRange) -> Result<SafetyDataset> {
        self.begin_fetch(FetchDomain::Safety)?;
        let fixtures = self.fixtures.read().await;
        if !fixtures.serves(company_id) {
            return Ok(SafetyDataset::default());
        }
        Ok(fixtures.safety.clone())
    }

    async fn fetch_kpis(&self, company_id: &str, _range: TimeRange) -> Result<Kpis> {
        self.begin_fetch(FetchDomain::Kpis)?;
        let fixtures = self.fixtures.read().await;
        if !fixtures.serves(company_id) {
            return Ok(Kpis::default());
        }
        fixtures
            .kpis
            .clone()
            .ok_or_else(|| AnalyticsError::DataSource("KPI procedure returned no rows".into()))
    }

    async fn resolve_beacon(&self, beacon_id: &str) -> Result<Option<BeaconAssignment>> {
        Ok(self.fixtures.read().await.beacons.get(beacon_id).cloned())
    }

    async fn watch(
        &self,
        table: WatchedTable,
        company_id: &str,
    ) -> Result<mpsc::Receiver<ChangeEvent>> {
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        self.watchers.entry(table).or_default().push(tx);
        debug!(target: "data_source", table = %table, company_id = %company_id, "Opened change stream");
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn emit_reaches_open_watchers_only() {
        let source = MemoryDataSource::new(Fixtures::default());
        let mut rx1 = source.watch(WatchedTable::WorkOrders, "c").await.unwrap();
        let rx2 = source.watch(WatchedTable::WorkOrders, "c").await.unwrap();
        assert_eq!(source.active_watchers(WatchedTable::WorkOrders), 2);

        drop(rx2);
        assert_eq!(source.active_watchers(WatchedTable::WorkOrders), 1);

        let evt = ChangeEvent::update(WatchedTable::WorkOrders, json!({"id": "wo-1"}));
        assert_eq!(source.emit(evt).await, 1);
        assert!(rx1.recv().await.is_some());
    }

    #[tokio::test]
    async fn failure_injection_and_counts() {
        let source = MemoryDataSource::new(Fixtures::default());
        source.fail(FetchDomain::Equipment, "boom");
        assert!(source.fetch_equipment("c").await.is_err());
        source.recover(FetchDomain::Equipment);
        assert!(source.fetch_equipment("c").await.is_ok());
        assert_eq!(source.fetch_count(FetchDomain::Equipment), 2);
    }

    #[tokio::test]
    async fn other_companies_see_nothing() {
        let fixtures = Fixtures {
            company_id: Some("company-1".into()),
            work_orders: vec![WorkOrderRecord {
                id: "wo-1".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let source = MemoryDataSource::new(fixtures);
        assert_eq!(
            source
                .fetch_work_orders("company-1", TimeRange::Day)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(source
            .fetch_work_orders("company-2", TimeRange::Day)
            .await
            .unwrap()
            .is_empty());
    }
}
