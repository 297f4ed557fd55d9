mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use common::{
    config, equipment, next, record, settle, staffed_site, three_jobs, work_order_row,
};
use pontifex_core::model::{Alert, EquipmentUtilizationMetrics};
use pontifex_core::source::{BeaconAssignment, FetchDomain, Fixtures};
use pontifex_core::{
    AnalyticsAggregator, AnalyticsError, Channel, ChangeEvent, EventCategory, MemoryDataSource,
    Notification, Priority, RefreshRate, Result, TimeRange, WatchedTable,
};
use serde_json::json;

async fn start(fixtures: Fixtures) -> Result<(Arc<MemoryDataSource>, AnalyticsAggregator)> {
    let source = Arc::new(MemoryDataSource::new(fixtures));
    let agg = AnalyticsAggregator::new(source.clone(), config());
    agg.initialize("acme", TimeRange::Day, RefreshRate::Manual)
        .await?;
    Ok((source, agg))
}

#[tokio::test]
async fn work_order_update_patches_one_job() -> Result<()> {
    let (source, agg) = start(three_jobs()).await?;
    let mut jobs = record(&agg, Channel::JobProgress);
    let mut events = record(&agg, Channel::Events);

    source
        .emit(ChangeEvent::update(
            WatchedTable::WorkOrders,
            work_order_row("wo-2", "in_progress", 80.0),
        ))
        .await;

    match next(&mut jobs).await {
        Notification::JobProgress(m) => {
            assert_eq!(m.active_jobs.len(), 3);
            let job = m.active_jobs.iter().find(|j| j.id == "wo-2").expect("wo-2");
            assert_eq!(job.progress_percent, 80.0);
        }
        other => panic!("unexpected {:?}", other),
    }
    match next(&mut events).await {
        Notification::Event(e) => {
            assert_eq!(e.event_type, "work_order_update");
            assert_eq!(e.category, EventCategory::JobProgress);
            assert_eq!(e.priority, Priority::Low);
            assert!(e.id.starts_with("work_order_"));
        }
        other => panic!("unexpected {:?}", other),
    }

    settle().await;
    assert!(jobs.try_recv().is_err(), "exactly one job_progress notification");

    let snap = agg.get_aggregated_data().await.expect("active");
    assert_eq!(snap.job_progress.active_jobs.len(), 3);
    agg.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn completed_work_order_leaves_active_set() -> Result<()> {
    let (source, agg) = start(three_jobs()).await?;
    let mut jobs = record(&agg, Channel::JobProgress);

    source
        .emit(ChangeEvent::update(
            WatchedTable::WorkOrders,
            work_order_row("wo-1", "completed", 100.0),
        ))
        .await;

    match next(&mut jobs).await {
        Notification::JobProgress(m) => {
            assert_eq!(m.active_jobs.len(), 2);
            assert_eq!(m.summary.completed_in_range, 1);
            assert!(m.active_jobs.iter().all(|j| j.id != "wo-1"));
        }
        other => panic!("unexpected {:?}", other),
    }
    agg.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn emergency_work_order_raises_one_critical_alert() -> Result<()> {
    let (source, agg) = start(three_jobs()).await?;
    let mut jobs = record(&agg, Channel::JobProgress);
    let mut alerts = record(&agg, Channel::Alerts);

    let row = work_order_row("wo-9", "emergency", 0.0);
    source
        .emit(ChangeEvent::insert(WatchedTable::WorkOrders, row.clone()))
        .await;

    match next(&mut alerts).await {
        Notification::Alert(a) => {
            assert_eq!(a.priority, Priority::Critical);
            assert_eq!(a.source_id.as_deref(), Some("wo-9"));
        }
        other => panic!("unexpected {:?}", other),
    }
    match next(&mut jobs).await {
        Notification::JobProgress(m) => assert_eq!(m.active_jobs.len(), 4),
        other => panic!("unexpected {:?}", other),
    }

    // Same record again: patched, but not alerted twice
    source
        .emit(ChangeEvent::update(WatchedTable::WorkOrders, row))
        .await;
    next(&mut jobs).await;
    settle().await;
    assert!(alerts.try_recv().is_err());

    let snap = agg.get_aggregated_data().await.expect("active");
    assert_eq!(snap.alerts.len(), 1);
    agg.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn injury_is_critical_safety_event() -> Result<()> {
    let (source, agg) = start(three_jobs()).await?;
    let mut safety = record(&agg, Channel::SafetyCompliance);
    let mut events = record(&agg, Channel::Events);
    let mut alerts = record(&agg, Channel::Alerts);

    source
        .emit(ChangeEvent::insert(
            WatchedTable::SafetyIncidents,
            json!({
                "id": "inc-7",
                "incident_type": "injury",
                "severity": "low",
                "description": "Laceration while handling slab",
                "status": "open",
                "occurred_at": Utc::now(),
            }),
        ))
        .await;

    match next(&mut safety).await {
        Notification::SafetyCompliance(m) => {
            assert_eq!(m.recent_incidents.len(), 1);
            assert_eq!(m.summary.open_incidents, 1);
        }
        other => panic!("unexpected {:?}", other),
    }
    match next(&mut events).await {
        Notification::Event(e) => {
            assert_eq!(e.event_type, "safety_insert");
            assert_eq!(e.priority, Priority::Critical);
        }
        other => panic!("unexpected {:?}", other),
    }
    match next(&mut alerts).await {
        Notification::Alert(a) => assert_eq!(a.category, EventCategory::SafetyCompliance),
        other => panic!("unexpected {:?}", other),
    }
    agg.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn time_entry_delete_uses_old_row() -> Result<()> {
    let fixtures = Fixtures {
        time_entries: vec![serde_json::from_value(json!({
            "id": "te-1",
            "employee_id": "emp-1",
            "employee_name": "Dana",
            "team": "install",
            "clock_in": Utc::now(),
            "hours": 3.0,
            "productive_hours": 2.0,
        }))?],
        ..three_jobs()
    };
    let (source, agg) = start(fixtures).await?;
    let mut crew = record(&agg, Channel::CrewProductivity);
    let before = agg.get_aggregated_data().await.expect("active");
    assert_eq!(before.crew_productivity.summary.total_crew, 1);

    source
        .emit(ChangeEvent::delete(
            WatchedTable::TimeEntries,
            json!({"id": "te-1", "employee_id": "emp-1"}),
        ))
        .await;

    match next(&mut crew).await {
        Notification::CrewProductivity(m) => {
            assert_eq!(m.summary.total_hours, 0.0);
            assert_eq!(m.summary.clocked_in, 0);
        }
        other => panic!("unexpected {:?}", other),
    }
    agg.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn beacon_reading_moves_assigned_equipment() -> Result<()> {
    let mut beacons = HashMap::new();
    beacons.insert("bcn-1".to_string(), BeaconAssignment::Equipment("saw-1".into()));
    let fixtures = Fixtures {
        beacons,
        ..three_jobs()
    };
    let (source, agg) = start(fixtures).await?;
    let mut equip = record(&agg, Channel::EquipmentUtilization);

    source
        .emit(ChangeEvent::insert(
            WatchedTable::BeaconReadings,
            json!({"id": "r1", "beacon_id": "bcn-1", "latitude": 45.5, "longitude": -122.6, "zone": "yard"}),
        ))
        .await;

    match next(&mut equip).await {
        Notification::EquipmentUtilization(m) => {
            let unit = m.units.iter().find(|u| u.id == "saw-1").expect("saw-1");
            let location = unit.location.as_ref().expect("located");
            assert_eq!(location.latitude, 45.5);
            assert_eq!(location.zone.as_deref(), Some("yard"));
            assert!(unit.last_seen.is_some());
        }
        other => panic!("unexpected {:?}", other),
    }

    // Unassigned beacons are dropped
    source
        .emit(ChangeEvent::insert(
            WatchedTable::BeaconReadings,
            json!({"id": "r2", "beacon_id": "bcn-unknown", "latitude": 1.0, "longitude": 1.0}),
        ))
        .await;
    settle().await;
    assert!(equip.try_recv().is_err());
    agg.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn malformed_rows_are_dropped() -> Result<()> {
    let (source, agg) = start(three_jobs()).await?;
    let mut jobs = record(&agg, Channel::JobProgress);

    source
        .emit(ChangeEvent::update(
            WatchedTable::WorkOrders,
            json!({"id": "wo-1", "progress_percent": "lots"}),
        ))
        .await;
    settle().await;
    assert!(jobs.try_recv().is_err());
    agg.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn failing_subscribers_do_not_block_others() -> Result<()> {
    let (source, agg) = start(three_jobs()).await?;
    agg.subscribe(Channel::JobProgress, |_| panic!("subscriber bug"));
    agg.subscribe(Channel::JobProgress, |_| {
        Err(AnalyticsError::Subscriber("rejected".into()))
    });
    let mut jobs = record(&agg, Channel::JobProgress);

    for progress in [50.0, 70.0] {
        source
            .emit(ChangeEvent::update(
                WatchedTable::WorkOrders,
                work_order_row("wo-1", "in_progress", progress),
            ))
            .await;
        match next(&mut jobs).await {
            Notification::JobProgress(m) => {
                let job = m.active_jobs.iter().find(|j| j.id == "wo-1").expect("wo-1");
                assert_eq!(job.progress_percent, progress);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    agg.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn unsubscribe_stops_delivery() -> Result<()> {
    let (source, agg) = start(three_jobs()).await?;
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let id = agg.subscribe(Channel::JobProgress, move |_| {
        h.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let mut jobs = record(&agg, Channel::JobProgress);

    assert!(agg.unsubscribe(Channel::JobProgress, id));
    assert!(!agg.unsubscribe(Channel::JobProgress, id));

    source
        .emit(ChangeEvent::update(
            WatchedTable::WorkOrders,
            work_order_row("wo-3", "in_progress", 65.0),
        ))
        .await;
    next(&mut jobs).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    agg.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn failed_domain_degrades_to_empty() -> Result<()> {
    let source = Arc::new(MemoryDataSource::new(Fixtures {
        kpis: Some(Default::default()),
        ..staffed_site()
    }));
    source.fail(FetchDomain::Equipment, "connection reset");
    let agg = AnalyticsAggregator::new(source.clone(), config());
    agg.initialize("acme", TimeRange::Day, RefreshRate::Manual)
        .await?;

    let snap = agg.get_aggregated_data().await.expect("active");
    assert_eq!(
        snap.equipment_utilization,
        EquipmentUtilizationMetrics::default()
    );
    // the other domains still carry backend data
    assert_eq!(snap.job_progress.active_jobs.len(), 3);
    assert_eq!(snap.crew_productivity.summary.total_crew, 2);
    assert_eq!(snap.safety_compliance.recent_incidents.len(), 1);
    assert_eq!(snap.safety_compliance.compliance_by_category.len(), 1);
    assert_eq!(snap.safety_compliance.summary.total_incidents, 1);

    // Recovers on the next full refresh
    source.recover(FetchDomain::Equipment);
    agg.refresh_all_data("acme").await?;
    let snap = agg.get_aggregated_data().await.expect("active");
    assert_eq!(snap.equipment_utilization.units.len(), 1);
    assert_eq!(snap.crew_productivity.summary.total_crew, 2);
    agg.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn alert_list_is_capped_newest_first() -> Result<()> {
    let (_source, agg) = start(three_jobs()).await?;
    let mut alerts = record(&agg, Channel::Alerts);

    for i in 0..105 {
        agg.publish_alert(Alert {
            id: format!("a{}", i),
            priority: Priority::Medium,
            category: EventCategory::System,
            title: format!("alert {}", i),
            message: String::new(),
            source_id: None,
            created_at: Utc::now(),
            acknowledged: false,
        })
        .await?;
    }

    let snap = agg.get_aggregated_data().await.expect("active");
    assert_eq!(snap.alerts.len(), 100);
    assert_eq!(snap.alerts[0].id, "a104");
    assert_eq!(snap.alerts[99].id, "a5");

    let mut delivered = 0;
    while alerts.try_recv().is_ok() {
        delivered += 1;
    }
    assert_eq!(delivered, 105);
    agg.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn equipment_fixture_units_are_unique() -> Result<()> {
    let fixtures = Fixtures {
        equipment: vec![equipment("saw-1"), equipment("saw-1"), equipment("cnc-1")],
        ..Default::default()
    };
    let (_source, agg) = start(fixtures).await?;
    let snap = agg.get_aggregated_data().await.expect("active");
    assert_eq!(snap.equipment_utilization.units.len(), 2);
    agg.cleanup().await;
    Ok(())
}
