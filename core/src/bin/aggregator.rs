// Pontifex aggregator runner
//
// Seeds an in-memory data source from a JSON fixture file, starts one
// analytics session and logs every notification until Ctrl-C.

use std::sync::Arc;

use pontifex_core::source::Fixtures;
use pontifex_core::telemetry::TcpLineConnector;
use pontifex_core::{AggregatorConfig, AnalyticsAggregator, Channel, MemoryDataSource, Notification};
use tokio::signal;
use tracing::{info, warn};

fn describe(notification: &Notification) -> String {
    match notification {
        Notification::JobProgress(m) => format!(
            "{} active, {} at risk, {:.1}% avg progress",
            m.summary.total_active, m.summary.at_risk, m.summary.average_progress
        ),
        Notification::CrewProductivity(m) => format!(
            "{} crew, {} clocked in",
            m.summary.total_crew, m.summary.clocked_in
        ),
        Notification::EquipmentUtilization(m) => format!(
            "{} units, {:.1}% avg utilization",
            m.summary.total, m.summary.average_utilization
        ),
        Notification::SafetyCompliance(m) => format!(
            "{} open incidents, {} critical",
            m.summary.open_incidents,
            m.critical_alerts.len()
        ),
        Notification::Event(e) => format!("{} [{}] {}", e.event_type, e.priority, e.id),
        Notification::Alert(a) => format!("[{}] {}", a.priority, a.title),
        Notification::Dashboard(s) => format!("snapshot for {} at {}", s.company_id, s.last_updated),
        Notification::UnmatchedTelemetry { source, payload } => format!("{}: {}", source, payload),
        Notification::Connection { source, state } => format!("{} is {}", source, state),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,pontifex_core=info,pontifex_aggregator=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    // Defaults + env + optional TOML overlay
    let cfg = AggregatorConfig::load();

    let fixtures = match &cfg.fixtures_path {
        Some(path) => Fixtures::from_json_file(path)?,
        None => {
            warn!(target: "pontifex_aggregator", "No fixtures configured; starting with an empty backend");
            Fixtures::default()
        }
    };
    let source = Arc::new(MemoryDataSource::new(fixtures));

    let aggregator = AnalyticsAggregator::new(source, cfg.clone())
        .with_connector(Arc::new(TcpLineConnector::new()));

    for channel in Channel::ALL {
        aggregator.subscribe(channel, move |n| {
            info!(target: "pontifex_aggregator", channel = %channel, "{}", describe(n));
            Ok(())
        });
    }

    aggregator
        .initialize(&cfg.company_id, cfg.time_range, cfg.refresh_rate)
        .await?;

    if let Some(snapshot) = aggregator.get_aggregated_data().await {
        info!(
            target: "pontifex_aggregator",
            company_id = %snapshot.company_id,
            active_jobs = snapshot.job_progress.summary.total_active,
            alerts = snapshot.alerts.len(),
            "Dashboard loaded"
        );
    }

    signal::ctrl_c().await?;
    info!(target: "pontifex_aggregator", "Shutting down");
    aggregator.cleanup().await;
    Ok(())
}
