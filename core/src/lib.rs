// Pontifex Core Library
// Field operations analytics aggregator runtime

pub mod aggregator;
pub mod bus;
pub mod change;
pub mod config;
pub mod event;
pub mod model;
pub mod router;
pub mod scheduler;
pub mod source;
pub mod telemetry;
pub mod transform;
pub mod updaters;

// Export core types
pub use aggregator::{AnalyticsAggregator, ServiceState};
pub use bus::{Channel, Notification, NotificationBus, SubscriptionId};
pub use change::{ChangeEvent, ChangeKind, WatchedTable};
pub use config::{AggregatorConfig, RefreshRate, TimeRange};
pub use event::{EventCategory, Priority, RealTimeEvent};
pub use model::DashboardSnapshot;
pub use source::{DataSource, MemoryDataSource};
pub use telemetry::{ConnectionState, TelemetryConnector, TelemetrySource};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Subscriber error: {0}")]
    Subscriber(String),

    #[error("Aggregator already active for company {0}; call cleanup() first")]
    AlreadyActive(String),

    #[error("Aggregator is not active")]
    NotActive,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
pub type Result<T> = std::result::Result<T, AnalyticsError>;
