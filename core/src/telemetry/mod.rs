// External telemetry listeners
//
// Long-lived duplex feeds (silica exposure monitor, equipment telemetry) that
// push unsolicited JSON messages. Each configured feed gets a listener task
// with explicit connection state and exponential-backoff reconnects.

mod connector;
mod listener;

pub use connector::{TcpLineConnector, TelemetryConnector};
pub use listener::{Backoff, TelemetryHandler, TelemetryListener};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySource {
    SilicaMonitor,
    EquipmentTelemetry,
}

impl TelemetrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetrySource::SilicaMonitor => "silica_monitor",
            TelemetrySource::EquipmentTelemetry => "equipment_telemetry",
        }
    }
}

impl fmt::Display for TelemetrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Push message from the exposure monitor (µg/m³)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SilicaReading {
    pub monitor_id: String,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(alias = "reading", alias = "concentration")]
    pub value: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Push message from equipment telemetry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EquipmentTelemetry {
    pub equipment_id: String,
    pub status: Option<String>,
    pub battery_level: Option<f64>,
    pub signal_strength: Option<f64>,
    pub output_rate: Option<f64>,
    pub hours_used: Option<f64>,
    pub engine_hours: Option<f64>,
    pub hours_since_maintenance: Option<f64>,
    /// °C
    pub temperature: Option<f64>,
    /// mm/s RMS
    pub vibration: Option<f64>,
    pub location: Option<GeoPoint>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silica_reading_accepts_aliases() {
        let r: SilicaReading =
            serde_json::from_str(r#"{"monitorId":"m1","concentration":31.5}"#).unwrap();
        assert_eq!(r.monitor_id, "m1");
        assert_eq!(r.value, 31.5);
        assert!(r.timestamp.is_none());
    }

    #[test]
    fn equipment_telemetry_is_sparse() {
        let t: EquipmentTelemetry =
            serde_json::from_str(r#"{"equipmentId":"saw-1","batteryLevel":42}"#).unwrap();
        assert_eq!(t.equipment_id, "saw-1");
        assert_eq!(t.battery_level, Some(42.0));
        assert!(t.status.is_none());
    }
}
