use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{Error, Result};

/// Registered device. Implicitly created on first telemetry receipt, so a
/// row always exists by the time its telemetry does.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub device_id: String,
    pub name: String,
    pub device_type: String,
    pub status: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub last_active: Option<DateTime<Utc>>,
    pub metadata: Value,
}

/// One persisted telemetry row. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TelemetryRecord {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub disk_usage: Option<f64>,
    pub battery_level: Option<f64>,
    pub signal_strength: Option<f64>,
    pub raw: Option<Value>,
}

/// Wire envelope for one inbound telemetry message, from the queue or the
/// HTTP ingestion path. Fields beyond the fixed metric set are kept as an
/// opaque payload for forward compatibility.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryEnvelope {
    pub device_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub disk_usage: Option<f64>,
    pub battery_level: Option<f64>,
    pub signal_strength: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TelemetryEnvelope {
    pub fn parse(payload: &[u8]) -> Result<TelemetryRecord> {
        let envelope: TelemetryEnvelope =
            serde_json::from_slice(payload).map_err(|e| Error::Malformed(e.to_string()))?;
        if envelope.device_id.trim().is_empty() {
            return Err(Error::Malformed("device_id must not be empty".into()));
        }
        Ok(envelope.into_record())
    }

    pub fn into_record(self) -> TelemetryRecord {
        TelemetryRecord {
            device_id: self.device_id,
            timestamp: self.timestamp,
            temperature: self.temperature,
            humidity: self.humidity,
            cpu_usage: self.cpu_usage,
            memory_usage: self.memory_usage,
            disk_usage: self.disk_usage,
            battery_level: self.battery_level,
            signal_strength: self.signal_strength,
            raw: if self.extra.is_empty() {
                None
            } else {
                Some(Value::Object(self.extra))
            },
        }
    }
}

/// Aggregate statistics over one device's telemetry window.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeviceStats {
    pub count: i64,
    pub avg_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub min_humidity: Option<f64>,
    pub max_humidity: Option<f64>,
    pub avg_cpu_usage: Option<f64>,
    pub min_cpu_usage: Option<f64>,
    pub max_cpu_usage: Option<f64>,
    pub avg_memory_usage: Option<f64>,
    pub min_memory_usage: Option<f64>,
    pub max_memory_usage: Option<f64>,
    pub avg_disk_usage: Option<f64>,
    pub min_disk_usage: Option<f64>,
    pub max_disk_usage: Option<f64>,
    pub avg_battery_level: Option<f64>,
    pub min_battery_level: Option<f64>,
    pub max_battery_level: Option<f64>,
    pub avg_signal_strength: Option<f64>,
    pub min_signal_strength: Option<f64>,
    pub max_signal_strength: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_message_and_captures_unknown_fields() {
        let payload = br#"{
            "device_id": "VIRTUAL_000",
            "timestamp": "2024-05-01T12:00:00Z",
            "temperature": 21.4,
            "humidity": 48.2,
            "cpu_usage": 12.0,
            "memory_usage": 55.0,
            "pressure": 1011.9
        }"#;

        let record = TelemetryEnvelope::parse(payload).unwrap();
        assert_eq!(record.device_id, "VIRTUAL_000");
        assert_eq!(record.temperature, Some(21.4));
        assert_eq!(record.humidity, Some(48.2));
        assert_eq!(record.cpu_usage, Some(12.0));
        assert_eq!(record.memory_usage, Some(55.0));
        assert_eq!(record.disk_usage, None);

        let raw = record.raw.expect("unknown fields should be captured");
        assert_eq!(raw["pressure"], 1011.9);
    }

    #[test]
    fn known_fields_only_leaves_raw_empty() {
        let payload = br#"{"device_id":"VIRTUAL_001","temperature":22.0}"#;
        let record = TelemetryEnvelope::parse(payload).unwrap();
        assert!(record.raw.is_none());
    }

    #[test]
    fn malformed_payload_is_rejected() {
        assert!(TelemetryEnvelope::parse(b"not json").is_err());
    }

    #[test]
    fn empty_device_id_is_rejected() {
        let payload = br#"{"device_id":"  ","temperature":22.0}"#;
        assert!(TelemetryEnvelope::parse(payload).is_err());
    }

    #[test]
    fn missing_timestamp_defaults_to_receive_time() {
        let before = Utc::now();
        let record = TelemetryEnvelope::parse(br#"{"device_id":"VIRTUAL_002"}"#).unwrap();
        assert!(record.timestamp >= before);
        assert!(record.timestamp <= Utc::now());
    }
}
