use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::sensors::SensorReading;

/// Wire envelope for one telemetry sample. Specialized sensor fields are
/// flattened so consumers that only know the fixed field set still parse
/// the message and can keep the rest as an opaque payload.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryMessage {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub battery_level: f64,
    pub signal_strength: i32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TelemetryMessage {
    pub fn new(device_id: &str, reading: SensorReading) -> Self {
        Self {
            device_id: device_id.to_owned(),
            timestamp: Utc::now(),
            temperature: reading.temperature,
            humidity: reading.humidity,
            cpu_usage: reading.cpu_usage,
            memory_usage: reading.memory_usage,
            disk_usage: reading.disk_usage,
            battery_level: reading.battery_level,
            signal_strength: reading.signal_strength,
            extra: reading.extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extra_fields_serialize_at_top_level() {
        let mut extra = Map::new();
        extra.insert("pressure".into(), json!(1013.2));

        let reading = SensorReading {
            temperature: 21.4,
            humidity: 48.2,
            cpu_usage: 12.0,
            memory_usage: 55.0,
            disk_usage: 40.0,
            battery_level: 80.0,
            signal_strength: -60,
            extra,
        };

        let message = TelemetryMessage::new("WEATHER_001", reading);
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["device_id"], "WEATHER_001");
        assert_eq!(value["temperature"], 21.4);
        assert_eq!(value["pressure"], 1013.2);
        assert!(value.get("extra").is_none());
    }
}
