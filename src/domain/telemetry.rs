// Telemetry domain models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observation from a battery.
///
/// Current sign convention is fixed crate-wide: positive current discharges the
/// battery, negative current charges it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soc_reported: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_ah: Option<f64>,
}

impl TelemetrySample {
    pub fn new(timestamp: DateTime<Utc>, voltage: f64, current: f64, temperature: f64) -> Self {
        Self {
            timestamp,
            voltage,
            current,
            temperature,
            soc_reported: None,
            capacity_ah: None,
        }
    }

    pub fn with_soc(mut self, soc: f64) -> Self {
        self.soc_reported = Some(soc);
        self
    }

    pub fn with_capacity(mut self, capacity_ah: f64) -> Self {
        self.capacity_ah = Some(capacity_ah);
        self
    }

    pub fn channel(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Voltage => self.voltage,
            Channel::Current => self.current,
            Channel::Temperature => self.temperature,
        }
    }
}

/// Telemetry channels that carry operating bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Voltage,
    Current,
    Temperature,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Voltage, Channel::Current, Channel::Temperature];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Voltage => "voltage",
            Channel::Current => "current",
            Channel::Temperature => "temperature",
        }
    }
}

/// Ordered samples for one battery.
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryRecord {
    battery_id: String,
    samples: Vec<TelemetrySample>,
}

impl BatteryRecord {
    /// Builds a record, ordering samples by timestamp. The sort is stable so
    /// samples sharing a timestamp keep their relative order.
    pub fn new(battery_id: impl Into<String>, mut samples: Vec<TelemetrySample>) -> Self {
        samples.sort_by_key(|s| s.timestamp);
        Self {
            battery_id: battery_id.into(),
            samples,
        }
    }

    pub fn battery_id(&self) -> &str {
        &self.battery_id
    }

    pub fn samples(&self) -> &[TelemetrySample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&TelemetrySample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&TelemetrySample> {
        self.samples.last()
    }

    /// Consecutive sample pairs, the unit every integrator walks.
    pub fn intervals(&self) -> impl Iterator<Item = (&TelemetrySample, &TelemetrySample)> {
        self.samples.windows(2).map(|w| (&w[0], &w[1]))
    }
}

/// A raw field value as it arrives at the input boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

/// Untyped telemetry row (CSV line or JSON record) before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTelemetryRow {
    #[serde(default)]
    pub timestamp: Option<RawValue>,
    #[serde(default)]
    pub voltage: Option<RawValue>,
    #[serde(default)]
    pub current: Option<RawValue>,
    #[serde(default)]
    pub temperature: Option<RawValue>,
    #[serde(default, alias = "soc")]
    pub soc_reported: Option<RawValue>,
    #[serde(default, alias = "capacity")]
    pub capacity_ah: Option<RawValue>,
}

impl From<&TelemetrySample> for RawTelemetryRow {
    fn from(sample: &TelemetrySample) -> Self {
        Self {
            timestamp: Some(RawValue::Text(sample.timestamp.to_rfc3339())),
            voltage: Some(RawValue::Number(sample.voltage)),
            current: Some(RawValue::Number(sample.current)),
            temperature: Some(RawValue::Number(sample.temperature)),
            soc_reported: sample.soc_reported.map(RawValue::Number),
            capacity_ah: sample.capacity_ah.map(RawValue::Number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_record_orders_samples() {
        let record = BatteryRecord::new(
            "battery-001",
            vec![
                TelemetrySample::new(at(20), 48.0, 1.0, 25.0),
                TelemetrySample::new(at(10), 49.0, 2.0, 26.0),
            ],
        );

        assert_eq!(record.first().unwrap().timestamp, at(10));
        assert_eq!(record.last().unwrap().timestamp, at(20));
        assert_eq!(record.intervals().count(), 1);
    }

    #[test]
    fn test_raw_row_accepts_aliases_and_mixed_types() {
        let row: RawTelemetryRow = serde_json::from_value(serde_json::json!({
            "timestamp": "2025-01-01T00:00:00Z",
            "voltage": 48.2,
            "current": "-3.5",
            "temperature": 24,
            "soc": 80
        }))
        .unwrap();

        assert_eq!(row.voltage, Some(RawValue::Number(48.2)));
        assert_eq!(row.current, Some(RawValue::Text("-3.5".to_string())));
        assert_eq!(row.soc_reported, Some(RawValue::Number(80.0)));
        assert_eq!(row.capacity_ah, None);
    }
}
