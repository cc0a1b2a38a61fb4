// Anomaly detection domain models
use super::telemetry::Channel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    VoltageAnomaly,
    TemperatureAnomaly,
    CurrentAnomaly,
    StatisticalOutlier,
}

impl AnomalyType {
    pub fn for_channel(channel: Channel) -> Self {
        match channel {
            Channel::Voltage => AnomalyType::VoltageAnomaly,
            Channel::Current => AnomalyType::CurrentAnomaly,
            Channel::Temperature => AnomalyType::TemperatureAnomaly,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::VoltageAnomaly => "voltage_anomaly",
            AnomalyType::TemperatureAnomaly => "temperature_anomaly",
            AnomalyType::CurrentAnomaly => "current_anomaly",
            AnomalyType::StatisticalOutlier => "statistical_outlier",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Inclusive operating band for one channel. Deserializes from either
/// `{ min, max }` or a `[min, max]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "BoundsRepr")]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoundsRepr {
    Pair(f64, f64),
    Range { min: f64, max: f64 },
}

impl From<BoundsRepr> for Bounds {
    fn from(repr: BoundsRepr) -> Self {
        match repr {
            BoundsRepr::Pair(min, max) | BoundsRepr::Range { min, max } => Bounds { min, max },
        }
    }
}

impl Bounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Values exactly on either edge are within bounds.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Distance outside the band, zero when inside.
    pub fn excess(&self, value: f64) -> f64 {
        if value < self.min {
            self.min - value
        } else if value > self.max {
            value - self.max
        } else {
            0.0
        }
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

/// Optional operating band per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelThresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage: Option<Bounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Bounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<Bounds>,
}

impl ChannelThresholds {
    pub fn get(&self, channel: Channel) -> Option<Bounds> {
        match channel {
            Channel::Voltage => self.voltage,
            Channel::Current => self.current,
            Channel::Temperature => self.temperature,
        }
    }

    pub fn configured(&self) -> impl Iterator<Item = (Channel, Bounds)> + '_ {
        Channel::ALL
            .into_iter()
            .filter_map(|channel| self.get(channel).map(|bounds| (channel, bounds)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub timestamp: DateTime<Utc>,
    pub sample_index: usize,
    pub anomaly_types: Vec<AnomalyType>,
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlier_score: Option<f64>,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatisticalPass {
    Ran { scorer: String, flagged: usize },
    Skipped { reason: String },
}

impl StatisticalPass {
    pub fn ran(&self) -> bool {
        matches!(self, StatisticalPass::Ran { .. })
    }
}

/// Result of one detection run. Count and percentage are always derived from
/// the anomaly list and the window size.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyReport {
    battery_id: String,
    total_samples: usize,
    anomalies: Vec<AnomalyRecord>,
    statistical_pass: StatisticalPass,
}

impl AnomalyReport {
    pub fn new(
        battery_id: impl Into<String>,
        total_samples: usize,
        mut anomalies: Vec<AnomalyRecord>,
        statistical_pass: StatisticalPass,
    ) -> Self {
        anomalies.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.sample_index.cmp(&b.sample_index))
        });
        Self {
            battery_id: battery_id.into(),
            total_samples,
            anomalies,
            statistical_pass,
        }
    }

    pub fn battery_id(&self) -> &str {
        &self.battery_id
    }

    pub fn total_samples(&self) -> usize {
        self.total_samples
    }

    pub fn anomalies(&self) -> &[AnomalyRecord] {
        &self.anomalies
    }

    pub fn statistical_pass(&self) -> &StatisticalPass {
        &self.statistical_pass
    }

    pub fn anomaly_count(&self) -> usize {
        self.anomalies.len()
    }

    /// Share of samples flagged, in percent, rounded to two decimals.
    pub fn anomaly_percentage(&self) -> f64 {
        if self.total_samples == 0 {
            return 0.0;
        }
        let pct = self.anomaly_count() as f64 / self.total_samples as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }

    /// Per-type counts. A sample flagged by several passes counts once per type.
    pub fn summary(&self) -> BTreeMap<AnomalyType, usize> {
        let mut summary = BTreeMap::new();
        for record in &self.anomalies {
            for kind in &record.anomaly_types {
                *summary.entry(*kind).or_insert(0) += 1;
            }
        }
        summary
    }
}
