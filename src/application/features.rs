// Derived features and period aggregation over ordered samples
use crate::domain::telemetry::{BatteryRecord, TelemetrySample};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;

/// Trailing window for rolling voltage statistics, current sample included.
const ROLLING_WINDOW: usize = 20;

/// Per-sample inputs to the statistical pass. Every field is finite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedFeatures {
    pub power_w: f64,
    /// Volts per second since the previous sample
    pub voltage_rate: f64,
    /// Degrees Celsius per second since the previous sample
    pub temperature_rate: f64,
    pub voltage_rolling_std: f64,
    /// Distance from the trailing voltage mean in rolling standard deviations
    pub voltage_deviation: f64,
}

impl DerivedFeatures {
    pub fn values(&self) -> [f64; 5] {
        [
            self.power_w,
            self.voltage_rate,
            self.temperature_rate,
            self.voltage_rolling_std,
            self.voltage_deviation,
        ]
    }
}

/// Per-sample features, aligned index-for-index with `record.samples()`.
pub fn derive(record: &BatteryRecord) -> Vec<DerivedFeatures> {
    let samples = record.samples();

    samples
        .iter()
        .enumerate()
        .map(|(i, sample)| {
            let (voltage_rate, temperature_rate) = match i.checked_sub(1) {
                Some(prev) => {
                    let prev = &samples[prev];
                    let dt = seconds_between(prev, sample);
                    (
                        rate(prev.voltage, sample.voltage, dt),
                        rate(prev.temperature, sample.temperature, dt),
                    )
                }
                None => (0.0, 0.0),
            };

            let window = &samples[(i + 1).saturating_sub(ROLLING_WINDOW)..=i];
            let voltages = window.iter().map(|s| s.voltage);
            let rolling_std = std_dev(voltages.clone());
            let rolling_mean = mean(voltages).unwrap_or(sample.voltage);
            let voltage_deviation = if rolling_std > f64::EPSILON {
                (sample.voltage - rolling_mean).abs() / rolling_std
            } else {
                0.0
            };

            DerivedFeatures {
                power_w: finite(sample.voltage * sample.current),
                voltage_rate,
                temperature_rate,
                voltage_rolling_std: finite(rolling_std),
                voltage_deviation: finite(voltage_deviation),
            }
        })
        .collect()
}

pub fn seconds_between(earlier: &TelemetrySample, later: &TelemetrySample) -> f64 {
    (later.timestamp - earlier.timestamp).num_milliseconds() as f64 / 1000.0
}

fn rate(from: f64, to: f64, dt: f64) -> f64 {
    if dt > 0.0 { finite((to - from) / dt) } else { 0.0 }
}

/// Saturates overflow to the largest finite value; NaN becomes zero.
fn finite(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-f64::MAX, f64::MAX)
    }
}

pub fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Sample standard deviation; zero with fewer than two values.
pub fn std_dev(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let Some(avg) = mean(values.clone()) else {
        return 0.0;
    };
    let (sum_sq, count) = values.fold((0.0, 0usize), |(acc, count), v| {
        (acc + (v - avg).powi(2), count + 1)
    });
    if count < 2 {
        0.0
    } else {
        (sum_sq / (count - 1) as f64).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl ChannelStats {
    fn from_values(values: &[f64]) -> Option<Self> {
        let mean = mean(values.iter().copied())?;
        Some(Self {
            mean,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodAggregate {
    pub period_start: DateTime<Utc>,
    pub samples: usize,
    pub voltage: ChannelStats,
    pub current: ChannelStats,
    pub temperature: ChannelStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soc: Option<ChannelStats>,
}

/// Summary statistics per fixed-width period, aligned to the Unix epoch.
pub fn aggregate_by_period(record: &BatteryRecord, period: Duration) -> Vec<PeriodAggregate> {
    let width_ms = period.num_milliseconds().max(1);
    let samples = record.samples();
    let mut out = Vec::new();

    for group in samples.chunk_by(|a, b| {
        a.timestamp.timestamp_millis().div_euclid(width_ms)
            == b.timestamp.timestamp_millis().div_euclid(width_ms)
    }) {
        let bucket = group[0].timestamp.timestamp_millis().div_euclid(width_ms);
        let Some(period_start) = Utc.timestamp_millis_opt(bucket * width_ms).single() else {
            continue;
        };
        let channel = |f: fn(&TelemetrySample) -> f64| {
            let values: Vec<f64> = group.iter().map(f).collect();
            ChannelStats::from_values(&values)
        };
        let socs: Vec<f64> = group.iter().filter_map(|s| s.soc_reported).collect();

        if let (Some(voltage), Some(current), Some(temperature)) = (
            channel(|s| s.voltage),
            channel(|s| s.current),
            channel(|s| s.temperature),
        ) {
            out.push(PeriodAggregate {
                period_start,
                samples: group.len(),
                voltage,
                current,
                temperature,
                soc: ChannelStats::from_values(&socs),
            });
        }
    }

    out
}
