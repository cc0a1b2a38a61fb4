//! Battery metrics calculator.
//!
//! Produces a [`MetricsSnapshot`] from one normalized window plus whatever
//! history the caller supplies. All integrations walk consecutive sample pairs
//! and skip intervals longer than `max_integration_gap_secs`.
//!
//! Formulas:
//! - equivalent cycles = baseline + sum(|I| dt) / (2 * rated capacity)
//! - capacity estimate = |Ah| / (|dSOC| / 100) between reported-SOC anchors at
//!   least `min_soc_span_percent` apart, blended by EMA
//! - SOH = capacity / rated capacity * 100
//! - degradation rate = -slope(SOH over days) * 30, floored at zero

use crate::application::features::{mean, seconds_between, std_dev};
use crate::domain::error::AnalyticsError;
use crate::domain::metrics::{
    BatteryHistory, CycleBaseline, DegradationStatus, MetricsSnapshot, SocSource, SohSource,
};
use crate::domain::telemetry::{BatteryRecord, TelemetrySample};
use crate::infrastructure::config::{BatterySettings, HealthThresholds};
use chrono::{DateTime, Utc};

const DAYS_PER_RATE_PERIOD: f64 = 30.0;
const SECONDS_PER_DAY: f64 = 86_400.0;
/// Absorbs float drift when throughput lands exactly on a whole cycle
const CYCLE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Default)]
pub struct MetricsOptions {
    /// Fail instead of returning unavailable markers
    pub strict: bool,
    /// Overrides the cycle count carried by history
    pub cycle_baseline: Option<CycleBaseline>,
}

#[derive(Debug, Clone)]
pub struct MetricsCalculator {
    battery: BatterySettings,
    health: HealthThresholds,
}

struct CapacityEstimate {
    capacity_ah: Option<f64>,
    updated: bool,
}

impl MetricsCalculator {
    pub fn new(battery: BatterySettings, health: HealthThresholds) -> Self {
        Self { battery, health }
    }

    pub fn compute(
        &self,
        record: &BatteryRecord,
        history: Option<&BatteryHistory>,
        options: &MetricsOptions,
    ) -> Result<MetricsSnapshot, AnalyticsError> {
        let Some(last) = record.last() else {
            return Err(AnalyticsError::insufficient_data(
                "metrics",
                format!("no samples for {}", record.battery_id()),
            ));
        };
        let prior = history.and_then(BatteryHistory::latest);
        let samples = record.samples();

        let avg_voltage = mean(samples.iter().map(|s| s.voltage)).unwrap_or_default();
        let avg_current = mean(samples.iter().map(|s| s.current)).unwrap_or_default();
        let avg_temperature = mean(samples.iter().map(|s| s.temperature)).unwrap_or_default();
        let voltage_std = std_dev(samples.iter().map(|s| s.voltage));
        let max_temperature = samples
            .iter()
            .map(|s| s.temperature)
            .fold(f64::NEG_INFINITY, f64::max);

        let (equivalent_cycles, cycle_count) = self.count_cycles(record, prior, options);
        let (energy_charged_kwh, energy_discharged_kwh) = self.energy_throughput(record);
        let round_trip_efficiency = (energy_charged_kwh > 0.0)
            .then(|| (energy_discharged_kwh / energy_charged_kwh * 100.0).clamp(0.0, 100.0));

        let estimate = self.estimate_capacity(record, prior);
        let measured = samples.iter().rev().find_map(|s| s.capacity_ah);
        let (state_of_health, soh_source, capacity_estimate_ah) =
            match (measured, estimate.updated, prior) {
                (Some(capacity), _, _) => {
                    (self.soh_from(capacity), SohSource::Measured, Some(capacity))
                }
                (None, true, _) => (
                    self.soh_from(estimate.capacity_ah.unwrap_or(self.battery.rated_capacity_ah)),
                    SohSource::Estimated,
                    estimate.capacity_ah,
                ),
                // Carrying the nameplate placeholder must not turn it into evidence.
                (None, false, Some(prior)) if prior.soh_available() => (
                    prior.state_of_health.clamp(0.0, 100.0),
                    SohSource::CarriedForward,
                    prior.capacity_estimate_ah,
                ),
                (None, false, _) => (100.0, SohSource::Nameplate, None),
            };

        let capacity_for_soc = capacity_estimate_ah
            .unwrap_or(self.battery.rated_capacity_ah * state_of_health / 100.0)
            .max(f64::EPSILON);
        let (state_of_charge, soc_source) = self.state_of_charge(record, prior, capacity_for_soc);

        let (degradation_rate, degradation_status) =
            self.degradation_rate(history, last.timestamp, state_of_health, soh_source);

        if options.strict {
            if soh_source == SohSource::Nameplate {
                return Err(AnalyticsError::insufficient_data(
                    "state_of_health",
                    "no capacity evidence and no prior snapshot",
                ));
            }
            if degradation_status == DegradationStatus::InsufficientHistory {
                return Err(AnalyticsError::insufficient_data(
                    "degradation_rate",
                    "fewer than two snapshots with known state of health",
                ));
            }
        }

        let health_status = self.health.classify(state_of_health);

        tracing::debug!(
            "Metrics for {}: soh={:.2} ({:?}), soc={:?} ({:?}), cycles={:.3}, status={}",
            record.battery_id(),
            state_of_health,
            soh_source,
            state_of_charge,
            soc_source,
            equivalent_cycles,
            health_status.as_str()
        );

        Ok(MetricsSnapshot {
            battery_id: record.battery_id().to_string(),
            timestamp: last.timestamp,
            state_of_health,
            soh_source,
            state_of_charge,
            soc_source,
            capacity_estimate_ah,
            avg_voltage,
            avg_current,
            avg_temperature,
            voltage_std,
            max_temperature,
            equivalent_cycles,
            cycle_count,
            degradation_rate,
            degradation_status,
            energy_charged_kwh,
            energy_discharged_kwh,
            round_trip_efficiency,
            health_status,
        })
    }

    fn soh_from(&self, capacity_ah: f64) -> f64 {
        (capacity_ah / self.battery.rated_capacity_ah * 100.0).clamp(0.0, 100.0)
    }

    /// Interval length in seconds when it should be integrated.
    fn integrable(&self, a: &TelemetrySample, b: &TelemetrySample) -> Option<f64> {
        let dt = seconds_between(a, b);
        (dt > 0.0 && dt <= self.battery.max_integration_gap_secs as f64).then_some(dt)
    }

    fn count_cycles(
        &self,
        record: &BatteryRecord,
        prior: Option<&MetricsSnapshot>,
        options: &MetricsOptions,
    ) -> (f64, u64) {
        let (base, watermark, floor) = match (options.cycle_baseline, prior) {
            (Some(baseline), _) => (baseline.equivalent_cycles.max(0.0), baseline.since, 0),
            (None, Some(prior)) => (
                prior.equivalent_cycles,
                Some(prior.timestamp),
                prior.cycle_count,
            ),
            (None, None) => (0.0, None, 0),
        };

        // Intervals starting before the watermark belong to an earlier snapshot.
        let throughput_ah: f64 = record
            .intervals()
            .filter(|(a, _)| watermark.is_none_or(|w| a.timestamp >= w))
            .filter_map(|(a, b)| {
                self.integrable(a, b)
                    .map(|dt| (a.current.abs() + b.current.abs()) / 2.0 * dt / 3600.0)
            })
            .sum();

        let equivalent = base + throughput_ah / (2.0 * self.battery.rated_capacity_ah);
        let full = (equivalent + CYCLE_EPSILON).floor() as u64;
        (equivalent, full.max(floor))
    }

    /// (charged, discharged) energy in kWh over the window.
    fn energy_throughput(&self, record: &BatteryRecord) -> (f64, f64) {
        record
            .intervals()
            .filter_map(|(a, b)| {
                self.integrable(a, b).map(|dt| {
                    let power = (a.voltage * a.current + b.voltage * b.current) / 2.0;
                    power * dt / 3600.0 / 1000.0
                })
            })
            .fold((0.0, 0.0), |(charged, discharged), kwh| {
                if kwh >= 0.0 {
                    (charged, discharged + kwh)
                } else {
                    (charged - kwh, discharged)
                }
            })
    }

    fn estimate_capacity(
        &self,
        record: &BatteryRecord,
        prior: Option<&MetricsSnapshot>,
    ) -> CapacityEstimate {
        let samples = record.samples();
        let min_span = self.battery.min_soc_span_percent;
        let alpha = self.battery.capacity_ema_alpha;
        let ceiling = self.battery.rated_capacity_ah * 1.5;

        let mut capacity = prior.and_then(|p| p.capacity_estimate_ah);
        let mut updated = false;
        let mut anchor: Option<f64> = None;
        let mut segment_ah = 0.0;

        for (i, sample) in samples.iter().enumerate() {
            if i > 0 {
                let prev = &samples[i - 1];
                match self.integrable(prev, sample) {
                    Some(dt) => segment_ah += (prev.current + sample.current) / 2.0 * dt / 3600.0,
                    None => {
                        anchor = None;
                        segment_ah = 0.0;
                    }
                }
            }

            let Some(soc) = sample.soc_reported else {
                continue;
            };
            let Some(start) = anchor else {
                anchor = Some(soc);
                segment_ah = 0.0;
                continue;
            };

            let delta_soc = soc - start;
            if delta_soc.abs() < min_span {
                continue;
            }

            // Discharge (positive Ah) must lower SOC; anything else is a
            // sign disagreement and only moves the anchor.
            if segment_ah * delta_soc < 0.0 {
                let implied = (segment_ah.abs() / (delta_soc.abs() / 100.0)).min(ceiling);
                if implied.is_finite() && implied > 0.0 {
                    capacity = Some(match capacity {
                        Some(current) => (1.0 - alpha) * current + alpha * implied,
                        None => implied,
                    });
                    updated = true;
                }
            }
            anchor = Some(soc);
            segment_ah = 0.0;
        }

        CapacityEstimate {
            capacity_ah: capacity,
            updated,
        }
    }

    fn state_of_charge(
        &self,
        record: &BatteryRecord,
        prior: Option<&MetricsSnapshot>,
        capacity_ah: f64,
    ) -> (Option<f64>, SocSource) {
        let samples = record.samples();
        if let Some(soc) = samples.last().and_then(|s| s.soc_reported) {
            return (Some(soc.clamp(0.0, 100.0)), SocSource::Reported);
        }

        let anchor_in_window = samples
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, s)| s.soc_reported.map(|soc| (i, soc)));

        let (start_index, start_soc) = match (anchor_in_window, prior) {
            (Some(anchor), _) => anchor,
            (None, Some(prior)) => match prior.state_of_charge {
                Some(soc) => {
                    let first_after = samples
                        .iter()
                        .position(|s| s.timestamp >= prior.timestamp)
                        .unwrap_or(samples.len());
                    (first_after, soc)
                }
                None => return (None, SocSource::Unavailable),
            },
            (None, None) => return (None, SocSource::Unavailable),
        };

        let discharged_ah: f64 = samples
            .get(start_index..)
            .unwrap_or_default()
            .windows(2)
            .filter_map(|w| {
                self.integrable(&w[0], &w[1])
                    .map(|dt| (w[0].current + w[1].current) / 2.0 * dt / 3600.0)
            })
            .sum();

        let soc = start_soc - discharged_ah / capacity_ah * 100.0;
        (Some(soc.clamp(0.0, 100.0)), SocSource::CoulombCounted)
    }

    fn degradation_rate(
        &self,
        history: Option<&BatteryHistory>,
        now: DateTime<Utc>,
        state_of_health: f64,
        soh_source: SohSource,
    ) -> (f64, DegradationStatus) {
        let mut points: Vec<(DateTime<Utc>, f64)> = history
            .map(|h| {
                h.snapshots
                    .iter()
                    .filter(|s| s.soh_is_evidence())
                    .map(|s| (s.timestamp, s.state_of_health))
                    .collect()
            })
            .unwrap_or_default();

        if soh_source.is_evidence() {
            points.push((now, state_of_health));
        }

        match soh_slope_per_day(&points) {
            Some(slope) => (
                (-slope * DAYS_PER_RATE_PERIOD).max(0.0),
                DegradationStatus::Computed,
            ),
            None => (0.0, DegradationStatus::InsufficientHistory),
        }
    }
}

/// Least-squares slope of SOH against elapsed days. None with fewer than two
/// points or when all points share a timestamp.
fn soh_slope_per_day(points: &[(DateTime<Utc>, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let origin = points.iter().map(|(t, _)| *t).min()?;
    let xs: Vec<f64> = points
        .iter()
        .map(|(t, _)| (*t - origin).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY)
        .collect();
    let x_mean = mean(xs.iter().copied())?;
    let y_mean = mean(points.iter().map(|(_, y)| *y))?;

    let (sxy, sxx) = xs
        .iter()
        .zip(points.iter().map(|(_, y)| *y))
        .fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
            (sxy + (x - x_mean) * (y - y_mean), sxx + (x - x_mean).powi(2))
        });

    (sxx > f64::EPSILON).then(|| sxy / sxx)
}
