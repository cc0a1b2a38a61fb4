// Telemetry normalizer - Validation, de-duplication and resampling of raw rows
use crate::domain::error::AnalyticsError;
use crate::domain::telemetry::{BatteryRecord, RawTelemetryRow, RawValue, TelemetrySample};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

/// What to do with a row that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidRowPolicy {
    /// Drop the row and keep going, recording why
    #[default]
    Drop,
    /// Fail the whole batch on the first invalid row
    Reject,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    pub policy: InvalidRowPolicy,
    /// Mean-aggregate samples into fixed buckets of this width
    pub resample_interval: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' is not a number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("field '{0}' is not finite")]
    NonFinite(&'static str),
    #[error("unrecognized timestamp {0:?}")]
    InvalidTimestamp(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowRejection {
    /// Zero-based position in the input batch
    pub row: usize,
    pub reason: RowError,
}

#[derive(Debug, Clone)]
pub struct NormalizedTelemetry {
    pub record: BatteryRecord,
    pub rejections: Vec<RowRejection>,
    pub duplicate_count: usize,
}

impl NormalizedTelemetry {
    pub fn rejected_count(&self) -> usize {
        self.rejections.len()
    }
}

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Clone, Default)]
pub struct TelemetryNormalizer;

impl TelemetryNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(
        &self,
        battery_id: &str,
        rows: &[RawTelemetryRow],
        options: &NormalizeOptions,
    ) -> Result<NormalizedTelemetry, AnalyticsError> {
        if let Some(interval) = options.resample_interval {
            if interval <= Duration::zero() {
                return Err(AnalyticsError::configuration(
                    "resample_interval",
                    "must be positive",
                ));
            }
        }

        let mut samples = Vec::with_capacity(rows.len());
        let mut rejections = Vec::new();

        for (row, raw) in rows.iter().enumerate() {
            match parse_row(raw) {
                Ok(sample) => samples.push(sample),
                Err(reason) => match options.policy {
                    InvalidRowPolicy::Reject => {
                        return Err(AnalyticsError::validation(row, reason.to_string()));
                    }
                    InvalidRowPolicy::Drop => {
                        tracing::debug!("Dropping row {} for {}: {}", row, battery_id, reason);
                        rejections.push(RowRejection { row, reason });
                    }
                },
            }
        }

        // Stable sort keeps input order among equal timestamps, so the last of
        // each run is the latest-seen row.
        samples.sort_by_key(|s| s.timestamp);
        let before = samples.len();
        let samples = keep_last_per_timestamp(samples);
        let duplicate_count = before - samples.len();

        let samples = match options.resample_interval {
            Some(interval) => resample(&samples, interval),
            None => samples,
        };

        if !rejections.is_empty() || duplicate_count > 0 {
            tracing::warn!(
                "Normalized {} rows for {}: {} rejected, {} duplicate timestamps",
                rows.len(),
                battery_id,
                rejections.len(),
                duplicate_count
            );
        }

        Ok(NormalizedTelemetry {
            record: BatteryRecord::new(battery_id, samples),
            rejections,
            duplicate_count,
        })
    }
}

fn keep_last_per_timestamp(samples: Vec<TelemetrySample>) -> Vec<TelemetrySample> {
    let mut kept: Vec<TelemetrySample> = Vec::with_capacity(samples.len());
    for sample in samples {
        match kept.last_mut() {
            Some(last) if last.timestamp == sample.timestamp => *last = sample,
            _ => kept.push(sample),
        }
    }
    kept
}

/// Mean aggregation into buckets aligned to the Unix epoch. Each bucket is
/// stamped with its start time. Input must be sorted.
fn resample(samples: &[TelemetrySample], interval: Duration) -> Vec<TelemetrySample> {
    let width_ms = interval.num_milliseconds().max(1);
    let mut out = Vec::new();
    let mut start = 0;

    while start < samples.len() {
        let bucket = samples[start].timestamp.timestamp_millis().div_euclid(width_ms);
        let mut end = start + 1;
        while end < samples.len()
            && samples[end].timestamp.timestamp_millis().div_euclid(width_ms) == bucket
        {
            end += 1;
        }

        let group = &samples[start..end];
        let n = group.len() as f64;
        let Some(timestamp) = Utc.timestamp_millis_opt(bucket * width_ms).single() else {
            start = end;
            continue;
        };

        out.push(TelemetrySample {
            timestamp,
            voltage: group.iter().map(|s| s.voltage).sum::<f64>() / n,
            current: group.iter().map(|s| s.current).sum::<f64>() / n,
            temperature: group.iter().map(|s| s.temperature).sum::<f64>() / n,
            soc_reported: mean_present(group.iter().map(|s| s.soc_reported)),
            capacity_ah: mean_present(group.iter().map(|s| s.capacity_ah)),
        });
        start = end;
    }

    out
}

fn mean_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn parse_row(raw: &RawTelemetryRow) -> Result<TelemetrySample, RowError> {
    let timestamp = parse_timestamp(raw.timestamp.as_ref())?;
    let voltage = required_number("voltage", raw.voltage.as_ref())?;
    let current = required_number("current", raw.current.as_ref())?;
    let temperature = required_number("temperature", raw.temperature.as_ref())?;
    let soc_reported =
        optional_number("soc", raw.soc_reported.as_ref())?.map(|soc| soc.clamp(0.0, 100.0));
    let capacity_ah = optional_number("capacity", raw.capacity_ah.as_ref())?;

    Ok(TelemetrySample {
        timestamp,
        voltage,
        current,
        temperature,
        soc_reported,
        capacity_ah,
    })
}

fn required_number(field: &'static str, value: Option<&RawValue>) -> Result<f64, RowError> {
    optional_number(field, value)?.ok_or(RowError::MissingField(field))
}

/// Empty text counts as absent.
fn optional_number(field: &'static str, value: Option<&RawValue>) -> Result<Option<f64>, RowError> {
    let parsed = match value {
        None => return Ok(None),
        Some(RawValue::Number(n)) => *n,
        Some(RawValue::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            text.parse::<f64>().map_err(|_| RowError::InvalidNumber {
                field,
                value: text.to_string(),
            })?
        }
    };

    if parsed.is_finite() {
        Ok(Some(parsed))
    } else {
        Err(RowError::NonFinite(field))
    }
}

fn parse_timestamp(value: Option<&RawValue>) -> Result<DateTime<Utc>, RowError> {
    match value {
        None => Err(RowError::MissingField("timestamp")),
        Some(RawValue::Number(secs)) => epoch_seconds(*secs),
        Some(RawValue::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(RowError::MissingField("timestamp"));
            }
            if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
                return Ok(ts.with_timezone(&Utc));
            }
            for format in TIMESTAMP_FORMATS {
                if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                    return Ok(naive.and_utc());
                }
            }
            match text.parse::<f64>() {
                Ok(secs) => epoch_seconds(secs),
                Err(_) => Err(RowError::InvalidTimestamp(text.to_string())),
            }
        }
    }
}

fn epoch_seconds(secs: f64) -> Result<DateTime<Utc>, RowError> {
    if !secs.is_finite() {
        return Err(RowError::NonFinite("timestamp"));
    }
    Utc.timestamp_millis_opt((secs * 1000.0).round() as i64)
        .single()
        .ok_or_else(|| RowError::InvalidTimestamp(secs.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ts: &str, voltage: f64, current: f64, temperature: f64) -> RawTelemetryRow {
        RawTelemetryRow {
            timestamp: Some(RawValue::from(ts)),
            voltage: Some(RawValue::from(voltage)),
            current: Some(RawValue::from(current)),
            temperature: Some(RawValue::from(temperature)),
            ..Default::default()
        }
    }

    #[test]
    fn test_drops_invalid_rows_and_counts_them() {
        let mut missing_voltage = row("2025-01-01T00:00:10Z", 48.0, 1.0, 25.0);
        missing_voltage.voltage = None;
        let mut bad_current = row("2025-01-01T00:00:20Z", 48.0, 1.0, 25.0);
        bad_current.current = Some(RawValue::from("abc"));

        let rows = vec![
            row("2025-01-01T00:00:00Z", 48.0, 1.0, 25.0),
            missing_voltage,
            bad_current,
            row("2025-01-01T00:00:30Z", 48.5, 1.0, 25.0),
        ];

        let result = TelemetryNormalizer::new()
            .normalize("battery-001", &rows, &NormalizeOptions::default())
            .unwrap();

        assert_eq!(result.record.len(), 2);
        assert_eq!(result.rejected_count(), 2);
        assert_eq!(result.rejections[0].row, 1);
        assert_eq!(result.rejections[0].reason, RowError::MissingField("voltage"));
        assert!(matches!(
            result.rejections[1].reason,
            RowError::InvalidNumber { field: "current", .. }
        ));
    }

    #[test]
    fn test_reject_policy_fails_batch() {
        let mut bad = row("2025-01-01T00:00:10Z", 48.0, 1.0, 25.0);
        bad.temperature = Some(RawValue::from(""));
        let rows = vec![row("2025-01-01T00:00:00Z", 48.0, 1.0, 25.0), bad];

        let options = NormalizeOptions {
            policy: InvalidRowPolicy::Reject,
            ..Default::default()
        };
        let err = TelemetryNormalizer::new()
            .normalize("battery-001", &rows, &options)
            .unwrap_err();

        assert!(matches!(err, AnalyticsError::Validation { row: 1, .. }));
    }

    #[test]
    fn test_sorts_and_keeps_last_duplicate() {
        let rows = vec![
            row("2025-01-01T00:00:20Z", 50.0, 1.0, 25.0),
            row("2025-01-01T00:00:10Z", 48.0, 1.0, 25.0),
            row("2025-01-01T00:00:20Z", 51.0, 1.0, 25.0),
        ];

        let result = TelemetryNormalizer::new()
            .normalize("battery-001", &rows, &NormalizeOptions::default())
            .unwrap();

        let voltages: Vec<f64> = result.record.samples().iter().map(|s| s.voltage).collect();
        assert_eq!(voltages, vec![48.0, 51.0]);
        assert_eq!(result.duplicate_count, 1);
    }

    #[test]
    fn test_accepts_timestamp_variants() {
        let mut epoch = row("", 48.0, 1.0, 25.0);
        epoch.timestamp = Some(RawValue::Number(1_735_689_600.0));
        let rows = vec![
            row("2025-01-01 00:00:05", 48.0, 1.0, 25.0),
            row("2025-01-01T00:00:10.500", 48.0, 1.0, 25.0),
            row("2025-01-01T01:00:00+01:00", 48.0, 1.0, 25.0),
            epoch,
        ];

        let result = TelemetryNormalizer::new()
            .normalize("battery-001", &rows, &NormalizeOptions::default())
            .unwrap();

        // 01:00+01:00 and the epoch value both land on midnight UTC
        assert_eq!(result.record.len(), 3);
        assert_eq!(result.duplicate_count, 1);
        assert_eq!(result.rejected_count(), 0);
    }

    #[test]
    fn test_clamps_reported_soc() {
        let mut high = row("2025-01-01T00:00:00Z", 48.0, 1.0, 25.0);
        high.soc_reported = Some(RawValue::from(104.0));

        let result = TelemetryNormalizer::new()
            .normalize("battery-001", &[high], &NormalizeOptions::default())
            .unwrap();

        assert_eq!(result.record.samples()[0].soc_reported, Some(100.0));
    }

    #[test]
    fn test_resamples_by_mean() {
        let mut with_soc = row("2025-01-01T00:00:30Z", 50.0, 3.0, 27.0);
        with_soc.soc_reported = Some(RawValue::from(80.0));
        let rows = vec![
            row("2025-01-01T00:00:00Z", 48.0, 1.0, 25.0),
            with_soc,
            row("2025-01-01T00:01:15Z", 49.0, 2.0, 26.0),
        ];

        let options = NormalizeOptions {
            resample_interval: Some(Duration::minutes(1)),
            ..Default::default()
        };
        let result = TelemetryNormalizer::new()
            .normalize("battery-001", &rows, &options)
            .unwrap();

        let samples = result.record.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].voltage, 49.0);
        assert_eq!(samples[0].current, 2.0);
        assert_eq!(samples[0].soc_reported, Some(80.0));
        assert_eq!(samples[1].timestamp.to_rfc3339(), "2025-01-01T00:01:00+00:00");
        assert_eq!(samples[1].soc_reported, None);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let rows = vec![
            row("2025-01-01T00:00:20Z", 50.0, 1.0, 25.0),
            row("2025-01-01T00:00:10Z", 48.0, -2.0, 24.0),
            row("2025-01-01T00:00:20Z", 51.0, 1.5, 25.5),
            row("2025-01-01T00:00:40Z", 49.0, 0.0, 26.0),
        ];
        let normalizer = TelemetryNormalizer::new();
        let options = NormalizeOptions::default();

        let first = normalizer.normalize("battery-001", &rows, &options).unwrap();
        let again: Vec<RawTelemetryRow> =
            first.record.samples().iter().map(RawTelemetryRow::from).collect();
        let second = normalizer.normalize("battery-001", &again, &options).unwrap();

        assert_eq!(first.record, second.record);
        assert_eq!(second.rejected_count(), 0);
        assert_eq!(second.duplicate_count, 0);
    }

    #[test]
    fn test_rejects_non_positive_resample_interval() {
        let options = NormalizeOptions {
            resample_interval: Some(Duration::zero()),
            ..Default::default()
        };
        let err = TelemetryNormalizer::new()
            .normalize("battery-001", &[], &options)
            .unwrap_err();
        assert_eq!(err.category(), "configuration");
    }
}
