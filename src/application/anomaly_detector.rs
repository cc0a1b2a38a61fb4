// Anomaly Detector - threshold and statistical passes over a battery record
use super::features;
use super::outlier::{IsolationForest, OutlierScorer, ZScoreScorer};
use crate::domain::anomaly::{
    AnomalyRecord, AnomalyReport, AnomalyType, Bounds, ChannelThresholds, Severity,
    StatisticalPass,
};
use crate::domain::error::AnalyticsError;
use crate::domain::telemetry::{BatteryRecord, Channel};
use crate::infrastructure::config::{
    validate_contamination, validate_thresholds, AnomalySettings, ScorerKind,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-call overrides. Unset fields fall back to configured defaults.
#[derive(Debug, Clone, Default)]
pub struct DetectionOptions {
    pub thresholds: Option<ChannelThresholds>,
    pub contamination: Option<f64>,
}

#[derive(Debug, Default)]
struct Flag {
    types: Vec<AnomalyType>,
    severity: Option<Severity>,
    score: Option<f64>,
}

impl Flag {
    fn raise(&mut self, kind: AnomalyType, severity: Severity) {
        if !self.types.contains(&kind) {
            self.types.push(kind);
        }
        self.severity = self.severity.max(Some(severity));
    }
}

pub struct AnomalyDetector {
    settings: AnomalySettings,
    scorer: Arc<dyn OutlierScorer>,
}

impl AnomalyDetector {
    pub fn new(settings: AnomalySettings) -> Self {
        let scorer: Arc<dyn OutlierScorer> = match settings.scorer {
            ScorerKind::IsolationForest => Arc::new(IsolationForest::new(
                settings.trees,
                settings.subsample_size,
                settings.seed,
            )),
            ScorerKind::ZScore => Arc::new(ZScoreScorer),
        };
        Self::with_scorer(settings, scorer)
    }

    pub fn with_scorer(settings: AnomalySettings, scorer: Arc<dyn OutlierScorer>) -> Self {
        Self { settings, scorer }
    }

    /// Effective thresholds and contamination for a call, validated.
    pub fn resolve(
        &self,
        options: &DetectionOptions,
    ) -> Result<(ChannelThresholds, f64), AnalyticsError> {
        let thresholds = options.thresholds.unwrap_or(self.settings.thresholds);
        let contamination = options
            .contamination
            .unwrap_or(self.settings.default_contamination);
        validate_contamination(contamination)?;
        validate_thresholds(&thresholds)?;
        Ok((thresholds, contamination))
    }

    pub fn detect(
        &self,
        record: &BatteryRecord,
        options: &DetectionOptions,
    ) -> Result<AnomalyReport, AnalyticsError> {
        let (thresholds, contamination) = self.resolve(options)?;

        let mut flags: BTreeMap<usize, Flag> = BTreeMap::new();
        self.threshold_pass(record, &thresholds, &mut flags);
        let statistical_pass = self.statistical_pass(record, contamination, &mut flags);

        let samples = record.samples();
        let anomalies = flags
            .into_iter()
            .filter_map(|(index, flag)| {
                let sample = &samples[index];
                Some(AnomalyRecord {
                    timestamp: sample.timestamp,
                    sample_index: index,
                    anomaly_types: flag.types,
                    voltage: sample.voltage,
                    current: sample.current,
                    temperature: sample.temperature,
                    outlier_score: flag.score,
                    severity: flag.severity?,
                })
            })
            .collect();

        let report = AnomalyReport::new(
            record.battery_id(),
            record.len(),
            anomalies,
            statistical_pass,
        );
        tracing::debug!(
            "Detected {} anomalies in {} samples for {}",
            report.anomaly_count(),
            report.total_samples(),
            report.battery_id()
        );
        Ok(report)
    }

    fn threshold_pass(
        &self,
        record: &BatteryRecord,
        thresholds: &ChannelThresholds,
        flags: &mut BTreeMap<usize, Flag>,
    ) {
        for (channel, bounds) in thresholds.configured() {
            for (index, sample) in record.samples().iter().enumerate() {
                let value = sample.channel(channel);
                if bounds.contains(value) {
                    continue;
                }
                flags
                    .entry(index)
                    .or_default()
                    .raise(AnomalyType::for_channel(channel), excess_severity(&bounds, value));
            }
        }
    }

    fn statistical_pass(
        &self,
        record: &BatteryRecord,
        contamination: f64,
        flags: &mut BTreeMap<usize, Flag>,
    ) -> StatisticalPass {
        let n = record.len();
        if n < self.settings.min_statistical_samples {
            return StatisticalPass::Skipped {
                reason: format!(
                    "{} samples, at least {} required",
                    n, self.settings.min_statistical_samples
                ),
            };
        }

        let derived = features::derive(record);
        let vectors: Vec<Vec<f64>> = record
            .samples()
            .iter()
            .zip(&derived)
            .map(|(sample, d)| {
                Channel::ALL
                    .iter()
                    .map(|c| sample.channel(*c))
                    .chain(d.values())
                    .collect()
            })
            .collect();

        let scores = self.scorer.score(&vectors);
        let mut ranked: Vec<usize> = (0..n).collect();
        ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

        let flagged = ((contamination * n as f64).round() as usize).min(n);
        for &index in ranked.iter().take(flagged) {
            let flag = flags.entry(index).or_default();
            flag.raise(
                AnomalyType::StatisticalOutlier,
                self.scorer.severity(scores[index]),
            );
            flag.score = Some(scores[index]);
        }

        StatisticalPass::Ran {
            scorer: self.scorer.name().to_string(),
            flagged,
        }
    }
}

/// Severity from how far outside the band a value sits, relative to band width.
fn excess_severity(bounds: &Bounds, value: f64) -> Severity {
    let width = bounds.width();
    if width <= 0.0 {
        return Severity::High;
    }
    let ratio = bounds.excess(value) / width;
    if ratio < 0.10 {
        Severity::Low
    } else if ratio < 0.25 {
        Severity::Medium
    } else {
        Severity::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::telemetry::TelemetrySample;
    use chrono::{TimeZone, Utc};

    fn record_with_voltages(voltages: &[f64]) -> BatteryRecord {
        let samples = voltages
            .iter()
            .enumerate()
            .map(|(i, v)| {
                TelemetrySample::new(Utc.timestamp_opt(i as i64 * 60, 0).unwrap(), *v, 10.0, 25.0)
            })
            .collect();
        BatteryRecord::new("battery-001", samples)
    }

    fn voltage_only(min: f64, max: f64) -> DetectionOptions {
        DetectionOptions {
            thresholds: Some(ChannelThresholds {
                voltage: Some(Bounds::new(min, max)),
                ..Default::default()
            }),
            contamination: None,
        }
    }

    /// Smooth window with a single far excursion at `spike`.
    fn steady_with_spike(n: usize, spike: usize) -> BatteryRecord {
        let samples = (0..n)
            .map(|i| {
                let ts = Utc.timestamp_opt(i as i64 * 60, 0).unwrap();
                if i == spike {
                    TelemetrySample::new(ts, 58.0, 190.0, 48.0)
                } else {
                    let jitter = (i % 4) as f64 * 0.05;
                    TelemetrySample::new(ts, 50.0 + jitter, 20.0 + jitter, 25.0 + jitter)
                }
            })
            .collect();
        BatteryRecord::new("battery-002", samples)
    }

    #[test]
    fn test_threshold_pass_flags_out_of_band() {
        let detector = AnomalyDetector::new(AnomalySettings::default());
        let report = detector
            .detect(&record_with_voltages(&[30.0, 50.0, 70.0]), &voltage_only(40.0, 60.0))
            .unwrap();

        assert_eq!(report.anomaly_count(), 2);
        assert_eq!(report.anomaly_percentage(), 66.67);
        let indices: Vec<usize> = report.anomalies().iter().map(|a| a.sample_index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert!(report
            .anomalies()
            .iter()
            .all(|a| a.anomaly_types == vec![AnomalyType::VoltageAnomaly]));
        assert_eq!(report.anomalies()[0].severity, Severity::High);
        assert!(!report.statistical_pass().ran());
    }

    #[test]
    fn test_boundary_values_are_normal() {
        let detector = AnomalyDetector::new(AnomalySettings::default());
        let report = detector
            .detect(&record_with_voltages(&[40.0, 60.0]), &voltage_only(40.0, 60.0))
            .unwrap();
        assert_eq!(report.anomaly_count(), 0);
        assert_eq!(report.anomaly_percentage(), 0.0);
    }

    #[test]
    fn test_invalid_contamination_rejected() {
        let detector = AnomalyDetector::new(AnomalySettings::default());
        let options = DetectionOptions {
            contamination: Some(1.5),
            ..Default::default()
        };
        let err = detector
            .detect(&record_with_voltages(&[50.0]), &options)
            .unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let detector = AnomalyDetector::new(AnomalySettings::default());
        let err = detector
            .detect(&record_with_voltages(&[50.0]), &voltage_only(60.0, 40.0))
            .unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[test]
    fn test_default_thresholds_apply() {
        let detector = AnomalyDetector::new(AnomalySettings::default());
        let report = detector
            .detect(&record_with_voltages(&[50.0, 61.0]), &DetectionOptions::default())
            .unwrap();
        assert_eq!(report.anomaly_count(), 1);
        assert_eq!(report.anomalies()[0].severity, Severity::Low);
    }

    #[test]
    fn test_severity_from_excess() {
        let bounds = Bounds::new(40.0, 60.0);
        assert_eq!(excess_severity(&bounds, 61.0), Severity::Low);
        assert_eq!(excess_severity(&bounds, 63.0), Severity::Medium);
        assert_eq!(excess_severity(&bounds, 70.0), Severity::High);
    }

    #[test]
    fn test_statistical_pass_skipped_below_minimum() {
        let detector = AnomalyDetector::new(AnomalySettings::default());
        let report = detector
            .detect(&steady_with_spike(19, 5), &DetectionOptions::default())
            .unwrap();
        assert!(matches!(report.statistical_pass(), StatisticalPass::Skipped { .. }));
    }

    #[test]
    fn test_statistical_pass_flags_top_fraction() {
        let detector = AnomalyDetector::new(AnomalySettings::default());
        let options = DetectionOptions {
            contamination: Some(0.05),
            ..Default::default()
        };
        let report = detector.detect(&steady_with_spike(40, 17), &options).unwrap();

        assert_eq!(
            report.statistical_pass(),
            &StatisticalPass::Ran {
                scorer: "isolation_forest".to_string(),
                flagged: 2
            }
        );
        assert_eq!(report.anomaly_count(), 2);
        assert!(report.anomalies().iter().any(|a| a.sample_index == 17));
        assert!(report
            .anomalies()
            .iter()
            .all(|a| a.anomaly_types == vec![AnomalyType::StatisticalOutlier]));
    }

    #[test]
    fn test_extreme_adjacent_voltages_are_scored() {
        let mut voltages = vec![50.0; 25];
        voltages[10] = 1.7e308;
        voltages[11] = -1.7e308;
        let detector = AnomalyDetector::new(AnomalySettings::default());
        let report = detector
            .detect(&record_with_voltages(&voltages), &DetectionOptions::default())
            .unwrap();

        assert!(report.statistical_pass().ran());
        let flagged: Vec<usize> = report.anomalies().iter().map(|a| a.sample_index).collect();
        assert!(flagged.contains(&10));
        assert!(flagged.contains(&11));
        assert!(report
            .anomalies()
            .iter()
            .all(|a| a.outlier_score.is_none_or(f64::is_finite)));
    }

    #[test]
    fn test_detection_is_reproducible() {
        let detector = AnomalyDetector::new(AnomalySettings::default());
        let record = steady_with_spike(50, 30);
        let options = DetectionOptions::default();
        assert_eq!(
            detector.detect(&record, &options).unwrap(),
            detector.detect(&record, &options).unwrap()
        );
    }

    #[test]
    fn test_passes_merge_into_one_record() {
        let settings = AnomalySettings {
            scorer: ScorerKind::ZScore,
            ..Default::default()
        };
        let detector = AnomalyDetector::new(settings);
        let options = DetectionOptions {
            thresholds: Some(ChannelThresholds {
                current: Some(Bounds::new(-100.0, 100.0)),
                ..Default::default()
            }),
            contamination: Some(0.02),
        };
        let report = detector.detect(&steady_with_spike(50, 30), &options).unwrap();

        assert_eq!(report.anomaly_count(), 1);
        let record = &report.anomalies()[0];
        assert_eq!(record.sample_index, 30);
        assert_eq!(
            record.anomaly_types,
            vec![AnomalyType::CurrentAnomaly, AnomalyType::StatisticalOutlier]
        );
        assert_eq!(record.severity, Severity::High);
        assert!(record.outlier_score.is_some());
        assert_eq!(report.summary().len(), 2);
    }
}
