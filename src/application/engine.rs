// Analytics engine - Facade over normalization, metrics, detection and history
use crate::application::anomaly_detector::{AnomalyDetector, DetectionOptions};
use crate::application::features::{aggregate_by_period, PeriodAggregate};
use crate::application::history_repository::HistoryRepository;
use crate::application::metrics_calculator::{MetricsCalculator, MetricsOptions};
use crate::application::normalizer::{NormalizeOptions, NormalizedTelemetry, TelemetryNormalizer};
use crate::domain::anomaly::AnomalyReport;
use crate::domain::error::AnalyticsError;
use crate::domain::metrics::MetricsSnapshot;
use crate::domain::telemetry::{BatteryRecord, RawTelemetryRow};
use crate::infrastructure::config::AnalyticsConfig;
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;

/// Conflicting appends are retried this many times before giving up
const MAX_CONFLICT_RETRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub normalize: NormalizeOptions,
    pub detection: DetectionOptions,
    pub metrics: MetricsOptions,
    /// Append the resulting snapshot to history
    pub persist: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            normalize: NormalizeOptions::default(),
            detection: DetectionOptions::default(),
            metrics: MetricsOptions::default(),
            persist: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRow {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizationSummary {
    pub input_rows: usize,
    pub accepted_samples: usize,
    pub duplicate_timestamps: usize,
    pub rejected_rows: Vec<RejectedRow>,
}

impl NormalizationSummary {
    fn from_normalized(input_rows: usize, normalized: &NormalizedTelemetry) -> Self {
        Self {
            input_rows,
            accepted_samples: normalized.record.len(),
            duplicate_timestamps: normalized.duplicate_count,
            rejected_rows: normalized
                .rejections
                .iter()
                .map(|r| RejectedRow {
                    row: r.row,
                    reason: r.reason.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub snapshot: MetricsSnapshot,
    pub report: AnomalyReport,
    pub normalization: NormalizationSummary,
    /// History version after the append, `None` when not persisted
    pub history_version: Option<u64>,
}

/// Stateless entry point shared across requests. Configuration is fixed at
/// construction; only the history repository carries state.
pub struct AnalyticsEngine {
    normalizer: TelemetryNormalizer,
    calculator: Arc<MetricsCalculator>,
    detector: Arc<AnomalyDetector>,
    repository: Arc<dyn HistoryRepository>,
}

impl AnalyticsEngine {
    pub fn new(
        config: AnalyticsConfig,
        repository: Arc<dyn HistoryRepository>,
    ) -> Result<Self, AnalyticsError> {
        config.validate()?;
        Ok(Self {
            normalizer: TelemetryNormalizer::new(),
            calculator: Arc::new(MetricsCalculator::new(config.battery, config.health)),
            detector: Arc::new(AnomalyDetector::new(config.anomaly)),
            repository,
        })
    }

    pub fn normalize(
        &self,
        battery_id: &str,
        rows: &[RawTelemetryRow],
        options: &NormalizeOptions,
    ) -> Result<NormalizedTelemetry, AnalyticsError> {
        self.normalizer.normalize(battery_id, rows, options)
    }

    /// Normalize, then compute metrics and detect anomalies concurrently over
    /// the same record.
    pub async fn process(
        &self,
        battery_id: &str,
        rows: &[RawTelemetryRow],
        options: &ProcessOptions,
    ) -> Result<ProcessOutcome, AnalyticsError> {
        self.detector.resolve(&options.detection)?;
        let normalized = self.normalize(battery_id, rows, &options.normalize)?;
        let normalization = NormalizationSummary::from_normalized(rows.len(), &normalized);
        let record = Arc::new(normalized.record);

        let detector = Arc::clone(&self.detector);
        let detection_record = Arc::clone(&record);
        let detection_options = options.detection.clone();
        let detection = tokio::task::spawn_blocking(move || {
            detector.detect(&detection_record, &detection_options)
        });

        let (report, (snapshot, history_version)) = futures::future::try_join(
            async { detection.await.map_err(AnalyticsError::from).and_then(|r| r) },
            self.compute_and_store(Arc::clone(&record), &options.metrics, options.persist),
        )
        .await?;

        tracing::info!(
            "Processed {} samples for {}: SOH {:.2}% ({}), {} anomalies",
            record.len(),
            battery_id,
            snapshot.state_of_health,
            snapshot.health_status.as_str(),
            report.anomaly_count()
        );

        Ok(ProcessOutcome {
            snapshot,
            report,
            normalization,
            history_version,
        })
    }

    pub async fn compute_metrics(
        &self,
        battery_id: &str,
        rows: &[RawTelemetryRow],
        options: &ProcessOptions,
    ) -> Result<MetricsSnapshot, AnalyticsError> {
        let normalized = self.normalize(battery_id, rows, &options.normalize)?;
        let (snapshot, _) = self
            .compute_and_store(Arc::new(normalized.record), &options.metrics, options.persist)
            .await?;
        Ok(snapshot)
    }

    pub async fn detect_anomalies(
        &self,
        battery_id: &str,
        rows: &[RawTelemetryRow],
        options: &ProcessOptions,
    ) -> Result<AnomalyReport, AnalyticsError> {
        self.detector.resolve(&options.detection)?;
        let record = self.normalize(battery_id, rows, &options.normalize)?.record;
        let detector = Arc::clone(&self.detector);
        let detection_options = options.detection.clone();
        tokio::task::spawn_blocking(move || detector.detect(&record, &detection_options)).await?
    }

    /// Per-period channel statistics over normalized rows
    pub fn aggregate_periods(
        &self,
        battery_id: &str,
        rows: &[RawTelemetryRow],
        options: &NormalizeOptions,
        period: Duration,
    ) -> Result<Vec<PeriodAggregate>, AnalyticsError> {
        if period <= Duration::zero() {
            return Err(AnalyticsError::configuration("period", "must be positive"));
        }
        let record = self.normalize(battery_id, rows, options)?.record;
        Ok(aggregate_by_period(&record, period))
    }

    pub async fn latest_snapshot(
        &self,
        battery_id: &str,
    ) -> Result<Option<MetricsSnapshot>, AnalyticsError> {
        let history = self.repository.load_history(battery_id).await?;
        Ok(history.and_then(|h| h.latest().cloned()))
    }

    pub async fn battery_ids(&self) -> Result<Vec<String>, AnalyticsError> {
        self.repository.list_battery_ids().await
    }

    /// Compute against the latest history and append, recomputing when another
    /// writer advanced the history in between.
    async fn compute_and_store(
        &self,
        record: Arc<BatteryRecord>,
        options: &MetricsOptions,
        persist: bool,
    ) -> Result<(MetricsSnapshot, Option<u64>), AnalyticsError> {
        let battery_id = record.battery_id().to_string();
        let mut conflicts = 0;

        loop {
            let history = self.repository.load_history(&battery_id).await?;
            let expected_version = history.as_ref().map_or(0, |h| h.version);

            let calculator = Arc::clone(&self.calculator);
            let calc_record = Arc::clone(&record);
            let calc_options = options.clone();
            let snapshot = tokio::task::spawn_blocking(move || {
                calculator.compute(&calc_record, history.as_ref(), &calc_options)
            })
            .await??;

            if !persist {
                return Ok((snapshot, None));
            }

            match self.repository.append_snapshot(&snapshot, expected_version).await {
                Ok(version) => return Ok((snapshot, Some(version))),
                Err(AnalyticsError::Conflict { actual, .. })
                    if conflicts < MAX_CONFLICT_RETRIES =>
                {
                    conflicts += 1;
                    tracing::warn!(
                        "History for {} moved from version {} to {}, recomputing (attempt {})",
                        battery_id,
                        expected_version,
                        actual,
                        conflicts
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}
