// Request and response bodies for the HTTP adapter
use crate::application::engine::{NormalizationSummary, ProcessOutcome};
use crate::domain::anomaly::{
    AnomalyRecord, AnomalyReport, AnomalyType, ChannelThresholds, StatisticalPass,
};
use crate::domain::metrics::{CycleBaseline, MetricsSnapshot};
use crate::domain::telemetry::RawTelemetryRow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub struct ProcessQuery {
    pub battery_id: String,
    pub resample_secs: Option<i64>,
    pub contamination: Option<f64>,
    #[serde(default)]
    pub reject_invalid: bool,
    #[serde(default)]
    pub strict: bool,
    pub persist: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct MetricsRequest {
    pub data: Vec<RawTelemetryRow>,
    #[serde(default)]
    pub strict: bool,
    pub cycle_baseline: Option<CycleBaseline>,
    pub resample_secs: Option<i64>,
    pub persist: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    pub battery_id: String,
    pub data: Vec<RawTelemetryRow>,
    pub contamination: Option<f64>,
    pub thresholds: Option<ChannelThresholds>,
}

#[derive(Debug, Deserialize)]
pub struct AggregateRequest {
    pub data: Vec<RawTelemetryRow>,
    pub period_secs: i64,
}

#[derive(Debug, Serialize)]
pub struct AnomalyReportResponse {
    pub battery_id: String,
    pub total_samples: usize,
    pub anomaly_count: usize,
    pub anomaly_percentage: f64,
    pub anomalies: Vec<AnomalyRecord>,
    pub summary: BTreeMap<AnomalyType, usize>,
    pub statistical_pass: StatisticalPass,
}

impl From<&AnomalyReport> for AnomalyReportResponse {
    fn from(report: &AnomalyReport) -> Self {
        Self {
            battery_id: report.battery_id().to_string(),
            total_samples: report.total_samples(),
            anomaly_count: report.anomaly_count(),
            anomaly_percentage: report.anomaly_percentage(),
            anomalies: report.anomalies().to_vec(),
            summary: report.summary(),
            statistical_pass: report.statistical_pass().clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub battery_id: String,
    pub metrics: MetricsSnapshot,
    pub anomalies: AnomalyReportResponse,
    pub normalization: NormalizationSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_version: Option<u64>,
}

impl From<ProcessOutcome> for ProcessResponse {
    fn from(outcome: ProcessOutcome) -> Self {
        Self {
            battery_id: outcome.snapshot.battery_id.clone(),
            anomalies: AnomalyReportResponse::from(&outcome.report),
            metrics: outcome.snapshot,
            normalization: outcome.normalization,
            history_version: outcome.history_version,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub batteries: Vec<String>,
}
