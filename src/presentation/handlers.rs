// HTTP request handlers
use crate::application::anomaly_detector::DetectionOptions;
use crate::application::engine::ProcessOptions;
use crate::application::metrics_calculator::MetricsOptions;
use crate::application::normalizer::{InvalidRowPolicy, NormalizeOptions};
use crate::domain::error::AnalyticsError;
use crate::domain::metrics::MetricsSnapshot;
use crate::infrastructure::csv_source::parse_csv;
use crate::infrastructure::http_response::{
    error_response, into_response, json_response, message_response,
};
use crate::presentation::app_state::AppState;
use crate::presentation::dto::{
    AggregateRequest, AnomalyReportResponse, DetectRequest, MetricsRequest, ProcessQuery,
    ProcessResponse, StatusResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Duration;
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/status", get(service_status))
        .route("/api/v1/process", post(process_csv))
        .route(
            "/api/v1/metrics/:battery_id",
            get(latest_metrics).post(compute_metrics),
        )
        .route("/api/v1/anomalies/detect", post(detect_anomalies))
        .route("/api/v1/aggregates/:battery_id", post(aggregate_periods))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn service_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let result = state.engine.battery_ids().await.map(|batteries| StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        batteries,
    });
    into_response(result)
}

/// Normalize a CSV body, then compute metrics and detect anomalies
pub async fn process_csv(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProcessQuery>,
    body: String,
) -> impl IntoResponse {
    into_response(run_process(&state, query, &body).await)
}

async fn run_process(
    state: &AppState,
    query: ProcessQuery,
    body: &str,
) -> Result<ProcessResponse, AnalyticsError> {
    let rows = parse_csv(body)?;
    let policy = if query.reject_invalid {
        InvalidRowPolicy::Reject
    } else {
        InvalidRowPolicy::Drop
    };
    let options = ProcessOptions {
        normalize: NormalizeOptions {
            policy,
            resample_interval: resample_interval(query.resample_secs)?,
        },
        detection: DetectionOptions {
            thresholds: None,
            contamination: query.contamination,
        },
        metrics: MetricsOptions {
            strict: query.strict,
            cycle_baseline: None,
        },
        persist: query.persist.unwrap_or(true),
    };

    let outcome = state.engine.process(&query.battery_id, &rows, &options).await?;
    Ok(ProcessResponse::from(outcome))
}

/// Compute metrics from JSON rows and append them to history
pub async fn compute_metrics(
    Path(battery_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<MetricsRequest>,
) -> impl IntoResponse {
    into_response(run_compute_metrics(&state, &battery_id, request).await)
}

async fn run_compute_metrics(
    state: &AppState,
    battery_id: &str,
    request: MetricsRequest,
) -> Result<MetricsSnapshot, AnalyticsError> {
    let options = ProcessOptions {
        normalize: NormalizeOptions {
            resample_interval: resample_interval(request.resample_secs)?,
            ..Default::default()
        },
        metrics: MetricsOptions {
            strict: request.strict,
            cycle_baseline: request.cycle_baseline,
        },
        persist: request.persist.unwrap_or(true),
        ..Default::default()
    };
    state
        .engine
        .compute_metrics(battery_id, &request.data, &options)
        .await
}

/// Latest stored snapshot for a battery
pub async fn latest_metrics(
    Path(battery_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.engine.latest_snapshot(&battery_id).await {
        Ok(Some(snapshot)) => {
            json_response(StatusCode::OK, &snapshot).unwrap_or_else(|status| status.into_response())
        }
        Ok(None) => message_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no metrics stored for {}", battery_id),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn detect_anomalies(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DetectRequest>,
) -> impl IntoResponse {
    let options = ProcessOptions {
        detection: DetectionOptions {
            thresholds: request.thresholds,
            contamination: request.contamination,
        },
        persist: false,
        ..Default::default()
    };
    let result = state
        .engine
        .detect_anomalies(&request.battery_id, &request.data, &options)
        .await;
    into_response(result.map(|report| AnomalyReportResponse::from(&report)))
}

/// Mean/min/max per channel for fixed-width periods
pub async fn aggregate_periods(
    Path(battery_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<AggregateRequest>,
) -> impl IntoResponse {
    let result = Duration::try_seconds(request.period_secs)
        .ok_or_else(|| {
            AnalyticsError::configuration(
                "period_secs",
                format!("{} is out of range", request.period_secs),
            )
        })
        .and_then(|period| {
            state.engine.aggregate_periods(
                &battery_id,
                &request.data,
                &NormalizeOptions::default(),
                period,
            )
        });
    into_response(result)
}

fn resample_interval(secs: Option<i64>) -> Result<Option<Duration>, AnalyticsError> {
    secs.map(|secs| {
        Duration::try_seconds(secs).ok_or_else(|| {
            AnalyticsError::configuration("resample_secs", format!("{} is out of range", secs))
        })
    })
    .transpose()
}
