// HTTP response utilities for JSON bodies and error mapping
use crate::domain::error::AnalyticsError;
use axum::{
    body::Body,
    http::{header, HeaderValue, Response, StatusCode},
    response::IntoResponse,
};
use serde::Serialize;

/// Serialize `data` as a JSON response with the given status
pub fn json_response<T: Serialize>(
    status: StatusCode,
    data: &T,
) -> Result<Response<Body>, StatusCode> {
    let bytes = serde_json::to_vec(data).map_err(|e| {
        tracing::error!("JSON serialization error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .header(header::CONTENT_LENGTH, bytes.len())
        .body(Body::from(bytes))
        .map_err(|e| {
            tracing::error!("Response build error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

pub fn status_for(err: &AnalyticsError) -> StatusCode {
    match err {
        AnalyticsError::Validation { .. } | AnalyticsError::Configuration { .. } => {
            StatusCode::BAD_REQUEST
        }
        AnalyticsError::InsufficientData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AnalyticsError::Conflict { .. } => StatusCode::CONFLICT,
        AnalyticsError::Storage(_) | AnalyticsError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    detail: String,
}

/// Map an analytics error to a JSON error body. Server-side failures are
/// logged with their source chain and reported without internals.
pub fn error_response(err: &AnalyticsError) -> Response<Body> {
    let status = status_for(err);
    let detail = if status.is_server_error() {
        tracing::error!("Request failed ({}): {}", err.category(), anyhow_chain(err));
        "internal error".to_string()
    } else {
        tracing::debug!("Request rejected ({}): {}", err.category(), err);
        err.to_string()
    };

    message_response(status, err.category(), detail)
}

/// JSON `{ error, detail }` body for failures raised outside the engine
pub fn message_response(
    status: StatusCode,
    error: &str,
    detail: impl Into<String>,
) -> Response<Body> {
    let body = ErrorBody {
        error,
        detail: detail.into(),
    };
    json_response(status, &body).unwrap_or_else(|status| status.into_response())
}

fn anyhow_chain(err: &AnalyticsError) -> String {
    match err {
        AnalyticsError::Storage(source) => format!("{:#}", source),
        other => other.to_string(),
    }
}

/// Unwrap a handler result into a response
pub fn into_response<T: Serialize>(result: Result<T, AnalyticsError>) -> Response<Body> {
    match result {
        Ok(data) => {
            json_response(StatusCode::OK, &data).unwrap_or_else(|status| status.into_response())
        }
        Err(e) => error_response(&e),
    }
}
