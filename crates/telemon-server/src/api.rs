//! HTTP ingest and lookup handlers.
//!
//! Every update route only parses its wire shape into `Vec<Metric>` and
//! hands it to [`ingest`]; validation of the whole request happens before
//! anything is applied.

use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use telemon_common::types::{Metric, MetricError, MetricKind, WireMetric};
use telemon_storage::{Storage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    UnsupportedKind(String),

    #[error("storage failure: {0}")]
    Storage(StorageError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::UnsupportedKind(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MetricError> for ApiError {
    fn from(e: MetricError) -> Self {
        match e {
            MetricError::UnsupportedKind(_) => ApiError::UnsupportedKind(e.to_string()),
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            StorageError::InvalidMetric(inner) => inner.into(),
            other => ApiError::Storage(other),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("malformed JSON: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Storage(e) = &self {
            tracing::error!(error = %e, "Storage operation failed");
        }
        (status, self.to_string()).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// The one place metrics enter storage. Counters add, gauges replace;
/// a storage failure aborts the rest of the request.
pub async fn ingest(storage: &dyn Storage, metrics: &[Metric]) -> ApiResult<()> {
    match metrics {
        [] => Ok(()),
        [metric] => {
            storage.update(metric).await?;
            tracing::debug!(id = %metric.id, kind = %metric.kind(), "Metric updated");
            Ok(())
        }
        batch => {
            storage.update_batch(batch).await?;
            tracing::debug!(count = batch.len(), "Batch updated");
            Ok(())
        }
    }
}

fn parse_wire(body: &[u8]) -> ApiResult<Metric> {
    let wire: WireMetric = serde_json::from_slice(body)?;
    Ok(Metric::try_from(wire)?)
}

/// Every element is validated before the batch is returned, so an invalid
/// element rejects the whole batch.
fn parse_wire_batch(body: &[u8]) -> ApiResult<Vec<Metric>> {
    let wire: Vec<WireMetric> = serde_json::from_slice(body)?;
    wire.into_iter()
        .map(|w| Metric::try_from(w).map_err(ApiError::from))
        .collect()
}

fn value_text(metric: &Metric) -> String {
    metric.value.to_string()
}

/// `POST /update/{kind}/{name}/{value}`
async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let kind: MetricKind = kind.parse()?;
    if name.is_empty() {
        return Err(ApiError::NotFound("metric name is required".to_string()));
    }
    let metric = Metric::new(name, kind.parse_value(&value)?);
    ingest(state.storage.as_ref(), std::slice::from_ref(&metric)).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "OK",
    ))
}

/// `POST /update/`: one JSON metric; responds with the stored value.
async fn update_json(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Metric>> {
    let metric = parse_wire(&body)?;
    ingest(state.storage.as_ref(), std::slice::from_ref(&metric)).await?;
    let stored = state.storage.get(metric.kind(), &metric.id).await?;
    Ok(Json(stored))
}

/// `POST /updates/`: a JSON array applied all-or-nothing at validation
/// time, in order at apply time.
async fn update_batch(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<serde_json::Value>> {
    let metrics = parse_wire_batch(&body)?;
    ingest(state.storage.as_ref(), &metrics).await?;
    Ok(Json(serde_json::json!({ "updated": metrics.len() })))
}

/// `POST /value/`: `{"id":..,"type":..}` lookup.
async fn value_json(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Metric>> {
    let wire: WireMetric = serde_json::from_slice(&body)?;
    let key = wire.key()?;
    let metric = state.storage.get(key.kind, &key.id).await?;
    Ok(Json(metric))
}

/// `GET /value/{kind}/{name}`: the bare value as text.
async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<String> {
    let kind: MetricKind = kind.parse()?;
    let metric = state.storage.get(kind, &name).await?;
    Ok(value_text(&metric))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// `GET /`: every series as a plain HTML table.
async fn index(State(state): State<AppState>) -> ApiResult<Html<String>> {
    let all = state.storage.get_all().await?;
    let mut page = String::from(
        "<!DOCTYPE html>\n<html><head><title>telemon</title></head><body>\n\
         <table>\n<tr><th>Name</th><th>Type</th><th>Value</th></tr>\n",
    );
    for (key, value) in &all {
        page.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape_html(&key.id),
            key.kind,
            value
        ));
    }
    page.push_str("</table>\n</body></html>\n");
    Ok(Html(page))
}

/// `GET /ping`: storage health.
async fn ping(State(state): State<AppState>) -> Response {
    match state.storage.ping().await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => {
            tracing::error!(backend = state.storage.backend(), error = %e, "Storage ping failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable").into_response()
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/ping", get(ping))
        .route("/update/:kind/:name/:value", post(update_path))
        .route("/update/", post(update_json))
        .route("/updates/", post(update_batch))
        .route("/value/", post(value_json))
        .route("/value/:kind/:name", get(value_path))
}
