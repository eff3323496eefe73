use crate::api::{ingest, ApiError};
use crate::state::AppState;
use telemon_common::hash::{self, HASH_METADATA};
use telemon_common::proto::metrics_server::Metrics;
use telemon_common::proto::{AddCounterMetricRequest, AddGaugeMetricRequest, AddMetricResponse};
use telemon_common::types::Metric;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

pub struct MetricsService {
    state: AppState,
}

impl MetricsService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// With a key configured, `hashsha256` must carry the HMAC of the
    /// metric's canonical JSON form.
    fn verify(&self, metadata: &MetadataMap, metric: &Metric) -> Result<(), Status> {
        let Some(key) = self.state.key.as_deref() else {
            return Ok(());
        };
        let tag = metadata
            .get(HASH_METADATA)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Status::unauthenticated("missing hashsha256 metadata"))?;
        let json = serde_json::to_vec(metric).map_err(|e| Status::internal(e.to_string()))?;
        if !hash::verify(&json, tag, key) {
            tracing::warn!(id = %metric.id, kind = %metric.kind(), "gRPC signature mismatch");
            return Err(Status::unauthenticated("hashsha256 does not match"));
        }
        Ok(())
    }

    async fn apply(&self, metadata: &MetadataMap, metric: Metric) -> Result<Response<AddMetricResponse>, Status> {
        if metric.id.is_empty() {
            return Err(Status::invalid_argument("name is required"));
        }
        self.verify(metadata, &metric)?;
        ingest(self.state.storage.as_ref(), std::slice::from_ref(&metric))
            .await
            .map_err(|e| match e {
                ApiError::BadRequest(msg) | ApiError::UnsupportedKind(msg) => {
                    Status::invalid_argument(msg)
                }
                other => {
                    tracing::error!(id = %metric.id, error = %other, "gRPC update failed");
                    Status::internal(other.to_string())
                }
            })?;
        Ok(Response::new(AddMetricResponse {}))
    }
}

#[tonic::async_trait]
impl Metrics for MetricsService {
    async fn add_gauge_metric(
        &self,
        request: Request<AddGaugeMetricRequest>,
    ) -> Result<Response<AddMetricResponse>, Status> {
        let (metadata, _, msg) = request.into_parts();
        if !msg.value.is_finite() {
            return Err(Status::invalid_argument("gauge value must be finite"));
        }
        self.apply(&metadata, Metric::gauge(msg.name, msg.value)).await
    }

    async fn add_counter_metric(
        &self,
        request: Request<AddCounterMetricRequest>,
    ) -> Result<Response<AddMetricResponse>, Status> {
        let (metadata, _, msg) = request.into_parts();
        self.apply(&metadata, Metric::counter(msg.name, msg.value)).await
    }
}
