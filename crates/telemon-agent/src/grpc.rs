use crate::sender::{Job, SendError, Transport};
use async_trait::async_trait;
use std::time::Duration;
use telemon_common::hash::HASH_METADATA;
use telemon_common::proto::metrics_client::MetricsClient;
use telemon_common::proto::{AddCounterMetricRequest, AddGaugeMetricRequest};
use telemon_common::transport::Encoder;
use telemon_common::types::{Metric, MetricValue};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::Code;

/// Sends each metric as a unary `AddGaugeMetric` / `AddCounterMetric` call.
///
/// The channel connects lazily, so an unreachable server shows up as an
/// `Unavailable` status on the first call rather than at construction.
pub struct GrpcTransport {
    client: MetricsClient<Channel>,
    encoder: Encoder,
}

impl GrpcTransport {
    pub fn new(endpoint: &str, encoder: Encoder, timeout: Duration) -> Result<Self, SendError> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| SendError::Request(format!("invalid gRPC endpoint '{endpoint}': {e}")))?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_lazy();
        Ok(Self {
            client: MetricsClient::new(channel),
            encoder,
        })
    }

    /// Signs the canonical JSON form of the metric; the server recomputes
    /// it from the request fields.
    fn request<T>(&self, metric: &Metric, message: T) -> Result<tonic::Request<T>, SendError> {
        let mut request = tonic::Request::new(message);
        let json = serde_json::to_vec(metric).map_err(|e| SendError::Encode(e.into()))?;
        if let Some(signature) = self.encoder.sign(&json) {
            let value: MetadataValue<Ascii> = signature
                .parse()
                .map_err(|_| SendError::Request("signature is not valid metadata".into()))?;
            request.metadata_mut().insert(HASH_METADATA, value);
        }
        Ok(request)
    }

    pub async fn send_metric(&self, metric: &Metric) -> Result<(), SendError> {
        let mut client = self.client.clone();
        let result = match metric.value {
            MetricValue::Gauge(value) => {
                let message = AddGaugeMetricRequest {
                    name: metric.id.clone(),
                    value,
                };
                client.add_gauge_metric(self.request(metric, message)?).await
            }
            MetricValue::Counter(value) => {
                let message = AddCounterMetricRequest {
                    name: metric.id.clone(),
                    value,
                };
                client.add_counter_metric(self.request(metric, message)?).await
            }
        };
        result.map(|_| ()).map_err(status_to_error)
    }
}

fn status_to_error(status: tonic::Status) -> SendError {
    match status.code() {
        Code::DeadlineExceeded => SendError::Timeout,
        Code::Unavailable => SendError::Connect(status.message().to_string()),
        _ => SendError::Rpc(status),
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    fn name(&self) -> &'static str {
        "grpc"
    }

    async fn send(&self, job: &Job) -> Result<(), SendError> {
        match job {
            Job::Single(metric) => self.send_metric(metric).await,
            Job::Batch(metrics) => {
                for metric in metrics {
                    self.send_metric(metric).await?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(!status_to_error(tonic::Status::unavailable("down")).is_transient());
        assert!(status_to_error(tonic::Status::deadline_exceeded("slow")).is_transient());
        assert!(!status_to_error(tonic::Status::unauthenticated("bad hash")).is_transient());
    }
}
