//! Delivery of reports to the server.
//!
//! A [`Transport`] makes exactly one attempt per call. [`DeliveryClient`]
//! wraps a transport with the bounded retry schedule and turns an exhausted
//! schedule into [`SendError::ConnectionFailed`].

use crate::config::WireFormat;
use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use telemon_common::hash::HASH_HEADER;
use telemon_common::retry::{RetryError, RetryPolicy, Sleeper, TokioSleeper};
use telemon_common::transport::{EncodedPayload, Encoder, TransportError};
use telemon_common::types::Metric;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Send: request timed out")]
    Timeout,

    #[error("Send: cannot connect: {0}")]
    Connect(String),

    #[error("Send: server responded with status {0}")]
    Status(u16),

    #[error("Send: gRPC call failed: {0}")]
    Rpc(tonic::Status),

    #[error("Send: encoding failed: {0}")]
    Encode(#[from] TransportError),

    #[error("Send: request failed: {0}")]
    Request(String),

    /// Every attempt of the retry schedule timed out.
    #[error("Send: connection failed after {attempts} attempts: {last}")]
    ConnectionFailed {
        attempts: usize,
        #[source]
        last: Box<SendError>,
    },
}

impl SendError {
    /// Only timeouts are retried. A refused connection is surfaced at once.
    pub fn is_transient(&self) -> bool {
        matches!(self, SendError::Timeout)
    }
}

impl From<reqwest::Error> for SendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SendError::Timeout
        } else if e.is_connect() {
            SendError::Connect(e.to_string())
        } else {
            SendError::Request(e.to_string())
        }
    }
}

/// A unit of work on the delivery queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Single(Metric),
    Batch(Vec<Metric>),
}

impl Job {
    pub fn len(&self) -> usize {
        match self {
            Job::Single(_) => 1,
            Job::Batch(metrics) => metrics.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One delivery attempt for a job.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, job: &Job) -> Result<(), SendError>;
}

/// HTTP transport for the path, single-JSON and batch wire shapes.
pub struct HttpTransport {
    http: reqwest::Client,
    base: reqwest::Url,
    encoder: Encoder,
    format: WireFormat,
}

impl HttpTransport {
    pub fn new(
        base: &str,
        encoder: Encoder,
        format: WireFormat,
        timeout: Duration,
    ) -> Result<Self, SendError> {
        let base = reqwest::Url::parse(base)
            .map_err(|e| SendError::Request(format!("invalid server URL '{base}': {e}")))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base,
            encoder,
            format,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, SendError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SendError::Request(format!("server URL '{}' cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post(&self, url: reqwest::Url, payload: EncodedPayload) -> Result<(), SendError> {
        let mut request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json");
        if payload.gzip {
            request = request.header(CONTENT_ENCODING, "gzip");
        }
        if let Some(signature) = payload.signature {
            request = request.header(HASH_HEADER, signature);
        }
        let response = request.body(payload.body).send().await?;
        check_status(response.status())
    }

    /// `POST /update/{kind}/{name}/{value}` with an empty body. When a key
    /// is configured the empty body is signed.
    pub async fn send_path(&self, metric: &Metric) -> Result<(), SendError> {
        let value = metric.value.to_path_segment();
        let url = self.url(&["update", metric.kind().as_str(), &metric.id, &value])?;
        let mut request = self.http.post(url).header(CONTENT_TYPE, "text/plain");
        if let Some(signature) = self.encoder.sign(b"") {
            request = request.header(HASH_HEADER, signature);
        }
        let response = request.send().await?;
        check_status(response.status())
    }

    /// `POST /update/` with one encoded metric.
    pub async fn send_json(&self, metric: &Metric) -> Result<(), SendError> {
        let payload = self.encoder.encode_metric(metric)?;
        self.post(self.url(&["update", ""])?, payload).await
    }

    /// `POST /updates/` with the metrics as one encoded array.
    pub async fn send_batch(&self, metrics: &[Metric]) -> Result<(), SendError> {
        let payload = self.encoder.encode_batch(metrics)?;
        self.post(self.url(&["updates", ""])?, payload).await
    }

    async fn send_one(&self, metric: &Metric) -> Result<(), SendError> {
        match self.format {
            WireFormat::Path => self.send_path(metric).await,
            WireFormat::Batch => self.send_batch(std::slice::from_ref(metric)).await,
            WireFormat::Json | WireFormat::Grpc => self.send_json(metric).await,
        }
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<(), SendError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(SendError::Status(status.as_u16()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, job: &Job) -> Result<(), SendError> {
        match job {
            Job::Single(metric) => self.send_one(metric).await,
            Job::Batch(metrics) if self.format == WireFormat::Batch => {
                self.send_batch(metrics).await
            }
            Job::Batch(metrics) => {
                for metric in metrics {
                    self.send_one(metric).await?;
                }
                Ok(())
            }
        }
    }
}

/// A transport plus the retry schedule.
pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl DeliveryClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_retry(transport, RetryPolicy::default(), Arc::new(TokioSleeper))
    }

    pub fn with_retry(
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            transport,
            policy,
            sleeper,
        }
    }

    /// Delivers `job`, retrying timeout-class failures on the schedule.
    pub async fn deliver(&self, job: &Job) -> Result<(), SendError> {
        let transport = self.transport.as_ref();
        self.policy
            .run(
                self.sleeper.as_ref(),
                SendError::is_transient,
                move |attempt| async move {
                    tracing::debug!(
                        transport = transport.name(),
                        attempt,
                        metrics = job.len(),
                        "Sending"
                    );
                    transport.send(job).await
                },
            )
            .await
            .map_err(|e| match e {
                RetryError::Exhausted { attempts, last } => SendError::ConnectionFailed {
                    attempts,
                    last: Box::new(last),
                },
                RetryError::Permanent(e) => e,
            })
    }
}
