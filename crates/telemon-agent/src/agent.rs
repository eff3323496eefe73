use crate::config::{AgentConfig, WireFormat};
use crate::grpc::GrpcTransport;
use crate::pool::WorkerPool;
use crate::sender::{DeliveryClient, HttpTransport, Job, Transport};
use std::sync::Arc;
use std::time::Duration;
use telemon_collector::{Sampler, SharedSamples};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Sampling loop, report loop and delivery workers wired together.
pub struct Agent {
    sampler: Sampler,
    client: Arc<DeliveryClient>,
    workers: usize,
    queue_capacity: usize,
    poll_interval: Duration,
    report_interval: Duration,
    batched: bool,
}

impl Agent {
    /// Builds the transport named by `wire_format` and the default collectors.
    pub fn from_config(config: &AgentConfig) -> anyhow::Result<Self> {
        let encoder = config.encoder()?;
        let transport: Arc<dyn Transport> = match config.wire_format {
            WireFormat::Grpc => Arc::new(GrpcTransport::new(
                &config.grpc_url(),
                encoder,
                config.request_timeout(),
            )?),
            format => Arc::new(HttpTransport::new(
                &config.base_url(),
                encoder,
                format,
                config.request_timeout(),
            )?),
        };
        let sampler = Sampler::with_default_collectors(SharedSamples::new());
        Ok(Self::new(config, sampler, Arc::new(DeliveryClient::new(transport))))
    }

    pub fn new(config: &AgentConfig, sampler: Sampler, client: Arc<DeliveryClient>) -> Self {
        Self {
            sampler,
            client,
            workers: config.rate_limit,
            queue_capacity: config.queue_capacity,
            poll_interval: config.poll_interval(),
            report_interval: config.report_interval(),
            batched: config.wire_format.batches(),
        }
    }

    /// Runs until `cancel` fires. Sampling and reporting stop at once;
    /// queued and in-flight sends are allowed to finish, retries included.
    pub async fn run(self, cancel: CancellationToken) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let pool = WorkerPool::spawn(self.workers, rx, self.client);
        let samples = self.sampler.samples().clone();

        let sampling = tokio::spawn(sampling_loop(
            self.sampler,
            self.poll_interval,
            cancel.clone(),
        ));
        report_loop(samples, tx, self.report_interval, self.batched, cancel).await;

        if let Err(e) = sampling.await {
            tracing::error!(error = %e, "Sampling loop panicked");
        }
        pool.join().await;
        tracing::info!("Agent stopped");
    }
}

async fn sampling_loop(mut sampler: Sampler, every: Duration, cancel: CancellationToken) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => sampler.sample(),
        }
    }
    tracing::debug!("Sampling loop stopped");
}

/// Owns the only producer half of the queue; returning drops it, which
/// closes the queue.
async fn report_loop(
    samples: SharedSamples,
    tx: mpsc::Sender<Job>,
    every: Duration,
    batched: bool,
    cancel: CancellationToken,
) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and there is nothing to report yet.
    tick.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let report = samples.take_report();
                if report.is_empty() {
                    continue;
                }
                tracing::debug!(metrics = report.len(), "Queueing report");
                if !enqueue(&tx, report, batched, &cancel).await {
                    break;
                }
            }
        }
    }
    tracing::debug!("Report loop stopped");
}

/// Returns `false` once the agent is shutting down or the queue is gone.
async fn enqueue(
    tx: &mpsc::Sender<Job>,
    report: Vec<telemon_common::types::Metric>,
    batched: bool,
    cancel: &CancellationToken,
) -> bool {
    let jobs = if batched {
        vec![Job::Batch(report)]
    } else {
        report.into_iter().map(Job::Single).collect()
    };
    for job in jobs {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            sent = tx.send(job) => {
                if sent.is_err() {
                    return false;
                }
            }
        }
    }
    true
}
