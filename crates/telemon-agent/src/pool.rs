use crate::sender::{DeliveryClient, Job};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Shared consumer end of the delivery queue.
pub type JobQueue = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Fixed-size set of delivery workers draining one bounded queue.
///
/// Workers share nothing but the queue. When every sender half is dropped
/// they finish the jobs still queued and exit.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(workers: usize, receiver: mpsc::Receiver<Job>, client: Arc<DeliveryClient>) -> Self {
        let queue: JobQueue = Arc::new(Mutex::new(receiver));
        let handles = (0..workers)
            .map(|worker| tokio::spawn(run_worker(worker, queue.clone(), client.clone())))
            .collect();
        tracing::info!(workers, "Delivery workers started");
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Delivery worker panicked");
            }
        }
    }
}

async fn run_worker(worker: usize, queue: JobQueue, client: Arc<DeliveryClient>) {
    loop {
        // The lock is released as soon as a job (or closure) is observed.
        let job = queue.lock().await.recv().await;
        let Some(job) = job else { break };

        match client.deliver(&job).await {
            Ok(()) => tracing::debug!(worker, metrics = job.len(), "Delivered"),
            Err(e) => log_failure(worker, &job, &e),
        }
    }
    tracing::debug!(worker, "Delivery worker stopped");
}

fn log_failure(worker: usize, job: &Job, error: &crate::sender::SendError) {
    match job {
        Job::Single(metric) => tracing::warn!(
            worker,
            id = %metric.id,
            kind = %metric.kind(),
            error = %error,
            "Dropping metric after failed delivery"
        ),
        Job::Batch(metrics) => tracing::warn!(
            worker,
            metrics = metrics.len(),
            error = %error,
            "Dropping batch after failed delivery"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::{SendError, Transport};
    use async_trait::async_trait;
    use telemon_common::types::Metric;

    #[derive(Default)]
    struct CollectingTransport {
        seen: std::sync::Mutex<Vec<Job>>,
    }

    #[async_trait]
    impl Transport for CollectingTransport {
        fn name(&self) -> &'static str {
            "collecting"
        }

        async fn send(&self, job: &Job) -> Result<(), SendError> {
            self.seen.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn workers_drain_queue_after_close() {
        let transport = Arc::new(CollectingTransport::default());
        let client = Arc::new(DeliveryClient::new(transport.clone()));
        let (tx, rx) = mpsc::channel(16);
        let pool = WorkerPool::spawn(3, rx, client);
        assert_eq!(pool.len(), 3);

        for i in 0..10 {
            tx.send(Job::Single(Metric::counter("PollCount", i))).await.unwrap();
        }
        drop(tx);
        pool.join().await;

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 10);
        let total: i64 = seen
            .iter()
            .map(|job| match job {
                Job::Single(m) => match m.value {
                    telemon_common::types::MetricValue::Counter(d) => d,
                    _ => 0,
                },
                Job::Batch(_) => 0,
            })
            .sum();
        assert_eq!(total, (0..10).sum::<i64>());
    }
}
