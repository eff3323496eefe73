//! Host sampling for the telemon agent.
//!
//! Each [`Collector`] reads one category of host gauges (memory, CPU, load,
//! a random control value). The [`Sampler`] runs all of them on every poll
//! tick, folds the readings into the shared [`SampleSet`] and counts the
//! tick in `PollCount`.

pub mod cpu;
pub mod load;
pub mod memory;
pub mod random;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use telemon_common::types::{Metric, MetricValue, POLL_COUNT};

/// A host metric collector run by the agent's sampling loop.
///
/// Collection reads in-memory counters only and never blocks on I/O, so
/// it has no failure mode.
pub trait Collector: Send + Sync {
    /// Returns the collector name (e.g., `"cpu"`), used for logging.
    fn name(&self) -> &str;

    /// Returns the current gauge readings.
    fn collect(&mut self) -> Vec<Metric>;
}

/// Latest gauge readings plus the number of samples taken since the last
/// report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSet {
    gauges: BTreeMap<String, f64>,
    poll_count: i64,
}

impl SampleSet {
    pub fn record(&mut self, readings: Vec<Metric>) {
        for m in readings {
            if let MetricValue::Gauge(v) = m.value {
                self.gauges.insert(m.id, v);
            }
        }
        self.poll_count += 1;
    }

    pub fn poll_count(&self) -> i64 {
        self.poll_count
    }

    pub fn gauge(&self, id: &str) -> Option<f64> {
        self.gauges.get(id).copied()
    }

    /// Copies out every gauge plus the `PollCount` delta accumulated since
    /// the previous report, and resets that delta to zero.
    pub fn take_report(&mut self) -> Vec<Metric> {
        let mut out: Vec<Metric> = self
            .gauges
            .iter()
            .map(|(id, v)| Metric::gauge(id.clone(), *v))
            .collect();
        if self.poll_count > 0 {
            out.push(Metric::counter(POLL_COUNT, self.poll_count));
            self.poll_count = 0;
        }
        out
    }
}

/// The sampling loop writes, the report loop reads; nothing else touches it.
#[derive(Debug, Clone, Default)]
pub struct SharedSamples(Arc<Mutex<SampleSet>>);

impl SharedSamples {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the sample set, recovering from a poisoned Mutex if necessary.
    pub fn lock(&self) -> MutexGuard<'_, SampleSet> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn take_report(&self) -> Vec<Metric> {
        self.lock().take_report()
    }
}

/// Runs a fixed set of collectors into a [`SharedSamples`].
pub struct Sampler {
    collectors: Vec<Box<dyn Collector>>,
    samples: SharedSamples,
}

impl Sampler {
    pub fn new(collectors: Vec<Box<dyn Collector>>, samples: SharedSamples) -> Self {
        Self {
            collectors,
            samples,
        }
    }

    /// The default host collectors: memory, CPU, load and `RandomValue`.
    pub fn with_default_collectors(samples: SharedSamples) -> Self {
        Self::new(
            vec![
                Box::new(memory::MemoryCollector::new()),
                Box::new(cpu::CpuCollector::new()),
                Box::new(load::LoadCollector::new()),
                Box::new(random::RandomCollector::new()),
            ],
            samples,
        )
    }

    pub fn samples(&self) -> &SharedSamples {
        &self.samples
    }

    /// Takes one sample from every collector and increments `PollCount`.
    pub fn sample(&mut self) {
        let mut readings = Vec::new();
        for collector in &mut self.collectors {
            let points = collector.collect();
            tracing::trace!(collector = collector.name(), count = points.len(), "Collected");
            readings.extend(points);
        }
        self.samples.lock().record(readings);
    }
}
