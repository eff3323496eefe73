use crate::Collector;
use rand::Rng;
use telemon_common::types::Metric;

/// Emits `RandomValue`, uniform in `[0, 1)`, so the collector side can see
/// fresh values arrive on every report.
#[derive(Default)]
pub struct RandomCollector;

impl RandomCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Collector for RandomCollector {
    fn name(&self) -> &str {
        "random"
    }

    fn collect(&mut self) -> Vec<Metric> {
        vec![Metric::gauge("RandomValue", rand::thread_rng().gen::<f64>())]
    }
}
