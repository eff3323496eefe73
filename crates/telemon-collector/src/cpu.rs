use crate::Collector;
use sysinfo::System;
use telemon_common::types::Metric;

/// Global and per-core CPU usage in percent. Usage is computed between two
/// refreshes, so the first reading after construction may be zero.
pub struct CpuCollector {
    system: System,
}

impl CpuCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn collect(&mut self) -> Vec<Metric> {
        self.system.refresh_cpu_all();

        let mut points = vec![Metric::gauge(
            "CPUutilization",
            self.system.global_cpu_usage() as f64,
        )];
        for (i, cpu) in self.system.cpus().iter().enumerate() {
            points.push(Metric::gauge(
                format!("CPUutilization{}", i + 1),
                cpu.cpu_usage() as f64,
            ));
        }
        points
    }
}
