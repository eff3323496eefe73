use crate::Collector;
use sysinfo::System;
use telemon_common::types::Metric;

pub struct MemoryCollector {
    system: System,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        "memory"
    }

    fn collect(&mut self) -> Vec<Metric> {
        self.system.refresh_memory();

        vec![
            Metric::gauge("TotalMemory", self.system.total_memory() as f64),
            Metric::gauge("FreeMemory", self.system.free_memory() as f64),
            Metric::gauge("AvailableMemory", self.system.available_memory() as f64),
            Metric::gauge("UsedMemory", self.system.used_memory() as f64),
            // Swap
            Metric::gauge("TotalSwap", self.system.total_swap() as f64),
            Metric::gauge("UsedSwap", self.system.used_swap() as f64),
        ]
    }
}
