use crate::{ensure_id, MetricMap, Result, Storage, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use telemon_common::types::{Metric, MetricKey, MetricKind, MetricValue};

/// In-process backend: one map per kind, each behind its own lock. Reads
/// take the shared lock, writes the exclusive one; no lock is held across
/// an await point.
#[derive(Debug, Default)]
pub struct MemStorage {
    gauges: RwLock<HashMap<String, f64>>,
    counters: RwLock<HashMap<String, i64>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        read(&self.gauges).len() + read(&self.counters).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply(&self, metric: &Metric) -> Result<()> {
        ensure_id(metric)?;
        match metric.value {
            MetricValue::Gauge(v) => {
                write(&self.gauges).insert(metric.id.clone(), v);
            }
            MetricValue::Counter(delta) => {
                let mut counters = write(&self.counters);
                let total = counters.entry(metric.id.clone()).or_insert(0);
                *total = total
                    .checked_add(delta)
                    .ok_or_else(|| StorageError::CounterOverflow {
                        id: metric.id.clone(),
                    })?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemStorage {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn update(&self, metric: &Metric) -> Result<()> {
        self.apply(metric)
    }

    async fn get(&self, kind: MetricKind, id: &str) -> Result<Metric> {
        let value = match kind {
            MetricKind::Gauge => read(&self.gauges).get(id).copied().map(MetricValue::Gauge),
            MetricKind::Counter => read(&self.counters).get(id).copied().map(MetricValue::Counter),
        };
        value
            .map(|v| Metric::new(id, v))
            .ok_or_else(|| StorageError::NotFound {
                kind,
                id: id.to_string(),
            })
    }

    async fn get_all(&self) -> Result<MetricMap> {
        let mut all = MetricMap::new();
        for (id, v) in read(&self.gauges).iter() {
            all.insert(MetricKey::new(MetricKind::Gauge, id.clone()), MetricValue::Gauge(*v));
        }
        for (id, d) in read(&self.counters).iter() {
            all.insert(
                MetricKey::new(MetricKind::Counter, id.clone()),
                MetricValue::Counter(*d),
            );
        }
        Ok(all)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn len_counts_both_series() {
        let storage = MemStorage::new();
        assert!(storage.is_empty());
        storage.update(&Metric::gauge("x", 1.0)).await.unwrap();
        storage.update(&Metric::counter("x", 1)).await.unwrap();
        assert_eq!(storage.len(), 2);
    }
}
