//! Current-value storage for gauges and counters.
//!
//! [`Storage`] is the only way to touch the series. Two backends implement
//! it with identical semantics:
//!
//! - [`memory::MemStorage`]: two maps, each behind its own read/write lock.
//! - [`db::DbStorage`]: `gauges` / `counters` tables via SeaORM (SQLite or
//!   PostgreSQL), relying on the database for row-level locking.
//!
//! [`snapshot`] persists the in-process backend to a file and restores it.

pub mod db;
pub mod entities;
pub mod error;
pub mod memory;
pub mod snapshot;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::collections::BTreeMap;
use telemon_common::types::{Metric, MetricKey, MetricKind, MetricValue};

pub use error::{Result, StorageError};

/// Every stored series, keyed by kind and id. A gauge and a counter that
/// share an id are two distinct entries.
pub type MetricMap = BTreeMap<MetricKey, MetricValue>;

/// Kind-aware metric store.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because the HTTP handlers, the gRPC service and the snapshot task all
/// hold the same instance.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Applies one metric: counters add the delta (starting from zero when
    /// absent), gauges replace the value.
    async fn update(&self, metric: &Metric) -> Result<()>;

    /// Applies metrics in order, stopping at the first failure. Duplicate
    /// ids each apply.
    async fn update_batch(&self, metrics: &[Metric]) -> Result<()> {
        for metric in metrics {
            self.update(metric).await?;
        }
        Ok(())
    }

    /// Returns the current value, or [`StorageError::NotFound`].
    async fn get(&self, kind: MetricKind, id: &str) -> Result<Metric>;

    /// Snapshot of every series.
    async fn get_all(&self) -> Result<MetricMap>;

    /// Verifies the backend is reachable.
    async fn ping(&self) -> Result<()>;
}

pub(crate) fn ensure_id(metric: &Metric) -> Result<()> {
    if metric.id.is_empty() {
        return Err(telemon_common::types::MetricError::EmptyId.into());
    }
    Ok(())
}
