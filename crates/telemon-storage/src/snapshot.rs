//! File snapshots of the in-process backend.
//!
//! The file is a JSON array of wire metrics, e.g.
//! `[{"id":"Alloc","type":"gauge","value":7.2},{"id":"PollCount","type":"counter","delta":3}]`.
//! Writes go to `<path>.tmp` first and are renamed over the target, so a
//! crash mid-save leaves the previous snapshot intact.

use crate::{MetricMap, Result, Storage, StorageError};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use telemon_common::types::{Metric, MetricKind};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::SnapshotIo {
        path: path.to_path_buf(),
        source,
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let tmp = tmp_path(path);
    let mut file = std::fs::File::create(&tmp).map_err(io_err(&tmp))?;
    file.write_all(bytes).map_err(io_err(&tmp))?;
    file.sync_all().map_err(io_err(&tmp))?;
    drop(file);
    std::fs::rename(&tmp, path).map_err(io_err(path))?;
    Ok(())
}

/// Writes every series to `path`. Returns the number of records written.
pub async fn save(path: &Path, storage: &dyn Storage) -> Result<usize> {
    let records: Vec<Metric> = storage
        .get_all()
        .await?
        .into_iter()
        .map(|(key, value)| Metric::new(key.id, value))
        .collect();
    let bytes = serde_json::to_vec(&records)?;

    let path_buf = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&path_buf, &bytes))
        .await
        .map_err(|e| StorageError::SnapshotIo {
            path: path.to_path_buf(),
            source: std::io::Error::other(e),
        })??;

    tracing::debug!(path = %path.display(), records = records.len(), "Snapshot saved");
    Ok(records.len())
}

/// Applies every record in `path` to `storage`. A missing file restores
/// nothing; an unreadable or malformed one is an error.
pub async fn load(path: &Path, storage: &dyn Storage) -> Result<usize> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No snapshot to restore");
            return Ok(0);
        }
        Err(e) => return Err(io_err(path)(e)),
    };
    let records: Vec<Metric> = serde_json::from_slice(&bytes)?;
    storage.update_batch(&records).await?;
    tracing::info!(path = %path.display(), records = records.len(), "Snapshot restored");
    Ok(records.len())
}

/// Periodic saver for the in-process backend.
pub struct SnapshotTask {
    storage: Arc<dyn Storage>,
    path: PathBuf,
    interval: Duration,
}

impl SnapshotTask {
    /// A zero `interval` disables the periodic saves; the final save on
    /// cancellation still happens. Pair it with [`SyncSaveStorage`] so a
    /// crash cannot lose accepted updates.
    pub fn new(storage: Arc<dyn Storage>, path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            storage,
            path: path.into(),
            interval,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        if !self.interval.is_zero() {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.save_logged().await,
                }
            }
        } else {
            cancel.cancelled().await;
        }
        self.save_logged().await;
        tracing::info!(path = %self.path.display(), "Snapshot task stopped");
    }

    async fn save_logged(&self) {
        if let Err(e) = save(&self.path, self.storage.as_ref()).await {
            tracing::error!(path = %self.path.display(), error = %e, "Snapshot save failed");
        }
    }
}

/// Saves `path` after every successful write, for `store_interval_secs = 0`.
///
/// A failed save is logged and the write still succeeds: the update is
/// already applied, and an error would make clients resend counter deltas.
pub struct SyncSaveStorage {
    inner: Arc<dyn Storage>,
    path: PathBuf,
    // Serializes saves so they never share `<path>.tmp`.
    save_lock: Mutex<()>,
}

impl SyncSaveStorage {
    pub fn new(inner: Arc<dyn Storage>, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
            save_lock: Mutex::new(()),
        }
    }

    async fn save_logged(&self) {
        let _guard = self.save_lock.lock().await;
        if let Err(e) = save(&self.path, self.inner.as_ref()).await {
            tracing::error!(path = %self.path.display(), error = %e, "Snapshot save failed");
        }
    }
}

#[async_trait]
impl Storage for SyncSaveStorage {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    async fn update(&self, metric: &Metric) -> Result<()> {
        self.inner.update(metric).await?;
        self.save_logged().await;
        Ok(())
    }

    async fn update_batch(&self, metrics: &[Metric]) -> Result<()> {
        self.inner.update_batch(metrics).await?;
        self.save_logged().await;
        Ok(())
    }

    async fn get(&self, kind: MetricKind, id: &str) -> Result<Metric> {
        self.inner.get(kind, id).await
    }

    async fn get_all(&self) -> Result<MetricMap> {
        self.inner.get_all().await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}
