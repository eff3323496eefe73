use crate::db::DbStorage;
use crate::memory::MemStorage;
use crate::{snapshot, Storage, StorageError};
use std::sync::Arc;
use telemon_common::retry::{RetryPolicy, TokioSleeper};
use telemon_common::types::{Metric, MetricKey, MetricKind, MetricValue, POLL_COUNT};
use tempfile::TempDir;

async fn db_storage() -> (TempDir, DbStorage) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("metrics.db").display());
    let storage = DbStorage::connect_with(&url, RetryPolicy::none(), Arc::new(TokioSleeper))
        .await
        .unwrap();
    (dir, storage)
}

async fn counters_sum(storage: &dyn Storage) {
    for delta in [1, 2, 3] {
        storage.update(&Metric::counter("Requests", delta)).await.unwrap();
    }
    let m = storage.get(MetricKind::Counter, "Requests").await.unwrap();
    assert_eq!(m.value, MetricValue::Counter(6));
}

async fn gauge_last_write_wins(storage: &dyn Storage) {
    storage.update(&Metric::gauge("Alloc", 5.0)).await.unwrap();
    storage.update(&Metric::gauge("Alloc", 7.2)).await.unwrap();
    let m = storage.get(MetricKind::Gauge, "Alloc").await.unwrap();
    assert_eq!(m.value, MetricValue::Gauge(7.2));
}

async fn missing_series_is_not_found(storage: &dyn Storage) {
    let err = storage.get(MetricKind::Gauge, "Nope").await.unwrap_err();
    assert!(err.is_not_found());

    // Same id under the other kind is still absent.
    storage.update(&Metric::counter("Only", 1)).await.unwrap();
    assert!(storage
        .get(MetricKind::Gauge, "Only")
        .await
        .unwrap_err()
        .is_not_found());
}

async fn get_all_keeps_both_kinds_for_one_id(storage: &dyn Storage) {
    storage.update(&Metric::gauge("Shared", 0.5)).await.unwrap();
    storage.update(&Metric::counter("Shared", 4)).await.unwrap();
    storage.update(&Metric::gauge("Other", -1.25)).await.unwrap();

    let all = storage.get_all().await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(
        all[&MetricKey::new(MetricKind::Gauge, "Shared")],
        MetricValue::Gauge(0.5)
    );
    assert_eq!(
        all[&MetricKey::new(MetricKind::Counter, "Shared")],
        MetricValue::Counter(4)
    );
}

async fn batch_applies_duplicates_in_order(storage: &dyn Storage) {
    let batch = vec![
        Metric::gauge("Alloc", 1.0),
        Metric::counter(POLL_COUNT, 2),
        Metric::gauge("Alloc", 2.0),
        Metric::counter(POLL_COUNT, 5),
    ];
    storage.update_batch(&batch).await.unwrap();
    assert_eq!(
        storage.get(MetricKind::Gauge, "Alloc").await.unwrap().value,
        MetricValue::Gauge(2.0)
    );
    assert_eq!(
        storage.get(MetricKind::Counter, POLL_COUNT).await.unwrap().value,
        MetricValue::Counter(7)
    );
}

async fn empty_id_is_rejected(storage: &dyn Storage) {
    let err = storage.update(&Metric::gauge("", 1.0)).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidMetric(_)));
    assert!(storage.get_all().await.unwrap().is_empty());
}

async fn counter_overflow_is_an_error_and_keeps_total(storage: &dyn Storage) {
    storage.update(&Metric::counter("Up", i64::MAX)).await.unwrap();
    let err = storage.update(&Metric::counter("Up", 1)).await.unwrap_err();
    assert!(matches!(err, StorageError::CounterOverflow { .. }));

    storage.update(&Metric::counter("Down", i64::MIN)).await.unwrap();
    let err = storage.update(&Metric::counter("Down", -1)).await.unwrap_err();
    assert!(matches!(err, StorageError::CounterOverflow { .. }));

    // Totals are unchanged and still readable, and the series keeps working.
    assert_eq!(
        storage.get(MetricKind::Counter, "Up").await.unwrap().value,
        MetricValue::Counter(i64::MAX)
    );
    storage.update(&Metric::counter("Up", -2)).await.unwrap();
    assert_eq!(
        storage.get(MetricKind::Counter, "Up").await.unwrap().value,
        MetricValue::Counter(i64::MAX - 2)
    );
    assert_eq!(
        storage.get(MetricKind::Counter, "Down").await.unwrap().value,
        MetricValue::Counter(i64::MIN)
    );
    assert_eq!(storage.get_all().await.unwrap().len(), 2);
}

async fn concurrent_poll_counts(storage: Arc<dyn Storage>) {
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let storage = storage.clone();
            tokio::spawn(async move { storage.update(&Metric::counter(POLL_COUNT, 1)).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(
        storage.get(MetricKind::Counter, POLL_COUNT).await.unwrap().value,
        MetricValue::Counter(3)
    );
}

#[tokio::test]
async fn memory_counters_sum() {
    counters_sum(&MemStorage::new()).await;
}

#[tokio::test]
async fn memory_gauge_last_write_wins() {
    gauge_last_write_wins(&MemStorage::new()).await;
}

#[tokio::test]
async fn memory_missing_series_is_not_found() {
    missing_series_is_not_found(&MemStorage::new()).await;
}

#[tokio::test]
async fn memory_get_all_keeps_both_kinds() {
    get_all_keeps_both_kinds_for_one_id(&MemStorage::new()).await;
}

#[tokio::test]
async fn memory_batch_applies_in_order() {
    batch_applies_duplicates_in_order(&MemStorage::new()).await;
}

#[tokio::test]
async fn memory_rejects_empty_id() {
    empty_id_is_rejected(&MemStorage::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn memory_concurrent_poll_counts() {
    concurrent_poll_counts(Arc::new(MemStorage::new())).await;
}

#[tokio::test]
async fn db_counters_sum() {
    let (_dir, storage) = db_storage().await;
    counters_sum(&storage).await;
}

#[tokio::test]
async fn db_gauge_last_write_wins() {
    let (_dir, storage) = db_storage().await;
    gauge_last_write_wins(&storage).await;
}

#[tokio::test]
async fn db_missing_series_is_not_found() {
    let (_dir, storage) = db_storage().await;
    missing_series_is_not_found(&storage).await;
}

#[tokio::test]
async fn db_get_all_keeps_both_kinds() {
    let (_dir, storage) = db_storage().await;
    get_all_keeps_both_kinds_for_one_id(&storage).await;
}

#[tokio::test]
async fn db_batch_applies_in_order() {
    let (_dir, storage) = db_storage().await;
    batch_applies_duplicates_in_order(&storage).await;
}

#[tokio::test]
async fn db_rejects_empty_id() {
    let (_dir, storage) = db_storage().await;
    empty_id_is_rejected(&storage).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn db_concurrent_poll_counts() {
    let (_dir, storage) = db_storage().await;
    concurrent_poll_counts(Arc::new(storage)).await;
}

#[tokio::test]
async fn memory_counter_overflow_keeps_total() {
    counter_overflow_is_an_error_and_keeps_total(&MemStorage::new()).await;
}

#[tokio::test]
async fn db_counter_overflow_keeps_total() {
    let (_dir, storage) = db_storage().await;
    counter_overflow_is_an_error_and_keeps_total(&storage).await;
}

#[tokio::test]
async fn db_batch_with_overflow_applies_nothing() {
    let (_dir, storage) = db_storage().await;
    storage.update(&Metric::counter("Big", i64::MAX)).await.unwrap();

    let batch = vec![Metric::gauge("Alloc", 1.0), Metric::counter("Big", 1)];
    let err = storage.update_batch(&batch).await.unwrap_err();
    assert!(matches!(err, StorageError::CounterOverflow { ref id } if id == "Big"));
    assert!(storage
        .get(MetricKind::Gauge, "Alloc")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn db_batch_with_empty_id_applies_nothing() {
    let (_dir, storage) = db_storage().await;
    let batch = vec![Metric::gauge("Alloc", 1.0), Metric::counter("", 1)];
    assert!(storage.update_batch(&batch).await.is_err());
    assert!(storage.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn db_survives_reconnect() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("metrics.db").display());

    let first = DbStorage::connect(&url).await.unwrap();
    first.update(&Metric::counter(POLL_COUNT, 2)).await.unwrap();
    drop(first);

    let second = DbStorage::connect(&url).await.unwrap();
    second.update(&Metric::counter(POLL_COUNT, 3)).await.unwrap();
    assert_eq!(
        second.get(MetricKind::Counter, POLL_COUNT).await.unwrap().value,
        MetricValue::Counter(5)
    );
}

#[tokio::test]
async fn snapshot_round_trip_preserves_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.json");

    let original = MemStorage::new();
    let metrics = [
        Metric::gauge("Alloc", 7.2),
        Metric::gauge("RandomValue", 0.123_456_789_012_345_67),
        Metric::gauge("Tiny", f64::MIN_POSITIVE),
        Metric::counter(POLL_COUNT, 42),
        Metric::counter("Alloc", -3),
    ];
    original.update_batch(&metrics).await.unwrap();

    assert_eq!(snapshot::save(&path, &original).await.unwrap(), 5);

    let restored = MemStorage::new();
    assert_eq!(snapshot::load(&path, &restored).await.unwrap(), 5);
    assert_eq!(
        original.get_all().await.unwrap(),
        restored.get_all().await.unwrap()
    );
}

#[tokio::test]
async fn snapshot_overwrites_previous_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.json");
    let storage = MemStorage::new();

    storage.update(&Metric::gauge("A", 1.0)).await.unwrap();
    snapshot::save(&path, &storage).await.unwrap();
    storage.update(&Metric::gauge("B", 2.0)).await.unwrap();
    snapshot::save(&path, &storage).await.unwrap();

    let restored = MemStorage::new();
    assert_eq!(snapshot::load(&path, &restored).await.unwrap(), 2);
}
