use domain::{CanonicalMetric, HistorySample};
use ems_storage::{HistorySource, InMemoryHistoryStore, StorageError, TelemetryWriter, TimeRange};

fn sample(device: &str, ts_ms: i64, voltage: f64) -> HistorySample {
    HistorySample {
        device: Some(device.to_string()),
        ..HistorySample::voltage_at(ts_ms, Some(voltage))
    }
}

#[tokio::test]
async fn fetch_series_filters_by_device_and_range() {
    let store = InMemoryHistoryStore::with_samples(vec![
        sample("dev-1", 3000, 220.0),
        sample("dev-1", 1000, 221.0),
        sample("dev-2", 2000, 5.0),
        sample("dev-1", 9000, 219.0),
    ]);

    let series = store
        .fetch_series(Some("dev-1"), TimeRange::new(0, 5000))
        .await
        .expect("series");
    let ts: Vec<i64> = series.iter().map(|item| item.ts_ms).collect();
    assert_eq!(ts, vec![1000, 3000]);

    let all = store
        .fetch_series(None, TimeRange::new(0, 10_000))
        .await
        .expect("series");
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn range_bounds_are_inclusive() {
    let store = InMemoryHistoryStore::with_samples(vec![
        sample("dev-1", 1000, 220.0),
        sample("dev-1", 2000, 220.0),
    ]);
    let series = store
        .fetch_series(Some("dev-1"), TimeRange::new(1000, 2000))
        .await
        .expect("series");
    assert_eq!(series.len(), 2);
}

#[tokio::test]
async fn unknown_device_is_not_found() {
    let store = InMemoryHistoryStore::new();
    let err = store
        .fetch_series(Some("ghost"), TimeRange::new(0, 1))
        .await
        .expect_err("not found");
    assert!(matches!(err, StorageError::DeviceNotFound(device) if device == "ghost"));

    store.register_device("ghost");
    let series = store
        .fetch_series(Some("ghost"), TimeRange::new(0, 1))
        .await
        .expect("series");
    assert!(series.is_empty());
}

#[tokio::test]
async fn written_readings_become_history() {
    let store = InMemoryHistoryStore::new();
    let readings = vec![
        CanonicalMetric {
            voltage: Some(229.0),
            device: Some("dev-9".to_string()),
            ts_ms: Some(5000),
            ..CanonicalMetric::default()
        },
        CanonicalMetric {
            voltage: Some(1.0),
            ..CanonicalMetric::default()
        },
    ];
    let written = store.write_readings(&readings).await.expect("write");
    assert_eq!(written, 1);
    assert_eq!(store.len(), 1);

    let series = store
        .fetch_series(Some("dev-9"), TimeRange::new(0, 10_000))
        .await
        .expect("series");
    assert_eq!(series[0].voltage, Some(229.0));
}
