use async_trait::async_trait;
use domain::HistorySample;
use ems_outage::{DetectorConfig, OutageError, OutageQuery, OutageService};
use ems_storage::{HistorySource, InMemoryHistoryStore, StorageError, TimeRange};
use std::sync::Arc;

struct FailingSource;

#[async_trait]
impl HistorySource for FailingSource {
    async fn fetch_series(
        &self,
        _device: Option<&str>,
        _range: TimeRange,
    ) -> Result<Vec<HistorySample>, StorageError> {
        Err(StorageError::new("connection refused"))
    }
}

fn query(device: &str) -> OutageQuery {
    OutageQuery {
        device: device.to_string(),
        start_ms: 0,
        end_ms: 10_000_000,
        min_voltage: None,
        max_gap_minutes: None,
    }
}

fn store() -> Arc<InMemoryHistoryStore> {
    let samples = [(0, 220.0), (60_000, 30.0), (120_000, 220.0), (900_000, 220.0)]
        .iter()
        .map(|(ts, voltage)| HistorySample {
            device: Some("dev-1".to_string()),
            ..HistorySample::voltage_at(*ts, Some(*voltage))
        })
        .collect();
    Arc::new(InMemoryHistoryStore::with_samples(samples))
}

#[tokio::test]
async fn service_detects_from_history() {
    let service = OutageService::new(store(), DetectorConfig::default());
    let events = service.detect(&query("dev-1")).await.expect("events");
    assert_eq!(events.len(), 2);
    assert!(events[0].is_power_outage());
    assert!(!events[1].is_power_outage());
}

#[tokio::test]
async fn per_query_thresholds_override_defaults() {
    let service = OutageService::new(store(), DetectorConfig::default());
    let mut request = query("dev-1");
    request.min_voltage = Some(20.0);
    request.max_gap_minutes = Some(30);
    let events = service.detect(&request).await.expect("events");
    assert!(events.is_empty());
}

#[tokio::test]
async fn unknown_device_is_distinct_error() {
    let service = OutageService::new(store(), DetectorConfig::default());
    let err = service.detect(&query("ghost")).await.expect_err("missing");
    assert!(matches!(err, OutageError::DeviceNotFound(device) if device == "ghost"));
}

#[tokio::test]
async fn source_failure_is_surfaced() {
    let service = OutageService::new(Arc::new(FailingSource), DetectorConfig::default());
    let err = service.detect(&query("dev-1")).await.expect_err("source");
    assert!(matches!(err, OutageError::Source(_)));
}

#[tokio::test]
async fn inverted_range_is_rejected() {
    let service = OutageService::new(store(), DetectorConfig::default());
    let mut request = query("dev-1");
    request.start_ms = 10;
    request.end_ms = 5;
    let err = service.detect(&request).await.expect_err("invalid");
    assert!(matches!(err, OutageError::InvalidQuery(_)));
}
