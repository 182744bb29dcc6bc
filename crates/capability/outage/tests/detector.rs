use domain::HistorySample;
use ems_outage::{DetectorConfig, OutageEvent, detect};
use serde_json::json;

fn series(points: &[(i64, f64)]) -> Vec<HistorySample> {
    points
        .iter()
        .map(|(ts, voltage)| HistorySample {
            device: Some("E2641D44".to_string()),
            ..HistorySample::voltage_at(*ts, Some(*voltage))
        })
        .collect()
}

#[test]
fn low_voltage_run_becomes_one_outage() {
    let samples = series(&[
        (0, 220.0),
        (60_000, 220.0),
        (120_000, 10.0),
        (180_000, 8.0),
        (240_000, 220.0),
    ]);
    let events = detect(&samples, &DetectorConfig::default());

    assert_eq!(events.len(), 1);
    match &events[0] {
        OutageEvent::PowerOutage {
            span,
            min_voltage,
            max_voltage,
            data_points,
        } => {
            assert_eq!(span.start_ts, 120_000);
            assert_eq!(span.end_ts, 180_000);
            assert_eq!(span.duration_seconds, 60.0);
            assert_eq!(span.duration_formatted, "1m 0s");
            assert_eq!(*min_voltage, 8.0);
            assert_eq!(*max_voltage, 10.0);
            assert_eq!(*data_points, 2);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn long_gap_becomes_no_data() {
    let samples = series(&[(0, 220.0), (900_000, 220.0)]);
    let events = detect(&samples, &DetectorConfig::default());

    assert_eq!(events.len(), 1);
    match &events[0] {
        OutageEvent::NoData { span, gap_minutes } => {
            assert_eq!(span.start_ts, 0);
            assert_eq!(span.end_ts, 900_000);
            assert_eq!(*gap_minutes, 15.0);
            assert_eq!(span.duration_formatted, "15m 0s");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn empty_and_single_inputs_yield_nothing() {
    let config = DetectorConfig::default();
    assert!(detect(&[], &config).is_empty());
    assert!(detect(&series(&[(0, 220.0)]), &config).is_empty());
}

#[test]
fn single_low_sample_is_zero_length_outage() {
    let events = detect(&series(&[(0, 3.0)]), &DetectorConfig::default());
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].span().duration_formatted, "0s");
}

#[test]
fn unsorted_input_is_sorted_first() {
    let samples = series(&[(900_000, 220.0), (0, 220.0)]);
    let events = detect(&samples, &DetectorConfig::default());
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].span().start_ts, 0);
}

#[test]
fn gap_inside_low_voltage_run_splits_it() {
    let samples = series(&[(0, 10.0), (60_000, 12.0), (1_000_000, 11.0)]);
    let events = detect(&samples, &DetectorConfig::default());
    let outages: Vec<_> = events.iter().filter(|e| e.is_power_outage()).collect();
    assert_eq!(outages.len(), 2);
    assert_eq!(outages[0].span().end_ts, 60_000);
    assert_eq!(outages[1].span().start_ts, 1_000_000);
}

#[test]
fn missing_voltage_ends_run_but_counts_for_gaps() {
    let mut samples = series(&[(0, 10.0), (60_000, 10.0)]);
    samples.insert(1, HistorySample::voltage_at(30_000, None));
    samples.push(HistorySample::voltage_at(2_000_000, None));
    samples.push(HistorySample::voltage_at(2_060_000, Some(220.0)));

    let events = detect(&samples, &DetectorConfig::default());
    let kinds: Vec<bool> = events.iter().map(OutageEvent::is_power_outage).collect();
    assert_eq!(kinds, vec![true, true]);
    assert_eq!(events[0].span().end_ts, 0);
    assert_eq!(events[1].span().start_ts, 60_000);
    assert_eq!(events[1].span().device, "E2641D44");
}

#[test]
fn no_data_gap_after_missing_voltage_uses_unknown_device() {
    let samples = vec![
        HistorySample::voltage_at(0, None),
        HistorySample::voltage_at(700_000, Some(220.0)),
    ];
    let events = detect(&samples, &DetectorConfig::default());
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].span().device, "UNKNOWN");
}

#[test]
fn events_serialize_with_type_tag() {
    let samples = series(&[(0, 220.0), (900_000, 220.0)]);
    let events = detect(&samples, &DetectorConfig::default());
    let value = serde_json::to_value(&events[0]).expect("json");
    assert_eq!(value["type"], json!("no_data"));
    assert_eq!(value["start"], json!("1970-01-01T00:00:00+00:00"));
    assert_eq!(value["end_ts"], json!(900_000));
    assert_eq!(value["gap_minutes"], json!(15.0));
    assert_eq!(value["device"], json!("E2641D44"));

    let outage = detect(&series(&[(0, 5.0)]), &DetectorConfig::default());
    let value = serde_json::to_value(&outage[0]).expect("json");
    assert_eq!(value["type"], json!("power_outage"));
    assert_eq!(value["data_points"], json!(1));
}

#[test]
fn extreme_timestamps_saturate_instead_of_overflowing() {
    let normal = series(&[(i64::MIN, 220.0), (i64::MAX, 220.0)]);
    let events = detect(&normal, &DetectorConfig::default());
    assert_eq!(events.len(), 1);
    match &events[0] {
        OutageEvent::NoData { span, .. } => {
            assert_eq!(span.start_ts, i64::MIN);
            assert_eq!(span.end_ts, i64::MAX);
            assert_eq!(span.duration_seconds, i64::MAX as f64 / 1000.0);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let low = series(&[(i64::MIN, 5.0), (i64::MAX, 5.0)]);
    let events = detect(&low, &DetectorConfig::default());
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|event| matches!(
        event,
        OutageEvent::PowerOutage { data_points: 1, .. }
    )));
}
