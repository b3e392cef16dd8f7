//! Tests for the per-partition stages: reading, OFI aggregation, labels and
//! the quality gate, run against tick files written to a temporary store.
//!
//! These tests verify:
//! 1. Both storage layouts read to the same tick sequence
//! 2. Aggregation does not depend on how ticks are chunked
//! 3. Bucket OFI equals the sum of per-tick increments
//! 4. Labels line up with the aggregator's close mid series
//! 5. Session windows reset the predecessor tick
//!
//! Run with: cargo test --test aggregation_tests

use chrono::{Duration, NaiveDate, NaiveDateTime};
use ofi_signal::config::{DataConfig, DateRangeConfig, PipelineConfig};
use ofi_signal::features::{
    floor_to_bucket, tick_increments, AggregationConfig, OfiAggregator, OfiMethod, SessionWindow,
};
use ofi_signal::labeling::{LabelBuilder, LabelConfig, ReturnKind};
use ofi_signal::pipeline::{process_partition, PartitionOutcome};
use ofi_signal::quality::{QualityConfig, QualityFlag};
use ofi_signal::reader::TickReader;
use ofi_signal::schema::{BookLevel, PartitionKey, TickSnapshot};
use ofi_signal::PipelineError;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

// ============================================================================
// Test Fixtures
// ============================================================================

fn trade_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    trade_date().and_hms_opt(h, m, s).unwrap()
}

/// Two-level ticks every 7 seconds from 09:30 with a drifting mid.
fn create_ticks(count: usize) -> Vec<TickSnapshot> {
    let start = at(9, 30, 0);
    (0..count)
        .map(|i| {
            let mid = 20.0 + ((i * 5) % 23) as f64 * 0.01;
            let levels = (0..2)
                .map(|l| {
                    let step = 0.005 + l as f64 * 0.01;
                    BookLevel::new(
                        mid + step,
                        (300 + (i * 13 + l * 7) % 97) as u64,
                        mid - step,
                        (250 + (i * 17 + l * 3) % 89) as u64,
                    )
                })
                .collect();
            TickSnapshot::new(start + Duration::seconds(7 * i as i64), levels)
        })
        .collect()
}

/// Render ticks as a vendor CSV with a 17-digit `time` column.
fn to_csv(ticks: &[TickSnapshot]) -> String {
    let mut csv = String::from("time,a1_p,a1_v,b1_p,b1_v,a2_p,a2_v,b2_p,b2_v\n");
    for t in ticks {
        write!(csv, "{}", t.timestamp.format("%Y%m%d%H%M%S%3f")).unwrap();
        for l in &t.levels {
            write!(
                csv,
                ",{:.3},{},{:.3},{}",
                l.ask_price.unwrap(),
                l.ask_volume.unwrap(),
                l.bid_price.unwrap(),
                l.bid_volume.unwrap()
            )
            .unwrap();
        }
        csv.push('\n');
    }
    csv
}

// ============================================================================
// Reader
// ============================================================================

#[test]
fn test_both_layouts_read_identically() {
    let dir = TempDir::new().unwrap();
    let ticks = create_ticks(50);
    let csv = to_csv(&ticks);

    // File-per-date for symbol A, directory-per-date for symbol B.
    fs::create_dir_all(dir.path().join("A")).unwrap();
    fs::write(dir.path().join("A").join("2024-03-01.csv"), &csv).unwrap();
    fs::create_dir_all(dir.path().join("B").join("2024-03-01")).unwrap();
    fs::write(dir.path().join("B").join("2024-03-01").join("part.csv"), &csv).unwrap();

    let reader = TickReader::new(dir.path(), 2);
    let a = reader.read(&PartitionKey::new("A", trade_date())).unwrap();
    let b = reader.read(&PartitionKey::new("B", trade_date())).unwrap();

    assert_eq!(a.len(), 50);
    assert_eq!(a, b);
    assert_eq!(a[0].timestamp, at(9, 30, 0));
    assert_eq!(a[1].timestamp, at(9, 30, 7));
    assert_eq!(reader.discover_dates("A").unwrap(), vec![trade_date()]);
    assert_eq!(reader.discover_dates("B").unwrap(), vec![trade_date()]);
}

#[test]
fn test_iso_ts_column_is_preferred() {
    let dir = TempDir::new().unwrap();
    let csv = "ts,time,a1_p,a1_v,b1_p,b1_v\n\
               2024-03-01T09:30:01.500,0,10.01,100,10.00,200\n\
               2024-03-01T09:30:00,0,10.02,110,10.01,190\n";
    fs::create_dir_all(dir.path().join("A")).unwrap();
    fs::write(dir.path().join("A").join("2024-03-01.csv"), csv).unwrap();

    let ticks = TickReader::new(dir.path(), 1)
        .read(&PartitionKey::new("A", trade_date()))
        .unwrap();

    // Rows come back sorted by timestamp.
    assert_eq!(ticks[0].timestamp, at(9, 30, 0));
    assert_eq!(
        ticks[1].timestamp,
        trade_date().and_hms_milli_opt(9, 30, 1, 500).unwrap()
    );
    assert_eq!(ticks[0].levels[0].ask_volume, Some(110));
}

#[test]
fn test_missing_level_column_is_schema_error() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("A")).unwrap();
    fs::write(
        dir.path().join("A").join("2024-03-01.csv"),
        "time,a1_p,a1_v,b1_p\n20240301093000000,10.01,100,10.00\n",
    )
    .unwrap();

    let err = TickReader::new(dir.path(), 1)
        .read(&PartitionKey::new("A", trade_date()))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Schema { .. }));
}

#[test]
fn test_ambiguous_date_directory_is_schema_error() {
    let dir = TempDir::new().unwrap();
    let date_dir = dir.path().join("A").join("2024-03-01");
    fs::create_dir_all(&date_dir).unwrap();
    let csv = to_csv(&create_ticks(3));
    fs::write(date_dir.join("x.csv"), &csv).unwrap();
    fs::write(date_dir.join("y.csv"), &csv).unwrap();

    let err = TickReader::new(dir.path(), 2)
        .locate(&PartitionKey::new("A", trade_date()))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Schema { .. }));
}

// ============================================================================
// Aggregation
// ============================================================================

#[test]
fn test_chunking_does_not_change_records() {
    let ticks = create_ticks(600);
    let reference = OfiAggregator::new(2, 60).aggregate(&ticks).unwrap();

    for chunk_size in [1, 7, 64, 599] {
        let mut agg = OfiAggregator::new(2, 60);
        for chunk in ticks.chunks(chunk_size) {
            agg.push_all(chunk).unwrap();
        }
        let records = agg.finish();
        assert_eq!(records.len(), reference.len(), "chunk size {chunk_size}");
        for (a, b) in records.iter().zip(&reference) {
            assert_eq!(a.bucket_start, b.bucket_start);
            assert_eq!(a.ofi_value, b.ofi_value);
            assert_eq!(a.n_ticks, b.n_ticks);
            assert_eq!(a.close_mid.to_bits(), b.close_mid.to_bits());
        }
    }
}

#[test]
fn test_bucket_sum_matches_tick_increments() {
    let ticks = create_ticks(300);
    for method in [OfiMethod::VolumeDelta, OfiMethod::PriceAware] {
        let config = AggregationConfig::default()
            .with_levels(2)
            .with_bucket_width_secs(60)
            .with_method(method);
        let records = OfiAggregator::from_config(&config).aggregate(&ticks).unwrap();
        let increments = tick_increments(&ticks, 2, method);

        for record in &records {
            let expected: i64 = ticks
                .iter()
                .zip(&increments)
                .filter(|(t, _)| floor_to_bucket(t.timestamp, 60) == record.bucket_start)
                .map(|(_, inc)| inc.unwrap_or(0))
                .sum();
            assert_eq!(record.ofi_value, expected, "{method:?} at {}", record.bucket_start);
        }

        let total: i64 = increments.iter().flatten().sum();
        assert_eq!(records.iter().map(|r| r.ofi_value).sum::<i64>(), total);
    }
}

#[test]
fn test_unordered_ticks_rejected() {
    let mut ticks = create_ticks(10);
    ticks.swap(3, 4);
    let err = OfiAggregator::new(2, 60).aggregate(&ticks).unwrap_err();
    assert!(matches!(err, PipelineError::UnorderedTicks { .. }));
}

#[test]
fn test_session_break_resets_predecessor() {
    let level = |bid_v: u64| vec![BookLevel::new(10.01, 100, 10.00, bid_v)];
    let ticks = vec![
        TickSnapshot::new(at(11, 29, 50), level(100)),
        TickSnapshot::new(at(11, 29, 55), level(150)),
        TickSnapshot::new(at(12, 0, 0), level(999)),
        TickSnapshot::new(at(13, 0, 5), level(400)),
        TickSnapshot::new(at(13, 0, 10), level(420)),
    ];
    let config = AggregationConfig::default()
        .with_levels(1)
        .with_sessions(SessionWindow::cn_equity());
    let mut agg = OfiAggregator::from_config(&config);
    agg.push_all(&ticks).unwrap();
    assert_eq!(agg.ticks_outside_session(), 1);
    let records = agg.finish();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].bucket_start, at(11, 29, 0));
    assert_eq!(records[0].ofi_value, 50);
    // First afternoon tick has no predecessor: only the 400 -> 420 change counts.
    assert_eq!(records[1].bucket_start, at(13, 0, 0));
    assert_eq!(records[1].ofi_value, 20);
    assert_eq!(records[1].n_ticks, 2);
}

// ============================================================================
// Labels
// ============================================================================

#[test]
fn test_labels_align_with_close_mid() {
    let ticks = create_ticks(900);
    let records = OfiAggregator::new(2, 60).aggregate(&ticks).unwrap();

    for horizon in [1usize, 3] {
        let labels = LabelBuilder::new(LabelConfig::default().with_horizon(horizon))
            .build(&records)
            .unwrap();
        assert_eq!(labels.len(), records.len() - horizon);
        for (b, label) in labels.iter().enumerate() {
            assert_eq!(label.bucket_start, records[b].bucket_start);
            let expected = records[b + horizon].close_mid / records[b].close_mid - 1.0;
            assert!((label.forward_return - expected).abs() < 1e-15);
        }
    }

    let log_labels = LabelBuilder::new(LabelConfig::default().with_return_kind(ReturnKind::Log))
        .build(&records)
        .unwrap();
    let expected = (records[1].close_mid / records[0].close_mid).ln();
    assert!((log_labels[0].forward_return - expected).abs() < 1e-15);
}

// ============================================================================
// Partition pipeline
// ============================================================================

fn pipeline_config(root: &Path, expected_buckets: usize) -> PipelineConfig {
    PipelineConfig::new(
        DataConfig::new(root, root.join("out")),
        DateRangeConfig::from_dates(vec!["2024-03-01".to_string()]),
    )
    .with_aggregation(AggregationConfig::default().with_levels(2))
    .with_quality(QualityConfig::default().with_expected_buckets(expected_buckets))
}

#[test]
fn test_partition_panel_joins_ofi_and_labels() {
    let dir = TempDir::new().unwrap();
    // 7-second ticks for 35 minutes.
    let ticks = create_ticks(300);
    fs::create_dir_all(dir.path().join("A")).unwrap();
    fs::write(dir.path().join("A").join("2024-03-01.csv"), to_csv(&ticks)).unwrap();

    let key = PartitionKey::new("A", trade_date());
    let outcome = process_partition(&pipeline_config(dir.path(), 35), &key);
    let PartitionOutcome::Succeeded(result) = outcome else {
        panic!("expected success");
    };

    assert_eq!(result.ofi.len(), 35);
    assert_eq!(result.panel.len(), 34);
    assert!((result.quality.minute_coverage - 1.0).abs() < 1e-12);
    for (row, (ofi, label)) in result
        .panel
        .rows
        .iter()
        .zip(result.ofi.iter().zip(&result.labels))
    {
        assert_eq!(row.bucket_start, ofi.bucket_start);
        assert_eq!(row.ofi_value, ofi.ofi_value);
        assert_eq!(row.forward_return, label.forward_return);
    }
}

#[test]
fn test_crossed_book_warns_without_excluding() {
    let dir = TempDir::new().unwrap();
    let mut ticks = create_ticks(300);
    // Cross the book on every tenth tick.
    for t in ticks.iter_mut().step_by(10) {
        let l1 = &mut t.levels[0];
        l1.bid_price = l1.ask_price.map(|a| a + 0.01);
    }
    fs::create_dir_all(dir.path().join("A")).unwrap();
    fs::write(dir.path().join("A").join("2024-03-01.csv"), to_csv(&ticks)).unwrap();

    let outcome = process_partition(
        &pipeline_config(dir.path(), 35),
        &PartitionKey::new("A", trade_date()),
    );
    let quality = outcome.quality().unwrap().clone();
    assert!(outcome.is_success());
    assert!((quality.crossed_book_rate - 0.1).abs() < 1e-12);
    assert!(quality.has_flag(QualityFlag::BookIntegrityWarning));
    assert!(!quality.is_excluded());
}

#[test]
fn test_sessions_bound_labels_and_quality() {
    let dir = TempDir::new().unwrap();
    let tick_at = |ts: NaiveDateTime, mid: f64| {
        TickSnapshot::new(
            ts,
            vec![
                BookLevel::new(mid + 0.01, 300, mid - 0.01, 250),
                BookLevel::new(mid + 0.02, 400, mid - 0.02, 350),
            ],
        )
    };
    // Crossed indicative book in the call auction, then one tick per minute.
    let mut auction = tick_at(at(9, 20, 0), 10.0);
    auction.levels[0].bid_price = Some(10.05);
    let mut ticks = vec![auction];
    ticks.extend((0..120).map(|m| tick_at(at(9, 30, 0) + Duration::minutes(m), 10.0)));
    ticks.extend((0..120).map(|m| tick_at(at(13, 0, 0) + Duration::minutes(m), 20.0)));
    fs::create_dir_all(dir.path().join("A")).unwrap();
    fs::write(dir.path().join("A").join("2024-03-01.csv"), to_csv(&ticks)).unwrap();

    let config = PipelineConfig::new(
        DataConfig::new(dir.path(), dir.path().join("out")),
        DateRangeConfig::from_dates(vec!["2024-03-01".to_string()]),
    )
    .with_aggregation(
        AggregationConfig::default()
            .with_levels(2)
            .with_sessions(SessionWindow::cn_equity()),
    );
    let outcome = process_partition(&config, &PartitionKey::new("A", trade_date()));
    let PartitionOutcome::Succeeded(result) = outcome else {
        panic!("expected success");
    };

    assert_eq!(result.ofi.len(), 240);
    // The last bucket of each session has no label.
    assert_eq!(result.labels.len(), 238);
    assert!(result.labels.iter().all(|l| l.bucket_start != at(11, 29, 0)));
    assert!(result.labels.iter().all(|l| l.forward_return.abs() < 1e-12));
    assert_eq!(result.panel.len(), 238);

    assert_eq!(result.quality.n_ticks, 240);
    assert_eq!(result.quality.expected_buckets, 240);
    assert_eq!(result.quality.crossed_book_rate, 0.0);
    assert!(result.quality.flags.is_empty());
}

#[test]
fn test_too_few_buckets_for_horizon_fails() {
    let dir = TempDir::new().unwrap();
    // Everything inside one minute.
    let ticks = create_ticks(8);
    fs::create_dir_all(dir.path().join("A")).unwrap();
    fs::write(dir.path().join("A").join("2024-03-01.csv"), to_csv(&ticks)).unwrap();

    let outcome = process_partition(
        &pipeline_config(dir.path(), 1),
        &PartitionKey::new("A", trade_date()),
    );

    let PartitionOutcome::Failed(failure) = outcome else {
        panic!("expected failure");
    };
    assert_eq!(failure.reason.kind(), "InsufficientBuckets");
    assert!(failure.quality.is_some());
}
