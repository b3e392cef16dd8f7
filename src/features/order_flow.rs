//! Order Flow Imbalance aggregation.
//!
//! Implements the multi-level OFI increment and its aggregation into fixed
//! time buckets.
//!
//! # Increment
//!
//! For consecutive ticks `(k-1, k)` and each level `i` in `1..=L`:
//!
//! ```text
//! delta_i = (bid_v_i[k] - bid_v_i[k-1]) - (ask_v_i[k] - ask_v_i[k-1])
//! ofi[k]  = Σ_i delta_i
//! ```
//!
//! A level with any missing field in either tick contributes 0 for that tick.
//! The price-aware variant ([`OfiMethod::PriceAware`]) follows Cont et al.
//! (2014) per level instead.
//!
//! # Bucketing
//!
//! - A bucket's `ofi_value` is the sum of increments of the ticks inside it.
//! - The first tick of a bucket uses the last tick of the previous bucket as its
//!   predecessor. Flow is never reset at a bucket edge.
//! - The first tick of the partition (and of each configured session window)
//!   has no predecessor and contributes only to `close_mid`.
//! - Buckets without ticks are omitted, not zero-filled.
//! - Each record carries its session index so later stages never pair buckets
//!   across a session break.
//! - Sums are integer and taken in timestamp order, so results are identical
//!   however the input is chunked.

use super::{floor_to_bucket, AggregationConfig, OfiMethod};
use crate::error::{PipelineError, Result};
use crate::schema::{BookLevel, TickSnapshot};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Aggregated order flow for one time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfiRecord {
    /// Bucket start (tick timestamp floored to the bucket width).
    pub bucket_start: NaiveDateTime,

    /// Sum of tick-level OFI increments in the bucket.
    pub ofi_value: i64,

    /// Mid price of the last tick in the bucket with a valid level-1 quote.
    /// NaN when no tick in the bucket had one.
    pub close_mid: f64,

    /// Ticks that fell in the bucket.
    pub n_ticks: usize,

    /// Session window of the bucket's first tick (0 without sessions).
    #[serde(default)]
    pub session: usize,
}

/// OFI increment between two consecutive ticks over the first `levels` levels.
pub fn tick_increment(
    prev: &TickSnapshot,
    curr: &TickSnapshot,
    levels: usize,
    method: OfiMethod,
) -> i64 {
    (0..levels)
        .filter_map(|i| match (prev.levels.get(i), curr.levels.get(i)) {
            (Some(p), Some(c)) => level_increment(p, c, method),
            _ => None,
        })
        .sum()
}

/// Per-tick increments for an ordered sequence.
///
/// `None` marks ticks without a predecessor (the first tick). Session windows
/// are not applied here; this is the plain definition used as a reference.
pub fn tick_increments(ticks: &[TickSnapshot], levels: usize, method: OfiMethod) -> Vec<Option<i64>> {
    let mut out = Vec::with_capacity(ticks.len());
    for (k, tick) in ticks.iter().enumerate() {
        out.push(k.checked_sub(1).map(|j| tick_increment(&ticks[j], tick, levels, method)));
    }
    out
}

/// Signed flow for one level, `None` when a field is missing in either tick.
#[inline]
fn level_increment(prev: &BookLevel, curr: &BookLevel, method: OfiMethod) -> Option<i64> {
    if !prev.is_complete() || !curr.is_complete() {
        return None;
    }
    let (pb, cb) = (prev.bid_volume? as i64, curr.bid_volume? as i64);
    let (pa, ca) = (prev.ask_volume? as i64, curr.ask_volume? as i64);

    match method {
        OfiMethod::VolumeDelta => Some((cb - pb) - (ca - pa)),
        OfiMethod::PriceAware => {
            let (pbp, cbp) = (prev.bid_price?, curr.bid_price?);
            let (pap, cap) = (prev.ask_price?, curr.ask_price?);

            let bid = if cbp > pbp {
                cb
            } else if cbp < pbp {
                -pb
            } else {
                cb - pb
            };

            let ask = if cap < pap {
                -ca
            } else if cap > pap {
                pa
            } else {
                -(ca - pa)
            };

            Some(bid + ask)
        }
    }
}

/// Running state of the bucket being filled.
#[derive(Debug, Clone)]
struct BucketAccumulator {
    bucket_start: NaiveDateTime,
    session: usize,
    ofi_value: i64,
    close_mid: f64,
    n_ticks: usize,
}

impl BucketAccumulator {
    fn new(bucket_start: NaiveDateTime, session: usize) -> Self {
        Self {
            bucket_start,
            session,
            ofi_value: 0,
            close_mid: f64::NAN,
            n_ticks: 0,
        }
    }

    fn into_record(self) -> OfiRecord {
        OfiRecord {
            bucket_start: self.bucket_start,
            ofi_value: self.ofi_value,
            close_mid: self.close_mid,
            n_ticks: self.n_ticks,
            session: self.session,
        }
    }
}

/// Streaming OFI bucket aggregator for one partition.
///
/// Ticks may be pushed one at a time or in chunks of any size; the records
/// returned by [`finish`](Self::finish) do not depend on the chunking.
///
/// # Example
///
/// ```ignore
/// let mut agg = OfiAggregator::from_config(&config);
/// for chunk in ticks.chunks(1024) {
///     agg.push_all(chunk)?;
/// }
/// let records = agg.finish();
/// ```
#[derive(Debug, Clone)]
pub struct OfiAggregator {
    config: AggregationConfig,

    /// Previous in-session tick (predecessor for the next increment).
    prev: Option<TickSnapshot>,

    /// Session index of `prev`.
    prev_session: Option<usize>,

    /// Timestamp of the last accepted tick, in-session or not.
    last_timestamp: Option<NaiveDateTime>,

    current: Option<BucketAccumulator>,
    records: Vec<OfiRecord>,

    /// Ticks dropped for falling outside every session window.
    ticks_outside_session: usize,
}

impl OfiAggregator {
    pub fn from_config(config: &AggregationConfig) -> Self {
        Self {
            config: config.clone(),
            prev: None,
            prev_session: None,
            last_timestamp: None,
            current: None,
            records: Vec::new(),
            ticks_outside_session: 0,
        }
    }

    /// Aggregator with `levels` levels, `bucket_width_secs` buckets and defaults otherwise.
    pub fn new(levels: usize, bucket_width_secs: u32) -> Self {
        Self::from_config(
            &AggregationConfig::default()
                .with_levels(levels)
                .with_bucket_width_secs(bucket_width_secs),
        )
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Feed the next tick. Ticks must arrive in non-decreasing timestamp order.
    pub fn push(&mut self, tick: &TickSnapshot) -> Result<()> {
        if let Some(previous) = self.last_timestamp {
            if tick.timestamp < previous {
                return Err(PipelineError::UnorderedTicks {
                    previous,
                    current: tick.timestamp,
                });
            }
        }
        self.last_timestamp = Some(tick.timestamp);

        let session = match self.config.session_of(tick.timestamp) {
            Some(s) => s,
            None => {
                self.ticks_outside_session += 1;
                return Ok(());
            }
        };
        if self.prev_session != Some(session) {
            self.prev = None;
        }

        let bucket_start = floor_to_bucket(tick.timestamp, self.config.bucket_width_secs);
        if self.current.as_ref().map(|b| b.bucket_start) != Some(bucket_start) {
            if let Some(done) = self.current.take() {
                self.records.push(done.into_record());
            }
            self.current = Some(BucketAccumulator::new(bucket_start, session));
        }

        let increment = self
            .prev
            .as_ref()
            .map(|prev| tick_increment(prev, tick, self.config.levels, self.config.ofi_method));

        if let Some(bucket) = self.current.as_mut() {
            bucket.ofi_value += increment.unwrap_or(0);
            bucket.n_ticks += 1;
            if let Some(mid) = tick.mid_price() {
                bucket.close_mid = mid;
            }
        }

        self.prev = Some(tick.clone());
        self.prev_session = Some(session);
        Ok(())
    }

    pub fn push_all(&mut self, ticks: &[TickSnapshot]) -> Result<()> {
        ticks.iter().try_for_each(|t| self.push(t))
    }

    /// Ticks ignored because they fell outside every session window.
    pub fn ticks_outside_session(&self) -> usize {
        self.ticks_outside_session
    }

    /// Close the open bucket and return all records in bucket order.
    pub fn finish(mut self) -> Vec<OfiRecord> {
        if let Some(done) = self.current.take() {
            self.records.push(done.into_record());
        }
        self.records
    }

    /// One-shot aggregation of an ordered tick sequence.
    pub fn aggregate(mut self, ticks: &[TickSnapshot]) -> Result<Vec<OfiRecord>> {
        self.push_all(ticks)?;
        Ok(self.finish())
    }
}

/// Mean and sample standard deviation of bucket OFI values.
pub fn ofi_moments(records: &[OfiRecord]) -> (f64, f64) {
    let values: Vec<f64> = records.iter().map(|r| r.ofi_value as f64).collect();
    (
        crate::evaluation::stats::mean(&values),
        crate::evaluation::stats::sample_std(&values),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::SessionWindow;
    use chrono::{NaiveDate, NaiveTime};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn tick(ts: NaiveDateTime, bid_v: u64, ask_v: u64) -> TickSnapshot {
        TickSnapshot::new(ts, vec![BookLevel::new(10.02, ask_v, 10.00, bid_v)])
    }

    fn two_level(ts: NaiveDateTime, l1: (u64, u64), l2: (u64, u64)) -> TickSnapshot {
        TickSnapshot::new(
            ts,
            vec![
                BookLevel::new(10.02, l1.1, 10.00, l1.0),
                BookLevel::new(10.03, l2.1, 9.99, l2.0),
            ],
        )
    }

    #[test]
    fn test_volume_delta_increment() {
        let a = two_level(at(9, 30, 0), (100, 100), (50, 50));
        let b = two_level(at(9, 30, 1), (150, 80), (40, 70));
        // level 1: (150-100) - (80-100) = 70; level 2: (40-50) - (70-50) = -30
        assert_eq!(tick_increment(&a, &b, 2, OfiMethod::VolumeDelta), 40);
        assert_eq!(tick_increment(&a, &b, 1, OfiMethod::VolumeDelta), 70);
    }

    #[test]
    fn test_missing_level_field_contributes_zero() {
        let a = two_level(at(9, 30, 0), (100, 100), (50, 50));
        let mut b = two_level(at(9, 30, 1), (150, 80), (40, 70));
        b.levels[1].ask_price = None;
        assert_eq!(tick_increment(&a, &b, 2, OfiMethod::VolumeDelta), 70);
    }

    #[test]
    fn test_price_aware_increment() {
        let a = TickSnapshot::new(at(9, 30, 0), vec![BookLevel::new(10.02, 100, 10.00, 100)]);
        // Bid improves to 10.01 with 30 shares, ask unchanged but grows by 20.
        let b = TickSnapshot::new(at(9, 30, 1), vec![BookLevel::new(10.02, 120, 10.01, 30)]);
        assert_eq!(tick_increment(&a, &b, 1, OfiMethod::PriceAware), 30 - 20);

        // Ask drops to 10.01 with 40 shares, bid falls back to 9.99 (old size 30 lost).
        let c = TickSnapshot::new(at(9, 30, 2), vec![BookLevel::new(10.01, 40, 9.99, 10)]);
        assert_eq!(tick_increment(&b, &c, 1, OfiMethod::PriceAware), -30 - 40);
    }

    #[test]
    fn test_bucket_continuity_across_edges() {
        let ticks = vec![
            tick(at(9, 30, 10), 100, 100),
            tick(at(9, 30, 50), 120, 100), // +20
            tick(at(9, 31, 5), 120, 90),   // +10, predecessor is 09:30:50
            tick(at(9, 31, 40), 100, 90),  // -20
            tick(at(9, 33, 0), 100, 100),  // -10
        ];
        let records = OfiAggregator::new(1, 60).aggregate(&ticks).unwrap();

        assert_eq!(records.len(), 3, "empty 09:32 bucket is omitted");
        assert_eq!(records[0].bucket_start, at(9, 30, 0));
        assert_eq!(records[0].ofi_value, 20);
        assert_eq!(records[0].n_ticks, 2);
        assert_eq!(records[1].ofi_value, -10);
        assert_eq!(records[2].bucket_start, at(9, 33, 0));
        assert_eq!(records[2].ofi_value, -10);
        assert!((records[2].close_mid - 10.01).abs() < 1e-12);
    }

    #[test]
    fn test_bucket_sum_matches_tick_increments() {
        let ticks: Vec<TickSnapshot> = (0..500u32)
            .map(|k| {
                let ts = at(9, 30, 0) + chrono::Duration::seconds(i64::from(k) * 3);
                tick(ts, 100 + u64::from((k * 37) % 50), 100 + u64::from((k * 11) % 70))
            })
            .collect();

        let records = OfiAggregator::new(1, 60).aggregate(&ticks).unwrap();
        let total: i64 = records.iter().map(|r| r.ofi_value).sum();
        let expected: i64 = tick_increments(&ticks, 1, OfiMethod::VolumeDelta)
            .into_iter()
            .flatten()
            .sum();
        assert_eq!(total, expected);
        assert_eq!(records.iter().map(|r| r.n_ticks).sum::<usize>(), 500);
    }

    #[test]
    fn test_chunking_invariance() {
        let ticks: Vec<TickSnapshot> = (0..300u32)
            .map(|k| {
                let ts = at(9, 30, 0) + chrono::Duration::seconds(i64::from(k) * 7);
                tick(ts, 200 + u64::from((k * 13) % 90), 150 + u64::from((k * 29) % 60))
            })
            .collect();

        let whole = OfiAggregator::new(1, 60).aggregate(&ticks).unwrap();
        for chunk_size in [1, 7, 64, 299] {
            let mut agg = OfiAggregator::new(1, 60);
            for chunk in ticks.chunks(chunk_size) {
                agg.push_all(chunk).unwrap();
            }
            assert_eq!(agg.finish(), whole, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_first_tick_has_no_predecessor() {
        let ticks = vec![tick(at(9, 30, 0), 500, 10)];
        let records = OfiAggregator::new(1, 60).aggregate(&ticks).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ofi_value, 0);
        assert!((records[0].close_mid - 10.01).abs() < 1e-12);
    }

    #[test]
    fn test_close_mid_skips_invalid_quotes() {
        let mut last = tick(at(9, 30, 30), 100, 100);
        last.levels[0].bid_price = Some(0.0);
        let ticks = vec![tick(at(9, 30, 0), 100, 100), last];
        let records = OfiAggregator::new(1, 60).aggregate(&ticks).unwrap();
        assert!((records[0].close_mid - 10.01).abs() < 1e-12);

        let mut only = tick(at(9, 31, 0), 100, 100);
        only.levels[0].ask_price = None;
        let records = OfiAggregator::new(1, 60).aggregate(&[only]).unwrap();
        assert!(records[0].close_mid.is_nan());
    }

    #[test]
    fn test_sessions_reset_predecessor_and_filter() {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        let config = AggregationConfig::default()
            .with_levels(1)
            .with_sessions(vec![
                SessionWindow::new(t(9, 30), t(11, 30)),
                SessionWindow::new(t(13, 0), t(15, 0)),
            ]);

        let ticks = vec![
            tick(at(9, 25, 0), 900, 10),   // call auction, ignored
            tick(at(9, 30, 0), 100, 100),  // first in session, no predecessor
            tick(at(9, 30, 30), 110, 100), // +10
            tick(at(13, 0, 0), 500, 100),  // new session, no predecessor
            tick(at(13, 0, 20), 505, 100), // +5
        ];
        let mut agg = OfiAggregator::from_config(&config);
        agg.push_all(&ticks).unwrap();
        assert_eq!(agg.ticks_outside_session(), 1);
        let records = agg.finish();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ofi_value, 10);
        assert_eq!(records[1].ofi_value, 5);
        assert_eq!(records[0].session, 0);
        assert_eq!(records[1].session, 1);
    }

    #[test]
    fn test_out_of_order_tick_is_rejected() {
        let ticks = vec![tick(at(9, 31, 0), 100, 100), tick(at(9, 30, 0), 100, 100)];
        let err = OfiAggregator::new(1, 60).aggregate(&ticks).unwrap_err();
        assert!(matches!(err, PipelineError::UnorderedTicks { .. }));
    }

    #[test]
    fn test_ofi_moments() {
        let ticks = vec![
            tick(at(9, 30, 0), 100, 100),
            tick(at(9, 31, 0), 110, 100),
            tick(at(9, 32, 0), 130, 100),
        ];
        let records = OfiAggregator::new(1, 60).aggregate(&ticks).unwrap();
        let (mean, std) = ofi_moments(&records);
        // values: 0, 10, 20
        assert!((mean - 10.0).abs() < 1e-12);
        assert!((std - 10.0).abs() < 1e-12);
    }
}
