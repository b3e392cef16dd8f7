//! Tick snapshot types.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One price level of the book as read from a tick row.
///
/// Every field is optional: raw vendor files contain blank or `nan` cells,
/// and a missing field only disables that level for that tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BookLevel {
    pub ask_price: Option<f64>,
    pub ask_volume: Option<u64>,
    pub bid_price: Option<f64>,
    pub bid_volume: Option<u64>,
}

impl BookLevel {
    pub fn new(ask_price: f64, ask_volume: u64, bid_price: f64, bid_volume: u64) -> Self {
        Self {
            ask_price: Some(ask_price),
            ask_volume: Some(ask_volume),
            bid_price: Some(bid_price),
            bid_volume: Some(bid_volume),
        }
    }

    /// All four fields present.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.ask_price.is_some()
            && self.ask_volume.is_some()
            && self.bid_price.is_some()
            && self.bid_volume.is_some()
    }

    /// Both prices present, finite and strictly positive.
    #[inline]
    pub fn has_valid_prices(&self) -> bool {
        matches!(
            (self.ask_price, self.bid_price),
            (Some(a), Some(b)) if a.is_finite() && b.is_finite() && a > 0.0 && b > 0.0
        )
    }
}

/// Optional trade-side fields. Used by the quality gate only.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TradeFields {
    /// Cumulative traded volume for the day.
    pub cumulative_volume: Option<f64>,
    /// Cumulative traded turnover for the day.
    pub cumulative_turnover: Option<f64>,
    /// Last trade price.
    pub last_price: Option<f64>,
    /// Vendor marker for snapshots that may have lost depth.
    pub maybe_truncated: Option<bool>,
}

/// One order-book update event for one symbol on one trading day.
#[derive(Debug, Clone, PartialEq)]
pub struct TickSnapshot {
    pub timestamp: NaiveDateTime,
    /// Book levels, index 0 is level 1.
    pub levels: Vec<BookLevel>,
    pub trade: TradeFields,
}

impl TickSnapshot {
    pub fn new(timestamp: NaiveDateTime, levels: Vec<BookLevel>) -> Self {
        Self {
            timestamp,
            levels,
            trade: TradeFields::default(),
        }
    }

    /// Level `i` (1-based), if the snapshot carries it.
    #[inline]
    pub fn level(&self, i: usize) -> Option<&BookLevel> {
        i.checked_sub(1).and_then(|idx| self.levels.get(idx))
    }

    /// Top-of-book quote as `(bid, ask)` when both sides are valid.
    #[inline]
    pub fn top_of_book(&self) -> Option<(f64, f64)> {
        let l1 = self.levels.first()?;
        if !l1.has_valid_prices() {
            return None;
        }
        Some((l1.bid_price?, l1.ask_price?))
    }

    /// `(ask_price_1 + bid_price_1) / 2`.
    #[inline]
    pub fn mid_price(&self) -> Option<f64> {
        self.top_of_book().map(|(bid, ask)| (ask + bid) / 2.0)
    }

    /// `ask_price_1 - bid_price_1`; negative for a crossed book.
    #[inline]
    pub fn spread(&self) -> Option<f64> {
        self.top_of_book().map(|(bid, ask)| ask - bid)
    }
}

/// Storage and processing unit: one symbol on one date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub symbol: String,
    pub date: NaiveDate,
}

impl PartitionKey {
    pub fn new(symbol: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            date,
        }
    }

    /// Date in the `YYYY-MM-DD` form used by partition paths.
    pub fn date_str(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.symbol, self.date_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_mid_and_spread() {
        let tick = TickSnapshot::new(ts(9, 30, 0), vec![BookLevel::new(10.02, 300, 10.00, 500)]);
        assert!((tick.mid_price().unwrap() - 10.01).abs() < 1e-12);
        assert!((tick.spread().unwrap() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_top_of_book() {
        let mut level = BookLevel::new(10.02, 300, 0.0, 500);
        let tick = TickSnapshot::new(ts(9, 30, 0), vec![level]);
        assert!(tick.mid_price().is_none());

        level.bid_price = None;
        let tick = TickSnapshot::new(ts(9, 30, 0), vec![level]);
        assert!(tick.spread().is_none());
        assert!(!level.is_complete());
    }

    #[test]
    fn test_level_is_one_based() {
        let tick = TickSnapshot::new(
            ts(9, 30, 0),
            vec![
                BookLevel::new(10.02, 300, 10.00, 500),
                BookLevel::new(10.03, 100, 9.99, 200),
            ],
        );
        assert_eq!(tick.level(2).unwrap().bid_volume, Some(200));
        assert!(tick.level(0).is_none());
        assert!(tick.level(3).is_none());
    }

    #[test]
    fn test_partition_key_ordering() {
        let d1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let mut keys = vec![
            PartitionKey::new("B", d1),
            PartitionKey::new("A", d2),
            PartitionKey::new("A", d1),
        ];
        keys.sort();
        assert_eq!(keys[0], PartitionKey::new("A", d1));
        assert_eq!(keys[2], PartitionKey::new("B", d1));
        assert_eq!(keys[0].to_string(), "A 2024-03-01");
    }
}
