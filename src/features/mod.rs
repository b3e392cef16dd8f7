//! Bucketed order-flow features.
//!
//! Turns an ordered tick sequence into one [`OfiRecord`] per time bucket.
//!
//! # Architecture
//!
//! ```text
//! ticks ──► session filter ──► tick increment (prev, curr) ──► bucket accumulator ──► OfiRecord
//!                 │                      ▲
//!                 └─ new session ────────┘ (predecessor reset)
//! ```
//!
//! - `order_flow`: per-tick multi-level OFI increment and the streaming aggregator
//!
//! # Usage
//!
//! ```ignore
//! use ofi_signal::features::{AggregationConfig, OfiAggregator};
//!
//! let records = OfiAggregator::from_config(&AggregationConfig::default()).aggregate(&ticks)?;
//! ```

pub mod order_flow;

pub use order_flow::{tick_increment, tick_increments, OfiAggregator, OfiRecord};

use crate::schema::{DEFAULT_LEVELS, MAX_LEVELS};
use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Seconds in one trading-day clock.
const SECONDS_PER_DAY: u32 = 86_400;

/// How a level's volume change is turned into signed flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfiMethod {
    /// `(bid_v[k] - bid_v[k-1]) - (ask_v[k] - ask_v[k-1])` per level.
    #[default]
    VolumeDelta,

    /// Price-aware queue rule (Cont, Kukanov & Stoikov, 2014) per level:
    ///
    /// ```text
    /// bid: price up -> +new size, price down -> -old size, unchanged -> size change
    /// ask: price down -> -new size, price up -> +old size, unchanged -> -size change
    /// ```
    PriceAware,
}

/// Continuous-trading window `[start, end)` in exchange-local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SessionWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn contains(&self, time: NaiveTime) -> bool {
        time >= self.start && time < self.end
    }

    /// Whole buckets of `width_secs` covered by the window.
    pub fn bucket_count(&self, width_secs: u32) -> usize {
        let span = (self.end - self.start).num_seconds().max(0) as u32;
        (span / width_secs.max(1)) as usize
    }

    /// Morning and afternoon continuous sessions of the Shanghai/Shenzhen
    /// exchanges: 09:30-11:30 and 13:00-15:00 (240 one-minute buckets).
    pub fn cn_equity() -> Vec<SessionWindow> {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
        vec![
            SessionWindow::new(t(9, 30), t(11, 30)),
            SessionWindow::new(t(13, 0), t(15, 0)),
        ]
    }
}

/// Configuration for OFI aggregation.
///
/// # Example
///
/// ```
/// use ofi_signal::features::{AggregationConfig, OfiMethod};
///
/// let config = AggregationConfig::default();
/// assert_eq!(config.levels, 5);
/// assert_eq!(config.bucket_width_secs, 60);
/// assert_eq!(config.ofi_method, OfiMethod::VolumeDelta);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Book levels summed into the increment (L).
    #[serde(default = "default_levels")]
    pub levels: usize,

    /// Bucket width in seconds (W).
    #[serde(default = "default_bucket_width")]
    pub bucket_width_secs: u32,

    #[serde(default)]
    pub ofi_method: OfiMethod,

    /// Continuous-trading windows. Empty means the whole partition is one
    /// session and no tick is filtered.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<SessionWindow>,
}

fn default_levels() -> usize {
    DEFAULT_LEVELS
}

fn default_bucket_width() -> u32 {
    60
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            levels: DEFAULT_LEVELS,
            bucket_width_secs: 60,
            ofi_method: OfiMethod::VolumeDelta,
            sessions: Vec::new(),
        }
    }
}

impl AggregationConfig {
    pub fn with_levels(mut self, levels: usize) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_bucket_width_secs(mut self, secs: u32) -> Self {
        self.bucket_width_secs = secs;
        self
    }

    pub fn with_method(mut self, method: OfiMethod) -> Self {
        self.ofi_method = method;
        self
    }

    pub fn with_sessions(mut self, sessions: Vec<SessionWindow>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.levels == 0 || self.levels > MAX_LEVELS {
            return Err(format!(
                "levels must be in 1..={MAX_LEVELS}, got {}",
                self.levels
            ));
        }
        if self.bucket_width_secs == 0 || self.bucket_width_secs > SECONDS_PER_DAY {
            return Err(format!(
                "bucket_width_secs must be in 1..={SECONDS_PER_DAY}, got {}",
                self.bucket_width_secs
            ));
        }
        for (i, window) in self.sessions.iter().enumerate() {
            if window.start >= window.end {
                return Err(format!("session {i}: start must be before end"));
            }
            if let Some(prev) = i.checked_sub(1).map(|j| &self.sessions[j]) {
                if window.start < prev.end {
                    return Err(format!("session {i} overlaps or precedes session {}", i - 1));
                }
            }
        }
        Ok(())
    }

    /// Index of the session containing `ts`; `Some(0)` when no sessions are set.
    #[inline]
    pub fn session_of(&self, ts: NaiveDateTime) -> Option<usize> {
        if self.sessions.is_empty() {
            return Some(0);
        }
        let time = ts.time();
        self.sessions.iter().position(|w| w.contains(time))
    }
}

/// Floor `ts` to the start of its bucket, measured from midnight.
#[inline]
pub fn floor_to_bucket(ts: NaiveDateTime, width_secs: u32) -> NaiveDateTime {
    let width = width_secs.max(1);
    let secs = ts.time().num_seconds_from_midnight();
    let floored = secs - secs % width;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(floored, 0).unwrap_or(NaiveTime::MIN);
    ts.date().and_time(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    #[test]
    fn test_floor_to_minute() {
        assert_eq!(floor_to_bucket(at(9, 30, 59, 999), 60), at(9, 30, 0, 0));
        assert_eq!(floor_to_bucket(at(9, 31, 0, 0), 60), at(9, 31, 0, 0));
    }

    #[test]
    fn test_floor_to_five_minutes() {
        assert_eq!(floor_to_bucket(at(9, 34, 10, 0), 300), at(9, 30, 0, 0));
        assert_eq!(floor_to_bucket(at(9, 35, 0, 0), 300), at(9, 35, 0, 0));
    }

    #[test]
    fn test_cn_equity_sessions() {
        let sessions = SessionWindow::cn_equity();
        let total: usize = sessions.iter().map(|w| w.bucket_count(60)).sum();
        assert_eq!(total, 240);

        let config = AggregationConfig::default().with_sessions(sessions);
        assert!(config.validate().is_ok());
        assert_eq!(config.session_of(at(9, 25, 0, 0)), None);
        assert_eq!(config.session_of(at(9, 30, 0, 0)), Some(0));
        assert_eq!(config.session_of(at(11, 30, 0, 0)), None);
        assert_eq!(config.session_of(at(14, 59, 59, 0)), Some(1));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(AggregationConfig::default().with_levels(0).validate().is_err());
        assert!(AggregationConfig::default().with_levels(11).validate().is_err());
        assert!(AggregationConfig::default()
            .with_bucket_width_secs(0)
            .validate()
            .is_err());

        let t = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
        let overlapping = vec![SessionWindow::new(t(9), t(12)), SessionWindow::new(t(11), t(15))];
        assert!(AggregationConfig::default()
            .with_sessions(overlapping)
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_toml_roundtrip_with_sessions() {
        let config = AggregationConfig::default().with_sessions(SessionWindow::cn_equity());
        let text = toml::to_string(&config).unwrap();
        let back: AggregationConfig = toml::from_str(&text).unwrap();
        assert_eq!(config, back);
    }
}
