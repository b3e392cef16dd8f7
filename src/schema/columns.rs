//! Column naming and header resolution for tick files.

use std::collections::HashMap;

#[inline]
pub fn ask_price_column(level: usize) -> String {
    format!("a{level}_p")
}

#[inline]
pub fn ask_volume_column(level: usize) -> String {
    format!("a{level}_v")
}

#[inline]
pub fn bid_price_column(level: usize) -> String {
    format!("b{level}_p")
}

#[inline]
pub fn bid_volume_column(level: usize) -> String {
    format!("b{level}_v")
}

/// Column indices for one book level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelColumns {
    pub ask_price: usize,
    pub ask_volume: usize,
    pub bid_price: usize,
    pub bid_volume: usize,
}

/// Resolved positions of every column the reader consumes.
///
/// Header names are matched case-insensitively after trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    /// Full timestamp column (`ts`), preferred when present.
    pub ts: Option<usize>,
    /// Vendor `time` column (14/17-digit or intraday digits).
    pub time: Option<usize>,
    pub levels: Vec<LevelColumns>,
    pub volume: Option<usize>,
    pub money: Option<usize>,
    pub current: Option<usize>,
    pub maybe_truncated: Option<usize>,
}

impl ColumnMap {
    /// Resolve columns for `levels` book levels.
    ///
    /// Returns the list of missing required columns on failure.
    pub fn from_headers<S: AsRef<str>>(headers: &[S], levels: usize) -> Result<Self, Vec<String>> {
        let index: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.as_ref().trim().to_ascii_lowercase(), i))
            .collect();

        let mut missing = Vec::new();
        let ts = index.get("ts").copied();
        let time = index.get("time").copied();
        if ts.is_none() && time.is_none() {
            missing.push("time".to_string());
        }

        let mut level_columns = Vec::with_capacity(levels);
        for level in 1..=levels {
            let mut lookup = |name: String| -> usize {
                match index.get(&name) {
                    Some(&i) => i,
                    None => {
                        missing.push(name);
                        usize::MAX
                    }
                }
            };
            level_columns.push(LevelColumns {
                ask_price: lookup(ask_price_column(level)),
                ask_volume: lookup(ask_volume_column(level)),
                bid_price: lookup(bid_price_column(level)),
                bid_volume: lookup(bid_volume_column(level)),
            });
        }

        if !missing.is_empty() {
            return Err(missing);
        }

        Ok(Self {
            ts,
            time,
            levels: level_columns,
            volume: index.get("volume").copied(),
            money: index.get("money").copied(),
            current: index.get("current").copied(),
            maybe_truncated: index.get("maybe_truncated").copied(),
        })
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}
