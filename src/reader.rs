//! Tick Partition Reader
//!
//! Locates and loads one `(symbol, date)` partition of order-book ticks.
//!
//! # Storage Layouts
//!
//! Both layouts are accepted transparently, checked in this order:
//!
//! ```text
//! <root>/<symbol>/<YYYY-MM-DD>.csv[.gz]            single file per date
//! <root>/<symbol>/<YYYY-MM-DD>/part.csv[.gz]        directory per date
//! <root>/<symbol>/<YYYY-MM-DD>/<any>.csv[.gz]       directory with exactly one data file
//! ```
//!
//! Plain CSV is preferred over its gzip twin when both exist. Gzip files are
//! decoded while streaming. A directory holding more than one data file is
//! ambiguous and rejected with a schema error.
//!
//! # Timestamps
//!
//! The `ts` column (ISO-8601 / RFC 3339) is preferred. Otherwise the vendor
//! `time` column is parsed as:
//!
//! | Digits | Format |
//! |--------|--------|
//! | 14 | `YYYYMMDDHHMMSS` |
//! | 17 | `YYYYMMDDHHMMSSfff` |
//! | <= 6 | `HHMMSS` on the partition date (left zero-padded) |
//! | 7-9 | `HHMMSSfff` on the partition date (left zero-padded) |
//!
//! A trailing all-zero fraction from float encoding (`20240301093000.0`) is
//! ignored. A non-zero fraction on a whole-second width (`93000.5`) is read
//! as sub-second time; on a millisecond width it is rejected. Any row whose
//! timestamp cannot be parsed fails the partition.
//!
//! # Example
//!
//! ```ignore
//! use ofi_signal::reader::TickReader;
//!
//! let reader = TickReader::new("data/processed/ticks", 5);
//! let ticks = reader.read(&PartitionKey::new("510300.XSHG", date))?;
//! ```

use crate::error::{PipelineError, Result};
use crate::schema::{BookLevel, ColumnMap, PartitionKey, TickSnapshot, TradeFields};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// File name stem used inside per-date directories.
pub const PART_FILE_STEM: &str = "part";

/// Accepted data file suffixes, in lookup order: plain CSV, then gzip.
pub const DATA_SUFFIXES: [&str; 2] = [".csv", ".csv.gz"];

/// Reader for tick partitions under a storage root.
#[derive(Debug, Clone)]
pub struct TickReader {
    root: PathBuf,
    levels: usize,
}

impl TickReader {
    pub fn new<P: AsRef<Path>>(root: P, levels: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            levels,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Resolve the data file for a partition.
    pub fn locate(&self, key: &PartitionKey) -> Result<PathBuf> {
        let symbol_dir = self.root.join(&key.symbol);
        let date_str = key.date_str();

        if let Some(flat) = first_existing(&symbol_dir, &date_str) {
            return Ok(flat);
        }

        let date_dir = symbol_dir.join(&date_str);
        if date_dir.is_dir() {
            if let Some(part) = first_existing(&date_dir, PART_FILE_STEM) {
                return Ok(part);
            }

            let mut data_files = list_data_files(&date_dir)?;
            match data_files.len() {
                0 => {}
                1 => return Ok(data_files.remove(0)),
                n => {
                    return Err(PipelineError::schema(
                        &date_dir,
                        format!("expected one data file, found {n}"),
                    ))
                }
            }
        }

        Err(PipelineError::PartitionNotFound {
            symbol: key.symbol.clone(),
            date: key.date,
            root: self.root.clone(),
        })
    }

    /// Load the ordered tick sequence for a partition.
    pub fn read(&self, key: &PartitionKey) -> Result<Vec<TickSnapshot>> {
        let path = self.locate(key)?;
        let ticks = self.read_path(&path, key.date)?;
        log::debug!("{key}: read {} ticks from {}", ticks.len(), path.display());
        Ok(ticks)
    }

    /// Parse one tick file, gzip-compressed when its name ends in `.gz`.
    /// `date` completes intraday-only timestamps.
    pub fn read_path(&self, path: &Path, date: NaiveDate) -> Result<Vec<TickSnapshot>> {
        let file = BufReader::new(File::open(path)?);
        let source: Box<dyn Read> = if is_gzip(path) {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(source);

        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let columns = ColumnMap::from_headers(&headers, self.levels).map_err(|missing| {
            PipelineError::schema(path, format!("missing required columns: {}", missing.join(", ")))
        })?;

        let mut ticks = Vec::new();
        let mut unparsed = 0usize;
        let mut first_bad: Option<String> = None;

        for record in rdr.records() {
            let record = record?;
            let timestamp = match parse_row_timestamp(&record, &columns, date) {
                Some(ts) => ts,
                None => {
                    unparsed += 1;
                    if first_bad.is_none() {
                        first_bad = Some(timestamp_cell(&record, &columns).to_string());
                    }
                    continue;
                }
            };

            let levels = columns
                .levels
                .iter()
                .map(|lc| BookLevel {
                    ask_price: parse_price(record.get(lc.ask_price)),
                    ask_volume: parse_volume(record.get(lc.ask_volume)),
                    bid_price: parse_price(record.get(lc.bid_price)),
                    bid_volume: parse_volume(record.get(lc.bid_volume)),
                })
                .collect();

            let trade = TradeFields {
                cumulative_volume: columns.volume.and_then(|i| parse_number(record.get(i))),
                cumulative_turnover: columns.money.and_then(|i| parse_number(record.get(i))),
                last_price: columns.current.and_then(|i| parse_number(record.get(i))),
                maybe_truncated: columns
                    .maybe_truncated
                    .and_then(|i| parse_number(record.get(i)))
                    .map(|v| v > 0.0),
            };

            ticks.push(TickSnapshot {
                timestamp,
                levels,
                trade,
            });
        }

        if unparsed > 0 {
            return Err(PipelineError::schema(
                path,
                format!(
                    "unparsed timestamps: {unparsed} rows (first: {:?})",
                    first_bad.unwrap_or_default()
                ),
            ));
        }

        // Stable: equal timestamps keep file order.
        ticks.sort_by_key(|t| t.timestamp);
        Ok(ticks)
    }

    /// Dates present on disk for `symbol`, in either layout, ascending.
    pub fn discover_dates(&self, symbol: &str) -> Result<Vec<NaiveDate>> {
        let symbol_dir = self.root.join(symbol);
        if !symbol_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut dates = Vec::new();
        for entry in fs::read_dir(&symbol_dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };

            let date_part = if path.is_dir() {
                name
            } else {
                match data_stem(name) {
                    Some(stem) => stem,
                    None => continue,
                }
            };

            if let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
                if path.is_file() || !list_data_files(&path)?.is_empty() {
                    dates.push(date);
                }
            }
        }

        dates.sort();
        dates.dedup();
        Ok(dates)
    }
}

/// File name without its data suffix, `None` for non-data files.
fn data_stem(name: &str) -> Option<&str> {
    DATA_SUFFIXES.iter().find_map(|suffix| name.strip_suffix(suffix))
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

/// `<dir>/<stem>.csv`, else `<dir>/<stem>.csv.gz`, if either is a file.
fn first_existing(dir: &Path, stem: &str) -> Option<PathBuf> {
    DATA_SUFFIXES
        .iter()
        .map(|suffix| dir.join(format!("{stem}{suffix}")))
        .find(|p| p.is_file())
}

fn list_data_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(data_stem)
                    .is_some()
        })
        .collect();
    files.sort();
    Ok(files)
}

fn timestamp_cell<'a>(record: &'a csv::StringRecord, columns: &ColumnMap) -> &'a str {
    columns
        .ts
        .or(columns.time)
        .and_then(|i| record.get(i))
        .unwrap_or("")
}

fn parse_row_timestamp(
    record: &csv::StringRecord,
    columns: &ColumnMap,
    date: NaiveDate,
) -> Option<NaiveDateTime> {
    if let Some(ts) = columns.ts.and_then(|i| record.get(i)).and_then(parse_iso_timestamp) {
        return Some(ts);
    }
    columns
        .time
        .and_then(|i| record.get(i))
        .and_then(|raw| parse_vendor_time(raw, date))
}

/// Parse `YYYY-MM-DD HH:MM:SS[.f]`, the `T`-separated form, or RFC 3339.
pub fn parse_iso_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.naive_local())
}

/// Parse the vendor `time` column. See the module docs for accepted widths.
pub fn parse_vendor_time(raw: &str, date: NaiveDate) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    let (integral, frac_millis) = match raw.split_once('.') {
        None => (raw, 0),
        Some((int, frac)) if frac.chars().all(|c| c == '0') => (int, 0),
        Some((int, frac)) if frac.chars().all(|c| c.is_ascii_digit()) => {
            // Sub-second fraction, truncated to milliseconds.
            let ms = format!("{:0<3}", &frac[..frac.len().min(3)]);
            (int, ms.parse::<i64>().ok()?)
        }
        Some(_) => return None,
    };
    let sub_second = chrono::Duration::milliseconds(frac_millis);
    let digits: String = integral.chars().filter(char::is_ascii_digit).collect();

    match digits.len() {
        0 => None,
        14 => {
            let base = NaiveDateTime::parse_from_str(&digits, "%Y%m%d%H%M%S").ok()?;
            Some(base + sub_second)
        }
        // Millisecond widths already carry sub-second time.
        17 | 7..=9 if frac_millis != 0 => None,
        17 => {
            let base = NaiveDateTime::parse_from_str(&digits[..14], "%Y%m%d%H%M%S").ok()?;
            let millis: i64 = digits[14..].parse().ok()?;
            Some(base + chrono::Duration::milliseconds(millis))
        }
        1..=6 => {
            let padded = format!("{digits:0>6}");
            let time = NaiveTime::parse_from_str(&padded, "%H%M%S").ok()?;
            Some(date.and_time(time) + sub_second)
        }
        7..=9 => {
            let padded = format!("{digits:0>9}");
            let time = NaiveTime::parse_from_str(&padded[..6], "%H%M%S").ok()?;
            let millis: i64 = padded[6..].parse().ok()?;
            Some(date.and_time(time) + chrono::Duration::milliseconds(millis))
        }
        _ => None,
    }
}

/// Finite number, or `None` for blank / `nan` / unparseable cells.
fn parse_number(cell: Option<&str>) -> Option<f64> {
    let v: f64 = cell?.trim().parse().ok()?;
    v.is_finite().then_some(v)
}

/// Prices keep non-positive values so the quality gate can count them.
fn parse_price(cell: Option<&str>) -> Option<f64> {
    parse_number(cell)
}

/// Volumes must be non-negative; fractional values are truncated.
fn parse_volume(cell: Option<&str>) -> Option<u64> {
    parse_number(cell)
        .filter(|v| *v >= 0.0)
        .map(|v| v.trunc() as u64)
}
