//! Tick Schema Module
//!
//! Typed representation of order-book tick snapshots and the column contract
//! that on-disk partitions must satisfy.
//!
//! # Column Contract
//!
//! ```text
//! time | ts            timestamp (one of them required)
//! a{i}_p  a{i}_v       ask price / volume at level i   (required, i = 1..=L)
//! b{i}_p  b{i}_v       bid price / volume at level i   (required, i = 1..=L)
//! volume money current optional trade fields (quality metrics only)
//! maybe_truncated      optional data-vendor truncation marker
//! ```
//!
//! # Example
//!
//! ```ignore
//! use ofi_signal::schema::{ColumnMap, TickSnapshot};
//!
//! let columns = ColumnMap::from_headers(&headers, 5)?;
//! let mid = tick.mid_price();
//! ```

mod columns;
mod tick;

pub use columns::{
    ask_price_column, ask_volume_column, bid_price_column, bid_volume_column, ColumnMap,
};
pub use tick::{BookLevel, PartitionKey, TickSnapshot, TradeFields};

/// Default number of book levels carried by tick snapshots.
pub const DEFAULT_LEVELS: usize = 5;

/// Upper bound on supported book depth.
pub const MAX_LEVELS: usize = 10;
