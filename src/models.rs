/// Data Models Module
///
/// This module defines the core data structures used throughout the application.
/// These models represent the block list we iterate over, the per-user positions
/// we aggregate, and the normalized CSV rows every adapter produces.
use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use serde::{Serialize, Serializer};

/// On-chain token amount. Never stored as a float.
pub type TokenAmount = BigInt;

/// A block to snapshot, read from the input block list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub number: u64,
    pub timestamp: u64,
}

impl BlockRef {
    pub fn new(number: u64, timestamp: u64) -> Self {
        Self { number, timestamp }
    }

    /// Block time as a UTC datetime (for log output)
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.timestamp).ok().and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
    }
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.datetime() {
            Some(time) => write!(f, "#{} ({})", self.number, time.format("%Y-%m-%d %H:%M:%S UTC")),
            None => write!(f, "#{}", self.number),
        }
    }
}

/// (user, token) pair that identifies one output row within a block.
///
/// Both addresses are lowercased on construction so that checksummed and
/// plain spellings of the same account collapse into one position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionKey {
    pub user: String,
    pub token: String,
}

impl PositionKey {
    pub fn new(user: &str, token: &str) -> Self {
        Self { user: user.to_lowercase(), token: token.to_lowercase() }
    }
}

/// One normalized output row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRow {
    pub block_number: u64,
    pub timestamp: u64,
    pub user_address: String,
    pub token_address: String,
    #[serde(serialize_with = "serialize_display")]
    pub token_balance: TokenAmount,
    pub token_symbol: String,
    #[serde(serialize_with = "serialize_display")]
    pub usd_price: f64,
}

impl OutputRow {
    pub const HEADER: [&'static str; 7] =
        ["block_number", "timestamp", "user_address", "token_address", "token_balance", "token_symbol", "usd_price"];
}

// Base-10 for balances, and `0` rather than `0.0` for whole prices.
fn serialize_display<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: std::fmt::Display,
    S: Serializer,
{
    serializer.collect_str(value)
}
