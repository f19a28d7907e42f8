//! Trade activity observed on the watched wallet, plus its execution bookkeeping.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    /// Parse the side string used by the Data API. Unknown values yield `None`.
    pub fn from_api(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Some(TradeSide::Buy),
            "SELL" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of activity reported by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    Trade,
    Merge,
    Split,
    Redeem,
    Reward,
    Conversion,
    /// Anything the feed reports that we do not model; keeps the raw label.
    Other(String),
}

impl ActivityKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActivityKind::Trade => "TRADE",
            ActivityKind::Merge => "MERGE",
            ActivityKind::Split => "SPLIT",
            ActivityKind::Redeem => "REDEEM",
            ActivityKind::Reward => "REWARD",
            ActivityKind::Conversion => "CONVERSION",
            ActivityKind::Other(raw) => raw,
        }
    }

    pub fn from_api(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "TRADE" => ActivityKind::Trade,
            "MERGE" => ActivityKind::Merge,
            "SPLIT" => ActivityKind::Split,
            "REDEEM" => ActivityKind::Redeem,
            "REWARD" => ActivityKind::Reward,
            "CONVERSION" => ActivityKind::Conversion,
            _ => ActivityKind::Other(s.to_string()),
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution state of a queued activity.
///
/// Only `Pending` and `Succeeded` are ever persisted. `Failed` is the
/// effective state of a pending record whose retry budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Pending,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ExecutionStatus::Pending),
            "SUCCEEDED" => Ok(ExecutionStatus::Succeeded),
            "FAILED" => Ok(ExecutionStatus::Failed),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action taken by the watched wallet, as stored in the trade queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeActivity {
    /// Stable dedup key, unique per wallet
    pub id: String,

    /// Wallet that performed the activity
    pub wallet: String,

    /// Seconds since epoch
    pub timestamp: i64,

    /// Market condition ID
    pub market_id: String,

    /// Outcome token ID
    pub asset_id: String,

    pub kind: ActivityKind,

    /// Only meaningful for `ActivityKind::Trade`
    pub side: Option<TradeSide>,

    /// Number of outcome tokens
    pub size: Decimal,

    /// Quote-currency (USDC) value
    pub notional: Decimal,

    /// Price per token in USDC (0.0 to 1.0)
    pub price: Decimal,

    /// Outcome name, e.g. "Yes"
    #[serde(default)]
    pub outcome_label: String,

    #[serde(default)]
    pub outcome_index: i32,

    /// Market title for display
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub slug: String,

    #[serde(default)]
    pub transaction_hash: String,

    pub execution_status: ExecutionStatus,

    pub attempt_count: u32,
}

impl TradeActivity {
    /// Age of the activity in seconds relative to `now`.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp() - self.timestamp
    }

    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.timestamp, 0).single()
    }

    pub fn is_trade(&self) -> bool {
        self.kind == ActivityKind::Trade
    }

    /// Whether the executor may still pick this record up.
    pub fn is_eligible(&self, retry_limit: u32) -> bool {
        self.execution_status != ExecutionStatus::Succeeded && self.attempt_count < retry_limit
    }

    /// Status as reported to operators: a pending record with no retries left shows as failed.
    pub fn effective_status(&self, retry_limit: u32) -> ExecutionStatus {
        match self.execution_status {
            ExecutionStatus::Pending if self.attempt_count >= retry_limit => ExecutionStatus::Failed,
            status => status,
        }
    }
}
