//! Failure and skip taxonomy for the copy pipeline.
//!
//! `CopyError` is the retryable side: the executor records a failed attempt
//! and the record stays in the queue until its retry budget runs out.
//! `SkipReason` is the handled side: the record is marked done and no order
//! is submitted.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CopyError {
    /// Feed, position, balance or price read failed.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Record store unreadable or corrupt.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Venue declined the order, or the submission never reached it.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("no bids available for asset {0}")]
    EmptyOrderBook(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    /// Startup validation failure; the only fatal error.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CopyError {
    pub fn fetch(err: anyhow::Error) -> Self {
        CopyError::Fetch(format!("{err:#}"))
    }

    pub fn persistence(err: anyhow::Error) -> Self {
        CopyError::Persistence(format!("{err:#}"))
    }
}

/// Pre-submission guard that trips: the record counts as handled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("insufficient balance: {balance} < {minimum}")]
    InsufficientFunds { balance: Decimal, minimum: Decimal },

    #[error("no position held in asset {asset_id}")]
    InsufficientPosition { asset_id: String },

    #[error("amount {amount} below minimum {minimum}")]
    BelowMinimum { amount: Decimal, minimum: Decimal },

    #[error("price drifted from {trade_price} to {current_price}")]
    StaleQuote {
        trade_price: Decimal,
        current_price: Decimal,
    },

    #[error("trade price {0} is not positive")]
    InvalidPrice(Decimal),

    #[error("risk limits rejected the trade: {0}")]
    RiskRejected(String),

    #[error("no copy strategy for activity kind {0}")]
    Unsupported(String),
}
