//! Position snapshot for one outcome token held by a wallet.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Current holding of a wallet in one market outcome.
///
/// Fetched fresh before every execution decision and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Wallet that holds the position
    pub wallet: String,

    /// Outcome token ID
    pub asset_id: String,

    /// Market condition ID
    pub market_id: String,

    /// Market title for display
    #[serde(default)]
    pub title: String,

    /// Outcome held (e.g., "Yes", "No")
    #[serde(default)]
    pub outcome: String,

    /// Number of outcome tokens held
    pub size: Decimal,

    /// Average entry price per token
    pub avg_price: Decimal,

    /// Current market price per token
    #[serde(default)]
    pub current_price: Decimal,

    /// Current market value in USDC
    #[serde(default)]
    pub current_value: Decimal,

    /// Unrealized P&L in USDC
    #[serde(default)]
    pub cash_pnl: Decimal,

    /// Whether the market has resolved and the position can be redeemed
    #[serde(default)]
    pub redeemable: bool,

    /// Market end date as reported by the API
    #[serde(default)]
    pub end_date: String,
}

impl Position {
    /// Whether any tokens are actually held.
    pub fn is_open(&self) -> bool {
        self.size > Decimal::ZERO
    }

    /// Find the position for an outcome token.
    pub fn find<'a>(positions: &'a [Position], asset_id: &str) -> Option<&'a Position> {
        positions.iter().find(|p| p.asset_id == asset_id)
    }
}
