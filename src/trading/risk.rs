//! Optional caps and market guards applied to a sized buy before it is submitted.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::OrderBook;

/// Caps on a single copy buy. All are off by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RiskLimits {
    /// Largest notional for one copy (USDC)
    pub max_trade_notional: Option<Decimal>,

    /// Largest share of the follower balance one copy may use (0.0 to 1.0)
    pub max_concentration: Option<Decimal>,

    /// Widest tolerated bid/ask spread as a fraction of the best ask
    pub max_spread: Option<Decimal>,

    /// Smallest USDC depth required on each side of the book
    pub min_liquidity: Option<Decimal>,
}

/// Outcome of a risk check.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskCheck {
    pub approved: bool,
    pub reasons: Vec<String>,
    pub suggested_size: Decimal,
}

impl RiskLimits {
    pub fn is_enabled(&self) -> bool {
        self.max_trade_notional.is_some() || self.max_concentration.is_some()
    }

    pub fn guards_liquidity(&self) -> bool {
        self.max_spread.is_some() || self.min_liquidity.is_some()
    }

    /// Reject a book that is one-sided, too thin, or too wide.
    pub fn check_liquidity(&self, book: &OrderBook) -> Result<(), String> {
        if let Some(min) = self.min_liquidity {
            let bids = book.bid_liquidity();
            let asks = book.ask_liquidity();
            if bids < min || asks < min {
                return Err(format!(
                    "book depth {}/{} below {}",
                    bids.round_dp(2),
                    asks.round_dp(2),
                    min
                ));
            }
        }

        if let Some(max) = self.max_spread {
            match book.spread_fraction() {
                Some(spread) if spread <= max => {}
                Some(spread) => {
                    return Err(format!("spread {} exceeds {}", spread.round_dp(4), max));
                }
                None => return Err("order book is one-sided".to_string()),
            }
        }

        Ok(())
    }

    /// Shrink `copy_notional` to the configured caps. Rejected only when the
    /// capped size drops below `dust_floor`.
    pub fn check_buy(&self, copy_notional: Decimal, balance: Decimal, dust_floor: Decimal) -> RiskCheck {
        let mut reasons = Vec::new();
        let mut size = copy_notional;

        if let Some(max) = self.max_trade_notional {
            if size > max {
                reasons.push(format!("notional {} capped at {}", size.round_dp(4), max));
                size = max;
            }
        }

        if let Some(fraction) = self.max_concentration {
            let cap = balance * fraction;
            if size > cap {
                reasons.push(format!(
                    "notional {} exceeds {}% of balance {}",
                    size.round_dp(4),
                    (fraction * Decimal::ONE_HUNDRED).normalize(),
                    balance
                ));
                size = cap;
            }
        }

        let approved = size >= dust_floor;
        if !approved {
            reasons.push(format!("capped size {} below minimum {}", size.round_dp(4), dust_floor));
        }

        RiskCheck {
            approved,
            reasons,
            suggested_size: size,
        }
    }
}
