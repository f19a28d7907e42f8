//! Proportional copy sizing with guard rails.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::SkipReason;

/// Thresholds used to size copy orders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SizingConfig {
    /// Follower balance below which no buy is attempted (USDC)
    pub min_balance: Decimal,

    /// Smallest buy worth submitting (USDC)
    pub dust_floor: Decimal,

    /// Largest tolerated relative move between the observed and current price
    pub max_price_drift: Decimal,

    /// Fraction of the computed share amount actually sold
    pub sell_buffer: Decimal,

    /// Smallest sell worth submitting (shares)
    pub min_sell_size: Decimal,

    /// Fraction of the amount retried after a balance-related rejection
    pub balance_retry_factor: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            min_balance: dec!(1),
            dust_floor: dec!(0.1),
            max_price_drift: dec!(0.10),
            sell_buffer: dec!(0.999),
            min_sell_size: dec!(0.01),
            balance_retry_factor: dec!(0.95),
        }
    }
}

/// Calculator for copy order sizes.
#[derive(Debug, Clone, Default)]
pub struct Sizer {
    config: SizingConfig,
}

impl Sizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Notional to buy when the target spent `notional` holding `target_balance`.
    ///
    /// `ratio = min(B / (T + N), 1)` and `copy = N * ratio`, so the copy never
    /// exceeds either the target's notional or the follower's balance.
    pub fn size_buy(
        &self,
        my_balance: Decimal,
        target_balance: Decimal,
        notional: Decimal,
    ) -> Result<Decimal, SkipReason> {
        if my_balance < self.config.min_balance {
            return Err(SkipReason::InsufficientFunds {
                balance: my_balance,
                minimum: self.config.min_balance,
            });
        }

        let notional = notional.max(Decimal::ZERO);
        let ratio = target_balance
            .max(Decimal::ZERO)
            .checked_add(notional)
            .and_then(|total| my_balance.checked_div(total))
            .map(|r| r.min(Decimal::ONE))
            .unwrap_or(Decimal::ZERO);
        let copy_notional = notional
            .checked_mul(ratio)
            .unwrap_or(Decimal::ZERO)
            .min(my_balance);

        if copy_notional < self.config.dust_floor {
            return Err(SkipReason::BelowMinimum {
                amount: copy_notional,
                minimum: self.config.dust_floor,
            });
        }

        Ok(copy_notional)
    }

    /// Reject a buy whose market moved more than the allowed drift since the trade.
    pub fn check_price_drift(&self, trade_price: Decimal, current_price: Decimal) -> Result<(), SkipReason> {
        if trade_price <= Decimal::ZERO {
            return Err(SkipReason::InvalidPrice(trade_price));
        }

        // Unrepresentable drift counts as stale
        let drift = current_price
            .checked_sub(trade_price)
            .and_then(|delta| delta.checked_div(trade_price))
            .map(|d| d.abs());
        if drift.map_or(true, |d| d > self.config.max_price_drift) {
            return Err(SkipReason::StaleQuote {
                trade_price,
                current_price,
            });
        }

        Ok(())
    }

    /// Shares to sell: the smaller of what the target sold and what we hold, less the buffer.
    pub fn size_sell(
        &self,
        asset_id: &str,
        trade_size: Decimal,
        my_size: Decimal,
    ) -> Result<Decimal, SkipReason> {
        if my_size <= Decimal::ZERO {
            return Err(SkipReason::InsufficientPosition {
                asset_id: asset_id.to_string(),
            });
        }

        self.buffered(trade_size.min(my_size))
    }

    /// Shares to sell when closing the whole position.
    pub fn size_merge(&self, asset_id: &str, my_size: Decimal) -> Result<Decimal, SkipReason> {
        if my_size <= Decimal::ZERO {
            return Err(SkipReason::InsufficientPosition {
                asset_id: asset_id.to_string(),
            });
        }

        self.buffered(my_size)
    }

    /// Amount for the single retry after a balance-related rejection.
    pub fn retry_amount(&self, amount: Decimal) -> Decimal {
        amount * self.config.balance_retry_factor
    }

    fn buffered(&self, size: Decimal) -> Result<Decimal, SkipReason> {
        let amount = size * self.config.sell_buffer;
        if amount < self.config.min_sell_size {
            return Err(SkipReason::BelowMinimum {
                amount,
                minimum: self.config.min_sell_size,
            });
        }
        Ok(amount)
    }
}
