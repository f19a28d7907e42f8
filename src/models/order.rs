//! Order book snapshots and the order requests/receipts exchanged with the venue.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TradeSide;

/// One price level of the order book.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Order book for one outcome token.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct OrderBook {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Highest bid. The CLOB does not guarantee level ordering, so scan all levels.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.iter().map(|l| l.price).max()
    }

    /// Lowest ask.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.iter().map(|l| l.price).min()
    }

    /// USDC resting on the bid side.
    pub fn bid_liquidity(&self) -> Decimal {
        side_value(&self.bids)
    }

    /// USDC resting on the ask side.
    pub fn ask_liquidity(&self) -> Decimal {
        side_value(&self.asks)
    }

    /// `(best_ask - best_bid) / best_ask`, or None when either side is empty.
    pub fn spread_fraction(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        ask.checked_sub(bid)?.checked_div(ask)
    }
}

fn side_value(levels: &[BookLevel]) -> Decimal {
    levels
        .iter()
        .fold(Decimal::ZERO, |acc, l| acc.saturating_add(l.price.saturating_mul(l.size)))
}

/// An immediate-or-cancel order to submit.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderRequest {
    /// Notional-denominated order: spend `amount` USDC (buy) at the best available price.
    Market {
        asset_id: String,
        side: TradeSide,
        amount: Decimal,
    },
    /// Price + size order, filled in full at `price` or better, or not at all.
    Limit {
        asset_id: String,
        side: TradeSide,
        price: Decimal,
        size: Decimal,
    },
}

impl OrderRequest {
    pub fn asset_id(&self) -> &str {
        match self {
            OrderRequest::Market { asset_id, .. } | OrderRequest::Limit { asset_id, .. } => asset_id,
        }
    }

    pub fn side(&self) -> TradeSide {
        match self {
            OrderRequest::Market { side, .. } | OrderRequest::Limit { side, .. } => *side,
        }
    }
}

/// Venue response to an order submission.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    #[serde(default, rename = "orderID", alias = "orderId")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error_msg: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "transactionsHashes")]
    pub transaction_hashes: Option<Vec<String>>,
}

impl OrderReceipt {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_msg: message.into(),
            ..Default::default()
        }
    }

    /// Whether the venue declined the order because of balance or allowance.
    pub fn is_balance_error(&self) -> bool {
        let msg = self.error_msg.to_lowercase();
        msg.contains("balance") || msg.contains("allowance") || msg.contains("insufficient")
    }
}
