//! Maps an observed activity to the copy action the follower should take.

use rust_decimal::Decimal;

use crate::models::{ActivityKind, TradeActivity, TradeSide};

/// What to do about one queued activity.
#[derive(Debug, Clone, PartialEq)]
pub enum CopyAction {
    /// Buy into the outcome the target bought, scaled from the target's notional.
    Buy { notional: Decimal, price: Decimal },
    /// Sell up to the number of shares the target sold.
    Sell { size: Decimal, price: Decimal },
    /// Close the follower's whole position in the outcome.
    Merge,
    /// Nothing to copy; the record counts as handled.
    Skip { kind: String },
}

impl CopyAction {
    pub fn label(&self) -> &'static str {
        match self {
            CopyAction::Buy { .. } => "BUY",
            CopyAction::Sell { .. } => "SELL",
            CopyAction::Merge => "MERGE",
            CopyAction::Skip { .. } => "SKIP",
        }
    }
}

/// Total over every activity: each one maps to exactly one action.
pub fn resolve(activity: &TradeActivity) -> CopyAction {
    match (&activity.kind, activity.side) {
        (ActivityKind::Merge, _) => CopyAction::Merge,
        (ActivityKind::Trade, Some(TradeSide::Buy)) => CopyAction::Buy {
            notional: activity.notional,
            price: activity.price,
        },
        (ActivityKind::Trade, Some(TradeSide::Sell)) => CopyAction::Sell {
            size: activity.size,
            price: activity.price,
        },
        (ActivityKind::Trade, None) => CopyAction::Skip {
            kind: "TRADE without side".to_string(),
        },
        (kind, _) => CopyAction::Skip {
            kind: kind.to_string(),
        },
    }
}
