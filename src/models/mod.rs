//! Data models for activities, positions, and orders.

mod activity;
mod order;
mod position;

pub use activity::{ActivityKind, ExecutionStatus, TradeActivity, TradeSide};
pub use order::{BookLevel, OrderBook, OrderReceipt, OrderRequest};
pub use position::Position;
