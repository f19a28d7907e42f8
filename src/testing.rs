//! In-memory stand-ins for the Data API and the CLOB.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::api::{AccountData, OrderVenue};
use crate::models::{
    ActivityKind, BookLevel, ExecutionStatus, OrderBook, OrderReceipt, OrderRequest, Position,
    TradeActivity, TradeSide,
};

pub const TARGET: &str = "0x1111111111111111111111111111111111111111";
pub const FOLLOWER: &str = "0x2222222222222222222222222222222222222222";
pub const ASSET: &str = "asset-1";

pub fn trade(id: &str, side: TradeSide, timestamp: i64) -> TradeActivity {
    TradeActivity {
        id: id.to_string(),
        wallet: TARGET.to_string(),
        timestamp,
        market_id: "0xmarket".to_string(),
        asset_id: ASSET.to_string(),
        kind: ActivityKind::Trade,
        side: Some(side),
        size: dec!(40),
        notional: dec!(20),
        price: dec!(0.5),
        outcome_label: "Yes".to_string(),
        outcome_index: 0,
        title: "Test Market".to_string(),
        slug: "test-market".to_string(),
        transaction_hash: String::new(),
        execution_status: ExecutionStatus::Pending,
        attempt_count: 0,
    }
}

pub fn position(wallet: &str, asset_id: &str, size: Decimal) -> Position {
    Position {
        wallet: wallet.to_string(),
        asset_id: asset_id.to_string(),
        market_id: "0xmarket".to_string(),
        title: "Test Market".to_string(),
        outcome: "Yes".to_string(),
        size,
        avg_price: dec!(0.5),
        current_price: dec!(0.5),
        current_value: size * dec!(0.5),
        cash_pnl: Decimal::ZERO,
        redeemable: false,
        end_date: String::new(),
    }
}

pub fn book(bids: &[Decimal], asks: &[Decimal]) -> OrderBook {
    let level = |price: &Decimal| BookLevel {
        price: *price,
        size: dec!(1000),
    };
    OrderBook {
        bids: bids.iter().map(level).collect(),
        asks: asks.iter().map(level).collect(),
    }
}

#[derive(Default)]
pub struct FakeAccount {
    pub activity: Mutex<Vec<TradeActivity>>,
    pub positions: Mutex<HashMap<String, Vec<Position>>>,
    pub balances: Mutex<HashMap<String, Decimal>>,
    pub fail_activity: AtomicBool,
    pub fail_positions: AtomicBool,
    pub activity_calls: AtomicUsize,
}

impl FakeAccount {
    pub fn set_activity(&self, items: Vec<TradeActivity>) {
        *self.activity.lock().unwrap() = items;
    }

    pub fn set_balance(&self, wallet: &str, balance: Decimal) {
        self.balances.lock().unwrap().insert(wallet.to_string(), balance);
    }

    pub fn set_positions(&self, wallet: &str, positions: Vec<Position>) {
        self.positions.lock().unwrap().insert(wallet.to_string(), positions);
    }
}

#[async_trait]
impl AccountData for FakeAccount {
    async fn recent_activity(&self, _wallet: &str, limit: u32) -> Result<Vec<TradeActivity>> {
        self.activity_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_activity.load(Ordering::SeqCst) {
            bail!("activity request failed: 503 Service Unavailable");
        }
        let items = self.activity.lock().unwrap();
        Ok(items.iter().take(limit as usize).cloned().collect())
    }

    async fn positions(&self, wallet: &str) -> Result<Vec<Position>> {
        if self.fail_positions.load(Ordering::SeqCst) {
            bail!("positions request failed: 500 Internal Server Error");
        }
        Ok(self
            .positions
            .lock()
            .unwrap()
            .get(wallet)
            .cloned()
            .unwrap_or_default())
    }

    async fn balance(&self, wallet: &str) -> Result<Decimal> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(wallet)
            .copied()
            .unwrap_or_default())
    }
}

/// Venue that records every submission and answers from a script of receipts.
#[derive(Default)]
pub struct FakeVenue {
    pub books: Mutex<HashMap<String, OrderBook>>,
    pub last_prices: Mutex<HashMap<String, Decimal>>,
    pub receipts: Mutex<VecDeque<OrderReceipt>>,
    pub submitted: Mutex<Vec<OrderRequest>>,
    pub fail_book: AtomicBool,
    pub fail_submit: AtomicBool,
}

impl FakeVenue {
    pub fn set_book(&self, asset_id: &str, book: OrderBook) {
        self.books.lock().unwrap().insert(asset_id.to_string(), book);
    }

    pub fn set_last_price(&self, asset_id: &str, price: Decimal) {
        self.last_prices.lock().unwrap().insert(asset_id.to_string(), price);
    }

    /// Queue the receipts for the next submissions; once drained every order fills.
    pub fn script(&self, receipts: Vec<OrderReceipt>) {
        self.receipts.lock().unwrap().extend(receipts);
    }

    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.submitted.lock().unwrap().clone()
    }
}

pub fn filled() -> OrderReceipt {
    OrderReceipt {
        order_id: Some("order-1".to_string()),
        success: true,
        status: Some("matched".to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl OrderVenue for FakeVenue {
    async fn order_book(&self, asset_id: &str) -> Result<OrderBook> {
        if self.fail_book.load(Ordering::SeqCst) {
            bail!("Failed to get order book: 502 Bad Gateway");
        }
        Ok(self
            .books
            .lock()
            .unwrap()
            .get(asset_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn last_trade_price(&self, asset_id: &str) -> Result<Decimal> {
        match self.last_prices.lock().unwrap().get(asset_id) {
            Some(price) => Ok(*price),
            None => bail!("no trades for {}", asset_id),
        }
    }

    async fn submit(&self, order: &OrderRequest) -> Result<OrderReceipt> {
        self.submitted.lock().unwrap().push(order.clone());
        if self.fail_submit.load(Ordering::SeqCst) {
            bail!("Failed to post order: connection reset");
        }
        Ok(self.receipts.lock().unwrap().pop_front().unwrap_or_else(filled))
    }
}
