//! Trade executor: drains the queue, copies each pending trade, records the outcome.
//!
//! A record is marked succeeded when an order fills or a guard decides there
//! is nothing to copy. Any `CopyError` counts as one failed attempt.
//! Outcome writes are retried with backoff; a handled record whose outcome
//! could not be stored is held in memory and never executed twice.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::future::retry;
use backoff::ExponentialBackoff;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::{timed_fetch, AccountData, OrderVenue};
use crate::error::{CopyError, SkipReason};
use crate::models::{OrderReceipt, OrderRequest, Position, TradeActivity, TradeSide};
use crate::queue::TradeQueue;
use crate::trading::{resolve, CopyAction, RiskLimits, Sizer};

const OUTCOME_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Wallet being copied
    pub target_wallet: String,

    /// Wallet placing the copies
    pub follower_wallet: String,

    /// Time between queue scans
    pub interval: Duration,

    /// Upper bound on every external call
    pub request_timeout: Duration,
}

/// How a record was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Filled {
        order: OrderRequest,
        receipt: OrderReceipt,
    },
    Skipped(SkipReason),
}

/// Counts for one pass over the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub filled: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Fresh account state for both wallets.
struct Snapshot {
    my_positions: Vec<Position>,
    target_positions: Vec<Position>,
    my_balance: Decimal,
    target_balance: Decimal,
}

impl Snapshot {
    fn my_size(&self, asset_id: &str) -> Decimal {
        Position::find(&self.my_positions, asset_id)
            .map(|p| p.size)
            .unwrap_or(Decimal::ZERO)
    }

    fn target_size(&self, asset_id: &str) -> Decimal {
        Position::find(&self.target_positions, asset_id)
            .map(|p| p.size)
            .unwrap_or(Decimal::ZERO)
    }
}

pub struct TradeExecutor {
    account: Arc<dyn AccountData>,
    venue: Arc<dyn OrderVenue>,
    queue: Arc<TradeQueue>,
    sizer: Sizer,
    risk: RiskLimits,
    config: ExecutorConfig,
    /// Handled records whose outcome is not yet stored
    unrecorded: Mutex<HashSet<String>>,
}

impl TradeExecutor {
    pub fn new(
        account: Arc<dyn AccountData>,
        venue: Arc<dyn OrderVenue>,
        queue: Arc<TradeQueue>,
        sizer: Sizer,
        risk: RiskLimits,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            account,
            venue,
            queue,
            sizer,
            risk,
            config,
            unrecorded: Mutex::new(HashSet::new()),
        }
    }

    /// Handle every pending record once, in queue order.
    pub async fn process_pending(&self) -> BatchSummary {
        let wallet = &self.config.target_wallet;
        let records = self.queue.pending_records(wallet).await;
        let mut summary = BatchSummary::default();

        if !records.is_empty() {
            debug!(count = records.len(), "Processing pending trades");
        }

        for record in records {
            if self.unrecorded.lock().await.contains(&record.id) {
                if self.persist_outcome(&record.id, true).await {
                    self.unrecorded.lock().await.remove(&record.id);
                }
                continue;
            }

            let success = match self.execute(&record).await {
                Ok(ExecutionOutcome::Filled { order, receipt }) => {
                    info!(
                        id = %record.id,
                        asset = %order.asset_id(),
                        side = %order.side(),
                        order_id = receipt.order_id.as_deref().unwrap_or("-"),
                        "Copy order filled"
                    );
                    summary.filled += 1;
                    true
                }
                Ok(ExecutionOutcome::Skipped(reason)) => {
                    info!(id = %record.id, reason = %reason, "Copy skipped");
                    summary.skipped += 1;
                    true
                }
                Err(e) => {
                    warn!(
                        id = %record.id,
                        attempt = record.attempt_count + 1,
                        retry_limit = self.queue.retry_limit(),
                        error = %e,
                        "Copy attempt failed"
                    );
                    summary.failed += 1;
                    false
                }
            };

            if !self.persist_outcome(&record.id, success).await && success {
                self.unrecorded.lock().await.insert(record.id.clone());
            }
        }

        summary
    }

    /// Store an outcome, retrying store failures for up to the request timeout.
    async fn persist_outcome(&self, id: &str, success: bool) -> bool {
        let wallet = self.config.target_wallet.as_str();
        let policy = ExponentialBackoff {
            initial_interval: OUTCOME_RETRY_INTERVAL,
            max_elapsed_time: Some(self.config.request_timeout),
            ..Default::default()
        };

        let queue = &self.queue;
        let result = retry(policy, || async move {
            queue.record_outcome(wallet, id, success).await.map_err(|e| {
                warn!(id, error = %e, "Outcome write failed, retrying");
                backoff::Error::transient(e)
            })
        })
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(id, success, error = %e, "Failed to record outcome");
                false
            }
        }
    }

    /// Resolve, size and submit the copy for one record.
    pub async fn execute(&self, record: &TradeActivity) -> Result<ExecutionOutcome, CopyError> {
        let action = resolve(record);
        debug!(id = %record.id, action = action.label(), "Resolved copy action");

        if let CopyAction::Skip { kind } = &action {
            return Ok(ExecutionOutcome::Skipped(SkipReason::Unsupported(kind.clone())));
        }

        let snapshot = self.snapshot().await?;
        debug!(
            id = %record.id,
            my_balance = %snapshot.my_balance,
            target_balance = %snapshot.target_balance,
            my_size = %snapshot.my_size(&record.asset_id),
            target_size = %snapshot.target_size(&record.asset_id),
            "Fetched account snapshot"
        );

        match action {
            CopyAction::Buy { notional, price } => self.copy_buy(record, &snapshot, notional, price).await,
            CopyAction::Sell { size, price } => self.copy_sell(record, &snapshot, size, price).await,
            CopyAction::Merge => self.copy_merge(record, &snapshot).await,
            CopyAction::Skip { kind } => Ok(ExecutionOutcome::Skipped(SkipReason::Unsupported(kind))),
        }
    }

    async fn snapshot(&self) -> Result<Snapshot, CopyError> {
        let limit = self.config.request_timeout;
        let me = self.config.follower_wallet.as_str();
        let target = self.config.target_wallet.as_str();

        let (my_positions, target_positions, my_balance, target_balance) = futures::try_join!(
            timed_fetch("follower positions", limit, self.account.positions(me)),
            timed_fetch("target positions", limit, self.account.positions(target)),
            timed_fetch("follower balance", limit, self.account.balance(me)),
            timed_fetch("target balance", limit, self.account.balance(target)),
        )?;

        Ok(Snapshot {
            my_positions,
            target_positions,
            my_balance,
            target_balance,
        })
    }

    async fn copy_buy(
        &self,
        record: &TradeActivity,
        snapshot: &Snapshot,
        notional: Decimal,
        trade_price: Decimal,
    ) -> Result<ExecutionOutcome, CopyError> {
        if trade_price <= Decimal::ZERO {
            return Ok(ExecutionOutcome::Skipped(SkipReason::InvalidPrice(trade_price)));
        }

        let mut amount = match self
            .sizer
            .size_buy(snapshot.my_balance, snapshot.target_balance, notional)
        {
            Ok(amount) => amount,
            Err(reason) => return Ok(ExecutionOutcome::Skipped(reason)),
        };

        if self.risk.is_enabled() {
            let check = self
                .risk
                .check_buy(amount, snapshot.my_balance, self.sizer.config().dust_floor);
            if !check.approved {
                return Ok(ExecutionOutcome::Skipped(SkipReason::RiskRejected(
                    check.reasons.join("; "),
                )));
            }
            if !check.reasons.is_empty() {
                info!(id = %record.id, reasons = ?check.reasons, "Risk limits reduced copy size");
            }
            amount = check.suggested_size;
        }

        let current_price = match timed_fetch(
            "last trade price",
            self.config.request_timeout,
            self.venue.last_trade_price(&record.asset_id),
        )
        .await
        {
            Ok(price) => price,
            Err(e) => {
                warn!(id = %record.id, error = %e, "No current price, using trade price");
                trade_price
            }
        };

        if let Err(reason) = self.sizer.check_price_drift(trade_price, current_price) {
            return Ok(ExecutionOutcome::Skipped(reason));
        }

        if self.risk.guards_liquidity() {
            let book = timed_fetch(
                "order book",
                self.config.request_timeout,
                self.venue.order_book(&record.asset_id),
            )
            .await?;
            if let Err(reason) = self.risk.check_liquidity(&book) {
                return Ok(ExecutionOutcome::Skipped(SkipReason::RiskRejected(reason)));
            }
        }

        let order = OrderRequest::Market {
            asset_id: record.asset_id.clone(),
            side: TradeSide::Buy,
            amount,
        };
        self.submit_once(order).await
    }

    async fn copy_sell(
        &self,
        record: &TradeActivity,
        snapshot: &Snapshot,
        trade_size: Decimal,
        trade_price: Decimal,
    ) -> Result<ExecutionOutcome, CopyError> {
        let amount = match self
            .sizer
            .size_sell(&record.asset_id, trade_size, snapshot.my_size(&record.asset_id))
        {
            Ok(amount) => amount,
            Err(reason) => return Ok(ExecutionOutcome::Skipped(reason)),
        };

        let price = match timed_fetch(
            "order book",
            self.config.request_timeout,
            self.venue.order_book(&record.asset_id),
        )
        .await
        {
            Ok(book) => match book.best_bid() {
                Some(bid) => bid,
                None => {
                    warn!(id = %record.id, "No bids, selling at trade price");
                    trade_price
                }
            },
            Err(e) => {
                warn!(id = %record.id, error = %e, "Order book unavailable, selling at trade price");
                trade_price
            }
        };

        if price <= Decimal::ZERO {
            return Ok(ExecutionOutcome::Skipped(SkipReason::InvalidPrice(price)));
        }

        let order = OrderRequest::Limit {
            asset_id: record.asset_id.clone(),
            side: TradeSide::Sell,
            price,
            size: amount,
        };
        let receipt = self.submit(&order).await?;
        if receipt.success {
            return Ok(ExecutionOutcome::Filled { order, receipt });
        }

        if !receipt.is_balance_error() {
            return Err(CopyError::OrderRejected(receipt.error_msg));
        }

        let retry_size = self.sizer.retry_amount(amount);
        info!(
            id = %record.id,
            size = %retry_size,
            error = %receipt.error_msg,
            "Balance rejection, retrying sell at reduced size"
        );

        let retry = OrderRequest::Limit {
            asset_id: record.asset_id.clone(),
            side: TradeSide::Sell,
            price,
            size: retry_size,
        };
        self.submit_once(retry).await
    }

    async fn copy_merge(&self, record: &TradeActivity, snapshot: &Snapshot) -> Result<ExecutionOutcome, CopyError> {
        let amount = match self
            .sizer
            .size_merge(&record.asset_id, snapshot.my_size(&record.asset_id))
        {
            Ok(amount) => amount,
            Err(reason) => return Ok(ExecutionOutcome::Skipped(reason)),
        };

        let book = timed_fetch(
            "order book",
            self.config.request_timeout,
            self.venue.order_book(&record.asset_id),
        )
        .await?;
        let bid = book
            .best_bid()
            .ok_or_else(|| CopyError::EmptyOrderBook(record.asset_id.clone()))?;

        let order = OrderRequest::Limit {
            asset_id: record.asset_id.clone(),
            side: TradeSide::Sell,
            price: bid,
            size: amount,
        };
        self.submit_once(order).await
    }

    /// Submit without retry; a rejection is a failed attempt.
    async fn submit_once(&self, order: OrderRequest) -> Result<ExecutionOutcome, CopyError> {
        let receipt = self.submit(&order).await?;
        if receipt.success {
            Ok(ExecutionOutcome::Filled { order, receipt })
        } else {
            Err(CopyError::OrderRejected(receipt.error_msg))
        }
    }

    async fn submit(&self, order: &OrderRequest) -> Result<OrderReceipt, CopyError> {
        debug!(order = ?order, "Submitting copy order");

        match tokio::time::timeout(self.config.request_timeout, self.venue.submit(order)).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(e)) => Err(CopyError::OrderRejected(format!("{e:#}"))),
            Err(_) => Err(CopyError::Timeout {
                operation: "order submission",
                secs: self.config.request_timeout.as_secs(),
            }),
        }
    }

    /// Scan the queue until `shutdown` is set. An in-flight pass always completes.
    pub async fn run(self, shutdown: Arc<AtomicBool>) {
        info!(
            target_wallet = %self.config.target_wallet,
            follower_wallet = %self.config.follower_wallet,
            interval_secs = self.config.interval.as_secs(),
            "Starting trade executor"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            let summary = self.process_pending().await;
            if summary != BatchSummary::default() {
                info!(
                    filled = summary.filled,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "Executor pass complete"
                );
            }
        }

        info!("Trade executor stopped");
    }
}
