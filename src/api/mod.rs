//! Polymarket API clients for data fetching and trade execution.
//!
//! The copy pipeline only sees the two traits below, so tests can swap the
//! HTTP clients for in-memory fakes.

mod auth;
mod clob_client;
mod data_client;
mod types;

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::CopyError;
use crate::models::{OrderBook, OrderReceipt, OrderRequest, Position, TradeActivity};

pub use auth::ApiCredentials;
pub use clob_client::{ClobClient, SignatureType, CLOB_URL};
pub use data_client::{DataClient, DATA_API_BASE, DEFAULT_RPC_URL, USDC_CONTRACT};

/// Read-only account data: activity feed, positions and spendable balance.
#[async_trait]
pub trait AccountData: Send + Sync {
    /// Most recent activity for `wallet`, newest first, at most `limit` items.
    async fn recent_activity(&self, wallet: &str, limit: u32) -> Result<Vec<TradeActivity>>;

    async fn positions(&self, wallet: &str) -> Result<Vec<Position>>;

    /// Spendable quote-currency balance.
    async fn balance(&self, wallet: &str) -> Result<Decimal>;
}

/// Order-execution venue.
#[async_trait]
pub trait OrderVenue: Send + Sync {
    async fn order_book(&self, asset_id: &str) -> Result<OrderBook>;

    async fn last_trade_price(&self, asset_id: &str) -> Result<Decimal>;

    /// Submit an immediate-or-cancel order. A venue-side rejection is an
    /// unsuccessful receipt, not an `Err`.
    async fn submit(&self, order: &OrderRequest) -> Result<OrderReceipt>;
}

/// Run a read against an external service, bounded by `limit`.
pub async fn timed_fetch<T>(
    operation: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T, CopyError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(CopyError::fetch),
        Err(_) => Err(CopyError::Timeout {
            operation,
            secs: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timed_fetch() {
        let ok = timed_fetch("balance", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(tokio_test::assert_ok!(ok), 7);

        let err = timed_fetch::<()>("positions", Duration::from_secs(1), async {
            Err(anyhow::anyhow!("503"))
        })
        .await;
        assert!(matches!(err, Err(CopyError::Fetch(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_fetch_times_out() {
        let err = timed_fetch::<()>("activity", Duration::from_secs(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        match err {
            Err(CopyError::Timeout { operation, secs }) => {
                assert_eq!(operation, "activity");
                assert_eq!(secs, 10);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
