//! Bot runner: wires the clients, the queue and the two copy loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::api::{AccountData, ClobClient, DataClient, OrderVenue};
use crate::config::CopyConfig;
use crate::db::Database;
use crate::executor::{ExecutorConfig, TradeExecutor};
use crate::monitor::{ActivityMonitor, MonitorConfig};
use crate::queue::TradeQueue;
use crate::trading::Sizer;

/// Main bot runner.
pub struct Bot {
    config: CopyConfig,
    account: Arc<dyn AccountData>,
    venue: Arc<dyn OrderVenue>,
    queue: Arc<TradeQueue>,
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    /// Build the HTTP clients for a validated configuration.
    pub fn new(config: CopyConfig, db: Database) -> Result<Self> {
        let data_client = DataClient::new(
            &config.data_api_url,
            &config.rpc_url,
            &config.usdc_contract,
            config.request_timeout,
        )?;

        let mut clob_client = ClobClient::new(&config.clob_url, config.chain_id, config.request_timeout)?
            .with_dry_run(config.dry_run);
        if let Some(creds) = &config.credentials {
            clob_client = clob_client
                .with_signer(
                    &creds.private_key,
                    &config.follower_wallet,
                    config.signature_type,
                    creds.api.clone(),
                )
                .context("Failed to configure CLOB signer")?;
            info!(address = ?clob_client.address(), "CLOB client initialized");
        }

        let queue = Arc::new(TradeQueue::new(db, config.retry_limit));
        Ok(Self::from_parts(
            config,
            Arc::new(data_client),
            Arc::new(clob_client),
            queue,
        ))
    }

    pub fn from_parts(
        config: CopyConfig,
        account: Arc<dyn AccountData>,
        venue: Arc<dyn OrderVenue>,
        queue: Arc<TradeQueue>,
    ) -> Self {
        Self {
            config,
            account,
            venue,
            queue,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run the monitor and executor until Ctrl+C or the shutdown signal.
    pub async fn run(self) -> Result<()> {
        info!(
            target_wallet = %self.config.target_wallet,
            follower_wallet = %self.config.follower_wallet,
            dry_run = self.config.dry_run,
            "Starting copy-trading bot"
        );

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        let monitor = ActivityMonitor::new(
            self.account.clone(),
            self.queue.clone(),
            MonitorConfig {
                wallet: self.config.target_wallet.clone(),
                fetch_interval: self.config.fetch_interval,
                staleness_window_secs: self.config.staleness_window_secs,
                page_size: self.config.page_size,
                request_timeout: self.config.request_timeout,
            },
        );

        let executor = TradeExecutor::new(
            self.account.clone(),
            self.venue.clone(),
            self.queue.clone(),
            Sizer::new(self.config.sizing.clone()),
            self.config.risk.clone(),
            ExecutorConfig {
                target_wallet: self.config.target_wallet.clone(),
                follower_wallet: self.config.follower_wallet.clone(),
                interval: self.config.executor_interval,
                request_timeout: self.config.request_timeout,
            },
        );

        let monitor_task = tokio::spawn(monitor.run(self.shutdown.clone()));
        let executor_task = tokio::spawn(executor.run(self.shutdown.clone()));

        let (monitor_result, executor_result) = tokio::join!(monitor_task, executor_task);
        monitor_result.context("Monitor task panicked")?;
        executor_result.context("Executor task panicked")?;

        match self.queue.stats(&self.config.target_wallet).await {
            Ok(stats) => info!(
                total = stats.total,
                succeeded = stats.succeeded,
                pending = stats.pending,
                exhausted = stats.exhausted,
                "Bot shutdown complete"
            ),
            Err(e) => error!(error = %e, "Failed to read queue stats at shutdown"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunArgs;
    use crate::models::{ExecutionStatus, TradeSide};
    use crate::testing::{trade, FakeAccount, FakeVenue, FOLLOWER, TARGET};
    use chrono::Utc;
    use clap::Parser;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RunArgs,
    }

    fn dry_run_config() -> CopyConfig {
        let mut config = TestCli::try_parse_from([
            "test",
            "--target-wallet",
            TARGET,
            "--follower-wallet",
            FOLLOWER,
            "--dry-run",
        ])
        .unwrap()
        .args
        .validate()
        .unwrap();
        config.fetch_interval = Duration::from_millis(20);
        config.executor_interval = Duration::from_millis(20);
        config
    }

    #[tokio::test]
    async fn test_new_builds_clients() {
        let db = Database::in_memory().await.unwrap();
        assert!(Bot::new(dry_run_config(), db).is_ok());
    }

    #[tokio::test]
    async fn test_observed_trade_is_copied() {
        let account = Arc::new(FakeAccount::default());
        let venue = Arc::new(FakeVenue::default());
        let queue = Arc::new(TradeQueue::new(Database::in_memory().await.unwrap(), 3));
        account.set_balance(FOLLOWER, dec!(100));

        let bot = Bot::from_parts(dry_run_config(), account.clone(), venue.clone(), queue.clone());
        let shutdown = bot.shutdown_signal();
        let handle = tokio::spawn(bot.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        account.set_activity(vec![trade("a1", TradeSide::Buy, Utc::now().timestamp())]);
        tokio::time::sleep(Duration::from_millis(300)).await;

        shutdown.store(true, Ordering::SeqCst);
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        tokio_test::assert_ok!(tokio_test::assert_ok!(tokio_test::assert_ok!(result)));

        assert_eq!(venue.submitted().len(), 1);
        let records = queue.all_records(TARGET).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].execution_status, ExecutionStatus::Succeeded);
    }
}
