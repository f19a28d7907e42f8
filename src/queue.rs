//! Durable trade queue.
//!
//! Each wallet's log has exactly one owner task. Every read and write for that
//! wallet goes through the owner's channel, so the monitor and executor never
//! race on the same log.

use std::collections::HashMap;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::db::{Database, QueueStats};
use crate::error::CopyError;
use crate::models::TradeActivity;

const OWNER_CHANNEL_CAPACITY: usize = 64;

enum QueueCommand {
    Append {
        records: Vec<TradeActivity>,
        reply: oneshot::Sender<Result<usize>>,
    },
    Pending {
        reply: oneshot::Sender<Result<Vec<TradeActivity>>>,
    },
    All {
        reply: oneshot::Sender<Result<Vec<TradeActivity>>>,
    },
    RecordOutcome {
        id: String,
        success: bool,
        reply: oneshot::Sender<Result<bool>>,
    },
}

/// Canonical form of a wallet address used as the log key.
pub fn wallet_key(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Persisted per-wallet queue of observed trades.
pub struct TradeQueue {
    db: Database,
    retry_limit: u32,
    owners: Mutex<HashMap<String, mpsc::Sender<QueueCommand>>>,
}

impl TradeQueue {
    pub fn new(db: Database, retry_limit: u32) -> Self {
        Self {
            db,
            retry_limit,
            owners: Mutex::new(HashMap::new()),
        }
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Merge new records into the wallet's log. Ids already present are ignored.
    /// Returns the number of records actually added.
    pub async fn append(&self, wallet: &str, records: Vec<TradeActivity>) -> Result<usize, CopyError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.request(wallet, |reply| QueueCommand::Append { records, reply })
            .await
    }

    /// Records not yet succeeded with retries left, in insertion order.
    /// An unreadable log yields an empty list.
    pub async fn pending_records(&self, wallet: &str) -> Vec<TradeActivity> {
        match self.request(wallet, |reply| QueueCommand::Pending { reply }).await {
            Ok(records) => records,
            Err(e) => {
                error!(wallet = %wallet, error = %e, "Failed to read pending records");
                Vec::new()
            }
        }
    }

    /// The wallet's full log. An unreadable log yields an empty list.
    pub async fn all_records(&self, wallet: &str) -> Vec<TradeActivity> {
        match self.request(wallet, |reply| QueueCommand::All { reply }).await {
            Ok(records) => records,
            Err(e) => {
                error!(wallet = %wallet, error = %e, "Failed to read trade log");
                Vec::new()
            }
        }
    }

    /// Mark a record succeeded, or count a failed attempt against it.
    pub async fn record_outcome(&self, wallet: &str, id: &str, success: bool) -> Result<(), CopyError> {
        let id = id.to_string();
        let updated = self
            .request(wallet, |reply| QueueCommand::RecordOutcome {
                id: id.clone(),
                success,
                reply,
            })
            .await?;

        if !updated {
            warn!(wallet = %wallet, id = %id, success, "Outcome did not change any record");
        }
        Ok(())
    }

    pub async fn stats(&self, wallet: &str) -> Result<QueueStats, CopyError> {
        let records = self.request(wallet, |reply| QueueCommand::All { reply }).await?;
        Ok(QueueStats::from_records(&records, self.retry_limit))
    }

    async fn request<T>(
        &self,
        wallet: &str,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> QueueCommand,
    ) -> Result<T, CopyError> {
        let wallet = wallet_key(wallet);
        let sender = self.owner(&wallet).await;
        let (reply, response) = oneshot::channel();

        sender
            .send(command(reply))
            .await
            .map_err(|_| CopyError::Persistence(format!("queue owner for {} stopped", wallet)))?;

        response
            .await
            .map_err(|_| CopyError::Persistence(format!("queue owner for {} dropped request", wallet)))?
            .map_err(CopyError::persistence)
    }

    /// Get or spawn the owner task for a wallet.
    async fn owner(&self, wallet: &str) -> mpsc::Sender<QueueCommand> {
        let mut owners = self.owners.lock().await;

        if let Some(sender) = owners.get(wallet) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }

        let (sender, receiver) = mpsc::channel(OWNER_CHANNEL_CAPACITY);
        tokio::spawn(run_owner(
            self.db.clone(),
            wallet.to_string(),
            self.retry_limit,
            receiver,
        ));
        owners.insert(wallet.to_string(), sender.clone());
        sender
    }
}

/// Serve one wallet's requests in arrival order until every sender is gone.
async fn run_owner(
    db: Database,
    wallet: String,
    retry_limit: u32,
    mut commands: mpsc::Receiver<QueueCommand>,
) {
    debug!(wallet = %wallet, "Queue owner started");

    while let Some(command) = commands.recv().await {
        // A dropped reply means the caller gave up; the write still happened.
        match command {
            QueueCommand::Append { records, reply } => {
                let _ = reply.send(db.append_activities(&wallet, &records).await);
            }
            QueueCommand::Pending { reply } => {
                let _ = reply.send(db.pending_activities(&wallet, retry_limit).await);
            }
            QueueCommand::All { reply } => {
                let _ = reply.send(db.load_activities(&wallet).await);
            }
            QueueCommand::RecordOutcome { id, success, reply } => {
                let _ = reply.send(db.record_outcome(&wallet, &id, success).await);
            }
        }
    }

    debug!(wallet = %wallet, "Queue owner stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionStatus, TradeSide};
    use crate::testing::trade;
    use std::sync::Arc;

    async fn queue(retry_limit: u32) -> Arc<TradeQueue> {
        Arc::new(TradeQueue::new(Database::in_memory().await.unwrap(), retry_limit))
    }

    #[tokio::test]
    async fn test_exhausted_record_leaves_pending() {
        let queue = queue(3).await;
        queue
            .append("0xtarget", vec![trade("a1", TradeSide::Buy, 1)])
            .await
            .unwrap();

        for _ in 0..3 {
            assert_eq!(queue.pending_records("0xtarget").await.len(), 1);
            queue.record_outcome("0xtarget", "a1", false).await.unwrap();
        }

        assert!(queue.pending_records("0xtarget").await.is_empty());
        let all = queue.all_records("0xtarget").await;
        assert_eq!(all[0].attempt_count, 3);
        assert_eq!(all[0].execution_status, ExecutionStatus::Pending);
        assert_eq!(queue.stats("0xtarget").await.unwrap().exhausted, 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers_lose_nothing() {
        let queue = queue(100).await;
        let ids: Vec<String> = (0..10).map(|i| format!("a{}", i)).collect();
        queue
            .append(
                "0xtarget",
                ids.iter().map(|id| trade(id, TradeSide::Buy, 1)).collect(),
            )
            .await
            .unwrap();

        let mut handles = Vec::new();
        for id in ids.clone() {
            let extra = format!("b-{}", id);
            let q = queue.clone();
            handles.push(tokio::spawn(async move {
                q.record_outcome("0xtarget", &id, false).await.unwrap();
            }));
            let q = queue.clone();
            handles.push(tokio::spawn(async move {
                q.append("0xtarget", vec![trade(&extra, TradeSide::Sell, 2)])
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            tokio_test::assert_ok!(handle.await);
        }

        let all = queue.all_records("0xtarget").await;
        assert_eq!(all.len(), 20);
        assert!(all
            .iter()
            .filter(|a| a.id.starts_with('a'))
            .all(|a| a.attempt_count == 1));
    }

    #[tokio::test]
    async fn test_wallets_are_independent() {
        let queue = queue(3).await;
        queue
            .append("0xone", vec![trade("a1", TradeSide::Buy, 1)])
            .await
            .unwrap();
        queue.record_outcome("0xone", "a1", true).await.unwrap();

        assert!(queue.all_records("0xtwo").await.is_empty());
        assert!(queue.pending_records("0xone").await.is_empty());
        assert_eq!(queue.all_records("0xone").await.len(), 1);
    }

    #[tokio::test]
    async fn test_wallet_casing_shares_log() {
        let queue = queue(3).await;
        let mixed = "0xABCDEF0123456789ABCDEF0123456789ABCDEF01";
        let lower = mixed.to_lowercase();
        queue
            .append(mixed, vec![trade("a1", TradeSide::Buy, 1)])
            .await
            .unwrap();
        queue.record_outcome(&lower, "a1", true).await.unwrap();

        assert_eq!(queue.all_records(mixed).await.len(), 1);
        assert_eq!(queue.all_records(&lower).await.len(), 1);
        assert!(queue.pending_records(mixed).await.is_empty());
        assert_eq!(wallet_key(mixed), lower);
    }

    #[tokio::test]
    async fn test_corrupt_log_reads_empty_and_rejects_append() {
        let db = Database::in_memory().await.unwrap();
        let queue = TradeQueue::new(db.clone(), 3);
        queue
            .append("0xtarget", vec![trade("a1", TradeSide::Buy, 1)])
            .await
            .unwrap();

        sqlx::query("UPDATE trade_activities SET execution_status = 'DONE'")
            .execute(db.pool())
            .await
            .unwrap();

        assert!(queue.all_records("0xtarget").await.is_empty());
        assert!(queue.pending_records("0xtarget").await.is_empty());

        let err = queue
            .append("0xtarget", vec![trade("a2", TradeSide::Buy, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::Persistence(_)));
    }
}
