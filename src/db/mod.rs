//! SQLite persistence for the per-wallet trade activity log.
//!
//! Every activity seen on the watched wallet is kept forever, together with
//! its execution status and attempt count. Rows are never deleted so failed
//! copies stay auditable.
//!
//! Each mutating call runs in one transaction that first loads and decodes the
//! wallet's whole log. A row that does not decode fails the call and rolls
//! the transaction back, so a corrupt log is never partially rewritten.

use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::models::{ActivityKind, ExecutionStatus, TradeActivity, TradeSide};

/// Database connection pool for the trade log.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Stored activity row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredActivity {
    pub seq: i64,
    pub wallet: String,
    pub id: String,
    pub timestamp: i64,
    pub market_id: String,
    pub asset_id: String,
    pub kind: String,
    pub side: Option<String>,
    pub size: String,
    pub notional: String,
    pub price: String,
    pub outcome_label: String,
    pub outcome_index: i64,
    pub title: String,
    pub slug: String,
    pub transaction_hash: String,
    pub execution_status: String,
    pub attempt_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<StoredActivity> for TradeActivity {
    type Error = anyhow::Error;

    fn try_from(row: StoredActivity) -> Result<Self> {
        let decimal = |field: &str, value: &str| {
            Decimal::from_str(value)
                .with_context(|| format!("row {} ({}): bad {} '{}'", row.seq, row.id, field, value))
        };

        let side = match row.side.as_deref() {
            None => None,
            Some(s) => Some(
                TradeSide::from_api(s)
                    .ok_or_else(|| anyhow!("row {} ({}): bad side '{}'", row.seq, row.id, s))?,
            ),
        };

        let execution_status = ExecutionStatus::from_str(&row.execution_status)
            .map_err(|e| anyhow!("row {} ({}): {}", row.seq, row.id, e))?;

        let attempt_count = u32::try_from(row.attempt_count).map_err(|_| {
            anyhow!("row {} ({}): bad attempt count {}", row.seq, row.id, row.attempt_count)
        })?;

        let outcome_index = i32::try_from(row.outcome_index).map_err(|_| {
            anyhow!("row {} ({}): bad outcome index {}", row.seq, row.id, row.outcome_index)
        })?;

        Ok(TradeActivity {
            size: decimal("size", &row.size)?,
            notional: decimal("notional", &row.notional)?,
            price: decimal("price", &row.price)?,
            kind: ActivityKind::from_api(&row.kind),
            side,
            execution_status,
            attempt_count,
            outcome_index,
            id: row.id,
            wallet: row.wallet,
            timestamp: row.timestamp,
            market_id: row.market_id,
            asset_id: row.asset_id,
            outcome_label: row.outcome_label,
            title: row.title,
            slug: row.slug,
            transaction_hash: row.transaction_hash,
        })
    }
}

/// Counts of a wallet's log by effective status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total: usize,
    pub succeeded: usize,
    pub pending: usize,
    /// Pending records with no retries left
    pub exhausted: usize,
}

impl QueueStats {
    pub fn from_records(records: &[TradeActivity], retry_limit: u32) -> Self {
        records.iter().fold(
            QueueStats {
                total: records.len(),
                ..Default::default()
            },
            |mut stats, record| {
                match record.effective_status(retry_limit) {
                    ExecutionStatus::Succeeded => stats.succeeded += 1,
                    ExecutionStatus::Pending => stats.pending += 1,
                    ExecutionStatus::Failed => stats.exhausted += 1,
                }
                stats
            },
        )
    }
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to connect to database {}", database_url))?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Private in-memory database. A single connection that is never recycled
    /// keeps the data alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_activities (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                wallet TEXT NOT NULL,
                id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                market_id TEXT NOT NULL,
                asset_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                side TEXT,
                size TEXT NOT NULL,
                notional TEXT NOT NULL,
                price TEXT NOT NULL,
                outcome_label TEXT NOT NULL DEFAULT '',
                outcome_index INTEGER NOT NULL DEFAULT 0,
                title TEXT NOT NULL DEFAULT '',
                slug TEXT NOT NULL DEFAULT '',
                transaction_hash TEXT NOT NULL DEFAULT '',
                execution_status TEXT NOT NULL DEFAULT 'PENDING',
                attempt_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(wallet, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create trade_activities table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trade_activities_wallet ON trade_activities(wallet, seq)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Trade Log ====================

    /// Full log for a wallet in insertion order.
    pub async fn load_activities(&self, wallet: &str) -> Result<Vec<TradeActivity>> {
        let mut conn = self.pool.acquire().await?;
        fetch_log(&mut *conn, wallet).await
    }

    /// Records the executor may still act on, in insertion order.
    pub async fn pending_activities(&self, wallet: &str, retry_limit: u32) -> Result<Vec<TradeActivity>> {
        Ok(self
            .load_activities(wallet)
            .await?
            .into_iter()
            .filter(|a| a.is_eligible(retry_limit))
            .collect())
    }

    /// Append records whose id is not yet in the wallet's log. Returns how many were inserted.
    pub async fn append_activities(&self, wallet: &str, records: &[TradeActivity]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let existing = fetch_log(&mut *tx, wallet).await?;
        let mut known: std::collections::HashSet<String> =
            existing.into_iter().map(|a| a.id).collect();

        let now = Utc::now().to_rfc3339();
        let mut inserted = 0;

        for record in records {
            if !known.insert(record.id.clone()) {
                continue;
            }

            sqlx::query(
                r#"
                INSERT INTO trade_activities
                    (wallet, id, timestamp, market_id, asset_id, kind, side, size, notional, price,
                     outcome_label, outcome_index, title, slug, transaction_hash,
                     execution_status, attempt_count, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(wallet)
            .bind(&record.id)
            .bind(record.timestamp)
            .bind(&record.market_id)
            .bind(&record.asset_id)
            .bind(record.kind.as_str())
            .bind(record.side.map(|s| s.as_str()))
            .bind(record.size.to_string())
            .bind(record.notional.to_string())
            .bind(record.price.to_string())
            .bind(&record.outcome_label)
            .bind(record.outcome_index)
            .bind(&record.title)
            .bind(&record.slug)
            .bind(&record.transaction_hash)
            .bind(record.execution_status.as_str())
            .bind(i64::from(record.attempt_count))
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert activity {}", record.id))?;

            inserted += 1;
        }

        tx.commit().await.context("Failed to commit append")?;
        Ok(inserted)
    }

    /// Mark a record succeeded, or count one more failed attempt.
    /// Returns false when the id is unknown (or, on failure, already succeeded).
    pub async fn record_outcome(&self, wallet: &str, id: &str, success: bool) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Decoding the whole log first makes a corrupt log fail before any write.
        fetch_log(&mut *tx, wallet).await?;

        let now = Utc::now().to_rfc3339();
        let result = if success {
            sqlx::query(
                r#"
                UPDATE trade_activities
                SET execution_status = 'SUCCEEDED', updated_at = ?
                WHERE wallet = ? AND id = ?
                "#,
            )
            .bind(&now)
            .bind(wallet)
            .bind(id)
            .execute(&mut *tx)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE trade_activities
                SET attempt_count = attempt_count + 1, updated_at = ?
                WHERE wallet = ? AND id = ? AND execution_status != 'SUCCEEDED'
                "#,
            )
            .bind(&now)
            .bind(wallet)
            .bind(id)
            .execute(&mut *tx)
            .await?
        };

        tx.commit().await.context("Failed to commit outcome")?;
        Ok(result.rows_affected() > 0)
    }

    /// Get the pool for raw queries.
    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn fetch_log(conn: &mut SqliteConnection, wallet: &str) -> Result<Vec<TradeActivity>> {
    let rows = sqlx::query_as::<_, StoredActivity>(
        "SELECT * FROM trade_activities WHERE wallet = ? ORDER BY seq",
    )
    .bind(wallet)
    .fetch_all(&mut *conn)
    .await
    .with_context(|| format!("Failed to read trade log for {}", wallet))?;

    rows.into_iter()
        .map(TradeActivity::try_from)
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("Trade log for {} is corrupt", wallet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const WALLET: &str = "0xtarget";

    fn activity(id: &str) -> TradeActivity {
        TradeActivity {
            id: id.to_string(),
            wallet: WALLET.to_string(),
            timestamp: 1_700_000_000,
            market_id: "0xmarket".to_string(),
            asset_id: "123".to_string(),
            kind: ActivityKind::Trade,
            side: Some(TradeSide::Buy),
            size: dec!(40),
            notional: dec!(20.125),
            price: dec!(0.503125),
            outcome_label: "Yes".to_string(),
            outcome_index: 0,
            title: "Test Market".to_string(),
            slug: "test-market".to_string(),
            transaction_hash: "0xhash".to_string(),
            execution_status: ExecutionStatus::Pending,
            attempt_count: 0,
        }
    }

    #[tokio::test]
    async fn test_append_keeps_order_and_skips_duplicates() {
        let db = Database::in_memory().await.unwrap();

        let inserted = db
            .append_activities(WALLET, &[activity("a1"), activity("a2")])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let inserted = db
            .append_activities(WALLET, &[activity("a2"), activity("a3"), activity("a3")])
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let log = db.load_activities(WALLET).await.unwrap();
        let ids: Vec<_> = log.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "a3"]);
        assert_eq!(log[0], activity("a1"));

        assert!(db.load_activities("0xother").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_outcome_bounded_retry() {
        let db = Database::in_memory().await.unwrap();
        db.append_activities(WALLET, &[activity("a1"), activity("a2")])
            .await
            .unwrap();

        for _ in 0..3 {
            assert!(db.record_outcome(WALLET, "a1", false).await.unwrap());
        }
        assert!(db.record_outcome(WALLET, "a2", true).await.unwrap());

        let log = db.load_activities(WALLET).await.unwrap();
        assert_eq!(log[0].attempt_count, 3);
        assert_eq!(log[0].execution_status, ExecutionStatus::Pending);
        assert_eq!(log[1].execution_status, ExecutionStatus::Succeeded);

        assert!(db.pending_activities(WALLET, 3).await.unwrap().is_empty());
        assert_eq!(db.pending_activities(WALLET, 4).await.unwrap().len(), 1);

        let stats = QueueStats::from_records(&log, 3);
        assert_eq!(
            stats,
            QueueStats {
                total: 2,
                succeeded: 1,
                pending: 0,
                exhausted: 1
            }
        );

        assert!(!db.record_outcome(WALLET, "missing", true).await.unwrap());
        // A succeeded record never accrues failures.
        assert!(!db.record_outcome(WALLET, "a2", false).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_log_rejects_writes() {
        let db = Database::in_memory().await.unwrap();
        db.append_activities(WALLET, &[activity("a1")]).await.unwrap();

        sqlx::query("UPDATE trade_activities SET size = 'lots' WHERE id = 'a1'")
            .execute(db.pool())
            .await
            .unwrap();

        assert!(db.load_activities(WALLET).await.is_err());
        assert!(db.append_activities(WALLET, &[activity("a2")]).await.is_err());
        assert!(db.record_outcome(WALLET, "a1", true).await.is_err());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trade_activities")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let status: String =
            sqlx::query_scalar("SELECT execution_status FROM trade_activities WHERE id = 'a1'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(status, "PENDING");
    }

    #[tokio::test]
    async fn test_negative_attempt_count_is_corrupt() {
        let db = Database::in_memory().await.unwrap();
        db.append_activities(WALLET, &[activity("a1")]).await.unwrap();

        sqlx::query("UPDATE trade_activities SET attempt_count = -1")
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.load_activities(WALLET).await.unwrap_err();
        assert!(format!("{err:#}").contains("attempt count"));
    }
}
