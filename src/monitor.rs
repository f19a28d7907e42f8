//! Activity monitor: polls the watched wallet's feed and queues trades it has not seen.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::{timed_fetch, AccountData};
use crate::error::CopyError;
use crate::models::TradeActivity;
use crate::queue::TradeQueue;

/// Phase of the current poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Fetching,
    Deduping,
    Appending,
}

/// Monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Wallet being copied
    pub wallet: String,

    /// Time between polls
    pub fetch_interval: Duration,

    /// Trades this old or older are never queued (seconds)
    pub staleness_window_secs: i64,

    /// Activity items requested per poll
    pub page_size: u32,

    /// Upper bound on one feed request
    pub request_timeout: Duration,
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub fetched: usize,
    pub stale: usize,
    pub queued: usize,
}

pub struct ActivityMonitor {
    account: Arc<dyn AccountData>,
    queue: Arc<TradeQueue>,
    config: MonitorConfig,
    known_ids: HashSet<String>,
    state: MonitorState,
}

impl ActivityMonitor {
    pub fn new(account: Arc<dyn AccountData>, queue: Arc<TradeQueue>, config: MonitorConfig) -> Self {
        Self {
            account,
            queue,
            config,
            known_ids: HashSet::new(),
            state: MonitorState::Idle,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> MonitorState {
        self.state
    }

    #[cfg(test)]
    pub fn known_count(&self) -> usize {
        self.known_ids.len()
    }

    /// Load every id already in the queue so a restart never re-queues a trade.
    pub async fn seed(&mut self) -> usize {
        let records = self.queue.all_records(&self.config.wallet).await;
        self.known_ids.extend(records.into_iter().map(|r| r.id));

        info!(
            wallet = %self.config.wallet,
            known = self.known_ids.len(),
            "Seeded known activity ids"
        );
        self.known_ids.len()
    }

    /// Fetch the latest page, drop known and stale items, queue the rest.
    pub async fn poll(&mut self, now: DateTime<Utc>) -> Result<PollSummary, CopyError> {
        let result = self.poll_inner(now).await;
        self.transition(MonitorState::Idle);
        result
    }

    async fn poll_inner(&mut self, now: DateTime<Utc>) -> Result<PollSummary, CopyError> {
        self.transition(MonitorState::Fetching);
        let items = timed_fetch(
            "activity",
            self.config.request_timeout,
            self.account
                .recent_activity(&self.config.wallet, self.config.page_size),
        )
        .await?;

        self.transition(MonitorState::Deduping);
        let mut summary = PollSummary {
            fetched: items.len(),
            ..Default::default()
        };
        let fresh = self.select_new(items, now, &mut summary);

        if fresh.is_empty() {
            return Ok(summary);
        }

        self.transition(MonitorState::Appending);
        let ids: Vec<String> = fresh.iter().map(|r| r.id.clone()).collect();
        for record in &fresh {
            log_new_trade(record);
        }

        summary.queued = self.queue.append(&self.config.wallet, fresh).await?;
        self.known_ids.extend(ids);

        Ok(summary)
    }

    fn select_new(
        &self,
        items: Vec<TradeActivity>,
        now: DateTime<Utc>,
        summary: &mut PollSummary,
    ) -> Vec<TradeActivity> {
        let mut seen_this_page = HashSet::new();

        items
            .into_iter()
            .filter(|item| item.is_trade())
            .filter(|item| !self.known_ids.contains(&item.id))
            .filter(|item| seen_this_page.insert(item.id.clone()))
            .filter(|item| {
                let fresh = item.age_secs(now) < self.config.staleness_window_secs;
                if !fresh {
                    summary.stale += 1;
                }
                fresh
            })
            .collect()
    }

    fn transition(&mut self, next: MonitorState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Monitor state");
            self.state = next;
        }
    }

    /// Poll until `shutdown` is set. A failed poll is logged and retried on the next tick.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) {
        self.seed().await;

        info!(
            wallet = %self.config.wallet,
            interval_secs = self.config.fetch_interval.as_secs(),
            staleness_secs = self.config.staleness_window_secs,
            "Starting activity monitor"
        );

        let mut ticker = interval(self.config.fetch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            match self.poll(Utc::now()).await {
                Ok(summary) if summary.queued > 0 => {
                    info!(queued = summary.queued, fetched = summary.fetched, "Queued new trades");
                }
                Ok(summary) => {
                    debug!(fetched = summary.fetched, stale = summary.stale, "No new trades");
                }
                Err(e @ CopyError::Persistence(_)) => {
                    error!(error = %e, "Failed to queue new trades");
                }
                Err(e) => {
                    warn!(error = %e, "Activity poll failed, skipping tick");
                }
            }
        }

        info!("Activity monitor stopped");
    }
}

fn log_new_trade(record: &TradeActivity) {
    info!(
        id = %record.id,
        market = %record.title,
        side = record.side.map(|s| s.as_str()).unwrap_or("-"),
        size = %record.size,
        price = %record.price,
        notional = %record.notional,
        outcome = %record.outcome_label,
        time = %record
            .occurred_at()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| record.timestamp.to_string()),
        "New trade detected"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{ActivityKind, ExecutionStatus, TradeSide};
    use crate::testing::{trade, FakeAccount, TARGET};
    use chrono::TimeZone;

    const NOW: i64 = 1_700_000_000;

    fn config() -> MonitorConfig {
        MonitorConfig {
            wallet: TARGET.to_string(),
            fetch_interval: Duration::from_secs(5),
            staleness_window_secs: 3600,
            page_size: 50,
            request_timeout: Duration::from_secs(10),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(NOW, 0).unwrap()
    }

    async fn setup() -> (Arc<FakeAccount>, Arc<TradeQueue>, ActivityMonitor) {
        let account = Arc::new(FakeAccount::default());
        let queue = Arc::new(TradeQueue::new(Database::in_memory().await.unwrap(), 3));
        let monitor = ActivityMonitor::new(account.clone(), queue.clone(), config());
        (account, queue, monitor)
    }

    #[tokio::test]
    async fn test_new_trade_detected() {
        let (account, queue, mut monitor) = setup().await;
        account.set_activity(vec![trade("a1", TradeSide::Buy, NOW)]);

        let summary = monitor.poll(now()).await.unwrap();
        assert_eq!(summary.queued, 1);
        assert_eq!(monitor.state(), MonitorState::Idle);

        let log = queue.all_records(TARGET).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].id, "a1");
        assert_eq!(log[0].execution_status, ExecutionStatus::Pending);
        assert_eq!(log[0].attempt_count, 0);
    }

    #[tokio::test]
    async fn test_repeat_poll_is_idempotent() {
        let (account, queue, mut monitor) = setup().await;
        account.set_activity(vec![
            trade("a1", TradeSide::Buy, NOW),
            trade("a1", TradeSide::Buy, NOW),
            trade("a2", TradeSide::Sell, NOW - 10),
        ]);

        assert_eq!(monitor.poll(now()).await.unwrap().queued, 2);
        assert_eq!(monitor.poll(now()).await.unwrap().queued, 0);
        assert_eq!(queue.all_records(TARGET).await.len(), 2);
    }

    #[tokio::test]
    async fn test_restart_does_not_requeue() {
        let (account, queue, mut monitor) = setup().await;
        account.set_activity(vec![trade("a1", TradeSide::Buy, NOW)]);
        monitor.poll(now()).await.unwrap();
        queue.record_outcome(TARGET, "a1", true).await.unwrap();

        let mut restarted = ActivityMonitor::new(account.clone(), queue.clone(), config());
        assert_eq!(restarted.seed().await, 1);
        assert_eq!(restarted.poll(now()).await.unwrap().queued, 0);

        let log = queue.all_records(TARGET).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].execution_status, ExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_restart_with_other_casing_does_not_requeue() {
        let (account, queue, _) = setup().await;
        let mixed = "0xABCDEF0123456789ABCDEF0123456789ABCDEF01";
        account.set_activity(vec![trade("a1", TradeSide::Buy, NOW)]);

        let mut first = config();
        first.wallet = mixed.to_string();
        let mut monitor = ActivityMonitor::new(account.clone(), queue.clone(), first);
        monitor.poll(now()).await.unwrap();
        queue.record_outcome(mixed, "a1", true).await.unwrap();

        let mut second = config();
        second.wallet = mixed.to_lowercase();
        let mut restarted = ActivityMonitor::new(account.clone(), queue.clone(), second);
        assert_eq!(restarted.seed().await, 1);
        assert_eq!(restarted.poll(now()).await.unwrap().queued, 0);
        assert!(queue.pending_records(mixed).await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_and_non_trade_items_dropped() {
        let (account, queue, mut monitor) = setup().await;
        let mut merge = trade("m1", TradeSide::Sell, NOW);
        merge.kind = ActivityKind::Merge;
        let mut redeem = trade("r1", TradeSide::Buy, NOW);
        redeem.kind = ActivityKind::Redeem;

        account.set_activity(vec![
            trade("old", TradeSide::Buy, NOW - 3600),
            trade("edge", TradeSide::Buy, NOW - 3599),
            merge,
            redeem,
        ]);

        let summary = monitor.poll(now()).await.unwrap();
        assert_eq!(summary.fetched, 4);
        assert_eq!(summary.stale, 1);
        assert_eq!(summary.queued, 1);

        let ids: Vec<_> = queue
            .all_records(TARGET)
            .await
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["edge"]);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_tick() {
        let (account, queue, mut monitor) = setup().await;
        account.set_activity(vec![trade("a1", TradeSide::Buy, NOW)]);
        account.fail_activity.store(true, Ordering::SeqCst);

        assert!(matches!(monitor.poll(now()).await, Err(CopyError::Fetch(_))));
        assert_eq!(monitor.state(), MonitorState::Idle);
        assert!(queue.all_records(TARGET).await.is_empty());

        account.fail_activity.store(false, Ordering::SeqCst);
        assert_eq!(monitor.poll(now()).await.unwrap().queued, 1);
    }

    #[tokio::test]
    async fn test_failed_append_is_retried() {
        let db = Database::in_memory().await.unwrap();
        let account = Arc::new(FakeAccount::default());
        let queue = Arc::new(TradeQueue::new(db.clone(), 3));
        let mut monitor = ActivityMonitor::new(account.clone(), queue.clone(), config());

        account.set_activity(vec![trade("a1", TradeSide::Buy, NOW)]);
        monitor.poll(now()).await.unwrap();

        sqlx::query("UPDATE trade_activities SET price = 'x'")
            .execute(db.pool())
            .await
            .unwrap();
        account.set_activity(vec![trade("a2", TradeSide::Buy, NOW)]);

        assert!(matches!(
            monitor.poll(now()).await,
            Err(CopyError::Persistence(_))
        ));
        // a2 stays unknown so the next healthy poll queues it.
        assert_eq!(monitor.known_count(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let account = Arc::new(FakeAccount::default());
        let queue = Arc::new(TradeQueue::new(Database::in_memory().await.unwrap(), 3));
        let monitor = ActivityMonitor::new(
            account.clone(),
            queue.clone(),
            MonitorConfig {
                fetch_interval: Duration::from_millis(20),
                ..config()
            },
        );
        account.set_activity(vec![trade("a1", TradeSide::Buy, Utc::now().timestamp())]);

        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(monitor.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.store(true, Ordering::SeqCst);

        tokio_test::assert_ok!(tokio::time::timeout(Duration::from_secs(5), handle).await);
        assert!(account.activity_calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(queue.all_records(TARGET).await.len(), 1);
    }
}
