//! LeaderboardCache - 完了時の楽観的な加算と正本からの再取得

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::{DurableError, HistoryEntry, LeaderboardEntry, LeaderboardPeriod};
use crate::ports::DurableStore;

struct Board {
    period: LeaderboardPeriod,
    entries: Vec<LeaderboardEntry>,
}

pub struct LeaderboardCache {
    durable: Arc<dyn DurableStore>,
    board: Mutex<Board>,
}

impl LeaderboardCache {
    pub fn new(durable: Arc<dyn DurableStore>, period: LeaderboardPeriod) -> Self {
        Self {
            durable,
            board: Mutex::new(Board {
                period,
                entries: Vec::new(),
            }),
        }
    }

    pub async fn entries(&self) -> Vec<LeaderboardEntry> {
        self.board.lock().await.entries.clone()
    }

    pub async fn period(&self) -> LeaderboardPeriod {
        self.board.lock().await.period
    }

    /// Switch period and reload.
    pub async fn set_period(&self, period: LeaderboardPeriod) -> Result<(), DurableError> {
        self.board.lock().await.period = period;
        self.refresh().await
    }

    /// Replace the cached board with the durable aggregate.
    pub async fn refresh(&self) -> Result<(), DurableError> {
        let period = self.period().await;
        let entries = self.durable.fetch_leaderboard(period).await?;
        let mut board = self.board.lock().await;
        // a concurrent set_period wins
        if board.period == period {
            board.entries = entries;
        }
        Ok(())
    }

    /// Optimistically add a completion to the cached board.
    pub async fn bump(&self, entry: &HistoryEntry) {
        let mut board = self.board.lock().await;
        match board.entries.iter_mut().find(|e| e.user_id == entry.user_id) {
            Some(row) => {
                row.total_seconds += entry.duration_secs;
                row.tasks_completed += 1;
            }
            None => board.entries.push(LeaderboardEntry {
                user_id: entry.user_id.clone(),
                display_name: entry.display_name.clone(),
                total_seconds: entry.duration_secs,
                tasks_completed: 1,
            }),
        }
        board
            .entries
            .sort_by(|a, b| b.total_seconds.cmp(&a.total_seconds));
    }

    /// Completion side effects: history row, optimistic bump, authoritative refresh.
    /// Failures are logged; the completion itself already succeeded.
    pub async fn record_completion(&self, entry: &HistoryEntry) {
        if let Err(e) = self.durable.append_history(entry).await {
            tracing::warn!(task_id = %entry.task_id, error = %e, "history append failed");
        }
        self.bump(entry).await;
        if let Err(e) = self.refresh().await {
            tracing::warn!(error = %e, "leaderboard refresh failed, keeping optimistic values");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, UserId};
    use crate::impls::InMemoryDurableStore;
    use crate::ports::{Clock, FixedClock};
    use ulid::Ulid;

    const NOW: i64 = 1_700_000_000_000;

    fn entry(user: &str, secs: u64) -> HistoryEntry {
        HistoryEntry {
            task_id: TaskId::from_ulid(Ulid::new()),
            user_id: UserId::new(user),
            display_name: user.to_string(),
            task_name: "t".to_string(),
            duration_secs: secs,
            completed_at: NOW,
        }
    }

    #[tokio::test]
    async fn completion_is_visible_after_refresh() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::from_millis(NOW));
        let durable = Arc::new(InMemoryDurableStore::new(clock));
        let board = LeaderboardCache::new(durable.clone(), LeaderboardPeriod::Day);

        board.record_completion(&entry("u1", 900)).await;
        board.record_completion(&entry("u2", 1_200)).await;

        let rows = board.entries().await;
        assert_eq!(rows[0].user_id, UserId::new("u2"));
        assert_eq!(rows[1].total_seconds, 900);
        assert_eq!(durable.history().await.len(), 2);
    }

    #[tokio::test]
    async fn optimistic_bump_survives_an_outage() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::from_millis(NOW));
        let durable = Arc::new(InMemoryDurableStore::new(clock));
        let board = LeaderboardCache::new(durable.clone(), LeaderboardPeriod::AllTime);
        durable.set_unavailable(true).await;

        board.record_completion(&entry("u1", 300)).await;
        board.record_completion(&entry("u1", 200)).await;

        let rows = board.entries().await;
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].total_seconds, rows[0].tasks_completed), (500, 2));
    }
}
