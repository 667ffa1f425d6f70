//! SQLite poll store
//!
//! Polls and votes in two tables. Votes are keyed by `(poll_id, user_id)`
//! and upserted in one statement, and they cascade with their poll, so
//! neither a concurrent re-vote nor a crashed delete can break the
//! one-vote-per-user and no-orphan rules.

use super::{PollRepository, StoreError, StoreResult};
use crate::config::StorageConfig;
use crate::polls::{Poll, Vote, MIN_OPTIONS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

const CREATE_POLLS: &str = r#"
    CREATE TABLE IF NOT EXISTS polls (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        options TEXT NOT NULL,
        creator_id TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        finished_at TEXT,
        is_finished INTEGER NOT NULL DEFAULT 0,
        post_id TEXT NOT NULL DEFAULT ''
    )
"#;

const CREATE_VOTES: &str = r#"
    CREATE TABLE IF NOT EXISTS votes (
        poll_id TEXT NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL,
        option_index INTEGER NOT NULL,
        voted_at TEXT NOT NULL,
        PRIMARY KEY (poll_id, user_id)
    )
"#;

const CREATE_VOTES_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_votes_poll ON votes(poll_id)";

const POLL_COLUMNS: &str =
    "id, title, options, creator_id, channel_id, created_at, finished_at, is_finished, post_id";

/// Poll record as stored
#[derive(Debug, sqlx::FromRow)]
struct PollRow {
    id: String,
    title: String,
    options: String,
    creator_id: String,
    channel_id: String,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    is_finished: bool,
    post_id: String,
}

impl TryFrom<PollRow> for Poll {
    type Error = StoreError;

    fn try_from(row: PollRow) -> Result<Self, Self::Error> {
        let options: Vec<String> = serde_json::from_str(&row.options).map_err(|e| {
            StoreError::Corrupt(format!("poll {} has malformed options: {}", row.id, e))
        })?;
        if options.len() < MIN_OPTIONS {
            return Err(StoreError::Corrupt(format!(
                "poll {} has {} options",
                row.id,
                options.len()
            )));
        }

        Ok(Poll {
            id: row.id,
            title: row.title,
            options,
            creator_id: row.creator_id,
            channel_id: row.channel_id,
            created_at: row.created_at,
            finished_at: row.finished_at,
            is_finished: row.is_finished,
            post_id: row.post_id,
        })
    }
}

/// Vote record as stored
#[derive(Debug, sqlx::FromRow)]
struct VoteRow {
    poll_id: String,
    user_id: String,
    option_index: i64,
    voted_at: DateTime<Utc>,
}

impl TryFrom<VoteRow> for Vote {
    type Error = StoreError;

    fn try_from(row: VoteRow) -> Result<Self, Self::Error> {
        let option_index = usize::try_from(row.option_index).map_err(|_| {
            StoreError::Corrupt(format!(
                "vote by {} in poll {} has option index {}",
                row.user_id, row.poll_id, row.option_index
            ))
        })?;

        Ok(Vote {
            poll_id: row.poll_id,
            user_id: row.user_id,
            option_index,
            voted_at: row.voted_at,
        })
    }
}

/// SQLite-backed repository
#[derive(Debug, Clone)]
pub struct SqlitePollRepository {
    pool: Pool<Sqlite>,
    op_timeout: Duration,
    vote_page_size: u32,
}

impl SqlitePollRepository {
    /// Open the pool and create the schema if needed.
    ///
    /// `sqlite::memory:` gives every connection its own database, so use a
    /// single connection with it.
    pub async fn connect(config: &StorageConfig) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| StoreError::Backend(format!("Invalid database URL: {}", e)))?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.operation_timeout())
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect: {}", e)))?;

        let store = Self {
            pool,
            op_timeout: config.operation_timeout(),
            vote_page_size: config.vote_page_size.max(1),
        };
        store.init().await?;

        Ok(store)
    }

    /// Create tables
    async fn init(&self) -> StoreResult<()> {
        for ddl in [CREATE_POLLS, CREATE_VOTES, CREATE_VOTES_INDEX] {
            self.timed("init", sqlx::query(ddl).execute(&self.pool))
                .await?;
        }
        Ok(())
    }

    /// Run `fut` under the operation timeout and map driver errors
    async fn timed<T, F>(&self, op: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(|e| map_sqlx_error(op, e)),
            Err(_) => {
                let timeout_ms = self.op_timeout.as_millis() as u64;
                tracing::warn!(op, timeout_ms, "Store operation timed out");
                Err(StoreError::Timeout(timeout_ms))
            }
        }
    }

    /// One page of votes ordered by voter, strictly after `after_user`
    async fn vote_page(&self, poll_id: &str, after_user: &str) -> StoreResult<Vec<VoteRow>> {
        self.timed(
            "get_votes",
            sqlx::query_as::<_, VoteRow>(
                "SELECT poll_id, user_id, option_index, voted_at
                 FROM votes
                 WHERE poll_id = ?1 AND user_id > ?2
                 ORDER BY user_id
                 LIMIT ?3",
            )
            .bind(poll_id)
            .bind(after_user)
            .bind(self.vote_page_size as i64)
            .fetch_all(&self.pool),
        )
        .await
    }
}

fn map_sqlx_error(op: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound(op.to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::NotFound(db.message().to_string())
        }
        sqlx::Error::ColumnDecode { index, source } => {
            StoreError::Corrupt(format!("{}: column {}: {}", op, index, source))
        }
        sqlx::Error::Decode(source) => StoreError::Corrupt(format!("{}: {}", op, source)),
        other => StoreError::Backend(format!("{}: {}", op, other)),
    }
}

fn encode_options(poll: &Poll) -> StoreResult<String> {
    serde_json::to_string(&poll.options)
        .map_err(|e| StoreError::Backend(format!("Failed to encode options: {}", e)))
}

#[async_trait]
impl PollRepository for SqlitePollRepository {
    async fn create_poll(&self, poll: &Poll) -> StoreResult<()> {
        let options = encode_options(poll)?;
        let result = self
            .timed(
                "create_poll",
                sqlx::query(
                    "INSERT INTO polls (id, title, options, creator_id, channel_id, created_at, finished_at, is_finished, post_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT (id) DO NOTHING",
                )
                .bind(&poll.id)
                .bind(&poll.title)
                .bind(&options)
                .bind(&poll.creator_id)
                .bind(&poll.channel_id)
                .bind(poll.created_at)
                .bind(poll.finished_at)
                .bind(poll.is_finished)
                .bind(&poll.post_id)
                .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("poll {}", poll.id)));
        }
        tracing::debug!(poll_id = %poll.id, "Poll stored");
        Ok(())
    }

    async fn get_poll(&self, poll_id: &str) -> StoreResult<Poll> {
        let sql = format!("SELECT {} FROM polls WHERE id = ?1", POLL_COLUMNS);
        let row = self
            .timed(
                "get_poll",
                sqlx::query_as::<_, PollRow>(&sql)
                    .bind(poll_id)
                    .fetch_optional(&self.pool),
            )
            .await?;

        match row {
            Some(row) => Poll::try_from(row),
            None => Err(StoreError::NotFound(format!("poll {}", poll_id))),
        }
    }

    async fn update_poll(&self, poll: &Poll) -> StoreResult<()> {
        let options = encode_options(poll)?;
        let result = self
            .timed(
                "update_poll",
                sqlx::query(
                    "UPDATE polls
                     SET title = ?2, options = ?3, creator_id = ?4, channel_id = ?5,
                         created_at = ?6, finished_at = ?7, is_finished = ?8, post_id = ?9
                     WHERE id = ?1",
                )
                .bind(&poll.id)
                .bind(&poll.title)
                .bind(&options)
                .bind(&poll.creator_id)
                .bind(&poll.channel_id)
                .bind(poll.created_at)
                .bind(poll.finished_at)
                .bind(poll.is_finished)
                .bind(&poll.post_id)
                .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("poll {}", poll.id)));
        }
        Ok(())
    }

    async fn delete_poll(&self, poll_id: &str) -> StoreResult<()> {
        let deleted = self
            .timed("delete_poll", async {
                let mut tx = self.pool.begin().await?;
                sqlx::query("DELETE FROM votes WHERE poll_id = ?1")
                    .bind(poll_id)
                    .execute(&mut *tx)
                    .await?;
                let result = sqlx::query("DELETE FROM polls WHERE id = ?1")
                    .bind(poll_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok::<_, sqlx::Error>(result.rows_affected())
            })
            .await?;

        if deleted == 0 {
            return Err(StoreError::NotFound(format!("poll {}", poll_id)));
        }
        Ok(())
    }

    async fn add_vote(&self, vote: &Vote) -> StoreResult<()> {
        let result = self
            .timed(
                "add_vote",
                sqlx::query(
                    "INSERT INTO votes (poll_id, user_id, option_index, voted_at)
                     SELECT ?1, ?2, ?3, ?4
                     WHERE EXISTS (SELECT 1 FROM polls WHERE id = ?1 AND is_finished = 0)
                     ON CONFLICT (poll_id, user_id)
                     DO UPDATE SET option_index = excluded.option_index, voted_at = excluded.voted_at",
                )
                .bind(&vote.poll_id)
                .bind(&vote.user_id)
                .bind(vote.option_index as i64)
                .bind(vote.voted_at)
                .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // Nothing written: the poll is either gone or already finished.
        let finished: Option<bool> = self
            .timed(
                "add_vote",
                sqlx::query_scalar("SELECT is_finished FROM polls WHERE id = ?1")
                    .bind(&vote.poll_id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        match finished {
            None => Err(StoreError::NotFound(format!("poll {}", vote.poll_id))),
            Some(true) => Err(StoreError::Closed(format!("poll {}", vote.poll_id))),
            Some(false) => Err(StoreError::Backend(format!(
                "add_vote: vote by {} in poll {} was not recorded",
                vote.user_id, vote.poll_id
            ))),
        }
    }

    async fn get_votes(&self, poll_id: &str) -> StoreResult<Vec<Vote>> {
        let page_size = self.vote_page_size as usize;
        let mut votes = Vec::new();
        let mut after = String::new();

        loop {
            let rows = self.vote_page(poll_id, &after).await?;
            let fetched = rows.len();
            for row in rows {
                after.clone_from(&row.user_id);
                if row.option_index < 0 {
                    tracing::warn!(
                        poll_id,
                        user_id = %row.user_id,
                        option_index = row.option_index,
                        "Skipping vote with negative option index"
                    );
                    continue;
                }
                votes.push(Vote::try_from(row)?);
            }
            if fetched < page_size {
                break;
            }
        }

        tracing::debug!(poll_id, count = votes.len(), "Loaded votes");
        Ok(votes)
    }

    async fn health_check(&self) -> StoreResult<()> {
        let value: i64 = self
            .timed(
                "health_check",
                sqlx::query_scalar("SELECT 1").fetch_one(&self.pool),
            )
            .await?;
        if value != 1 {
            return Err(StoreError::Backend(format!(
                "health check returned {}",
                value
            )));
        }
        Ok(())
    }

    async fn purge_orphaned_votes(&self) -> StoreResult<u64> {
        let result = self
            .timed(
                "purge_orphaned_votes",
                sqlx::query("DELETE FROM votes WHERE poll_id NOT IN (SELECT id FROM polls)")
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config(page_size: u32) -> StorageConfig {
        StorageConfig {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            vote_page_size: page_size,
            ..StorageConfig::default()
        }
    }

    async fn test_repo() -> SqlitePollRepository {
        SqlitePollRepository::connect(&memory_config(500))
            .await
            .unwrap()
    }

    fn poll(id: &str) -> Poll {
        Poll::new(
            "Lunch",
            vec!["Pizza".to_string(), "Sushi".to_string()],
            "creator",
            "town-square",
        )
        .with_id(id)
    }

    #[tokio::test]
    async fn test_create_and_get_roundtrip() {
        let repo = test_repo().await;
        let mut original = poll("p1");
        original.post_id = "post-1".to_string();
        repo.create_poll(&original).await.unwrap();

        let stored = repo.get_poll("p1").await.unwrap();
        assert_eq!(stored.id, original.id);
        assert_eq!(stored.title, original.title);
        assert_eq!(stored.options, original.options);
        assert_eq!(stored.creator_id, original.creator_id);
        assert_eq!(stored.post_id, "post-1");
        assert!(!stored.is_finished);
        assert_eq!(
            stored.created_at.timestamp_millis(),
            original.created_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_get_missing_poll() {
        let repo = test_repo().await;
        assert!(matches!(
            repo.get_poll("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let repo = test_repo().await;
        repo.create_poll(&poll("p1")).await.unwrap();
        let err = repo.create_poll(&poll("p1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_persists_finish() {
        let repo = test_repo().await;
        let mut p = poll("p1");
        repo.create_poll(&p).await.unwrap();

        p.finish(Utc::now());
        repo.update_poll(&p).await.unwrap();

        let stored = repo.get_poll("p1").await.unwrap();
        assert!(stored.is_finished);
        assert_eq!(
            stored.finished_at.map(|t| t.timestamp_millis()),
            p.finished_at.map(|t| t.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_update_missing_poll() {
        let repo = test_repo().await;
        assert!(matches!(
            repo.update_poll(&poll("ghost")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_vote_per_user() {
        let repo = test_repo().await;
        repo.create_poll(&poll("p1")).await.unwrap();

        repo.add_vote(&Vote::new("p1", "alice", 0)).await.unwrap();
        repo.add_vote(&Vote::new("p1", "alice", 1)).await.unwrap();
        repo.add_vote(&Vote::new("p1", "bob", 1)).await.unwrap();

        let mut votes = repo.get_votes("p1").await.unwrap();
        votes.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        assert_eq!(votes.len(), 2);
        assert_eq!(votes[0].user_id, "alice");
        assert_eq!(votes[0].option_index, 1);
    }

    #[tokio::test]
    async fn test_vote_on_missing_poll() {
        let repo = test_repo().await;
        let err = repo.add_vote(&Vote::new("nope", "alice", 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_votes() {
        let repo = test_repo().await;
        repo.create_poll(&poll("p1")).await.unwrap();
        repo.add_vote(&Vote::new("p1", "alice", 0)).await.unwrap();

        repo.delete_poll("p1").await.unwrap();

        assert!(matches!(
            repo.get_poll("p1").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(repo.get_votes("p1").await.unwrap().is_empty());
        assert!(matches!(
            repo.delete_poll("p1").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_votes_spans_pages() {
        let repo = SqlitePollRepository::connect(&memory_config(3))
            .await
            .unwrap();
        repo.create_poll(&poll("p1")).await.unwrap();
        for i in 0..10 {
            repo.add_vote(&Vote::new("p1", format!("user{:02}", i), i % 2))
                .await
                .unwrap();
        }

        let votes = repo.get_votes("p1").await.unwrap();
        assert_eq!(votes.len(), 10);
    }

    #[tokio::test]
    async fn test_malformed_options_are_corrupt() {
        let repo = test_repo().await;
        sqlx::query(
            "INSERT INTO polls (id, title, options, creator_id, channel_id, created_at, is_finished, post_id)
             VALUES ('bad', 'Broken', 'not json', 'u', 'c', '2024-01-01T00:00:00Z', 0, '')",
        )
        .execute(&repo.pool)
        .await
        .unwrap();

        let err = repo.get_poll("bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn test_too_few_options_is_corrupt() {
        let repo = test_repo().await;
        sqlx::query(
            "INSERT INTO polls (id, title, options, creator_id, channel_id, created_at, is_finished, post_id)
             VALUES ('thin', 'Thin', '[\"only\"]', 'u', 'c', '2024-01-01T00:00:00Z', 0, '')",
        )
        .execute(&repo.pool)
        .await
        .unwrap();

        let err = repo.get_poll("thin").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    async fn insert_negative_vote(repo: &SqlitePollRepository, poll_id: &str) {
        sqlx::query(
            "INSERT INTO votes (poll_id, user_id, option_index, voted_at)
             VALUES (?1, 'mallory', -1, '2024-01-01T00:00:00Z')",
        )
        .bind(poll_id)
        .execute(&repo.pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_negative_option_index_is_skipped() {
        let repo = test_repo().await;
        repo.create_poll(&poll("p1")).await.unwrap();
        repo.add_vote(&Vote::new("p1", "alice", 1)).await.unwrap();
        insert_negative_vote(&repo, "p1").await;
        repo.add_vote(&Vote::new("p1", "zoe", 0)).await.unwrap();

        let mut users: Vec<String> = repo
            .get_votes("p1")
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.user_id)
            .collect();
        users.sort();
        assert_eq!(users, vec!["alice", "zoe"]);
    }

    #[tokio::test]
    async fn test_service_tolerates_negative_option_index() {
        use crate::channels::{ChannelResult, MessagingGateway};
        use crate::polls::PollService;
        use std::sync::Arc;

        struct NullGateway;

        #[async_trait]
        impl MessagingGateway for NullGateway {
            async fn post_message(&self, _: &str, _: &str) -> ChannelResult<String> {
                Ok("post".to_string())
            }
            async fn display_name(&self, user_id: &str) -> ChannelResult<String> {
                Ok(user_id.to_string())
            }
        }

        let repo = Arc::new(test_repo().await);
        repo.create_poll(&poll("p1")).await.unwrap();
        repo.add_vote(&Vote::new("p1", "alice", 0)).await.unwrap();
        insert_negative_vote(&repo, "p1").await;
        let service = PollService::new(repo.clone(), Arc::new(NullGateway));

        let results = service.get_results("p1").await.unwrap();
        assert_eq!(results.total_votes(), 1);
        assert_eq!(results.choice_of("mallory"), None);

        let results = service.cast_vote("bob", "p1", 2).await.unwrap();
        assert_eq!(results.count_of("Pizza"), Some(1));
        assert_eq!(results.count_of("Sushi"), Some(1));

        let outcome = service.finish_poll("creator", "p1").await.unwrap();
        assert!(!outcome.already_finished);
        assert_eq!(outcome.results.total_votes(), 2);
        assert!(repo.get_poll("p1").await.unwrap().is_finished);
    }

    #[tokio::test]
    async fn test_vote_on_finished_poll_is_closed() {
        let repo = test_repo().await;
        let mut p = poll("p1");
        repo.create_poll(&p).await.unwrap();
        repo.add_vote(&Vote::new("p1", "alice", 0)).await.unwrap();

        p.finish(Utc::now());
        repo.update_poll(&p).await.unwrap();

        let err = repo.add_vote(&Vote::new("p1", "bob", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Closed(_)));
        let err = repo.add_vote(&Vote::new("p1", "alice", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Closed(_)));

        let votes = repo.get_votes("p1").await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].option_index, 0);
    }

    #[tokio::test]
    async fn test_purge_orphaned_votes() {
        let repo = test_repo().await;
        repo.create_poll(&poll("p1")).await.unwrap();
        repo.add_vote(&Vote::new("p1", "alice", 0)).await.unwrap();

        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&repo.pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO votes (poll_id, user_id, option_index, voted_at)
             VALUES ('gone', 'bob', 0, '2024-01-01T00:00:00Z')",
        )
        .execute(&repo.pool)
        .await
        .unwrap();

        assert_eq!(repo.purge_orphaned_votes().await.unwrap(), 1);
        assert_eq!(repo.get_votes("p1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let repo = test_repo().await;
        repo.health_check().await.unwrap();
        repo.close().await;
        assert!(repo.health_check().await.is_err());
    }
}
