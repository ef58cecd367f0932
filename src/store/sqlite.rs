//! SQLite store
//!
//! sqlx-backed relational store. The `votes` table carries the poll id next
//! to the option id so `UNIQUE (user_id, poll_id)` can be declared directly;
//! a composite foreign key keeps that poll id consistent with the option.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::str::FromStr;

use super::{Store, StoreError, EMAIL_UNIQUE, VOTE_UNIQUE};
use crate::polls::model::{
    now_millis, NewPoll, NewUser, OptionId, Poll, PollCounts, PollId, PollOption, User, UserId,
    UserSummary, Vote,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS polls (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        question TEXT NOT NULL,
        creator_id INTEGER NOT NULL REFERENCES users(id),
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS poll_options (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        poll_id INTEGER NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
        text TEXT NOT NULL,
        position INTEGER NOT NULL,
        UNIQUE (id, poll_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS votes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        poll_option_id INTEGER NOT NULL,
        poll_id INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE (user_id, poll_id),
        FOREIGN KEY (poll_option_id, poll_id) REFERENCES poll_options(id, poll_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_poll_options_poll ON poll_options(poll_id, position)",
    "CREATE INDEX IF NOT EXISTS idx_votes_option ON votes(poll_option_id)",
];

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return if db.message().contains("votes.") {
                    StoreError::UniqueViolation(VOTE_UNIQUE)
                } else {
                    StoreError::UniqueViolation(EMAIL_UNIQUE)
                };
            }
            if db.is_foreign_key_violation() {
                return StoreError::ForeignKeyViolation;
            }
        }
        StoreError::Unavailable(err.to_string())
    }
}

/// SQLite-backed store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Connect and apply the schema.
    ///
    /// In-memory URLs are pinned to a single connection, otherwise every
    /// pooled connection would see its own empty database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = if url.contains(":memory:") {
            // The database lives only as long as its connection.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        }
        .connect_with(options)
        .await?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        created_at: row.try_get("created_at")?,
    })
}

fn option_from_row(row: &SqliteRow) -> Result<PollOption, sqlx::Error> {
    Ok(PollOption {
        id: row.try_get("id")?,
        poll_id: row.try_get("poll_id")?,
        text: row.try_get("text")?,
    })
}

fn vote_from_row(row: &SqliteRow) -> Result<Vote, sqlx::Error> {
    Ok(Vote {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        poll_option_id: row.try_get("poll_option_id")?,
        poll_id: row.try_get("poll_id")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_option_owning_poll(
        &self,
        option_id: OptionId,
    ) -> Result<Option<PollId>, StoreError> {
        let poll_id: Option<PollId> =
            sqlx::query_scalar("SELECT poll_id FROM poll_options WHERE id = ?1")
            .bind(option_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(poll_id)
    }

    async fn find_existing_vote(
        &self,
        user_id: UserId,
        poll_id: PollId,
    ) -> Result<Option<Vote>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, poll_option_id, poll_id, created_at
            FROM votes
            WHERE user_id = ?1 AND poll_id = ?2
            "#,
        )
        .bind(user_id)
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(vote_from_row).transpose()?)
    }

    async fn insert_vote(
        &self,
        user_id: UserId,
        option_id: OptionId,
        poll_id: PollId,
    ) -> Result<Vote, StoreError> {
        let created_at = now_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO votes (user_id, poll_option_id, poll_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(user_id)
        .bind(option_id)
        .bind(poll_id)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(Vote {
            id: result.last_insert_rowid(),
            user_id,
            poll_option_id: option_id,
            poll_id,
            created_at,
        })
    }

    async fn load_poll_with_counts(
        &self,
        poll_id: PollId,
    ) -> Result<Option<PollCounts>, StoreError> {
        // One read transaction so the question and the counts come from the
        // same snapshot.
        let mut tx = self.pool.begin().await?;

        let question: Option<String> = sqlx::query_scalar("SELECT question FROM polls WHERE id = ?1")
            .bind(poll_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(question) = question else {
            tx.commit().await?;
            return Ok(None);
        };

        let rows = sqlx::query(
            r#"
            SELECT o.id, o.poll_id, o.text, COUNT(v.id) AS votes
            FROM poll_options o
            LEFT JOIN votes v ON v.poll_option_id = o.id
            WHERE o.poll_id = ?1
            GROUP BY o.id
            ORDER BY o.position ASC, o.id ASC
            "#,
        )
        .bind(poll_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut options = Vec::with_capacity(rows.len());
        for row in &rows {
            let votes: i64 = row.try_get("votes")?;
            options.push((option_from_row(row)?, votes.max(0) as u64));
        }

        Ok(Some(PollCounts {
            poll_id,
            question,
            options,
        }))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let created_at = now_millis();
        let result = sqlx::query("INSERT INTO users (name, email, created_at) VALUES (?1, ?2, ?3)")
            .bind(&user.name)
            .bind(&user.email)
            .bind(created_at)
            .execute(&self.pool)
            .await?;

        Ok(User {
            id: result.last_insert_rowid(),
            name: user.name,
            email: user.email,
            created_at,
        })
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query("SELECT id, name, email, created_at FROM users ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        let users = rows.iter().map(user_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    async fn create_poll(&self, poll: NewPoll) -> Result<Poll, StoreError> {
        let created_at = now_millis();
        let mut tx = self.pool.begin().await?;

        let creator_name: Option<String> = sqlx::query_scalar("SELECT name FROM users WHERE id = ?1")
            .bind(poll.creator_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(creator_name) = creator_name else {
            return Err(StoreError::ForeignKeyViolation);
        };

        let poll_id = sqlx::query(
            "INSERT INTO polls (question, creator_id, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(&poll.question)
        .bind(poll.creator_id)
        .bind(created_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let mut options = Vec::with_capacity(poll.options.len());
        for (position, text) in poll.options.into_iter().enumerate() {
            let id = sqlx::query(
                "INSERT INTO poll_options (poll_id, text, position) VALUES (?1, ?2, ?3)",
            )
            .bind(poll_id)
            .bind(&text)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
            options.push(PollOption { id, poll_id, text });
        }

        tx.commit().await?;

        Ok(Poll {
            id: poll_id,
            question: poll.question,
            creator_id: poll.creator_id,
            creator: UserSummary {
                id: poll.creator_id,
                name: creator_name,
            },
            created_at,
            options,
        })
    }

    async fn list_polls(&self) -> Result<Vec<Poll>, StoreError> {
        let poll_rows = sqlx::query(
            r#"
            SELECT p.id, p.question, p.creator_id, p.created_at, u.name AS creator_name
            FROM polls p
            JOIN users u ON u.id = p.creator_id
            ORDER BY p.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let option_rows = sqlx::query(
            "SELECT id, poll_id, text FROM poll_options ORDER BY poll_id ASC, position ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut options: HashMap<PollId, Vec<PollOption>> = HashMap::new();
        for row in &option_rows {
            let option = option_from_row(row)?;
            options.entry(option.poll_id).or_default().push(option);
        }

        let mut polls = Vec::with_capacity(poll_rows.len());
        for row in &poll_rows {
            let id: PollId = row.try_get("id")?;
            let creator_id: UserId = row.try_get("creator_id")?;
            polls.push(Poll {
                id,
                question: row.try_get("question")?,
                creator_id,
                creator: UserSummary {
                    id: creator_id,
                    name: row.try_get("creator_name")?,
                },
                created_at: row.try_get("created_at")?,
                options: options.remove(&id).unwrap_or_default(),
            });
        }
        Ok(polls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:", 5).await.unwrap()
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let store = memory_store().await;
        store.init().await.unwrap();
        assert!(store.list_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unique_constraint_maps_to_vote_unique() {
        let store = memory_store().await;
        let user = store
            .create_user(NewUser::new("Ada", "ada@example.com"))
            .await
            .unwrap();
        let poll = store
            .create_poll(NewPoll::new("Best editor?", ["vim", "emacs"], user.id))
            .await
            .unwrap();

        store
            .insert_vote(user.id, poll.options[0].id, poll.id)
            .await
            .unwrap();
        let err = store
            .insert_vote(user.id, poll.options[1].id, poll.id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(VOTE_UNIQUE)));

        let existing = store.find_existing_vote(user.id, poll.id).await.unwrap();
        assert_eq!(existing.map(|v| v.poll_option_id), Some(poll.options[0].id));
    }

    #[tokio::test]
    async fn test_unknown_user_maps_to_foreign_key_violation() {
        let store = memory_store().await;
        let user = store
            .create_user(NewUser::new("Ada", "ada@example.com"))
            .await
            .unwrap();
        let poll = store
            .create_poll(NewPoll::new("Best editor?", ["vim", "emacs"], user.id))
            .await
            .unwrap();

        let err = store
            .insert_vote(user.id + 100, poll.options[0].id, poll.id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation));
    }

    #[tokio::test]
    async fn test_duplicate_email_maps_to_email_unique() {
        let store = memory_store().await;
        store
            .create_user(NewUser::new("Ada", "ada@example.com"))
            .await
            .unwrap();
        let err = store
            .create_user(NewUser::new("Other", "ada@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(EMAIL_UNIQUE)));
    }

    #[tokio::test]
    async fn test_counts_and_listing_preserve_option_order() {
        let store = memory_store().await;
        let user = store
            .create_user(NewUser::new("Ada", "ada@example.com"))
            .await
            .unwrap();
        let poll = store
            .create_poll(NewPoll::new("Pick one", ["C", "A", "B"], user.id))
            .await
            .unwrap();
        store
            .insert_vote(user.id, poll.options[2].id, poll.id)
            .await
            .unwrap();

        let counts = store.load_poll_with_counts(poll.id).await.unwrap().unwrap();
        let lines: Vec<_> = counts
            .options
            .iter()
            .map(|(o, n)| (o.text.clone(), *n))
            .collect();
        assert_eq!(
            lines,
            vec![("C".to_string(), 0), ("A".to_string(), 0), ("B".to_string(), 1)]
        );

        let polls = store.list_polls().await.unwrap();
        assert_eq!(polls.len(), 1);
        assert_eq!(polls[0].options, poll.options);
        assert_eq!(polls[0].creator.id, user.id);
        assert_eq!(polls[0].creator.name, "Ada");
        assert_eq!(poll.creator.name, "Ada");
        assert!(store.load_poll_with_counts(poll.id + 1000).await.unwrap().is_none());
    }
}
