//! Store
//!
//! Durable home of users, polls, options and votes. The vote path only needs
//! four queries; the rest is plain CRUD used by the HTTP collaborators.
//!
//! Every backend must enforce uniqueness of `(user_id, poll_id)` inside
//! [`Store::insert_vote`] itself. That constraint is the only concurrency
//! control for the one-vote-per-poll rule.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::StoreConfig;
use crate::polls::model::{
    NewPoll, NewUser, OptionId, Poll, PollCounts, PollId, User, UserId, Vote,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write
    #[error("unique constraint violated: {0}")]
    UniqueViolation(&'static str),

    /// A referenced row does not exist
    #[error("referenced row does not exist")]
    ForeignKeyViolation,

    /// The backend could not be reached or failed mid-query
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Constraint names reported through [`StoreError::UniqueViolation`]
pub const VOTE_UNIQUE: &str = "votes(user_id, poll_id)";
pub const EMAIL_UNIQUE: &str = "users(email)";

#[async_trait]
pub trait Store: Send + Sync {
    /// Poll that owns the option, `None` if the option does not exist
    async fn find_option_owning_poll(
        &self,
        option_id: OptionId,
    ) -> Result<Option<PollId>, StoreError>;

    /// Any vote by `user_id` on any option of `poll_id`
    async fn find_existing_vote(
        &self,
        user_id: UserId,
        poll_id: PollId,
    ) -> Result<Option<Vote>, StoreError>;

    /// Append a vote. Fails with `UniqueViolation(VOTE_UNIQUE)` when the user
    /// already voted in the poll and `ForeignKeyViolation` when the user or
    /// option is unknown.
    async fn insert_vote(
        &self,
        user_id: UserId,
        option_id: OptionId,
        poll_id: PollId,
    ) -> Result<Vote, StoreError>;

    /// Poll question and per-option counts in option creation order
    async fn load_poll_with_counts(
        &self,
        poll_id: PollId,
    ) -> Result<Option<PollCounts>, StoreError>;

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Create a poll and its options in one write. `ForeignKeyViolation` if
    /// the creator is unknown.
    async fn create_poll(&self, poll: NewPoll) -> Result<Poll, StoreError>;

    async fn list_polls(&self) -> Result<Vec<Poll>, StoreError>;
}

/// Open the backend named by the configuration.
///
/// `memory` selects the in-process store; anything else is treated as a
/// SQLite connection URL.
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
    if config.url == "memory" {
        tracing::info!("Using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    tracing::info!(url = %config.url, "Opening SQLite store");
    let store = SqliteStore::connect(&config.url, config.max_connections).await?;
    Ok(Arc::new(store))
}
