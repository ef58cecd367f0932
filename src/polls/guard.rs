//! Vote Guard
//!
//! Validates a vote against the store and commits it. The existence check is
//! only a fast path; the store's `(user_id, poll_id)` constraint decides
//! concurrent races, and its rejection is reported as a duplicate.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::model::{OptionId, UserId, Vote};
use crate::store::{Store, StoreError, VOTE_UNIQUE};

/// Vote rejection reasons
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("Poll option not found.")]
    OptionNotFound,

    #[error("User not found.")]
    UserNotFound,

    #[error("You have already voted on this poll.")]
    DuplicateVote,

    /// Nothing was committed; the client may retry
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for VoteError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(VOTE_UNIQUE) => VoteError::DuplicateVote,
            StoreError::ForeignKeyViolation => VoteError::UserNotFound,
            other => VoteError::Store(other),
        }
    }
}

/// Enforces one vote per user per poll
#[derive(Clone)]
pub struct VoteGuard {
    store: Arc<dyn Store>,
}

impl VoteGuard {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a vote for `option_id` on behalf of `user_id`.
    pub async fn cast_vote(&self, user_id: UserId, option_id: OptionId) -> Result<Vote, VoteError> {
        let poll_id = self
            .store
            .find_option_owning_poll(option_id)
            .await?
            .ok_or(VoteError::OptionNotFound)?;

        if self
            .store
            .find_existing_vote(user_id, poll_id)
            .await?
            .is_some()
        {
            warn!(user_id, poll_id, "Rejected repeat vote");
            return Err(VoteError::DuplicateVote);
        }

        let vote = self
            .store
            .insert_vote(user_id, option_id, poll_id)
            .await
            .map_err(|e| {
                let err = VoteError::from(e);
                if matches!(err, VoteError::DuplicateVote) {
                    warn!(user_id, poll_id, "Concurrent repeat vote lost the insert race");
                }
                err
            })?;

        info!(
            vote_id = vote.id,
            user_id,
            poll_id,
            option_id,
            "Vote recorded"
        );
        Ok(vote)
    }
}
