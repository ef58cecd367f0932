//! Poll Engine
//!
//! Entry point for the HTTP layer. Runs the vote path (guard, then tally,
//! then broadcast) and forwards the plain CRUD operations to the store.

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

use super::guard::{VoteError, VoteGuard};
use super::model::{NewPoll, NewUser, OptionId, Poll, PollId, PollResult, User, UserId, Vote};
use super::tally::TallyBuilder;
use crate::broadcast::BroadcastHub;
use crate::metrics::Metrics;
use crate::store::{Store, StoreError};

/// Errors from the CRUD side of the engine
#[derive(Debug, Error)]
pub enum PollError {
    #[error("{0}")]
    Invalid(String),

    #[error("Email already exists")]
    EmailTaken,

    #[error("Creator not found")]
    CreatorNotFound,

    #[error("Poll not found")]
    PollNotFound,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Poll engine shared by all request handlers
#[derive(Clone)]
pub struct PollEngine {
    store: Arc<dyn Store>,
    guard: VoteGuard,
    tally: TallyBuilder,
    hub: Arc<BroadcastHub>,
    metrics: Arc<Metrics>,
}

impl PollEngine {
    /// The hub must exist before the engine does, so no vote can be
    /// accepted without somewhere to publish it.
    pub fn new(store: Arc<dyn Store>, hub: Arc<BroadcastHub>, metrics: Arc<Metrics>) -> Self {
        Self {
            guard: VoteGuard::new(Arc::clone(&store)),
            tally: TallyBuilder::new(Arc::clone(&store)),
            store,
            hub,
            metrics,
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Cast a vote and, once committed, broadcast the new tally.
    ///
    /// The broadcast runs on its own task: the caller gets its answer as soon
    /// as the vote is durable, and dropping the caller does not cancel the
    /// broadcast. Rejected votes never reach the hub.
    pub async fn cast_vote(&self, user_id: UserId, option_id: OptionId) -> Result<Vote, VoteError> {
        let outcome = self.guard.cast_vote(user_id, option_id).await;
        self.metrics.votes_total.inc(match &outcome {
            Ok(_) => "accepted",
            Err(VoteError::DuplicateVote) => "duplicate",
            Err(VoteError::OptionNotFound) | Err(VoteError::UserNotFound) => "not_found",
            Err(VoteError::Store(_)) => "error",
        });

        let vote = outcome?;
        let engine = self.clone();
        let poll_id = vote.poll_id;
        tokio::spawn(async move {
            engine.publish_tally(poll_id).await;
        });

        Ok(vote)
    }

    /// Rebuild the tally for `poll_id` and hand it to the hub.
    pub async fn publish_tally(&self, poll_id: PollId) {
        match self.tally.build_tally(poll_id).await {
            Ok(Some(result)) => self.hub.publish(&result),
            Ok(None) => warn!(poll_id, "Poll vanished before its tally could be published"),
            Err(e) => error!(poll_id, "Failed to build tally for broadcast: {}", e),
        }
    }

    /// Current tally of one poll
    pub async fn poll_results(&self, poll_id: PollId) -> Result<PollResult, PollError> {
        self.tally
            .build_tally(poll_id)
            .await?
            .ok_or(PollError::PollNotFound)
    }

    pub async fn create_user(&self, user: NewUser) -> Result<User, PollError> {
        user.validate().map_err(PollError::Invalid)?;
        self.store.create_user(user).await.map_err(|e| match e {
            StoreError::UniqueViolation(_) => PollError::EmailTaken,
            other => PollError::Store(other),
        })
    }

    pub async fn list_users(&self) -> Result<Vec<User>, PollError> {
        Ok(self.store.list_users().await?)
    }

    pub async fn create_poll(&self, poll: NewPoll) -> Result<Poll, PollError> {
        poll.validate().map_err(PollError::Invalid)?;
        self.store.create_poll(poll).await.map_err(|e| match e {
            StoreError::ForeignKeyViolation => PollError::CreatorNotFound,
            other => PollError::Store(other),
        })
    }

    pub async fn list_polls(&self) -> Result<Vec<Poll>, PollError> {
        Ok(self.store.list_polls().await?)
    }
}

/// Build an engine over `store` with a fresh registry and hub.
pub fn create_engine(store: Arc<dyn Store>, queue_size: usize) -> PollEngine {
    let metrics = Arc::new(Metrics::new());
    let registry = Arc::new(crate::broadcast::ConnectionRegistry::new(queue_size));
    let hub = Arc::new(BroadcastHub::new(registry, Arc::clone(&metrics)));
    PollEngine::new(store, hub, metrics)
}
