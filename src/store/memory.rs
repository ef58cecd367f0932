//! In-memory store
//!
//! All tables live behind one `RwLock`, so `insert_vote` performs its
//! uniqueness check and its append under the same write guard.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use super::{Store, StoreError, EMAIL_UNIQUE, VOTE_UNIQUE};
use crate::polls::model::{
    now_millis, NewPoll, NewUser, OptionId, Poll, PollCounts, PollId, PollOption, User, UserId,
    UserSummary, Vote,
};

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<UserId, User>,
    polls: BTreeMap<PollId, Poll>,
    /// option id -> owning poll id
    option_owner: HashMap<OptionId, PollId>,
    votes: Vec<Vote>,
    /// (user_id, poll_id) -> index into `votes`
    voted: HashMap<(UserId, PollId), usize>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local store for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed votes
    pub fn vote_count(&self) -> usize {
        self.tables.read().votes.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_option_owning_poll(
        &self,
        option_id: OptionId,
    ) -> Result<Option<PollId>, StoreError> {
        Ok(self.tables.read().option_owner.get(&option_id).copied())
    }

    async fn find_existing_vote(
        &self,
        user_id: UserId,
        poll_id: PollId,
    ) -> Result<Option<Vote>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .voted
            .get(&(user_id, poll_id))
            .map(|&idx| tables.votes[idx].clone()))
    }

    async fn insert_vote(
        &self,
        user_id: UserId,
        option_id: OptionId,
        poll_id: PollId,
    ) -> Result<Vote, StoreError> {
        let mut tables = self.tables.write();

        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::ForeignKeyViolation);
        }
        if tables.option_owner.get(&option_id) != Some(&poll_id) {
            return Err(StoreError::ForeignKeyViolation);
        }
        if tables.voted.contains_key(&(user_id, poll_id)) {
            return Err(StoreError::UniqueViolation(VOTE_UNIQUE));
        }

        let vote = Vote {
            id: tables.next_id(),
            user_id,
            poll_option_id: option_id,
            poll_id,
            created_at: now_millis(),
        };
        let idx = tables.votes.len();
        tables.votes.push(vote.clone());
        tables.voted.insert((user_id, poll_id), idx);

        Ok(vote)
    }

    async fn load_poll_with_counts(
        &self,
        poll_id: PollId,
    ) -> Result<Option<PollCounts>, StoreError> {
        let tables = self.tables.read();
        let Some(poll) = tables.polls.get(&poll_id) else {
            return Ok(None);
        };

        let mut counts: HashMap<OptionId, u64> = HashMap::new();
        for vote in tables.votes.iter().filter(|v| v.poll_id == poll_id) {
            *counts.entry(vote.poll_option_id).or_insert(0) += 1;
        }

        Ok(Some(PollCounts {
            poll_id,
            question: poll.question.clone(),
            options: poll
                .options
                .iter()
                .map(|o| (o.clone(), counts.get(&o.id).copied().unwrap_or(0)))
                .collect(),
        }))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.write();
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::UniqueViolation(EMAIL_UNIQUE));
        }

        let user = User {
            id: tables.next_id(),
            name: user.name,
            email: user.email,
            created_at: now_millis(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.tables.read().users.values().cloned().collect())
    }

    async fn create_poll(&self, poll: NewPoll) -> Result<Poll, StoreError> {
        let mut tables = self.tables.write();
        let creator = match tables.users.get(&poll.creator_id) {
            Some(user) => UserSummary {
                id: user.id,
                name: user.name.clone(),
            },
            None => return Err(StoreError::ForeignKeyViolation),
        };

        let poll_id = tables.next_id();
        let mut options = Vec::with_capacity(poll.options.len());
        for text in poll.options {
            let id = tables.next_id();
            tables.option_owner.insert(id, poll_id);
            options.push(PollOption { id, poll_id, text });
        }

        let poll = Poll {
            id: poll_id,
            question: poll.question,
            creator_id: poll.creator_id,
            creator,
            created_at: now_millis(),
            options,
        };
        tables.polls.insert(poll_id, poll.clone());
        Ok(poll)
    }

    async fn list_polls(&self) -> Result<Vec<Poll>, StoreError> {
        Ok(self.tables.read().polls.values().cloned().collect())
    }
}
