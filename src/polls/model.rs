//! Poll Data Model
//!
//! Entities persisted by the store and the tally value object pushed to
//! observers. All JSON uses camelCase field names.

use serde::{Deserialize, Serialize};

/// Store-assigned identifier for users.
pub type UserId = i64;
/// Store-assigned identifier for polls.
pub type PollId = i64;
/// Store-assigned identifier for poll options.
pub type OptionId = i64;
/// Store-assigned identifier for votes.
pub type VoteId = i64;

/// A registered participant. No password material is kept here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    /// Unix ms
    pub created_at: i64,
}

/// Input for registering a user
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub email: String,
}

impl NewUser {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Reject blank names and addresses without an `@`.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("User name is required".to_string());
        }
        if !self.email.contains('@') {
            return Err("A valid email is required".to_string());
        }
        Ok(())
    }
}

/// One selectable answer of a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub id: OptionId,
    pub poll_id: PollId,
    pub text: String,
}

/// Public part of a user, embedded where another entity refers to one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
}

/// A question with a fixed, ordered set of options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub creator_id: UserId,
    pub creator: UserSummary,
    /// Unix ms
    pub created_at: i64,
    /// Creation order
    pub options: Vec<PollOption>,
}

/// Input for creating a poll together with its options
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPoll {
    pub question: String,
    pub options: Vec<String>,
    pub creator_id: UserId,
}

impl NewPoll {
    pub fn new<I, S>(question: impl Into<String>, options: I, creator_id: UserId) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            question: question.into(),
            options: options.into_iter().map(Into::into).collect(),
            creator_id,
        }
    }

    /// A poll needs a question and at least two non-blank options.
    pub fn validate(&self) -> Result<(), String> {
        if self.question.trim().is_empty() {
            return Err("Poll question is required".to_string());
        }
        if self.options.len() < 2 {
            return Err("Poll must have at least 2 options".to_string());
        }
        if self.options.iter().any(|o| o.trim().is_empty()) {
            return Err("Poll options cannot be empty".to_string());
        }
        Ok(())
    }
}

/// A committed vote. Append-only; never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: VoteId,
    pub user_id: UserId,
    pub poll_option_id: OptionId,
    pub poll_id: PollId,
    /// Unix ms
    pub created_at: i64,
}

/// Vote submission body
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub user_id: UserId,
    pub poll_option_id: OptionId,
}

/// Raw aggregation returned by the store: a poll and the vote count of each
/// option, in option creation order.
#[derive(Debug, Clone)]
pub struct PollCounts {
    pub poll_id: PollId,
    pub question: String,
    pub options: Vec<(PollOption, u64)>,
}

/// Per-option line of a tally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionTally {
    pub id: OptionId,
    pub text: String,
    pub votes: u64,
}

/// Vote counts of one poll at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResult {
    pub poll_id: PollId,
    pub question: String,
    pub options: Vec<OptionTally>,
}

impl PollResult {
    /// Sum of all option counts
    pub fn total_votes(&self) -> u64 {
        self.options.iter().map(|o| o.votes).sum()
    }

    /// Count for a single option, if it belongs to this poll
    pub fn votes_for(&self, option_id: OptionId) -> Option<u64> {
        self.options
            .iter()
            .find(|o| o.id == option_id)
            .map(|o| o.votes)
    }
}

/// Current time as Unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
