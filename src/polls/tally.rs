//! Tally Builder
//!
//! Turns the store's per-option counts into the [`PollResult`] pushed to
//! observers. Read-only.

use std::sync::Arc;

use super::model::{OptionTally, PollCounts, PollId, PollResult};
use crate::store::{Store, StoreError};

#[derive(Clone)]
pub struct TallyBuilder {
    store: Arc<dyn Store>,
}

impl TallyBuilder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Current counts for `poll_id`, options in creation order. `None` if
    /// the poll does not exist.
    pub async fn build_tally(&self, poll_id: PollId) -> Result<Option<PollResult>, StoreError> {
        let counts = self.store.load_poll_with_counts(poll_id).await?;
        Ok(counts.map(PollResult::from))
    }
}

impl From<PollCounts> for PollResult {
    fn from(counts: PollCounts) -> Self {
        Self {
            poll_id: counts.poll_id,
            question: counts.question,
            options: counts
                .options
                .into_iter()
                .map(|(option, votes)| OptionTally {
                    id: option.id,
                    text: option.text,
                    votes,
                })
                .collect(),
        }
    }
}
