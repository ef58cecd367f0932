//! Polling Module
//!
//! Vote casting with one-vote-per-user-per-poll enforcement, tally
//! computation, and the engine that ties them to the broadcast hub.

pub mod engine;
pub mod guard;
pub mod model;
pub mod tally;

pub use engine::{create_engine, PollEngine, PollError};
pub use guard::{VoteError, VoteGuard};
pub use model::{
    NewPoll, NewUser, OptionTally, Poll, PollOption, PollResult, User, UserSummary, Vote,
    VoteRequest,
};
pub use tally::TallyBuilder;
