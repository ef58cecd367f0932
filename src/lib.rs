//! pollcast library
//!
//! Poll voting with one vote per user per poll, backed by a SQLite (or
//! in-memory) store, and a WebSocket channel that pushes each poll's tally to
//! every connected observer after a vote commits.

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod polls;
pub mod server;
pub mod store;
