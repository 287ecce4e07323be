//! Ledger Probe - event correlation for banking backend test suites
//!
//! Captures the domain events a banking backend publishes asynchronously,
//! waits for them with bounded polling, and checks them against the
//! synchronous resource state (transaction histories with reversal and
//! replay edges, idempotent replays).

pub mod bus;
pub mod client;
pub mod config;
pub mod context;
pub mod event;
pub mod idempotency;
pub mod jobs;
pub mod poll;
pub mod relations;
pub mod store;
pub mod utils;
pub mod verify;
