//! Verification failures and the event assertion engine.
//!
//! Every variant of [`VerifyError`] is a hard failure for the running
//! scenario. Messages carry enough ids, dates and values to diagnose a
//! failure without re-running it.

use std::time::Duration;

use crate::client::ApiError;
use crate::context::ContextError;
use crate::event::{AggregateId, EventType};
use crate::poll::PollError;
use crate::relations::TransactionId;

mod assertion;

pub use assertion::{
    AssertionSettings, DecimalAssertion, EventAssertion, EventAssertionBuilder, FieldAssertion,
};

/// Result type for verification.
pub type Result<T> = std::result::Result<T, VerifyError>;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("{event_type} for key {key} not raised within {waited:?}{}", describe_observed(.observed))]
    EventNotFound {
        event_type: EventType,
        key: AggregateId,
        waited: Duration,
        /// Other captures for the same key, to spot a wrong event type.
        observed: Vec<EventType>,
    },

    #[error("{event_type}{} was raised but must not be: {detail}", describe_key(.key))]
    UnexpectedEvent {
        event_type: EventType,
        key: Option<AggregateId>,
        detail: String,
    },

    #[error("Expected exactly one {event_type} for key {key}, captured {count}")]
    DuplicateEvent {
        event_type: EventType,
        key: AggregateId,
        count: usize,
    },

    #[error("{event_type} for key {key}: field '{field}' expected {expected} but was {actual}")]
    AssertionMismatch {
        event_type: EventType,
        key: AggregateId,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("{event_type} for key {key} carries schema '{actual}', expected '{expected}'")]
    SchemaMismatch {
        event_type: EventType,
        key: AggregateId,
        expected: &'static str,
        actual: String,
    },

    #[error("{event_type} for key {key} has an undecodable payload: {source}")]
    PayloadDecode {
        event_type: EventType,
        key: AggregateId,
        #[source]
        source: serde_json::Error,
    },

    #[error("No transaction matching {criteria} ({found} candidates)")]
    TransactionNotFound { criteria: String, found: usize },

    #[error("Transaction {transaction_id} has no {relation} relation: {}", describe_reversal(.reversed))]
    RelationshipMissing {
        transaction_id: TransactionId,
        relation: String,
        reversed: bool,
    },

    #[error("Transaction {transaction_id} has {count} outgoing {relation} relations, expected one")]
    AmbiguousRelation {
        transaction_id: TransactionId,
        relation: String,
        count: usize,
    },

    #[error("Transaction {transaction_id} was replayed as {replacement_id}, which is not in the loan history")]
    ReplacementNotFound {
        transaction_id: TransactionId,
        replacement_id: TransactionId,
    },

    #[error("Replacement {replacement_id} dated {replacement_date} precedes transaction {transaction_id} dated {source_date}")]
    ReplacementPredatesSource {
        transaction_id: TransactionId,
        replacement_id: TransactionId,
        source_date: chrono::NaiveDate,
        replacement_date: chrono::NaiveDate,
    },

    #[error("Relation chain from transaction {transaction_id} exceeds {depth} hops or loops")]
    RelationChainTooLong {
        transaction_id: TransactionId,
        depth: usize,
    },

    #[error("Idempotency token {token} produced resource {second}, first call produced {first}")]
    DuplicateEffect {
        token: String,
        first: i64,
        second: i64,
    },

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("Backend call failed: {0}")]
    Backend(#[from] ApiError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

fn describe_observed(observed: &[EventType]) -> String {
    if observed.is_empty() {
        return "; nothing captured for this key".to_string();
    }
    let types: Vec<&str> = observed.iter().map(EventType::as_str).collect();
    format!("; captured for this key: {}", types.join(", "))
}

fn describe_key(key: &Option<AggregateId>) -> String {
    match key {
        Some(key) => format!(" for key {key}"),
        None => String::new(),
    }
}

fn describe_reversal(reversed: &bool) -> &'static str {
    if *reversed {
        "it was reversed but not replayed"
    } else {
        "it was never reversed"
    }
}
